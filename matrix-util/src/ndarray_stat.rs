use ndarray::{ArrayBase, Data, Dimension, OwnedRepr, Zip};

/// A container to keep track of sufficient statistics of an arbitrary
/// shape `ndarray`, updated one array at a time by Welford's online
/// algorithm. Non-finite values are skipped element-wise.
///
/// # Type parameters
/// - `S` : The shape of the array
///
#[derive(Clone)]
pub struct RunningStatistics<S>
where
    S: Dimension,
{
    nobs: ArrayBase<OwnedRepr<f64>, S>,
    mean: ArrayBase<OwnedRepr<f64>, S>,
    m2: ArrayBase<OwnedRepr<f64>, S>,
}

impl<S> RunningStatistics<S>
where
    S: Dimension,
{
    /// Create a new RunningStatistics object
    ///
    /// # Arguments
    ///
    /// * `shape` - The shape of the array
    ///
    /// # Examples
    ///
    /// ```
    /// use matrix_util::ndarray_stat::RunningStatistics;
    /// use ndarray::Ix1;
    /// let ngenes = 10;
    /// RunningStatistics::new(Ix1(ngenes));
    /// ```
    ///
    pub fn new(shape: S) -> Self {
        RunningStatistics {
            nobs: ArrayBase::zeros(shape.clone()),
            mean: ArrayBase::zeros(shape.clone()),
            m2: ArrayBase::zeros(shape),
        }
    }

    /// Fold one more observation of every element
    pub fn add<V>(&mut self, xx: &ArrayBase<V, S>)
    where
        V: Data<Elem = f32>,
    {
        debug_assert_eq!(xx.shape(), self.mean.shape());

        Zip::from(&mut self.nobs)
            .and(&mut self.mean)
            .and(&mut self.m2)
            .and(xx)
            .for_each(|n, mu, m2, &x| {
                if x.is_finite() {
                    let x = x as f64;
                    *n += 1.0;
                    let delta = x - *mu;
                    *mu += delta / *n;
                    *m2 += delta * (x - *mu);
                }
            });
    }

    pub fn clear(&mut self) {
        self.nobs.fill(0.0);
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }

    /// Number of finite observations per element
    pub fn count(&self) -> ArrayBase<OwnedRepr<f64>, S> {
        self.nobs.clone()
    }

    /// Average statistic
    pub fn mean(&self) -> ArrayBase<OwnedRepr<f64>, S> {
        self.mean.clone()
    }

    /// Variance with `ddof` delta degrees of freedom: `m2 / (n - ddof)`.
    /// Elements with `n <= ddof` come out as `NaN`.
    pub fn variance_ddof(&self, ddof: f64) -> ArrayBase<OwnedRepr<f64>, S> {
        let mut ret = self.m2.clone();
        Zip::from(&mut ret).and(&self.nobs).for_each(|v, &n| {
            *v = if n > ddof { *v / (n - ddof) } else { f64::NAN };
        });
        ret
    }

    /// Population variance
    pub fn variance(&self) -> ArrayBase<OwnedRepr<f64>, S> {
        self.variance_ddof(0.0)
    }

    /// Standard deviation with `ddof` delta degrees of freedom
    pub fn std_ddof(&self, ddof: f64) -> ArrayBase<OwnedRepr<f64>, S> {
        self.variance_ddof(ddof).mapv(f64::sqrt)
    }

    /// Population standard deviation
    pub fn std(&self) -> ArrayBase<OwnedRepr<f64>, S> {
        self.std_ddof(0.0)
    }

    pub fn shape(&self) -> &[usize] {
        self.mean.shape()
    }
}

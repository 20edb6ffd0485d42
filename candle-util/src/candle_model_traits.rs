use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// Parameters of the Gaussian posterior `q(z|x)`
    ///
    /// # Arguments
    /// * `x_nd` - observed counts (n x d)
    /// * `cov_nc` - one-hot covariates (n x c), if the encoder takes any
    ///
    /// # Returns `(z_mean_nk, z_var_nk)`
    fn latent_gaussian_params(
        &self,
        x_nd: &Tensor,
        cov_nc: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// Expected gene frequencies given latent states; each row sums
    /// to one
    ///
    /// * `z_nk` - latent states (n x k)
    /// * `cov_nc` - one-hot covariates (n x c)
    fn forward_scale(&self, z_nk: &Tensor, cov_nc: Option<&Tensor>) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    fn dim_covariates(&self) -> usize;
}

use crate::common::*;
use crate::covariates::CovariateDesign;
use crate::gene_list::ValidGenes;
use crate::gene_stat::GeneStatTable;

use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_model_traits::*;
use candle_util::candle_scvi_model::ScviModel;
use data_beans::anndata::{AnnData, RowMatrix};
use indicatif::{ProgressBar, ProgressDrawTarget};
use matrix_util::ndarray_stat::RunningStatistics;
use ndarray::{Array2, Ix1};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

/// Anything that can produce denoised expression for a set of cells
pub trait ExpressionDenoiser {
    /// Number of genes on the model's output axis
    fn num_genes(&self) -> usize;

    /// Denoised expression (cells x genes) normalized to
    /// `library_size` total counts per cell
    ///
    /// # Arguments
    /// * `cells` - row indices of the data
    /// * `genes` - columns to keep, in this order
    /// * `library_size` - target library size
    /// * `rng` - source of posterior noise
    fn denoise(
        &self,
        cells: &[usize],
        genes: &[usize],
        library_size: f32,
        rng: &mut StdRng,
    ) -> anyhow::Result<Mat>;
}

#[derive(Clone, Debug)]
pub struct DenoiseConfig {
    pub library_size: f32,
    pub batch_size: usize,
    pub show_progress: bool,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            library_size: DEFAULT_LIBRARY_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }
}

/// Denoise the sampled cells minibatch by minibatch and accumulate
/// per-gene mean and sample standard deviation
///
/// * `denoiser` - model
/// * `cells` - sampled cells
/// * `genes` - valid genes
/// * `config` - library size and minibatch size
/// * `rng` - source of posterior noise
pub fn denoised_gene_statistics<D>(
    denoiser: &D,
    cells: &[usize],
    genes: &ValidGenes,
    config: &DenoiseConfig,
    rng: &mut StdRng,
) -> anyhow::Result<GeneStatTable>
where
    D: ExpressionDenoiser + ?Sized,
{
    if !(config.library_size.is_finite() && config.library_size > 0.) {
        return Err(anyhow::anyhow!(
            "library size must be positive: {}",
            config.library_size
        ));
    }
    if config.batch_size == 0 {
        return Err(anyhow::anyhow!("batch size must be positive"));
    }
    if cells.len() < 2 {
        return Err(HvgError::SampleTooSmall(cells.len()).into());
    }
    if let Some(&g) = genes.indices.iter().find(|&&g| g >= denoiser.num_genes()) {
        return Err(anyhow::anyhow!(
            "gene column {} is out of the model's {} genes",
            g,
            denoiser.num_genes()
        ));
    }

    let ngenes = genes.len();
    let mut stat = RunningStatistics::new(Ix1(ngenes));

    let pb = ProgressBar::new(cells.len() as u64);
    if !config.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    for batch in cells.chunks(config.batch_size) {
        let x_ng = denoiser.denoise(batch, &genes.indices, config.library_size, rng)?;

        if x_ng.dim() != (batch.len(), ngenes) {
            return Err(anyhow::anyhow!(
                "denoiser returned {:?} for {} cells x {} genes",
                x_ng.dim(),
                batch.len(),
                ngenes
            ));
        }

        if let Some(((_, g), _)) = x_ng.indexed_iter().find(|(_, x)| !x.is_finite()) {
            return Err(HvgError::NonFiniteStatistic(genes.names[g].clone()).into());
        }

        for x_g in x_ng.rows() {
            stat.add(&x_g);
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();

    let mean = stat.mean().to_vec();
    let std = stat.std_ddof(STD_DDOF).to_vec();
    info!("Computed statistics of {} genes over {} cells", ngenes, cells.len());

    GeneStatTable::new(&genes.names, &mean, &std)
}

////////////////////////////////////////////////////////////////
// scVI
////////////////////////////////////////////////////////////////

/// Where the latent states come from
pub enum LatentSource {
    /// encode raw counts
    Counts(RowMatrix),
    /// posterior stored in a minified AnnData; `qzv` is a variance
    Posterior {
        qzm: RowMatrix,
        qzv: Option<RowMatrix>,
    },
}

impl LatentSource {
    /// Use the stored posterior of a minified AnnData, or the counts
    /// otherwise
    ///
    /// * `adata` - data
    /// * `layer` - count layer; `X` if `None`
    pub fn from_adata(adata: &AnnData, layer: Option<&str>) -> anyhow::Result<Self> {
        let qzm = adata.obsm(LATENT_QZM_KEY)?;
        let counts = adata.count_matrix(layer)?;
        let minified = adata.has_uns(MINIFY_TYPE_KEY);

        match (qzm, counts) {
            (Some(qzm), counts) if minified || counts.is_none() => {
                let qzv = adata.obsm(LATENT_QZV_KEY)?;
                if let Some(v) = &qzv {
                    if v.ncols() != qzm.ncols() {
                        return Err(anyhow::anyhow!(
                            "{} has {} columns, {} has {}",
                            LATENT_QZM_KEY,
                            qzm.ncols(),
                            LATENT_QZV_KEY,
                            v.ncols()
                        ));
                    }
                } else {
                    warn!("no {}; decoding the posterior mean", LATENT_QZV_KEY);
                }
                info!("using the stored latent posterior ({} dims)", qzm.ncols());
                Ok(Self::Posterior { qzm, qzv })
            }
            (_, Some(x)) => Ok(Self::Counts(x)),
            (None, None) => Err(anyhow::anyhow!(
                "{} has neither counts nor a stored latent posterior",
                adata.file_path()
            )),
        }
    }

    /// Latent dimension, if the posterior is stored
    pub fn stored_latent_dim(&self) -> Option<usize> {
        match self {
            Self::Counts(_) => None,
            Self::Posterior { qzm, .. } => Some(qzm.ncols()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScviDenoiseOptions {
    pub covariate_keys: Vec<Box<str>>,
    pub posterior_samples: usize,
    pub use_posterior_mean: bool,
}

impl Default for ScviDenoiseOptions {
    fn default() -> Self {
        Self {
            covariate_keys: vec![BATCH_KEY.into()],
            posterior_samples: 1,
            use_posterior_mean: false,
        }
    }
}

pub struct ScviDenoiser<'a> {
    model: &'a ScviModel,
    latent: LatentSource,
    covariates: Option<CovariateDesign>,
    posterior_samples: usize,
    use_posterior_mean: bool,
}

impl<'a> ScviDenoiser<'a> {
    /// # Arguments
    /// * `model` - pretrained scVI
    /// * `adata` - data the model is applied to
    /// * `latent` - counts or stored posterior of `adata`
    /// * `options` - covariates and posterior sampling
    pub fn new(
        model: &'a ScviModel,
        adata: &AnnData,
        latent: LatentSource,
        options: &ScviDenoiseOptions,
    ) -> anyhow::Result<Self> {
        if model.arch.n_genes != adata.num_vars() {
            return Err(HvgError::GeneAxisMismatch {
                model: model.arch.n_genes,
                data: adata.num_vars(),
            }
            .into());
        }

        match &latent {
            LatentSource::Counts(x) => {
                if model.encoder.is_none() {
                    return Err(anyhow::anyhow!(
                        "the model has no encoder and {} stores no latent posterior",
                        adata.file_path()
                    ));
                }
                if x.ncols() != model.arch.n_genes {
                    return Err(HvgError::GeneAxisMismatch {
                        model: model.arch.n_genes,
                        data: x.ncols(),
                    }
                    .into());
                }
            }
            LatentSource::Posterior { qzm, .. } => {
                if qzm.ncols() != model.arch.n_latent {
                    return Err(anyhow::anyhow!(
                        "stored latent has {} dims, the model {}",
                        qzm.ncols(),
                        model.arch.n_latent
                    ));
                }
            }
        }

        let n_covariates = model.decoder.dim_covariates();
        let covariates = CovariateDesign::from_obs(adata, &options.covariate_keys, n_covariates)?;

        if let (LatentSource::Counts(_), Some(encoder)) = (&latent, &model.encoder) {
            let enc_width = encoder.dim_covariates();
            if enc_width > 0 && enc_width != n_covariates {
                return Err(HvgError::CovariateMismatch {
                    expected: enc_width,
                    found: n_covariates,
                }
                .into());
            }
        }

        if options.posterior_samples == 0 && !options.use_posterior_mean {
            return Err(anyhow::anyhow!("need at least one posterior sample"));
        }

        Ok(Self {
            model,
            latent,
            covariates,
            posterior_samples: options.posterior_samples,
            use_posterior_mean: options.use_posterior_mean,
        })
    }

    fn latent_gaussian(
        &self,
        cells: &[usize],
        cov_nc: Option<&Tensor>,
    ) -> anyhow::Result<(Tensor, Tensor)> {
        let dev = &self.model.device;
        match &self.latent {
            LatentSource::Counts(x) => {
                let encoder = self
                    .model
                    .encoder
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("no encoder"))?;
                let x_nd = to_tensor(&x.read_rows(cells)?, dev)?;
                let cov_nc = if encoder.dim_covariates() > 0 {
                    cov_nc
                } else {
                    None
                };
                Ok(encoder.latent_gaussian_params(&x_nd, cov_nc)?)
            }
            LatentSource::Posterior { qzm, qzv } => {
                let z_mean = to_tensor(&qzm.read_rows(cells)?, dev)?;
                let z_var = match qzv {
                    Some(v) => to_tensor(&v.read_rows(cells)?, dev)?,
                    None => z_mean.zeros_like()?,
                };
                Ok((z_mean, z_var))
            }
        }
    }
}

impl ExpressionDenoiser for ScviDenoiser<'_> {
    fn num_genes(&self) -> usize {
        self.model.arch.n_genes
    }

    fn denoise(
        &self,
        cells: &[usize],
        genes: &[usize],
        library_size: f32,
        rng: &mut StdRng,
    ) -> anyhow::Result<Mat> {
        let dev = &self.model.device;
        let (n, k) = (cells.len(), self.model.arch.n_latent);

        let cov_nc = match &self.covariates {
            Some(design) => Some(Tensor::from_vec(
                design.one_hot(cells)?,
                (n, design.width()),
                dev,
            )?),
            None => None,
        };

        let (z_mean, z_var) = self.latent_gaussian(cells, cov_nc.as_ref())?;
        let z_sd = z_var.sqrt()?;

        let gene_idx: Vec<u32> = genes.iter().map(|&g| g as u32).collect();
        let gene_idx = Tensor::from_vec(gene_idx, genes.len(), dev)?;

        let n_samples = if self.use_posterior_mean {
            1
        } else {
            self.posterior_samples
        };

        let mut rho_ng: Option<Tensor> = None;
        for _ in 0..n_samples {
            let z_nk = if self.use_posterior_mean {
                z_mean.clone()
            } else {
                // noise is drawn on the host so a seed fixes the result
                let eps: Vec<f32> = (0..n * k).map(|_| StandardNormal.sample(rng)).collect();
                let eps = Tensor::from_vec(eps, (n, k), dev)?;
                (&z_mean + (&z_sd * eps)?)?
            };
            let px_ng = self
                .model
                .decoder
                .forward_scale(&z_nk, cov_nc.as_ref())?
                .index_select(&gene_idx, 1)?;
            rho_ng = Some(match rho_ng {
                Some(acc) => (acc + px_ng)?,
                None => px_ng,
            });
        }

        let rho_ng = rho_ng.ok_or_else(|| anyhow::anyhow!("no posterior sample"))?;
        let x_ng = (rho_ng * (library_size as f64 / n_samples as f64))?;

        let values = x_ng.to_device(&Device::Cpu)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(Array2::from_shape_vec((n, genes.len()), values)?)
    }
}

fn to_tensor(x: &Mat, dev: &Device) -> anyhow::Result<Tensor> {
    let data = x
        .as_slice()
        .ok_or_else(|| anyhow::anyhow!("expected a contiguous matrix"))?;
    Ok(Tensor::from_slice(data, x.dim(), dev)?)
}

use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// scVI's `z_encoder`: counts -> Gaussian posterior over latent states
pub struct ScviEncoder {
    n_features: usize,
    n_latent: usize,
    log_variational: bool,
    fc: FcLayers,
    z_mean: Linear,
    z_var: Linear,
}

const VAR_EPS: f64 = 1e-4;

impl EncoderModuleT for ScviEncoder {
    fn latent_gaussian_params(
        &self,
        x_nd: &Tensor,
        cov_nc: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        debug_assert_eq!(x_nd.dims().len(), 2);

        let x_nd = if self.log_variational {
            (x_nd + 1.)?.log()?
        } else {
            x_nd.clone()
        };

        let h_nl = self.fc.forward_with_covariates(&x_nd, cov_nc)?;
        let z_mean_nk = self.z_mean.forward(&h_nl)?;
        let z_var_nk = (self.z_var.forward(&h_nl)?.exp()? + VAR_EPS)?;
        Ok((z_mean_nk, z_var_nk))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl ScviEncoder {
    /// Will load these variables under `vs`:
    ///
    /// * `encoder.fc_layers.*` hidden layers
    /// * `mean_encoder.{weight,bias}`
    /// * `var_encoder.{weight,bias}`
    ///
    /// # Arguments
    /// * `fc_config` - hidden layers; `n_in` is the number of genes
    /// * `n_latent` - latent dimension
    /// * `log_variational` - take `log1p` of the counts first
    /// * `vs` - variable builder
    pub fn new(
        fc_config: &FcLayersConfig,
        n_latent: usize,
        log_variational: bool,
        vs: VarBuilder,
    ) -> Result<Self> {
        let fc = FcLayers::new(fc_config, vs.pp("encoder"))?;
        let z_mean = candle_nn::linear(fc.dim_output(), n_latent, vs.pp("mean_encoder"))?;
        let z_var = candle_nn::linear(fc.dim_output(), n_latent, vs.pp("var_encoder"))?;

        Ok(Self {
            n_features: fc_config.n_in,
            n_latent,
            log_variational,
            fc,
            z_mean,
            z_var,
        })
    }

    pub fn dim_covariates(&self) -> usize {
        self.fc.config().n_covariates
    }
}

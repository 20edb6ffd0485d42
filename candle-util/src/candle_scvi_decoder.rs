use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, VarBuilder};

/// scVI's `decoder`, reduced to the normalised-expression path:
/// latent states -> hidden layers -> softmax over genes
pub struct ScviDecoder {
    n_features: usize,
    n_latent: usize,
    fc: FcLayers,
    px_scale: Linear,
}

impl DecoderModuleT for ScviDecoder {
    fn forward_scale(&self, z_nk: &Tensor, cov_nc: Option<&Tensor>) -> Result<Tensor> {
        let h_nl = self.fc.forward_with_covariates(z_nk, cov_nc)?;
        ops::softmax_last_dim(&self.px_scale.forward(&h_nl)?)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn dim_covariates(&self) -> usize {
        self.fc.config().n_covariates
    }
}

impl ScviDecoder {
    /// Will load these variables under `vs`:
    ///
    /// * `px_decoder.fc_layers.*` hidden layers
    /// * `px_scale_decoder.0.{weight,bias}`
    ///
    /// # Arguments
    /// * `fc_config` - hidden layers; `n_in` is the latent dimension
    /// * `n_features` - number of genes
    /// * `vs` - variable builder
    pub fn new(fc_config: &FcLayersConfig, n_features: usize, vs: VarBuilder) -> Result<Self> {
        let fc = FcLayers::new(fc_config, vs.pp("px_decoder"))?;
        let px_scale = candle_nn::linear(
            fc.dim_output(),
            n_features,
            vs.pp("px_scale_decoder").pp("0"),
        )?;

        Ok(Self {
            n_features,
            n_latent: fc_config.n_in,
            fc,
            px_scale,
        })
    }
}

use candle_core::{Result, Tensor, D};
use candle_nn::{BatchNorm, Linear, Module, ModuleT, VarBuilder};

/// Shape of a stack of fully connected layers as scVI lays them out
#[derive(Clone, Debug, PartialEq)]
pub struct FcLayersConfig {
    pub n_in: usize,
    pub n_hidden: usize,
    pub n_layers: usize,
    /// width of the one-hot covariates concatenated to a layer's input
    pub n_covariates: usize,
    /// inject covariates into every layer, not only the first one
    pub inject_all: bool,
    pub batch_norm: bool,
    pub layer_norm: bool,
}

impl FcLayersConfig {
    fn injects_into(&self, layer: usize) -> bool {
        self.n_covariates > 0 && (layer == 0 || self.inject_all)
    }

    fn dim_input(&self, layer: usize) -> usize {
        let base = if layer == 0 { self.n_in } else { self.n_hidden };
        if self.injects_into(layer) {
            base + self.n_covariates
        } else {
            base
        }
    }
}

struct FcLayer {
    linear: Linear,
    batch_norm: Option<BatchNorm>,
    inject: bool,
}

/// Linear -> (BatchNorm) -> (LayerNorm) -> ReLU, repeated, with one-hot
/// covariates concatenated to the input of the layers that expect them
pub struct FcLayers {
    config: FcLayersConfig,
    layers: Vec<FcLayer>,
}

const BATCH_NORM_EPS: f64 = 1e-3;
const LAYER_NORM_EPS: f64 = 1e-5;

impl FcLayers {
    /// Will load these variables under `vs`:
    ///
    /// * `fc_layers.Layer {i}.0.{weight,bias}` for the linear maps
    /// * `fc_layers.Layer {i}.1.{weight,bias,running_mean,running_var}`
    ///   when batch norm is on
    pub fn new(config: &FcLayersConfig, vs: VarBuilder) -> Result<Self> {
        let bn_config = candle_nn::BatchNormConfig {
            eps: BATCH_NORM_EPS,
            remove_mean: true,
            affine: true,
            momentum: 0.01,
        };

        let mut layers = Vec::with_capacity(config.n_layers);
        for j in 0..config.n_layers {
            let vs_j = vs.pp("fc_layers").pp(format!("Layer {}", j));
            let linear = candle_nn::linear(config.dim_input(j), config.n_hidden, vs_j.pp("0"))?;
            let batch_norm = if config.batch_norm {
                Some(candle_nn::batch_norm(
                    config.n_hidden,
                    bn_config,
                    vs_j.pp("1"),
                )?)
            } else {
                None
            };
            layers.push(FcLayer {
                linear,
                batch_norm,
                inject: config.injects_into(j),
            });
        }

        Ok(Self {
            config: config.clone(),
            layers,
        })
    }

    /// Evaluate in inference mode (running batch-norm statistics)
    ///
    /// * `x_nd` - input (n x n_in)
    /// * `cov_nc` - one-hot covariates (n x n_covariates)
    pub fn forward_with_covariates(&self, x_nd: &Tensor, cov_nc: Option<&Tensor>) -> Result<Tensor> {
        let mut h = x_nd.clone();
        for layer in self.layers.iter() {
            if layer.inject {
                let cov_nc = cov_nc.ok_or_else(|| {
                    candle_core::Error::Msg(format!(
                        "this layer expects {} covariate columns",
                        self.config.n_covariates
                    ))
                })?;
                h = Tensor::cat(&[&h, cov_nc], 1)?;
            }
            h = layer.linear.forward(&h)?;
            if let Some(bn) = &layer.batch_norm {
                h = bn.forward_t(&h, false)?;
            }
            if self.config.layer_norm {
                h = layer_norm_no_affine(&h, LAYER_NORM_EPS)?;
            }
            h = h.relu()?;
        }
        Ok(h)
    }

    pub fn config(&self) -> &FcLayersConfig {
        &self.config
    }

    pub fn dim_output(&self) -> usize {
        self.config.n_hidden
    }
}

/// Normalise each row to zero mean and unit variance
pub fn layer_norm_no_affine(x_nd: &Tensor, eps: f64) -> Result<Tensor> {
    let mean = x_nd.mean_keepdim(D::Minus1)?;
    let centred = x_nd.broadcast_sub(&mean)?;
    let var = centred.sqr()?.mean_keepdim(D::Minus1)?;
    centred.broadcast_div(&(var + eps)?.sqrt()?)
}

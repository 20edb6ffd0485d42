//! A pretrained scVI model restored from its state dict.
//!
//! The layer sizes are not stored as such; they are recovered from
//! the shapes of the saved weights.

use crate::candle_aux_layers::FcLayersConfig;
use crate::candle_model_traits::*;
use crate::candle_scvi_decoder::ScviDecoder;
use crate::candle_scvi_encoder::ScviEncoder;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use log::info;
use std::collections::HashMap;
use std::path::Path;

const DECODER: &str = "decoder.px_decoder";
const DECODER_SCALE: &str = "decoder.px_scale_decoder.0.weight";
const ENCODER: &str = "z_encoder.encoder";
const ENCODER_MEAN: &str = "z_encoder.mean_encoder.weight";

#[derive(Clone, Debug, PartialEq)]
pub struct ScviArchitecture {
    pub n_genes: usize,
    pub n_latent: usize,
    pub decoder: FcLayersConfig,
    pub encoder: Option<FcLayersConfig>,
}

/// Options that cannot be read off the weights
#[derive(Clone, Debug)]
pub struct ScviLoadOptions {
    /// latent dimension, needed only when the encoder is missing
    pub n_latent: Option<usize>,
    /// scVI layer norm has no parameters, so it must be switched on here
    pub use_layer_norm: bool,
    pub log_variational: bool,
}

impl Default for ScviLoadOptions {
    fn default() -> Self {
        Self {
            n_latent: None,
            use_layer_norm: false,
            log_variational: true,
        }
    }
}

pub struct ScviModel {
    pub arch: ScviArchitecture,
    pub encoder: Option<ScviEncoder>,
    pub decoder: ScviDecoder,
    pub device: Device,
}

impl ScviArchitecture {
    /// Recover layer sizes from parameter names and shapes
    ///
    /// * `shapes` - parameter name -> shape
    /// * `options` - what the shapes cannot tell
    pub fn discover(
        shapes: &HashMap<String, Vec<usize>>,
        options: &ScviLoadOptions,
    ) -> anyhow::Result<Self> {
        let scale = shape_2d(shapes, DECODER_SCALE)?;
        let (n_genes, n_hidden) = (scale[0], scale[1]);

        let n_latent = match shapes.get(ENCODER_MEAN) {
            Some(s) if s.len() == 2 => s[0],
            _ => options.n_latent.ok_or_else(|| {
                anyhow::anyhow!("no encoder weights; the latent dimension must be given")
            })?,
        };

        let decoder = discover_fc_layers(shapes, DECODER, n_latent, n_hidden, options)?;

        let encoder = if shapes.contains_key(&fc_weight_key(ENCODER, 0)) {
            let enc_hidden = shape_2d(shapes, &fc_weight_key(ENCODER, 0))?[0];
            Some(discover_fc_layers(shapes, ENCODER, n_genes, enc_hidden, options)?)
        } else {
            None
        };

        Ok(Self {
            n_genes,
            n_latent,
            decoder,
            encoder,
        })
    }
}

impl ScviModel {
    /// Load a model from `model.safetensors` or a PyTorch `model.pt`
    /// (tensors under `model_state_dict`)
    ///
    /// * `weights_file` - path to the weights
    /// * `device` - where the model will run
    /// * `options` - load options
    pub fn load(
        weights_file: &Path,
        device: &Device,
        options: &ScviLoadOptions,
    ) -> anyhow::Result<Self> {
        let tensors = read_state_dict(weights_file)?;
        info!(
            "Read {} tensors from {}",
            tensors.len(),
            weights_file.display()
        );
        Self::from_tensors(tensors, device, options)
    }

    pub fn from_tensors(
        tensors: HashMap<String, Tensor>,
        device: &Device,
        options: &ScviLoadOptions,
    ) -> anyhow::Result<Self> {
        let shapes: HashMap<String, Vec<usize>> = tensors
            .iter()
            .map(|(k, v)| (k.clone(), v.dims().to_vec()))
            .collect();

        let arch = ScviArchitecture::discover(&shapes, options)?;
        info!(
            "scVI: {} genes, {} latent, {} hidden x {} layers, {} covariate columns{}",
            arch.n_genes,
            arch.n_latent,
            arch.decoder.n_hidden,
            arch.decoder.n_layers,
            arch.decoder.n_covariates,
            if arch.encoder.is_some() { "" } else { " (no encoder)" }
        );

        let vs = VarBuilder::from_tensors(tensors, DType::F32, device);

        let decoder = ScviDecoder::new(&arch.decoder, arch.n_genes, vs.pp("decoder"))?;

        let encoder = match &arch.encoder {
            Some(enc) => Some(ScviEncoder::new(
                enc,
                arch.n_latent,
                options.log_variational,
                vs.pp("z_encoder"),
            )?),
            None => None,
        };

        debug_assert_eq!(decoder.dim_latent(), arch.n_latent);

        Ok(Self {
            arch,
            encoder,
            decoder,
            device: device.clone(),
        })
    }
}

/// Read every tensor of a state dict onto the CPU
pub fn read_state_dict(weights_file: &Path) -> anyhow::Result<HashMap<String, Tensor>> {
    if !weights_file.exists() {
        return Err(anyhow::anyhow!(
            "weights file not found: {}",
            weights_file.display()
        ));
    }

    let ext = weights_file.extension().and_then(|x| x.to_str());
    let ret = match ext {
        Some("safetensors") => candle_core::safetensors::load(weights_file, &Device::Cpu)?,
        _ => {
            let pairs = candle_core::pickle::read_all_with_key(weights_file, Some("model_state_dict"))
                .or_else(|_| candle_core::pickle::read_all_with_key(weights_file, None))
                .map_err(|e| {
                    anyhow::anyhow!("failed to read {}: {}", weights_file.display(), e)
                })?;
            pairs.into_iter().collect()
        }
    };

    if ret.is_empty() {
        return Err(anyhow::anyhow!(
            "no tensors in {}",
            weights_file.display()
        ));
    }
    Ok(ret)
}

fn fc_weight_key(prefix: &str, layer: usize) -> String {
    format!("{}.fc_layers.Layer {}.0.weight", prefix, layer)
}

fn shape_2d<'a>(shapes: &'a HashMap<String, Vec<usize>>, key: &str) -> anyhow::Result<&'a [usize]> {
    match shapes.get(key) {
        Some(s) if s.len() == 2 => Ok(s.as_slice()),
        Some(s) => Err(anyhow::anyhow!("{} should be a matrix, but has shape {:?}", key, s)),
        None => Err(anyhow::anyhow!("missing scVI parameter: {}", key)),
    }
}

/// Torch `Linear` weights are (out x in); the first layer's input is
/// `n_in` plus the covariate width
fn discover_fc_layers(
    shapes: &HashMap<String, Vec<usize>>,
    prefix: &str,
    n_in: usize,
    n_hidden: usize,
    options: &ScviLoadOptions,
) -> anyhow::Result<FcLayersConfig> {
    let mut n_layers = 0;
    while shapes.contains_key(&fc_weight_key(prefix, n_layers)) {
        n_layers += 1;
    }
    if n_layers == 0 {
        return Err(anyhow::anyhow!("no hidden layers under {}", prefix));
    }

    let first = shape_2d(shapes, &fc_weight_key(prefix, 0))?;
    if first[0] != n_hidden || first[1] < n_in {
        return Err(anyhow::anyhow!(
            "{}: first layer is {:?}, expected ({}, >= {})",
            prefix,
            first,
            n_hidden,
            n_in
        ));
    }
    let n_covariates = first[1] - n_in;

    let inject_all = if n_layers > 1 {
        let second = shape_2d(shapes, &fc_weight_key(prefix, 1))?;
        n_covariates > 0 && second[1] == n_hidden + n_covariates
    } else {
        false
    };

    let batch_norm = shapes.contains_key(&format!(
        "{}.fc_layers.Layer 0.1.running_mean",
        prefix
    ));

    Ok(FcLayersConfig {
        n_in,
        n_hidden,
        n_layers,
        n_covariates,
        inject_all,
        batch_norm,
        layer_norm: options.use_layer_norm,
    })
}

use crate::common::*;
use crate::model_hub::*;

use candle_util::candle_scvi_model::{read_state_dict, ScviArchitecture, ScviLoadOptions};
use std::collections::HashMap;

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub source: ModelSourceArgs,

    #[arg(
        long,
        default_value_t = false,
        help = "Skip the AnnData shipped with the model"
    )]
    pub weights_only: bool,

    #[arg(
        long,
        help = "Latent dimension, for models saved without an encoder"
    )]
    pub n_latent: Option<usize>,
}

/// Resolve (and download if needed) the model files, then print
/// their paths and the layer sizes found in the weights
pub fn run_fetch(args: &FetchArgs) -> anyhow::Result<()> {
    let artifacts = fetch_model_artifacts(&args.source, !args.weights_only)?;

    println!("weights\t{}", artifacts.weights.display());
    if let Some(adata) = &artifacts.adata {
        println!("adata\t{}", adata.display());
    }

    let shapes: HashMap<String, Vec<usize>> = read_state_dict(&artifacts.weights)?
        .into_iter()
        .map(|(k, v)| (k, v.dims().to_vec()))
        .collect();

    let options = ScviLoadOptions {
        n_latent: args.n_latent,
        ..Default::default()
    };

    match ScviArchitecture::discover(&shapes, &options) {
        Ok(arch) => {
            println!("genes\t{}", arch.n_genes);
            println!("latent\t{}", arch.n_latent);
            println!(
                "decoder\t{} x {} hidden, {} covariate columns{}",
                arch.decoder.n_layers,
                arch.decoder.n_hidden,
                arch.decoder.n_covariates,
                if arch.decoder.inject_all {
                    " (every layer)"
                } else {
                    ""
                }
            );
            match &arch.encoder {
                Some(enc) => println!(
                    "encoder\t{} x {} hidden, {} covariate columns",
                    enc.n_layers, enc.n_hidden, enc.n_covariates
                ),
                None => println!("encoder\tnone"),
            }
        }
        Err(e) => warn!("could not read the architecture: {}", e),
    }

    Ok(())
}

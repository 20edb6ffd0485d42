pub use crate::hvg_error::HvgError;
pub use clap::{Args, Parser, Subcommand, ValueEnum};
pub use log::{info, warn};

pub type Mat = ndarray::Array2<f32>;

pub const DEFAULT_REPO: &str = "vevotx/Tahoe-100M-SCVI-v1";
pub const DEFAULT_REVISION: &str = "main";
pub const DEFAULT_CACHE_DIR: &str = "tahoe_cache";
pub const DEFAULT_GENE_LIST: &str = "all_unique_genes.txt";
pub const DEFAULT_OUTPUT: &str = "scvi_HVGs.txt";

pub const DEFAULT_SAMPLE_SIZE: usize = 10_000;
pub const DEFAULT_LIBRARY_SIZE: f32 = 1e5;
pub const DEFAULT_BATCH_SIZE: usize = 128;
pub const DEFAULT_SEED: u64 = 42;

/// file names inside a scvi-hub repository
pub const WEIGHTS_FILES: [&str; 2] = ["model.safetensors", "model.pt"];
pub const ADATA_FILE: &str = "adata.h5ad";

/// keys scvi-tools writes into a minified AnnData
pub const LATENT_QZM_KEY: &str = "_scvi_latent_qzm";
pub const LATENT_QZV_KEY: &str = "_scvi_latent_qzv";
pub const MINIFY_TYPE_KEY: &str = "_scvi_adata_minify_type";
pub const BATCH_KEY: &str = "_scvi_batch";

/// sample standard deviation, the convention of the tabular library
/// the selection rule comes from
pub const STD_DDOF: f64 = 1.0;

pub mod cell_sampling;
pub mod common;
pub mod covariates;
pub mod denoise;
pub mod gene_list;
pub mod gene_stat;
pub mod hvg_error;
pub mod hvg_output;
pub mod model_hub;
pub mod run_fetch;
pub mod run_hvg;

pub mod candle_aux_layers;
pub mod candle_model_traits;
pub mod candle_scvi_decoder;
pub mod candle_scvi_encoder;
pub mod candle_scvi_model;

pub use candle_core;
pub use candle_nn;

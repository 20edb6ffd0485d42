pub mod anndata; // read-only access to AnnData `.h5ad` files
pub mod misc; // hdf5 string helpers

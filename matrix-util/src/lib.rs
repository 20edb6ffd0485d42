pub mod common_io; // reading and writing text files, gzipped or not
pub mod ndarray_stat; // running statistics over ndarray blocks

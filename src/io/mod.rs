//! File formats: MatrixMarket coordinate I/O, the binary sparse/dense/tensor
//! dumps, and the checkpoint directory layout (spec §6).

pub mod binary;
pub mod checkpoint;
pub mod matrixmarket;

//! Matrix module: dense block kernels, block CSR and scalar CSR storage.

pub mod block;
pub use block::BlockNorm;
pub mod block_csr;
pub use block_csr::BlockCsrMatrix;
pub mod sparse;
pub use sparse::{CsrMatrix, SparseMatrix};

//! extrows: external-row exchange and block CSR kernels for distributed
//! incomplete factorizations.
//!
//! Two independent pieces live here:
//!
//! - [`exchange`]: the boundary-row exchange between neighbouring subdomains
//!   of a parallel ILU setup. A rank receives the upper-triangular parts of the
//!   boundary rows of its lower-ranked neighbours, indexes them by global row,
//!   and ships its own boundary rows to its higher-ranked neighbours. It runs
//!   over any [`parallel::Communicator`]: in-process threads, or MPI with the
//!   `mpi` feature.
//! - [`matrix`]: block compressed sparse row storage with the dense small-block
//!   kernels used by block preconditioners (add, multiply, invert, norms,
//!   transpose, matvec, conversion to and from scalar CSR).

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod exchange;
pub mod matrix;

// Re-exports for convenience
pub use crate::config::{DebugFlags, ExchangeOptions, DEFAULT_TAG_BASE};
pub use crate::context::{IluContext, LocalFactor, SubdomainGraph};
pub use crate::core::{PartialFactor, RowView, SubdomainPartition};
pub use crate::error::XError;
pub use crate::exchange::{ExternalRows, PendingSends, Phase, RowLookup};
pub use crate::matrix::{BlockCsrMatrix, BlockNorm, CsrMatrix, SparseMatrix};
pub use crate::parallel::{CommError, CommTag, Communicator, SerialComm, ThreadComm, Wait};

//! Context module: the partition, factor and setup driver that own the data
//! an [`ExternalRows`](crate::exchange::ExternalRows) exchange borrows.
//!
//! Modules:
//! - [`subdomain`]: `SubdomainGraph`, a contiguous row partition seen from one rank.
//! - [`factor`]: `LocalFactor`, the locally owned factor rows with fill levels.
//! - [`ilu_context`]: `IluContext`, which runs the receive/send sequence of a factorization setup.

pub mod factor;
pub mod ilu_context;
pub mod subdomain;

pub use factor::LocalFactor;
pub use ilu_context::IluContext;
pub use subdomain::SubdomainGraph;

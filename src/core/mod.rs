pub mod traits;
pub use traits::{PartialFactor, RowView, SubdomainPartition};

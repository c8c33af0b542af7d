use thiserror::Error;

use crate::exchange::Phase;
use crate::parallel::CommError;

// Unified error type for extrows

#[derive(Error, Debug)]
pub enum XError {
    #[error("transport failure during {phase} phase: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: CommError,
    },
    #[error("row {0} is not resident in the external row table")]
    RowNotResident(usize),
    #[error("shape error: {0}")]
    Shape(String),
    #[error("singular block encountered")]
    SingularBlock,
    #[error("external rows used before init")]
    Unbound,
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("solver setup failed: {source}")]
    Setup {
        #[source]
        source: Box<XError>,
    },
}

impl XError {
    /// Wrap a failure as a setup-phase failure of the owning factorization.
    pub fn into_setup(self) -> XError {
        match self {
            XError::Setup { .. } => self,
            other => XError::Setup { source: Box::new(other) },
        }
    }

    pub(crate) fn shape(msg: impl Into<String>) -> XError {
        XError::Shape(msg.into())
    }
}

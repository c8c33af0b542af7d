//! Point-to-point communication backends for the row exchange.
//!
//! Every backend posts non-blocking sends and receives and hands back a
//! handle that is later completed with [`Wait::wait`]. Messages are raw
//! byte buffers matched by `(source, destination, tag)`.

use thiserror::Error;

/// Message tag used to keep the phases of an exchange apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag shifted by a fixed phase offset.
    pub const fn offset(self, by: u16) -> Self {
        CommTag(self.0.wrapping_add(by))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("peer {peer} is outside the communicator (size {size})")]
    InvalidPeer { peer: usize, size: usize },
    #[error("could not post message for peer {peer} (tag {tag:?}): {reason}")]
    Post { peer: usize, tag: CommTag, reason: String },
    #[error("wait on peer {peer} (tag {tag:?}) failed: {reason}")]
    Wait { peer: usize, tag: CommTag, reason: String },
}

/// Completion of a posted non-blocking operation.
pub trait Wait {
    type Output;
    /// Block until the operation completes.
    fn wait(self) -> Result<Self::Output, CommError>;
}

pub trait Communicator {
    type SendHandle: Wait<Output = ()>;
    type RecvHandle: Wait<Output = Vec<u8>>;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Post a send of `buf` to `peer`. The buffer is copied before returning.
    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<Self::SendHandle, CommError>;
    /// Post a receive from `peer`; the payload is produced by `wait`.
    fn irecv(&self, peer: usize, tag: CommTag) -> Result<Self::RecvHandle, CommError>;
    fn barrier(&self);
}

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Single-rank communicator. There are no peers, so every peer operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

/// Handle type for [`SerialComm`]; never constructed.
pub struct NoHandle<T>(std::marker::PhantomData<T>);

impl<T> Wait for NoHandle<T> {
    type Output = T;
    fn wait(self) -> Result<T, CommError> {
        Err(CommError::Wait { peer: 0, tag: CommTag::new(0), reason: "serial communicator has no peers".into() })
    }
}

impl Communicator for SerialComm {
    type SendHandle = NoHandle<()>;
    type RecvHandle = NoHandle<Vec<u8>>;

    fn rank(&self) -> usize { 0 }
    fn size(&self) -> usize { 1 }

    fn isend(&self, peer: usize, _tag: CommTag, _buf: &[u8]) -> Result<Self::SendHandle, CommError> {
        Err(CommError::InvalidPeer { peer, size: 1 })
    }

    fn irecv(&self, peer: usize, _tag: CommTag) -> Result<Self::RecvHandle, CommError> {
        Err(CommError::InvalidPeer { peer, size: 1 })
    }

    fn barrier(&self) {}
}

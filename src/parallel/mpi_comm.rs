//! MPI-based point-to-point backend.
//!
//! This module provides an implementation of the `Communicator` trait on top of
//! the `mpi` crate. Sends are posted with `MPI_Isend` on a heap copy of the
//! payload that is released once the request completes. Receives are matched
//! when waited on (matched probe followed by a matched receive), which keeps
//! the receive side free of pre-sized buffers: the exchange only learns
//! payload sizes from earlier phases anyway.
//!
//! Only available when the `mpi` feature is enabled.
//!
//! # Example
//! ```no_run
//! #[cfg(feature = "mpi")]
//! {
//!     use extrows::parallel::{Communicator, MpiComm};
//!     let comm = MpiComm::new().expect("MPI already initialized");
//!     println!("Rank: {} / {}", comm.rank(), comm.size());
//!     comm.barrier();
//! }
//! ```

use mpi::environment::Universe;
use mpi::request::StaticScope;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::{CommError, CommTag, Communicator, Wait};

/// MPI communicator wrapper for distributed parallelism.
///
/// Holds the universe (finalized on drop), the world communicator, the rank of
/// the current process and the number of processes.
pub struct MpiComm {
    _universe: Universe,
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    /// The rank (ID) of this process within the communicator.
    pub rank: usize,
    /// The total number of processes in the communicator.
    pub size: usize,
}

impl MpiComm {
    /// Initializes MPI. Returns `None` if MPI was already initialized.
    pub fn new() -> Option<Self> {
        let universe = mpi::initialize()?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Some(MpiComm { _universe: universe, world, rank, size })
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.size {
            return Err(CommError::InvalidPeer { peer, size: self.size });
        }
        Ok(())
    }
}

/// Largest tag every MPI implementation accepts (`MPI_TAG_UB >= 32767`).
const MPI_TAG_MAX: u16 = 32767;

fn mpi_tag(peer: usize, tag: CommTag) -> Result<i32, CommError> {
    if tag.as_u16() > MPI_TAG_MAX {
        return Err(CommError::Post {
            peer,
            tag,
            reason: format!("tag exceeds the portable MPI bound {MPI_TAG_MAX}"),
        });
    }
    Ok(i32::from(tag.as_u16()))
}

/// Outstanding `MPI_Isend`; completing it frees the payload copy.
///
/// A handle dropped without `wait` still completes its request, so an
/// abandoned send never frees a buffer MPI is reading from.
pub struct MpiSend {
    complete: Option<Box<dyn FnOnce()>>,
}

impl MpiSend {
    fn finish(&mut self) {
        if let Some(complete) = self.complete.take() {
            complete();
        }
    }
}

impl Wait for MpiSend {
    type Output = ();
    fn wait(mut self) -> Result<(), CommError> {
        self.finish();
        Ok(())
    }
}

impl Drop for MpiSend {
    fn drop(&mut self) {
        self.finish();
    }
}

pub struct MpiRecv {
    peer: usize,
    tag: CommTag,
}

impl Wait for MpiRecv {
    type Output = Vec<u8>;
    fn wait(self) -> Result<Vec<u8>, CommError> {
        let world = SimpleCommunicator::world();
        let (msg, _status) = world
            .process_at_rank(self.peer as i32)
            .matched_probe_with_tag(i32::from(self.tag.as_u16()));
        let (data, _status) = msg.matched_receive_vec::<u8>();
        Ok(data)
    }
}

impl Communicator for MpiComm {
    type SendHandle = MpiSend;
    type RecvHandle = MpiRecv;

    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.size }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<MpiSend, CommError> {
        self.check_peer(peer)?;
        let mpi_tag = mpi_tag(peer, tag)?;
        let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
        // SAFETY: `raw` stays allocated until the request below has completed.
        let payload: &'static [u8] = unsafe { &*raw };
        let request = self
            .world
            .process_at_rank(peer as i32)
            .immediate_send_with_tag(StaticScope, payload, mpi_tag);
        Ok(MpiSend {
            complete: Some(Box::new(move || {
                request.wait();
                // SAFETY: the send has completed, nothing references the buffer.
                unsafe { drop(Box::from_raw(raw)) };
            })),
        })
    }

    fn irecv(&self, peer: usize, tag: CommTag) -> Result<MpiRecv, CommError> {
        self.check_peer(peer)?;
        mpi_tag(peer, tag)?;
        Ok(MpiRecv { peer, tag })
    }

    /// Synchronizes all processes at a barrier.
    fn barrier(&self) {
        self.world.barrier();
    }
}

//! Setup context of a distributed incomplete factorization on one rank.
//!
//! `IluContext` owns the partition view and the local factor rows and lends
//! them to an [`ExternalRows`] exchange. The factorization order is
//!
//! 1. receive the boundary rows of lower neighbours ([`receive`](IluContext::receive)),
//! 2. eliminate the local rows against them,
//! 3. ship the local boundary rows upward ([`send`](IluContext::send)).
//!
//! Any exchange failure surfaces as [`XError::Setup`].

use log::debug;

use crate::config::ExchangeOptions;
use crate::context::factor::LocalFactor;
use crate::context::subdomain::SubdomainGraph;
use crate::core::traits::SubdomainPartition;
use crate::error::XError;
use crate::exchange::{ExternalRows, PendingSends};
use crate::parallel::Communicator;

pub struct IluContext<'c, C: Communicator> {
    comm: &'c C,
    graph: SubdomainGraph,
    factor: LocalFactor,
    options: ExchangeOptions,
}

impl<'c, C: Communicator> IluContext<'c, C> {
    pub fn new(comm: &'c C, graph: SubdomainGraph, factor: LocalFactor, options: ExchangeOptions) -> Result<Self, XError> {
        if graph.rank() != comm.rank() {
            return Err(XError::Shape(format!(
                "partition is for rank {} but the communicator is rank {}",
                graph.rank(),
                comm.rank()
            )));
        }
        if graph.nranks() != comm.size() {
            return Err(XError::Shape(format!(
                "partition has {} ranks but the communicator has {}",
                graph.nranks(),
                comm.size()
            )));
        }
        let owned = graph.owned_rows();
        if factor.first_row() != owned.start || factor.nrows() != owned.len() {
            return Err(XError::Shape(format!(
                "factor holds rows {}..{} but rank {} owns {owned:?}",
                factor.first_row(),
                factor.first_row() + factor.nrows(),
                graph.rank()
            )));
        }
        Ok(IluContext { comm, graph, factor, options })
    }

    pub fn graph(&self) -> &SubdomainGraph {
        &self.graph
    }

    pub fn factor(&self) -> &LocalFactor {
        &self.factor
    }

    /// Replace the local factor rows, e.g. after eliminating them.
    pub fn set_factor(&mut self, factor: LocalFactor) {
        self.factor = factor;
    }

    /// Receive external rows from all lower neighbours.
    pub fn receive(&self) -> Result<ExternalRows<'_>, XError> {
        let mut ext = ExternalRows::new();
        ext.init(&self.graph, &self.factor, self.options.clone());
        ext.recv_rows(self.comm).map_err(XError::into_setup)?;
        debug!("rank {}: {} external rows received", self.comm.rank(), ext.row_count());
        Ok(ext)
    }

    /// Send local boundary rows to all upper neighbours.
    pub fn send(&self, ext: &mut ExternalRows<'_>) -> Result<PendingSends<C::SendHandle>, XError> {
        ext.send_rows(self.comm).map_err(XError::into_setup)
    }

    /// Receive, then send, completing every request before returning.
    pub fn exchange_boundary_rows(&self) -> Result<ExternalRows<'_>, XError> {
        let mut ext = self.receive()?;
        let pending = self.send(&mut ext)?;
        pending.wait_all().map_err(XError::into_setup)?;
        Ok(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    #[test]
    fn single_rank_exchange_is_empty() {
        let graph = SubdomainGraph::new(vec![0, 2], 0, vec![], vec![], vec![]).unwrap();
        let mut factor = LocalFactor::new(0);
        factor.push_row(&[0, 1], &[0, 0], &[4.0, -1.0]).unwrap();
        factor.push_row(&[0, 1], &[0, 0], &[-1.0, 4.0]).unwrap();
        let comm = SerialComm;
        let ctx = IluContext::new(&comm, graph, factor, ExchangeOptions::default()).unwrap();
        let ext = ctx.exchange_boundary_rows().unwrap();
        assert_eq!(ext.row_count(), 0);
    }

    #[test]
    fn mismatched_factor_rows_rejected() {
        let graph = SubdomainGraph::new(vec![0, 2], 0, vec![], vec![], vec![]).unwrap();
        let comm = SerialComm;
        let err = IluContext::new(&comm, graph, LocalFactor::new(0), ExchangeOptions::default());
        assert!(matches!(err, Err(XError::Shape(_))));
    }
}

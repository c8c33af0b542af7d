//! Exchange of external (boundary) rows between neighbouring subdomains.
//!
//! In a distributed incomplete factorization each rank factors its rows in
//! subdomain order. Before it can eliminate its own boundary rows it needs
//! the upper-triangular parts of the boundary rows of its lower-ranked
//! neighbours; once done, it ships its own boundary rows to its higher-ranked
//! neighbours. [`ExternalRows`] implements both directions:
//!
//! 1. row counts and nonzero counts,
//! 2. row lengths and global row numbers,
//! 3. column indices, fill levels and values as flat arrays,
//! 4. (receive side) indexing of every received row by global row number.
//!
//! Every phase posts one non-blocking operation per peer and completes them
//! all before the next phase is posted, because the sizes of phase N+1 come
//! out of phase N. Any failure aborts the whole exchange; there is no usable
//! partial state.

pub mod lookup;
pub mod wire;

pub use lookup::{RowLookup, RowSlot};
pub use wire::Phase;

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::config::{DebugFlags, ExchangeOptions};
use crate::core::traits::{PartialFactor, RowView, SubdomainPartition};
use crate::error::XError;
use crate::parallel::{CommTag, Communicator, Wait};

/// What one lower neighbour sent us.
#[derive(Debug, Clone, Default, PartialEq)]
struct PeerRows {
    row_count: usize,
    nz_count: usize,
    row_lengths: Vec<usize>,
    row_numbers: Vec<usize>,
    /// Start of this peer's rows in the flat buffers.
    offset: usize,
}

/// Per-peer receive counts, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer: usize,
    pub row_count: usize,
    pub nz_count: usize,
}

fn post_recvs<C: Communicator>(
    comm: &C,
    peers: &[usize],
    phase: Phase,
    base: CommTag,
) -> Result<Vec<(usize, C::RecvHandle)>, XError> {
    peers
        .iter()
        .map(|&peer| {
            comm.irecv(peer, phase.tag(base))
                .map(|h| (peer, h))
                .map_err(|source| XError::Transport { phase, source })
        })
        .collect()
}

/// Wait on every handle of one phase. All handles are completed even when
/// one fails; the first failure is reported.
fn wait_all<H: Wait>(phase: Phase, pending: Vec<(usize, H)>) -> Result<Vec<(usize, H::Output)>, XError> {
    let mut done = Vec::with_capacity(pending.len());
    let mut first_err = None;
    for (peer, handle) in pending {
        match handle.wait() {
            Ok(out) => done.push((peer, out)),
            Err(source) => {
                first_err.get_or_insert(source);
            }
        }
    }
    match first_err {
        Some(source) => Err(XError::Transport { phase, source }),
        None => {
            trace!("{phase} phase complete for {} peers", done.len());
            Ok(done)
        }
    }
}

/// Send requests still in flight after [`ExternalRows::send_rows`].
///
/// Empty unless sends were deferred with
/// [`ExchangeOptions::wait_for_sends`] set to `false`. The send buffers are
/// copies, so the exchange itself may be reused before this completes.
#[must_use = "deferred sends must be completed with wait_all"]
pub struct PendingSends<H> {
    handles: Vec<(Phase, usize, H)>,
}

impl<H: Wait<Output = ()>> PendingSends<H> {
    fn empty() -> Self {
        PendingSends { handles: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Complete every outstanding send.
    pub fn wait_all(self) -> Result<(), XError> {
        let mut first_err = None;
        for (phase, _peer, handle) in self.handles {
            if let Err(source) = handle.wait() {
                first_err.get_or_insert(XError::Transport { phase, source });
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// External rows received from lower neighbours, and the boundary rows this
/// rank ships to its upper neighbours.
///
/// The partition and factor are borrowed, never owned; the exchange cannot
/// outlive them.
pub struct ExternalRows<'a> {
    sg: Option<&'a dyn SubdomainPartition>,
    factor: Option<&'a dyn PartialFactor>,
    options: ExchangeOptions,

    // receiving from lower-ordered neighbours
    rcv: BTreeMap<usize, PeerRows>,
    cval_ext: Vec<usize>,
    fill_ext: Vec<u32>,
    aval_ext: Vec<f64>,
    row_lookup: RowLookup,

    // sending to higher-ordered neighbours
    my_row_counts: Vec<usize>,
    my_row_numbers: Vec<usize>,
    nz_send: usize,
    cval_send: Vec<usize>,
    fill_send: Vec<u32>,
    aval_send: Vec<f64>,
}

impl<'a> Default for ExternalRows<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ExternalRows<'a> {
    /// Empty, unbound exchange. No communication happens here.
    pub fn new() -> Self {
        ExternalRows {
            sg: None,
            factor: None,
            options: ExchangeOptions::default(),
            rcv: BTreeMap::new(),
            cval_ext: Vec::new(),
            fill_ext: Vec::new(),
            aval_ext: Vec::new(),
            row_lookup: RowLookup::default(),
            my_row_counts: Vec::new(),
            my_row_numbers: Vec::new(),
            nz_send: 0,
            cval_send: Vec::new(),
            fill_send: Vec::new(),
            aval_send: Vec::new(),
        }
    }

    /// Bind to a partition and a factor and reset all per-peer state.
    pub fn init(
        &mut self,
        sg: &'a dyn SubdomainPartition,
        factor: &'a dyn PartialFactor,
        options: ExchangeOptions,
    ) {
        self.sg = Some(sg);
        self.factor = Some(factor);
        self.options = options;
        self.reset_receive();
        self.reset_send();
    }

    pub fn options(&self) -> &ExchangeOptions {
        &self.options
    }

    fn reset_receive(&mut self) {
        self.rcv.clear();
        self.cval_ext.clear();
        self.fill_ext.clear();
        self.aval_ext.clear();
        self.row_lookup.clear();
    }

    fn reset_send(&mut self) {
        self.my_row_counts.clear();
        self.my_row_numbers.clear();
        self.nz_send = 0;
        self.cval_send.clear();
        self.fill_send.clear();
        self.aval_send.clear();
    }

    /// Receive the boundary rows of every lower neighbour.
    ///
    /// On success every advertised row is queryable through
    /// [`get_row`](Self::get_row). On failure the receive state is cleared.
    pub fn recv_rows<C: Communicator>(&mut self, comm: &C) -> Result<(), XError> {
        let sg = self.sg.ok_or(XError::Unbound)?;
        self.reset_receive();
        let result = self.recv_rows_private(comm, sg);
        if result.is_err() {
            self.reset_receive();
        }
        result
    }

    fn recv_rows_private<C: Communicator>(&mut self, comm: &C, sg: &dyn SubdomainPartition) -> Result<(), XError> {
        let lo = sg.lower_neighbors();
        if lo.is_empty() {
            return Ok(());
        }
        let base = self.options.tag_base;
        let debug = self.options.debug;
        trace!("rank {}: receiving external rows from {:?}", comm.rank(), lo);

        // phase 1: row and nonzero counts
        let row_req = post_recvs(comm, lo, Phase::RowCount, base)?;
        let nz_req = post_recvs(comm, lo, Phase::NzCount, base)?;
        for (peer, bytes) in wait_all(Phase::RowCount, row_req)? {
            self.rcv.entry(peer).or_default().row_count = wire::decode_count(&bytes, Phase::RowCount)?;
        }
        for (peer, bytes) in wait_all(Phase::NzCount, nz_req)? {
            self.rcv.entry(peer).or_default().nz_count = wire::decode_count(&bytes, Phase::NzCount)?;
        }
        if debug.contains(DebugFlags::COUNTS) {
            for (peer, p) in &self.rcv {
                debug!("rank {}: P_{peer} sends {} rows, {} nonzeros", comm.rank(), p.row_count, p.nz_count);
            }
        }

        // phase 2: row lengths and row numbers
        let len_req = post_recvs(comm, lo, Phase::RowLengths, base)?;
        let num_req = post_recvs(comm, lo, Phase::RowNumbers, base)?;
        for (peer, bytes) in wait_all(Phase::RowLengths, len_req)? {
            let p = self.rcv.entry(peer).or_default();
            p.row_lengths = wire::decode_indices(&bytes, Phase::RowLengths, Some(p.row_count))?;
        }
        for (peer, bytes) in wait_all(Phase::RowNumbers, num_req)? {
            let p = self.rcv.entry(peer).or_default();
            p.row_numbers = wire::decode_indices(&bytes, Phase::RowNumbers, Some(p.row_count))?;
        }
        for (&peer, p) in &self.rcv {
            let total: usize = p.row_lengths.iter().sum();
            if total != p.nz_count {
                return Err(XError::Shape(format!(
                    "P_{peer} advertised {} nonzeros but its row lengths sum to {total}",
                    p.nz_count
                )));
            }
            if let Some(&row) = p.row_numbers.iter().find(|&&r| sg.owner_of(r) != Some(peer)) {
                return Err(XError::Shape(format!("row {row} sent by P_{peer}, which does not own it")));
            }
            if debug.contains(DebugFlags::LISTS) {
                debug!("rank {}: P_{peer} rows {:?} lengths {:?}", comm.rank(), p.row_numbers, p.row_lengths);
            }
        }

        // phase 3: flat payload, peers laid out in ascending rank order
        let mut nz_total = 0;
        for p in self.rcv.values_mut() {
            p.offset = nz_total;
            nz_total += p.nz_count;
        }
        if debug.contains(DebugFlags::PAYLOAD) {
            let offsets: Vec<_> = self.rcv.iter().map(|(&peer, p)| (peer, p.offset)).collect();
            debug!("rank {}: {nz_total} external nonzeros, offsets {:?}", comm.rank(), offsets);
        }
        self.cval_ext = vec![0; nz_total];
        self.fill_ext = vec![0; nz_total];
        self.aval_ext = vec![0.0; nz_total];

        let cval_req = post_recvs(comm, lo, Phase::ColumnIndices, base)?;
        let fill_req = post_recvs(comm, lo, Phase::FillLevels, base)?;
        let aval_req = post_recvs(comm, lo, Phase::Values, base)?;
        let cval_in = wait_all(Phase::ColumnIndices, cval_req)?;
        let fill_in = wait_all(Phase::FillLevels, fill_req)?;
        let aval_in = wait_all(Phase::Values, aval_req)?;
        for (peer, bytes) in cval_in {
            let p = &self.rcv[&peer];
            let cols = wire::decode_indices(&bytes, Phase::ColumnIndices, Some(p.nz_count))?;
            self.cval_ext[p.offset..p.offset + p.nz_count].copy_from_slice(&cols);
        }
        for (peer, bytes) in fill_in {
            let p = &self.rcv[&peer];
            let fill = wire::decode_fill(&bytes, p.nz_count)?;
            self.fill_ext[p.offset..p.offset + p.nz_count].copy_from_slice(&fill);
        }
        for (peer, bytes) in aval_in {
            let p = &self.rcv[&peer];
            let vals = wire::decode_values(&bytes, p.nz_count)?;
            self.aval_ext[p.offset..p.offset + p.nz_count].copy_from_slice(&vals);
        }

        // phase 4: index the rows
        let row_total: usize = self.rcv.values().map(|p| p.row_count).sum();
        self.row_lookup = RowLookup::with_capacity(row_total);
        for p in self.rcv.values() {
            let mut offset = p.offset;
            for (&row, &len) in p.row_numbers.iter().zip(&p.row_lengths) {
                self.row_lookup.insert(row, RowSlot { offset, len })?;
                offset += len;
            }
        }
        if debug.contains(DebugFlags::ROWS) {
            for row in self.row_lookup.rows() {
                let r = self.get_row(row)?;
                debug!("rank {}: external row {row}: {:?}", comm.rank(), r.iter().collect::<Vec<_>>());
            }
        }
        trace!("rank {}: {} external rows resident", comm.rank(), self.row_lookup.len());
        Ok(())
    }

    /// Gather the upper-triangular parts of this rank's boundary rows.
    fn pack_boundary_rows(&mut self, sg: &dyn SubdomainPartition, factor: &dyn PartialFactor) -> Result<(), XError> {
        self.reset_send();
        for &row in sg.boundary_rows() {
            let r = factor
                .upper_row(row)
                .ok_or_else(|| XError::Shape(format!("boundary row {row} is not held by the local factor")))?;
            if r.fill.len() != r.len() || r.vals.len() != r.len() {
                return Err(XError::Shape(format!("factor row {row} has mismatched column/fill/value lengths")));
            }
            self.my_row_counts.push(r.len());
            self.my_row_numbers.push(row);
            self.cval_send.extend_from_slice(r.cols);
            self.fill_send.extend_from_slice(r.fill);
            self.aval_send.extend_from_slice(r.vals);
        }
        self.nz_send = self.cval_send.len();
        Ok(())
    }

    /// Ship this rank's boundary rows to every upper neighbour.
    ///
    /// All neighbours receive the same rows. By default the call waits for
    /// every send request before returning and the returned set is empty;
    /// with deferred waiting the caller completes it.
    pub fn send_rows<C: Communicator>(&mut self, comm: &C) -> Result<PendingSends<C::SendHandle>, XError> {
        let sg = self.sg.ok_or(XError::Unbound)?;
        let factor = self.factor.ok_or(XError::Unbound)?;
        let hi = sg.upper_neighbors();
        if hi.is_empty() {
            return Ok(PendingSends::empty());
        }
        self.pack_boundary_rows(sg, factor)?;
        if self.options.debug.contains(DebugFlags::COUNTS) {
            debug!(
                "rank {}: sending {} rows, {} nonzeros to {:?}",
                comm.rank(),
                self.my_row_numbers.len(),
                self.nz_send,
                hi
            );
        }
        if self.options.debug.contains(DebugFlags::ROWS) {
            let mut offset = 0;
            for (&row, &len) in self.my_row_numbers.iter().zip(&self.my_row_counts) {
                debug!("rank {}: boundary row {row}: cols {:?}", comm.rank(), &self.cval_send[offset..offset + len]);
                offset += len;
            }
        }

        let messages = [
            (Phase::RowCount, wire::encode_count(self.my_row_numbers.len())),
            (Phase::NzCount, wire::encode_count(self.nz_send)),
            (Phase::RowLengths, wire::encode_indices(&self.my_row_counts)),
            (Phase::RowNumbers, wire::encode_indices(&self.my_row_numbers)),
            (Phase::ColumnIndices, wire::encode_indices(&self.cval_send)),
            (Phase::FillLevels, wire::encode_fill(&self.fill_send)),
            (Phase::Values, wire::encode_values(&self.aval_send)),
        ];
        let base = self.options.tag_base;
        let mut pending = PendingSends { handles: Vec::with_capacity(messages.len() * hi.len()) };
        for (phase, bytes) in &messages {
            for &peer in hi {
                match comm.isend(peer, phase.tag(base), bytes) {
                    Ok(handle) => pending.handles.push((*phase, peer, handle)),
                    Err(source) => {
                        // sends already in flight must complete before their buffers go
                        if let Err(e) = pending.wait_all() {
                            debug!("rank {}: completing posted sends after failure: {e}", comm.rank());
                        }
                        return Err(XError::Transport { phase: *phase, source });
                    }
                }
            }
        }
        trace!("rank {}: posted {} sends", comm.rank(), pending.len());

        if self.options.wait_for_sends {
            pending.wait_all()?;
            Ok(PendingSends::empty())
        } else {
            Ok(pending)
        }
    }

    /// Column indices, fill levels and values of a received row.
    pub fn get_row(&self, global_row: usize) -> Result<RowView<'_>, XError> {
        let slot = self
            .row_lookup
            .lookup(global_row)
            .ok_or(XError::RowNotResident(global_row))?;
        let range = slot.range();
        Ok(RowView {
            cols: &self.cval_ext[range.clone()],
            fill: &self.fill_ext[range.clone()],
            vals: &self.aval_ext[range],
        })
    }

    pub fn contains_row(&self, global_row: usize) -> bool {
        self.row_lookup.contains(global_row)
    }

    /// Number of resident external rows.
    pub fn row_count(&self) -> usize {
        self.row_lookup.len()
    }

    /// Resident external rows, ascending.
    pub fn resident_rows(&self) -> Vec<usize> {
        self.row_lookup.rows()
    }

    pub fn lookup(&self) -> &RowLookup {
        &self.row_lookup
    }

    /// Row and nonzero counts received from each lower neighbour.
    pub fn recv_peer_summary(&self) -> Vec<PeerSummary> {
        self.rcv
            .iter()
            .map(|(&peer, p)| PeerSummary { peer, row_count: p.row_count, nz_count: p.nz_count })
            .collect()
    }

    /// Global numbers of the rows packed by the last `send_rows`.
    pub fn sent_rows(&self) -> &[usize] {
        &self.my_row_numbers
    }

    /// Total nonzeros packed by the last `send_rows`.
    pub fn sent_nonzeros(&self) -> usize {
        self.nz_send
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::parallel::{CommError, SerialComm};

    struct Fixed {
        rank: usize,
        lo: Vec<usize>,
        hi: Vec<usize>,
        bdry: Vec<usize>,
    }

    impl SubdomainPartition for Fixed {
        fn rank(&self) -> usize { self.rank }
        fn owner_of(&self, row: usize) -> Option<usize> { Some(row / 10) }
        fn lower_neighbors(&self) -> &[usize] { &self.lo }
        fn upper_neighbors(&self) -> &[usize] { &self.hi }
        fn boundary_rows(&self) -> &[usize] { &self.bdry }
    }

    struct Empty;
    impl PartialFactor for Empty {
        fn upper_row(&self, _row: usize) -> Option<RowView<'_>> { None }
    }

    #[test]
    fn unbound_exchange_fails() {
        let mut er = ExternalRows::new();
        assert!(matches!(er.recv_rows(&SerialComm), Err(XError::Unbound)));
        assert!(matches!(er.send_rows(&SerialComm), Err(XError::Unbound)));
        assert!(matches!(er.get_row(3), Err(XError::RowNotResident(3))));
    }

    #[test]
    fn no_neighbours_no_traffic() {
        let sg = Fixed { rank: 0, lo: vec![], hi: vec![], bdry: vec![] };
        let mut er = ExternalRows::new();
        er.init(&sg, &Empty, ExchangeOptions::default());
        er.recv_rows(&SerialComm).unwrap();
        assert!(er.send_rows(&SerialComm).unwrap().is_empty());
        assert_eq!(er.row_count(), 0);
    }

    #[test]
    fn post_failure_is_transport_error() {
        let sg = Fixed { rank: 0, lo: vec![1], hi: vec![], bdry: vec![] };
        let mut er = ExternalRows::new();
        er.init(&sg, &Empty, ExchangeOptions::default());
        match er.recv_rows(&SerialComm) {
            Err(XError::Transport { phase: Phase::RowCount, source: CommError::InvalidPeer { peer: 1, .. } }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }

    /// One stored row per requested global row.
    struct Diagonal;
    impl PartialFactor for Diagonal {
        fn upper_row(&self, _row: usize) -> Option<RowView<'_>> {
            Some(RowView { cols: &[4], fill: &[0], vals: &[1.0] })
        }
    }

    /// Two ranks; sends to rank 1 succeed and count their completions.
    struct CountingComm {
        completed: Rc<Cell<usize>>,
    }

    struct CountingSend(Rc<Cell<usize>>);

    impl Wait for CountingSend {
        type Output = ();
        fn wait(self) -> Result<(), CommError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    impl Communicator for CountingComm {
        type SendHandle = CountingSend;
        type RecvHandle = <SerialComm as Communicator>::RecvHandle;

        fn rank(&self) -> usize { 0 }
        fn size(&self) -> usize { 2 }
        fn isend(&self, peer: usize, _tag: CommTag, _buf: &[u8]) -> Result<CountingSend, CommError> {
            if peer >= 2 {
                return Err(CommError::InvalidPeer { peer, size: 2 });
            }
            Ok(CountingSend(Rc::clone(&self.completed)))
        }
        fn irecv(&self, peer: usize, tag: CommTag) -> Result<Self::RecvHandle, CommError> {
            SerialComm.irecv(peer, tag)
        }
        fn barrier(&self) {}
    }

    #[test]
    fn failed_post_completes_earlier_sends() {
        let sg = Fixed { rank: 0, lo: vec![], hi: vec![1, 7], bdry: vec![4] };
        let comm = CountingComm { completed: Rc::new(Cell::new(0)) };
        let mut er = ExternalRows::new();
        er.init(&sg, &Diagonal, ExchangeOptions::default().with_wait_for_sends(false));
        match er.send_rows(&comm) {
            Err(XError::Transport { phase: Phase::RowCount, source: CommError::InvalidPeer { peer: 7, .. } }) => {}
            other => panic!("unexpected result {:?}", other.map(|p| p.len())),
        }
        // the row count to rank 1 was posted before rank 7 failed
        assert_eq!(comm.completed.get(), 1);
    }

    #[test]
    fn missing_factor_row_is_shape_error() {
        let sg = Fixed { rank: 0, lo: vec![], hi: vec![1], bdry: vec![4] };
        let mut er = ExternalRows::new();
        er.init(&sg, &Empty, ExchangeOptions::default());
        assert!(matches!(er.send_rows(&SerialComm), Err(XError::Shape(_))));
    }
}

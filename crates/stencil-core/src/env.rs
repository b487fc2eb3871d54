// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Kernel Environment
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Process-group abstraction for one rank.
//!
//! The engine only needs rank/size queries, tagged point-to-point
//! send/recv with deferred completion, and a barrier. `ChannelComm`
//! provides a deterministic in-process group so the exchange protocol
//! runs unmodified on threads; an MPI transport can be wired in behind
//! the same trait in a later phase.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use stencil_types::{StencilError, StencilResult};

/// Reduction operators for cross-rank collectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

/// Handle for a posted non-blocking send.
#[derive(Debug)]
pub struct SendReq {
    pub peer: usize,
    pub tag: u64,
}

/// Handle for a posted non-blocking receive.
#[derive(Debug)]
pub struct RecvReq {
    pub peer: usize,
    pub tag: u64,
}

/// Tagged point-to-point transport between ranks.
pub trait Comm: Send + Sync {
    fn rank(&self) -> usize;
    fn num_ranks(&self) -> usize;

    /// Post a non-blocking send of `data` to `peer`.
    fn isend(&self, peer: usize, tag: u64, data: Vec<u8>) -> StencilResult<SendReq>;

    /// Post a non-blocking receive from `peer`.
    fn post_recv(&self, peer: usize, tag: u64) -> StencilResult<RecvReq>;

    /// Block until the posted receive completes; returns the payload.
    fn wait_recv(&self, req: RecvReq) -> StencilResult<Vec<u8>>;

    /// Block until the posted send completes.
    fn wait_send(&self, req: SendReq) -> StencilResult<()>;

    fn barrier(&self) -> StencilResult<()>;
}

/// Single-rank group: no peers, every collective is the identity.
#[derive(Debug, Default)]
pub struct NullComm;

impl Comm for NullComm {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn isend(&self, peer: usize, _tag: u64, _data: Vec<u8>) -> StencilResult<SendReq> {
        Err(StencilError::CommFailure(format!(
            "send to peer {peer} in a single-rank group"
        )))
    }

    fn post_recv(&self, peer: usize, _tag: u64) -> StencilResult<RecvReq> {
        Err(StencilError::CommFailure(format!(
            "receive from peer {peer} in a single-rank group"
        )))
    }

    fn wait_recv(&self, req: RecvReq) -> StencilResult<Vec<u8>> {
        Err(StencilError::CommFailure(format!(
            "wait on receive from peer {} in a single-rank group",
            req.peer
        )))
    }

    fn wait_send(&self, _req: SendReq) -> StencilResult<()> {
        Ok(())
    }

    fn barrier(&self) -> StencilResult<()> {
        Ok(())
    }
}

type MailKey = (usize, usize, u64); // (src, dst, tag)
type MailCell = Arc<(Mutex<VecDeque<Vec<u8>>>, Condvar)>;

/// State shared by every member of one in-process group.
struct GroupState {
    size: usize,
    mailboxes: Mutex<HashMap<MailKey, MailCell>>,
    barrier: Mutex<BarrierState>,
    barrier_cv: Condvar,
}

struct BarrierState {
    arrived: usize,
    epoch: u64,
}

impl GroupState {
    fn cell(&self, key: MailKey) -> MailCell {
        let mut map = self.mailboxes.lock().expect("mailbox map poisoned");
        map.entry(key)
            .or_insert_with(|| Arc::new((Mutex::new(VecDeque::new()), Condvar::new())))
            .clone()
    }
}

/// One member of an in-process rank group backed by shared mailboxes.
///
/// Sends are buffered, so `isend` completes immediately; receives block
/// in `wait_recv` on the matching (src, dst, tag) queue.
pub struct ChannelComm {
    rank: usize,
    group: Arc<GroupState>,
}

impl ChannelComm {
    /// Create a fully connected group of `size` members.
    pub fn group(size: usize) -> Vec<ChannelComm> {
        assert!(size > 0, "group size must be positive");
        let state = Arc::new(GroupState {
            size,
            mailboxes: Mutex::new(HashMap::new()),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                epoch: 0,
            }),
            barrier_cv: Condvar::new(),
        });
        (0..size)
            .map(|rank| ChannelComm {
                rank,
                group: state.clone(),
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> StencilResult<()> {
        if peer >= self.group.size || peer == self.rank {
            return Err(StencilError::CommFailure(format!(
                "invalid peer {peer} for rank {} of {}",
                self.rank, self.group.size
            )));
        }
        Ok(())
    }
}

impl Comm for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.group.size
    }

    fn isend(&self, peer: usize, tag: u64, data: Vec<u8>) -> StencilResult<SendReq> {
        self.check_peer(peer)?;
        let cell = self.group.cell((self.rank, peer, tag));
        {
            let mut q = cell.0.lock().expect("mailbox poisoned");
            q.push_back(data);
        }
        cell.1.notify_all();
        Ok(SendReq { peer, tag })
    }

    fn post_recv(&self, peer: usize, tag: u64) -> StencilResult<RecvReq> {
        self.check_peer(peer)?;
        Ok(RecvReq { peer, tag })
    }

    fn wait_recv(&self, req: RecvReq) -> StencilResult<Vec<u8>> {
        let cell = self.group.cell((req.peer, self.rank, req.tag));
        let mut q = cell.0.lock().expect("mailbox poisoned");
        while q.is_empty() {
            q = cell.1.wait(q).expect("mailbox poisoned");
        }
        Ok(q.pop_front().expect("queue non-empty"))
    }

    fn wait_send(&self, _req: SendReq) -> StencilResult<()> {
        // Buffered transport: the send completed at isend time.
        Ok(())
    }

    fn barrier(&self) -> StencilResult<()> {
        let mut b = self.group.barrier.lock().expect("barrier poisoned");
        let epoch = b.epoch;
        b.arrived += 1;
        if b.arrived == self.group.size {
            b.arrived = 0;
            b.epoch += 1;
            self.group.barrier_cv.notify_all();
        } else {
            while b.epoch == epoch {
                b = self.group.barrier_cv.wait(b).expect("barrier poisoned");
            }
        }
        Ok(())
    }
}

/// Tag namespace reserved for collectives, above all halo-exchange tags.
const COLLECTIVE_TAG_BASE: u64 = u64::MAX - 16;

/// Environment of one rank: the transport plus group-wide helpers.
pub struct KernelEnv {
    comm: Box<dyn Comm>,
}

impl KernelEnv {
    pub fn new(comm: Box<dyn Comm>) -> Arc<Self> {
        Arc::new(KernelEnv { comm })
    }

    /// Single-rank environment.
    pub fn single() -> Arc<Self> {
        Self::new(Box::new(NullComm))
    }

    /// An in-process group of `size` environments for thread-per-rank
    /// runs; member `i` behaves as rank `i`.
    pub fn split_local(size: usize) -> Vec<Arc<Self>> {
        ChannelComm::group(size)
            .into_iter()
            .map(|c| Self::new(Box::new(c)))
            .collect()
    }

    pub fn num_ranks(&self) -> usize {
        self.comm.num_ranks()
    }

    pub fn rank_index(&self) -> usize {
        self.comm.rank()
    }

    pub fn global_barrier(&self) -> StencilResult<()> {
        self.comm.barrier()
    }

    pub fn comm(&self) -> &dyn Comm {
        self.comm.as_ref()
    }

    /// Reduce `val` over all ranks with `op`.
    ///
    /// Implemented over point-to-point sends so any transport works:
    /// every rank sends its value to every peer and reduces locally.
    pub fn allreduce_i64(&self, val: i64, op: ReduceOp) -> StencilResult<i64> {
        let n = self.comm.num_ranks();
        if n == 1 {
            return Ok(val);
        }
        let tag = COLLECTIVE_TAG_BASE + op as u64;
        let me = self.comm.rank();
        let mut sends = Vec::with_capacity(n - 1);
        let mut recvs = Vec::with_capacity(n - 1);
        for peer in 0..n {
            if peer == me {
                continue;
            }
            recvs.push(self.comm.post_recv(peer, tag)?);
            sends.push(self.comm.isend(peer, tag, val.to_le_bytes().to_vec())?);
        }
        let mut acc = val;
        for req in recvs {
            let bytes = self.comm.wait_recv(req)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            let other = i64::from_le_bytes(raw);
            acc = match op {
                ReduceOp::Min => acc.min(other),
                ReduceOp::Max => acc.max(other),
                ReduceOp::Sum => acc + other,
            };
        }
        for req in sends {
            self.comm.wait_send(req)?;
        }
        Ok(acc)
    }

    /// Sum of `val` over all ranks.
    pub fn sum_over_ranks(&self, val: i64) -> StencilResult<i64> {
        self.allreduce_i64(val, ReduceOp::Sum)
    }

    /// Verify `val` is identical on every rank; `descr` names the value
    /// in the error.
    pub fn assert_equality_over_ranks(&self, val: i64, descr: &str) -> StencilResult<()> {
        let min = self.allreduce_i64(val, ReduceOp::Min)?;
        let max = self.allreduce_i64(val, ReduceOp::Max)?;
        if min != val || max != val {
            return Err(StencilError::ConfigInvalid(format!(
                "{descr} values range from {min} to {max} across the ranks; \
                 they should all be identical"
            )));
        }
        Ok(())
    }
}

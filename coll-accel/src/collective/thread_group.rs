use std::sync::{Barrier, Mutex, MutexGuard};

use crate::datatype::{Span, TypeLayout};
use crate::delegate::{CollectiveReducer, Communicator};
use crate::error::{AccelError, Result};
use crate::reduce::{copy_elements, reduce_span};
use crate::types::{Rank, ReduceOp, SendBuf};

/// Shared-memory reducer for `world_size` ranks running as threads of one
/// process.
///
/// Every rank deposits an image of its contribution, waits for the others,
/// and the receiving ranks fold the images in rank order. A second barrier
/// keeps the images alive until every receiver is done with them.
///
/// All ranks of the group must enter each collective with the same
/// arguments, and each must pass its own [`GroupComm`]. With
/// [`SendBuf::InPlace`], `reduce` reads the contribution from `recv`, which
/// is only meaningful on the root.
pub struct ThreadGroup {
    world_size: u32,
    barrier: Barrier,
    slots: Mutex<Vec<Option<Vec<u8>>>>,
}

/// One rank's membership in a [`ThreadGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupComm {
    rank: Rank,
    world_size: u32,
}

impl Communicator for GroupComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }
}

impl ThreadGroup {
    pub fn new(world_size: u32) -> Self {
        Self {
            world_size,
            barrier: Barrier::new(world_size as usize),
            slots: Mutex::new(vec![None; world_size as usize]),
        }
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// Communicator for `rank`.
    pub fn comm(&self, rank: Rank) -> Result<GroupComm> {
        if rank >= self.world_size {
            return Err(AccelError::InvalidRank {
                rank,
                world_size: self.world_size,
            });
        }
        Ok(GroupComm {
            rank,
            world_size: self.world_size,
        })
    }

    fn slots(&self) -> Result<MutexGuard<'_, Vec<Option<Vec<u8>>>>> {
        self.slots
            .lock()
            .map_err(|_| AccelError::LockPoisoned("thread group slots"))
    }

    fn member_rank(&self, comm: &dyn Communicator, operation: &'static str) -> Result<usize> {
        let rank = comm.rank();
        if comm.world_size() != self.world_size || rank >= self.world_size {
            return Err(AccelError::CollectiveFailed {
                operation,
                rank,
                reason: format!(
                    "communicator (world size {}) is not a member of this {}-rank group",
                    comm.world_size(),
                    self.world_size
                ),
            });
        }
        Ok(rank as usize)
    }

    /// # Safety
    /// See [`CollectiveReducer::reduce`]. `recv` is written only when
    /// `receives` is set.
    #[allow(clippy::too_many_arguments)]
    unsafe fn run(
        &self,
        operation: &'static str,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        comm: &dyn Communicator,
        receives: bool,
    ) -> Result<()> {
        let rank = self.member_rank(comm, operation)?;
        let span = layout.span(count);
        let src = send.ptr().unwrap_or(recv);
        let image = unsafe { span_image(src, span) };
        let deposited = self.slots().map(|mut slots| slots[rank] = Some(image));

        self.barrier.wait();
        let result = deposited.and_then(|()| {
            if receives {
                unsafe { self.fold_into(operation, recv, count, layout, op, span) }
            } else {
                Ok(())
            }
        });
        self.barrier.wait();

        if let Ok(mut slots) = self.slots() {
            slots[rank] = None;
        }
        result
    }

    /// Fold every deposited image in rank order and write the element bytes
    /// of the result to `recv`.
    unsafe fn fold_into(
        &self,
        operation: &'static str,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        span: Span,
    ) -> Result<()> {
        let acc = {
            let slots = self.slots()?;
            let mut images = slots.iter().enumerate().map(|(r, slot)| {
                slot.as_deref().ok_or_else(|| AccelError::CollectiveFailed {
                    operation,
                    rank: r as Rank,
                    reason: "rank deposited no contribution".into(),
                })
            });
            let mut acc = match images.next() {
                Some(first) => first?.to_vec(),
                None => return Ok(()),
            };
            for image in images {
                reduce_span(&mut acc, image?, count, layout, op)?;
            }
            acc
        };

        if span.is_empty() {
            return Ok(());
        }
        let acc_base = (acc.as_ptr() as u64).wrapping_add_signed(-(span.gap as i64));
        unsafe { copy_elements(recv, acc_base, count, layout) };
        Ok(())
    }
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("world_size", &self.world_size)
            .finish_non_exhaustive()
    }
}

/// Copy of the `span` bytes starting at `base + gap`.
///
/// # Safety
/// `base + gap .. base + gap + span.bytes` must be readable host memory.
unsafe fn span_image(base: u64, span: Span) -> Vec<u8> {
    if span.is_empty() {
        return Vec::new();
    }
    let start = base.wrapping_add_signed(span.gap as i64) as *const u8;
    unsafe { std::slice::from_raw_parts(start, span.bytes) }.to_vec()
}

impl CollectiveReducer for ThreadGroup {
    unsafe fn reduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        root: Rank,
        comm: &dyn Communicator,
    ) -> Result<()> {
        let receives = comm.rank() == root;
        unsafe { self.run("reduce", send, recv, count, layout, op, comm, receives) }
    }

    unsafe fn allreduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        comm: &dyn Communicator,
    ) -> Result<()> {
        unsafe { self.run("allreduce", send, recv, count, layout, op, comm, true) }
    }
}

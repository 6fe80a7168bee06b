//! Seams to the locality-unaware reduction implementations.
//!
//! The staging layer never combines data across ranks itself. It hands
//! host-addressable pointers to a [`CollectiveReducer`] (the collective
//! forms) or a [`LocalCombiner`] (the single-process form), both injected
//! when an [`AccelColl`](crate::AccelColl) is built.

use crate::datatype::TypeLayout;
use crate::error::Result;
use crate::types::{DataType, Rank, ReduceOp, SendBuf};

/// Membership of the calling process in a group of ranks.
pub trait Communicator: Send + Sync {
    /// This process's rank (0-indexed).
    fn rank(&self) -> Rank;

    /// Number of ranks in the group.
    fn world_size(&self) -> u32;
}

/// A collective reduction that only works on host memory.
///
/// Pointers are logical buffer bases: element `i` of the layout lives at
/// `ptr + offset_i`, where offsets come from
/// [`TypeLayout::element_offsets`]. Errors are returned to the caller of
/// the staging layer unchanged.
pub trait CollectiveReducer: Send + Sync {
    /// Combine `send` from every rank into `recv` on `root`.
    ///
    /// # Safety
    /// `send` (unless in-place) must be readable and, on `root`, `recv`
    /// writable over `layout.span(count)` relative to their bases.
    #[allow(clippy::too_many_arguments)]
    unsafe fn reduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        root: Rank,
        comm: &dyn Communicator,
    ) -> Result<()>;

    /// Combine `send` from every rank into `recv` on every rank.
    ///
    /// # Safety
    /// `send` (unless in-place) must be readable and `recv` writable over
    /// `layout.span(count)` relative to their bases.
    unsafe fn allreduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        comm: &dyn Communicator,
    ) -> Result<()>;
}

/// A single-process element-wise combine: `recv[i] = op(recv[i], send[i])`.
///
/// Has no failure mode. Implementations report what they cannot handle
/// through [`supports`](Self::supports), which is checked before any
/// buffer is touched.
pub trait LocalCombiner: Send + Sync {
    fn supports(&self, _dtype: DataType, _op: ReduceOp) -> bool {
        true
    }

    /// # Safety
    /// `send` (unless in-place) must be readable and `recv` writable over
    /// `layout.span(count)` relative to their bases.
    unsafe fn combine(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
    );
}

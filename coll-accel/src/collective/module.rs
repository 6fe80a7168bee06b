use std::sync::Arc;

use crate::config::AccelConfig;
use crate::datatype::TypeLayout;
use crate::delegate::{CollectiveReducer, Communicator, LocalCombiner};
use crate::device::Accelerator;
use crate::error::{AccelError, Result};
use crate::memory::{HostAllocator, SystemAllocator};
use crate::reduce::CpuCombiner;
use crate::staging::{BufferDescriptor, Stager};
use crate::types::{Rank, ReduceOp, SendBuf};

/// Accelerator-transparent front end for reduce collectives.
///
/// Callers pass buffers that may live in host or device memory. Device
/// buffers are staged through host memory so the injected
/// [`CollectiveReducer`] / [`LocalCombiner`] only ever see host pointers,
/// and results are copied back to the device once the reduction is done.
///
/// Holds no per-call state: one `AccelColl` can serve concurrent calls
/// from several threads as long as its collaborators can.
pub struct AccelColl {
    accel: Arc<dyn Accelerator>,
    alloc: Arc<dyn HostAllocator>,
    reducer: Arc<dyn CollectiveReducer>,
    combiner: Arc<dyn LocalCombiner>,
}

impl AccelColl {
    /// Stage through fresh system allocations and combine locally on the CPU.
    pub fn new(accel: Arc<dyn Accelerator>, reducer: Arc<dyn CollectiveReducer>) -> Self {
        Self {
            accel,
            alloc: Arc::new(SystemAllocator::new()),
            reducer,
            combiner: Arc::new(CpuCombiner::new()),
        }
    }

    /// Build with the staging allocator described by `config`.
    pub fn from_config(
        config: &AccelConfig,
        accel: Arc<dyn Accelerator>,
        reducer: Arc<dyn CollectiveReducer>,
    ) -> Self {
        Self::new(accel, reducer).with_allocator(config.allocator())
    }

    pub fn with_allocator(mut self, alloc: Arc<dyn HostAllocator>) -> Self {
        self.alloc = alloc;
        self
    }

    pub fn with_combiner(mut self, combiner: Arc<dyn LocalCombiner>) -> Self {
        self.combiner = combiner;
        self
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accel
    }

    fn stager(&self, layout: &TypeLayout, count: usize) -> Stager<'_> {
        Stager::new(&*self.accel, &*self.alloc, layout.span(count))
    }

    /// Classify `addr` as the base of `count` instances of `layout`.
    pub fn describe(
        &self,
        addr: u64,
        count: usize,
        layout: &TypeLayout,
    ) -> Result<BufferDescriptor> {
        self.stager(layout, count).describe(addr)
    }

    /// Rooted reduce: combine `send` from every rank of `comm` into `recv`
    /// on `root`.
    ///
    /// `recv` is classified on every rank but only staged on the root.
    /// Errors from the delegated reducer are returned after all staging
    /// memory has been released and, on the root, after the receive image
    /// has been written back.
    ///
    /// # Safety
    /// `send` (unless in-place) must be valid for reads and, on the root,
    /// `recv` valid for reads and writes over `layout.span(count)` relative
    /// to their bases, in whichever memory space they live.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn reduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        root: Rank,
        comm: &dyn Communicator,
    ) -> Result<()> {
        let world_size = comm.world_size();
        if root >= world_size {
            return Err(AccelError::InvalidRank {
                rank: root,
                world_size,
            });
        }

        let stager = self.stager(layout, count);
        let is_root = comm.rank() == root;
        let args = unsafe { stager.stage(send, recv, is_root)? };
        tracing::trace!(
            rank = comm.rank(),
            root,
            staged_send = args.staged_send(),
            staged_recv = args.staged_recv(),
            "delegating reduce"
        );
        let result = unsafe {
            self.reducer
                .reduce(args.send, args.recv, count, layout, op, root, comm)
        };
        stager.unstage(args, result)
    }

    /// Local reduce: `recv[i] = op(recv[i], send[i])` on this process only.
    ///
    /// Fails with `UnsupportedDType` before touching any buffer if the
    /// combiner cannot handle the element type. Otherwise the only
    /// failures are classification, allocation and transfer failures.
    ///
    /// # Safety
    /// `send` (unless in-place) must be valid for reads and `recv` valid
    /// for reads and writes over `layout.span(count)` relative to their
    /// bases, in whichever memory space they live.
    pub unsafe fn reduce_local(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
    ) -> Result<()> {
        if !self.combiner.supports(layout.elem(), op) {
            return Err(AccelError::UnsupportedDType {
                dtype: layout.elem(),
                op: "reduce_local",
            });
        }

        let stager = self.stager(layout, count);
        let args = unsafe { stager.stage(send, recv, true)? };
        tracing::trace!(
            staged_send = args.staged_send(),
            staged_recv = args.staged_recv(),
            "delegating local combine"
        );
        unsafe {
            self.combiner
                .combine(args.send, args.recv, count, layout, op)
        };
        stager.unstage(args, Ok(()))
    }

    /// Allreduce: like [`reduce`](Self::reduce), but every rank receives
    /// the result, so `recv` is staged everywhere.
    ///
    /// # Safety
    /// `send` (unless in-place) must be valid for reads and `recv` valid
    /// for reads and writes over `layout.span(count)` relative to their
    /// bases, in whichever memory space they live.
    pub unsafe fn allreduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
        comm: &dyn Communicator,
    ) -> Result<()> {
        let stager = self.stager(layout, count);
        let args = unsafe { stager.stage(send, recv, true)? };
        tracing::trace!(
            rank = comm.rank(),
            staged_send = args.staged_send(),
            staged_recv = args.staged_recv(),
            "delegating allreduce"
        );
        let result = unsafe {
            self.reducer
                .allreduce(args.send, args.recv, count, layout, op, comm)
        };
        stager.unstage(args, result)
    }
}

impl std::fmt::Debug for AccelColl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelColl").finish_non_exhaustive()
    }
}

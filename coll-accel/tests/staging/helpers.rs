use coll_accel::reduce::copy_elements;
use coll_accel::{
    AccelColl, AccelError, Accelerator, CollectiveReducer, Communicator, CpuCombiner, DataType,
    DeviceId, HostAllocator, LocalCombiner, Locality, Rank, ReduceOp, Result, SendBuf,
    SimAccelerator, SystemAllocator, TransferDirection, TypeLayout,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Something a collaborator of the staging layer observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Alloc { addr: u64, len: usize },
    Free { addr: u64 },
    DtoH { dst: u64, src: u64, len: usize },
    HtoD { dst: u64, src: u64, len: usize },
    Reduce { send: SendBuf, recv: u64 },
    Allreduce { send: SendBuf, recv: u64 },
    Combine { send: SendBuf, recv: u64 },
}

/// Ordered record shared by the recording collaborators of one test.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    pub fn allocs(&self) -> Vec<(u64, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Alloc { addr, len } => Some((addr, len)),
                _ => None,
            })
            .collect()
    }

    pub fn transfers(&self) -> (usize, usize) {
        (
            self.count(|e| matches!(e, Event::DtoH { .. })),
            self.count(|e| matches!(e, Event::HtoD { .. })),
        )
    }

    /// Every allocation was freed exactly once.
    pub fn assert_balanced(&self) {
        let events = self.events();
        let mut live = HashSet::new();
        for event in &events {
            match event {
                Event::Alloc { addr, .. } => {
                    assert!(live.insert(*addr), "0x{addr:x} handed out twice: {events:?}")
                }
                Event::Free { addr } => {
                    assert!(live.remove(addr), "0x{addr:x} freed while not live: {events:?}")
                }
                _ => {}
            }
        }
        assert!(live.is_empty(), "leaked {live:?}: {events:?}");
    }
}

/// `SimAccelerator` that logs every completed transfer.
pub struct RecordingAccelerator {
    pub sim: SimAccelerator,
    log: EventLog,
}

impl Accelerator for RecordingAccelerator {
    fn locate(&self, ptr: u64) -> Result<Locality> {
        self.sim.locate(ptr)
    }

    unsafe fn transfer(
        &self,
        dst: u64,
        dst_loc: Locality,
        src: u64,
        src_loc: Locality,
        len: usize,
        direction: TransferDirection,
    ) -> Result<()> {
        unsafe {
            self.sim
                .transfer(dst, dst_loc, src, src_loc, len, direction)?
        };
        self.log.push(match direction {
            TransferDirection::DeviceToHost => Event::DtoH { dst, src, len },
            TransferDirection::HostToDevice => Event::HtoD { dst, src, len },
        });
        Ok(())
    }
}

/// System allocator that logs allocations and can refuse the n-th request.
pub struct RecordingAllocator {
    inner: SystemAllocator,
    log: EventLog,
    requests: AtomicUsize,
    fail_at: Mutex<Option<usize>>,
}

impl RecordingAllocator {
    /// Refuse the `n`-th request from now on (0-based, counted over the
    /// allocator's lifetime).
    pub fn fail_request(&self, n: usize) {
        *self.fail_at.lock().unwrap() = Some(n);
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use()
    }
}

impl HostAllocator for RecordingAllocator {
    fn allocate(&self, len: usize) -> Result<Vec<u8>> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        if *self.fail_at.lock().unwrap() == Some(n) {
            return Err(AccelError::OutOfResource { bytes: len });
        }
        let buf = self.inner.allocate(len)?;
        self.log.push(Event::Alloc {
            addr: buf.as_ptr() as u64,
            len,
        });
        Ok(buf)
    }

    fn release(&self, buf: Vec<u8>) {
        self.log.push(Event::Free {
            addr: buf.as_ptr() as u64,
        });
        self.inner.release(buf);
    }
}

/// Single-process stand-in for a collective: receiving ranks get a copy of
/// their own contribution. Can be told to fail after doing its work.
pub struct RecordingReducer {
    log: EventLog,
    fail_with: Mutex<Option<AccelError>>,
}

impl RecordingReducer {
    pub fn fail_with(&self, err: AccelError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    fn finish(&self) -> Result<()> {
        match self.fail_with.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl CollectiveReducer for RecordingReducer {
    unsafe fn reduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        _op: ReduceOp,
        root: Rank,
        comm: &dyn Communicator,
    ) -> Result<()> {
        self.log.push(Event::Reduce { send, recv });
        if comm.rank() == root
            && let SendBuf::Ptr(src) = send
        {
            unsafe { copy_elements(recv, src, count, layout) };
        }
        self.finish()
    }

    unsafe fn allreduce(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        _op: ReduceOp,
        _comm: &dyn Communicator,
    ) -> Result<()> {
        self.log.push(Event::Allreduce { send, recv });
        if let SendBuf::Ptr(src) = send {
            unsafe { copy_elements(recv, src, count, layout) };
        }
        self.finish()
    }
}

/// `CpuCombiner` that logs the pointers it was handed.
pub struct RecordingCombiner {
    log: EventLog,
}

impl LocalCombiner for RecordingCombiner {
    fn supports(&self, dtype: DataType, op: ReduceOp) -> bool {
        CpuCombiner::new().supports(dtype, op)
    }

    unsafe fn combine(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
    ) {
        self.log.push(Event::Combine { send, recv });
        unsafe { CpuCombiner::new().combine(send, recv, count, layout, op) };
    }
}

/// Fixed rank and world size.
#[derive(Debug, Clone, Copy)]
pub struct FixedComm {
    pub rank: Rank,
    pub world_size: u32,
}

impl FixedComm {
    pub fn solo() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }
}

impl Communicator for FixedComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }
}

/// An `AccelColl` wired to recording collaborators sharing one log.
pub struct Harness {
    pub log: EventLog,
    pub accel: Arc<RecordingAccelerator>,
    pub alloc: Arc<RecordingAllocator>,
    pub reducer: Arc<RecordingReducer>,
    pub coll: AccelColl,
}

impl Harness {
    pub fn new() -> Self {
        let log = EventLog::default();
        let accel = Arc::new(RecordingAccelerator {
            sim: SimAccelerator::new(),
            log: log.clone(),
        });
        let alloc = Arc::new(RecordingAllocator {
            inner: SystemAllocator::new(),
            log: log.clone(),
            requests: AtomicUsize::new(0),
            fail_at: Mutex::new(None),
        });
        let reducer = Arc::new(RecordingReducer {
            log: log.clone(),
            fail_with: Mutex::new(None),
        });
        let combiner = Arc::new(RecordingCombiner { log: log.clone() });
        let coll = AccelColl::new(accel.clone(), reducer.clone())
            .with_allocator(alloc.clone())
            .with_combiner(combiner);
        Self {
            log,
            accel,
            alloc,
            reducer,
            coll,
        }
    }

    pub fn sim(&self) -> &SimAccelerator {
        &self.accel.sim
    }

    /// Register `buf` as memory on device 0 and return its address.
    pub fn on_device<T>(&self, buf: &[T]) -> u64 {
        let addr = buf.as_ptr() as u64;
        self.sim()
            .register(DeviceId(0), addr, std::mem::size_of_val(buf))
            .unwrap();
        addr
    }

    pub fn assert_no_leaks(&self) {
        self.log.assert_balanced();
        assert_eq!(self.alloc.in_use(), 0);
    }
}

pub fn is_delegate(e: &Event) -> bool {
    matches!(
        e,
        Event::Reduce { .. } | Event::Allreduce { .. } | Event::Combine { .. }
    )
}

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AccelError, Result};
use crate::memory::buffer::{BufferPtr, Host};

/// Source of temporary host memory for staging.
///
/// Every buffer returned by `allocate` is handed back through `release`
/// exactly once. Callers normally go through [`HostBuf`], which does that
/// on drop.
pub trait HostAllocator: Send + Sync {
    /// Allocate `len` bytes of host memory.
    ///
    /// Fails with [`AccelError::OutOfResource`] when memory is unavailable.
    fn allocate(&self, len: usize) -> Result<Vec<u8>>;

    /// Take back a buffer previously returned by `allocate`.
    fn release(&self, buf: Vec<u8>);
}

/// Cap on outstanding staging bytes.
#[derive(Debug, Default)]
pub struct Budget {
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Account for `bytes` more, or fail if that would exceed the limit.
    pub fn reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let next = current
                .checked_add(bytes)
                .ok_or(AccelError::OutOfResource { bytes })?;
            if self.limit.is_some_and(|limit| next > limit) {
                return Err(AccelError::OutOfResource { bytes });
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn give_back(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Bytes currently reserved.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Allocates a fresh buffer per request from the global allocator.
///
/// Allocation failure is reported instead of aborting the process.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    budget: Budget,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations once `limit` bytes are outstanding.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            budget: Budget::with_limit(limit),
        }
    }

    pub fn in_use(&self) -> usize {
        self.budget.in_use()
    }
}

impl HostAllocator for SystemAllocator {
    fn allocate(&self, len: usize) -> Result<Vec<u8>> {
        self.budget.reserve(len)?;
        let mut buf = Vec::new();
        if buf.try_reserve_exact(len).is_err() {
            self.budget.give_back(len);
            return Err(AccelError::OutOfResource { bytes: len });
        }
        buf.resize(len, 0);
        Ok(buf)
    }

    fn release(&self, buf: Vec<u8>) {
        self.budget.give_back(buf.len());
    }
}

/// Host staging memory owned for the duration of one call.
///
/// Derefs to `[u8]`. On drop the memory goes back to the allocator it came
/// from, so every exit path releases it exactly once.
pub struct HostBuf<'a> {
    buf: Vec<u8>,
    owner: &'a dyn HostAllocator,
}

impl<'a> HostBuf<'a> {
    pub fn allocate(owner: &'a dyn HostAllocator, len: usize) -> Result<Self> {
        let buf = owner.allocate(len)?;
        if buf.len() != len {
            let actual = buf.len();
            owner.release(buf);
            return Err(AccelError::BufferSizeMismatch {
                expected: len,
                actual,
            });
        }
        Ok(Self { buf, owner })
    }

    /// Address of the first byte.
    pub fn addr(&self) -> u64 {
        self.buf.as_ptr() as u64
    }

    pub fn as_host_ptr(&self) -> BufferPtr<Host> {
        // SAFETY: the address comes from a host `Vec`.
        unsafe { BufferPtr::new(self.addr()) }
    }
}

impl Deref for HostBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for HostBuf<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for HostBuf<'_> {
    fn drop(&mut self) {
        self.owner.release(std::mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for HostBuf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuf")
            .field("addr", &format_args!("0x{:x}", self.addr()))
            .field("len", &self.buf.len())
            .finish()
    }
}

//! Simulated accelerator backed by host memory.
//!
//! Address ranges registered with [`SimAccelerator::register`] are treated
//! as device memory: they classify as `Locality::Device`, and transfers
//! insist that each end of a copy is in the memory space its direction
//! claims. Everything else is host memory. Useful on machines without an
//! accelerator and for exercising the staging paths in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::device::accelerator::{Accelerator, DeviceId, Locality, TransferDirection};
use crate::error::{AccelError, Result};

#[derive(Debug, Clone, Copy)]
struct Region {
    len: usize,
    device: DeviceId,
    poisoned: bool,
}

/// Number of copies performed in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferCounts {
    pub device_to_host: usize,
    pub host_to_device: usize,
}

#[derive(Debug, Default)]
pub struct SimAccelerator {
    regions: Mutex<BTreeMap<u64, Region>>,
    dtoh: AtomicUsize,
    htod: AtomicUsize,
    fail_dtoh: AtomicBool,
    fail_htod: AtomicBool,
}

impl SimAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `[ptr, ptr + len)` as memory on `device`.
    pub fn register(&self, device: DeviceId, ptr: u64, len: usize) -> Result<()> {
        let mut regions = self
            .regions
            .lock()
            .map_err(|_| AccelError::LockPoisoned("sim regions"))?;
        let end = ptr + len as u64;
        let overlaps = regions
            .range(..end)
            .next_back()
            .is_some_and(|(&start, r)| start + r.len as u64 > ptr);
        if overlaps {
            return Err(AccelError::device(format!(
                "region 0x{ptr:x}+{len} overlaps an existing registration"
            )));
        }
        regions.insert(
            ptr,
            Region {
                len,
                device,
                poisoned: false,
            },
        );
        Ok(())
    }

    /// Forget the region starting at `ptr`. Returns false if none was registered.
    pub fn unregister(&self, ptr: u64) -> bool {
        match self.regions.lock() {
            Ok(mut regions) => regions.remove(&ptr).is_some(),
            Err(_) => false,
        }
    }

    /// Make the region starting at `ptr` unclassifiable, as a corrupted
    /// memory handle would be.
    pub fn poison(&self, ptr: u64) -> bool {
        match self.regions.lock() {
            Ok(mut regions) => match regions.get_mut(&ptr) {
                Some(region) => {
                    region.poisoned = true;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Make the next transfer in `direction` fail.
    pub fn fail_next_transfer(&self, direction: TransferDirection) {
        match direction {
            TransferDirection::DeviceToHost => self.fail_dtoh.store(true, Ordering::SeqCst),
            TransferDirection::HostToDevice => self.fail_htod.store(true, Ordering::SeqCst),
        }
    }

    pub fn transfer_counts(&self) -> TransferCounts {
        TransferCounts {
            device_to_host: self.dtoh.load(Ordering::SeqCst),
            host_to_device: self.htod.load(Ordering::SeqCst),
        }
    }

    fn lookup(&self, ptr: u64) -> Result<Option<(u64, Region)>> {
        let regions = self
            .regions
            .lock()
            .map_err(|_| AccelError::LockPoisoned("sim regions"))?;
        Ok(regions
            .range(..=ptr)
            .next_back()
            .filter(|(start, r)| ptr < *start + r.len as u64)
            .map(|(&start, &r)| (start, r)))
    }

    /// Check that `[ptr, ptr + len)` is entirely in the space `loc` names.
    fn check_end(
        &self,
        ptr: u64,
        loc: Locality,
        len: usize,
        direction: TransferDirection,
    ) -> Result<()> {
        let fail = |reason: String| AccelError::Transfer {
            direction,
            bytes: len,
            reason,
        };
        match (loc, self.lookup(ptr)?) {
            (Locality::Host, None) => Ok(()),
            (Locality::Host, Some((start, _))) => Err(fail(format!(
                "0x{ptr:x} is device memory (region 0x{start:x}), not host"
            ))),
            (Locality::Device(id), None) => {
                Err(fail(format!("0x{ptr:x} is not device memory on {id}")))
            }
            (Locality::Device(id), Some((start, region))) => {
                if region.device != id {
                    return Err(fail(format!(
                        "0x{ptr:x} belongs to {}, not {id}",
                        region.device
                    )));
                }
                if ptr + len as u64 > start + region.len as u64 {
                    return Err(fail(format!(
                        "0x{ptr:x}+{len} runs past the end of region 0x{start:x}"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Accelerator for SimAccelerator {
    fn locate(&self, ptr: u64) -> Result<Locality> {
        match self.lookup(ptr)? {
            None => Ok(Locality::Host),
            Some((start, region)) if region.poisoned => Err(AccelError::classification(
                ptr,
                format!("region 0x{start:x} on {} is poisoned", region.device),
            )),
            Some((_, region)) => Ok(Locality::Device(region.device)),
        }
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
        let (flag, counter) = match direction {
            TransferDirection::DeviceToHost => (&self.fail_dtoh, &self.dtoh),
            TransferDirection::HostToDevice => (&self.fail_htod, &self.htod),
        };
        if flag.swap(false, Ordering::SeqCst) {
            return Err(AccelError::Transfer {
                direction,
                bytes: len,
                reason: "injected failure".into(),
            });
        }
        self.check_end(dst, dst_loc, len, direction)?;
        self.check_end(src, src_loc, len, direction)?;
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len);
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

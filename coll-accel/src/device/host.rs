use crate::device::accelerator::{Accelerator, Locality, TransferDirection};
use crate::error::{AccelError, Result};

/// Accelerator for processes without device memory. Every pointer is host
/// memory, so the staging layer never allocates.
#[derive(Debug, Clone, Default)]
pub struct HostAccelerator;

impl HostAccelerator {
    pub fn new() -> Self {
        Self
    }
}

impl Accelerator for HostAccelerator {
    fn locate(&self, _ptr: u64) -> Result<Locality> {
        Ok(Locality::Host)
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
        if !dst_loc.is_host() || !src_loc.is_host() {
            return Err(AccelError::Transfer {
                direction,
                bytes: len,
                reason: "host accelerator has no devices".into(),
            });
        }
        unsafe {
            std::ptr::copy(src as *const u8, dst as *mut u8, len);
        }
        Ok(())
    }
}

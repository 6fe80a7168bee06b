use crate::error::Result;

/// Opaque identifier of an accelerator device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Where a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Ordinary process memory; reductions can touch it directly.
    Host,
    /// Accelerator memory on the given device.
    Device(DeviceId),
}

impl Locality {
    pub fn is_host(self) -> bool {
        matches!(self, Locality::Host)
    }

    /// The device id, or `None` for host memory.
    pub fn device(self) -> Option<DeviceId> {
        match self {
            Locality::Host => None,
            Locality::Device(id) => Some(id),
        }
    }
}

/// Direction of a host/device copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    DeviceToHost,
    HostToDevice,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::DeviceToHost => f.write_str("DtoH"),
            TransferDirection::HostToDevice => f.write_str("HtoD"),
        }
    }
}

/// Bridges accelerator memory with locality-unaware reductions.
///
/// The staging layer only needs two things from an accelerator runtime:
/// to know where a pointer lives, and to copy bytes across the host/device
/// boundary. Pointers are raw `u64` addresses.
///
/// - `HostAccelerator` (built-in): every pointer is host memory.
/// - `SimAccelerator` (built-in): registered address ranges behave as device memory.
/// - Vendor runtimes: implemented externally.
pub trait Accelerator: Send + Sync {
    /// Classify `ptr`.
    ///
    /// Returns an error if the pointer cannot be classified (corrupted or
    /// unregistered handle). Callers treat that as fatal for the whole call.
    fn locate(&self, ptr: u64) -> Result<Locality>;

    /// Synchronously copy `len` bytes from `src` to `dst`.
    ///
    /// # Safety
    /// `src` must be readable and `dst` writable for `len` bytes in the
    /// memory spaces given by `src_loc` and `dst_loc`.
    unsafe fn transfer(
        &self,
        dst: u64,
        dst_loc: Locality,
        src: u64,
        src_loc: Locality,
        len: usize,
        direction: TransferDirection,
    ) -> Result<()>;

    /// Copy device memory into a host slice.
    ///
    /// # Safety
    /// `src` must be a valid pointer on `device` to at least `dst.len()` bytes.
    unsafe fn copy_to_host(&self, dst: &mut [u8], src: u64, device: DeviceId) -> Result<()> {
        unsafe {
            self.transfer(
                dst.as_mut_ptr() as u64,
                Locality::Host,
                src,
                Locality::Device(device),
                dst.len(),
                TransferDirection::DeviceToHost,
            )
        }
    }

    /// Copy a host slice into device memory.
    ///
    /// # Safety
    /// `dst` must be a valid pointer on `device` to at least `src.len()` bytes.
    unsafe fn copy_to_device(&self, dst: u64, device: DeviceId, src: &[u8]) -> Result<()> {
        unsafe {
            self.transfer(
                dst,
                Locality::Device(device),
                src.as_ptr() as u64,
                Locality::Host,
                src.len(),
                TransferDirection::HostToDevice,
            )
        }
    }
}

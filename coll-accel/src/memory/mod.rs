mod alloc;
mod buffer;
mod pool;

pub use alloc::{Budget, HostAllocator, HostBuf, SystemAllocator};
pub use buffer::{BufferPtr, Device, Host, MemorySpace};
pub use pool::{LARGE_BUF_CAPACITY, SMALL_BUF_CAPACITY, StagingPool};

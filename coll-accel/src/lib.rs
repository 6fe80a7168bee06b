pub mod collective;
pub mod config;
pub mod datatype;
pub mod delegate;
pub mod device;
pub mod error;
pub mod memory;
pub mod reduce;
pub mod staging;
pub mod types;

pub use collective::{AccelColl, GroupComm, ThreadGroup};
pub use config::AccelConfig;
pub use datatype::{Span, TypeLayout};
pub use delegate::{CollectiveReducer, Communicator, LocalCombiner};
pub use device::{
    Accelerator, DeviceId, HostAccelerator, Locality, SimAccelerator, TransferDirection,
};
pub use error::{AccelError, Result};
pub use memory::{
    BufferPtr, Device, Host, HostAllocator, HostBuf, MemorySpace, StagingPool, SystemAllocator,
};
pub use reduce::CpuCombiner;
pub use staging::BufferDescriptor;
pub use types::{DataType, Rank, ReduceOp, SendBuf};

mod accelerator;
mod host;
mod sim;

pub use accelerator::{Accelerator, DeviceId, Locality, TransferDirection};
pub use host::HostAccelerator;
pub use sim::{SimAccelerator, TransferCounts};

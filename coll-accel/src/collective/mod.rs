mod module;
mod thread_group;

pub use module::AccelColl;
pub use thread_group::{GroupComm, ThreadGroup};

use crate::device::TransferDirection;
use crate::types::{DataType, Rank};

pub type Result<T> = std::result::Result<T, AccelError>;

#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    #[error("cannot classify buffer at 0x{ptr:x}: {reason}")]
    Classification { ptr: u64, reason: String },

    #[error("out of resources: host staging allocation of {bytes} bytes failed")]
    OutOfResource { bytes: usize },

    #[error("{direction} transfer of {bytes} bytes failed: {reason}")]
    Transfer {
        direction: TransferDirection,
        bytes: usize,
        reason: String,
    },

    #[error("device error: {message}")]
    DeviceError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("unsupported data type: {dtype:?} for operation {op}")]
    UnsupportedDType { dtype: DataType, op: &'static str },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid datatype layout: {0}")]
    InvalidLayout(String),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl AccelError {
    /// Create a `Classification` error for `ptr`.
    pub fn classification(ptr: u64, reason: impl Into<String>) -> Self {
        Self::Classification {
            ptr,
            reason: reason.into(),
        }
    }

    /// Create a `DeviceError` with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `DeviceError` with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}

//! Typed pointers that encode memory space in the type system.
//!
//! The staging layer juggles host and device addresses for the same
//! logical buffer. Wrapping the ones it keeps across the delegated call in
//! [`BufferPtr`] stops a device address from being handed to code that
//! expects a host one.

use std::marker::PhantomData;

mod private {
    pub trait Sealed {}
}

/// Marker trait for memory spaces (host vs device).
pub trait MemorySpace: private::Sealed {}

/// Host (CPU) memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Host {}
impl private::Sealed for Host {}
impl MemorySpace for Host {}

/// Device (accelerator) memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {}
impl private::Sealed for Device {}
impl MemorySpace for Device {}

/// A raw address known to live in memory space `S`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferPtr<S: MemorySpace> {
    ptr: u64,
    _space: PhantomData<S>,
}

impl<S: MemorySpace> BufferPtr<S> {
    /// Wrap a raw `u64` pointer.
    ///
    /// # Safety
    /// The pointer must actually point to memory in the space `S`.
    pub unsafe fn new(ptr: u64) -> Self {
        Self {
            ptr,
            _space: PhantomData,
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.ptr
    }

    /// The address `offset` bytes away (which may be negative).
    pub fn offset(&self, offset: isize) -> Self {
        Self {
            ptr: self.ptr.wrapping_add_signed(offset as i64),
            _space: PhantomData,
        }
    }
}

impl<S: MemorySpace> std::fmt::Display for BufferPtr<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferPtr(0x{:x})", self.ptr)
    }
}

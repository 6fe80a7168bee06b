//! Host staging of accelerator-resident buffers around a delegated reduction.
//!
//! A call goes through three steps:
//!
//! 1. **Locate**: classify the send and receive buffers.
//! 2. **Stage**: copy each device-resident buffer into a fresh host
//!    allocation covering the datatype span, and substitute the host
//!    image's logical base (`allocation - gap`) for the caller's pointer.
//! 3. **Unstage**: after the delegated reduction, release the send image
//!    and copy the receive image back to its device origin before
//!    releasing it.
//!
//! Host images are [`HostBuf`]s, so an early return at any point (failed
//! classification, failed allocation, failed transfer) releases whatever
//! was already allocated.

use crate::datatype::Span;
use crate::device::{Accelerator, DeviceId, Locality};
use crate::error::Result;
use crate::memory::{BufferPtr, Device, HostAllocator, HostBuf};
use crate::types::SendBuf;

/// A caller buffer and where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Logical base as the caller passed it.
    pub addr: u64,
    pub locality: Locality,
    pub span: Span,
}

impl BufferDescriptor {
    /// Whether the buffer has to be copied to host memory before a
    /// locality-unaware reduction can touch it.
    pub fn needs_staging(&self) -> bool {
        !self.locality.is_host() && !self.span.is_empty()
    }
}

/// Host image of a device buffer's span.
#[derive(Debug)]
pub(crate) struct Staged<'a> {
    host: HostBuf<'a>,
    gap: isize,
}

impl Staged<'_> {
    /// Logical base of the image: the address whose span starts at the
    /// first byte of the allocation.
    pub(crate) fn base(&self) -> u64 {
        self.host.as_host_ptr().offset(-self.gap).as_u64()
    }
}

/// Host image of a receive buffer plus where its contents must go back to.
#[derive(Debug)]
pub(crate) struct StagedRecv<'a> {
    image: Staged<'a>,
    origin: BufferPtr<Device>,
    device: DeviceId,
}

/// Arguments for the delegated call, with the host images backing them.
#[derive(Debug)]
pub(crate) struct StagedArgs<'a> {
    pub(crate) send: SendBuf,
    pub(crate) recv: u64,
    send_image: Option<Staged<'a>>,
    recv_image: Option<StagedRecv<'a>>,
}

impl StagedArgs<'_> {
    pub(crate) fn staged_send(&self) -> bool {
        self.send_image.is_some()
    }

    pub(crate) fn staged_recv(&self) -> bool {
        self.recv_image.is_some()
    }
}

/// Stages buffers of one datatype span for a single call.
pub(crate) struct Stager<'a> {
    accel: &'a dyn Accelerator,
    alloc: &'a dyn HostAllocator,
    span: Span,
}

impl<'a> Stager<'a> {
    pub(crate) fn new(
        accel: &'a dyn Accelerator,
        alloc: &'a dyn HostAllocator,
        span: Span,
    ) -> Self {
        Self { accel, alloc, span }
    }

    pub(crate) fn describe(&self, addr: u64) -> Result<BufferDescriptor> {
        Ok(BufferDescriptor {
            addr,
            locality: self.accel.locate(addr)?,
            span: self.span,
        })
    }

    /// Classify and stage both buffers.
    ///
    /// The receive buffer is always classified but only staged when
    /// `stage_recv` is set, i.e. on processes that receive the result.
    ///
    /// # Safety
    /// `send` (unless in-place) and `recv` must be valid over the span in
    /// the memory space the accelerator reports for them.
    pub(crate) unsafe fn stage(
        &self,
        send: SendBuf,
        recv: u64,
        stage_recv: bool,
    ) -> Result<StagedArgs<'a>> {
        let (send, send_image) = match send {
            SendBuf::InPlace => (SendBuf::InPlace, None),
            SendBuf::Ptr(addr) => {
                let desc = self.describe(addr)?;
                match unsafe { self.stage_in(&desc, "send")? } {
                    Some(image) => (SendBuf::Ptr(image.base()), Some(image)),
                    None => (send, None),
                }
            }
        };

        let desc = self.describe(recv)?;
        let (recv, recv_image) = match (stage_recv, desc.locality) {
            (true, Locality::Device(device)) => match unsafe { self.stage_in(&desc, "recv")? } {
                Some(image) => {
                    let base = image.base();
                    let staged = StagedRecv {
                        image,
                        // SAFETY: the accelerator just classified it as device memory.
                        origin: unsafe { BufferPtr::new(recv) },
                        device,
                    };
                    (base, Some(staged))
                }
                None => (recv, None),
            },
            _ => (recv, None),
        };

        Ok(StagedArgs {
            send,
            recv,
            send_image,
            recv_image,
        })
    }

    /// Release the send image, then write the receive image back to the
    /// device and release it, whatever `result` the delegated call produced.
    ///
    /// Returns the delegated error if there was one; otherwise the
    /// write-back outcome.
    pub(crate) fn unstage(&self, args: StagedArgs<'a>, result: Result<()>) -> Result<()> {
        let StagedArgs {
            send_image,
            recv_image,
            ..
        } = args;
        drop(send_image);

        let Some(recv) = recv_image else {
            return result;
        };
        let written = self.write_back(recv);
        match (result, written) {
            (Ok(()), written) => written,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(write_err)) => {
                tracing::warn!(
                    bytes = self.span.bytes,
                    "write-back after failed reduction also failed: {write_err}"
                );
                Err(e)
            }
        }
    }

    /// Copy a device buffer's span into a new host image.
    ///
    /// Host buffers and empty spans are passed through (`Ok(None)`).
    unsafe fn stage_in(
        &self,
        desc: &BufferDescriptor,
        side: &'static str,
    ) -> Result<Option<Staged<'a>>> {
        let Locality::Device(device) = desc.locality else {
            tracing::trace!(side, "buffer is host-resident, passing through");
            return Ok(None);
        };
        if !desc.needs_staging() {
            return Ok(None);
        }

        let mut host = HostBuf::allocate(self.alloc, self.span.bytes)?;
        let src = desc.addr.wrapping_add_signed(self.span.gap as i64);
        unsafe { self.accel.copy_to_host(&mut host, src, device)? };
        tracing::trace!(
            side,
            bytes = self.span.bytes,
            %device,
            gap = self.span.gap,
            "staged device buffer on host"
        );
        Ok(Some(Staged {
            host,
            gap: self.span.gap,
        }))
    }

    /// Copy a receive image back to its origin, then release it.
    fn write_back(&self, recv: StagedRecv<'a>) -> Result<()> {
        let dst = recv.origin.offset(recv.image.gap).as_u64();
        // SAFETY: `origin` was classified as device memory covering the span
        // when it was staged, and the caller keeps it alive for the call.
        let written = unsafe { self.accel.copy_to_device(dst, recv.device, &recv.image.host) };
        if written.is_ok() {
            tracing::debug!(
                bytes = self.span.bytes,
                device = %recv.device,
                "wrote reduction result back to device"
            );
        }
        drop(recv);
        written
    }
}

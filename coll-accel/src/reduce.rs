//! Element-wise reduction primitives over datatype layouts, and the
//! built-in host [`LocalCombiner`].

use crate::datatype::TypeLayout;
use crate::delegate::LocalCombiner;
use crate::error::{AccelError, Result};
use crate::types::{DataType, ReduceOp, SendBuf};

/// Trait for types that support the four reduction operations.
pub(crate) trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

/// Whether the host primitives can combine `dtype`.
pub fn is_supported(dtype: DataType) -> bool {
    !matches!(dtype, DataType::F16 | DataType::BF16)
}

/// `dst[i] = op(dst[i], src[i])` for every element of `count` instances of
/// `layout`, addressed from the logical bases `dst_base` and `src_base`.
///
/// # Safety
/// Both bases must be valid host pointers over `layout.span(count)`.
pub unsafe fn reduce_layout(
    dst_base: u64,
    src_base: u64,
    count: usize,
    layout: &TypeLayout,
    op: ReduceOp,
) -> Result<()> {
    let offsets = layout.element_offsets(count);
    unsafe {
        match layout.elem() {
            DataType::F32 => reduce_typed::<f32>(dst_base, src_base, offsets, op),
            DataType::F64 => reduce_typed::<f64>(dst_base, src_base, offsets, op),
            DataType::I32 => reduce_typed::<i32>(dst_base, src_base, offsets, op),
            DataType::I64 => reduce_typed::<i64>(dst_base, src_base, offsets, op),
            DataType::U32 => reduce_typed::<u32>(dst_base, src_base, offsets, op),
            DataType::U64 => reduce_typed::<u64>(dst_base, src_base, offsets, op),
            DataType::I8 => reduce_typed::<i8>(dst_base, src_base, offsets, op),
            DataType::U8 => reduce_typed::<u8>(dst_base, src_base, offsets, op),
            dtype => {
                return Err(AccelError::UnsupportedDType {
                    dtype,
                    op: "reduce",
                });
            }
        }
    }
    Ok(())
}

/// Element-wise reduce on two span images: byte `j` of each slice is byte
/// `gap + j` relative to the logical base.
pub fn reduce_span(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    layout: &TypeLayout,
    op: ReduceOp,
) -> Result<()> {
    let span = layout.span(count);
    for len in [dst.len(), src.len()] {
        if len != span.bytes {
            return Err(AccelError::BufferSizeMismatch {
                expected: span.bytes,
                actual: len,
            });
        }
    }
    if span.is_empty() {
        return Ok(());
    }
    let dst_base = (dst.as_mut_ptr() as u64).wrapping_add_signed(-(span.gap as i64));
    let src_base = (src.as_ptr() as u64).wrapping_add_signed(-(span.gap as i64));
    unsafe { reduce_layout(dst_base, src_base, count, layout, op) }
}

/// Copy the element bytes of `count` instances from `src_base` to
/// `dst_base`, leaving the holes between elements untouched.
///
/// # Safety
/// `src_base` must be readable and `dst_base` writable over
/// `layout.span(count)`, and the two ranges must not overlap.
pub unsafe fn copy_elements(dst_base: u64, src_base: u64, count: usize, layout: &TypeLayout) {
    let esize = layout.elem().size_in_bytes();
    for off in layout.element_offsets(count) {
        let src = src_base.wrapping_add_signed(off as i64) as *const u8;
        let dst = dst_base.wrapping_add_signed(off as i64) as *mut u8;
        unsafe { std::ptr::copy_nonoverlapping(src, dst, esize) };
    }
}

/// # Safety
/// Every `base + offset` must address a `T` in valid host memory.
unsafe fn reduce_typed<T: Reducible>(
    dst_base: u64,
    src_base: u64,
    offsets: impl Iterator<Item = isize>,
    op: ReduceOp,
) {
    for off in offsets {
        let dst = dst_base.wrapping_add_signed(off as i64) as *mut T;
        let src = src_base.wrapping_add_signed(off as i64) as *const T;
        unsafe {
            let r = T::reduce(dst.read_unaligned(), src.read_unaligned(), op);
            dst.write_unaligned(r);
        }
    }
}

/// `LocalCombiner` for host memory. Combines in place on the receive buffer.
#[derive(Debug, Clone, Default)]
pub struct CpuCombiner;

impl CpuCombiner {
    pub fn new() -> Self {
        Self
    }
}

impl LocalCombiner for CpuCombiner {
    fn supports(&self, dtype: DataType, _op: ReduceOp) -> bool {
        is_supported(dtype)
    }

    unsafe fn combine(
        &self,
        send: SendBuf,
        recv: u64,
        count: usize,
        layout: &TypeLayout,
        op: ReduceOp,
    ) {
        // In place: the receive buffer already is the only contribution.
        let SendBuf::Ptr(src) = send else {
            return;
        };
        if let Err(e) = unsafe { reduce_layout(recv, src, count, layout, op) } {
            tracing::error!(dtype = %layout.elem(), %op, "local combine skipped: {e}");
        }
    }
}

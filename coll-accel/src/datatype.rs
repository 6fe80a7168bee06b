//! Memory layout of (possibly non-contiguous) datatypes.
//!
//! A [`TypeLayout`] describes one instance of a datatype as a set of
//! primitive elements at byte displacements from the instance's logical
//! base, plus a lower/upper bound whose difference is the stride between
//! consecutive instances. [`TypeLayout::span`] answers the question the
//! staging layer cares about: how many bytes does a buffer of `count`
//! instances touch, and where does that range start relative to the
//! pointer the caller passed in.

use std::sync::Arc;

use crate::error::{AccelError, Result};
use crate::types::DataType;

/// Byte range touched by `count` instances of a datatype.
///
/// The range is `[base + gap, base + gap + bytes)` where `base` is the
/// logical buffer address handed to the reduction. A negative `gap` means
/// the first element lives below `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub bytes: usize,
    pub gap: isize,
}

impl Span {
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

/// Layout of one datatype instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    elem: DataType,
    displs: Arc<[isize]>,
    lb: isize,
    ub: isize,
}

impl TypeLayout {
    /// A single primitive element.
    pub fn contiguous(elem: DataType) -> Self {
        Self {
            elem,
            displs: Arc::from([0isize]),
            lb: 0,
            ub: elem.size_in_bytes() as isize,
        }
    }

    /// `blocks` blocks of `blocklen` elements, block starts `stride` elements apart.
    pub fn vector(elem: DataType, blocks: usize, blocklen: usize, stride: isize) -> Self {
        let esize = elem.size_in_bytes() as isize;
        let displs: Vec<isize> = (0..blocks as isize)
            .flat_map(|b| (0..blocklen as isize).map(move |j| (b * stride + j) * esize))
            .collect();
        Self::from_displacements(elem, displs)
    }

    /// Primitive elements at arbitrary byte displacements.
    pub fn indexed(elem: DataType, displs: &[isize]) -> Self {
        Self::from_displacements(elem, displs.to_vec())
    }

    fn from_displacements(elem: DataType, displs: Vec<isize>) -> Self {
        let esize = elem.size_in_bytes() as isize;
        let lb = displs.iter().copied().min().unwrap_or(0);
        let ub = displs.iter().map(|d| d + esize).max().unwrap_or(0);
        Self {
            elem,
            displs: displs.into(),
            lb,
            ub,
        }
    }

    /// Override the bounds, e.g. to give a type a negative lower bound or
    /// trailing padding.
    pub fn resized(self, lb: isize, extent: isize) -> Result<Self> {
        if extent <= 0 && !self.displs.is_empty() {
            return Err(AccelError::InvalidLayout(format!(
                "extent must be positive, got {extent}"
            )));
        }
        Ok(Self {
            lb,
            ub: lb + extent,
            ..self
        })
    }

    /// Primitive element type.
    pub fn elem(&self) -> DataType {
        self.elem
    }

    /// Bytes of actual data in one instance (holes excluded).
    pub fn size(&self) -> usize {
        self.displs.len() * self.elem.size_in_bytes()
    }

    /// Distance between consecutive instances.
    pub fn extent(&self) -> isize {
        self.ub - self.lb
    }

    pub fn lb(&self) -> isize {
        self.lb
    }

    /// Lowest byte actually holding data.
    pub fn true_lb(&self) -> isize {
        self.displs.iter().copied().min().unwrap_or(0)
    }

    /// One past the highest byte actually holding data.
    pub fn true_ub(&self) -> isize {
        let esize = self.elem.size_in_bytes() as isize;
        self.displs.iter().map(|d| d + esize).max().unwrap_or(0)
    }

    /// Number of primitive elements in `count` instances.
    pub fn num_elements(&self, count: usize) -> usize {
        self.displs.len() * count
    }

    /// Bytes touched by `count` instances and their offset from the logical base.
    pub fn span(&self, count: usize) -> Span {
        if count == 0 || self.size() == 0 {
            return Span::default();
        }
        let true_extent = self.true_ub() - self.true_lb();
        let bytes = true_extent + self.extent() * (count as isize - 1);
        Span {
            bytes: bytes as usize,
            gap: self.true_lb(),
        }
    }

    /// Byte offset from the logical base of every primitive element in
    /// `count` instances, in memory order of the type map.
    pub fn element_offsets(&self, count: usize) -> impl Iterator<Item = isize> + '_ {
        let extent = self.extent();
        (0..count as isize).flat_map(move |k| self.displs.iter().map(move |d| k * extent + d))
    }
}

impl From<DataType> for TypeLayout {
    fn from(elem: DataType) -> Self {
        Self::contiguous(elem)
    }
}

//! Operand buffers with controlled cache-line placement
//!
//! Each buffer is over-allocated, shifted so its first element sits on a
//! cache-line boundary, and then windowed at small element offsets to study
//! how vectorized kernels react to misalignment.

use rand::Rng;

use crate::error::{BenchError, Result};

/// Cache line size in bytes
pub const CACHE_LINE: usize = 64;

/// Extra elements allocated beyond the array size (non-power-of-two > 16)
pub const PADDING: usize = 27;

/// Elements kept past the array size after alignment; bounds the offsets
pub const SLACK: usize = 16;

/// Byte offset of the slice start from the previous cache-line boundary
#[must_use]
pub fn cache_line_offset<T>(data: &[T]) -> usize {
    data.as_ptr() as usize % CACHE_LINE
}

/// Number of elements to skip so the slice starts on a cache line
///
/// # Errors
///
/// Returns [`BenchError::AlignmentError`] when the distance to the next
/// boundary is not a whole number of elements.
pub fn aligning_shift<T>(data: &[T]) -> Result<usize> {
    let size = std::mem::size_of::<T>();
    let bytes = (CACHE_LINE - cache_line_offset(data)) % CACHE_LINE;
    if size == 0 || bytes % size != 0 {
        return Err(BenchError::AlignmentError {
            reason: format!("{bytes} bytes to the next cache line is not a multiple of {size}"),
        });
    }
    Ok(bytes / size)
}

/// Cache-line aligned view of `data` holding `n + SLACK` elements
///
/// # Errors
///
/// Fails when the shift is not element-granular or the slice is too short.
pub fn align_slice<T>(data: &[T], n: usize) -> Result<&[T]> {
    let shift = aligning_shift(data)?;
    data.get(shift..shift + n + SLACK)
        .ok_or_else(|| BenchError::AlignmentError {
            reason: format!(
                "buffer of {} elements cannot hold {} aligned elements after a shift of {shift}",
                data.len(),
                n + SLACK
            ),
        })
}

/// One operand: a padded allocation and the aligned region inside it
#[derive(Debug, Clone)]
pub struct OperandBuffer {
    storage: Vec<f64>,
    start: usize,
    len: usize,
}

impl OperandBuffer {
    /// Fill `n + PADDING` elements uniformly from `[low, high)`
    pub fn uniform<R: Rng + ?Sized>(n: usize, low: f64, high: f64, rng: &mut R) -> Self {
        let storage: Vec<f64> = (0..n + PADDING).map(|_| rng.gen_range(low..high)).collect();
        Self::from_vec(storage)
    }

    /// Wrap existing storage without shifting it
    #[must_use]
    pub fn from_vec(storage: Vec<f64>) -> Self {
        let len = storage.len();
        Self {
            storage,
            start: 0,
            len,
        }
    }

    /// Byte offset of the current region from a cache-line boundary
    #[must_use]
    pub fn offset(&self) -> usize {
        cache_line_offset(self.as_slice())
    }

    /// Elements the region would move by to become aligned
    ///
    /// # Errors
    ///
    /// See [`aligning_shift`].
    pub fn pending_shift(&self) -> Result<usize> {
        aligning_shift(&self.storage)
    }

    /// Re-slice the region to start on a cache line and hold `n + SLACK`
    /// elements; returns the applied shift in elements
    ///
    /// # Errors
    ///
    /// See [`align_slice`].
    pub fn align(&mut self, n: usize) -> Result<usize> {
        let shift = aligning_shift(&self.storage)?;
        let aligned_len = align_slice(&self.storage, n)?.len();
        self.start = shift;
        self.len = aligned_len;
        Ok(shift)
    }

    /// Current region
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.storage[self.start..self.start + self.len]
    }

    /// `n` elements starting `offset` elements into the region
    ///
    /// # Panics
    ///
    /// Panics if the window runs past the region; offsets are validated
    /// against [`SLACK`] before any window is taken.
    #[must_use]
    pub fn window(&self, offset: usize, n: usize) -> &[f64] {
        &self.as_slice()[offset..offset + n]
    }

    /// Mutable `n` element window starting `offset` elements into the region
    ///
    /// # Panics
    ///
    /// Same bounds as [`OperandBuffer::window`].
    pub fn window_mut(&mut self, offset: usize, n: usize) -> &mut [f64] {
        let begin = self.start + offset;
        &mut self.storage[begin..begin + n]
    }
}

/// Output buffer and the two inputs for one array size
#[derive(Debug, Clone)]
pub struct Operands {
    /// Output, values in `[2.1, 2.9)`
    pub z: OperandBuffer,
    /// First input, values in `[0.1, 0.9)`
    pub x: OperandBuffer,
    /// Second input, values in `[1.1, 1.9)` (> 1 for hyperbolic inverses)
    pub y: OperandBuffer,
}

impl Operands {
    /// Allocate the three buffers for arrays of `n` elements
    pub fn new<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Self {
        Self {
            z: OperandBuffer::uniform(n, 2.1, 2.9, rng),
            x: OperandBuffer::uniform(n, 0.1, 0.9, rng),
            y: OperandBuffer::uniform(n, 1.1, 1.9, rng),
        }
    }

    /// True when every buffer already starts on a cache line
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.z.offset() == 0 && self.x.offset() == 0 && self.y.offset() == 0
    }

    /// Align all three buffers, returning the (z, x, y) shifts in elements
    ///
    /// # Errors
    ///
    /// See [`OperandBuffer::align`].
    pub fn align(&mut self, n: usize) -> Result<(usize, usize, usize)> {
        Ok((self.z.align(n)?, self.x.align(n)?, self.y.align(n)?))
    }
}

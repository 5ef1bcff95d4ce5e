//! Over-aligned host staging memory
//!
//! Host blocks handed to a device must start on a cache-line boundary and
//! span whole alignment units, so that partial slots written by different
//! groups never share a line.
//!
//! # Alignment
//!
//! For element type `T` the block alignment is
//! `max(size_of::<T>().next_power_of_two(), 64)` and the byte length of a
//! request for `count` elements is `count * size_of::<T>()` rounded up to a
//! multiple of that alignment. An empty request still occupies one unit.
//!
//! ```text
//! T = f32   align  64   count 17 -> 68 bytes   -> 128 bytes
//! T = [u64; 16]  align 128   count 1  -> 128 bytes -> 128 bytes
//! ```

use crate::error::{BackendError, Result};
use offload_tracing::performance::record_allocation;
use std::alloc::{alloc, dealloc, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::time::Instant;

/// Minimum alignment of every staging block
pub const CACHE_LINE_SIZE: usize = 64;

/// Stateless allocator of over-aligned blocks of `T`
///
/// Every instance is interchangeable with every other: memory allocated
/// through one may be released through any other.
///
/// # Example
///
/// ```rust
/// use offload_backends::staging::AlignedAllocator;
///
/// let alloc = AlignedAllocator::<f32>::new();
/// let ptr = alloc.allocate(17).unwrap();
/// assert_eq!(ptr.as_ptr() as usize % 64, 0);
/// assert_eq!(AlignedAllocator::<f32>::allocation_size(17).unwrap(), 128);
///
/// unsafe { alloc.deallocate(ptr.as_ptr(), 17) };
/// ```
pub struct AlignedAllocator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> AlignedAllocator<T> {
    pub const fn new() -> Self {
        Self { _marker: PhantomData }
    }

    /// Start-address alignment of every block of `T`
    pub const fn alignment() -> usize {
        let natural = size_of::<T>().next_power_of_two();
        if natural > CACHE_LINE_SIZE {
            natural
        } else {
            CACHE_LINE_SIZE
        }
    }

    /// Byte length of the block backing `count` elements
    pub fn allocation_size(count: usize) -> Result<usize> {
        let overflow = || BackendError::CapacityOverflow {
            count,
            element_size: size_of::<T>(),
        };

        let align = Self::alignment();
        let bytes = count.checked_mul(size_of::<T>()).ok_or_else(overflow)?;
        if bytes == 0 {
            return Ok(align);
        }
        ((bytes - 1) | (align - 1)).checked_add(1).ok_or_else(overflow)
    }

    fn layout(count: usize) -> Result<Layout> {
        let size = Self::allocation_size(count)?;
        Layout::from_size_align(size, Self::alignment()).map_err(|_| BackendError::CapacityOverflow {
            count,
            element_size: size_of::<T>(),
        })
    }

    /// Allocate uninitialized storage for `count` elements
    ///
    /// Failure of the system allocator is reported, never retried.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        let start = Instant::now();
        let layout = Self::layout(count)?;

        // SAFETY: `layout` always has a non-zero size.
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or(BackendError::AllocationFailed {
            bytes: layout.size(),
            alignment: layout.align(),
        })?;

        record_allocation(layout.size(), layout.align(), start.elapsed().as_micros() as u64);
        Ok(ptr)
    }

    /// Release a block previously returned by [`allocate`](Self::allocate)
    ///
    /// A null `ptr` is a no-op.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must come from `allocate(count)` on an allocator of the
    /// same `T`, with the same `count`, and must not have been released
    /// already. Any live elements in the block are not dropped.
    pub unsafe fn deallocate(&self, ptr: *mut T, count: usize) {
        if ptr.is_null() {
            return;
        }
        match Self::layout(count) {
            // SAFETY: the caller guarantees `ptr` was allocated with this layout.
            Ok(layout) => unsafe { dealloc(ptr.cast::<u8>(), layout) },
            Err(_) => debug_assert!(false, "deallocate called with a count that was never allocatable"),
        }
    }
}

impl<T> Clone for AlignedAllocator<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AlignedAllocator<T> {}

impl<T> Default for AlignedAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PartialEq for AlignedAllocator<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for AlignedAllocator<T> {}

impl<T> fmt::Debug for AlignedAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedAllocator")
            .field("alignment", &Self::alignment())
            .finish()
    }
}

// ================================================================================================
// StagingBuffer
// ================================================================================================

/// Fixed-length, initialized, over-aligned buffer of `T`
///
/// Dereferences to a slice. Dropping the buffer drops its elements and then
/// releases the block.
pub struct StagingBuffer<T> {
    ptr: NonNull<T>,
    len: usize,
}

// Drops the initialized prefix if an initializer panics midway.
struct InitGuard<T> {
    ptr: NonNull<T>,
    initialized: usize,
    capacity: usize,
}

impl<T> Drop for InitGuard<T> {
    fn drop(&mut self) {
        // SAFETY: exactly `initialized` leading elements were written.
        unsafe {
            std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.initialized));
            AlignedAllocator::<T>::new().deallocate(self.ptr.as_ptr(), self.capacity);
        }
    }
}

impl<T> StagingBuffer<T> {
    /// Allocate `len` elements, initializing element `i` with `init(i)`
    pub fn from_fn(len: usize, mut init: impl FnMut(usize) -> T) -> Result<Self> {
        let ptr = AlignedAllocator::<T>::new().allocate(len)?;
        let mut guard = InitGuard {
            ptr,
            initialized: 0,
            capacity: len,
        };

        for i in 0..len {
            // SAFETY: `i < len` and the block holds at least `len` elements.
            unsafe { ptr.as_ptr().add(i).write(init(i)) };
            guard.initialized += 1;
        }

        std::mem::forget(guard);
        Ok(Self { ptr, len })
    }

    /// Allocate `len` copies of `value`
    pub fn filled(len: usize, value: T) -> Result<Self>
    where
        T: Clone,
    {
        Self::from_fn(len, |_| value.clone())
    }

    /// Alignment of the backing block
    pub const fn alignment(&self) -> usize {
        AlignedAllocator::<T>::alignment()
    }
}

impl<T> Deref for StagingBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: `len` elements are initialized and owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for StagingBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: `len` elements are initialized and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for StagingBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: the elements are initialized and the block came from `allocate(len)`.
        unsafe {
            std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len));
            AlignedAllocator::<T>::new().deallocate(self.ptr.as_ptr(), self.len);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StagingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// Safety: StagingBuffer owns its elements exclusively
unsafe impl<T: Send> Send for StagingBuffer<T> {}
unsafe impl<T: Sync> Sync for StagingBuffer<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_alignment_rule() {
        assert_eq!(AlignedAllocator::<u8>::alignment(), 64);
        assert_eq!(AlignedAllocator::<f64>::alignment(), 64);
        assert_eq!(AlignedAllocator::<[u8; 65]>::alignment(), 128);
        assert_eq!(AlignedAllocator::<[u64; 16]>::alignment(), 128);
        assert_eq!(AlignedAllocator::<()>::alignment(), 64);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(AlignedAllocator::<f32>::allocation_size(1).unwrap(), 64);
        assert_eq!(AlignedAllocator::<f32>::allocation_size(16).unwrap(), 64);
        assert_eq!(AlignedAllocator::<f32>::allocation_size(17).unwrap(), 128);
        assert_eq!(AlignedAllocator::<[u8; 3]>::allocation_size(22).unwrap(), 128);
    }

    #[test]
    fn test_zero_byte_request_takes_one_unit() {
        assert_eq!(AlignedAllocator::<f32>::allocation_size(0).unwrap(), 64);
        assert_eq!(AlignedAllocator::<()>::allocation_size(1000).unwrap(), 64);

        let alloc = AlignedAllocator::<u32>::new();
        let ptr = alloc.allocate(0).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        unsafe { alloc.deallocate(ptr.as_ptr(), 0) };
    }

    #[test]
    fn test_overflow_reported() {
        let err = AlignedAllocator::<u64>::new().allocate(usize::MAX / 4).unwrap_err();
        assert!(matches!(
            err,
            BackendError::CapacityOverflow {
                element_size: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_null_deallocate_is_noop() {
        unsafe { AlignedAllocator::<f32>::new().deallocate(std::ptr::null_mut(), 8) };
    }

    #[test]
    fn test_instances_compare_equal() {
        let a = AlignedAllocator::<f32>::new();
        let b = a;
        assert_eq!(a, b);
        assert_eq!(a, AlignedAllocator::default());

        // A block from one instance is released through another.
        let ptr = a.allocate(4).unwrap();
        unsafe { b.deallocate(ptr.as_ptr(), 4) };
    }

    #[test]
    fn test_staging_buffer() {
        let mut buffer = StagingBuffer::from_fn(10, |i| i as u64 * 2).unwrap();
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer[4], 8);
        assert_eq!(buffer.as_ptr() as usize % buffer.alignment(), 0);

        buffer[0] = 99;
        assert_eq!(buffer.iter().sum::<u64>(), 189);

        let empty = StagingBuffer::<f32>::filled(0, 1.0).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_staging_buffer_drops_elements() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        drop(StagingBuffer::from_fn(5, |_| Counted).unwrap());
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);

        // A panicking initializer drops only what was written.
        let result = std::panic::catch_unwind(|| {
            StagingBuffer::from_fn(5, |i| {
                if i == 3 {
                    panic!("init failure");
                }
                Counted
            })
        });
        assert!(result.is_err());
        assert_eq!(DROPS.load(Ordering::SeqCst), 8);
    }

    fn check_block<T>(count: usize) -> std::result::Result<(), TestCaseError> {
        let align = AlignedAllocator::<T>::alignment();
        let size = AlignedAllocator::<T>::allocation_size(count).unwrap();
        prop_assert!(align.is_power_of_two());
        prop_assert!(align >= CACHE_LINE_SIZE);
        prop_assert_eq!(size % align, 0);
        prop_assert!(size >= count * size_of::<T>());
        prop_assert!(size < count * size_of::<T>() + align || count * size_of::<T>() == 0);

        let alloc = AlignedAllocator::<T>::new();
        let ptr = alloc.allocate(count).unwrap();
        prop_assert_eq!(ptr.as_ptr() as usize % align, 0);
        unsafe { alloc.deallocate(ptr.as_ptr(), count) };
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_blocks_are_aligned_and_rounded(count in 0usize..4096) {
            check_block::<u8>(count)?;
            check_block::<f32>(count)?;
            check_block::<[u8; 3]>(count)?;
            check_block::<[u64; 16]>(count)?;
            check_block::<[u8; 100]>(count)?;
        }
    }
}

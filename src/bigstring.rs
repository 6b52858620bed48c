//! Shared, non-moving byte storage.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;
use std::sync::Arc;

/// A fixed-size, non-moving byte array shared between iobuf handles.
///
/// Cloning a `Bigstring` clones the handle, not the bytes: every clone
/// addresses the same allocation, which is released when the last handle
/// is dropped. The allocation never moves, so a pointer into it stays
/// valid for the duration of a syscall.
///
/// Writes go through interior mutability and are **not** synchronized. A
/// `Bigstring` is a single-threaded object; it is deliberately neither
/// `Send` nor `Sync`, which is what makes the unchecked interior writes of
/// the iobuf layer sound.
pub struct Bigstring {
    cells: Arc<[UnsafeCell<u8>]>,
}

impl Bigstring {
    /// Allocates `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    /// Allocates storage holding a copy of `bytes`.
    pub fn copy_of(bytes: &[u8]) -> Self {
        Self {
            cells: bytes.iter().map(|&b| UnsafeCell::new(b)).collect(),
        }
    }

    /// Size of the allocation in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the allocation is zero-sized.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether two handles address the same allocation.
    #[inline]
    pub fn ptr_eq(a: &Bigstring, b: &Bigstring) -> bool {
        Arc::ptr_eq(&a.cells, &b.cells)
    }

    /// Base pointer of the allocation.
    ///
    /// The pointer is valid for `len()` bytes of reads and writes for as
    /// long as any handle to this allocation is live. Writing through it
    /// while a safe borrow of the same bytes exists is undefined behavior;
    /// callers going around the iobuf layer take on that proof obligation.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        // `UnsafeCell<u8>` has the layout of `u8`, so the slice base is
        // also the byte base.
        UnsafeCell::raw_get(self.cells.as_ptr())
    }

    /// Copies `dst.len()` bytes starting at `idx` out of the storage.
    ///
    /// # Safety
    ///
    /// `idx + dst.len()` must not exceed `len()`, and `dst` must not
    /// overlap this allocation.
    #[inline]
    pub(crate) unsafe fn read_into(&self, idx: usize, dst: &mut [u8]) {
        // SAFETY:
        // - src: `[idx, idx + dst.len())` is in bounds per the caller.
        // - dst: an exclusive slice, valid for writes of its length.
        // - Nonoverlapping per the caller; `dst` is a safe exclusive
        //   borrow, so it cannot alias interior-mutable storage reachable
        //   through `self` anyway.
        unsafe { ptr::copy_nonoverlapping(self.as_ptr().add(idx), dst.as_mut_ptr(), dst.len()) }
    }

    /// Copies `src` into the storage starting at `idx`.
    ///
    /// # Safety
    ///
    /// `idx + src.len()` must not exceed `len()`, and `src` must not
    /// overlap this allocation.
    #[inline]
    pub(crate) unsafe fn write_from(&self, idx: usize, src: &[u8]) {
        // SAFETY:
        // - src: a shared slice, valid for reads of its length.
        // - dst: `[idx, idx + src.len())` is in bounds per the caller.
        // - Nonoverlapping per the caller.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.as_ptr().add(idx), src.len()) }
    }

    /// Moves `len` bytes from `src_idx` to `dst_idx` within the storage,
    /// memmove-style.
    ///
    /// # Safety
    ///
    /// Both `src_idx + len` and `dst_idx + len` must not exceed `len()`.
    #[inline]
    pub(crate) unsafe fn copy_within(&self, src_idx: usize, dst_idx: usize, len: usize) {
        // SAFETY: both ranges are in bounds per the caller; `ptr::copy`
        // handles their overlap.
        unsafe { ptr::copy(self.as_ptr().add(src_idx), self.as_ptr().add(dst_idx), len) }
    }

    /// Copies `len` bytes from `src` at `src_idx` into `dst` at `dst_idx`.
    ///
    /// # Safety
    ///
    /// `src_idx + len` must not exceed `src.len()` and `dst_idx + len`
    /// must not exceed `dst.len()`.
    #[inline]
    pub(crate) unsafe fn copy_between(
        src: &Bigstring,
        src_idx: usize,
        dst: &Bigstring,
        dst_idx: usize,
        len: usize,
    ) {
        if Bigstring::ptr_eq(src, dst) {
            // SAFETY: both ranges are in bounds of the one shared
            // allocation per the caller; `ptr::copy` handles overlap.
            unsafe { ptr::copy(src.as_ptr().add(src_idx), dst.as_ptr().add(dst_idx), len) }
        } else {
            // SAFETY: in bounds per the caller; distinct allocations
            // cannot overlap.
            unsafe {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(src_idx),
                    dst.as_ptr().add(dst_idx),
                    len,
                )
            }
        }
    }

    /// Writes `byte` over `len` bytes starting at `idx`.
    ///
    /// # Safety
    ///
    /// `idx + len` must not exceed `len()`.
    #[inline]
    pub(crate) unsafe fn set_bytes(&self, idx: usize, len: usize, byte: u8) {
        // SAFETY: the range is in bounds per the caller.
        unsafe { ptr::write_bytes(self.as_ptr().add(idx), byte, len) }
    }
}

impl Clone for Bigstring {
    fn clone(&self) -> Self {
        Self {
            cells: Arc::clone(&self.cells),
        }
    }
}

impl fmt::Debug for Bigstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bigstring")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

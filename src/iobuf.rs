//! The buffer core: geometry, bound management, snapshots.

use core::fmt;
use core::marker::PhantomData;

use crate::access::{Access, NoSeek, ReadOnly, ReadWrite, Readable, Seek, Seekness, Writable};
use crate::bigstring::Bigstring;
use crate::{Error, Result};

/// A non-moving byte region with a movable window.
///
/// The handle is five words: a [`Bigstring`] plus four indices into it,
///
/// ```text
/// 0 ≤ lo_min ≤ lo ≤ hi ≤ hi_max ≤ buf.len()
/// ```
///
/// `[lo_min, hi_max)` are the *limits*, the outer range this handle may
/// ever touch; they only shrink over the handle's lifetime. `[lo, hi)` is
/// the *window*, the range visible to accessors; cursor-style accessors
/// advance `lo`, and the `flip`/`compact`/`reset` family repositions the
/// window within the limits. Every public operation preserves the ordering
/// above.
///
/// The phantom parameters are the handle's capabilities: `A` is the data
/// permission ([`ReadWrite`] by default, weakened with
/// [`read_only`](Iobuf::read_only)), `S` the seek permission ([`Seek`] by
/// default, weakened with [`no_seek`](Iobuf::no_seek)).
pub struct Iobuf<A: Access = ReadWrite, S: Seekness = Seek> {
    pub(crate) buf: Bigstring,
    pub(crate) lo_min: usize,
    pub(crate) lo: usize,
    pub(crate) hi: usize,
    pub(crate) hi_max: usize,
    _caps: PhantomData<(A, S)>,
}

/// Snapshot of a window's lower edge.
///
/// A plain position with no identity token: restoring onto any iobuf is
/// accepted as long as the position lies within that iobuf's current
/// limits, so snapshots travel freely between aliases of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoBound {
    pos: usize,
}

/// Snapshot of a window's upper edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HiBound {
    pos: usize,
}

impl Iobuf {
    /// Creates an iobuf over `len` fresh zeroed bytes, with window and
    /// limits both spanning the whole allocation.
    pub fn create(len: usize) -> Iobuf {
        let buf = Bigstring::zeroed(len);
        Iobuf {
            buf,
            lo_min: 0,
            lo: 0,
            hi: len,
            hi_max: len,
            _caps: PhantomData,
        }
    }

    /// Creates an iobuf over the subrange `[pos, pos + len)` of an
    /// existing [`Bigstring`], with window and limits both set to that
    /// range.
    pub fn of_bigstring(buf: Bigstring, pos: usize, len: usize) -> Result<Iobuf> {
        let end = pos.checked_add(len).ok_or(Error::Bounds {
            start: pos,
            end: usize::MAX,
            avail: buf.len(),
        })?;
        if end > buf.len() {
            return Err(Error::Bounds {
                start: pos,
                end,
                avail: buf.len(),
            });
        }
        Ok(Iobuf {
            buf,
            lo_min: pos,
            lo: pos,
            hi: end,
            hi_max: end,
            _caps: PhantomData,
        })
    }

    /// Creates an iobuf holding a copy of `bytes`.
    pub fn of_bytes(bytes: &[u8]) -> Iobuf {
        Iobuf {
            buf: Bigstring::copy_of(bytes),
            lo_min: 0,
            lo: 0,
            hi: bytes.len(),
            hi_max: bytes.len(),
            _caps: PhantomData,
        }
    }

    /// Creates an iobuf whose contents are byte-identical to `s`.
    pub fn of_string(s: &str) -> Iobuf {
        Iobuf::of_bytes(s.as_bytes())
    }
}

impl<A: Access, S: Seekness> Iobuf<A, S> {
    /// Bytes between the limits: `hi_max - lo_min`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.hi_max - self.lo_min
    }

    /// Bytes in the window: `hi - lo`.
    #[inline]
    pub fn length(&self) -> usize {
        self.hi - self.lo
    }

    /// Whether the window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi == self.lo
    }

    /// Weakens the data permission to read-only. Free.
    #[inline]
    pub fn read_only(self) -> Iobuf<ReadOnly, S> {
        self.cast()
    }

    /// Freezes the window and limits. Free.
    #[inline]
    pub fn no_seek(self) -> Iobuf<A, NoSeek> {
        self.cast()
    }

    /// Captures the window's lower edge.
    #[inline]
    pub fn lo_bound(&self) -> LoBound {
        LoBound { pos: self.lo }
    }

    /// Captures the window's upper edge.
    #[inline]
    pub fn hi_bound(&self) -> HiBound {
        HiBound { pos: self.hi }
    }

    /// Creates an alias over the same storage whose window and limits are
    /// both `[lo + pos, lo + pos + len)`.
    ///
    /// The data permission is inherited; the alias gets fresh seek
    /// permission, which the caller weakens with
    /// [`no_seek`](Iobuf::no_seek) before handing it to a sub-parser.
    pub fn sub_shared(&self, pos: usize, len: usize) -> Result<Iobuf<A, Seek>> {
        self.check_window(pos, len)?;
        let lo = self.lo + pos;
        Ok(Iobuf {
            buf: self.buf.clone(),
            lo_min: lo,
            lo,
            hi: lo + len,
            hi_max: lo + len,
            _caps: PhantomData,
        })
    }

    /// Runs `f` on a seek-capable stand-in for this handle, guaranteeing
    /// the receiver's window and limits are unchanged on every exit path,
    /// including a panicking `f`.
    ///
    /// The stand-in shares storage, so byte mutations made by `f`
    /// persist; only the four indices are protected.
    pub fn protect_window_and_bounds<R>(&mut self, f: impl FnOnce(&mut Iobuf<A, Seek>) -> R) -> R {
        let mut scoped: Iobuf<A, Seek> = Iobuf {
            buf: self.buf.clone(),
            lo_min: self.lo_min,
            lo: self.lo,
            hi: self.hi,
            hi_max: self.hi_max,
            _caps: PhantomData,
        };
        f(&mut scoped)
    }

    /// Raw access to the storage handle and indices, for zero-allocation
    /// syscall wrappers. See [`Expert`].
    #[inline]
    pub fn expert(&mut self) -> Expert<'_, A, S> {
        Expert { t: self }
    }

    #[inline]
    fn cast<A2: Access, S2: Seekness>(self) -> Iobuf<A2, S2> {
        Iobuf {
            buf: self.buf,
            lo_min: self.lo_min,
            lo: self.lo,
            hi: self.hi,
            hi_max: self.hi_max,
            _caps: PhantomData,
        }
    }

    /// Fails unless `[pos, pos + len)` lies inside the window.
    #[inline]
    pub(crate) fn check_window(&self, pos: usize, len: usize) -> Result<()> {
        let window = self.length();
        match pos.checked_add(len) {
            Some(end) if end <= window => Ok(()),
            _ => Err(Error::Bounds {
                start: pos,
                end: pos.saturating_add(len),
                avail: window,
            }),
        }
    }

    /// Pointer to the window's first byte.
    #[inline]
    pub(crate) fn window_ptr(&self) -> *mut u8 {
        // SAFETY: `lo ≤ buf.len()` by the field invariant, so the offset
        // stays within (or one past) the allocation.
        unsafe { self.buf.as_ptr().add(self.lo) }
    }

    /// Borrows `[abs, abs + len)` of the storage as a slice.
    ///
    /// # Safety
    ///
    /// The range must lie inside the storage, and no byte in it may be
    /// mutated (through this or any aliasing handle) while the borrow is
    /// live.
    #[inline]
    pub(crate) unsafe fn slice_at(&self, abs: usize, len: usize) -> &[u8] {
        // SAFETY: in bounds and unaliased-for-writes per the caller; the
        // storage outlives `self`, hence the borrow.
        unsafe { core::slice::from_raw_parts(self.buf.as_ptr().add(abs), len) }
    }
}

impl<A: Access> Iobuf<A, Seek> {
    /// Moves the window's lower edge up by `n`: `lo ← lo + n`.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.length() {
            return Err(Error::Bounds {
                start: n,
                end: n,
                avail: self.length(),
            });
        }
        self.lo += n;
        Ok(())
    }

    /// [`advance`](Iobuf::advance) without the bounds check.
    ///
    /// # Safety
    ///
    /// `n` must not exceed [`length`](Iobuf::length). Violating this
    /// breaks the index ordering invariant, after which checked accessors
    /// may compute wrong bounds and unchecked ones may touch memory
    /// outside the allocation.
    #[inline]
    pub unsafe fn unsafe_advance(&mut self, n: usize) {
        self.lo += n;
    }

    /// Sets the window's length: `hi ← lo + len`.
    pub fn resize(&mut self, len: usize) -> Result<()> {
        let room = self.hi_max - self.lo;
        if len > room {
            return Err(Error::Bounds {
                start: 0,
                end: len,
                avail: room,
            });
        }
        self.hi = self.lo + len;
        Ok(())
    }

    /// [`resize`](Iobuf::resize) without the bounds check.
    ///
    /// # Safety
    ///
    /// `lo + len` must not exceed `hi_max`; see
    /// [`unsafe_advance`](Iobuf::unsafe_advance) for the consequences.
    #[inline]
    pub unsafe fn unsafe_resize(&mut self, len: usize) {
        self.hi = self.lo + len;
    }

    /// Shrinks both limits to the window: `lo_min ← lo`, `hi_max ← hi`.
    ///
    /// The retired ranges are permanently inaccessible through this
    /// handle.
    pub fn narrow(&mut self) {
        self.lo_min = self.lo;
        self.hi_max = self.hi;
    }

    /// Shrinks the lower limit to the window: `lo_min ← lo`.
    pub fn narrow_lo(&mut self) {
        self.lo_min = self.lo;
    }

    /// Shrinks the upper limit to the window: `hi_max ← hi`.
    pub fn narrow_hi(&mut self) {
        self.hi_max = self.hi;
    }

    /// Moves the window's lower edge back to the lower limit.
    pub fn rewind(&mut self) {
        self.lo = self.lo_min;
    }

    /// Restores the window to the full limits.
    pub fn reset(&mut self) {
        self.lo = self.lo_min;
        self.hi = self.hi_max;
    }

    /// Exposes the bytes filled so far for consumption: `hi ← lo`,
    /// `lo ← lo_min`.
    ///
    /// After a sequence of fills, the new window covers exactly the bytes
    /// written since the lower limit.
    pub fn flip_lo(&mut self) {
        self.hi = self.lo;
        self.lo = self.lo_min;
    }

    /// Exposes the unfilled tail: `lo ← hi`, `hi ← hi_max`. Dual of
    /// [`flip_lo`](Iobuf::flip_lo).
    pub fn flip_hi(&mut self) {
        self.lo = self.hi;
        self.hi = self.hi_max;
    }

    /// As [`flip_lo`](Iobuf::flip_lo), but the new lower edge comes from
    /// `bound` instead of the lower limit.
    pub fn bounded_flip_lo(&mut self, bound: LoBound) -> Result<()> {
        if bound.pos < self.lo_min || bound.pos > self.lo {
            return Err(Error::Bounds {
                start: bound.pos,
                end: bound.pos,
                avail: self.lo - self.lo_min,
            });
        }
        self.hi = self.lo;
        self.lo = bound.pos;
        Ok(())
    }

    /// As [`flip_hi`](Iobuf::flip_hi), but the new upper edge comes from
    /// `bound` instead of the upper limit.
    pub fn bounded_flip_hi(&mut self, bound: HiBound) -> Result<()> {
        if bound.pos < self.hi || bound.pos > self.hi_max {
            return Err(Error::Bounds {
                start: bound.pos,
                end: bound.pos,
                avail: self.hi_max - self.hi,
            });
        }
        self.lo = self.hi;
        self.hi = bound.pos;
        Ok(())
    }

    /// Restores a previously captured lower edge: `lo ← bound`.
    ///
    /// Fails if the position has fallen outside `[lo_min, hi]`, which can
    /// happen after an intervening `narrow` or `resize`.
    pub fn restore_lo_bound(&mut self, bound: LoBound) -> Result<()> {
        if bound.pos < self.lo_min || bound.pos > self.hi {
            return Err(Error::Bounds {
                start: bound.pos,
                end: bound.pos,
                avail: self.hi - self.lo_min,
            });
        }
        self.lo = bound.pos;
        Ok(())
    }

    /// Restores a previously captured upper edge: `hi ← bound`.
    pub fn restore_hi_bound(&mut self, bound: HiBound) -> Result<()> {
        if bound.pos < self.lo || bound.pos > self.hi_max {
            return Err(Error::Bounds {
                start: bound.pos,
                end: bound.pos,
                avail: self.hi_max - self.lo,
            });
        }
        self.hi = bound.pos;
        Ok(())
    }
}

impl<A: Writable> Iobuf<A, Seek> {
    /// Salvages the unread window down to the lower limit, freeing the
    /// rest of the limits for fresh fills.
    ///
    /// The window bytes move (memmove) to start at `lo_min`; afterwards
    /// `lo` sits just past them and `hi` is back at the upper limit, so
    /// the buffer is ready for more fills without losing unconsumed data.
    pub fn compact(&mut self) {
        let len = self.length();
        // SAFETY: `[lo, lo + len)` and `[lo_min, lo_min + len)` both lie
        // inside the storage by the field invariant (`len ≤ hi_max - lo_min`
        // and `lo_min + len ≤ lo + len = hi ≤ buf.len()`).
        unsafe { self.buf.copy_within(self.lo, self.lo_min, len) };
        self.lo = self.lo_min + len;
        self.hi = self.hi_max;
    }

    /// As [`compact`](Iobuf::compact), but the destination floor and the
    /// restored upper edge come from snapshots instead of the limits.
    pub fn bounded_compact(&mut self, lo_bound: LoBound, hi_bound: HiBound) -> Result<()> {
        let len = self.length();
        let floor = lo_bound.pos;
        let ceil = hi_bound.pos;
        if floor < self.lo_min || ceil > self.hi_max || floor > ceil || len > ceil - floor {
            return Err(Error::Bounds {
                start: floor,
                end: ceil,
                avail: self.capacity(),
            });
        }
        // SAFETY: `[lo, lo + len)` is the window; `[floor, floor + len)`
        // is inside the limits per the check above.
        unsafe { self.buf.copy_within(self.lo, floor, len) };
        self.lo = floor + len;
        self.hi = ceil;
        Ok(())
    }

    /// Overwrites this handle's storage and all four indices with
    /// `src`'s, making the two handles explicit aliases.
    ///
    /// Both sides must carry write permission, so a read-only view can
    /// never be laundered into a writable one through this operation.
    pub fn set_bounds_and_buffer<A2: Writable, S2: Seekness>(&mut self, src: &Iobuf<A2, S2>) {
        self.buf = src.buf.clone();
        self.lo_min = src.lo_min;
        self.lo = src.lo;
        self.hi = src.hi;
        self.hi_max = src.hi_max;
    }

    /// As [`set_bounds_and_buffer`](Iobuf::set_bounds_and_buffer)
    /// followed by narrowing to the window subrange `[pos, pos + len)` of
    /// `src`, in one step.
    pub fn set_bounds_and_buffer_sub<A2: Writable, S2: Seekness>(
        &mut self,
        src: &Iobuf<A2, S2>,
        pos: usize,
        len: usize,
    ) -> Result<()> {
        src.check_window(pos, len)?;
        let lo = src.lo + pos;
        self.buf = src.buf.clone();
        self.lo_min = lo;
        self.lo = lo;
        self.hi = lo + len;
        self.hi_max = lo + len;
        Ok(())
    }
}

impl<A: Readable, S: Seekness> Iobuf<A, S> {
    /// CRC-32 (IEEE) of the window.
    pub fn crc32(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        // SAFETY: the window lies inside the storage by the field
        // invariant, and nothing mutates the storage while the borrow is
        // confined to this call.
        hasher.update(unsafe { self.slice_at(self.lo, self.length()) });
        hasher.finalize()
    }
}

impl<A: Access, S: Seekness> Clone for Iobuf<A, S> {
    /// Creates an alias: shared storage, independent copy of the window
    /// and limits.
    fn clone(&self) -> Self {
        Iobuf {
            buf: self.buf.clone(),
            lo_min: self.lo_min,
            lo: self.lo,
            hi: self.hi,
            hi_max: self.hi_max,
            _caps: PhantomData,
        }
    }
}

impl<A: Access, S: Seekness> fmt::Debug for Iobuf<A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iobuf")
            .field("lo_min", &self.lo_min)
            .field("lo", &self.lo)
            .field("hi", &self.hi)
            .field("hi_max", &self.hi_max)
            .field("len", &self.length())
            .field("cap", &self.capacity())
            .finish()
    }
}

/// Raw view of an iobuf's storage and indices.
///
/// For zero-allocation syscall wrappers that need the backing pointer and
/// absolute indices. The core does not defend against writes done behind
/// its back: a caller that writes through [`buf`](Expert::buf) must itself
/// stay within the limits, and one that moves indices must re-establish
/// the ordering invariant before returning control to safe code.
pub struct Expert<'a, A: Access, S: Seekness> {
    t: &'a mut Iobuf<A, S>,
}

impl<'a, A: Access, S: Seekness> Expert<'a, A, S> {
    /// The backing storage handle.
    #[inline]
    pub fn buf(&self) -> &Bigstring {
        &self.t.buf
    }

    /// Absolute lower limit.
    #[inline]
    pub fn lo_min(&self) -> usize {
        self.t.lo_min
    }

    /// Absolute window lower edge.
    #[inline]
    pub fn lo(&self) -> usize {
        self.t.lo
    }

    /// Absolute window upper edge.
    #[inline]
    pub fn hi(&self) -> usize {
        self.t.hi
    }

    /// Absolute upper limit.
    #[inline]
    pub fn hi_max(&self) -> usize {
        self.t.hi_max
    }

    /// Sets the window's lower edge directly.
    ///
    /// # Safety
    ///
    /// The caller must keep `lo_min ≤ lo ≤ hi`.
    #[inline]
    pub unsafe fn set_lo(&mut self, lo: usize) {
        self.t.lo = lo;
    }

    /// Sets the window's upper edge directly.
    ///
    /// # Safety
    ///
    /// The caller must keep `lo ≤ hi ≤ hi_max`.
    #[inline]
    pub unsafe fn set_hi(&mut self, hi: usize) {
        self.t.hi = hi;
    }

    /// Sets the lower limit directly.
    ///
    /// # Safety
    ///
    /// The caller must keep `0 ≤ lo_min ≤ lo`, and must not widen the
    /// limits below what the handle was created with.
    #[inline]
    pub unsafe fn set_lo_min(&mut self, lo_min: usize) {
        self.t.lo_min = lo_min;
    }

    /// Sets the upper limit directly.
    ///
    /// # Safety
    ///
    /// The caller must keep `hi ≤ hi_max ≤ buf.len()`, and must not widen
    /// the limits beyond what the handle was created with.
    #[inline]
    pub unsafe fn set_hi_max(&mut self, hi_max: usize) {
        self.t.hi_max = hi_max;
    }

    /// Borrows the window as a byte slice.
    ///
    /// # Safety
    ///
    /// No aliasing handle may mutate the window's bytes while the borrow
    /// is live.
    #[inline]
    pub unsafe fn window_slice(&self) -> &[u8]
    where
        A: Readable,
    {
        // SAFETY: the window is in bounds by the field invariant;
        // unaliased-for-writes per the caller.
        unsafe { self.t.slice_at(self.t.lo, self.t.hi - self.t.lo) }
    }

    /// Borrows the window as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// No aliasing handle may access the window's bytes at all while the
    /// borrow is live.
    #[inline]
    pub unsafe fn window_slice_mut(&mut self) -> &mut [u8]
    where
        A: Writable,
    {
        // SAFETY: in bounds by the field invariant; exclusive per the
        // caller.
        unsafe {
            core::slice::from_raw_parts_mut(self.t.window_ptr(), self.t.hi - self.t.lo)
        }
    }
}

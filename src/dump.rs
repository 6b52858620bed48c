//! Human-readable hex dumps.

use core::fmt::Write as _;

use crate::access::{Readable, Seekness};
use crate::iobuf::Iobuf;

/// Which byte range a dump covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The window, `[lo, hi)`.
    Window,
    /// The limits, `[lo_min, hi_max)`.
    Limits,
    /// The whole backing storage.
    Whole,
}

const BYTES_PER_LINE: usize = 16;

impl<A: Readable, S: Seekness> Iobuf<A, S> {
    /// Renders the chosen region as a multi-line hex+ASCII dump.
    ///
    /// Bytes outside the window are listed but marked, so a dump of the
    /// limits shows where the window sits. The format is informational
    /// and not a stable contract.
    pub fn to_string_hum(&self, region: Region) -> String {
        let (start, end) = match region {
            Region::Window => (self.lo, self.hi),
            Region::Limits => (self.lo_min, self.hi_max),
            Region::Whole => (0, self.buf.len()),
        };
        // SAFETY: every region is inside the storage by the field
        // invariant, and the borrow is confined to this call.
        let bytes = unsafe { self.slice_at(start, end - start) };

        let mut out = String::new();
        let _ = writeln!(
            out,
            "iobuf {{ lo_min: {}, lo: {}, hi: {}, hi_max: {} }}",
            self.lo_min, self.lo, self.hi, self.hi_max
        );
        for (chunk_idx, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
            let base = start + chunk_idx * BYTES_PER_LINE;
            let _ = write!(out, "{base:08x} ");
            for (i, b) in chunk.iter().enumerate() {
                let abs = base + i;
                // An asterisk flags bytes outside the window.
                let mark = if abs >= self.lo && abs < self.hi { ' ' } else { '*' };
                let _ = write!(out, "{mark}{b:02x}");
            }
            for _ in chunk.len()..BYTES_PER_LINE {
                let _ = write!(out, "   ");
            }
            let _ = write!(out, "  |");
            for b in chunk {
                let c = if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                };
                out.push(c);
            }
            out.push('|');
            out.push('\n');
        }
        out
    }
}

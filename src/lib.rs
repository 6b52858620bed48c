#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub use access::{Access, NoSeek, ReadOnly, ReadWrite, Readable, Seek, Seekness, Writable};
pub use bigstring::Bigstring;
pub use dump::Region;
pub use iobuf::{Expert, HiBound, Iobuf, LoBound};
pub use scalar::Scalar;

mod access;
mod accessors;
mod bigstring;
pub mod bin_prot;
pub mod blit;
mod dump;
mod iobuf;
mod scalar;
#[cfg(unix)]
pub mod unix;

/// Error returned by checked accessors and bound mutators.
///
/// Syscall adapters in [`unix`] report [`std::io::Error`] instead, so the
/// raw OS result (including `EAGAIN` and `EINTR`) reaches the caller
/// untransformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested range falls outside the window, or outside the limits
    /// for a bound mutator. Reported before any state is mutated.
    #[error("range [{start}..{end}) out of bounds of {avail}-byte window")]
    Bounds {
        /// Start of the rejected range, window-relative.
        start: usize,
        /// End of the rejected range, window-relative.
        end: usize,
        /// Bytes actually available.
        avail: usize,
    },
    /// The window does not hold a complete length-prefixed frame yet.
    ///
    /// Recoverable: the window is left untouched so the caller can retry
    /// once more bytes have arrived.
    #[error("incomplete frame: need {need} bytes, window has {have}")]
    Framing {
        /// Bytes the complete frame occupies, prefix included.
        need: usize,
        /// Bytes currently in the window.
        have: usize,
    },
    /// The bytes at the cursor do not form a decimal integer.
    #[error("no decimal integer at the cursor")]
    Decimal,
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

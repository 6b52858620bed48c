//! Compile-time capability markers.
//!
//! An [`Iobuf`](crate::Iobuf) carries two phantom capabilities: a data
//! permission ([`ReadOnly`] or [`ReadWrite`]) gating byte access, and a
//! seek permission ([`Seek`] or [`NoSeek`]) gating window and limit
//! movement. The markers are uninhabited types with no runtime
//! representation; operations are gated by trait bounds on `impl` blocks,
//! so a violation is a compile error, not a check.
//!
//! Capabilities only ever weaken: a `ReadWrite` handle coerces to
//! `ReadOnly` and a `Seek` handle to `NoSeek`, both for free, and there is
//! no way back.

mod sealed {
    pub trait Sealed {}
}

/// Data permission: the bytes may be read but not written.
pub enum ReadOnly {}

/// Data permission: the bytes may be read and written.
pub enum ReadWrite {}

/// Seek permission: the window and limits may be moved.
pub enum Seek {}

/// Seek permission: the window and limits are frozen.
///
/// Bytes inside the window can still be read (and written, given
/// [`ReadWrite`]) through the positional `peek_*`/`poke_*` accessors,
/// which is what makes `NoSeek` sub-views safe to hand to sub-parsers.
pub enum NoSeek {}

/// A data permission marker.
pub trait Access: sealed::Sealed {}

/// Data permissions that allow reading bytes.
pub trait Readable: Access {}

/// Data permissions that allow writing bytes.
pub trait Writable: Readable {}

/// A seek permission marker.
pub trait Seekness: sealed::Sealed {}

impl sealed::Sealed for ReadOnly {}
impl Access for ReadOnly {}
impl Readable for ReadOnly {}

impl sealed::Sealed for ReadWrite {}
impl Access for ReadWrite {}
impl Readable for ReadWrite {}
impl Writable for ReadWrite {}

impl sealed::Sealed for Seek {}
impl Seekness for Seek {}

impl sealed::Sealed for NoSeek {}
impl Seekness for NoSeek {}

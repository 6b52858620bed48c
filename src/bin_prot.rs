//! Length-prefixed bin-prot framing.
//!
//! The collaborating serializer provides unframed codecs through
//! [`BinProtWrite`] and [`BinProtRead`]; this layer owns the framing: a
//! 4-byte little-endian length prefix followed by the payload. (The
//! higher-level framed reader/writer uses an 8-byte prefix; the two
//! formats are intentionally incompatible and are not reconciled here.)

use crate::access::{Readable, Seek, Writable};
use crate::iobuf::Iobuf;
use crate::{Error, Result};

/// A value with an unframed binary encoding of known size.
pub trait BinProtWrite {
    /// Exact length of the encoding in bytes.
    fn bin_size(&self) -> usize;

    /// Writes the encoding into `buf`, which holds exactly
    /// [`bin_size`](BinProtWrite::bin_size) bytes, and returns the number
    /// of bytes written.
    fn bin_write(&self, buf: &mut [u8]) -> usize;
}

/// A value decodable from an unframed binary encoding.
pub trait BinProtRead: Sized {
    /// Decodes a value from the start of `buf`, returning it along with
    /// the number of bytes consumed.
    fn bin_read(buf: &[u8]) -> Result<(Self, usize)>;
}

impl<A: Writable> Iobuf<A, Seek> {
    /// Writes `v` as a 4-byte little-endian length prefix followed by its
    /// encoding, advancing past the total. Fails without writing anything
    /// if the window cannot hold prefix plus payload.
    pub fn fill_bin_prot<T: BinProtWrite>(&mut self, v: &T) -> Result<()> {
        let size = v.bin_size();
        let total = size.checked_add(4).ok_or(Error::Bounds {
            start: 0,
            end: usize::MAX,
            avail: self.length(),
        })?;
        self.check_window(0, total)?;
        if size > u32::MAX as usize {
            return Err(Error::Bounds {
                start: 4,
                end: total,
                avail: self.length(),
            });
        }
        // SAFETY: the window holds `total ≥ 4` bytes per the check above.
        unsafe { self.poke_le_unchecked::<u32>(0, size as u32) };
        let written = {
            // SAFETY: `[4, 4 + size)` is inside the window per the check
            // above, and the exclusive borrow of `self` pins this as the
            // only live access to those bytes.
            let payload =
                unsafe { core::slice::from_raw_parts_mut(self.window_ptr().add(4), size) };
            v.bin_write(payload)
        };
        debug_assert_eq!(written, size);
        // SAFETY: `total ≤ length` per the check above.
        unsafe { self.unsafe_advance(total) };
        Ok(())
    }
}

impl<A: Readable> Iobuf<A, Seek> {
    /// Reads a 4-byte little-endian length prefix and then that many
    /// bytes as a value, advancing past the total.
    ///
    /// An incomplete frame leaves the window untouched and reports
    /// [`Error::Framing`], so the caller can retry once more bytes have
    /// arrived.
    pub fn consume_bin_prot<T: BinProtRead>(&mut self) -> Result<T> {
        let have = self.length();
        if have < 4 {
            return Err(Error::Framing { need: 4, have });
        }
        // SAFETY: the window holds at least 4 bytes per the check above.
        let size = unsafe { self.peek_le_unchecked::<u32>(0) } as usize;
        let total = size.checked_add(4).ok_or(Error::Framing {
            need: usize::MAX,
            have,
        })?;
        if have < total {
            return Err(Error::Framing { need: total, have });
        }
        let v = {
            // SAFETY: `[4, 4 + size)` is inside the window per the check
            // above; the borrow is confined to the decode call.
            let payload = unsafe { self.slice_at(self.lo + 4, size) };
            T::bin_read(payload)?.0
        };
        // SAFETY: `total ≤ length` per the check above.
        unsafe { self.unsafe_advance(total) };
        Ok(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Iobuf;

    /// A little request record with a hand-rolled encoding: sequence
    /// number, then a length byte, then that many name bytes.
    #[derive(Debug, PartialEq, Eq)]
    struct Request {
        seq: u32,
        name: Vec<u8>,
    }

    impl BinProtWrite for Request {
        fn bin_size(&self) -> usize {
            4 + 1 + self.name.len()
        }

        fn bin_write(&self, buf: &mut [u8]) -> usize {
            buf[..4].copy_from_slice(&self.seq.to_le_bytes());
            buf[4] = self.name.len() as u8;
            buf[5..5 + self.name.len()].copy_from_slice(&self.name);
            5 + self.name.len()
        }
    }

    impl BinProtRead for Request {
        fn bin_read(buf: &[u8]) -> crate::Result<(Self, usize)> {
            let short = |need: usize| crate::Error::Framing {
                need,
                have: buf.len(),
            };
            if buf.len() < 5 {
                return Err(short(5));
            }
            let seq = u32::from_le_bytes(buf[..4].try_into().unwrap());
            let n = buf[4] as usize;
            let name = buf.get(5..5 + n).ok_or(short(5 + n))?.to_vec();
            Ok((Request { seq, name }, 5 + n))
        }
    }

    #[test]
    fn framed_round_trip() {
        let v = Request {
            seq: 7,
            name: b"connect".to_vec(),
        };
        let mut t = Iobuf::create(64);
        t.fill_bin_prot(&v).unwrap();
        t.flip_lo();
        assert_eq!(t.length(), 4 + v.bin_size());
        assert_eq!(t.consume_bin_prot::<Request>().unwrap(), v);
        assert!(t.is_empty());
    }

    #[test]
    fn prefix_is_little_endian() {
        let v = Request {
            seq: 1,
            name: vec![],
        };
        let mut t = Iobuf::create(16);
        t.fill_bin_prot(&v).unwrap();
        t.flip_lo();
        assert_eq!(t.peek_le::<u32>(0).unwrap(), v.bin_size() as u32);
    }

    #[test]
    fn incomplete_frame_is_retryable() {
        let v = Request {
            seq: 9,
            name: b"xy".to_vec(),
        };
        let mut full = Iobuf::create(32);
        full.fill_bin_prot(&v).unwrap();
        full.flip_lo();
        let encoded = full.peek_bytes(0, full.length()).unwrap();

        // Deliver all but the last byte: the frame is incomplete.
        let mut t = Iobuf::of_bytes(&encoded[..encoded.len() - 1]);
        let err = t.consume_bin_prot::<Request>().unwrap_err();
        assert_eq!(
            err,
            crate::Error::Framing {
                need: encoded.len(),
                have: encoded.len() - 1,
            }
        );
        // Window untouched, so the parse can be retried.
        assert_eq!(t.length(), encoded.len() - 1);

        // Fewer than 4 bytes cannot even hold the prefix.
        let mut t = Iobuf::of_bytes(&encoded[..3]);
        assert_eq!(
            t.consume_bin_prot::<Request>().unwrap_err(),
            crate::Error::Framing { need: 4, have: 3 }
        );
    }

    #[test]
    fn fill_rejects_short_window_without_writing() {
        let v = Request {
            seq: 3,
            name: b"abcdef".to_vec(),
        };
        let mut t = Iobuf::create(8);
        assert!(t.fill_bin_prot(&v).is_err());
        assert_eq!(t.length(), 8);
        assert_eq!(t.peek_be::<u64>(0).unwrap(), 0);
    }

    #[test]
    fn back_to_back_frames() {
        let a = Request {
            seq: 1,
            name: b"a".to_vec(),
        };
        let b = Request {
            seq: 2,
            name: b"bb".to_vec(),
        };
        let mut t = Iobuf::create(64);
        t.fill_bin_prot(&a).unwrap();
        t.fill_bin_prot(&b).unwrap();
        t.flip_lo();
        assert_eq!(t.consume_bin_prot::<Request>().unwrap(), a);
        assert_eq!(t.consume_bin_prot::<Request>().unwrap(), b);
        assert!(t.is_empty());
    }
}

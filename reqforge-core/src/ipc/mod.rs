//! Zero-copy message passing between the engine and an embedding host.
//!
//! Two transports share one wire format:
//!
//! * [`MessageArena`] is an append-only bump region. Writers reserve space
//!   with a lock-free cursor, fill the payload in place and commit it;
//!   readers get a borrowed slice back after the header is verified.
//! * [`SharedChannel`] is a single-slot request/response mailbox for a
//!   synchronous caller on the other side of the boundary.
//!
//! Every message, whether in the arena or in a channel region, is preceded by
//! a 16-byte little-endian header:
//!
//! ```text
//!  0        4        8        12       16
//! +--------+--------+--------+--------+----------------------+
//! | magic  | length |checksum| flags  | payload (length)     |
//! +--------+--------+--------+--------+----------------------+
//!                                      padded to 16 bytes
//! ```
//!
//! `checksum` is XXH32 of the payload seeded with the magic, computed after
//! the payload is written. A reader recomputes it before trusting the bytes.

pub mod arena;
pub mod channel;

pub use arena::{ArenaSlot, MessageArena, MessageRef, Messages};
pub use channel::SharedChannel;

use thiserror::Error;

/// ASCII `REAV`, most significant byte first.
pub const MAGIC: u32 = 0x5245_4156;
/// Size of the message header.
pub const HEADER_SIZE: usize = 16;
/// Payload alignment; headers therefore always start on a 16-byte boundary.
pub const ALIGN: usize = 16;
/// Default arena size: 4 MiB.
pub const DEFAULT_CAPACITY: usize = 1 << 22;
/// Set once the payload and checksum are in place.
pub const FLAG_COMMITTED: u32 = 1;
/// Set when a reserved slot was dropped without being committed.
pub const FLAG_DISCARDED: u32 = 2;

/// Arena and channel integrity failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// Not enough space left for the header and the aligned payload.
    #[error("arena full: {requested} bytes requested, {remaining} remaining")]
    Full {
        /// Bytes the allocation needed, header included.
        requested: usize,
        /// Bytes left in the arena.
        remaining: usize,
    },

    /// The payload does not fit the length field or the region.
    #[error("message of {size} bytes exceeds the {max} byte maximum")]
    TooLarge {
        /// Requested payload size.
        size: usize,
        /// Largest payload allowed.
        max: usize,
    },

    /// The offset is not the start of a message in the written region.
    #[error("no message header at offset {offset}")]
    OutOfBounds {
        /// Offending offset.
        offset: usize,
    },

    /// The header does not start with [`MAGIC`].
    #[error("bad magic {found:#010x} at offset {offset}")]
    BadMagic {
        /// Header offset.
        offset: usize,
        /// Value found instead.
        found: u32,
    },

    /// The message was reserved but never committed.
    #[error("message at offset {offset} is not committed")]
    Uncommitted {
        /// Header offset.
        offset: usize,
    },

    /// The payload does not hash to the stored checksum.
    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Checksum of the bytes found.
        actual: u32,
    },

    /// The response did not fit the channel's response region.
    #[error("response of {size} bytes exceeds the {max} byte region")]
    ResponseTooLarge {
        /// Response size.
        size: usize,
        /// Region size.
        max: usize,
    },
}

/// XXH32 of `payload`, seeded with [`MAGIC`].
pub fn checksum(payload: &[u8]) -> u32 {
    xxhash_rust::xxh32::xxh32(payload, MAGIC)
}

/// Rounds `size` up to the next multiple of [`ALIGN`].
pub const fn align_up(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Always [`MAGIC`] for a valid header.
    pub magic: u32,
    /// Payload length in bytes, before padding.
    pub length: u32,
    /// XXH32 of the payload.
    pub checksum: u32,
    /// [`FLAG_COMMITTED`] once published.
    pub flags: u32,
}

impl MessageHeader {
    /// Little-endian encoding.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.length.to_le_bytes());
        out[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Decodes the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let word = |i: usize| -> Option<u32> {
            let raw: [u8; 4] = bytes.get(i..i + 4)?.try_into().ok()?;
            Some(u32::from_le_bytes(raw))
        };
        Some(Self {
            magic: word(0)?,
            length: word(4)?,
            checksum: word(8)?,
            flags: word(12)?,
        })
    }

    /// Size of the header plus the padded payload.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + align_up(self.length as usize)
    }
}

/// Verifies the message at `offset` in a copied byte buffer and returns its
/// payload.
///
/// This is the reader for the far side of a process boundary, where the bytes
/// of [`MessageArena::committed`] arrive as a plain buffer.
pub fn decode_at(buf: &[u8], offset: usize) -> Result<&[u8], ArenaError> {
    if offset % ALIGN != 0 {
        return Err(ArenaError::OutOfBounds { offset });
    }
    let header = buf
        .get(offset..)
        .and_then(MessageHeader::from_bytes)
        .ok_or(ArenaError::OutOfBounds { offset })?;
    verify(&header, offset, buf.get(offset + HEADER_SIZE..))
}

pub(crate) fn verify<'a>(
    header: &MessageHeader,
    offset: usize,
    rest: Option<&'a [u8]>,
) -> Result<&'a [u8], ArenaError> {
    if header.magic != MAGIC {
        return Err(ArenaError::BadMagic {
            offset,
            found: header.magic,
        });
    }
    if header.flags & FLAG_COMMITTED == 0 {
        return Err(ArenaError::Uncommitted { offset });
    }
    let payload = rest
        .and_then(|r| r.get(..header.length as usize))
        .ok_or(ArenaError::OutOfBounds { offset })?;

    let actual = checksum(payload);
    if actual != header.checksum {
        return Err(ArenaError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(payload: &[u8]) -> Vec<u8> {
        let header = MessageHeader {
            magic: MAGIC,
            length: payload.len() as u32,
            checksum: checksum(payload),
            flags: FLAG_COMMITTED,
        };
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf.resize(header.frame_len(), 0);
        buf
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 16);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(17), 32);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = MessageHeader {
            magic: MAGIC,
            length: 5,
            checksum: 0xAABBCCDD,
            flags: FLAG_COMMITTED,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"VAER");
        assert_eq!(&bytes[4..8], &[5, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(MessageHeader::from_bytes(&bytes), Some(header));
        assert_eq!(MessageHeader::from_bytes(&bytes[..10]), None);
    }

    #[test]
    fn test_checksum_is_seeded() {
        assert_eq!(checksum(b"abc"), xxhash_rust::xxh32::xxh32(b"abc", MAGIC));
        assert_ne!(checksum(b"abc"), xxhash_rust::xxh32::xxh32(b"abc", 0));
    }

    #[test]
    fn test_decode_at() {
        let mut buf = encoded(b"first");
        let second = buf.len();
        buf.extend_from_slice(&encoded(b"second message"));

        assert_eq!(decode_at(&buf, 0).unwrap(), b"first");
        assert_eq!(decode_at(&buf, second).unwrap(), b"second message");
        assert_eq!(decode_at(&buf, 4), Err(ArenaError::OutOfBounds { offset: 4 }));
        assert_eq!(
            decode_at(&buf, buf.len()),
            Err(ArenaError::OutOfBounds { offset: buf.len() })
        );
    }

    #[test]
    fn test_decode_detects_corruption() {
        let mut buf = encoded(b"payload");
        buf[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            decode_at(&buf, 0),
            Err(ArenaError::ChecksumMismatch { .. })
        ));

        let mut buf = encoded(b"payload");
        buf[0] = 0;
        assert!(matches!(decode_at(&buf, 0), Err(ArenaError::BadMagic { .. })));

        let mut buf = encoded(b"payload");
        buf[12] = 0;
        assert_eq!(decode_at(&buf, 0), Err(ArenaError::Uncommitted { offset: 0 }));
    }
}

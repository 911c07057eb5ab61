//! Append-only message arena.
//!
//! ```text
//! allocate(n) ──CAS──→ reserve [offset, offset + 16 + align(n))
//!      │                 header: magic, length, flags = 0
//!      ▼
//! ArenaSlot (&mut payload) ──commit──→ checksum, flags = COMMITTED (release)
//!                                            │
//! read(MessageRef) ←── acquire flags ────────┘
//! ```
//!
//! Allocation is a single compare-and-swap on the write cursor, so any number
//! of threads can fill disjoint slots at once. A message is only readable
//! after its slot is committed; a slot dropped without committing is marked
//! discarded and skipped by iteration.

use super::{
    align_up, checksum, verify, ArenaError, MessageHeader, ALIGN, DEFAULT_CAPACITY,
    FLAG_COMMITTED, FLAG_DISCARDED, HEADER_SIZE, MAGIC,
};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};

const WORD_MAGIC: usize = 0;
const WORD_LENGTH: usize = 1;
const WORD_CHECKSUM: usize = 2;
const WORD_FLAGS: usize = 3;

#[repr(C, align(16))]
struct Block(UnsafeCell<[u8; ALIGN]>);

/// A fixed-size bump arena of checksummed messages.
///
/// # Examples
///
/// ```
/// use reqforge_core::ipc::MessageArena;
///
/// let arena = MessageArena::new(1024);
///
/// let mut slot = arena.allocate(5).unwrap();
/// slot.copy_from_slice(b"hello");
/// let msg = slot.commit();
///
/// assert_eq!(arena.read(&msg).unwrap(), b"hello");
/// assert_eq!(arena.used(), 32);
/// ```
pub struct MessageArena {
    blocks: Box<[Block]>,
    write_offset: AtomicUsize,
    capacity: usize,
}

// SAFETY: slots cover disjoint byte ranges and header words are only touched atomically.
unsafe impl Sync for MessageArena {}

impl MessageArena {
    /// Creates an arena of `capacity` bytes, rounded down to a multiple of 16.
    pub fn new(capacity: usize) -> Self {
        let blocks = (0..capacity / ALIGN)
            .map(|_| Block(UnsafeCell::new([0; ALIGN])))
            .collect::<Box<[_]>>();
        Self {
            capacity: blocks.len() * ALIGN,
            blocks,
            write_offset: AtomicUsize::new(0),
        }
    }

    /// Total size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes reserved so far, headers and padding included.
    pub fn used(&self) -> usize {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used()
    }

    /// Reserves room for a `size` byte payload.
    ///
    /// The payload starts zeroed. Fill it through the returned slot and call
    /// [`ArenaSlot::commit`] to publish it.
    pub fn allocate(&self, size: usize) -> Result<ArenaSlot<'_>, ArenaError> {
        let max = self
            .capacity
            .saturating_sub(HEADER_SIZE)
            .min(u32::MAX as usize);
        if size > max {
            return Err(ArenaError::TooLarge { size, max });
        }

        let padded = align_up(size);
        let needed = HEADER_SIZE + padded;
        let mut current = self.write_offset.load(Ordering::Acquire);
        loop {
            let end = current + needed;
            if end > self.capacity {
                return Err(ArenaError::Full {
                    requested: needed,
                    remaining: self.capacity - current,
                });
            }
            match self.write_offset.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let offset = current;
        self.word(offset, WORD_MAGIC).store(MAGIC, Ordering::Relaxed);
        self.word(offset, WORD_LENGTH)
            .store(size as u32, Ordering::Relaxed);
        self.word(offset, WORD_CHECKSUM).store(0, Ordering::Relaxed);
        self.word(offset, WORD_FLAGS).store(0, Ordering::Release);

        // SAFETY: [offset + 16, offset + 16 + padded) was reserved by the CAS
        // above and no other slot or reader touches it until commit.
        let payload = unsafe {
            let start = self.base().add(offset + HEADER_SIZE);
            std::ptr::write_bytes(start, 0, padded);
            std::slice::from_raw_parts_mut(start, size)
        };

        Ok(ArenaSlot {
            arena: self,
            offset,
            payload,
            committed: false,
        })
    }

    /// Copies `payload` into a new message and commits it.
    pub fn write(&self, payload: &[u8]) -> Result<MessageRef<'_>, ArenaError> {
        let mut slot = self.allocate(payload.len())?;
        slot.copy_from_slice(payload);
        Ok(slot.commit())
    }

    /// Returns the payload of a committed message.
    pub fn read(&self, msg: &MessageRef<'_>) -> Result<&[u8], ArenaError> {
        if !std::ptr::eq(msg.arena, self) {
            return Err(ArenaError::OutOfBounds { offset: msg.offset });
        }
        self.verify_at(msg.offset)
    }

    /// Returns the payload of the message whose header starts at `offset`.
    ///
    /// The offset must be a message boundary: reachable from the start of the
    /// arena by walking committed headers.
    pub fn read_at(&self, offset: usize) -> Result<&[u8], ArenaError> {
        let end = self.used();
        if offset % ALIGN != 0 || offset + HEADER_SIZE > end {
            return Err(ArenaError::OutOfBounds { offset });
        }

        let mut cursor = 0;
        while cursor < offset {
            match self.frame_len_at(cursor) {
                Some(len) => cursor += len,
                None => return Err(ArenaError::OutOfBounds { offset }),
            }
        }
        if cursor != offset {
            return Err(ArenaError::OutOfBounds { offset });
        }
        self.verify_at(offset)
    }

    /// Iterates over committed messages in write order.
    ///
    /// Iteration stops at the first slot that is still being filled.
    pub fn messages(&self) -> Messages<'_> {
        Messages {
            arena: self,
            cursor: 0,
            end: self.used(),
        }
    }

    /// The bytes of the longest prefix of finished messages.
    ///
    /// Every header in the returned slice can be decoded with
    /// [`decode_at`](super::decode_at); discarded slots report
    /// [`ArenaError::Uncommitted`].
    pub fn committed(&self) -> &[u8] {
        let end = self.used();
        let mut cursor = 0;
        while cursor + HEADER_SIZE <= end {
            match self.frame_len_at(cursor) {
                Some(len) => cursor += len,
                None => break,
            }
        }
        // SAFETY: every message below `cursor` is committed or discarded and
        // no longer written.
        unsafe { std::slice::from_raw_parts(self.base(), cursor) }
    }

    /// Discards every message and rewinds the cursor.
    pub fn reset(&mut self) {
        for block in self.blocks.iter_mut() {
            *block.0.get_mut() = [0; ALIGN];
        }
        *self.write_offset.get_mut() = 0;
        fence(Ordering::SeqCst);
    }

    fn base(&self) -> *mut u8 {
        self.blocks.as_ptr().cast::<u8>().cast_mut()
    }

    fn word(&self, offset: usize, index: usize) -> &AtomicU32 {
        debug_assert!(offset % ALIGN == 0 && offset + HEADER_SIZE <= self.capacity);
        // SAFETY: the header lies inside the arena, starts on a 16-byte
        // boundary and its words are only accessed atomically while live.
        unsafe { AtomicU32::from_ptr(self.base().add(offset + index * 4).cast::<u32>()) }
    }

    /// Frame length of a finished message at `offset`, or `None` while the
    /// slot is still being filled.
    fn frame_len_at(&self, offset: usize) -> Option<usize> {
        let flags = self.word(offset, WORD_FLAGS).load(Ordering::Acquire);
        if flags & (FLAG_COMMITTED | FLAG_DISCARDED) == 0 {
            return None;
        }
        let length = self.word(offset, WORD_LENGTH).load(Ordering::Relaxed);
        Some(HEADER_SIZE + align_up(length as usize))
    }

    fn header_at(&self, offset: usize) -> MessageHeader {
        let flags = self.word(offset, WORD_FLAGS).load(Ordering::Acquire);
        MessageHeader {
            magic: self.word(offset, WORD_MAGIC).load(Ordering::Relaxed),
            length: self.word(offset, WORD_LENGTH).load(Ordering::Relaxed),
            checksum: self.word(offset, WORD_CHECKSUM).load(Ordering::Relaxed),
            flags,
        }
    }

    fn verify_at(&self, offset: usize) -> Result<&[u8], ArenaError> {
        let header = self.header_at(offset);
        if header.flags & FLAG_COMMITTED == 0 {
            return Err(ArenaError::Uncommitted { offset });
        }
        let start = offset + HEADER_SIZE;
        let length = header.length as usize;
        if start + length > self.capacity {
            return Err(ArenaError::OutOfBounds { offset });
        }
        // SAFETY: the acquire load above saw the commit, after which the
        // payload is never written again.
        let payload = unsafe { std::slice::from_raw_parts(self.base().add(start), length) };
        verify(&header, offset, Some(payload))
    }
}

impl Default for MessageArena {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for MessageArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageArena")
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .finish()
    }
}

/// A reserved, not yet published message.
///
/// Dereferences to the payload bytes. Dropping the slot without calling
/// [`commit`](Self::commit) marks it discarded.
pub struct ArenaSlot<'a> {
    arena: &'a MessageArena,
    offset: usize,
    payload: &'a mut [u8],
    committed: bool,
}

impl<'a> ArenaSlot<'a> {
    /// Header offset of this message.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Stores the checksum and publishes the message.
    pub fn commit(mut self) -> MessageRef<'a> {
        let sum = checksum(&*self.payload);
        self.arena
            .word(self.offset, WORD_CHECKSUM)
            .store(sum, Ordering::Relaxed);
        self.arena
            .word(self.offset, WORD_FLAGS)
            .store(FLAG_COMMITTED, Ordering::Release);
        self.committed = true;
        MessageRef {
            arena: self.arena,
            offset: self.offset,
        }
    }
}

impl Deref for ArenaSlot<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &*self.payload
    }
}

impl DerefMut for ArenaSlot<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.payload
    }
}

impl Drop for ArenaSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.arena
                .word(self.offset, WORD_FLAGS)
                .store(FLAG_DISCARDED, Ordering::Release);
        }
    }
}

impl fmt::Debug for ArenaSlot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaSlot")
            .field("offset", &self.offset)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Handle to a committed message.
#[derive(Clone, Copy)]
pub struct MessageRef<'a> {
    arena: &'a MessageArena,
    offset: usize,
}

impl<'a> MessageRef<'a> {
    /// Header offset of this message.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Verified payload bytes.
    pub fn payload(&self) -> Result<&'a [u8], ArenaError> {
        self.arena.verify_at(self.offset)
    }
}

impl fmt::Debug for MessageRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRef")
            .field("offset", &self.offset)
            .finish()
    }
}

/// Iterator returned by [`MessageArena::messages`].
///
/// Yields `(offset, payload)` pairs, or the integrity error for a message
/// that fails verification.
#[derive(Debug)]
pub struct Messages<'a> {
    arena: &'a MessageArena,
    cursor: usize,
    end: usize,
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<(usize, &'a [u8]), ArenaError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor + HEADER_SIZE <= self.end {
            let offset = self.cursor;
            let Some(len) = self.arena.frame_len_at(offset) else {
                self.cursor = self.end;
                return None;
            };
            self.cursor += len;

            let flags = self.arena.word(offset, WORD_FLAGS).load(Ordering::Acquire);
            if flags & FLAG_COMMITTED == 0 {
                continue;
            }
            return Some(self.arena.verify_at(offset).map(|p| (offset, p)));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::decode_at;

    #[test]
    fn test_capacity_rounds_down() {
        let arena = MessageArena::new(100);
        assert_eq!(arena.capacity(), 96);
        assert_eq!(arena.remaining(), 96);
        assert_eq!(MessageArena::default().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_round_trip() {
        let arena = MessageArena::new(256);
        let a = arena.write(b"alpha").unwrap();
        let b = arena.write(b"a longer second payload").unwrap();

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 32);
        assert_eq!(arena.read(&a).unwrap(), b"alpha");
        assert_eq!(b.payload().unwrap(), b"a longer second payload");
        assert_eq!(arena.used(), 32 + 48);
    }

    #[test]
    fn test_empty_payload() {
        let arena = MessageArena::new(64);
        let msg = arena.write(b"").unwrap();
        assert_eq!(arena.read(&msg).unwrap(), b"");
        assert_eq!(arena.used(), HEADER_SIZE);
    }

    #[test]
    fn test_full_and_too_large() {
        let arena = MessageArena::new(64);
        assert_eq!(
            arena.allocate(49).unwrap_err(),
            ArenaError::TooLarge { size: 49, max: 48 }
        );

        arena.write(&[1; 20]).unwrap();
        assert_eq!(arena.used(), 48);
        assert_eq!(
            arena.allocate(1).unwrap_err(),
            ArenaError::Full {
                requested: 32,
                remaining: 16
            }
        );
        // A zero-length message still fits in the last header.
        assert!(arena.write(b"").is_ok());
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_uncommitted_and_discarded() {
        let arena = MessageArena::new(256);
        let mut slot = arena.allocate(4).unwrap();
        slot.copy_from_slice(b"wait");
        let offset = slot.offset();

        assert_eq!(
            arena.read_at(offset),
            Err(ArenaError::Uncommitted { offset })
        );
        assert_eq!(arena.messages().count(), 0);
        assert!(arena.committed().is_empty());

        drop(slot);
        let kept = arena.write(b"kept").unwrap();

        let seen: Vec<_> = arena.messages().map(|m| m.unwrap()).collect();
        assert_eq!(seen, vec![(kept.offset(), &b"kept"[..])]);
        assert_eq!(
            arena.read_at(offset),
            Err(ArenaError::Uncommitted { offset })
        );
    }

    #[test]
    fn test_read_at_requires_boundary() {
        let arena = MessageArena::new(256);
        arena.write(&[7; 40]).unwrap();
        let second = arena.write(b"second").unwrap();

        assert_eq!(arena.read_at(0).unwrap(), &[7; 40][..]);
        assert_eq!(arena.read_at(second.offset()).unwrap(), b"second");
        assert_eq!(arena.read_at(16), Err(ArenaError::OutOfBounds { offset: 16 }));
        assert_eq!(arena.read_at(3), Err(ArenaError::OutOfBounds { offset: 3 }));
        assert_eq!(
            arena.read_at(arena.used()),
            Err(ArenaError::OutOfBounds {
                offset: arena.used()
            })
        );
    }

    #[test]
    fn test_foreign_ref_rejected() {
        let a = MessageArena::new(64);
        let b = MessageArena::new(64);
        let msg = a.write(b"mine").unwrap();
        b.write(b"other").unwrap();
        assert!(matches!(b.read(&msg), Err(ArenaError::OutOfBounds { .. })));
    }

    #[test]
    fn test_committed_bytes_decode() {
        let arena = MessageArena::new(256);
        let first = arena.write(b"one").unwrap().offset();
        let second = arena.write(b"two").unwrap().offset();

        let copy = arena.committed().to_vec();
        assert_eq!(copy.len(), arena.used());
        assert_eq!(decode_at(&copy, first).unwrap(), b"one");
        assert_eq!(decode_at(&copy, second).unwrap(), b"two");
    }

    #[test]
    fn test_reset() {
        let mut arena = MessageArena::new(128);
        arena.write(b"old").unwrap();
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.messages().count(), 0);

        let msg = arena.write(b"new").unwrap();
        assert_eq!(msg.offset(), 0);
        assert_eq!(arena.read(&msg).unwrap(), b"new");
    }

    #[test]
    fn test_concurrent_writers_do_not_overlap() {
        let arena = MessageArena::new(1 << 16);
        let threads = 8;
        let per_thread = 50;

        std::thread::scope(|s| {
            for t in 0..threads {
                let arena = &arena;
                s.spawn(move || {
                    for i in 0..per_thread {
                        let payload = format!("thread-{t}-message-{i}");
                        let mut slot = arena.allocate(payload.len()).unwrap();
                        slot.copy_from_slice(payload.as_bytes());
                        slot.commit();
                    }
                });
            }
        });

        let mut seen: Vec<String> = arena
            .messages()
            .map(|m| String::from_utf8(m.unwrap().1.to_vec()).unwrap())
            .collect();
        assert_eq!(seen.len(), threads * per_thread);

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), threads * per_thread);
    }
}

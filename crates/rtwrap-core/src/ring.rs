//! Lock-free single-producer single-consumer ring buffer
//!
//! This is the only primitive used to move data between the audio thread,
//! the worker thread and the UI thread. It follows the same split-handle
//! shape as `rtrb`: [`RingBuffer::new`] hands out a [`Producer`] and a
//! [`Consumer`], neither of which can be cloned, so "one writer, one reader"
//! is enforced by ownership instead of by convention.
//!
//! # Layout
//!
//! ```text
//!   storage: N + 1 slots (one slot always stays empty)
//!
//!   ┌───┬───┬───┬───┬───┬───┐
//!   │ c │ d │   │   │ a │ b │      read ──► a   write ──► slot after d
//!   └───┴───┴───┴───┴───┴───┘
//!           ▲       ▲
//!         write    read
//! ```
//!
//! `read == write` means empty, `write + 1 == read (mod N+1)` means full,
//! so `read_space() + write_space() == capacity()` always holds.
//!
//! # Guarantees
//!
//! - `write`/`read` fail instead of blocking when full/empty
//! - `write_multiple`/`read_multiple` are all-or-nothing: a batch is
//!   published with a single cursor store, the other side never observes
//!   a partial batch
//! - `force_write*` never fail; the producer advances the read cursor past the
//!   oldest elements. A consumer racing with a forced overwrite retries its
//!   read, but it can momentarily copy a slot that is being rewritten, so
//!   forced writes are meant for lossy streams of plain values.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

/// Bytes used by the length prefix of a frame (`u32`, little endian)
pub const FRAME_HEADER_LEN: usize = 4;

/// Shared state of a ring buffer
///
/// Never used directly; see [`RingBuffer::new`].
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    read: CachePadded<AtomicUsize>,
    write: CachePadded<AtomicUsize>,
}

// SAFETY: slots are only written by the single Producer and only read by the
// single Consumer, coordinated through the acquire/release cursors.
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a ring that holds `capacity` elements
    ///
    /// Returns the producer (writer thread) and consumer (reader thread) halves.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (Producer<T>, Consumer<T>) {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let slots = (0..=capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let shared = Arc::new(RingBuffer {
            slots,
            read: CachePadded::new(AtomicUsize::new(0)),
            write: CachePadded::new(AtomicUsize::new(0)),
        });
        (
            Producer {
                ring: Arc::clone(&shared),
            },
            Consumer { ring: shared },
        )
    }
}

impl<T: Copy> RingBuffer<T> {
    /// Number of storage slots (capacity + 1)
    #[inline]
    fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    fn used(&self, read: usize, write: usize) -> usize {
        if write >= read {
            write - read
        } else {
            write + self.size() - read
        }
    }

    #[inline]
    fn free(&self, read: usize, write: usize) -> usize {
        self.capacity() - self.used(read, write)
    }

    #[inline]
    fn advance(&self, index: usize, by: usize) -> usize {
        (index + by) % self.size()
    }

    fn read_space(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        self.used(read, write)
    }

    fn write_space(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        self.free(read, write)
    }

    /// Copy `items` into the slots starting at `start`, wrapping as needed
    ///
    /// # Safety
    ///
    /// Only the producer may call this, and only for slots that are free.
    #[inline]
    unsafe fn store_at(&self, start: usize, items: &[T]) {
        let mut index = start;
        for item in items {
            *self.slots[index].get() = *item;
            index = self.advance(index, 1);
        }
    }

    /// Copy slots starting at `start` into `out`, wrapping as needed
    ///
    /// # Safety
    ///
    /// Only the consumer may call this, and only for slots holding data.
    #[inline]
    unsafe fn load_at(&self, start: usize, out: &mut [T]) {
        let mut index = start;
        for slot in out.iter_mut() {
            *slot = *self.slots[index].get();
            index = self.advance(index, 1);
        }
    }
}

/// Writing half of a [`RingBuffer`]
pub struct Producer<T: Copy> {
    ring: Arc<RingBuffer<T>>,
}

impl<T: Copy> Producer<T> {
    /// Number of usable slots
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Elements that can currently be written without overwriting
    pub fn write_space(&self) -> usize {
        self.ring.write_space()
    }

    /// Elements currently waiting to be read
    pub fn read_space(&self) -> usize {
        self.ring.read_space()
    }

    /// Write a single element
    ///
    /// Returns `false` (and leaves the ring untouched) if the ring is full.
    pub fn write(&mut self, item: T) -> bool {
        self.write_parts(&[std::slice::from_ref(&item)])
    }

    /// Write all of `items`, or nothing if they don't fit
    pub fn write_multiple(&mut self, items: &[T]) -> bool {
        self.write_parts(&[items])
    }

    /// Write every part back-to-back as one batch, or nothing at all
    ///
    /// The write cursor is stored once, after the last element, so the
    /// consumer sees either none or all of the parts.
    pub fn write_parts(&mut self, parts: &[&[T]]) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Acquire);
        let write = ring.write.load(Ordering::Relaxed);
        if ring.free(read, write) < total {
            return false;
        }
        let mut cursor = write;
        for part in parts {
            // SAFETY: we are the only producer and the slots were checked free
            unsafe { ring.store_at(cursor, part) };
            cursor = ring.advance(cursor, part.len());
        }
        ring.write.store(cursor, Ordering::Release);
        true
    }

    /// Write a single element, overwriting the oldest one if the ring is full
    pub fn force_write(&mut self, item: T) {
        self.force_write_multiple(std::slice::from_ref(&item));
    }

    /// Write all of `items`, dropping the oldest unread elements to make room
    ///
    /// If `items` is longer than the capacity only its last `capacity()`
    /// elements end up in the ring.
    pub fn force_write_multiple(&mut self, items: &[T]) {
        let ring = &*self.ring;
        let capacity = ring.capacity();
        let items = if items.len() > capacity {
            &items[items.len() - capacity..]
        } else {
            items
        };
        let write = ring.write.load(Ordering::Relaxed);

        loop {
            let read = ring.read.load(Ordering::Acquire);
            let free = ring.free(read, write);
            if free >= items.len() {
                break;
            }
            let skipped = ring.advance(read, items.len() - free);
            if ring
                .read
                .compare_exchange(read, skipped, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        // SAFETY: we are the only producer and enough slots were released above
        unsafe { ring.store_at(write, items) };
        ring.write
            .store(ring.advance(write, items.len()), Ordering::Release);
    }
}

impl Producer<u8> {
    /// Write a length-prefixed frame (`u32` LE size, then payload) atomically
    ///
    /// Returns `false` if the whole frame doesn't fit.
    pub fn write_frame(&mut self, payload: &[u8]) -> bool {
        let Ok(len) = u32::try_from(payload.len()) else {
            return false;
        };
        self.write_parts(&[&len.to_le_bytes(), payload])
    }
}

/// Reading half of a [`RingBuffer`]
pub struct Consumer<T: Copy> {
    ring: Arc<RingBuffer<T>>,
}

/// Outcome of [`Consumer::read_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// No complete frame available
    Empty,
    /// A frame of this many bytes was copied to the output buffer
    Complete(usize),
    /// A frame of this many bytes was larger than the output buffer and was skipped
    Discarded(usize),
}

impl<T: Copy> Consumer<T> {
    /// Number of usable slots
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Elements currently waiting to be read
    pub fn read_space(&self) -> usize {
        self.ring.read_space()
    }

    /// Elements that can currently be written without overwriting
    pub fn write_space(&self) -> usize {
        self.ring.write_space()
    }

    /// Is there nothing to read?
    pub fn is_empty(&self) -> bool {
        self.read_space() == 0
    }

    /// Read the oldest element
    pub fn read(&mut self) -> Option<T> {
        let ring = &*self.ring;
        loop {
            let read = ring.read.load(Ordering::Acquire);
            let write = ring.write.load(Ordering::Acquire);
            if read == write {
                return None;
            }
            // SAFETY: the slot at `read` holds published data
            let item = unsafe { *ring.slots[read].get() };
            if ring
                .read
                .compare_exchange(read, ring.advance(read, 1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(item);
            }
            // The producer force-advanced past us; retry with the new oldest element
        }
    }

    /// Return the oldest element without consuming it
    pub fn peek(&self) -> Option<T> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Acquire);
        let write = ring.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // SAFETY: the slot at `read` holds published data
        Some(unsafe { *ring.slots[read].get() })
    }

    /// Copy the oldest `out.len()` elements without consuming them
    pub fn peek_multiple(&self, out: &mut [T]) -> bool {
        self.peek_at(0, out)
    }

    /// Copy `out.len()` elements starting `offset` elements after the read cursor
    fn peek_at(&self, offset: usize, out: &mut [T]) -> bool {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Acquire);
        let write = ring.write.load(Ordering::Acquire);
        if ring.used(read, write) < offset + out.len() {
            return false;
        }
        // SAFETY: all requested slots hold published data
        unsafe { ring.load_at(ring.advance(read, offset), out) };
        true
    }

    /// Fill `out` completely from the ring, or read nothing
    pub fn read_multiple(&mut self, out: &mut [T]) -> bool {
        let ring = &*self.ring;
        loop {
            let read = ring.read.load(Ordering::Acquire);
            let write = ring.write.load(Ordering::Acquire);
            if ring.used(read, write) < out.len() {
                return false;
            }
            // SAFETY: all requested slots hold published data
            unsafe { ring.load_at(read, out) };
            if ring
                .read
                .compare_exchange(
                    read,
                    ring.advance(read, out.len()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Discard `count` elements without copying them
    ///
    /// Fails (discarding nothing) if fewer than `count` are available.
    pub fn skip(&mut self, count: usize) -> bool {
        let ring = &*self.ring;
        loop {
            let read = ring.read.load(Ordering::Acquire);
            let write = ring.write.load(Ordering::Acquire);
            if ring.used(read, write) < count {
                return false;
            }
            if ring
                .read
                .compare_exchange(
                    read,
                    ring.advance(read, count),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl Consumer<u8> {
    /// Read one length-prefixed frame written by [`Producer::write_frame`]
    ///
    /// Frames larger than `out` are consumed and reported as
    /// [`FrameRead::Discarded`] so a single bad frame cannot wedge the ring.
    pub fn read_frame(&mut self, out: &mut [u8]) -> FrameRead {
        let mut header = [0u8; FRAME_HEADER_LEN];
        if !self.peek_multiple(&mut header) {
            return FrameRead::Empty;
        }
        let len = u32::from_le_bytes(header) as usize;
        if self.read_space() < FRAME_HEADER_LEN + len {
            return FrameRead::Empty;
        }
        if len > out.len() {
            self.skip(FRAME_HEADER_LEN + len);
            return FrameRead::Discarded(len);
        }
        if !self.peek_at(FRAME_HEADER_LEN, &mut out[..len]) {
            return FrameRead::Empty;
        }
        self.skip(FRAME_HEADER_LEN + len);
        FrameRead::Complete(len)
    }
}

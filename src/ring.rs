// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity single-producer / single-consumer byte queue.
//!
//! The serial endpoints fill and drain these from the USB interrupt while the
//! other end is serviced from the DPC or mainline code. No lock is involved:
//! `start` is only ever stored by the [`Consumer`] and `end` only by the
//! [`Producer`], and [`RingBuffer::split`] hands out exactly one of each.
//!
//! One slot always stays empty so that `start == end` unambiguously means
//! "empty"; a ring of capacity `N` holds at most `N - 1` bytes.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    /// Next byte to remove. Written by the consumer only.
    start: AtomicUsize,
    /// Next slot to fill. Written by the producer only.
    end: AtomicUsize,
}

// Safety: the buffer contents are only reached through the split handles,
// which partition the slots between writer and reader using the cursors.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two() && N >= 2, "ring capacity must be a power of two");
        N - 1
    };

    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            buffer: UnsafeCell::new([0; N]),
            start: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
        }
    }

    /// Total slots, including the one that is never filled.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Empties the ring and hands out its two ends.
    ///
    /// Taking `&mut self` guarantees no other handles exist for as long as
    /// the returned pair is alive.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        *self.start.get_mut() = 0;
        *self.end.get_mut() = 0;
        let ring = &*self;
        (Producer { ring }, Consumer { ring })
    }

    fn len(&self) -> usize {
        let end = self.end.load(Ordering::Acquire);
        let start = self.start.load(Ordering::Acquire);
        end.wrapping_sub(start) & Self::MASK
    }

    fn slot(&self, index: usize) -> *mut u8 {
        // Stays in bounds: every caller masks `index`.
        self.buffer.get().cast::<u8>().wrapping_add(index & Self::MASK)
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing end of a [`RingBuffer`].
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Producer<'_, N> {
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can be written without dropping any.
    pub fn free(&self) -> usize {
        N - 1 - self.ring.len()
    }

    pub fn can_write(&self) -> bool {
        self.free() != 0
    }

    /// Appends `byte`, or silently drops it if the ring is full.
    pub fn write_byte(&mut self, byte: u8) {
        let end = self.ring.end.load(Ordering::Relaxed);
        let next = (end + 1) & RingBuffer::<N>::MASK;
        if next == self.ring.start.load(Ordering::Acquire) {
            return;
        }
        // Safety: slot `end` is outside the consumer's readable window until
        // the store below publishes it.
        unsafe { self.ring.slot(end).write(byte) };
        self.ring.end.store(next, Ordering::Release);
    }

    /// Appends all of `bytes`. The caller must have checked `free()`; nothing
    /// is re-checked here and overfilling corrupts unread data.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.ring.end.load(Ordering::Relaxed);
        for (i, &b) in bytes.iter().enumerate() {
            // Safety: as for `write_byte`, given the caller's capacity check.
            unsafe { self.ring.slot(end + i).write(b) };
        }
        self.ring
            .end
            .store((end + bytes.len()) & RingBuffer::<N>::MASK, Ordering::Release);
    }
}

/// Reading end of a [`RingBuffer`].
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Consumer<'_, N> {
    /// Bytes waiting to be read.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn can_read(&self) -> bool {
        !self.is_empty()
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let start = self.ring.start.load(Ordering::Relaxed);
        if start == self.ring.end.load(Ordering::Acquire) {
            return None;
        }
        // Safety: `start != end`, so the producer published this slot.
        let byte = unsafe { self.ring.slot(start).read() };
        self.ring
            .start
            .store((start + 1) & RingBuffer::<N>::MASK, Ordering::Release);
        Some(byte)
    }

    /// Looks at the byte `n` places from the front without removing it.
    pub fn peek(&self, n: usize) -> Option<u8> {
        if n >= self.len() {
            return None;
        }
        let start = self.ring.start.load(Ordering::Relaxed);
        // Safety: `n < len`, so the slot holds published data.
        Some(unsafe { self.ring.slot(start + n).read() })
    }

    /// Fills `bytes` from the front of the ring. The caller must have checked
    /// `len()`; reading past the data returns stale bytes and corrupts the
    /// cursors.
    pub fn read_bytes(&mut self, bytes: &mut [u8]) {
        let start = self.ring.start.load(Ordering::Relaxed);
        for (i, b) in bytes.iter_mut().enumerate() {
            // Safety: as for `read_byte`, given the caller's length check.
            *b = unsafe { self.ring.slot(start + i).read() };
        }
        self.ring
            .start
            .store((start + bytes.len()) & RingBuffer::<N>::MASK, Ordering::Release);
    }
}

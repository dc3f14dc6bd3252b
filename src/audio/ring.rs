// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A value that can travel through a [`RingBuffer`] as a plain machine word.
pub trait Handle: Copy {
    fn into_raw(self) -> usize;
    fn from_raw(raw: usize) -> Self;
}

impl Handle for usize {
    fn into_raw(self) -> usize {
        self
    }

    fn from_raw(raw: usize) -> Self {
        raw
    }
}

/// Lock-free, fixed capacity FIFO of handles.
///
/// Safe for exactly one producer calling [`RingBuffer::put`] and one consumer calling
/// [`RingBuffer::get`] at the same time. Neither side ever blocks or allocates. Other
/// access patterns never cause memory unsafety, but items may be lost or duplicated.
pub struct RingBuffer<T: Handle> {
    /// Backing slots. One more than the capacity so a full buffer is distinguishable from empty.
    slots: Box<[AtomicUsize]>,
    /// Read position (consumer)
    read_pos: AtomicUsize,
    /// Write position (producer)
    write_pos: AtomicUsize,
    _handle: PhantomData<T>,
}

impl<T: Handle> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity + 1).map(|_| AtomicUsize::new(0)).collect(),
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            _handle: PhantomData,
        }
    }

    /// Total number of items the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of items available to read. Exact when called from the producer or the consumer,
    /// approximate from anywhere else.
    #[inline]
    pub fn count(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.slots.len() - read + write
        }
    }

    /// Appends an item. Returns false without blocking if the buffer is full.
    #[inline]
    pub fn put(&self, item: T) -> bool {
        if self.count() >= self.capacity() {
            return false;
        }
        let write = self.write_pos.load(Ordering::Relaxed);
        self.slots[write].store(item.into_raw(), Ordering::Relaxed);
        self.write_pos
            .store((write + 1) % self.slots.len(), Ordering::Release);
        true
    }

    /// Removes and returns the oldest item, or None if the buffer is empty.
    #[inline]
    pub fn get(&self) -> Option<T> {
        if self.count() == 0 {
            return None;
        }
        let read = self.read_pos.load(Ordering::Relaxed);
        let raw = self.slots[read].load(Ordering::Relaxed);
        self.read_pos
            .store((read + 1) % self.slots.len(), Ordering::Release);
        Some(T::from_raw(raw))
    }
}

impl<T: Handle> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_fill_to_capacity() {
        let ring: RingBuffer<usize> = RingBuffer::new(4);
        for i in 0..4 {
            assert!(ring.put(i));
        }
        assert_eq!(ring.count(), 4);
        assert!(!ring.put(99));
        assert_eq!(ring.count(), 4);

        for i in 0..4 {
            assert_eq!(ring.get(), Some(i));
        }
        assert_eq!(ring.get(), None);
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn test_wrap_around() {
        let ring: RingBuffer<usize> = RingBuffer::new(3);
        for round in 0..10 {
            assert!(ring.put(round));
            assert!(ring.put(round + 100));
            assert_eq!(ring.get(), Some(round));
            assert_eq!(ring.get(), Some(round + 100));
        }
        assert_eq!(ring.get(), None);
    }

    #[test]
    fn test_zero_capacity() {
        let ring: RingBuffer<usize> = RingBuffer::new(0);
        assert!(!ring.put(1));
        assert_eq!(ring.get(), None);
    }

    #[test]
    fn test_spsc_threads_preserve_order() {
        let ring: Arc<RingBuffer<usize>> = Arc::new(RingBuffer::new(16));
        let total = 10_000;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut next = 0;
                while next < total {
                    if ring.put(next) {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < total {
            match ring.get() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert_eq!(ring.count(), 0);
    }
}

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
//! The voice arena and the three rings that move voice ids between threads.
//!
//! A voice id is always held by exactly one of: the recycle ring, the "new" ring, the playing
//! ring, or the thread currently working on it. Whoever holds the id may read and write the
//! slot's fields; the rings' release/acquire ordering hands those writes over.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use atomic_float::AtomicF64;

use crate::audio::{Handle, RingBuffer};
use crate::samples::SampleRef;

/// Index of a voice slot in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(u32);

impl VoiceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Handle for VoiceId {
    fn into_raw(self) -> usize {
        self.index()
    }

    fn from_raw(raw: usize) -> Self {
        VoiceId(raw as u32)
    }
}

/// The "new" ring carries ids in pairs; `None` fills the second place of a single-sample note.
impl Handle for Option<VoiceId> {
    fn into_raw(self) -> usize {
        self.map_or(0, |id| id.index() + 1)
    }

    fn from_raw(raw: usize) -> Self {
        raw.checked_sub(1).map(VoiceId::from_raw)
    }
}

/// A playing sample instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub key: u8,
    pub sample: SampleRef,
    /// Fractional frame position.
    pub position: f64,
    pub amp: f64,
    pub pan: f64,
    /// Decays from 1 toward 0; the voice is scaled by `1 - fade_in`.
    pub fade_in: f64,
}

struct VoiceSlot {
    key: AtomicU8,
    sample: AtomicU32,
    position: AtomicF64,
    amp: AtomicF64,
    pan: AtomicF64,
    fade_in: AtomicF64,
}

impl VoiceSlot {
    fn new() -> VoiceSlot {
        VoiceSlot {
            key: AtomicU8::new(0),
            sample: AtomicU32::new(0),
            position: AtomicF64::new(0.0),
            amp: AtomicF64::new(0.0),
            pan: AtomicF64::new(0.0),
            fade_in: AtomicF64::new(0.0),
        }
    }
}

/// Fixed pool of voices plus the recycle, new and playing rings.
///
/// Ring roles:
/// - recycle: filled by the renderer (and by [`VoicePool::reclaim`]), drained by the event thread.
/// - new: filled by the event thread, drained in pairs by the renderer.
/// - playing: owned by the renderer, which pops and re-pushes every voice each block.
pub struct VoicePool {
    slots: Box<[VoiceSlot]>,
    recycle: RingBuffer<VoiceId>,
    fresh: RingBuffer<Option<VoiceId>>,
    playing: RingBuffer<VoiceId>,
}

impl VoicePool {
    /// Creates a pool whose every voice starts out in the recycle ring.
    pub fn new(capacity: usize) -> VoicePool {
        let capacity = capacity.min(u32::MAX as usize - 1);
        let pool = VoicePool {
            slots: (0..capacity).map(|_| VoiceSlot::new()).collect(),
            recycle: RingBuffer::new(capacity),
            fresh: RingBuffer::new(2 * capacity),
            playing: RingBuffer::new(capacity),
        };
        for index in 0..capacity {
            pool.recycle.put(VoiceId(index as u32));
        }
        pool
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn read(&self, id: VoiceId) -> Voice {
        let slot = &self.slots[id.index()];
        Voice {
            key: slot.key.load(Ordering::Relaxed),
            sample: SampleRef::unpack(slot.sample.load(Ordering::Relaxed)),
            position: slot.position.load(Ordering::Relaxed),
            amp: slot.amp.load(Ordering::Relaxed),
            pan: slot.pan.load(Ordering::Relaxed),
            fade_in: slot.fade_in.load(Ordering::Relaxed),
        }
    }

    pub fn write(&self, id: VoiceId, voice: &Voice) {
        let slot = &self.slots[id.index()];
        slot.key.store(voice.key, Ordering::Relaxed);
        slot.sample.store(voice.sample.pack(), Ordering::Relaxed);
        slot.position.store(voice.position, Ordering::Relaxed);
        slot.amp.store(voice.amp, Ordering::Relaxed);
        slot.pan.store(voice.pan, Ordering::Relaxed);
        slot.fade_in.store(voice.fade_in, Ordering::Relaxed);
    }

    /// Takes a free voice. Event thread only.
    pub fn allocate(&self) -> Option<VoiceId> {
        self.recycle.get()
    }

    /// Queues a voice (or a pair placeholder) for the renderer. Event thread only.
    pub fn submit(&self, voice: Option<VoiceId>) -> bool {
        self.fresh.put(voice)
    }

    /// Moves complete pairs from the new ring into the playing ring. An odd trailing entry is
    /// left for the next block. Renderer only.
    pub fn drain_new_pairs(&self) {
        let count = self.fresh.count();
        for _ in 0..count - count % 2 {
            if let Some(Some(id)) = self.fresh.get() {
                self.playing.put(id);
            }
        }
    }

    /// Number of voices in the playing ring.
    pub fn playing_count(&self) -> usize {
        self.playing.count()
    }

    /// Number of voices waiting in the recycle ring.
    pub fn free_count(&self) -> usize {
        self.recycle.count()
    }

    /// Renderer only.
    pub fn take_playing(&self) -> Option<VoiceId> {
        self.playing.get()
    }

    /// Renderer only.
    pub fn requeue(&self, id: VoiceId) {
        self.playing.put(id);
    }

    /// Returns a voice to the free pool. Renderer only.
    pub fn retire(&self, id: VoiceId) {
        self.recycle.put(id);
    }

    /// Moves every queued and playing voice back to the recycle ring. Only valid while no
    /// renderer is running.
    pub fn reclaim(&self) {
        for _ in 0..self.fresh.count() {
            if let Some(Some(id)) = self.fresh.get() {
                self.recycle.put(id);
            }
        }
        for _ in 0..self.playing.count() {
            if let Some(id) = self.playing.get() {
                self.recycle.put(id);
            }
        }
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .field("new", &self.fresh.count())
            .field("playing", &self.playing_count())
            .finish()
    }
}

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
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Sample, SampleRef, MAX_LAYERS, MAX_VARIATIONS};
use crate::controls::KEY_COUNT;

/// One velocity layer: its round-robin takes and the rotation cursor.
#[derive(Debug, Default)]
pub(crate) struct Layer {
    pub(crate) variations: Vec<Sample>,
    cursor: AtomicUsize,
}

impl Layer {
    pub(crate) fn new(variations: Vec<Sample>) -> Layer {
        Layer {
            variations,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Advances the cursor and returns the variation it now points at.
    fn next_variation(&self) -> Option<usize> {
        let count = self.variations.len();
        if count == 0 {
            return None;
        }
        let next = (self.cursor.load(Ordering::Relaxed) + 1) % count;
        self.cursor.store(next, Ordering::Relaxed);
        Some(next)
    }

    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct KeySlot {
    pub(crate) layers: Vec<Layer>,
}

/// A sample chosen for a note, with its cross-fade weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pick {
    pub sample: SampleRef,
    pub mix: f64,
}

/// Samples copied from one key to another, grouped by layer.
pub(crate) struct Copies {
    layer_count: usize,
    copies: Vec<(usize, Sample)>,
}

impl Copies {
    pub(crate) fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

/// Every loaded sample, indexed by key, then velocity layer, then round-robin variation.
///
/// The layout is only changed while the store is private to the loading thread. Once published
/// to the audio path the only mutable state is the per-layer round-robin cursor.
#[derive(Debug)]
pub struct SampleStore {
    pub(crate) keys: Vec<KeySlot>,
}

impl SampleStore {
    pub fn new() -> SampleStore {
        SampleStore {
            keys: (0..KEY_COUNT).map(|_| KeySlot::default()).collect(),
        }
    }

    /// Replaces a key's layers. Used by the loader once a key's files are grouped.
    pub(crate) fn set_layers(&mut self, key: u8, layers: Vec<Vec<Sample>>) {
        if let Some(slot) = self.keys.get_mut(usize::from(key)) {
            slot.layers = layers
                .into_iter()
                .take(MAX_LAYERS)
                .map(|mut variations| {
                    variations.truncate(MAX_VARIATIONS);
                    Layer::new(variations)
                })
                .collect();
        }
    }

    pub fn layer_count(&self, key: u8) -> usize {
        self.keys
            .get(usize::from(key))
            .map_or(0, |slot| slot.layers.len())
    }

    pub fn variation_count(&self, key: u8, layer: usize) -> usize {
        self.keys
            .get(usize::from(key))
            .and_then(|slot| slot.layers.get(layer))
            .map_or(0, |layer| layer.variations.len())
    }

    pub fn sample(&self, r: SampleRef) -> Option<&Sample> {
        self.keys
            .get(usize::from(r.key))?
            .layers
            .get(usize::from(r.layer))?
            .variations
            .get(usize::from(r.variation))
    }

    /// Total number of sample slots, owned and shared.
    pub fn sample_count(&self) -> usize {
        self.samples().count()
    }

    /// Bytes held by owned buffers.
    pub fn memory_size(&self) -> usize {
        self.samples().map(Sample::memory_size).sum()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.keys
            .iter()
            .flat_map(|slot| slot.layers.iter())
            .flat_map(|layer| layer.variations.iter())
    }

    /// Chooses the samples to play for a note.
    ///
    /// The curved velocity `velocity^gamma` is mapped onto the key's layers (one fewer when
    /// mixing) giving a fractional layer position. The primary pick comes from the integer layer.
    /// When mixing, and the next layer up exists with the same number of variations, a second
    /// pick from that layer gets the fractional remainder as its weight. Every call advances the
    /// primary layer's round-robin cursor.
    pub fn get_samples(
        &self,
        key: u8,
        velocity: f64,
        gamma: f64,
        mix_layers: bool,
    ) -> Option<(Pick, Option<Pick>)> {
        let slot = self.keys.get(usize::from(key))?;
        let layer_count = slot.layers.len();
        if layer_count == 0 {
            return None;
        }

        let span = if mix_layers {
            layer_count - 1
        } else {
            layer_count
        };
        let position = span as f64 * velocity.powf(gamma);
        let layer0 = (position as usize).min(layer_count - 1);

        let lower = &slot.layers[layer0];
        let variation = lower.next_variation()?;
        let first = SampleRef::new(key, layer0 as u8, variation as u8);

        let single = Some((
            Pick {
                sample: first,
                mix: 1.0,
            },
            None,
        ));
        if !mix_layers || layer0 >= span {
            return single;
        }
        let Some(upper) = slot.layers.get(layer0 + 1) else {
            return single;
        };
        if upper.variations.len() != lower.variations.len() {
            return single;
        }

        let mix = 1.0 - (position - layer0 as f64);
        Some((
            Pick { sample: first, mix },
            Some(Pick {
                sample: SampleRef::new(key, layer0 as u8 + 1, variation as u8),
                mix: 1.0 - mix,
            }),
        ))
    }

    /// Copies samples from one key to another, retuned by the key distance. Copies share the
    /// donor's buffer. With `owned_only`, samples that are themselves copies are skipped.
    ///
    /// The donor must have layers. A recipient without layers adopts the donor's layer count,
    /// otherwise both counts must match. Returns true if anything was copied.
    pub fn copy_samples(&mut self, to: u8, from: u8, owned_only: bool) -> bool {
        match self.collect_copies(to, from, owned_only) {
            Some(copies) => self.apply_copies(to, copies),
            None => false,
        }
    }

    /// The read half of [`SampleStore::copy_samples`], safe to run for many keys in parallel.
    pub(crate) fn collect_copies(&self, to: u8, from: u8, owned_only: bool) -> Option<Copies> {
        if to == from {
            return None;
        }
        let donor = self.keys.get(usize::from(from))?;
        let recipient = self.keys.get(usize::from(to))?;
        let layer_count = donor.layers.len();
        if layer_count == 0 {
            return None;
        }
        if !recipient.layers.is_empty() && recipient.layers.len() != layer_count {
            return None;
        }

        let ratio = ((f64::from(to) - f64::from(from)) / 12.0).exp2();
        let copies = donor
            .layers
            .iter()
            .enumerate()
            .flat_map(|(index, layer)| layer.variations.iter().map(move |s| (index, s)))
            .filter(|(_, sample)| !owned_only || sample.is_owned())
            .map(|(index, sample)| (index, sample.borrowed(ratio)))
            .collect();
        Some(Copies {
            layer_count,
            copies,
        })
    }

    /// The write half of [`SampleStore::copy_samples`].
    pub(crate) fn apply_copies(&mut self, to: u8, copies: Copies) -> bool {
        let Some(recipient) = self.keys.get_mut(usize::from(to)) else {
            return false;
        };
        if copies.is_empty() {
            return false;
        }
        if recipient.layers.is_empty() {
            recipient.layers = (0..copies.layer_count).map(|_| Layer::default()).collect();
        }
        if recipient.layers.len() != copies.layer_count {
            return false;
        }

        let mut copied = false;
        for (index, sample) in copies.copies {
            let layer = &mut recipient.layers[index];
            if layer.variations.len() < MAX_VARIATIONS {
                layer.variations.push(sample);
                copied = true;
            }
        }
        copied
    }

    /// The current round-robin cursor of a layer.
    pub fn cursor(&self, key: u8, layer: usize) -> Option<usize> {
        Some(self.keys.get(usize::from(key))?.layers.get(layer)?.cursor())
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        SampleStore::new()
    }
}

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
//! Load-time preprocessing of a freshly loaded sample store.
//!
//! Stages run in a fixed order, each over the whole key range:
//! synthetic layer, borrow, fill, crop, RMS. Per-key work is spread over a bounded Rayon pool
//! that lives only as long as the [`Pipeline`].

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use super::store::{Copies, Layer, SampleStore};
use super::{LowPassFilter, Sample};
use crate::audio::{INT16_SCALE, SAMPLE_RATE};

/// Corner frequency of the synthetic soft layer.
const FAKE_LAYER_CORNER_HZ: f64 = 10.0;

/// Stage parameters, normally read from config.conf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Low-pass order for the synthetic layer, 0 disables the stage.
    pub fake_layer_order: u32,
    /// Maximum key distance to borrow round-robin variations from.
    pub rr_borrow: u32,
    /// Crop threshold as a fraction of full scale.
    pub crop_threshold: f64,
    /// RMS window length in seconds.
    pub rms_time: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            fake_layer_order: 0,
            rr_borrow: 0,
            crop_threshold: 0.0,
            rms_time: 0.25,
        }
    }
}

/// Runs the preprocessing stages on a dedicated worker pool.
pub struct Pipeline {
    pool: ThreadPool,
}

impl Pipeline {
    /// Creates a pipeline with one worker per CPU.
    pub fn new() -> Result<Pipeline, rayon::ThreadPoolBuildError> {
        Pipeline::with_threads(num_cpus::get())
    }

    pub fn with_threads(threads: usize) -> Result<Pipeline, rayon::ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("layersampler-load-{i}"))
            .build()?;
        Ok(Pipeline { pool })
    }

    /// Runs a closure inside the worker pool, so parallel iterators in it use these workers.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Runs every stage in order.
    pub fn run(&self, store: &mut SampleStore, settings: &PipelineSettings) {
        if settings.fake_layer_order != 0 {
            info!(order = settings.fake_layer_order, "Creating fake RC layer");
            self.fake_layer(store, settings.fake_layer_order);
        }

        info!(distance = settings.rr_borrow, "Borrowing samples");
        self.borrow(store, settings.rr_borrow);

        info!("Filling samples");
        self.fill(store);

        info!(threshold = settings.crop_threshold, "Cropping samples");
        self.crop(store, settings.crop_threshold);

        info!(window = settings.rms_time, "Computing RMS values");
        self.compute_rms(store, settings.rms_time);

        for key in 0..=127u8 {
            let layers = store.layer_count(key);
            if layers > 0 {
                let variations: Vec<usize> = (0..layers)
                    .map(|layer| store.variation_count(key, layer))
                    .collect();
                debug!(key, layers, variations = ?variations, "Key summary");
            }
        }
    }

    /// Gives every key that has exactly one non-empty layer a second, softer layer below it. The
    /// original samples move up to layer 1 and layer 0 receives low-pass filtered copies.
    pub fn fake_layer(&self, store: &mut SampleStore, order: u32) {
        let filter = LowPassFilter::new(FAKE_LAYER_CORNER_HZ, order);
        self.pool.install(|| {
            store.keys.par_iter_mut().for_each(|slot| {
                if slot.layers.len() != 1 || slot.layers[0].variations.is_empty() {
                    return;
                }
                let filtered: Vec<Sample> = slot.layers[0]
                    .variations
                    .iter()
                    .map(|sample| {
                        let mut frames = sample.frames().to_vec();
                        filter.apply(&mut frames);
                        sample.with_frames(frames)
                    })
                    .collect();
                slot.layers.insert(0, Layer::new(filtered));
            });
        });
    }

    /// Adds round-robin variations to keys that already have samples by borrowing owned samples
    /// from neighbours up to `distance` keys away, nearest first, lower neighbour first.
    pub fn borrow(&self, store: &mut SampleStore, distance: u32) {
        if distance == 0 {
            return;
        }
        let distance = i32::try_from(distance).unwrap_or(i32::MAX).min(127);

        let planned: Vec<(u8, Vec<Copies>)> = self.pool.install(|| {
            let store = &*store;
            (0..=127u8)
                .into_par_iter()
                .filter(|key| store.layer_count(*key) > 0)
                .map(|key| {
                    let copies = (1..=distance)
                        .flat_map(|dist| [i32::from(key) - dist, i32::from(key) + dist])
                        .filter_map(|from| u8::try_from(from).ok().filter(|k| *k <= 127))
                        .filter_map(|from| store.collect_copies(key, from, true))
                        .collect();
                    (key, copies)
                })
                .collect()
        });

        for (key, copies) in planned {
            for batch in copies {
                store.apply_copies(key, batch);
            }
        }
    }

    /// Gives every empty key the full layer set of its nearest populated neighbour, spreading
    /// outward one key per pass. Ties go to the lower neighbour.
    pub fn fill(&self, store: &mut SampleStore) {
        loop {
            let planned: Vec<(u8, Copies)> = self.pool.install(|| {
                let store = &*store;
                (0..=127u8)
                    .into_par_iter()
                    .filter(|key| store.layer_count(*key) == 0)
                    .filter_map(|key| {
                        let below = key.checked_sub(1).filter(|k| store.layer_count(*k) > 0);
                        let above = key
                            .checked_add(1)
                            .filter(|k| *k <= 127 && store.layer_count(*k) > 0);
                        let from = below.or(above)?;
                        Some((key, store.collect_copies(key, from, false)?))
                    })
                    .collect()
            });

            let mut changed = false;
            for (key, copies) in planned {
                changed |= store.apply_copies(key, copies);
            }
            if !changed {
                break;
            }
        }
    }

    /// Sets each sample's start offset to its first frame that exceeds the threshold.
    pub fn crop(&self, store: &mut SampleStore, threshold: f64) {
        let threshold = (threshold / INT16_SCALE) as i32;
        self.for_each_sample(store, |sample| {
            let start = crop_start(sample.frames(), threshold);
            sample.set_start(start);
        });
    }

    /// Measures each sample's loudness over `window` seconds from its start offset.
    pub fn compute_rms(&self, store: &mut SampleStore, window: f64) {
        let window = (window * f64::from(SAMPLE_RATE)) as usize;
        self.for_each_sample(store, |sample| {
            let start = sample.start();
            let end = start.saturating_add(window).min(sample.len());
            let rms = rms(&sample.frames()[start..end]);
            sample.set_rms(rms);
        });
    }

    fn for_each_sample(&self, store: &mut SampleStore, op: impl Fn(&mut Sample) + Sync) {
        self.pool.install(|| {
            store.keys.par_iter_mut().for_each(|slot| {
                slot.layers
                    .iter_mut()
                    .flat_map(|layer| layer.variations.iter_mut())
                    .for_each(&op);
            });
        });
    }
}

/// Index of the first frame where either channel's magnitude exceeds the threshold, or the
/// frame count if none does.
fn crop_start(frames: &[[i16; 2]], threshold: i32) -> usize {
    frames
        .iter()
        .position(|[l, r]| i32::from(*l).abs() > threshold || i32::from(*r).abs() > threshold)
        .unwrap_or(frames.len())
}

/// Root mean square over both channels, in full-scale units. 0 for an empty window.
fn rms(frames: &[[i16; 2]]) -> f64 {
    if frames.is_empty() {
        return 0.0;
    }
    let sum: f64 = frames
        .iter()
        .flat_map(|frame| frame.iter())
        .map(|x| {
            let x = f64::from(*x) * INT16_SCALE;
            x * x
        })
        .sum();
    (sum / (2 * frames.len()) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::samples::SampleRef;

    fn pipeline() -> Pipeline {
        Pipeline::with_threads(2).unwrap()
    }

    fn sample(frames: Vec<[i16; 2]>) -> Sample {
        Sample::new(frames, 1.0)
    }

    fn store_with(keys: &[(u8, &[usize])]) -> SampleStore {
        let mut store = SampleStore::new();
        for (key, layers) in keys {
            store.set_layers(
                *key,
                layers
                    .iter()
                    .map(|count| (0..*count).map(|_| sample(vec![[500, 500]; 32])).collect())
                    .collect(),
            );
        }
        store
    }

    #[test]
    fn test_fill_covers_every_key() {
        for seeds in [vec![0u8], vec![127], vec![64], vec![10, 100]] {
            let mut store = SampleStore::new();
            for key in &seeds {
                store.set_layers(*key, vec![vec![sample(vec![[1, 1]; 4])]]);
            }
            pipeline().fill(&mut store);
            for key in 0..=127u8 {
                assert!(store.layer_count(key) >= 1, "key {key} empty, seeds {seeds:?}");
            }
        }
    }

    #[test]
    fn test_fill_takes_nearest_neighbour() {
        let mut store = store_with(&[(10, &[1]), (20, &[1, 1])]);
        pipeline().fill(&mut store);

        assert_eq!(store.layer_count(0), 1);
        assert_eq!(store.layer_count(14), 1);
        assert_eq!(store.layer_count(16), 2);
        assert_eq!(store.layer_count(127), 2);

        // Key 15 is equidistant; the lower neighbour wins.
        assert_eq!(store.layer_count(15), 1);

        let filled = store.sample(SampleRef::new(12, 0, 0)).unwrap();
        assert!(!filled.is_owned());
        assert_relative_eq!(filled.speed(), 2f64.powf(2.0 / 12.0));
    }

    #[test]
    fn test_fill_empty_store() {
        let mut store = SampleStore::new();
        pipeline().fill(&mut store);
        assert_eq!(store.sample_count(), 0);
    }

    #[test]
    fn test_borrow_distance_zero_is_noop() {
        let mut store = store_with(&[(60, &[1]), (61, &[1])]);
        pipeline().borrow(&mut store, 0);
        assert_eq!(store.variation_count(60, 0), 1);
        assert_eq!(store.variation_count(61, 0), 1);
    }

    #[test]
    fn test_borrow() {
        let mut store = store_with(&[(58, &[1]), (60, &[2]), (61, &[1]), (64, &[1, 1])]);
        pipeline().borrow(&mut store, 2);

        // 60 borrows from 58 (d=2) and 61 (d=1), only owned samples.
        assert_eq!(store.variation_count(60, 0), 4);
        let from_61 = store.sample(SampleRef::new(60, 0, 2)).unwrap();
        assert!(!from_61.is_owned());
        assert_relative_eq!(from_61.speed(), 2f64.powf(-1.0 / 12.0));
        let from_58 = store.sample(SampleRef::new(60, 0, 3)).unwrap();
        assert_relative_eq!(from_58.speed(), 2f64.powf(2.0 / 12.0));

        // 61 only reaches 60. 64 has no populated neighbour within range.
        assert_eq!(store.variation_count(61, 0), 3);
        assert_eq!(store.variation_count(64, 0), 1);

        // Empty keys are left alone.
        assert_eq!(store.layer_count(59), 0);
        assert_eq!(store.layer_count(62), 0);
    }

    #[test]
    fn test_fake_layer() {
        let ramp: Vec<[i16; 2]> = (0..200).map(|i| [(i * 100) as i16, (i * 50) as i16]).collect();
        let mut store = SampleStore::new();
        store.set_layers(60, vec![vec![sample(ramp.clone()), sample(ramp.clone())]]);
        store.set_layers(61, vec![vec![sample(ramp.clone())], vec![sample(ramp.clone())]]);

        pipeline().fake_layer(&mut store, 2);

        assert_eq!(store.layer_count(60), 2);
        assert_eq!(store.variation_count(60, 0), 2);
        assert_eq!(store.variation_count(60, 1), 2);
        let original = store.sample(SampleRef::new(60, 1, 0)).unwrap();
        assert_eq!(original.frames(), ramp.as_slice());
        let soft = store.sample(SampleRef::new(60, 0, 0)).unwrap();
        assert!(soft.is_owned());
        assert_eq!(soft.len(), ramp.len());
        assert_ne!(soft.frames(), ramp.as_slice());

        // Keys with more than one layer are untouched.
        assert_eq!(store.layer_count(61), 2);
        assert_eq!(
            store.sample(SampleRef::new(61, 0, 0)).unwrap().frames(),
            ramp.as_slice()
        );
    }

    #[test]
    fn test_crop() {
        let frames = vec![[0, 0], [10, -5], [-3, -400], [2000, 0], [0, 0]];
        assert_eq!(crop_start(&frames, 0), 1);
        assert_eq!(crop_start(&frames, 9), 1);
        assert_eq!(crop_start(&frames, 10), 2);
        assert_eq!(crop_start(&frames, 399), 2);
        assert_eq!(crop_start(&frames, 400), 3);
        assert_eq!(crop_start(&frames, 2000), frames.len());

        // A frame sitting exactly on the threshold doesn't count.
        assert_eq!(crop_start(&[[10, 0], [11, 0]], 10), 1);
        assert_eq!(crop_start(&[[0, 0]; 16], 0), 16);

        let mut store = SampleStore::new();
        store.set_layers(60, vec![vec![sample(frames.clone())]]);
        // 399 / 32768 of full scale.
        pipeline().crop(&mut store, 399.5 * INT16_SCALE);
        assert_eq!(store.sample(SampleRef::new(60, 0, 0)).unwrap().start(), 2);

        pipeline().crop(&mut store, 1.0);
        assert_eq!(store.sample(SampleRef::new(60, 0, 0)).unwrap().start(), 5);
    }

    #[test]
    fn test_crop_default_threshold_skips_silence() {
        let mut frames = vec![[0, 0]; 4];
        frames.push([0, -1]);
        let mut store = SampleStore::new();
        store.set_layers(60, vec![vec![sample(frames), sample(vec![[0, 0]; 16])]]);

        pipeline().crop(&mut store, PipelineSettings::default().crop_threshold);
        assert_eq!(store.sample(SampleRef::new(60, 0, 0)).unwrap().start(), 4);
        assert_eq!(store.sample(SampleRef::new(60, 0, 1)).unwrap().start(), 16);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_relative_eq!(rms(&[[16384, -16384]; 10]), 0.5);
        assert_relative_eq!(rms(&[[16384, 0]; 10]), 0.5 / 2f64.sqrt());
    }

    #[test]
    fn test_rms_window_starts_at_crop() {
        // 10 silent frames, then 48 loud frames; the window only sees the loud part.
        let mut frames = vec![[0, 0]; 10];
        frames.extend(vec![[8192, 8192]; 48]);
        let mut store = SampleStore::new();
        store.set_layers(60, vec![vec![sample(frames)]]);

        let p = pipeline();
        p.crop(&mut store, 0.1);
        p.compute_rms(&mut store, 0.001);
        let s = store.sample(SampleRef::new(60, 0, 0)).unwrap();
        assert_eq!(s.start(), 10);
        assert_relative_eq!(s.rms(), 0.25);
    }

    #[test]
    fn test_rms_silent_sample() {
        let mut store = SampleStore::new();
        store.set_layers(60, vec![vec![sample(vec![[0, 0]; 16])]]);
        let p = pipeline();
        p.crop(&mut store, 0.5);
        p.compute_rms(&mut store, 0.25);
        let s = store.sample(SampleRef::new(60, 0, 0)).unwrap();
        assert_eq!(s.start(), 16);
        assert_eq!(s.rms(), 0.0);
    }
}

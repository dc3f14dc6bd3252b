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
//! Loading of an instrument's `samples/` directory.
//!
//! Files are named `on-<key>-<layer>-<variation>.<ext>` with 1-based layer and variation numbers.
//! Anything that doesn't parse, decode, or match the fixed stereo 48 kHz format is skipped with a
//! warning; the rest of the directory still loads.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info, warn};

use super::{Sample, SampleError, SampleRef, SampleStore};
use crate::audio::{RawFrame, SAMPLE_RATE};
use crate::config::Tuning;

/// What a directory load produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    /// Bytes of decoded audio.
    pub memory: usize,
}

/// Parses `on-<key>-<layer>-<variation>` into a 0-based sample reference. Anything after the
/// variation's digits (an extension, `_soft`, another `-` field) is ignored.
pub fn parse_sample_name(name: &str) -> Result<SampleRef, SampleError> {
    let bad = || SampleError::BadName(name.to_string());

    let rest = name.strip_prefix("on-").ok_or_else(bad)?;
    let (key, rest) = leading_number(rest).ok_or_else(bad)?;
    let (layer, rest) = leading_number(rest.strip_prefix('-').ok_or_else(bad)?).ok_or_else(bad)?;
    let (variation, _) =
        leading_number(rest.strip_prefix('-').ok_or_else(bad)?).ok_or_else(bad)?;

    if key > 127 || !(1..=128).contains(&layer) || !(1..=128).contains(&variation) {
        return Err(bad());
    }
    let key = u8::try_from(key).map_err(|_| bad())?;
    let layer = u8::try_from(layer - 1).map_err(|_| bad())?;
    let variation = u8::try_from(variation - 1).map_err(|_| bad())?;
    Ok(SampleRef::new(key, layer, variation))
}

/// Splits the leading run of ASCII digits off `s`. None if there are no digits or they overflow.
fn leading_number(s: &str) -> Option<(u16, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let number = s[..end].parse::<u16>().ok()?;
    Some((number, &s[end..]))
}

/// Loads every sample in `dir` into a new store. Fails only if the directory can't be read.
pub fn load_directory(dir: &Path, tuning: &Tuning) -> io::Result<(SampleStore, LoadReport)> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((name, entry.path()));
    }
    entries.sort();

    let mut report = LoadReport::default();
    let mut named = Vec::with_capacity(entries.len());
    for (name, path) in entries {
        match parse_sample_name(&name) {
            Ok(r) => named.push((r, name, path)),
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping file");
                report.skipped += 1;
            }
        }
    }

    let decoded: Vec<(SampleRef, PathBuf, Result<Sample, SampleError>)> = named
        .into_par_iter()
        .map(|(r, name, path)| {
            let speed = (tuning.semitones(&name) / 12.0).exp2();
            let sample = decode(&path, speed);
            (r, path, sample)
        })
        .collect();

    // key -> layer -> variation, each ordered by the numbers in the file names.
    let mut grouped: BTreeMap<u8, BTreeMap<u8, BTreeMap<u8, Sample>>> = BTreeMap::new();
    for (r, path, sample) in decoded {
        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping sample");
                report.skipped += 1;
                continue;
            }
        };
        let variations = grouped
            .entry(r.key)
            .or_default()
            .entry(r.layer)
            .or_default();
        if variations.contains_key(&r.variation) {
            warn!(path = ?path, sample = %r, "Duplicate sample, skipping");
            report.skipped += 1;
            continue;
        }
        debug!(path = ?path, frames = sample.len(), speed = sample.speed(), "Sample decoded");
        report.loaded += 1;
        report.memory += sample.memory_size();
        variations.insert(r.variation, sample);
    }

    let mut store = SampleStore::new();
    for (key, layers) in grouped {
        if !is_contiguous(layers.keys()) {
            warn!(key, layers = ?layers.keys().collect::<Vec<_>>(), "Missing layers, compacting");
        }
        let layers: Vec<Vec<Sample>> = layers
            .into_iter()
            .map(|(layer, variations)| {
                if !is_contiguous(variations.keys()) {
                    warn!(
                        key,
                        layer = u16::from(layer) + 1,
                        variations = ?variations.keys().map(|v| u16::from(*v) + 1).collect::<Vec<_>>(),
                        "Missing variations, compacting"
                    );
                }
                variations.into_values().collect()
            })
            .collect();
        store.set_layers(key, layers);
    }

    info!(
        dir = ?dir,
        loaded = report.loaded,
        skipped = report.skipped,
        memory_kb = report.memory / 1024,
        "Samples loaded"
    );
    Ok((store, report))
}

fn is_contiguous<'a>(indices: impl Iterator<Item = &'a u8>) -> bool {
    indices.enumerate().all(|(i, index)| i == usize::from(*index))
}

/// Decodes a stereo 48 kHz file into 16 bit frames.
fn decode(path: &Path, speed: f64) -> Result<Sample, SampleError> {
    let decode_error = |source| SampleError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|source| SampleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SampleError::Empty(path.to_path_buf()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let channels = params.channels.map_or(0, |c| c.count());
    let sample_rate = params.sample_rate.unwrap_or(0);
    if channels != 2 || sample_rate != SAMPLE_RATE {
        return Err(SampleError::FormatRejected {
            channels,
            sample_rate,
        });
    }

    let mut decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut frames: Vec<RawFrame> = Vec::new();
    if let Some(n_frames) = params.n_frames {
        frames.reserve(usize::try_from(n_frames).unwrap_or(0));
    }

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = ?path, error = e, "Skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };

        let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        frames.extend(
            buffer
                .samples()
                .chunks_exact(2)
                .map(|pair| [pair[0], pair[1]]),
        );
    }

    if frames.is_empty() {
        return Err(SampleError::Empty(path.to_path_buf()));
    }
    Ok(Sample::new(frames, speed))
}

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
//! A real-time multi-layer, round-robin sample instrument engine.
//!
//! Samples are loaded per key, per velocity layer and per round-robin variation, preprocessed
//! once at load time, and mixed on the host's audio thread in response to MIDI performance
//! events.

pub mod audio;
pub mod config;
pub mod controls;
pub mod engine;
pub mod midi;
pub mod samples;
#[cfg(test)]
mod testutil;

pub use engine::{Engine, EngineConfig, EngineError, EngineState};

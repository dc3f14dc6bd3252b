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
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ConfigError;
use crate::controls::{ControlBank, ControlId};

/// The saved state of one control. Every field is optional when loading.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Bound MIDI controller. Negative or absent means unbound.
    #[serde(rename = "MIDI", default, skip_serializing_if = "Option::is_none")]
    pub midi: Option<i64>,
    #[serde(rename = "Max", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Value in natural units (milliseconds, semitones, ...).
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// The contents of controls.conf: one table per control, keyed by control name.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlsFile {
    pub controls: BTreeMap<String, ControlRecord>,
}

impl ControlsFile {
    pub fn read(path: &Path) -> Result<ControlsFile, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ControlsFile::parse(&text)
    }

    pub fn parse(text: &str) -> Result<ControlsFile, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string(self)?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Captures the committed state of every control.
    pub fn from_bank(bank: &ControlBank) -> ControlsFile {
        let controls = ControlId::ALL
            .into_iter()
            .map(|id| {
                let record = ControlRecord {
                    midi: bank.midi(id).map(i64::from),
                    max: Some(bank.max(id)),
                    value: Some(bank.value_gui(id)),
                };
                (id.name().to_string(), record)
            })
            .collect();
        ControlsFile { controls }
    }

    /// Applies every present field to the bank's pending state: MIDI binds, Max goes through
    /// `set_max` and Value through `update_direct`. Unknown sections are ignored.
    pub fn apply(&self, bank: &ControlBank) {
        for (name, record) in &self.controls {
            let Some(id) = ControlId::from_name(name) else {
                warn!(control = %name, "Ignoring unknown control");
                continue;
            };
            if let Some(midi) = record.midi {
                let controller = u8::try_from(midi).ok().filter(|c| *c <= 127);
                if midi >= 0 && controller.is_none() {
                    warn!(control = %id, midi, "MIDI controller out of range, unbinding");
                }
                bank.bind_midi(id, controller);
            }
            if let Some(max) = record.max {
                bank.set_max(id, max);
            }
            if let Some(value) = record.value {
                bank.update_direct(id, value);
            }
            debug!(control = %id, record = ?record, "Control loaded");
        }
    }
}

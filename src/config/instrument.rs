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
use std::path::Path;
use std::str::FromStr;

use tracing::{info, warn};

use super::{ConfigError, IniFile};
use crate::samples::PipelineSettings;

const SECTION: &str = "Config";

/// Reads the pipeline settings from config.conf. A missing or unreadable file, or a bad value,
/// falls back to the defaults with a warning.
pub fn load_settings(path: &Path) -> PipelineSettings {
    if !path.exists() {
        info!(path = ?path, "No config file, using default settings");
        return PipelineSettings::default();
    }
    match IniFile::read(path) {
        Ok(ini) => settings_from_ini(&ini),
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to read config file, using default settings");
            PipelineSettings::default()
        }
    }
}

pub(crate) fn settings_from_ini(ini: &IniFile) -> PipelineSettings {
    let defaults = PipelineSettings::default();

    let rr_borrow = read::<i64>(ini, "RRBorrow").map_or(defaults.rr_borrow, |v| {
        u32::try_from(v.max(0)).unwrap_or(u32::MAX)
    });
    let fake_layer_order = read::<i64>(ini, "FakeRCLayer").map_or(defaults.fake_layer_order, |v| {
        u32::try_from(v.max(0)).unwrap_or(u32::MAX)
    });
    let crop_threshold =
        read::<f64>(ini, "CropThresh").map_or(defaults.crop_threshold, |v| v.max(0.0));
    let rms_time = read::<f64>(ini, "RMSTime")
        .filter(|v| *v > 0.0)
        .unwrap_or(defaults.rms_time);

    let settings = PipelineSettings {
        fake_layer_order,
        rr_borrow,
        crop_threshold,
        rms_time,
    };
    info!(
        rr_borrow = settings.rr_borrow,
        fake_rc_layer = settings.fake_layer_order,
        crop_threshold = settings.crop_threshold,
        rms_time = settings.rms_time,
        "Instrument settings"
    );
    settings
}

fn read<T: FromStr>(ini: &IniFile, key: &str) -> Option<T> {
    let raw = ini.get(SECTION, key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            let e = ConfigError::Parse {
                key: key.to_string(),
                value: raw.to_string(),
            };
            warn!(error = %e, "Ignoring config value");
            None
        }
    }
}

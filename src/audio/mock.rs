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
use std::{error::Error, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::info;

use crate::engine::BlockRenderer;

/// A mock device. Doesn't stream anything: callers pull blocks from it by hand.
#[derive(Clone)]
pub struct Device {
    name: String,
    renderer: Arc<Mutex<Option<BlockRenderer>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            renderer: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns true if the device holds a renderer.
    pub fn is_active(&self) -> bool {
        self.renderer.lock().is_some()
    }

    /// Renders one block of `frames` frames as the audio thread would. Returns None when the
    /// device is inactive.
    pub fn render_block(&self, frames: usize) -> Option<(Vec<f32>, Vec<f32>)> {
        let mut renderer = self.renderer.lock();
        let renderer = renderer.as_mut()?;
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        renderer.render(&mut left, &mut right);
        Some((left, right))
    }
}

impl crate::audio::Device for Device {
    fn activate(&mut self, renderer: BlockRenderer) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut slot = self.renderer.lock();
        if slot.is_some() {
            return Err(format!("mock device {} is already active", self.name).into());
        }
        info!(device = self.name, max_block = renderer.max_block(), "Mock device active");
        *slot = Some(renderer);
        Ok(())
    }

    fn deactivate(&mut self) {
        if self.renderer.lock().take().is_some() {
            info!(device = self.name, "Mock device inactive");
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

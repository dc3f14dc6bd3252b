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
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Priority used for the render thread when LAYERSAMPLER_THREAD_PRIORITY is unset.
const DEFAULT_RENDER_PRIORITY: u8 = 70;

// Outcome bits. Zero means the callback hasn't run yet.
const APPLIED: u8 = 1 << 0;
const INVALID_PRIORITY: u8 = 1 << 1;
const PRIORITY_FAILED: u8 = 1 << 2;
const RT_ENABLED: u8 = 1 << 3;
const RT_FAILED: u8 = 1 << 4;

/// Scheduling request for the render thread. Built on the management thread from the
/// environment, then applied lazily from inside the first audio callback, since the host
/// owns that thread. The callback never logs; it records what happened in a
/// [`PriorityStatus`] that another thread reports.
#[derive(Debug)]
pub struct RenderPriority {
    priority: u8,
    realtime: bool,
    status: PriorityStatus,
}

/// Shared record of what [`RenderPriority::apply`] did.
#[derive(Debug, Clone, Default)]
pub struct PriorityStatus(Arc<AtomicU8>);

impl RenderPriority {
    /// Reads LAYERSAMPLER_THREAD_PRIORITY (0-99) and LAYERSAMPLER_DISABLE_RT_AUDIO.
    pub fn from_env() -> RenderPriority {
        let priority = std::env::var("LAYERSAMPLER_THREAD_PRIORITY")
            .ok()
            .and_then(|v| parse_priority(&v))
            .unwrap_or(DEFAULT_RENDER_PRIORITY);
        RenderPriority::new(priority, !env_flag("LAYERSAMPLER_DISABLE_RT_AUDIO"))
    }

    fn new(priority: u8, realtime: bool) -> RenderPriority {
        RenderPriority {
            priority,
            realtime,
            status: PriorityStatus::default(),
        }
    }

    /// The requested priority, 0-99.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// A handle for reading the outcome from outside the audio thread.
    pub fn status(&self) -> PriorityStatus {
        self.status.clone()
    }

    /// Applies the priority to the calling thread. Only the first call does anything.
    pub fn apply(&mut self) {
        if self.status.bits() != 0 {
            return;
        }

        let mut outcome = APPLIED;
        match ThreadPriorityValue::try_from(self.priority) {
            Ok(value) => {
                let tp = ThreadPriority::Crossplatform(value);
                if set_current_thread_priority(tp).is_err() {
                    outcome |= PRIORITY_FAILED;
                }
                if self.realtime {
                    outcome |= set_realtime(tp);
                }
            }
            Err(_) => outcome |= INVALID_PRIORITY,
        }
        self.status.0.store(outcome, Ordering::Release);
    }
}

#[cfg(unix)]
fn set_realtime(tp: ThreadPriority) -> u8 {
    use thread_priority::unix::{
        set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
        ThreadSchedulePolicy,
    };
    match set_thread_priority_and_policy(
        thread_native_id(),
        tp,
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    ) {
        Ok(()) => RT_ENABLED,
        Err(_) => RT_FAILED,
    }
}

#[cfg(not(unix))]
fn set_realtime(_: ThreadPriority) -> u8 {
    0
}

impl PriorityStatus {
    fn bits(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// True once the render thread has attempted to apply its priority.
    pub fn is_applied(&self) -> bool {
        self.bits() & APPLIED != 0
    }

    /// Logs the recorded outcome. Returns false, without logging, if nothing is recorded yet.
    pub fn report(&self, priority: u8) -> bool {
        let bits = self.bits();
        if bits & APPLIED == 0 {
            return false;
        }
        if bits & INVALID_PRIORITY != 0 {
            warn!(priority, "Invalid render thread priority");
        }
        if bits & PRIORITY_FAILED != 0 {
            warn!(priority, "Failed to raise render thread priority");
        }
        if bits & RT_ENABLED != 0 {
            info!("Enabled RT SCHED_FIFO for render thread");
        }
        if bits & RT_FAILED != 0 {
            warn!("Failed to set RT SCHED_FIFO for render thread");
        }
        true
    }
}

fn parse_priority(value: &str) -> Option<u8> {
    value.trim().parse::<u8>().ok().filter(|n| *n < 100)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1"
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
}

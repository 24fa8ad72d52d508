use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Drives the rotating key segment a quota counter resets by.
///
/// "Resets" here means nothing ever resets the counter in place — the key
/// itself rotates (§4.6 "resets by key-name rotation rather than by a
/// background job"), so there is no sweeper, no cron, nothing to keep
/// running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Hourly,
    Daily,
}

impl Window {
    /// The segment identifying the window instance we are currently in,
    /// e.g. `2026-07-28` for `Daily`, `2026-07-28T14` for `Hourly`.
    pub fn current_segment(&self) -> String {
        let now = Utc::now();
        match self {
            Window::Daily => now.format("%Y-%m-%d").to_string(),
            Window::Hourly => now.format("%Y-%m-%dT%H").to_string(),
        }
    }

    /// TTL applied to the counter key so an abandoned window's key doesn't
    /// linger forever — generous over the window length since the key
    /// naturally stops being read once its segment rotates out.
    pub fn ttl(&self) -> Duration {
        match self {
            Window::Hourly => Duration::from_secs(2 * 3600),
            Window::Daily => Duration::from_secs(2 * 24 * 3600),
        }
    }
}

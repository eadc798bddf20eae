use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

pub const MOTION_JITTER: Duration = Duration::from_secs(3);

/// Per-channel dead time for motion sensors.
///
/// The window is anchored at the last *admitted* event: suppressed events do
/// not move it, so a burst cannot keep a channel silent forever.
#[derive(Debug)]
pub struct JitterFilter {
    window: Duration,
    last: HashMap<u8, Instant>,
}

impl JitterFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn admit(&mut self, ch: u8, now: Instant) -> bool {
        if let Some(seen) = self.last.get(&ch) {
            if now.saturating_duration_since(*seen) < self.window {
                return false;
            }
        }
        self.last.insert(ch, now);
        true
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

impl Default for JitterFilter {
    fn default() -> Self {
        Self::new(MOTION_JITTER)
    }
}

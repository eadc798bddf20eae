use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Counters shared between the read loop and senders.
#[derive(Debug, Default)]
pub struct LinkStats {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    malformed: AtomicU64,
    acked: AtomicU64,
    timeouts: AtomicU64,
    events: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub malformed: u64,
    pub acked: u64,
    pub timeouts: u64,
    pub events: u64,
    pub suppressed: u64,
}

impl LinkStats {
    pub fn inc_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_events(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

/// Periodic reporter for the listen loop.
#[derive(Debug)]
pub struct StatsReporter {
    interval_s: f64,
    last: Instant,
}

impl StatsReporter {
    pub fn new(interval_s: f64) -> Self {
        Self {
            interval_s,
            last: Instant::now(),
        }
    }

    pub fn maybe_log(&mut self, stats: &LinkStats) {
        if self.interval_s > 0.0 && self.last.elapsed().as_secs_f64() >= self.interval_s {
            let s = stats.snapshot();
            info!(
                frames_in = s.frames_in,
                frames_out = s.frames_out,
                malformed = s.malformed,
                acked = s.acked,
                timeouts = s.timeouts,
                events = s.events,
                suppressed = s.suppressed,
                "link stats"
            );
            self.last = Instant::now();
        }
    }
}

//! Readback throughput accounting
//!
//! Accumulates pixels and frames moved per unit of time spent inside
//! readback. Stereo readbacks count as half a frame each, so a pair of eyes
//! adds up to one frame. When reporting is enabled, a summary line is
//! logged every interval.

use log::info;
use std::time::Duration;

/// Snapshot of readback throughput
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReadbackStats {
    pub frames: f64,
    pub pixels: u64,
    /// Time spent inside readbacks
    pub busy: Duration,
}

impl ReadbackStats {
    pub fn mpixels_per_sec(&self) -> f64 {
        if self.busy.is_zero() {
            return 0.0;
        }
        self.pixels as f64 / 1_000_000.0 / self.busy.as_secs_f64()
    }

    pub fn frames_per_sec(&self) -> f64 {
        if self.busy.is_zero() {
            return 0.0;
        }
        self.frames / self.busy.as_secs_f64()
    }
}

#[derive(Debug)]
pub struct Profiler {
    name: &'static str,
    report: bool,
    interval: Duration,
    frame_start: Option<Duration>,
    window_start: Option<Duration>,
    window: ReadbackStats,
    total: ReadbackStats,
}

impl Profiler {
    pub fn new(name: &'static str, report: bool, interval: Duration) -> Self {
        Self {
            name,
            report,
            interval,
            frame_start: None,
            window_start: None,
            window: ReadbackStats::default(),
            total: ReadbackStats::default(),
        }
    }

    pub fn start_frame(&mut self, now: Duration) {
        self.frame_start = Some(now);
        self.window_start.get_or_insert(now);
    }

    /// Close the frame opened by [`start_frame`](Self::start_frame).
    /// Returns the window that was just reported, if any.
    pub fn end_frame(&mut self, now: Duration, pixels: u64, weight: f64) -> Option<ReadbackStats> {
        let start = self.frame_start.take()?;
        let busy = now.saturating_sub(start);
        for stats in [&mut self.window, &mut self.total] {
            stats.frames += weight;
            stats.pixels += pixels;
            stats.busy += busy;
        }

        let window_start = self.window_start.unwrap_or(start);
        if now.saturating_sub(window_start) < self.interval {
            return None;
        }
        let window = std::mem::take(&mut self.window);
        self.window_start = Some(now);
        if self.report {
            info!(
                "{}: {:.2} Mpixels/sec, {:.2} frames/sec",
                self.name,
                window.mpixels_per_sec(),
                window.frames_per_sec()
            );
        }
        Some(window)
    }

    /// Totals since the profiler was created
    pub fn totals(&self) -> ReadbackStats {
        self.total
    }
}

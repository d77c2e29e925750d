//! Build context threaded through every pipeline stage.
//!
//! The context collects human-readable diagnostics and per-stage timings for
//! one pipeline run. Errors are delivered through return values, never
//! through the context; the log channel only carries diagnostics.

use std::collections::HashMap;
use std::time::Duration;
use web_time::Instant;

/// Category of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    /// Informational progress messages
    Progress,
    /// Degraded-but-usable conditions
    Warning,
    /// Failures and invariant violations
    Error,
}

/// A single log entry recorded during a build.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Entry category
    pub category: LogCategory,
    /// Human-readable message
    pub message: String,
}

/// Labels for the pipeline stage timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerLabel {
    /// Whole pipeline run
    Total,
    /// Triangle rasterization into the sparse heightfield
    RasterizeTriangles,
    /// Low-hanging obstacle rescue filter
    FilterLowObstacles,
    /// Ledge span filter
    FilterLedgeSpans,
    /// Low-clearance span filter
    FilterLowHeightSpans,
    /// Compact heightfield construction
    BuildCompactHeightfield,
    /// Walkable area erosion
    ErodeArea,
    /// Box/cylinder/convex volume area marking
    MarkAreas,
    /// Area median filter
    MedianArea,
    /// Distance field construction
    BuildDistanceField,
    /// Distance field: chamfer transform
    DistanceFieldDist,
    /// Distance field: box blur
    DistanceFieldBlur,
    /// Region partitioning
    BuildRegions,
    /// Watershed level loop
    RegionsWatershed,
    /// Watershed region expansion
    RegionsExpand,
    /// Watershed flood fill
    RegionsFlood,
    /// Region postprocessing (filter and merge)
    RegionsFilter,
}

/// Logging and profiling collaborator for one pipeline run.
///
/// Single-owner: create one per build, inspect it afterwards. Timers
/// accumulate across repeated start/stop pairs of the same label.
#[derive(Debug)]
pub struct BuildContext {
    logs: Vec<LogEntry>,
    active: HashMap<TimerLabel, Instant>,
    accumulated: HashMap<TimerLabel, Duration>,
    timing_enabled: bool,
    logging_enabled: bool,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    /// Creates a context with logging and timing enabled.
    pub fn new() -> Self {
        Self {
            logs: Vec::new(),
            active: HashMap::new(),
            accumulated: HashMap::new(),
            timing_enabled: true,
            logging_enabled: true,
        }
    }

    /// Enables or disables timer collection.
    pub fn set_timing_enabled(&mut self, enabled: bool) {
        self.timing_enabled = enabled;
    }

    /// Enables or disables log collection.
    pub fn set_logging_enabled(&mut self, enabled: bool) {
        self.logging_enabled = enabled;
    }

    /// Records a log entry.
    pub fn log(&mut self, category: LogCategory, message: impl Into<String>) {
        if self.logging_enabled {
            self.logs.push(LogEntry {
                category,
                message: message.into(),
            });
        }
    }

    /// Records a progress message.
    pub fn progress(&mut self, message: impl Into<String>) {
        self.log(LogCategory::Progress, message);
    }

    /// Records a warning.
    pub fn warning(&mut self, message: impl Into<String>) {
        self.log(LogCategory::Warning, message);
    }

    /// Records an error diagnostic.
    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogCategory::Error, message);
    }

    /// Starts (or restarts) the timer for a label.
    pub fn start_timer(&mut self, label: TimerLabel) {
        if self.timing_enabled {
            self.active.insert(label, Instant::now());
        }
    }

    /// Stops the timer for a label, adding the elapsed time to its total.
    pub fn stop_timer(&mut self, label: TimerLabel) {
        if self.timing_enabled {
            if let Some(start) = self.active.remove(&label) {
                *self.accumulated.entry(label).or_default() += start.elapsed();
            }
        }
    }

    /// Total accumulated time for a label, in microseconds.
    pub fn accumulated_us(&self, label: TimerLabel) -> u64 {
        self.accumulated
            .get(&label)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    /// All log entries recorded so far.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Log entries of one category.
    pub fn logs_by_category(&self, category: LogCategory) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(move |e| e.category == category)
    }

    /// Clears logs and timers.
    pub fn reset(&mut self) {
        self.logs.clear();
        self.active.clear();
        self.accumulated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_logging() {
        let mut ctx = BuildContext::new();
        ctx.progress("stage started");
        ctx.warning("something looked off");
        ctx.error("something failed");

        assert_eq!(ctx.logs().len(), 3);
        assert_eq!(ctx.logs()[0].category, LogCategory::Progress);
        assert_eq!(ctx.logs_by_category(LogCategory::Warning).count(), 1);
        assert_eq!(ctx.logs_by_category(LogCategory::Error).count(), 1);
    }

    #[test]
    fn test_logging_disabled() {
        let mut ctx = BuildContext::new();
        ctx.set_logging_enabled(false);
        ctx.progress("dropped");
        assert!(ctx.logs().is_empty());
    }

    #[test]
    fn test_timer_accumulates() {
        let mut ctx = BuildContext::new();

        for _ in 0..2 {
            ctx.start_timer(TimerLabel::RasterizeTriangles);
            thread::sleep(Duration::from_millis(5));
            ctx.stop_timer(TimerLabel::RasterizeTriangles);
        }

        assert!(ctx.accumulated_us(TimerLabel::RasterizeTriangles) >= 10_000);
        assert_eq!(ctx.accumulated_us(TimerLabel::Total), 0);
    }

    #[test]
    fn test_stop_without_start_is_harmless() {
        let mut ctx = BuildContext::new();
        ctx.stop_timer(TimerLabel::BuildRegions);
        assert_eq!(ctx.accumulated_us(TimerLabel::BuildRegions), 0);
    }

    #[test]
    fn test_reset() {
        let mut ctx = BuildContext::new();
        ctx.progress("entry");
        ctx.start_timer(TimerLabel::Total);
        ctx.stop_timer(TimerLabel::Total);
        ctx.reset();
        assert!(ctx.logs().is_empty());
        assert_eq!(ctx.accumulated_us(TimerLabel::Total), 0);
    }
}

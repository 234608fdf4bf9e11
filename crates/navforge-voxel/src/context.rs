//! Build context providing per-stage profiling for pipeline runs
//!
//! Messages go straight to the `log` facade, the context only keeps the
//! accumulated stage timings so callers can report where build time went.

use std::collections::HashMap;
use std::time::Duration;
use web_time::Instant;

/// Timer categories for the pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerCategory {
    /// Total build time of one tile
    Total,
    /// Heightfield rasterization
    Rasterization,
    /// Heightfield filtering
    Filtering,
    /// Compact heightfield building
    CompactHeightfield,
    /// Walkable area erosion and area marking
    AreaMarking,
    /// Distance field and region building
    Regions,
    /// Contour extraction
    Contours,
    /// Polygon mesh generation
    PolyMesh,
    /// Detail mesh generation
    DetailMesh,
    /// Heightfield layer extraction
    Layers,
    /// Tile cache compression and obstacle carving
    TileCache,
}

/// Accumulated timing for one category
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerEntry {
    /// Total time spent in the category
    pub duration: Duration,
    /// Number of completed measurements
    pub count: usize,
}

/// Context for pipeline runs
#[derive(Debug)]
pub struct BuildContext {
    active_timers: HashMap<TimerCategory, Instant>,
    timers: HashMap<TimerCategory, TimerEntry>,
    enable_timing: bool,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    /// Creates a new context with timing enabled
    pub fn new() -> Self {
        Self {
            active_timers: HashMap::new(),
            timers: HashMap::new(),
            enable_timing: true,
        }
    }

    /// Enables or disables performance timing
    pub fn set_timing_enabled(&mut self, enabled: bool) {
        self.enable_timing = enabled;
    }

    /// Starts a timer for the given category
    pub fn start_timer(&mut self, category: TimerCategory) {
        if self.enable_timing {
            self.active_timers.insert(category, Instant::now());
        }
    }

    /// Stops a timer and adds the elapsed time to the category
    pub fn stop_timer(&mut self, category: TimerCategory) {
        if let Some(start_time) = self.active_timers.remove(&category) {
            let entry = self.timers.entry(category).or_default();
            entry.duration += start_time.elapsed();
            entry.count += 1;
        }
    }

    /// Runs `f` while timing it under `category`
    pub fn timed<T>(&mut self, category: TimerCategory, f: impl FnOnce(&mut Self) -> T) -> T {
        self.start_timer(category);
        let result = f(self);
        self.stop_timer(category);
        result
    }

    /// Gets the total duration for a completed timer
    pub fn get_timer_duration(&self, category: TimerCategory) -> Option<Duration> {
        self.timers.get(&category).map(|entry| entry.duration)
    }

    /// Gets the number of completed measurements for a timer
    pub fn get_timer_count(&self, category: TimerCategory) -> usize {
        self.timers
            .get(&category)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Clears all timers
    pub fn reset(&mut self) {
        self.active_timers.clear();
        self.timers.clear();
    }

    /// Logs a summary of the accumulated timers at debug level
    pub fn log_timer_summary(&self) {
        let mut sorted: Vec<_> = self.timers.iter().collect();
        sorted.sort_by(|a, b| b.1.duration.cmp(&a.1.duration));
        for (category, entry) in sorted {
            log::debug!(
                "{:20} {:8.2}ms ({} calls)",
                format!("{category:?}"),
                entry.duration.as_secs_f64() * 1000.0,
                entry.count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_accumulate() {
        let mut ctx = BuildContext::new();
        ctx.start_timer(TimerCategory::Rasterization);
        ctx.stop_timer(TimerCategory::Rasterization);
        let value = ctx.timed(TimerCategory::Rasterization, |_| 7);
        assert_eq!(value, 7);
        assert_eq!(ctx.get_timer_count(TimerCategory::Rasterization), 2);
        assert!(ctx.get_timer_duration(TimerCategory::Contours).is_none());
    }

    #[test]
    fn test_disabled_timing_records_nothing() {
        let mut ctx = BuildContext::new();
        ctx.set_timing_enabled(false);
        ctx.timed(TimerCategory::Total, |_| ());
        assert_eq!(ctx.get_timer_count(TimerCategory::Total), 0);
        ctx.set_timing_enabled(true);
        ctx.timed(TimerCategory::Total, |_| ());
        ctx.reset();
        assert_eq!(ctx.get_timer_count(TimerCategory::Total), 0);
    }
}

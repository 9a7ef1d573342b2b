//! High-resolution timer for frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts presented frames and reports a rate once per interval.
#[derive(Debug)]
pub struct FpsCounter {
    timer: Timer,
    interval: Duration,
    frames: u32,
}

impl FpsCounter {
    /// Reports once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            timer: Timer::new(),
            interval,
            frames: 0,
        }
    }

    /// Records one frame. Returns the frame rate when a full interval has
    /// passed since the last report, and starts a new interval.
    pub fn frame(&mut self) -> Option<f32> {
        self.frames += 1;
        let elapsed = self.timer.elapsed();
        if elapsed < self.interval {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.timer.reset();
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_measures_since_last_tick() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        let first = timer.tick();
        let second = timer.tick();
        assert!(first >= Duration::from_millis(5));
        assert!(second < first);
        assert!(timer.elapsed() >= first);
    }

    #[test]
    fn test_fps_waits_for_interval() {
        let mut counter = FpsCounter::with_interval(Duration::from_secs(3600));
        for _ in 0..10 {
            assert!(counter.frame().is_none());
        }
    }

    #[test]
    fn test_fps_reports_and_restarts() {
        let mut counter = FpsCounter::with_interval(Duration::from_millis(10));
        counter.frame();
        std::thread::sleep(Duration::from_millis(15));
        let fps = counter.frame().unwrap();
        assert!(fps > 0.0);
        assert!(counter.frame().is_none());
    }
}

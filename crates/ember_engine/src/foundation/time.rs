//! Time management utilities

use std::time::Instant;

/// Frame timer producing the elapsed time handed to render systems
pub struct FrameTimer {
    last_frame: Instant,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
    max_delta: f32,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            last_frame: Instant::now(),
            delta_time: 0.0,
            total_time: 0.0,
            frame_count: 0,
            max_delta: f32::MAX,
        }
    }

    /// Clamp reported frame times, e.g. after the window was minimized for a while
    pub fn with_max_delta(mut self, seconds: f32) -> Self {
        self.max_delta = seconds;
        self
    }

    /// Advance the timer, returning seconds since the previous tick
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        self.advance(now.duration_since(self.last_frame).as_secs_f32());
        self.last_frame = now;
        self.delta_time
    }

    fn advance(&mut self, elapsed: f32) {
        self.delta_time = elapsed.min(self.max_delta);
        self.total_time += self.delta_time;
        self.frame_count += 1;
    }

    /// Seconds between the two most recent ticks
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Total elapsed time across all ticks
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Number of ticks so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average FPS since timer creation
    pub fn average_fps(&self) -> f32 {
        if self.total_time > 0.0 {
            self.frame_count as f32 / self.total_time
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_advance_clamps_long_frames() {
        let mut timer = FrameTimer::new().with_max_delta(0.25);
        timer.advance(3.0);
        assert_relative_eq!(timer.delta_time(), 0.25);
        timer.advance(0.1);
        assert_relative_eq!(timer.total_time(), 0.35);
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_average_fps() {
        let mut timer = FrameTimer::new();
        assert_relative_eq!(timer.average_fps(), 0.0);
        for _ in 0..4 {
            timer.advance(0.5);
        }
        assert_relative_eq!(timer.average_fps(), 2.0);
    }
}

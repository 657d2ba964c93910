//! Frame timing and fixed-step accumulation.
//!
//! The scene owns a [`Time`] and a [`FixedTimestep`] and advances both at
//! the start of every `update`. Hosts that drive frames from the wall clock
//! can use a [`FrameClock`] to measure the delta they pass in.

use std::time::{Duration, Instant};

/// Frame timing of one scene.
#[derive(Clone, Copy, Debug)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
    fixed_delta: Duration,
}

impl Time {
    pub fn new(fixed_delta: Duration) -> Self {
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            fixed_delta,
        }
    }

    pub(crate) fn advance(&mut self, delta: Duration) {
        self.delta = delta;
        self.elapsed += delta;
        self.frame_count += 1;
    }

    /// Delta passed to the current `update`.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Delta time in seconds (f32), the most common way to use it.
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Sum of every delta so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Number of `update` calls so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Length of one FixedUpdate tick.
    pub fn fixed_delta(&self) -> Duration {
        self.fixed_delta
    }

    pub fn fixed_delta_secs(&self) -> f32 {
        self.fixed_delta.as_secs_f32()
    }
}

/// Converts variable frame deltas into a whole number of fixed ticks.
#[derive(Clone, Copy, Debug)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    max_steps_per_frame: Option<u32>,
}

impl FixedTimestep {
    /// A zero `step` is replaced by one nanosecond.
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::from_nanos(1)),
            accumulator: Duration::ZERO,
            max_steps_per_frame: None,
        }
    }

    /// Cap the ticks returned by one `accumulate`. Backlog beyond the cap is
    /// discarded.
    pub fn with_max_steps(mut self, max_steps_per_frame: Option<u32>) -> Self {
        self.max_steps_per_frame = max_steps_per_frame;
        self
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Time carried over to the next frame.
    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    /// Add `delta` and return how many fixed ticks are due.
    pub fn accumulate(&mut self, delta: Duration) -> u32 {
        self.accumulator += delta;
        let due = self.accumulator.as_nanos() / self.step.as_nanos();
        let mut steps = u32::try_from(due).unwrap_or(u32::MAX);

        if let Some(max) = self.max_steps_per_frame {
            if steps > max {
                log::warn!(
                    "fixed-step backlog of {steps} ticks clamped to {max}; dropping {:?}",
                    self.step * (steps - max)
                );
                steps = max;
                self.accumulator = rem(self.accumulator, self.step);
                return steps;
            }
        }
        self.accumulator -= self.step * steps;
        steps
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

fn rem(value: Duration, step: Duration) -> Duration {
    let nanos = value.as_nanos() % step.as_nanos();
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Measures the wall-clock time between ticks.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    startup: Instant,
    frame_start: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            startup: now,
            frame_start: now,
        }
    }

    /// Time since the previous tick (or since creation).
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.frame_start;
        self.frame_start = now;
        delta
    }

    pub fn since_startup(&self) -> Duration {
        self.startup.elapsed()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn step_count_over_a_run() {
        let mut fixed = FixedTimestep::new(ms(250));
        let total: u32 = [300, 100, 450, 600].into_iter().map(|d| fixed.accumulate(ms(d))).sum();
        assert_eq!(total, 5);
        assert_eq!(fixed.accumulator(), ms(200));
    }

    #[test]
    fn per_frame_counts() {
        let mut fixed = FixedTimestep::new(ms(250));
        assert_eq!(fixed.accumulate(ms(300)), 1);
        assert_eq!(fixed.accumulate(ms(100)), 0);
        assert_eq!(fixed.accumulate(ms(450)), 2);
        assert_eq!(fixed.accumulate(ms(600)), 2);
    }

    #[test]
    fn unclamped_catch_up() {
        let mut fixed = FixedTimestep::new(ms(10));
        assert_eq!(fixed.accumulate(Duration::from_secs(1)), 100);
        assert_eq!(fixed.accumulator(), Duration::ZERO);
    }

    #[test]
    fn clamp_discards_backlog() {
        let mut fixed = FixedTimestep::new(ms(10)).with_max_steps(Some(4));
        assert_eq!(fixed.accumulate(ms(105)), 4);
        assert_eq!(fixed.accumulator(), ms(5));
        assert_eq!(fixed.accumulate(ms(5)), 1);
    }

    #[test]
    fn time_advances() {
        let mut time = Time::new(ms(16));
        time.advance(ms(20));
        time.advance(ms(30));
        assert_eq!(time.frame_count(), 2);
        assert_eq!(time.elapsed(), ms(50));
        assert_eq!(time.delta(), ms(30));
        assert_eq!(time.fixed_delta(), ms(16));
    }

    #[test]
    fn frame_clock_is_monotonic() {
        let mut clock = FrameClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(a + b <= clock.since_startup());
    }
}

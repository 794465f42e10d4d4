use std::time::{Duration, Instant};
use tracing::warn;

/// Delta time used for the very first frame when nothing better is known.
const DEFAULT_DELTA_TIME: f32 = 1.0 / 60.0;

/// Self-tuning split between OS sleep and busy waiting.
///
/// `granularity` tracks how much the OS tends to oversleep. The frame timer
/// asks the OS for `remaining - granularity` and spins for the rest, and only
/// sleeps at all while more than `threshold` is left. Both start pessimistic,
/// so early frames mostly spin, and shrink as the OS proves accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepCalibration {
    threshold: Duration,
    granularity: Duration,
}

impl SleepCalibration {
    pub const MIN_GRANULARITY: Duration = Duration::from_micros(50);
    pub const MAX_GRANULARITY: Duration = Duration::from_millis(20);

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Feeds back one OS sleep: what was asked for and how long it really took.
    pub fn calibrate(&mut self, requested: Duration, actual: Duration) {
        // Waking early is treated like a perfect sleep, the spin covers it.
        let oversleep = actual.saturating_sub(requested);

        let granularity = if oversleep > self.granularity {
            (self.granularity + oversleep) / 2
        } else {
            self.granularity - (self.granularity - oversleep) / 8
        };

        self.granularity = granularity.clamp(Self::MIN_GRANULARITY, Self::MAX_GRANULARITY);
        self.threshold = self.granularity * 2;
    }

    pub fn wait_until(&mut self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }

            let remaining = deadline - now;
            if remaining > self.threshold {
                let requested = remaining - self.granularity;
                std::thread::sleep(requested);
                self.calibrate(requested, now.elapsed());
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

impl Default for SleepCalibration {
    fn default() -> Self {
        Self {
            threshold: Duration::from_millis(4),
            granularity: Duration::from_millis(2),
        }
    }
}

/// Frame clock: delta time measurement, world time and target-FPS pacing.
#[derive(Debug)]
pub struct FrameTimer {
    target_fps: f32,
    time_scale: f32,
    world_start: Instant,
    frame_start: Option<Instant>,
    delta_time: f32,
    delta_time_raw: f32,
    world_time_total: f64,
    world_time_total_raw: f64,
    frame_time_total: f64,
    frame_count: u64,
    sleep: SleepCalibration,
}

impl FrameTimer {
    pub fn new(target_fps: f32, time_scale: f32) -> Self {
        Self {
            target_fps: target_fps.max(0.0),
            time_scale,
            world_start: Instant::now(),
            frame_start: None,
            delta_time: 0.0,
            delta_time_raw: 0.0,
            world_time_total: 0.0,
            world_time_total_raw: 0.0,
            frame_time_total: 0.0,
            frame_count: 0,
            sleep: SleepCalibration::default(),
        }
    }

    pub fn target_fps(&self) -> f32 {
        self.target_fps
    }

    pub fn set_target_fps(&mut self, fps: f32) {
        self.target_fps = fps.max(0.0);
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale;
    }

    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    pub fn delta_time_raw(&self) -> f32 {
        self.delta_time_raw
    }

    pub fn world_time(&self) -> f64 {
        self.world_time_total
    }

    pub fn world_time_raw(&self) -> f64 {
        self.world_time_total_raw
    }

    pub fn frame_time_total(&self) -> f64 {
        self.frame_time_total
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn calibration(&self) -> SleepCalibration {
        self.sleep
    }

    pub fn uptime(&self) -> Duration {
        self.world_start.elapsed()
    }

    pub fn reset_clock(&mut self) {
        self.world_time_total = 0.0;
        self.world_time_total_raw = 0.0;
    }

    /// Starts a frame. A positive `user_delta_time` is used as is, otherwise
    /// the time since the previous frame start is measured.
    pub fn frame_begin(&mut self, user_delta_time: f32) -> f32 {
        let now = Instant::now();
        let measured = match self.frame_start {
            Some(start) => (now - start).as_secs_f32().max(f32::EPSILON),
            None if self.target_fps > 0.0 => 1.0 / self.target_fps,
            None => DEFAULT_DELTA_TIME,
        };
        self.frame_start = Some(now);

        let raw = if user_delta_time > 0.0 {
            user_delta_time
        } else {
            measured
        };

        self.delta_time_raw = raw;
        self.delta_time = raw * self.time_scale;
        self.world_time_total_raw += raw as f64;
        self.world_time_total += self.delta_time as f64;

        self.delta_time
    }

    /// Ends a frame, sleeping off whatever is left of the target-FPS budget.
    pub fn frame_end(&mut self) {
        self.frame_count += 1;

        let Some(start) = self.frame_start else {
            return;
        };

        let elapsed = start.elapsed();
        self.frame_time_total += elapsed.as_secs_f64();

        if self.target_fps <= 0.0 {
            return;
        }

        let Ok(budget) = Duration::try_from_secs_f32(self.target_fps.recip()) else {
            return;
        };

        if elapsed < budget {
            self.sleep.wait_until(start + budget);
        } else {
            warn!(
                frame = self.frame_count,
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = budget.as_micros() as u64,
                "frame exceeded target fps budget"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversleep_widens_granularity() {
        let mut calibration = SleepCalibration::default();
        let before = calibration.granularity();

        calibration.calibrate(Duration::from_millis(5), Duration::from_millis(12));

        assert!(calibration.granularity() > before);
        assert_eq!(calibration.threshold(), calibration.granularity() * 2);
    }

    #[test]
    fn accurate_sleeps_shrink_toward_os_sleep() {
        let mut calibration = SleepCalibration::default();
        for _ in 0..200 {
            calibration.calibrate(Duration::from_millis(5), Duration::from_millis(5));
        }

        assert_eq!(calibration.granularity(), SleepCalibration::MIN_GRANULARITY);
        assert_eq!(calibration.threshold(), SleepCalibration::MIN_GRANULARITY * 2);
    }

    #[test]
    fn undersleep_counts_as_accurate() {
        let mut calibration = SleepCalibration::default();
        let before = calibration.granularity();

        calibration.calibrate(Duration::from_millis(5), Duration::from_millis(3));

        assert!(calibration.granularity() < before);
    }

    #[test]
    fn user_delta_time_is_scaled() {
        let mut timer = FrameTimer::new(0.0, 2.0);

        assert_eq!(timer.frame_begin(0.5), 1.0);
        assert_eq!(timer.delta_time_raw(), 0.5);
        assert_eq!(timer.world_time(), 1.0);
        assert_eq!(timer.world_time_raw(), 0.5);

        timer.reset_clock();
        assert_eq!(timer.world_time(), 0.0);
    }

    #[test]
    fn first_measured_frame_uses_target_fps() {
        let mut timer = FrameTimer::new(50.0, 1.0);
        assert!((timer.frame_begin(0.0) - 0.02).abs() < 1e-6);

        let mut timer = FrameTimer::new(0.0, 1.0);
        assert!((timer.frame_begin(0.0) - DEFAULT_DELTA_TIME).abs() < 1e-6);
    }

    #[test]
    fn frame_end_paces_to_target_fps() {
        let mut timer = FrameTimer::new(100.0, 1.0);
        let start = Instant::now();

        timer.frame_begin(0.0);
        timer.frame_end();

        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(timer.frame_count(), 1);
    }

    #[test]
    fn unrepresentable_budget_skips_pacing() {
        let mut timer = FrameTimer::new(1e-39, 1.0);

        timer.frame_begin(0.1);
        timer.frame_end();

        assert_eq!(timer.frame_count(), 1);
    }
}

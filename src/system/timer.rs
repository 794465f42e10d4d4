use std::sync::Mutex;

/// Decides on which frames a system runs.
///
/// Sources are advanced once per frame before any system runs, so every
/// worker sees the same answer for the whole frame.
pub trait TickSource: Send + Sync + 'static {
    fn update(&self, delta_time: f32);

    /// Whether systems driven by this source run this frame.
    fn tick(&self) -> bool;

    /// Time since the previous tick, handed to systems as their delta time.
    fn time_elapsed(&self) -> f32;
}

#[derive(Debug, Default)]
struct TimerState {
    accumulated: f32,
    time_elapsed: f32,
    tick: bool,
}

/// Ticks once every `interval` seconds of world time.
#[derive(Debug)]
pub struct Timer {
    interval: f32,
    state: Mutex<TimerState>,
}

impl Timer {
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            state: Mutex::default(),
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }
}

impl TickSource for Timer {
    fn update(&self, delta_time: f32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.accumulated += delta_time;

        if state.accumulated >= self.interval {
            state.time_elapsed = state.accumulated;
            state.accumulated -= self.interval;
            state.tick = true;
        } else {
            state.tick = false;
        }
    }

    fn tick(&self) -> bool {
        self.state.lock().map(|state| state.tick).unwrap_or(false)
    }

    fn time_elapsed(&self) -> f32 {
        self.state
            .lock()
            .map(|state| state.time_elapsed)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_once_per_interval() {
        let timer = Timer::new(0.75);
        let ticks = (0..6)
            .map(|_| {
                timer.update(0.25);
                timer.tick()
            })
            .collect::<Vec<_>>();

        assert_eq!(ticks, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn elapsed_covers_time_since_last_tick() {
        let timer = Timer::new(0.5);
        timer.update(0.3);
        timer.update(0.3);

        assert!(timer.tick());
        assert!((timer.time_elapsed() - 0.6).abs() < 1e-6);
    }
}

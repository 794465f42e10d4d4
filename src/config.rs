use crate::error::{PipelineError, Result};
use std::str::FromStr;

pub const THREADS_VAR: &str = "HIVE_THREADS";
pub const TARGET_FPS_VAR: &str = "HIVE_TARGET_FPS";

/// Start-up settings of an [`App`](crate::app::App).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Worker threads. 0 and 1 both run everything on the calling thread.
    pub threads: usize,
    /// 0 disables frame pacing.
    pub target_fps: f32,
    pub time_scale: f32,
    pub measure_system_time: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            target_fps: 0.0,
            time_scale: 1.0,
            measure_system_time: false,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `HIVE_THREADS` and `HIVE_TARGET_FPS`.
    pub fn from_env() -> Result<Self> {
        Self::default().with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&'static str) -> Option<String>) -> Result<Self> {
        if let Some(threads) = parse(THREADS_VAR, var(THREADS_VAR))? {
            self.threads = threads;
        }

        if let Some(fps) = parse::<f32>(TARGET_FPS_VAR, var(TARGET_FPS_VAR))? {
            self = self.try_with_target_fps(fps)?;
        }

        Ok(self)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_target_fps(mut self, fps: f32) -> Self {
        self.target_fps = fps;
        self
    }

    /// Like [`PipelineConfig::with_target_fps`], but rejects rates that
    /// have no representable frame budget.
    pub fn try_with_target_fps(self, fps: f32) -> Result<Self> {
        let valid = fps == 0.0 || (fps > 0.0 && fps.is_finite() && fps.recip().is_finite());
        if !valid {
            return Err(PipelineError::InvalidConfig {
                key: TARGET_FPS_VAR,
                value: fps.to_string(),
            });
        }

        Ok(self.with_target_fps(fps))
    }

    pub fn with_time_scale(mut self, scale: f32) -> Self {
        self.time_scale = scale;
        self
    }

    pub fn with_system_time(mut self, measure: bool) -> Self {
        self.measure_system_time = measure;
        self
    }
}

fn parse<T: FromStr>(key: &'static str, value: Option<String>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::InvalidConfig { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&'static str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn env_overrides_defaults() {
        let config = PipelineConfig::default()
            .with_vars(vars(&[(THREADS_VAR, "4"), (TARGET_FPS_VAR, " 30 ")]))
            .unwrap();

        assert_eq!(config.threads, 4);
        assert_eq!(config.target_fps, 30.0);
        assert_eq!(config.time_scale, 1.0);
    }

    #[test]
    fn missing_vars_keep_defaults() {
        let config = PipelineConfig::default().with_vars(vars(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = PipelineConfig::default()
            .with_vars(vars(&[(THREADS_VAR, "many")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { key: THREADS_VAR, .. }));

        let err = PipelineConfig::default()
            .with_vars(vars(&[(TARGET_FPS_VAR, "-5")]))
            .unwrap_err();
        assert!(err.to_string().contains(TARGET_FPS_VAR));
    }

    #[test]
    fn target_fps_needs_a_finite_budget() {
        let config = PipelineConfig::default();

        assert!(config.try_with_target_fps(1e-39).is_err());
        assert!(config.try_with_target_fps(f32::INFINITY).is_err());
        assert!(config.try_with_target_fps(f32::NAN).is_err());
        assert!(config.try_with_target_fps(-1.0).is_err());

        assert_eq!(config.try_with_target_fps(0.0).unwrap().target_fps, 0.0);
        assert_eq!(config.try_with_target_fps(60.0).unwrap().target_fps, 60.0);
    }
}

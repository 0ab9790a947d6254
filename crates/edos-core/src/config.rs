//! `edos.toml` configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable simulation. Values are plain seconds (`f64`) so fractional
//! intervals are expressible; use the `Duration` accessors on each section
//! after `validate()` has passed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub control: ControlConfig,
    pub scaling: ScalingConfig,
    pub metrics: MetricsConfig,
    pub load: LoadConfig,
    pub cost: CostConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Period of one control-loop tick.
    pub tick_interval_secs: f64,
    /// Total run length; the loop stops at the first tick boundary past it.
    pub run_duration_secs: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5.0,
            run_duration_secs: 180.0,
        }
    }
}

impl ControlConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_secs)
    }

    pub fn run_duration(&self) -> Duration {
        Duration::from_secs_f64(self.run_duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub cooldown_secs: f64,
    /// Scale up when average CPU is strictly above this percentage.
    pub scale_up_threshold: f64,
    /// Scale down when average CPU is strictly below this percentage.
    pub scale_down_threshold: f64,
    pub min_instances: u32,
    pub max_instances: u32,
    pub eviction: EvictionPolicy,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 20.0,
            scale_up_threshold: 60.0,
            scale_down_threshold: 25.0,
            min_instances: 1,
            max_instances: 3,
            eviction: EvictionPolicy::Newest,
        }
    }
}

impl ScalingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }
}

/// Which active resource is stopped on scale-down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Most recently started first (the active set is a stack).
    #[default]
    Newest,
    /// Lowest cached CPU first; falls back to `Newest` without samples.
    LeastLoaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub poll_interval_secs: f64,
    /// Upper bound on a single `MetricsSource::sample` call.
    pub sample_timeout_secs: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1.0,
            sample_timeout_secs: 2.0,
        }
    }
}

impl MetricsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.sample_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Requests per second issued by each attack worker.
    pub rate_per_worker: f64,
    pub worker_count: u32,
    /// Requests per second issued by each baseline (normal traffic) worker.
    pub baseline_rate_per_worker: f64,
    /// Zero disables baseline traffic.
    pub baseline_worker_count: u32,
    pub attack_start_secs: f64,
    /// Zero disables the attack window.
    pub attack_duration_secs: f64,
    pub request_path: String,
    pub request_timeout_secs: f64,
    /// How long `stop()` waits for each worker before giving up on it.
    pub join_timeout_secs: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            rate_per_worker: 4.0,
            worker_count: 4,
            baseline_rate_per_worker: 2.0,
            baseline_worker_count: 4,
            attack_start_secs: 30.0,
            attack_duration_secs: 60.0,
            request_path: "/".to_string(),
            request_timeout_secs: 10.0,
            join_timeout_secs: 15.0,
        }
    }
}

impl LoadConfig {
    pub fn attack_start(&self) -> Duration {
        Duration::from_secs_f64(self.attack_start_secs)
    }

    pub fn attack_duration(&self) -> Duration {
        Duration::from_secs_f64(self.attack_duration_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub per_instance_hour: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            per_instance_hour: 0.02,
        }
    }
}

impl SimConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value the runtime relies on. The `Duration` accessors
    /// panic on negative or non-finite input, so call this first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("control.tick_interval_secs", self.control.tick_interval_secs)?;
        positive("control.run_duration_secs", self.control.run_duration_secs)?;
        non_negative("scaling.cooldown_secs", self.scaling.cooldown_secs)?;
        positive("metrics.poll_interval_secs", self.metrics.poll_interval_secs)?;
        positive("metrics.sample_timeout_secs", self.metrics.sample_timeout_secs)?;
        positive("load.rate_per_worker", self.load.rate_per_worker)?;
        positive(
            "load.baseline_rate_per_worker",
            self.load.baseline_rate_per_worker,
        )?;
        non_negative("load.attack_start_secs", self.load.attack_start_secs)?;
        non_negative("load.attack_duration_secs", self.load.attack_duration_secs)?;
        positive("load.request_timeout_secs", self.load.request_timeout_secs)?;
        positive("load.join_timeout_secs", self.load.join_timeout_secs)?;
        non_negative("cost.per_instance_hour", self.cost.per_instance_hour)?;

        let s = &self.scaling;
        if s.min_instances == 0 {
            // An empty pool reports no utilization and could never grow.
            return Err(ConfigError::Invalid(
                "scaling.min_instances must be at least 1".to_string(),
            ));
        }
        if s.min_instances > s.max_instances {
            return Err(ConfigError::Invalid(format!(
                "scaling.min_instances ({}) exceeds scaling.max_instances ({})",
                s.min_instances, s.max_instances
            )));
        }
        if !s.scale_up_threshold.is_finite() || !s.scale_down_threshold.is_finite() {
            return Err(ConfigError::Invalid(
                "scaling thresholds must be finite".to_string(),
            ));
        }
        if s.scale_down_threshold > s.scale_up_threshold {
            return Err(ConfigError::Invalid(format!(
                "scaling.scale_down_threshold ({}) exceeds scaling.scale_up_threshold ({})",
                s.scale_down_threshold, s.scale_up_threshold
            )));
        }
        if !self.load.request_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "load.request_path must start with '/': {}",
                self.load.request_path
            )));
        }
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be a positive number, got {value}"
        )))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be zero or positive, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::default();
        config.validate().unwrap();
        assert_eq!(config.control.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.scaling.cooldown(), Duration::from_secs(20));
        assert_eq!(config.scaling.eviction, EvictionPolicy::Newest);
        assert_eq!(config.load.join_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = SimConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = SimConfig::from_toml_str(
            r#"
[scaling]
max_instances = 6
eviction = "least-loaded"

[control]
tick_interval_secs = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.scaling.max_instances, 6);
        assert_eq!(config.scaling.min_instances, 1);
        assert_eq!(config.scaling.eviction, EvictionPolicy::LeastLoaded);
        assert_eq!(config.control.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.control.run_duration_secs, 180.0);
        config.validate().unwrap();
    }

    #[test]
    fn rendered_default_parses_back() {
        let rendered = SimConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("[scaling]"));
        assert_eq!(
            SimConfig::from_toml_str(&rendered).unwrap(),
            SimConfig::default()
        );
    }

    #[test]
    fn rejects_min_above_max() {
        let mut config = SimConfig::default();
        config.scaling.min_instances = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_instances"));
    }

    #[test]
    fn rejects_empty_pool() {
        let mut config = SimConfig::default();
        config.scaling.min_instances = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_instances"));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = SimConfig::default();
        config.scaling.scale_down_threshold = 70.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_tick_and_nan_rate() {
        let mut config = SimConfig::default();
        config.control.tick_interval_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.load.rate_per_worker = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn allows_zero_cooldown_and_no_attack() {
        let mut config = SimConfig::default();
        config.scaling.cooldown_secs = 0.0;
        config.load.attack_duration_secs = 0.0;
        config.validate().unwrap();
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[load]\nworker_count = 8\nrate_per_worker = 1.5").unwrap();

        let config = SimConfig::from_file(file.path()).unwrap();
        assert_eq!(config.load.worker_count, 8);
        assert_eq!(config.load.rate_per_worker, 1.5);
    }

    #[test]
    fn from_file_missing_reports_path() {
        let err = SimConfig::from_file(Path::new("/nonexistent/edos.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/edos.toml"));
    }
}

//! YAML configuration loading, merging, and validation.
//!
//! `Config::load` reads `<project_path>/.claude-autopilot.yml`, merges it over
//! the built-in defaults, and validates the result. Every field maps to one
//! of the keys in the configuration table; unknown top-level keys are warned
//! about, not rejected.

use crate::error::{AutopilotError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub linear: LinearConfig,
    #[validate(nested)]
    pub executor: ExecutorConfig,
    #[validate(nested)]
    pub planner: PlannerConfig,
    #[validate(nested)]
    pub monitor: MonitorConfig,
    #[validate(nested)]
    pub budget: BudgetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LinearConfig {
    #[validate(length(max = 200))]
    pub team: String,
    #[validate(nested)]
    pub states: LinearStates,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            team: String::new(),
            states: LinearStates::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LinearStates {
    #[validate(length(max = 200))]
    pub triage: String,
    #[validate(length(max = 200))]
    pub ready: String,
    #[validate(length(max = 200))]
    pub in_progress: String,
    #[validate(length(max = 200))]
    pub in_review: String,
    #[validate(length(max = 200))]
    pub done: String,
    #[validate(length(max = 200))]
    pub blocked: String,
}

impl Default for LinearStates {
    fn default() -> Self {
        Self {
            triage: "Triage".to_string(),
            ready: "Ready".to_string(),
            in_progress: "In Progress".to_string(),
            in_review: "In Review".to_string(),
            done: "Done".to_string(),
            blocked: "Blocked".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExecutorConfig {
    #[validate(range(min = 1, max = 50))]
    pub parallel: u32,
    #[validate(range(min = 1.0, max = 480.0))]
    pub timeout_minutes: f64,
    #[validate(range(min = 1.0, max = 120.0))]
    pub fixer_timeout_minutes: f64,
    #[validate(range(min = 1, max = 10))]
    pub max_fixer_attempts: u32,
    #[validate(range(min = 0, max = 20))]
    pub max_retries: u32,
    #[validate(range(min = 1.0, max = 120.0))]
    pub inactivity_timeout_minutes: f64,
    #[validate(range(min = 0.5, max = 60.0))]
    pub poll_interval_minutes: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel: 3,
            timeout_minutes: 30.0,
            fixer_timeout_minutes: 20.0,
            max_fixer_attempts: 3,
            max_retries: 3,
            inactivity_timeout_minutes: 10.0,
            poll_interval_minutes: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerSchedule {
    WhenIdle,
    Daily,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PlannerConfig {
    pub schedule: PlannerSchedule,
    #[validate(range(min = 0, max = 1000))]
    pub min_ready_threshold: u32,
    #[validate(range(min = 0.0, max = 1440.0))]
    pub min_interval_minutes: f64,
    #[validate(range(min = 1, max = 50))]
    pub max_issues_per_run: u32,
    #[validate(range(min = 1.0, max = 480.0))]
    pub timeout_minutes: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            schedule: PlannerSchedule::WhenIdle,
            min_ready_threshold: 5,
            min_interval_minutes: 60.0,
            max_issues_per_run: 5,
            timeout_minutes: 90.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorConfig {
    pub respond_to_reviews: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BudgetConfig {
    #[validate(range(min = 0.0))]
    pub daily_limit_usd: f64,
    #[validate(range(min = 0.0))]
    pub monthly_limit_usd: f64,
    #[validate(range(min = 0.0))]
    pub per_agent_limit_usd: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub warn_at_percent: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 0.0,
            monthly_limit_usd: 0.0,
            per_agent_limit_usd: 0.0,
            warn_at_percent: 80.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            linear: LinearConfig::default(),
            executor: ExecutorConfig::default(),
            planner: PlannerConfig::default(),
            monitor: MonitorConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `<project_path>/.claude-autopilot.yml`, merged over
    /// defaults, and validated. Missing file is not an error: defaults apply.
    pub fn load(project_path: &Path) -> Result<Self> {
        let path = project_path.join(crate::constants::CONFIG_FILE_NAME);

        let defaults = serde_yaml::to_value(Config::default()).map_err(AutopilotError::ConfigParse)?;

        let merged = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let user_value: serde_yaml::Value =
                serde_yaml::from_str(&raw).map_err(AutopilotError::ConfigParse)?;
            warn_unknown_keys(&user_value);
            deep_merge(defaults, user_value)
        } else {
            tracing::info!("no config file at {}, using defaults", path.display());
            defaults
        };

        let config: Config = serde_yaml::from_value(merged).map_err(AutopilotError::ConfigParse)?;

        config
            .validate()
            .map_err(|e| AutopilotError::Config(e.to_string()))?;

        Ok(config)
    }
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["linear", "executor", "planner", "monitor", "budget"];

fn warn_unknown_keys(value: &serde_yaml::Value) {
    if let serde_yaml::Value::Mapping(map) = value {
        for key in map.keys() {
            if let serde_yaml::Value::String(k) = key {
                if !KNOWN_TOP_LEVEL_KEYS.contains(&k.as_str()) {
                    tracing::warn!("unrecognized config key: {k}");
                }
            }
        }
    }
}

/// Recursive merge of `overlay` onto `base`. Mappings merge key-by-key,
/// sequences are replaced wholesale, an explicit YAML `null` preserves the
/// base value, and a literal `__proto__` key is dropped before insertion.
fn deep_merge(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;

    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                if let Value::String(key) = &k {
                    if key == "__proto__" {
                        continue;
                    }
                }
                if matches!(v, Value::Null) {
                    continue;
                }
                let merged = match base_map.remove(&k) {
                    Some(base_v) => deep_merge(base_v, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deep_merge_preserves_nulls() {
        let base = serde_yaml::to_value(Config::default()).unwrap();
        let overlay: serde_yaml::Value =
            serde_yaml::from_str("executor:\n  parallel: 7\n  timeout_minutes: null\n").unwrap();
        let merged = deep_merge(base, overlay);
        let config: Config = serde_yaml::from_value(merged).unwrap();
        assert_eq!(config.executor.parallel, 7);
        assert_eq!(config.executor.timeout_minutes, 30.0);
    }

    #[test]
    fn deep_merge_strips_proto_pollution() {
        let base = serde_yaml::to_value(Config::default()).unwrap();
        let overlay: serde_yaml::Value =
            serde_yaml::from_str("__proto__:\n  polluted: true\nexecutor:\n  parallel: 4\n")
                .unwrap();
        let merged = deep_merge(base, overlay);
        let serde_yaml::Value::Mapping(map) = &merged else {
            panic!("expected mapping");
        };
        assert!(!map
            .keys()
            .any(|k| matches!(k, serde_yaml::Value::String(s) if s == "__proto__")));
    }

    #[test]
    fn rejects_out_of_range_parallel() {
        let mut config = Config::default();
        config.executor.parallel = 0;
        assert!(config.validate().is_err());
    }
}

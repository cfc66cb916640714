use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gust_core::prelude::parse_duration;
use serde::Deserialize;

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub simulations: Vec<SimulationConfig>,
    #[serde(default)]
    pub engine: GlobalConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub debugging: DebuggingConfig,
    /// Fail-when criteria strings, e.g. `atleast 1 failure` or `50% failures`.
    #[serde(default, rename = "fail-when")]
    pub fail_when: Vec<String>,
    /// Free-form values surfaced read-only to every session.
    #[serde(default)]
    pub custom: HashMap<String, serde_yaml::Value>,
}

/// Per-simulation settings. Read-only once loaded and shared by reference
/// across all runners of that simulation.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub name: String,
    /// The provider identifier the simulation was registered under.
    pub simulation: String,
    /// The number of runners to execute in parallel.
    pub concurrency: usize,
    /// Maximum iterations per second, per runner. Unset means unthrottled.
    #[serde(default)]
    pub throughput: Option<u32>,
    /// Cap on the number of iterations per runner, per scenario.
    #[serde(default)]
    pub iterations: Option<u64>,
    /// How long new iterations may keep starting, e.g. `30s` or `5m`.
    #[serde(rename = "hold-for")]
    pub hold_for: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SimulationConfig {
    pub fn hold_for(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.hold_for)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Hard ceiling on any simulation's hold-for.
    #[serde(rename = "max-hold-for", default = "default_max_hold_for")]
    pub max_hold_for: String,
    /// Extra time beyond hold-for, as a percentage of it, after which a
    /// simulation's runners are forcibly cancelled.
    #[serde(rename = "grace-period-percentage", default = "default_grace_period")]
    pub grace_period_percentage: u32,
}

impl GlobalConfig {
    pub fn max_hold_for(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.max_hold_for)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_hold_for: default_max_hold_for(),
            grace_period_percentage: default_grace_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    /// Keep the contributing raw reports inside the aggregate report instead
    /// of redacting them down to the derived statistics.
    #[serde(rename = "include-raw-report", default)]
    pub include_raw_report: bool,
    #[serde(rename = "export-formats", default = "default_export_formats")]
    pub export_formats: Vec<String>,
    #[serde(rename = "export-directory-path", default = "default_export_directory")]
    pub export_directory_path: PathBuf,
    /// How many streamed raw reports the sink accumulates before writing.
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            include_raw_report: false,
            export_formats: default_export_formats(),
            export_directory_path: default_export_directory(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DebuggingConfig {
    /// Export the per-runner raw report trees alongside the aggregate report.
    #[serde(rename = "export-raw-report", default)]
    pub export_raw_report: bool,
    /// Export the per-scenario iteration lists handed to the aggregator.
    #[serde(rename = "export-transformed-raw-report", default)]
    pub export_transformed_raw_report: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_hold_for() -> String {
    "1h".to_string()
}

fn default_grace_period() -> u32 {
    20
}

fn default_export_formats() -> Vec<String> {
    vec!["json".to_string()]
}

fn default_export_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_batch_size() -> usize {
    1000
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("the configuration file {path} is invalid: {reason}")]
pub struct InvalidConfigError {
    pub path: String,
    pub reason: String,
}

/// Load and validate a YAML configuration file.
pub fn load_config(path: &Path) -> Result<EngineConfig, InvalidConfigError> {
    let invalid = |reason: String| InvalidConfigError {
        path: path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| {
        invalid(format!(
            "failed to read it, make sure the file is present and accessible ({e})"
        ))
    })?;

    let config: EngineConfig = serde_yaml::from_str(&contents).map_err(|e| {
        invalid(format!(
            "it is not well-formed, make sure the syntax is correct and all required fields are provided ({e})"
        ))
    })?;

    for simulation in &config.simulations {
        if simulation.concurrency < 1 {
            return Err(invalid(format!(
                "simulation `{}` must have a concurrency of at least 1",
                simulation.name
            )));
        }
        if let Err(e) = simulation.hold_for() {
            return Err(invalid(format!(
                "simulation `{}` has an invalid hold-for ({e})",
                simulation.name
            )));
        }
    }
    if let Err(e) = config.engine.max_hold_for() {
        return Err(invalid(format!("invalid max-hold-for ({e})")));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_fills_in_defaults() {
        let file = write_config(
            r#"
simulations:
  - name: checkout
    simulation: sample.checkout
    concurrency: 4
    hold-for: 30s
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.simulations.len(), 1);

        let simulation = &config.simulations[0];
        assert!(simulation.enabled);
        assert_eq!(simulation.throughput, None);
        assert_eq!(simulation.iterations, None);
        assert_eq!(simulation.hold_for().unwrap(), Duration::from_secs(30));

        assert_eq!(config.engine.grace_period_percentage, 20);
        assert_eq!(config.engine.max_hold_for().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.reporting.export_formats, vec!["json".to_string()]);
        assert_eq!(config.reporting.batch_size, 1000);
        assert!(!config.reporting.include_raw_report);
        assert!(config.fail_when.is_empty());
    }

    #[test]
    fn full_config_round_trips() {
        let file = write_config(
            r#"
simulations:
  - name: checkout
    simulation: sample.checkout
    concurrency: 2
    throughput: 10
    iterations: 100
    hold-for: 1m
    enabled: false
engine:
  max-hold-for: 10m
  grace-period-percentage: 50
reporting:
  include-raw-report: true
  export-formats: [json, yaml]
  export-directory-path: /tmp/gust
  batch-size: 50
debugging:
  export-raw-report: true
fail-when:
  - atleast 2 failures
custom:
  base-url: http://localhost:8080
"#,
        );

        let config = load_config(file.path()).unwrap();
        let simulation = &config.simulations[0];
        assert!(!simulation.enabled);
        assert_eq!(simulation.throughput, Some(10));
        assert_eq!(simulation.iterations, Some(100));
        assert_eq!(config.engine.grace_period_percentage, 50);
        assert!(config.reporting.include_raw_report);
        assert_eq!(config.reporting.batch_size, 50);
        assert!(config.debugging.export_raw_report);
        assert!(!config.debugging.export_transformed_raw_report);
        assert_eq!(config.fail_when, vec!["atleast 2 failures".to_string()]);
        assert!(config.custom.contains_key("base-url"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let file = write_config("simulations: [not: closed");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let file = write_config(
            r#"
simulations:
  - name: checkout
    simulation: sample.checkout
    concurrency: 0
    hold-for: 30s
"#,
        );
        let err = load_config(file.path()).err().unwrap();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(load_config(Path::new("/does/not/exist.yaml")).is_err());
    }
}

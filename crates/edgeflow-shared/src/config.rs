//! # Configuration
//!
//! Serde-deserializable configuration structs shared by the orchestrator and
//! the server binary. Strategy sections are tagged enums resolved to concrete
//! implementations at startup by the orchestration crate.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// Core orchestrator options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Port to listen on for client connections
    pub port: u16,
    /// Timeout for pending admissions in milliseconds (0 = no timeout)
    pub admission_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            admission_timeout_ms: 0,
        }
    }
}

impl OrchestratorConfig {
    /// The admission timeout as a duration, `None` when disabled.
    pub fn admission_timeout(&self) -> Option<Duration> {
        (self.admission_timeout_ms > 0).then(|| Duration::from_millis(self.admission_timeout_ms))
    }
}

/// One backend entry in the server configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Backend address to connect to at startup
    pub addr: SocketAddr,
    /// Accelerator type label, if any
    #[serde(default)]
    pub accelerator_type: Option<String>,
}

/// Scheduler selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    /// Per-type round-robin
    FirstFit,
    /// Argmin over in-flight tasks
    LeastLoaded,
}

/// Admission policy selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionConfig {
    /// Admit everything
    AlwaysAdmit,
    /// Admit while some backend is below the active-task threshold
    MaxActiveTasks { threshold: u32 },
    /// Reject workloads whose deadlined tasks cannot finish in time
    DeadlineAware { compute_rate: f64 },
}

/// DVFS scaling policy selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalingPolicyConfig {
    /// Max frequency when busy, min when idle
    Utilization,
    /// One operating-point step per tick
    Conservative,
}

fn default_min_frequency() -> f64 {
    500e6
}

fn default_max_frequency() -> f64 {
    1.5e9
}

fn default_min_voltage() -> f64 {
    0.6
}

fn default_max_voltage() -> f64 {
    1.0
}

fn default_steps() -> u32 {
    5
}

/// DVFS device-manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalingConfig {
    pub policy: ScalingPolicyConfig,
    /// Lower frequency bound in Hz
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f64,
    /// Upper frequency bound in Hz
    #[serde(default = "default_max_frequency")]
    pub max_frequency: f64,
    /// Voltage at the lowest operating point
    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,
    /// Voltage at the highest operating point
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    /// Number of operating points in the linear V-F table
    #[serde(default = "default_steps")]
    pub steps: u32,
}

/// Top-level server configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// The backend cluster, fixed for the run
    pub backends: Vec<BackendConfig>,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub admission: Option<AdmissionConfig>,
    #[serde(default)]
    pub scaling: Option<ScalingConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.admission_timeout_ms, 0);
        assert!(config.admission_timeout().is_none());
    }

    #[test]
    fn test_admission_timeout_enabled() {
        let config = OrchestratorConfig {
            port: 8080,
            admission_timeout_ms: 100,
        };
        assert_eq!(config.admission_timeout(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_parse_server_config() {
        let raw = r#"
            [orchestrator]
            port = 9090
            admission_timeout_ms = 250

            [[backends]]
            addr = "10.0.0.2:9000"
            accelerator_type = "GPU"

            [[backends]]
            addr = "10.0.0.3:9000"

            [scheduler]
            kind = "least_loaded"

            [admission]
            kind = "max_active_tasks"
            threshold = 8

            [scaling]
            policy = { kind = "utilization" }
            min_frequency = 6e8
        "#;
        let config: ServerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.orchestrator.port, 9090);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].accelerator_type.as_deref(), Some("GPU"));
        assert!(matches!(config.scheduler, SchedulerConfig::LeastLoaded));
        assert!(matches!(
            config.admission,
            Some(AdmissionConfig::MaxActiveTasks { threshold: 8 })
        ));
        let scaling = config.scaling.unwrap();
        assert_eq!(scaling.min_frequency, 6e8);
        assert_eq!(scaling.max_frequency, 1.5e9);
        assert_eq!(scaling.steps, 5);
    }
}

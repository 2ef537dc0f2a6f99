//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/dual_sa.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `DUALSA_`, nested keys separated by
//!    a double underscore
//!
//! ```text
//! DUALSA_APPLICATION__LOG_LEVEL=debug
//! DUALSA_SWEEP__POINTS=601
//! DUALSA_TIMING__CONTINUOUS_TIMEOUT=45s
//! ```
//!
//! Every section has defaults matching the analyzer front panel, so an empty
//! or missing file yields a usable two-analyzer setup.

use crate::error::SaResult;
use crate::sweep::frequency::{resolve_hz, FrequencyFields, FrequencyMode, FrequencyUnit};
use crate::sweep::params::{ResolutionBandwidth, SweepConfig, SweepPoints, VideoBandwidth};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dual_sa.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values parsed but are not usable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Analyzer definitions, normally `sa1` and `sa2`
    #[serde(default = "default_analyzers")]
    pub analyzers: Vec<AnalyzerDefinition>,
    /// Default sweep settings
    #[serde(default)]
    pub sweep: SweepSettings,
    /// Protocol delays and timeouts
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            analyzers: default_analyzers(),
            sweep: SweepSettings::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// How an analyzer is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw SCPI over TCP.
    #[default]
    Socket,
    /// VISA resource (needs the `instrument_visa` feature).
    Visa,
    /// In-process simulated analyzer.
    Mock,
}

/// One analyzer in the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerDefinition {
    /// Unique analyzer identifier (e.g. `sa1`)
    pub id: String,
    /// Network address or VISA resource string
    pub address: String,
    /// Transport used to reach the analyzer
    #[serde(default)]
    pub transport: TransportKind,
    /// Whether this analyzer is used
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Default sweep settings as entered on the front panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Frequency entry mode
    #[serde(default)]
    pub mode: FrequencyMode,
    /// Unit of the frequency fields
    #[serde(default)]
    pub unit: FrequencyUnit,
    /// Start/stop/center/span text fields
    #[serde(default)]
    pub frequency: FrequencyFields,
    /// Points per sweep
    #[serde(default)]
    pub points: SweepPoints,
    /// Resolution bandwidth label (`auto`, `100` ... `1M`)
    #[serde(default)]
    pub rbw: ResolutionBandwidth,
    /// Video bandwidth label (`1` ... `3M`)
    #[serde(default)]
    pub vbw: VideoBandwidth,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            mode: FrequencyMode::default(),
            unit: FrequencyUnit::default(),
            frequency: FrequencyFields::default(),
            points: SweepPoints::default(),
            rbw: ResolutionBandwidth::default(),
            vbw: VideoBandwidth::default(),
        }
    }
}

impl SweepSettings {
    /// Resolves the frequency fields and builds a sweep snapshot.
    pub fn to_sweep_config(&self) -> SaResult<SweepConfig> {
        let (start_hz, stop_hz) = resolve_hz(self.mode, &self.frequency, self.unit)?;
        SweepConfig::new(start_hz, stop_hz, self.points, self.rbw, self.vbw)
    }
}

/// Protocol delays and timeouts.
///
/// There is no completion event from the analyzer, so sweeps are synchronized
/// purely by these delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after opening the transport before talking to the instrument
    #[serde(with = "humantime_serde")]
    pub connect_settle: Duration,
    /// Wait between sending `*IDN?` and reading the answer
    #[serde(with = "humantime_serde")]
    pub identify_delay: Duration,
    /// Pause after each configuration write
    #[serde(with = "humantime_serde")]
    pub command_settle: Duration,
    /// Wait before reading a read-back query (`:SWE:POIN?` and friends)
    #[serde(with = "humantime_serde")]
    pub readback_delay: Duration,
    /// Wait before reading `*OPC?`
    #[serde(with = "humantime_serde")]
    pub opc_delay: Duration,
    /// Wait before reading `:SWE:TIME?` in a single sweep
    #[serde(with = "humantime_serde")]
    pub single_sweep_time_delay: Duration,
    /// Wait before reading `:SWE:TIME?` in the continuous loop
    #[serde(with = "humantime_serde")]
    pub continuous_sweep_time_delay: Duration,
    /// Pause after switching the trigger to single before a continuous loop
    #[serde(with = "humantime_serde")]
    pub trigger_off_settle: Duration,
    /// Wait before reading `:TRAC:DATA?`
    #[serde(with = "humantime_serde")]
    pub trace_delay: Duration,
    /// Lower bound on the post-trigger wait
    #[serde(with = "humantime_serde")]
    pub min_sweep_wait: Duration,
    /// Sweep duration assumed when `:SWE:TIME?` fails or is unparsable
    #[serde(with = "humantime_serde")]
    pub default_sweep_time: Duration,
    /// Longest `:SWE:TIME?` reply taken at face value; larger replies are
    /// treated as unparsable
    #[serde(with = "humantime_serde")]
    pub max_sweep_time: Duration,
    /// Multiplier on the reported sweep time for single sweeps
    pub single_sweep_margin: f64,
    /// Multiplier on the reported sweep time inside the continuous loop
    pub continuous_sweep_margin: f64,
    /// Pause after a failed continuous iteration before the loop exits
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// Session I/O timeout
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// I/O timeout while the continuous loop runs
    #[serde(with = "humantime_serde")]
    pub continuous_timeout: Duration,
    /// How long reset and shutdown wait for a continuous loop to exit
    /// before disconnecting anyway
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_settle: Duration::from_secs(2),
            identify_delay: Duration::from_millis(500),
            command_settle: Duration::from_millis(100),
            readback_delay: Duration::from_millis(200),
            opc_delay: Duration::from_millis(100),
            single_sweep_time_delay: Duration::from_millis(150),
            continuous_sweep_time_delay: Duration::from_millis(200),
            trigger_off_settle: Duration::from_millis(300),
            trace_delay: Duration::from_millis(300),
            min_sweep_wait: Duration::from_millis(1500),
            default_sweep_time: Duration::from_millis(1500),
            max_sweep_time: Duration::from_secs(3600),
            single_sweep_margin: 1.1,
            continuous_sweep_margin: 1.2,
            error_backoff: Duration::from_millis(500),
            default_timeout: Duration::from_secs(120),
            continuous_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "Dual Spectrum Analyzer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_analyzers() -> Vec<AnalyzerDefinition> {
    vec![
        AnalyzerDefinition {
            id: "sa1".to_string(),
            address: "192.168.60.70".to_string(),
            transport: TransportKind::Socket,
            enabled: true,
        },
        AnalyzerDefinition {
            id: "sa2".to_string(),
            address: "192.168.60.69".to_string(),
            transport: TransportKind::Socket,
            enabled: true,
        },
    ]
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl AppConfig {
    /// Load configuration from the default path and environment variables
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if loading or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is invalid or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DUALSA_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Analyzer IDs are unique and non-empty, addresses non-empty
    /// - Sweep margins are at least 1.0
    /// - Default sweep settings resolve to a valid range
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for analyzer in &self.analyzers {
            if analyzer.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Analyzer 'id' cannot be empty".to_string(),
                ));
            }
            if !ids.insert(analyzer.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate analyzer ID: '{}'",
                    analyzer.id
                )));
            }
            if analyzer.address.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Analyzer '{}': 'address' cannot be empty",
                    analyzer.id
                )));
            }
        }

        for (name, margin) in [
            ("single_sweep_margin", self.timing.single_sweep_margin),
            ("continuous_sweep_margin", self.timing.continuous_sweep_margin),
        ] {
            if !margin.is_finite() || margin < 1.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} {}. Must be >= 1.0",
                    name, margin
                )));
            }
        }

        self.sweep
            .to_sweep_config()
            .map_err(|e| ConfigError::ValidationError(format!("Invalid [sweep] settings: {}", e)))?;

        Ok(())
    }

    /// Get all enabled analyzers
    pub fn enabled_analyzers(&self) -> Vec<&AnalyzerDefinition> {
        self.analyzers.iter().filter(|a| a.enabled).collect()
    }

    /// Look up an analyzer by ID
    pub fn analyzer(&self, id: &str) -> Option<&AnalyzerDefinition> {
        self.analyzers.iter().find(|a| a.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analyzers.len(), 2);
        assert_eq!(config.timing.continuous_timeout, Duration::from_secs(30));
        assert_eq!(config.timing.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.timing.max_sweep_time, Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_duplicate_analyzer_ids() {
        let mut config = AppConfig::default();
        config.analyzers[1].id = "sa1".to_string();

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate analyzer ID"));
    }

    #[test]
    fn test_empty_address_rejected() {
        let mut config = AppConfig::default();
        config.analyzers[0].address = " ".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("'address' cannot be empty"));
    }

    #[test]
    fn test_margin_below_one_rejected() {
        let mut config = AppConfig::default();
        config.timing.single_sweep_margin = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_sweep_range_rejected() {
        let mut config = AppConfig::default();
        config.sweep.frequency.start = "4000".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid [sweep] settings"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[[analyzers]]
id = "left"
address = "10.0.0.5"
transport = "mock"

[sweep]
mode = "center_span"
unit = "kHz"
points = 601
rbw = "auto"
vbw = "10k"

[sweep.frequency]
center = "1500"
span = "1000"

[timing]
connect_settle = "250ms"
continuous_timeout = "45s"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.analyzers.len(), 1);
        assert_eq!(config.analyzers[0].transport, TransportKind::Mock);
        assert_eq!(config.timing.connect_settle, Duration::from_millis(250));
        assert_eq!(config.timing.continuous_timeout, Duration::from_secs(45));
        assert_eq!(config.timing.command_settle, Duration::from_millis(100));

        let sweep = config.sweep.to_sweep_config().unwrap();
        assert_eq!(sweep.start_hz(), 1.0e6);
        assert_eq!(sweep.stop_hz(), 2.0e6);
        assert_eq!(sweep.points().get(), 601);
        assert_eq!(sweep.resolution_bw(), ResolutionBandwidth::Auto);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.analyzers.len(), 2);
        assert_eq!(config.analyzer("sa2").unwrap().address, "192.168.60.69");
        assert_eq!(config.enabled_analyzers().len(), 2);
    }

    #[test]
    fn test_bad_points_fail_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sweep]\npoints = 500").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }
}

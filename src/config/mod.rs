//! Layered application configuration.

pub mod app_config;

pub use app_config::{
    AnalyzerDefinition, AppConfig, ApplicationConfig, ConfigError, SweepSettings, TimingConfig,
    TransportKind, DEFAULT_CONFIG_PATH,
};

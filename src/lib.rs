//! Control engine for two networked swept spectrum analyzers.
//!
//! Each analyzer gets its own SCPI session and sweep engine. Sessions run
//! single or continuous sweeps on background tasks, decode the returned
//! trace blocks, and keep a per-analyzer peak hold. Results travel upward
//! as [`analyzer::AnalyzerEvent`]s.
//!
//! Layering, leaves first:
//! - [`sweep::frequency`], [`sweep::trace`], [`sweep::peak_hold`]: pure logic
//! - [`session`]: one transport, strictly sequential commands
//! - [`sweep::configurator`], [`sweep::engine`]: sweep state machines
//! - [`analyzer`], [`station`]: background tasks and events

pub mod analyzer;
pub mod config;
pub mod error;
pub mod hardware;
pub mod scpi;
pub mod session;
pub mod station;
pub mod sweep;
pub mod traits;

pub use analyzer::{AnalyzerController, AnalyzerEvent, EventKind, Severity, SweepResult};
pub use config::AppConfig;
pub use error::{SaError, SaResult};
pub use session::{InstrumentSession, RunningFlag};
pub use station::DualAnalyzerStation;

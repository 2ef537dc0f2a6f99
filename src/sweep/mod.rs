//! Sweep parameters, trace decoding, peak hold and the sweep state machines.

pub mod configurator;
pub mod engine;
pub mod frequency;
pub mod params;
pub mod peak_hold;
pub mod trace;

pub use configurator::{ConfigureReport, SweepConfigurator};
pub use engine::{SweepEngine, SweepState};
pub use frequency::{resolve, resolve_hz, FrequencyFields, FrequencyMode, FrequencyUnit};
pub use params::{Bandwidth, ResolutionBandwidth, SweepConfig, SweepPoints, VideoBandwidth};
pub use peak_hold::{PeakHold, PeakHoldSnapshot};
pub use trace::{decode, DecodeError, DecodedTrace, Trace};

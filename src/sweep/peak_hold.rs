//! Running per-bin maximum across sweeps.

use super::trace::Trace;
use serde::Serialize;

/// Held axis and amplitudes. Both vectors always have equal length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakHoldSnapshot {
    /// Axis copied from the trace that initialized the hold.
    pub frequencies_hz: Vec<f64>,
    /// Per-bin maximum amplitudes in dBm.
    pub amplitudes_dbm: Vec<f64>,
}

/// Peak-hold aggregator for one analyzer.
///
/// The held state is replaced whenever a trace of a different length arrives
/// or after [`PeakHold::reset`]; otherwise amplitudes are maxed in place and
/// the held axis is left untouched.
#[derive(Debug, Default)]
pub struct PeakHold {
    held: Option<PeakHoldSnapshot>,
}

impl PeakHold {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `trace` into the held state and returns the updated amplitudes.
    pub fn update(&mut self, trace: &Trace) -> &[f64] {
        let held = match self.held.take() {
            Some(mut held) if held.amplitudes_dbm.len() == trace.len() => {
                for (held_value, value) in held.amplitudes_dbm.iter_mut().zip(trace.amplitudes_dbm()) {
                    *held_value = held_value.max(*value);
                }
                held
            }
            _ => PeakHoldSnapshot {
                frequencies_hz: trace.frequencies_hz().to_vec(),
                amplitudes_dbm: trace.amplitudes_dbm().to_vec(),
            },
        };
        &self.held.insert(held).amplitudes_dbm
    }

    /// Drops the held state; the next update starts from scratch.
    pub fn reset(&mut self) {
        self.held = None;
    }

    /// Current held state, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<&PeakHoldSnapshot> {
        self.held.as_ref()
    }

    /// True when nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_none()
    }
}

//! Trace data and ASCII trace-block decoding.
//!
//! Analyzers return `:TRAC:DATA?` either as an IEEE 488.2 definite-length
//! block (`#` + digit count + byte length + payload) or as a bare
//! comma-separated list. Only amplitudes are transmitted; the frequency axis
//! is always rebuilt from the start/stop bounds and the number of values
//! actually decoded.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while decoding a trace response.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// The `#` header was not followed by a digit count and length field.
    #[error("Malformed block header: {0}")]
    MalformedHeader(String),

    /// A payload token could not be parsed as a number.
    #[error("Invalid amplitude value '{0}'")]
    InvalidValue(String),

    /// The response held no amplitude values.
    #[error("Trace response contained no values")]
    Empty,
}

/// An ordered sequence of `(frequency_hz, amplitude_dbm)` pairs.
///
/// Frequencies are evenly spaced and strictly increasing. Both vectors
/// always have the same length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    frequencies_hz: Vec<f64>,
    amplitudes_dbm: Vec<f64>,
}

impl Trace {
    /// Builds a trace whose axis spans `start_hz..=stop_hz` evenly.
    #[must_use]
    pub fn from_amplitudes(amplitudes_dbm: Vec<f64>, start_hz: f64, stop_hz: f64) -> Self {
        let frequencies_hz = linspace(start_hz, stop_hz, amplitudes_dbm.len());
        Self {
            frequencies_hz,
            amplitudes_dbm,
        }
    }

    /// Frequency axis in hertz.
    #[must_use]
    pub fn frequencies_hz(&self) -> &[f64] {
        &self.frequencies_hz
    }

    /// Amplitudes in dBm.
    #[must_use]
    pub fn amplitudes_dbm(&self) -> &[f64] {
        &self.amplitudes_dbm
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.amplitudes_dbm.len()
    }

    /// True when the trace has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amplitudes_dbm.is_empty()
    }

    /// Iterates `(frequency_hz, amplitude_dbm)` pairs in frequency order.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies_hz
            .iter()
            .copied()
            .zip(self.amplitudes_dbm.iter().copied())
    }

    /// The strongest point of the trace.
    #[must_use]
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.points()
            .fold(None, |best: Option<(f64, f64)>, point| match best {
                Some(b) if b.1 >= point.1 => Some(b),
                _ => Some(point),
            })
    }

    /// Splits the trace into its axis and amplitude vectors.
    #[must_use]
    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.frequencies_hz, self.amplitudes_dbm)
    }
}

/// A decoded trace plus the point-count check against the declared count.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrace {
    /// The reconstructed trace.
    pub trace: Trace,
    /// Point count the instrument reported for the sweep.
    pub declared_points: usize,
    /// True when the decoded count differs from `declared_points`.
    pub count_mismatch: bool,
}

/// `count` evenly spaced values from `start` to `stop` inclusive.
fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            let mut axis: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
            // Pin the last bin to avoid accumulated rounding
            axis[count - 1] = stop;
            axis
        }
    }
}

/// Extracts the payload region from a definite-length block, or returns the
/// whole response when there is no `#` header.
fn data_region(raw: &str) -> Result<&str, DecodeError> {
    let Some(rest) = raw.strip_prefix('#') else {
        return Ok(raw);
    };

    let digit_count = rest
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| DecodeError::MalformedHeader(header_excerpt(raw)))? as usize;
    let rest = &rest[1..];

    // `#0` is the indefinite form: payload runs to the end of the response
    if digit_count == 0 {
        return Ok(rest);
    }

    let length_field = rest
        .get(..digit_count)
        .ok_or_else(|| DecodeError::MalformedHeader(header_excerpt(raw)))?;
    let payload_len: usize = length_field
        .parse()
        .map_err(|_| DecodeError::MalformedHeader(header_excerpt(raw)))?;
    let payload = &rest[digit_count..];

    if payload_len > payload.len() {
        debug!(
            declared = payload_len,
            available = payload.len(),
            "Block payload shorter than declared, using available bytes"
        );
        return Ok(payload);
    }
    Ok(payload.get(..payload_len).unwrap_or(payload))
}

fn header_excerpt(raw: &str) -> String {
    raw.chars().take(12).collect()
}

/// Decodes a `:TRAC:DATA?` response into a [`Trace`].
///
/// A decoded count different from `declared_points` is logged as a warning
/// and flagged on the result; it is not an error. The frequency axis always
/// uses the decoded count.
pub fn decode(
    raw: &str,
    declared_points: usize,
    start_hz: f64,
    stop_hz: f64,
) -> Result<DecodedTrace, DecodeError> {
    let region = data_region(raw.trim())?;

    let amplitudes = region
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| DecodeError::InvalidValue(token.to_string()))
        })
        .collect::<Result<Vec<f64>, DecodeError>>()?;

    if amplitudes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let count_mismatch = amplitudes.len() != declared_points;
    if count_mismatch {
        warn!(
            "Trace point count mismatch: expected {} points, got {}",
            declared_points,
            amplitudes.len()
        );
    }

    Ok(DecodedTrace {
        trace: Trace::from_amplitudes(amplitudes, start_hz, stop_hz),
        declared_points,
        count_mismatch,
    })
}

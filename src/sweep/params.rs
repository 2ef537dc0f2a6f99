//! Sweep parameter types and the immutable per-sweep [`SweepConfig`] snapshot.
//!
//! Points and bandwidths are drawn from the fixed sets offered by the
//! analyzer front panel. Bandwidth labels carry `k`/`M` suffixes which are
//! expanded through an explicit scale table.

use crate::error::{SaError, SaResult};
use crate::scpi::{Detector, TraceFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Suffix scale table for bandwidth labels.
const SUFFIX_SCALES: &[(char, f64)] = &[('k', 1.0e3), ('M', 1.0e6)];

/// Sweep point counts supported by the analyzer.
pub const SWEEP_POINTS: [u32; 9] = [101, 201, 401, 601, 801, 1001, 1501, 2001, 3001];

/// Manual resolution bandwidth labels. `auto` is accepted in addition.
pub const RESOLUTION_BANDWIDTHS: [&str; 5] = ["100", "1k", "10k", "100k", "1M"];

/// Video bandwidth labels.
pub const VIDEO_BANDWIDTHS: [&str; 8] = ["1", "10", "100", "1k", "10k", "100k", "1M", "3M"];

const AUTO_LABEL: &str = "auto";

/// Expands a label such as `"10k"` to hertz using [`SUFFIX_SCALES`].
fn expand_scaled(label: &str) -> Option<f64> {
    let label = label.trim();
    let (digits, scale) = match label.chars().last() {
        Some(last) => match SUFFIX_SCALES.iter().find(|(suffix, _)| *suffix == last) {
            Some((_, scale)) => (&label[..label.len() - last.len_utf8()], *scale),
            None => (label, 1.0),
        },
        None => return None,
    };
    digits.parse::<f64>().ok().map(|v| v * scale)
}

/// Number of points per sweep, restricted to [`SWEEP_POINTS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SweepPoints(u32);

impl SweepPoints {
    /// Validates `points` against the supported set.
    pub fn new(points: u32) -> SaResult<Self> {
        if SWEEP_POINTS.contains(&points) {
            Ok(Self(points))
        } else {
            Err(SaError::Validation(format!(
                "Unsupported sweep points {}. Must be one of: {:?}",
                points, SWEEP_POINTS
            )))
        }
    }

    /// The point count.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for SweepPoints {
    fn default() -> Self {
        Self(3001)
    }
}

impl TryFrom<u32> for SweepPoints {
    type Error = SaError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SweepPoints> for u32 {
    fn from(points: SweepPoints) -> Self {
        points.0
    }
}

impl FromStr for SweepPoints {
    type Err = SaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let points = s
            .trim()
            .parse::<u32>()
            .map_err(|_| SaError::Validation(format!("Sweep points '{}' is not a number", s)))?;
        Self::new(points)
    }
}

impl fmt::Display for SweepPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bandwidth chosen from an enumerated label set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bandwidth {
    label: &'static str,
    hz: f64,
}

impl Bandwidth {
    fn from_table(label: &str, table: &[&'static str], kind: &str) -> SaResult<Self> {
        let trimmed = label.trim();
        let entry = table.iter().find(|candidate| **candidate == trimmed).ok_or_else(|| {
            SaError::Validation(format!(
                "Unsupported {} '{}'. Must be one of: {}",
                kind,
                label,
                table.join(", ")
            ))
        })?;
        let hz = expand_scaled(entry).ok_or_else(|| {
            SaError::Validation(format!("Bandwidth label '{}' is not numeric", entry))
        })?;
        Ok(Self { label: *entry, hz })
    }

    /// Front-panel label, e.g. `"10k"`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Bandwidth in hertz.
    #[must_use]
    pub fn hz(&self) -> f64 {
        self.hz
    }
}

/// Resolution bandwidth: automatic or one of [`RESOLUTION_BANDWIDTHS`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResolutionBandwidth {
    /// Let the analyzer couple RBW to span.
    Auto,
    /// Fixed bandwidth.
    Manual(Bandwidth),
}

impl ResolutionBandwidth {
    /// Bandwidth in hertz, `None` for automatic.
    #[must_use]
    pub fn hz(&self) -> Option<f64> {
        match self {
            ResolutionBandwidth::Auto => None,
            ResolutionBandwidth::Manual(bw) => Some(bw.hz()),
        }
    }
}

impl Default for ResolutionBandwidth {
    fn default() -> Self {
        ResolutionBandwidth::Manual(Bandwidth { label: "1M", hz: 1.0e6 })
    }
}

impl FromStr for ResolutionBandwidth {
    type Err = SaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(AUTO_LABEL) {
            return Ok(ResolutionBandwidth::Auto);
        }
        Bandwidth::from_table(s, &RESOLUTION_BANDWIDTHS, "resolution bandwidth")
            .map(ResolutionBandwidth::Manual)
    }
}

impl TryFrom<String> for ResolutionBandwidth {
    type Error = SaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResolutionBandwidth> for String {
    fn from(rbw: ResolutionBandwidth) -> Self {
        rbw.to_string()
    }
}

impl fmt::Display for ResolutionBandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionBandwidth::Auto => f.write_str(AUTO_LABEL),
            ResolutionBandwidth::Manual(bw) => f.write_str(bw.label()),
        }
    }
}

/// Video bandwidth, one of [`VIDEO_BANDWIDTHS`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoBandwidth(Bandwidth);

impl VideoBandwidth {
    /// Bandwidth in hertz.
    #[must_use]
    pub fn hz(&self) -> f64 {
        self.0.hz()
    }
}

impl Default for VideoBandwidth {
    fn default() -> Self {
        VideoBandwidth(Bandwidth { label: "1M", hz: 1.0e6 })
    }
}

impl FromStr for VideoBandwidth {
    type Err = SaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bandwidth::from_table(s, &VIDEO_BANDWIDTHS, "video bandwidth").map(VideoBandwidth)
    }
}

impl TryFrom<String> for VideoBandwidth {
    type Error = SaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VideoBandwidth> for String {
    fn from(vbw: VideoBandwidth) -> Self {
        vbw.to_string()
    }
}

impl fmt::Display for VideoBandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.label())
    }
}

/// Immutable sweep settings for one sweep invocation.
///
/// Construction guarantees `start_hz < stop_hz`. Detector and trace format
/// are fixed to positive peak and ASCII.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    start_hz: f64,
    stop_hz: f64,
    points: SweepPoints,
    resolution_bw: ResolutionBandwidth,
    video_bw: VideoBandwidth,
}

impl SweepConfig {
    /// Builds a config, rejecting non-finite bounds and `start_hz >= stop_hz`.
    pub fn new(
        start_hz: f64,
        stop_hz: f64,
        points: SweepPoints,
        resolution_bw: ResolutionBandwidth,
        video_bw: VideoBandwidth,
    ) -> SaResult<Self> {
        if !start_hz.is_finite() || !stop_hz.is_finite() {
            return Err(SaError::Validation(format!(
                "Frequency range {} - {} Hz is not finite",
                start_hz, stop_hz
            )));
        }
        if start_hz >= stop_hz {
            return Err(SaError::Validation(format!(
                "Start frequency {} Hz must be below stop frequency {} Hz",
                start_hz, stop_hz
            )));
        }
        Ok(Self {
            start_hz,
            stop_hz,
            points,
            resolution_bw,
            video_bw,
        })
    }

    /// Start frequency in hertz.
    #[must_use]
    pub fn start_hz(&self) -> f64 {
        self.start_hz
    }

    /// Stop frequency in hertz.
    #[must_use]
    pub fn stop_hz(&self) -> f64 {
        self.stop_hz
    }

    /// Midpoint of the range.
    #[must_use]
    pub fn center_hz(&self) -> f64 {
        (self.start_hz + self.stop_hz) / 2.0
    }

    /// Width of the range.
    #[must_use]
    pub fn span_hz(&self) -> f64 {
        self.stop_hz - self.start_hz
    }

    /// Configured point count.
    #[must_use]
    pub fn points(&self) -> SweepPoints {
        self.points
    }

    /// Resolution bandwidth.
    #[must_use]
    pub fn resolution_bw(&self) -> ResolutionBandwidth {
        self.resolution_bw
    }

    /// Video bandwidth.
    #[must_use]
    pub fn video_bw(&self) -> VideoBandwidth {
        self.video_bw
    }

    /// Always positive peak.
    #[must_use]
    pub fn detector(&self) -> Detector {
        Detector::PositivePeak
    }

    /// Always ASCII.
    #[must_use]
    pub fn trace_format(&self) -> TraceFormat {
        TraceFormat::Ascii
    }
}

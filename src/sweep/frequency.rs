//! Frequency range resolution from front-panel text fields.
//!
//! Two entry modes are supported: explicit start/stop, or center/span. Fields
//! are free text as typed by a user, so both `.` and `,` are accepted as the
//! decimal separator.

use crate::error::{SaError, SaResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the frequency range is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyMode {
    /// Start and stop are given directly.
    #[default]
    StartStop,
    /// Range is centered on `center` with total width `span`.
    CenterSpan,
}

impl FromStr for FrequencyMode {
    type Err = SaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '/'], "_").as_str() {
            "start_stop" => Ok(FrequencyMode::StartStop),
            "center_span" => Ok(FrequencyMode::CenterSpan),
            other => Err(SaError::Validation(format!(
                "Unknown frequency mode '{}'. Use start_stop or center_span",
                other
            ))),
        }
    }
}

impl fmt::Display for FrequencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyMode::StartStop => f.write_str("Start/Stop"),
            FrequencyMode::CenterSpan => f.write_str("Center/Span"),
        }
    }
}

/// Unit the frequency fields are entered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    /// Hertz.
    #[serde(alias = "Hz")]
    Hz,
    /// Kilohertz.
    #[serde(alias = "kHz")]
    KHz,
    /// Megahertz.
    #[default]
    #[serde(alias = "MHz")]
    MHz,
    /// Gigahertz.
    #[serde(alias = "GHz")]
    GHz,
}

impl FrequencyUnit {
    /// Multiplier from this unit to hertz.
    #[must_use]
    pub fn scale(self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1.0e3,
            FrequencyUnit::MHz => 1.0e6,
            FrequencyUnit::GHz => 1.0e9,
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = SaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hz" => Ok(FrequencyUnit::Hz),
            "khz" => Ok(FrequencyUnit::KHz),
            "mhz" => Ok(FrequencyUnit::MHz),
            "ghz" => Ok(FrequencyUnit::GHz),
            other => Err(SaError::Validation(format!("Unknown frequency unit '{}'", other))),
        }
    }
}

/// The four text fields of the frequency panel. Only the pair selected by the
/// mode is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyFields {
    /// Start field.
    pub start: String,
    /// Stop field.
    pub stop: String,
    /// Center field.
    pub center: String,
    /// Span field.
    pub span: String,
}

impl Default for FrequencyFields {
    fn default() -> Self {
        Self {
            start: "0".to_string(),
            stop: "3000".to_string(),
            center: "1000".to_string(),
            span: "2000".to_string(),
        }
    }
}

fn parse_field(name: &str, text: &str) -> SaResult<f64> {
    let value = text
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| SaError::Validation(format!("{} '{}' is not a number", name, text)))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SaError::Validation(format!("{} '{}' is not a number", name, text)))
    }
}

/// Resolves the fields selected by `mode` into `(start, stop)` in the unit
/// the fields were entered in.
pub fn resolve(mode: FrequencyMode, fields: &FrequencyFields) -> SaResult<(f64, f64)> {
    let (start, stop) = match mode {
        FrequencyMode::StartStop => (
            parse_field("Start", &fields.start)?,
            parse_field("Stop", &fields.stop)?,
        ),
        FrequencyMode::CenterSpan => {
            let center = parse_field("Center", &fields.center)?;
            let span = parse_field("Span", &fields.span)?;
            (center - span / 2.0, center + span / 2.0)
        }
    };

    if start >= stop {
        return Err(SaError::Validation(format!(
            "Start frequency {} must be below stop frequency {}",
            start, stop
        )));
    }
    Ok((start, stop))
}

/// Like [`resolve`], scaled to hertz.
pub fn resolve_hz(
    mode: FrequencyMode,
    fields: &FrequencyFields,
    unit: FrequencyUnit,
) -> SaResult<(f64, f64)> {
    let (start, stop) = resolve(mode, fields)?;
    Ok((start * unit.scale(), stop * unit.scale()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(start: &str, stop: &str, center: &str, span: &str) -> FrequencyFields {
        FrequencyFields {
            start: start.to_string(),
            stop: stop.to_string(),
            center: center.to_string(),
            span: span.to_string(),
        }
    }

    #[test]
    fn test_start_stop_passthrough() {
        let f = fields("0", "3000", "", "");
        assert_eq!(resolve(FrequencyMode::StartStop, &f).unwrap(), (0.0, 3000.0));
    }

    #[test]
    fn test_center_span() {
        let f = fields("", "", "1000", "2000");
        assert_eq!(resolve(FrequencyMode::CenterSpan, &f).unwrap(), (0.0, 2000.0));
    }

    #[test]
    fn test_equal_bounds_rejected() {
        let f = fields("10", "10", "0", "0");
        assert!(matches!(
            resolve(FrequencyMode::StartStop, &f),
            Err(SaError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_span_rejected() {
        let f = fields("", "", "500", "0");
        assert!(resolve(FrequencyMode::CenterSpan, &f).is_err());
    }

    #[test]
    fn test_comma_decimal_separator() {
        let f = fields(" 1,5 ", "2.25", "", "");
        assert_eq!(resolve(FrequencyMode::StartStop, &f).unwrap(), (1.5, 2.25));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let f = fields("abc", "100", "", "");
        let err = resolve(FrequencyMode::StartStop, &f).unwrap_err();
        assert!(err.to_string().contains("Start 'abc'"));

        let f = fields("0", "NaN", "", "");
        assert!(resolve(FrequencyMode::StartStop, &f).is_err());
    }

    #[test]
    fn test_unused_fields_ignored() {
        // Center/span garbage does not matter in start/stop mode
        let f = fields("100", "200", "junk", "junk");
        assert!(resolve(FrequencyMode::StartStop, &f).is_ok());
    }

    #[test]
    fn test_resolve_hz_scales() {
        let f = FrequencyFields::default();
        let (start, stop) = resolve_hz(FrequencyMode::StartStop, &f, FrequencyUnit::MHz).unwrap();
        assert_eq!(start, 0.0);
        assert_eq!(stop, 3.0e9);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Center/Span".parse::<FrequencyMode>().unwrap(), FrequencyMode::CenterSpan);
        assert_eq!("start-stop".parse::<FrequencyMode>().unwrap(), FrequencyMode::StartStop);
        assert!("sideways".parse::<FrequencyMode>().is_err());
    }
}

//! Typed SCPI command set for swept spectrum analyzers.
//!
//! Every command the engine sends is a variant of [`ScpiCommand`]; the wire
//! text is produced in one place by its `Display` implementation.
//!
//! ```
//! use dual_sa::scpi::ScpiCommand;
//!
//! assert_eq!(ScpiCommand::FrequencyStart(1.0e6).to_string(), ":FREQ:STAR 1000000");
//! assert!(ScpiCommand::SweepTime.is_query());
//! ```

use std::fmt;

/// Detector modes understood by the analyzer. Sweeps always use positive peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    /// Positive-peak detection per display bin.
    PositivePeak,
}

/// Trace data formats. Only ASCII is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Comma-separated text values.
    Ascii,
}

/// Trace registers that can be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceId {
    /// First trace register.
    Trace1,
}

/// The fixed protocol command set.
#[derive(Debug, Clone, PartialEq)]
pub enum ScpiCommand {
    /// `*IDN?`
    Identify,
    /// `*OPC?`
    OperationComplete,
    /// `:FREQ:STAR <hz>`
    FrequencyStart(f64),
    /// `:FREQ:STOP <hz>`
    FrequencyStop(f64),
    /// `:FREQ:CENT <hz>`
    FrequencyCenter(f64),
    /// `:FREQ:SPAN <hz>`
    FrequencySpan(f64),
    /// `:FREQ:STAR?`
    FrequencyStartQuery,
    /// `:FREQ:STOP?`
    FrequencyStopQuery,
    /// `:SWE:POIN <n>`
    SweepPoints(u32),
    /// `:SWE:POIN?`
    SweepPointsQuery,
    /// `:BAND:RES:AUTO ON`
    ResolutionBandwidthAuto,
    /// `:BAND:RES <hz>`
    ResolutionBandwidth(f64),
    /// `:BAND:VID <hz>`
    VideoBandwidth(f64),
    /// `:DET <mode>`
    Detector(Detector),
    /// `:FORM:TRAC:DATA <format>`
    TraceFormat(TraceFormat),
    /// `:INIT:CONT ON|OFF`
    ContinuousTrigger(bool),
    /// `:INIT`
    Initiate,
    /// `:SWE:TIME?`
    SweepTime,
    /// `:TRAC:DATA? <trace>`
    TraceData(TraceId),
}

impl ScpiCommand {
    /// True when the instrument answers this command with a response line.
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            ScpiCommand::Identify
                | ScpiCommand::OperationComplete
                | ScpiCommand::FrequencyStartQuery
                | ScpiCommand::FrequencyStopQuery
                | ScpiCommand::SweepPointsQuery
                | ScpiCommand::SweepTime
                | ScpiCommand::TraceData(_)
        )
    }
}

impl fmt::Display for ScpiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScpiCommand::Identify => f.write_str("*IDN?"),
            ScpiCommand::OperationComplete => f.write_str("*OPC?"),
            ScpiCommand::FrequencyStart(hz) => write!(f, ":FREQ:STAR {}", hz),
            ScpiCommand::FrequencyStop(hz) => write!(f, ":FREQ:STOP {}", hz),
            ScpiCommand::FrequencyCenter(hz) => write!(f, ":FREQ:CENT {}", hz),
            ScpiCommand::FrequencySpan(hz) => write!(f, ":FREQ:SPAN {}", hz),
            ScpiCommand::FrequencyStartQuery => f.write_str(":FREQ:STAR?"),
            ScpiCommand::FrequencyStopQuery => f.write_str(":FREQ:STOP?"),
            ScpiCommand::SweepPoints(n) => write!(f, ":SWE:POIN {}", n),
            ScpiCommand::SweepPointsQuery => f.write_str(":SWE:POIN?"),
            ScpiCommand::ResolutionBandwidthAuto => f.write_str(":BAND:RES:AUTO ON"),
            ScpiCommand::ResolutionBandwidth(hz) => write!(f, ":BAND:RES {}", hz),
            ScpiCommand::VideoBandwidth(hz) => write!(f, ":BAND:VID {}", hz),
            ScpiCommand::Detector(Detector::PositivePeak) => f.write_str(":DET POS"),
            ScpiCommand::TraceFormat(TraceFormat::Ascii) => f.write_str(":FORM:TRAC:DATA ASCii"),
            ScpiCommand::ContinuousTrigger(true) => f.write_str(":INIT:CONT ON"),
            ScpiCommand::ContinuousTrigger(false) => f.write_str(":INIT:CONT OFF"),
            ScpiCommand::Initiate => f.write_str(":INIT"),
            ScpiCommand::SweepTime => f.write_str(":SWE:TIME?"),
            ScpiCommand::TraceData(TraceId::Trace1) => f.write_str(":TRAC:DATA? TRACE1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_formatting() {
        assert_eq!(ScpiCommand::FrequencyStop(3.0e9).to_string(), ":FREQ:STOP 3000000000");
        assert_eq!(ScpiCommand::FrequencyCenter(1.5e6).to_string(), ":FREQ:CENT 1500000");
        assert_eq!(ScpiCommand::SweepPoints(601).to_string(), ":SWE:POIN 601");
        assert_eq!(ScpiCommand::ResolutionBandwidth(1.0e4).to_string(), ":BAND:RES 10000");
        assert_eq!(ScpiCommand::VideoBandwidth(3.0e6).to_string(), ":BAND:VID 3000000");
    }

    #[test]
    fn test_fixed_commands() {
        assert_eq!(ScpiCommand::ResolutionBandwidthAuto.to_string(), ":BAND:RES:AUTO ON");
        assert_eq!(ScpiCommand::Detector(Detector::PositivePeak).to_string(), ":DET POS");
        assert_eq!(
            ScpiCommand::TraceFormat(TraceFormat::Ascii).to_string(),
            ":FORM:TRAC:DATA ASCii"
        );
        assert_eq!(ScpiCommand::ContinuousTrigger(false).to_string(), ":INIT:CONT OFF");
        assert_eq!(ScpiCommand::TraceData(TraceId::Trace1).to_string(), ":TRAC:DATA? TRACE1");
    }

    #[test]
    fn test_query_classification() {
        assert!(ScpiCommand::Identify.is_query());
        assert!(ScpiCommand::TraceData(TraceId::Trace1).is_query());
        assert!(!ScpiCommand::Initiate.is_query());
        assert!(!ScpiCommand::ContinuousTrigger(true).is_query());
    }
}

//! Translates a [`SweepConfig`] into the ordered configuration writes.

use super::params::{ResolutionBandwidth, SweepConfig};
use crate::scpi::ScpiCommand;
use crate::session::InstrumentSession;
use tracing::{debug, warn};

/// Outcome of one configuration pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigureReport {
    /// Wire text of every command whose write failed, in issue order.
    pub failed: Vec<String>,
}

impl ConfigureReport {
    /// True when every write went through.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Issues sweep settings to an analyzer.
///
/// Configuration is best effort: a rejected write is logged and the pass
/// continues, so a bandwidth the instrument refuses never leaves the
/// frequency range unset. Nothing is read back.
pub struct SweepConfigurator;

impl SweepConfigurator {
    /// The configuration commands for `config`, in issue order.
    #[must_use]
    pub fn commands(config: &SweepConfig) -> Vec<ScpiCommand> {
        let resolution_bw = match config.resolution_bw() {
            ResolutionBandwidth::Auto => ScpiCommand::ResolutionBandwidthAuto,
            ResolutionBandwidth::Manual(bw) => ScpiCommand::ResolutionBandwidth(bw.hz()),
        };

        vec![
            resolution_bw,
            ScpiCommand::FrequencyStart(config.start_hz()),
            ScpiCommand::FrequencyStop(config.stop_hz()),
            ScpiCommand::FrequencyCenter(config.center_hz()),
            ScpiCommand::FrequencySpan(config.span_hz()),
            ScpiCommand::SweepPoints(config.points().get()),
            ScpiCommand::VideoBandwidth(config.video_bw().hz()),
            ScpiCommand::Detector(config.detector()),
            ScpiCommand::TraceFormat(config.trace_format()),
        ]
    }

    /// Writes every command with the settle delay between them.
    pub async fn apply(session: &mut InstrumentSession, config: &SweepConfig) -> ConfigureReport {
        let mut report = ConfigureReport::default();
        for command in Self::commands(config) {
            if let Err(e) = session.write(&command).await {
                warn!(analyzer = %session.name(), "Configuration write '{}' failed: {}", command, e);
                report.failed.push(command.to_string());
            }
        }
        debug!(
            analyzer = %session.name(),
            failed = report.failed.len(),
            "Applied sweep configuration {:.0}..{:.0} Hz",
            config.start_hz(),
            config.stop_hz()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::params::{SweepPoints, VideoBandwidth};

    #[test]
    fn test_command_order() {
        let config = SweepConfig::new(
            1.0e6,
            3.0e6,
            SweepPoints::new(601).unwrap(),
            "10k".parse().unwrap(),
            "100".parse::<VideoBandwidth>().unwrap(),
        )
        .unwrap();

        let texts: Vec<String> = SweepConfigurator::commands(&config)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            texts,
            vec![
                ":BAND:RES 10000",
                ":FREQ:STAR 1000000",
                ":FREQ:STOP 3000000",
                ":FREQ:CENT 2000000",
                ":FREQ:SPAN 2000000",
                ":SWE:POIN 601",
                ":BAND:VID 100",
                ":DET POS",
                ":FORM:TRAC:DATA ASCii",
            ]
        );
    }

    #[test]
    fn test_auto_rbw_sentinel() {
        let config = SweepConfig::new(
            0.0,
            1.0e9,
            SweepPoints::default(),
            ResolutionBandwidth::Auto,
            VideoBandwidth::default(),
        )
        .unwrap();
        assert_eq!(
            SweepConfigurator::commands(&config)[0],
            ScpiCommand::ResolutionBandwidthAuto
        );
    }
}

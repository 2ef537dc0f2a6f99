//! One analyzer's command channel.
//!
//! An [`InstrumentSession`] owns the transport to a single analyzer and is
//! the only path by which commands reach it. Commands are strictly
//! sequential: every query is a write, a fixed delay, then a read. The
//! delays come from [`TimingConfig`] and run on tokio's clock.

use crate::config::TimingConfig;
use crate::error::{SaError, SaResult};
use crate::scpi::ScpiCommand;
use crate::traits::{InstrumentTransport, TransportFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Shared "continuous sweep running" flag.
///
/// Set when a continuous loop starts, cleared to request a stop. The loop
/// observes it once per iteration.
#[derive(Debug, Clone, Default)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    /// A cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns false if it was already set.
    pub fn try_start(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Asks a running loop to stop after its current iteration.
    pub fn request_stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// True while a loop is running and no stop was requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

async fn identify(
    timing: &TimingConfig,
    transport: &mut dyn InstrumentTransport,
) -> anyhow::Result<String> {
    transport.set_timeout(timing.default_timeout)?;
    sleep(timing.connect_settle).await;
    transport.write(&ScpiCommand::Identify.to_string()).await?;
    sleep(timing.identify_delay).await;
    Ok(transport.read().await?.trim().to_string())
}

/// Session to one analyzer.
pub struct InstrumentSession {
    name: String,
    transport: Option<Box<dyn InstrumentTransport>>,
    address: Option<String>,
    identity: Option<String>,
    timing: TimingConfig,
    running: RunningFlag,
}

impl InstrumentSession {
    /// Disconnected session named `name` (used in logs and errors).
    pub fn new(name: impl Into<String>, timing: TimingConfig) -> Self {
        Self {
            name: name.into(),
            transport: None,
            address: None,
            identity: None,
            timing,
            running: RunningFlag::new(),
        }
    }

    /// Opens `address` through `factory` and identifies the instrument.
    ///
    /// An existing connection is closed first. On failure the session is
    /// left disconnected and any half-open transport is closed.
    ///
    /// # Errors
    /// `SaError::Connection` if the open or the identity query fails.
    pub async fn connect(&mut self, factory: &dyn TransportFactory, address: &str) -> SaResult<String> {
        self.disconnect().await;
        info!("{}: connecting to {} via {}", self.name, address, factory.kind());

        let mut transport = factory.open(address).await.map_err(|e| {
            SaError::Connection(format!("{}: failed to open {}: {:#}", self.name, address, e))
        })?;

        match identify(&self.timing, transport.as_mut()).await {
            Ok(identity) => {
                info!("{} connected: {}", self.name, identity);
                self.transport = Some(transport);
                self.address = Some(address.to_string());
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!("{}: close after failed connect: {:#}", self.name, close_err);
                }
                Err(SaError::Connection(format!(
                    "{}: no identity from {}: {:#}",
                    self.name, address, e
                )))
            }
        }
    }

    /// Stops any continuous loop and closes the transport.
    ///
    /// Idempotent. Returns true if a connection was actually closed.
    pub async fn disconnect(&mut self) -> bool {
        self.running.request_stop();
        self.identity = None;
        self.address = None;
        let Some(mut transport) = self.transport.take() else {
            return false;
        };
        if let Err(e) = transport.close().await {
            warn!("{}: error while closing {}: {:#}", self.name, transport.describe(), e);
        }
        info!("{} disconnected", self.name);
        true
    }

    fn transport(&mut self) -> SaResult<&mut Box<dyn InstrumentTransport>> {
        let name = &self.name;
        self.transport
            .as_mut()
            .ok_or_else(|| SaError::NotConnected(name.clone()))
    }

    /// Sends one command with no settle delay.
    ///
    /// # Errors
    /// `NotConnected`, or `Transport` when the write fails.
    pub async fn send(&mut self, command: &ScpiCommand) -> SaResult<()> {
        let name = self.name.clone();
        let text = command.to_string();
        debug!("{}: SCPI write: {}", name, text);
        self.transport()?
            .write(&text)
            .await
            .map_err(|e| SaError::Transport(format!("{}: write '{}' failed: {:#}", name, text, e)))
    }

    /// Sends one command and waits the command settle time.
    ///
    /// # Errors
    /// As [`InstrumentSession::send`].
    pub async fn write(&mut self, command: &ScpiCommand) -> SaResult<()> {
        self.send(command).await?;
        sleep(self.timing.command_settle).await;
        Ok(())
    }

    /// Query with the read-back delay.
    ///
    /// # Errors
    /// As [`InstrumentSession::query_with_delay`].
    pub async fn query(&mut self, command: &ScpiCommand) -> SaResult<String> {
        let delay = self.timing.readback_delay;
        self.query_with_delay(command, delay).await
    }

    /// Writes `command`, waits `delay`, reads one trimmed response.
    ///
    /// # Errors
    /// `NotConnected`, or `Transport` on write/read failure or timeout.
    pub async fn query_with_delay(&mut self, command: &ScpiCommand, delay: Duration) -> SaResult<String> {
        self.send(command).await?;
        sleep(delay).await;

        let name = self.name.clone();
        let response = self.transport()?.read().await.map_err(|e| {
            SaError::Transport(format!("{}: reading '{}' response failed: {:#}", name, command, e))
        })?;
        debug!("{}: SCPI response to {}: {} bytes", name, command, response.len());
        Ok(response.trim().to_string())
    }

    /// `*OPC?` with a short wait; true iff the response contains `1`.
    ///
    /// Never called automatically. Failures count as not alive.
    pub async fn check_alive(&mut self) -> bool {
        let delay = self.timing.opc_delay;
        match self.query_with_delay(&ScpiCommand::OperationComplete, delay).await {
            Ok(response) => response.contains('1'),
            Err(e) => {
                warn!("{}: liveness check failed: {}", self.name, e);
                false
            }
        }
    }

    /// Current transport timeout, `None` when disconnected.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.transport.as_ref().map(|t| t.timeout())
    }

    /// Changes the transport timeout.
    ///
    /// # Errors
    /// `NotConnected`, or `Transport` if the transport rejects the value.
    pub fn set_timeout(&mut self, timeout: Duration) -> SaResult<()> {
        let name = self.name.clone();
        self.transport()?
            .set_timeout(timeout)
            .map_err(|e| SaError::Transport(format!("{}: set timeout failed: {:#}", name, e)))
    }

    /// True while a transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Identity string captured at connect.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Address of the open connection.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol delays in use.
    #[must_use]
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Handle to this session's continuous-sweep flag.
    #[must_use]
    pub fn running_flag(&self) -> RunningFlag {
        self.running.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockTransportFactory, SimulatedAnalyzer};
    use tokio::time::Instant;

    fn session() -> InstrumentSession {
        InstrumentSession::new("sa1", TimingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reads_identity_after_settle() {
        let analyzer = SimulatedAnalyzer::new("S1");
        let factory = MockTransportFactory::new(analyzer.clone());
        let mut session = session();

        let started = Instant::now();
        let identity = session.connect(&factory, "10.0.0.1").await.unwrap();
        assert_eq!(identity, "Simulated,SA3000,S1,1.0.0");
        assert!(started.elapsed() >= Duration::from_millis(2500));
        assert!(session.is_connected());
        assert_eq!(session.identity(), Some(identity.as_str()));
        assert_eq!(session.timeout(), Some(Duration::from_secs(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_leaves_disconnected() {
        let analyzer = SimulatedAnalyzer::default();
        analyzer.set_fail_open(true);
        let factory = MockTransportFactory::new(analyzer.clone());
        let mut session = session();

        let result = session.connect(&factory, "10.0.0.1").await;
        assert!(matches!(result, Err(SaError::Connection(_))));
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_failure_closes_transport() {
        let analyzer = SimulatedAnalyzer::default();
        analyzer.fail_on("*IDN?");
        let factory = MockTransportFactory::new(analyzer.clone());
        let mut session = session();

        assert!(matches!(
            session.connect(&factory, "10.0.0.1").await,
            Err(SaError::Connection(_))
        ));
        assert!(!session.is_connected());
        assert_eq!(analyzer.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_stops_loop() {
        let factory = MockTransportFactory::new(SimulatedAnalyzer::default());
        let mut session = session();
        session.connect(&factory, "10.0.0.1").await.unwrap();

        let flag = session.running_flag();
        assert!(flag.try_start());
        assert!(session.disconnect().await);
        assert!(!flag.is_running());
        assert!(!session.disconnect().await);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_require_connection() {
        let mut session = session();
        assert!(matches!(
            session.write(&ScpiCommand::Initiate).await,
            Err(SaError::NotConnected(_))
        ));
        assert!(!session.check_alive().await);
        assert!(session.set_timeout(Duration::from_secs(1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_and_check_alive() {
        let analyzer = SimulatedAnalyzer::default();
        let factory = MockTransportFactory::new(analyzer.clone());
        let mut session = session();
        session.connect(&factory, "10.0.0.1").await.unwrap();

        session.write(&ScpiCommand::SweepPoints(401)).await.unwrap();
        assert_eq!(session.query(&ScpiCommand::SweepPointsQuery).await.unwrap(), "401");
        assert!(session.check_alive().await);

        analyzer.set_response("*OPC?", "0");
        assert!(!session.check_alive().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_is_transport_error() {
        let analyzer = SimulatedAnalyzer::default();
        let factory = MockTransportFactory::new(analyzer.clone());
        let mut session = session();
        session.connect(&factory, "10.0.0.1").await.unwrap();

        analyzer.fail_on(":SWE:TIME?");
        let err = session.query(&ScpiCommand::SweepTime).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_running_flag() {
        let flag = RunningFlag::new();
        assert!(flag.try_start());
        assert!(!flag.try_start());
        flag.request_stop();
        assert!(!flag.is_running());
        assert!(flag.try_start());
    }
}

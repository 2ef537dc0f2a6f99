//! The dual-analyzer station.
//!
//! Owns one [`AnalyzerController`] per configured analyzer (normally `sa1`
//! and `sa2`) and the event stream they share. Controllers never touch each
//! other's state; the station only fans operations out.
//!
//! # Shutdown Sequence
//!
//! 1. Every continuous loop is asked to stop
//! 2. Each loop gets `timing.shutdown_timeout` to exit
//! 3. Every session is disconnected and peak hold cleared
//!
//! The timeout only bounds step 2. A sweep iteration holds the session lock
//! until its trace is read, so step 3 still waits for an iteration that
//! outlasts the timeout (roughly 1.2 x the sweep time plus read-backs).

use crate::analyzer::{AnalyzerController, AnalyzerEvent};
use crate::config::{AppConfig, TimingConfig, TransportKind};
use crate::error::{SaError, SaResult};
use crate::hardware::factory_for;
use crate::traits::TransportFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Both analyzers and their event stream.
pub struct DualAnalyzerStation {
    analyzers: Vec<AnalyzerController>,
    events: Option<mpsc::UnboundedReceiver<AnalyzerEvent>>,
    shutdown_timeout: Duration,
}

impl DualAnalyzerStation {
    /// Builds controllers from explicit `(id, address, factory)` triples.
    pub fn new(
        analyzers: Vec<(String, String, Arc<dyn TransportFactory>)>,
        timing: TimingConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown_timeout = timing.shutdown_timeout;
        let analyzers = analyzers
            .into_iter()
            .map(|(id, address, factory)| {
                AnalyzerController::new(id, address, factory, timing.clone(), tx.clone())
            })
            .collect();

        Self {
            analyzers,
            events: Some(rx),
            shutdown_timeout,
        }
    }

    /// Builds controllers for every enabled analyzer in `config`.
    ///
    /// With `mock` set, every analyzer uses the simulated transport.
    ///
    /// # Errors
    /// A configured transport that is not available in this build.
    pub fn from_config(config: &AppConfig, mock: bool) -> SaResult<Self> {
        let timing = config.timing.clone();
        let analyzers = config
            .enabled_analyzers()
            .into_iter()
            .map(|def| {
                let kind = if mock { TransportKind::Mock } else { def.transport };
                let factory = factory_for(kind, &def.id, timing.default_timeout)?;
                Ok((def.id.clone(), def.address.clone(), factory))
            })
            .collect::<SaResult<Vec<_>>>()?;

        if analyzers.is_empty() {
            return Err(SaError::Validation("No analyzers enabled".to_string()));
        }
        Ok(Self::new(analyzers, timing))
    }

    /// All controllers, in configuration order.
    #[must_use]
    pub fn analyzers(&self) -> &[AnalyzerController] {
        &self.analyzers
    }

    /// Controller by id.
    #[must_use]
    pub fn analyzer(&self, id: &str) -> Option<&AnalyzerController> {
        self.analyzers.iter().find(|a| a.id() == id)
    }

    /// Takes the shared event receiver. Only the first call gets it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<AnalyzerEvent>> {
        self.events.take()
    }

    /// Connects every analyzer concurrently.
    pub async fn connect_all(&self) -> Vec<(String, SaResult<String>)> {
        let ids: Vec<&str> = self.analyzers.iter().map(AnalyzerController::id).collect();
        self.connect(&ids).await
    }

    /// Connects the named analyzers concurrently; one failure does not
    /// affect the others. Unknown ids are skipped. Results are sorted by id.
    pub async fn connect(&self, ids: &[&str]) -> Vec<(String, SaResult<String>)> {
        let mut tasks = JoinSet::new();
        for analyzer in self.analyzers.iter().filter(|a| ids.contains(&a.id())) {
            let analyzer = analyzer.clone();
            tasks.spawn(async move {
                let result = analyzer.connect().await;
                (analyzer.id().to_string(), result)
            });
        }

        let mut results = Vec::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => warn!("Connect task failed: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn stop_and_disconnect(&self) {
        for analyzer in &self.analyzers {
            analyzer.stop_continuous();
        }
        for analyzer in &self.analyzers {
            if let Ok(Some(Err(e))) =
                tokio::time::timeout(self.shutdown_timeout, analyzer.join_continuous()).await
            {
                warn!(analyzer = %analyzer.id(), "Continuous loop ended with error: {}", e);
            }
        }
        for analyzer in &self.analyzers {
            analyzer.disconnect().await;
        }
    }

    /// Stops both analyzers, disconnects them and clears peak hold.
    pub async fn reset_network(&self) {
        info!("Resetting analyzer network");
        self.stop_and_disconnect().await;
        info!("Analyzer network reset complete");
    }

    /// Orderly teardown before exit.
    pub async fn shutdown(&self) {
        info!("Station shutting down");
        self.stop_and_disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_with_mock() {
        let station = DualAnalyzerStation::from_config(&AppConfig::default(), true).unwrap();
        let ids: Vec<&str> = station.analyzers().iter().map(AnalyzerController::id).collect();
        assert_eq!(ids, vec!["sa1", "sa2"]);
        assert_eq!(station.analyzer("sa2").unwrap().address(), "192.168.60.69");
        assert!(station.analyzer("sa3").is_none());
    }

    #[test]
    fn test_from_config_skips_disabled() {
        let mut config = AppConfig::default();
        config.analyzers[1].enabled = false;
        let station = DualAnalyzerStation::from_config(&config, true).unwrap();
        assert_eq!(station.analyzers().len(), 1);

        config.analyzers[0].enabled = false;
        assert!(matches!(
            DualAnalyzerStation::from_config(&config, true),
            Err(SaError::Validation(_))
        ));
    }

    #[test]
    fn test_events_taken_once() {
        let mut station = DualAnalyzerStation::from_config(&AppConfig::default(), true).unwrap();
        assert!(station.take_events().is_some());
        assert!(station.take_events().is_none());
    }
}

//! Per-analyzer controller and the upward event interface.
//!
//! An [`AnalyzerController`] pairs one shared session with its sweep engine,
//! peak-hold state and running flag. Sweeps run on background tasks;
//! results and status travel upward as [`AnalyzerEvent`]s on an unbounded
//! channel, so the controlling surface never blocks on instrument I/O.

use crate::config::TimingConfig;
use crate::error::{SaError, SaResult};
use crate::session::{InstrumentSession, RunningFlag};
use crate::sweep::{DecodedTrace, PeakHold, PeakHoldSnapshot, SweepConfig, SweepEngine, SweepState};
use crate::traits::TransportFactory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Status message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Tolerated problem.
    Warning,
    /// Operation failed.
    Error,
}

/// One completed sweep, as delivered to the controlling surface.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    /// Analyzer that produced the sweep.
    pub analyzer: String,
    /// Running count of sweeps on this analyzer, starting at 1.
    pub sweep_index: u64,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Frequency axis in hertz.
    pub frequencies_hz: Vec<f64>,
    /// Amplitudes in dBm.
    pub amplitudes_dbm: Vec<f64>,
    /// Peak hold after folding in this sweep.
    pub peak_hold: Option<PeakHoldSnapshot>,
    /// Point count the analyzer reported.
    pub declared_points: usize,
    /// Decoded count differed from `declared_points`.
    pub count_mismatch: bool,
}

/// What happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// Session opened and identified.
    Connected {
        /// `*IDN?` response.
        identity: String,
    },
    /// Session closed.
    Disconnected,
    /// A sweep finished.
    TraceReady(Box<SweepResult>),
    /// Human-readable status line.
    Status {
        /// Message text.
        message: String,
        /// How serious it is.
        severity: Severity,
    },
    /// Continuous mode switched on or off.
    ContinuousChanged {
        /// New state.
        active: bool,
    },
    /// A sweep started or finished.
    Busy {
        /// New state.
        busy: bool,
    },
}

/// Event from one analyzer.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerEvent {
    /// Analyzer id.
    pub analyzer: String,
    /// Payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Clone)]
struct EventSink {
    analyzer: String,
    tx: mpsc::UnboundedSender<AnalyzerEvent>,
}

impl EventSink {
    fn emit(&self, kind: EventKind) {
        let event = AnalyzerEvent {
            analyzer: self.analyzer.clone(),
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!(analyzer = %self.analyzer, "Event receiver dropped");
        }
    }

    fn status(&self, message: impl Into<String>, severity: Severity) {
        self.emit(EventKind::Status {
            message: message.into(),
            severity,
        });
    }
}

/// Turns decoded traces into results: folds them into peak hold, stamps
/// and numbers them, emits `TraceReady`.
#[derive(Clone)]
struct TracePublisher {
    events: EventSink,
    peak_hold: Arc<std::sync::Mutex<PeakHold>>,
    sweep_count: Arc<AtomicU64>,
}

impl TracePublisher {
    fn publish(&self, decoded: DecodedTrace) -> SweepResult {
        let peak_hold = {
            let mut hold = self.peak_hold.lock().unwrap_or_else(PoisonError::into_inner);
            hold.update(&decoded.trace);
            hold.snapshot().cloned()
        };
        let (frequencies_hz, amplitudes_dbm) = decoded.trace.into_parts();

        let result = SweepResult {
            analyzer: self.events.analyzer.clone(),
            sweep_index: self.sweep_count.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            frequencies_hz,
            amplitudes_dbm,
            peak_hold,
            declared_points: decoded.declared_points,
            count_mismatch: decoded.count_mismatch,
        };
        self.events.emit(EventKind::TraceReady(Box::new(result.clone())));
        result
    }
}

/// Marks the analyzer busy for its lifetime.
struct BusyGuard {
    flag: Arc<AtomicBool>,
    events: EventSink,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.events.emit(EventKind::Busy { busy: false });
    }
}

/// Controller for one analyzer.
///
/// Clones share the same session and state.
#[derive(Clone)]
pub struct AnalyzerController {
    id: String,
    address: String,
    factory: Arc<dyn TransportFactory>,
    session: Arc<Mutex<InstrumentSession>>,
    engine: Arc<SweepEngine>,
    running: RunningFlag,
    busy: Arc<AtomicBool>,
    continuous_task: Arc<std::sync::Mutex<Option<JoinHandle<SaResult<u64>>>>>,
    publisher: TracePublisher,
}

impl AnalyzerController {
    /// Creates a disconnected controller reporting on `events`.
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
        timing: TimingConfig,
        events: mpsc::UnboundedSender<AnalyzerEvent>,
    ) -> Self {
        let id = id.into();
        let session = InstrumentSession::new(id.clone(), timing);
        let running = session.running_flag();
        let events = EventSink {
            analyzer: id.clone(),
            tx: events,
        };

        Self {
            id,
            address: address.into(),
            factory,
            session: Arc::new(Mutex::new(session)),
            engine: Arc::new(SweepEngine::new()),
            running,
            busy: Arc::new(AtomicBool::new(false)),
            continuous_task: Arc::new(std::sync::Mutex::new(None)),
            publisher: TracePublisher {
                events,
                peak_hold: Arc::new(std::sync::Mutex::new(PeakHold::new())),
                sweep_count: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// Analyzer id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Shared session handle.
    #[must_use]
    pub fn session(&self) -> Arc<Mutex<InstrumentSession>> {
        Arc::clone(&self.session)
    }

    /// Sweep state updates.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SweepState> {
        self.engine.subscribe()
    }

    /// True while a continuous loop runs and no stop was requested.
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.running.is_running()
    }

    /// True while any sweep is in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Whether the session is open.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_connected()
    }

    /// Current peak-hold state.
    #[must_use]
    pub fn peak_hold(&self) -> Option<PeakHoldSnapshot> {
        self.publisher
            .peak_hold
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
            .cloned()
    }

    /// Clears peak hold; the next sweep starts a fresh hold.
    pub fn reset_peak(&self) {
        self.publisher
            .peak_hold
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        debug!(analyzer = %self.id, "Peak hold reset");
    }

    fn claim(&self) -> SaResult<BusyGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SaError::Busy(self.id.clone()));
        }
        self.publisher.events.emit(EventKind::Busy { busy: true });
        Ok(BusyGuard {
            flag: Arc::clone(&self.busy),
            events: self.publisher.events.clone(),
        })
    }

    /// Opens the session to the configured address.
    ///
    /// # Errors
    /// `Busy` while a sweep runs, `Connection` when the analyzer does not
    /// answer.
    pub async fn connect(&self) -> SaResult<String> {
        if self.is_busy() {
            return Err(SaError::Busy(self.id.clone()));
        }
        let result = {
            let mut session = self.session.lock().await;
            session.connect(self.factory.as_ref(), &self.address).await
        };

        match result {
            Ok(identity) => {
                self.publisher.events.emit(EventKind::Connected {
                    identity: identity.clone(),
                });
                self.publisher
                    .events
                    .status(format!("Connected to {}", self.address), Severity::Info);
                Ok(identity)
            }
            Err(e) => {
                warn!(analyzer = %self.id, "Connect failed: {}", e);
                self.publisher.events.status(e.to_string(), Severity::Error);
                Err(e)
            }
        }
    }

    /// Stops any continuous loop, closes the session and clears peak hold.
    ///
    /// An in-flight sweep iteration finishes first. Idempotent.
    pub async fn disconnect(&self) {
        self.running.request_stop();
        let was_connected = self.session.lock().await.disconnect().await;
        self.reset_peak();
        if was_connected {
            self.publisher.events.emit(EventKind::Disconnected);
        }
    }

    /// Runs one sweep on the current task.
    ///
    /// # Errors
    /// `Busy` if another sweep is active, `NotConnected`, or `Sweep`.
    pub async fn single_sweep(&self, config: &SweepConfig) -> SaResult<SweepResult> {
        let guard = self.claim()?;
        self.run_single(config, guard).await
    }

    /// Spawns one sweep; the result arrives as `TraceReady`.
    ///
    /// # Errors
    /// `Busy` if another sweep is active. Sweep failures are reported
    /// through the returned handle and a `Status` event.
    pub fn start_single(&self, config: SweepConfig) -> SaResult<JoinHandle<SaResult<SweepResult>>> {
        let guard = self.claim()?;
        let controller = self.clone();
        Ok(tokio::spawn(async move {
            controller.run_single(&config, guard).await
        }))
    }

    async fn run_single(&self, config: &SweepConfig, _guard: BusyGuard) -> SaResult<SweepResult> {
        let decoded = {
            let mut session = self.session.lock().await;
            if !session.is_connected() {
                Err(SaError::NotConnected(self.id.clone()))
            } else {
                self.engine.single_sweep(&mut session, config).await
            }
        };

        match decoded {
            Ok(decoded) => {
                let result = self.publisher.publish(decoded);
                info!(analyzer = %self.id, points = result.amplitudes_dbm.len(), "Single sweep complete");
                Ok(result)
            }
            Err(e) => {
                error!(analyzer = %self.id, "Single sweep failed: {}", e);
                self.publisher.events.status(e.to_string(), Severity::Error);
                Err(e)
            }
        }
    }

    /// Starts continuous sweeping, or requests a stop if it is already running.
    ///
    /// Returns true when a loop was started, false when a stop was requested.
    ///
    /// # Errors
    /// `Busy` if a single sweep (or a loop that is still winding down) is
    /// active; `NotConnected`.
    pub async fn toggle_continuous(&self, config: SweepConfig) -> SaResult<bool> {
        if self.running.is_running() {
            self.stop_continuous();
            return Ok(false);
        }

        let guard = self.claim()?;
        if !self.is_connected().await {
            return Err(SaError::NotConnected(self.id.clone()));
        }
        if !self.running.try_start() {
            return Err(SaError::Busy(self.id.clone()));
        }

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let events = controller.publisher.events.clone();
            events.emit(EventKind::ContinuousChanged { active: true });
            events.status("Continuous sweep started", Severity::Info);

            let publisher = controller.publisher.clone();
            let result = controller
                .engine
                .continuous_sweep(controller.session(), &config, controller.running.clone(), |decoded| {
                    publisher.publish(decoded);
                })
                .await;

            match &result {
                Ok(count) => events.status(
                    format!("Continuous sweep stopped after {} sweeps", count),
                    Severity::Info,
                ),
                Err(e) => events.status(format!("Continuous sweep ended: {}", e), Severity::Error),
            }
            events.emit(EventKind::ContinuousChanged { active: false });
            result
        });

        *self
            .continuous_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(true)
    }

    /// Requests the continuous loop to stop after its current iteration.
    pub fn stop_continuous(&self) {
        if self.running.is_running() {
            info!(analyzer = %self.id, "Stopping continuous sweep");
            self.running.request_stop();
            self.publisher
                .events
                .status("Stopping continuous sweep", Severity::Info);
        }
    }

    /// Waits for the last continuous loop to exit and returns its outcome.
    ///
    /// `None` when no loop was started since the last wait.
    pub async fn join_continuous(&self) -> Option<SaResult<u64>> {
        let handle = self
            .continuous_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => Some(Err(SaError::Sweep(format!("Continuous task failed: {}", e)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = AnalyzerEvent {
            analyzer: "sa1".into(),
            kind: EventKind::Status {
                message: "Connected".into(),
                severity: Severity::Info,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "analyzer": "sa1",
                "event": "status",
                "message": "Connected",
                "severity": "info"
            })
        );
    }

    #[test]
    fn test_busy_guard_releases_on_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = AnalyzerController::new(
            "sa1",
            "sim",
            Arc::new(crate::hardware::MockTransportFactory::new(
                crate::hardware::SimulatedAnalyzer::default(),
            )),
            TimingConfig::default(),
            tx,
        );

        let guard = controller.claim().unwrap();
        assert!(controller.is_busy());
        assert!(matches!(controller.claim(), Err(SaError::Busy(_))));
        drop(guard);
        assert!(!controller.is_busy());

        let busy: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e.kind {
                EventKind::Busy { busy } => Some(busy),
                _ => None,
            })
            .collect();
        assert_eq!(busy, vec![true, false]);
    }
}

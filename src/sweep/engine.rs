//! Single and continuous sweep state machines.
//!
//! The analyzer never signals sweep completion, so the engine triggers a
//! sweep, asks the analyzer how long it will take, and sleeps for that long
//! plus a margin before reading the trace. All waits use tokio's clock.
//!
//! ```text
//! single:     Idle -> Configuring -> Sweeping -> Reading -> Idle
//! continuous: Idle -> Configuring -> (Sweeping -> Reading)* -> Idle
//! ```

use super::configurator::SweepConfigurator;
use super::params::SweepConfig;
use super::trace::{decode, DecodedTrace};
use crate::config::TimingConfig;
use crate::error::{SaError, SaResult};
use crate::scpi::{ScpiCommand, TraceFormat, TraceId};
use crate::session::{InstrumentSession, RunningFlag};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Where a sweep currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    /// No sweep in progress.
    Idle,
    /// Writing sweep settings.
    Configuring,
    /// Triggered, waiting for the sweep to finish.
    Sweeping,
    /// Reading back and decoding the trace.
    Reading,
}

/// Wait after a trigger: `duration * margin`, never less than `minimum`.
/// Saturates at `Duration::MAX`.
fn post_trigger_wait(duration: Duration, margin: f64, minimum: Duration) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * margin)
        .unwrap_or(Duration::MAX)
        .max(minimum)
}

/// Interprets a `:SWE:TIME?` reply. `None` for text that is not a number of
/// seconds within `0..=max`.
fn parse_sweep_time(text: &str, max: Duration) -> Option<Duration> {
    let seconds = text.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|duration| *duration <= max)
}

/// Parses a numeric read-back, falling back to the configured value.
fn parse_readback(text: &str, fallback: f64, what: &str) -> f64 {
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            debug!("Unparsable {} read-back '{}', using {}", what, text, fallback);
            fallback
        }
    }
}

fn sweep_failure(err: SaError) -> SaError {
    match err {
        SaError::Sweep(_) => err,
        other => SaError::sweep(other),
    }
}

/// Runs sweeps on one session and publishes its [`SweepState`].
pub struct SweepEngine {
    state: watch::Sender<SweepState>,
}

impl Default for SweepEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepEngine {
    /// Idle engine.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(SweepState::Idle);
        Self { state }
    }

    /// Receiver for state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SweepState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SweepState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SweepState) {
        self.state.send_replace(state);
    }

    /// Configures, triggers one sweep, waits it out and returns the trace.
    ///
    /// # Errors
    /// `SaError::Sweep` wrapping the first I/O or decode failure.
    pub async fn single_sweep(
        &self,
        session: &mut InstrumentSession,
        config: &SweepConfig,
    ) -> SaResult<DecodedTrace> {
        if !session.is_connected() {
            return Err(SaError::NotConnected(session.name().to_string()));
        }
        let result = self.run_single(session, config).await;
        self.set_state(SweepState::Idle);
        result.map_err(sweep_failure)
    }

    async fn run_single(
        &self,
        session: &mut InstrumentSession,
        config: &SweepConfig,
    ) -> SaResult<DecodedTrace> {
        let timing = session.timing().clone();

        self.set_state(SweepState::Configuring);
        SweepConfigurator::apply(session, config).await;

        self.set_state(SweepState::Sweeping);
        session.write(&ScpiCommand::ContinuousTrigger(false)).await?;
        session.send(&ScpiCommand::Initiate).await?;
        let duration = sweep_duration(session, &timing, timing.single_sweep_time_delay).await;
        let wait = post_trigger_wait(duration, timing.single_sweep_margin, timing.min_sweep_wait);
        debug!(analyzer = %session.name(), "Sweep time {:?}, waiting {:?}", duration, wait);
        sleep(wait).await;

        self.set_state(SweepState::Reading);
        read_trace(session, config, &timing).await
    }

    /// Sweeps repeatedly until `running` is cleared or an iteration fails.
    ///
    /// The session lock is taken per iteration, so a disconnect can land
    /// between iterations; the flag is checked before each one, so at most
    /// one more sweep completes after a stop request. Each decoded trace is
    /// handed to `on_trace` after the lock is released.
    ///
    /// On every exit the session timeout is restored, the trigger is set
    /// back to single, and `running` is cleared.
    ///
    /// # Errors
    /// The failure that ended the loop. Returns the number of completed
    /// sweeps otherwise.
    pub async fn continuous_sweep<F>(
        &self,
        session: Arc<Mutex<InstrumentSession>>,
        config: &SweepConfig,
        running: RunningFlag,
        mut on_trace: F,
    ) -> SaResult<u64>
    where
        F: FnMut(DecodedTrace) + Send,
    {
        let result = self
            .run_continuous(&session, config, &running, &mut on_trace)
            .await;

        {
            let mut session = session.lock().await;
            if session.is_connected() {
                let timeout = session.timing().default_timeout;
                if let Err(e) = session.set_timeout(timeout) {
                    debug!(analyzer = %session.name(), "Timeout restore failed: {}", e);
                }
                if let Err(e) = session.send(&ScpiCommand::ContinuousTrigger(false)).await {
                    debug!(analyzer = %session.name(), "Trigger restore failed: {}", e);
                }
            }
            info!(analyzer = %session.name(), "Continuous sweep stopped");
        }
        running.request_stop();
        self.set_state(SweepState::Idle);

        result
    }

    async fn run_continuous<F>(
        &self,
        session: &Mutex<InstrumentSession>,
        config: &SweepConfig,
        running: &RunningFlag,
        on_trace: &mut F,
    ) -> SaResult<u64>
    where
        F: FnMut(DecodedTrace) + Send,
    {
        let timing = {
            let mut session = session.lock().await;
            if !session.is_connected() {
                return Err(SaError::NotConnected(session.name().to_string()));
            }
            let timing = session.timing().clone();
            info!(analyzer = %session.name(), "Continuous sweep started");

            self.set_state(SweepState::Configuring);
            SweepConfigurator::apply(&mut session, config).await;
            session
                .send(&ScpiCommand::ContinuousTrigger(false))
                .await
                .map_err(sweep_failure)?;
            sleep(timing.trigger_off_settle).await;
            session
                .set_timeout(timing.continuous_timeout)
                .map_err(sweep_failure)?;
            timing
        };

        let mut completed = 0u64;
        while running.is_running() {
            let mut guard = session.lock().await;
            if !guard.is_connected() {
                debug!(analyzer = %guard.name(), "Session closed, leaving continuous loop");
                break;
            }

            match self.run_iteration(&mut guard, config, &timing).await {
                Ok(decoded) => {
                    drop(guard);
                    completed += 1;
                    on_trace(decoded);
                }
                Err(e) => {
                    error!(analyzer = %guard.name(), "Continuous sweep iteration failed: {}", e);
                    drop(guard);
                    sleep(timing.error_backoff).await;
                    return Err(sweep_failure(e));
                }
            }
        }
        Ok(completed)
    }

    async fn run_iteration(
        &self,
        session: &mut InstrumentSession,
        config: &SweepConfig,
        timing: &TimingConfig,
    ) -> SaResult<DecodedTrace> {
        self.set_state(SweepState::Sweeping);
        session.send(&ScpiCommand::Initiate).await?;
        let duration = sweep_duration(session, timing, timing.continuous_sweep_time_delay).await;
        sleep(post_trigger_wait(
            duration,
            timing.continuous_sweep_margin,
            timing.min_sweep_wait,
        ))
        .await;

        self.set_state(SweepState::Reading);
        read_trace(session, config, timing).await
    }
}

/// Asks the analyzer for the sweep duration; any failure yields the default.
async fn sweep_duration(
    session: &mut InstrumentSession,
    timing: &TimingConfig,
    delay: Duration,
) -> Duration {
    match session.query_with_delay(&ScpiCommand::SweepTime, delay).await {
        Ok(text) => match parse_sweep_time(&text, timing.max_sweep_time) {
            Some(duration) => duration,
            None => {
                warn!(
                    analyzer = %session.name(),
                    "Unusable sweep time '{}', assuming {:?}", text, timing.default_sweep_time
                );
                timing.default_sweep_time
            }
        },
        Err(e) => {
            warn!(analyzer = %session.name(), "Sweep time query failed, assuming {:?}: {}", timing.default_sweep_time, e);
            timing.default_sweep_time
        }
    }
}

/// Reads back the instrument's actual axis, then fetches and decodes TRACE1.
async fn read_trace(
    session: &mut InstrumentSession,
    config: &SweepConfig,
    timing: &TimingConfig,
) -> SaResult<DecodedTrace> {
    let points = session.query(&ScpiCommand::SweepPointsQuery).await?;
    let declared = parse_readback(&points, f64::from(config.points().get()), "points");
    let start = session.query(&ScpiCommand::FrequencyStartQuery).await?;
    let start_hz = parse_readback(&start, config.start_hz(), "start frequency");
    let stop = session.query(&ScpiCommand::FrequencyStopQuery).await?;
    let stop_hz = parse_readback(&stop, config.stop_hz(), "stop frequency");

    session.send(&ScpiCommand::TraceFormat(TraceFormat::Ascii)).await?;
    sleep(timing.readback_delay).await;
    let raw = session
        .query_with_delay(&ScpiCommand::TraceData(TraceId::Trace1), timing.trace_delay)
        .await?;

    let declared = declared.round().max(0.0) as usize;
    decode(&raw, declared, start_hz, stop_hz).map_err(SaError::sweep)
}

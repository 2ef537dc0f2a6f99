//! Simulated spectrum analyzer
//!
//! Provides an in-process analyzer that speaks the same SCPI subset as the
//! real hardware, for tests and for running the CLI without instruments.
//! It provides:
//! - Front-panel state driven by the setter commands
//! - Read-back queries answering from that state
//! - A seeded noise trace with one tone, returned as a definite-length block
//! - Controllable failure injection (per command prefix, on open)
//! - Command and timeout logging for test verification
//!
//! The simulated analyzer never sleeps; timing belongs to the session and
//! the sweep engine.

use crate::traits::{InstrumentTransport, TransportFactory};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const NOISE_FLOOR_DBM: f64 = -85.0;
const TONE_LEVEL_DBM: f64 = -35.0;

#[derive(Debug)]
struct SimState {
    identity: String,
    start_hz: f64,
    stop_hz: f64,
    points: u32,
    rbw_hz: Option<f64>,
    vbw_hz: f64,
    detector: String,
    trace_format: String,
    continuous: bool,
    sweep_time_s: f64,
    initiations: u64,
    pending: VecDeque<String>,
    overrides: HashMap<String, String>,
    commands: Vec<String>,
    failing_prefixes: Vec<String>,
    fail_open: bool,
    opened: Vec<String>,
    closes: u32,
    timeouts: Vec<Duration>,
    rng: StdRng,
}

impl SimState {
    fn new(identity: String, seed: u64) -> Self {
        Self {
            identity,
            start_hz: 0.0,
            stop_hz: 3.0e9,
            points: 3001,
            rbw_hz: Some(1.0e6),
            vbw_hz: 1.0e6,
            detector: "POS".to_string(),
            trace_format: "ASCii".to_string(),
            continuous: true,
            sweep_time_s: 0.5,
            initiations: 0,
            pending: VecDeque::new(),
            overrides: HashMap::new(),
            commands: Vec::new(),
            failing_prefixes: Vec::new(),
            fail_open: false,
            opened: Vec::new(),
            closes: 0,
            timeouts: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn handle(&mut self, command: &str) {
        if let Some(response) = self.overrides.get(command) {
            self.pending.push_back(response.clone());
            return;
        }

        let (header, argument) = match command.split_once(' ') {
            Some((header, argument)) => (header, Some(argument.trim())),
            None => (command, None),
        };
        let value = argument.and_then(|a| a.parse::<f64>().ok());

        match (header, argument) {
            ("*IDN?", None) => self.pending.push_back(self.identity.clone()),
            ("*OPC?", None) => self.pending.push_back("1".to_string()),
            (":FREQ:STAR?", None) => self.pending.push_back(format!("{:.6e}", self.start_hz)),
            (":FREQ:STOP?", None) => self.pending.push_back(format!("{:.6e}", self.stop_hz)),
            (":SWE:POIN?", None) => self.pending.push_back(self.points.to_string()),
            (":SWE:TIME?", None) => self.pending.push_back(format!("{:.6e}", self.sweep_time_s)),
            (":TRAC:DATA?", Some(_)) => {
                let block = self.trace_block();
                self.pending.push_back(block);
            }
            (":FREQ:STAR", Some(_)) => {
                if let Some(hz) = value {
                    self.start_hz = hz;
                }
            }
            (":FREQ:STOP", Some(_)) => {
                if let Some(hz) = value {
                    self.stop_hz = hz;
                }
            }
            (":FREQ:CENT", Some(_)) => {
                if let Some(center) = value {
                    let half_span = (self.stop_hz - self.start_hz) / 2.0;
                    self.start_hz = center - half_span;
                    self.stop_hz = center + half_span;
                }
            }
            (":FREQ:SPAN", Some(_)) => {
                if let Some(span) = value {
                    let center = (self.start_hz + self.stop_hz) / 2.0;
                    self.start_hz = center - span / 2.0;
                    self.stop_hz = center + span / 2.0;
                }
            }
            (":SWE:POIN", Some(n)) => {
                if let Ok(points) = n.parse::<u32>() {
                    self.points = points;
                }
            }
            (":BAND:RES:AUTO", Some(state)) => {
                if state.eq_ignore_ascii_case("ON") {
                    self.rbw_hz = None;
                }
            }
            (":BAND:RES", Some(_)) => {
                if value.is_some() {
                    self.rbw_hz = value;
                }
            }
            (":BAND:VID", Some(_)) => {
                if let Some(hz) = value {
                    self.vbw_hz = hz;
                }
            }
            (":DET", Some(mode)) => self.detector = mode.to_string(),
            (":FORM:TRAC:DATA", Some(format)) => self.trace_format = format.to_string(),
            (":INIT:CONT", Some(state)) => self.continuous = state.eq_ignore_ascii_case("ON"),
            (":INIT", None) => self.initiations += 1,
            _ => debug!("Simulated analyzer ignoring '{}'", command),
        }
    }

    /// Noise floor plus one tone a quarter of the way into the span.
    fn trace_block(&mut self) -> String {
        let count = self.points.max(1) as usize;
        let span = self.stop_hz - self.start_hz;
        let tone_hz = self.start_hz + span / 4.0;
        let width = (span / 200.0).max(1.0);
        let step = if count > 1 { span / (count - 1) as f64 } else { 0.0 };

        let payload = (0..count)
            .map(|i| {
                let freq = self.start_hz + step * i as f64;
                let offset = (freq - tone_hz) / width;
                let tone = (TONE_LEVEL_DBM - NOISE_FLOOR_DBM) * (-0.5 * offset * offset).exp();
                let noise: f64 = self.rng.gen_range(-2.0..2.0);
                format!("{:.3}", NOISE_FLOOR_DBM + tone + noise)
            })
            .collect::<Vec<_>>()
            .join(",");

        format!("#9{:09}{}", payload.len(), payload)
    }
}

/// Shared handle to one simulated analyzer.
///
/// Clones share state, so a test can keep a handle while the session owns
/// the transport.
///
/// # Example
///
/// ```
/// use dual_sa::hardware::SimulatedAnalyzer;
///
/// let analyzer = SimulatedAnalyzer::new("SIM-1");
/// analyzer.set_sweep_time(2.0);
/// assert!(analyzer.commands().is_empty());
/// ```
#[derive(Clone)]
pub struct SimulatedAnalyzer {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAnalyzer {
    fn default() -> Self {
        Self::new("SIM000001")
    }
}

impl SimulatedAnalyzer {
    /// Creates an analyzer identifying with the given serial number.
    pub fn new(serial: &str) -> Self {
        let seed = serial.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        Self {
            state: Arc::new(Mutex::new(SimState::new(
                format!("Simulated,SA3000,{},1.0.0", serial),
                seed,
            ))),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The `*IDN?` answer.
    pub fn identity(&self) -> String {
        self.state().identity.clone()
    }

    /// Every command written so far, in order, including failed ones.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of writes exactly equal to `command`.
    pub fn count(&self, command: &str) -> usize {
        self.state().commands.iter().filter(|c| *c == command).count()
    }

    /// Clear the command log.
    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Number of `:INIT` triggers received.
    pub fn initiations(&self) -> u64 {
        self.state().initiations
    }

    /// Fail every write starting with `prefix` until cleared.
    pub fn fail_on(&self, prefix: &str) {
        self.state().failing_prefixes.push(prefix.to_string());
    }

    /// Remove all injected write failures.
    pub fn clear_failures(&self) {
        self.state().failing_prefixes.clear();
    }

    /// Make the next opens fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Answer `query` with `response` instead of the simulated value.
    pub fn set_response(&self, query: &str, response: &str) {
        self.state()
            .overrides
            .insert(query.to_string(), response.to_string());
    }

    /// Reported sweep duration in seconds.
    pub fn set_sweep_time(&self, seconds: f64) {
        self.state().sweep_time_s = seconds;
    }

    /// Whether the trigger is in continuous mode.
    pub fn is_continuous(&self) -> bool {
        self.state().continuous
    }

    /// Current `(start, stop)` in hertz.
    pub fn frequency_range(&self) -> (f64, f64) {
        let state = self.state();
        (state.start_hz, state.stop_hz)
    }

    /// Current sweep point count.
    pub fn points(&self) -> u32 {
        self.state().points
    }

    /// Current resolution bandwidth, `None` when automatic.
    pub fn resolution_bw(&self) -> Option<f64> {
        self.state().rbw_hz
    }

    /// Current video bandwidth.
    pub fn video_bw(&self) -> f64 {
        self.state().vbw_hz
    }

    /// Every timeout value set on transports to this analyzer, in order.
    pub fn timeout_history(&self) -> Vec<Duration> {
        self.state().timeouts.clone()
    }

    /// Addresses of successful opens.
    pub fn opened(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    /// Number of transport closes.
    pub fn close_count(&self) -> u32 {
        self.state().closes
    }
}

/// Transport attached to a [`SimulatedAnalyzer`].
pub struct MockTransport {
    analyzer: SimulatedAnalyzer,
    address: String,
    timeout: Duration,
    closed: bool,
}

#[async_trait]
impl InstrumentTransport for MockTransport {
    async fn write(&mut self, text: &str) -> Result<()> {
        if self.closed {
            bail!("Mock transport to {} is closed", self.address);
        }
        let mut state = self.analyzer.state();
        state.commands.push(text.to_string());
        if state.failing_prefixes.iter().any(|p| text.starts_with(p.as_str())) {
            bail!("Injected failure writing '{}'", text);
        }
        state.handle(text);
        Ok(())
    }

    async fn read(&mut self) -> Result<String> {
        if self.closed {
            bail!("Mock transport to {} is closed", self.address);
        }
        self.analyzer
            .state()
            .pending
            .pop_front()
            .ok_or_else(|| anyhow!("Read timed out after {:?}: no response pending", self.timeout))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.analyzer.state();
            state.closes += 1;
            state.pending.clear();
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.analyzer.state().timeouts.push(timeout);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock {}", self.address)
    }
}

/// Opens [`MockTransport`]s onto one simulated analyzer.
#[derive(Clone)]
pub struct MockTransportFactory {
    analyzer: SimulatedAnalyzer,
    timeout: Duration,
}

impl MockTransportFactory {
    /// Factory for `analyzer` with the default 120 s timeout.
    pub fn new(analyzer: SimulatedAnalyzer) -> Self {
        Self {
            analyzer,
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the initial timeout of opened transports.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The analyzer behind this factory.
    pub fn analyzer(&self) -> &SimulatedAnalyzer {
        &self.analyzer
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn open(&self, address: &str) -> Result<Box<dyn InstrumentTransport>> {
        {
            let mut state = self.analyzer.state();
            if state.fail_open {
                bail!("Simulated analyzer unreachable at {}", address);
            }
            state.opened.push(address.to_string());
        }
        Ok(Box::new(MockTransport {
            analyzer: self.analyzer.clone(),
            address: address.to_string(),
            timeout: self.timeout,
            closed: false,
        }))
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

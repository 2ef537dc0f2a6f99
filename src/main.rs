//! `dual_sa`: headless front end for the dual spectrum analyzer station.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dual_sa::config::{AppConfig, SweepSettings, DEFAULT_CONFIG_PATH};
use dual_sa::sweep::SweepConfig;
use dual_sa::{DualAnalyzerStation, EventKind, Severity, SweepResult};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dual_sa", version, about = "Dual spectrum analyzer sweep controller")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated analyzers instead of the configured transports
    #[arg(long, global = true)]
    mock: bool,

    /// Print results as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print each analyzer's identity
    Identify(Target),
    /// Run one sweep per analyzer
    Single {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Sweep continuously until stopped (Ctrl-C, --sweeps or --duration)
    Continuous {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        sweep: SweepArgs,
        /// Stop each analyzer after this many sweeps
        #[arg(long)]
        sweeps: Option<u64>,
        /// Stop after this many seconds
        #[arg(long, value_parser = parse_seconds)]
        duration: Option<Duration>,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// sa1, sa2 or both
    #[arg(long, default_value = "both")]
    analyzer: String,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// start_stop or center_span
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    stop: Option<String>,
    #[arg(long)]
    center: Option<String>,
    #[arg(long)]
    span: Option<String>,
    /// Hz, kHz, MHz or GHz
    #[arg(long)]
    unit: Option<String>,
    #[arg(long)]
    points: Option<u32>,
    /// auto, 100, 1k, 10k, 100k, 1M
    #[arg(long)]
    rbw: Option<String>,
    /// 1, 10, 100, 1k, 10k, 100k, 1M, 3M
    #[arg(long)]
    vbw: Option<String>,
}

impl SweepArgs {
    /// Overlays the command-line values on the configured defaults.
    fn apply(&self, mut settings: SweepSettings) -> Result<SweepConfig> {
        if let Some(mode) = &self.mode {
            settings.mode = mode.parse()?;
        }
        if let Some(unit) = &self.unit {
            settings.unit = unit.parse()?;
        }
        for (field, value) in [
            (&mut settings.frequency.start, &self.start),
            (&mut settings.frequency.stop, &self.stop),
            (&mut settings.frequency.center, &self.center),
            (&mut settings.frequency.span, &self.span),
        ] {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        if let Some(points) = self.points {
            settings.points = points.try_into()?;
        }
        if let Some(rbw) = &self.rbw {
            settings.rbw = rbw.parse()?;
        }
        if let Some(vbw) = &self.vbw {
            settings.vbw = vbw.parse()?;
        }
        Ok(settings.to_sweep_config()?)
    }
}

/// Parses a positive number of seconds, e.g. `2.5`.
fn parse_seconds(text: &str) -> Result<Duration, String> {
    let secs: f64 = text
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", text))?;
    if secs <= 0.0 {
        return Err(format!("Duration must be positive, got {}", text));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration '{}': {}", text, e))
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn select_ids(station: &DualAnalyzerStation, selection: &str) -> Result<Vec<String>> {
    let all: Vec<String> = station.analyzers().iter().map(|a| a.id().to_string()).collect();
    if selection.eq_ignore_ascii_case("both") || selection.eq_ignore_ascii_case("all") {
        return Ok(all);
    }
    match all.iter().find(|id| id.eq_ignore_ascii_case(selection)) {
        Some(id) => Ok(vec![id.clone()]),
        None => bail!("Unknown analyzer '{}'. Configured: {}", selection, all.join(", ")),
    }
}

async fn connect_selected(station: &DualAnalyzerStation, ids: &[String]) -> Vec<String> {
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    station
        .connect(&refs)
        .await
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(identity) => {
                info!(analyzer = %id, "Identity: {}", identity);
                Some(id)
            }
            Err(e) => {
                error!(analyzer = %id, "{}", e);
                None
            }
        })
        .collect()
}

fn report(result: &SweepResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    let peak = result
        .amplitudes_dbm
        .iter()
        .zip(&result.frequencies_hz)
        .max_by(|a, b| a.0.total_cmp(b.0));
    match peak {
        Some((level, freq)) => info!(
            analyzer = %result.analyzer,
            "Sweep #{}: {} points, peak {:.2} dBm at {:.6} MHz{}",
            result.sweep_index,
            result.amplitudes_dbm.len(),
            level,
            freq / 1.0e6,
            if result.count_mismatch { " (point count mismatch)" } else { "" }
        ),
        None => warn!(analyzer = %result.analyzer, "Sweep #{} returned no points", result.sweep_index),
    }
    Ok(())
}

fn log_status(analyzer: &str, message: &str, severity: Severity) {
    match severity {
        Severity::Info => info!(analyzer = %analyzer, "{}", message),
        Severity::Warning => warn!(analyzer = %analyzer, "{}", message),
        Severity::Error => error!(analyzer = %analyzer, "{}", message),
    }
}

async fn run_continuous(
    station: &DualAnalyzerStation,
    events: &mut mpsc::UnboundedReceiver<dual_sa::AnalyzerEvent>,
    ids: &[String],
    config: &SweepConfig,
    sweeps: Option<u64>,
    duration: Option<Duration>,
    json: bool,
) -> Result<()> {
    let mut active = HashSet::new();
    for id in ids {
        let Some(analyzer) = station.analyzer(id) else { continue };
        match analyzer.toggle_continuous(config.clone()).await {
            Ok(_) => {
                active.insert(id.clone());
            }
            Err(e) => error!(analyzer = %id, "{}", e),
        }
    }
    if active.is_empty() {
        bail!("No analyzer could start a continuous sweep");
    }

    let stop_all = || {
        for analyzer in station.analyzers() {
            analyzer.stop_continuous();
        }
    };
    let mut deadline = duration.and_then(|d| Instant::now().checked_add(d));
    let mut counts: HashMap<String, u64> = HashMap::new();

    while !active.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event.kind {
                    EventKind::TraceReady(result) => {
                        report(&result, json)?;
                        let count = counts.entry(event.analyzer.clone()).or_default();
                        *count += 1;
                        if sweeps.is_some_and(|limit| *count >= limit) {
                            if let Some(analyzer) = station.analyzer(&event.analyzer) {
                                analyzer.stop_continuous();
                            }
                        }
                    }
                    EventKind::ContinuousChanged { active: false } => {
                        active.remove(&event.analyzer);
                    }
                    EventKind::Status { message, severity } => {
                        log_status(&event.analyzer, &message, severity);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping sweeps");
                stop_all();
            }
            _ = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                info!("Duration elapsed, stopping sweeps");
                deadline = None;
                stop_all();
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_tracing(&config.application.log_level);
    info!("{} starting", config.application.name);

    let mut station = DualAnalyzerStation::from_config(&config, cli.mock)?;
    let mut events = station.take_events().context("Event stream already taken")?;

    let outcome = match &cli.command {
        Command::Identify(target) => {
            let ids = select_ids(&station, &target.analyzer)?;
            let connected = connect_selected(&station, &ids).await;
            if cli.json {
                for id in &connected {
                    if let Some(analyzer) = station.analyzer(id) {
                        let session = analyzer.session();
                        let session = session.lock().await;
                        println!(
                            "{}",
                            serde_json::json!({ "analyzer": id, "identity": session.identity() })
                        );
                    }
                }
            }
            if connected.len() == ids.len() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} of {} analyzers failed to connect", ids.len() - connected.len(), ids.len()))
            }
        }
        Command::Single { target, sweep } => {
            let sweep_config = sweep.apply(config.sweep.clone())?;
            let ids = select_ids(&station, &target.analyzer)?;
            let connected = connect_selected(&station, &ids).await;

            let mut handles = Vec::new();
            for id in &connected {
                if let Some(analyzer) = station.analyzer(id) {
                    handles.push((id.clone(), analyzer.start_single(sweep_config.clone())?));
                }
            }
            let mut failures = ids.len() - connected.len();
            for (id, handle) in handles {
                match handle.await {
                    Ok(Ok(result)) => report(&result, cli.json)?,
                    Ok(Err(e)) => {
                        error!(analyzer = %id, "{}", e);
                        failures += 1;
                    }
                    Err(e) => {
                        error!(analyzer = %id, "Sweep task failed: {}", e);
                        failures += 1;
                    }
                }
            }
            if failures == 0 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} analyzer(s) failed", failures))
            }
        }
        Command::Continuous { target, sweep, sweeps, duration } => {
            let sweep_config = sweep.apply(config.sweep.clone())?;
            let ids = select_ids(&station, &target.analyzer)?;
            let connected = connect_selected(&station, &ids).await;
            run_continuous(&station, &mut events, &connected, &sweep_config, *sweeps, *duration, cli.json)
                .await
        }
    };

    station.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("2.5"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_seconds(" 60 "), Ok(Duration::from_secs(60)));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("inf").is_err());
        assert!(parse_seconds("1e300").is_err());
        assert!(parse_seconds("10s").is_err());
    }

    #[test]
    fn test_cli_rejects_negative_duration() {
        assert!(Cli::try_parse_from(["dual_sa", "continuous", "--duration", "-1"]).is_err());
        let cli = Cli::try_parse_from(["dual_sa", "--mock", "continuous", "--duration", "1.5"]).unwrap();
        match cli.command {
            Command::Continuous { duration, .. } => {
                assert_eq!(duration, Some(Duration::from_millis(1500)));
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }
}

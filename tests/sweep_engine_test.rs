//! Sweep engine tests against the simulated analyzer.
//!
//! All tests run on tokio's paused clock, so the sweep timing model (settle
//! delays, post-trigger waits) elapses in virtual time.

use dual_sa::config::TimingConfig;
use dual_sa::hardware::{MockTransportFactory, SimulatedAnalyzer};
use dual_sa::sweep::{ResolutionBandwidth, SweepConfig, SweepEngine, SweepPoints, SweepState, VideoBandwidth};
use dual_sa::{InstrumentSession, SaError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// Helper to open a session on a fresh simulated analyzer.
async fn connected_session(analyzer: &SimulatedAnalyzer) -> InstrumentSession {
    let factory = MockTransportFactory::new(analyzer.clone());
    let mut session = InstrumentSession::new("sa1", TimingConfig::default());
    session
        .connect(&factory, "192.168.60.70")
        .await
        .expect("Simulated analyzer should connect");
    analyzer.clear_commands();
    session
}

fn sweep_config(start_hz: f64, stop_hz: f64, points: u32) -> SweepConfig {
    SweepConfig::new(
        start_hz,
        stop_hz,
        SweepPoints::new(points).unwrap(),
        ResolutionBandwidth::default(),
        VideoBandwidth::default(),
    )
    .unwrap()
}

fn assert_secs(elapsed: Duration, expected: f64) {
    assert!(
        (elapsed.as_secs_f64() - expected).abs() < 0.05,
        "Expected ~{}s, took {:?}",
        expected,
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_sweep_command_sequence() {
    let analyzer = SimulatedAnalyzer::new("A");
    let mut session = connected_session(&analyzer).await;
    let engine = SweepEngine::new();

    let decoded = engine
        .single_sweep(&mut session, &sweep_config(1.0e6, 3.0e6, 101))
        .await
        .unwrap();

    assert_eq!(
        analyzer.commands(),
        vec![
            ":BAND:RES 1000000",
            ":FREQ:STAR 1000000",
            ":FREQ:STOP 3000000",
            ":FREQ:CENT 2000000",
            ":FREQ:SPAN 2000000",
            ":SWE:POIN 101",
            ":BAND:VID 1000000",
            ":DET POS",
            ":FORM:TRAC:DATA ASCii",
            ":INIT:CONT OFF",
            ":INIT",
            ":SWE:TIME?",
            ":SWE:POIN?",
            ":FREQ:STAR?",
            ":FREQ:STOP?",
            ":FORM:TRAC:DATA ASCii",
            ":TRAC:DATA? TRACE1",
        ]
    );

    let trace = decoded.trace;
    assert_eq!(trace.len(), 101);
    assert_eq!(trace.frequencies_hz()[0], 1.0e6);
    assert_eq!(trace.frequencies_hz()[100], 3.0e6);
    assert!(!decoded.count_mismatch);
    assert_eq!(engine.state(), SweepState::Idle);
    assert!(!analyzer.is_continuous());
}

#[tokio::test(start_paused = true)]
async fn test_single_sweep_waits_for_reported_duration() {
    let analyzer = SimulatedAnalyzer::default();
    let mut session = connected_session(&analyzer).await;
    let engine = SweepEngine::new();
    let config = sweep_config(0.0, 1.0e9, 101);

    // 0.5 s sweep: the 1.5 s floor applies
    let started = Instant::now();
    engine.single_sweep(&mut session, &config).await.unwrap();
    assert_secs(started.elapsed(), 3.75);

    // 10 s sweep: 1.1 x duration
    analyzer.set_sweep_time(10.0);
    let started = Instant::now();
    engine.single_sweep(&mut session, &config).await.unwrap();
    assert_secs(started.elapsed(), 1.15 + 11.0 + 1.1);
}

#[tokio::test(start_paused = true)]
async fn test_unparsable_sweep_time_falls_back() {
    let analyzer = SimulatedAnalyzer::default();
    analyzer.set_response(":SWE:TIME?", "not-a-number");
    let mut session = connected_session(&analyzer).await;

    let started = Instant::now();
    let result = SweepEngine::new()
        .single_sweep(&mut session, &sweep_config(0.0, 1.0e9, 201))
        .await;

    tokio_test::assert_ok!(&result);
    // 1.5 s default x 1.1 margin
    assert_secs(started.elapsed(), 1.15 + 1.65 + 1.1);
}

#[tokio::test(start_paused = true)]
async fn test_trace_read_failure_is_sweep_error() {
    let analyzer = SimulatedAnalyzer::default();
    let mut session = connected_session(&analyzer).await;
    analyzer.fail_on(":TRAC:DATA?");

    let result = SweepEngine::new()
        .single_sweep(&mut session, &sweep_config(0.0, 1.0e9, 101))
        .await;
    match result {
        Err(SaError::Sweep(message)) => assert!(message.contains("TRAC:DATA")),
        other => panic!("Expected sweep error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_sweep_requires_connection() {
    let mut session = InstrumentSession::new("sa2", TimingConfig::default());
    let result = SweepEngine::new()
        .single_sweep(&mut session, &sweep_config(0.0, 1.0e9, 101))
        .await;
    assert!(matches!(result, Err(SaError::NotConnected(_))));
}

#[tokio::test(start_paused = true)]
async fn test_unparsable_readback_uses_configured_axis() {
    let analyzer = SimulatedAnalyzer::default();
    analyzer.set_response(":FREQ:STAR?", "??");
    let mut session = connected_session(&analyzer).await;

    let decoded = SweepEngine::new()
        .single_sweep(&mut session, &sweep_config(5.0e6, 6.0e6, 101))
        .await
        .unwrap();
    assert_eq!(decoded.trace.frequencies_hz()[0], 5.0e6);
}

#[tokio::test(start_paused = true)]
async fn test_point_count_mismatch_is_not_fatal() {
    let analyzer = SimulatedAnalyzer::default();
    analyzer.set_response(":SWE:POIN?", "401");
    let mut session = connected_session(&analyzer).await;

    let decoded = SweepEngine::new()
        .single_sweep(&mut session, &sweep_config(0.0, 1.0e9, 101))
        .await
        .unwrap();
    assert!(decoded.count_mismatch);
    assert_eq!(decoded.declared_points, 401);
    assert_eq!(decoded.trace.len(), 101);
    assert_eq!(decoded.trace.frequencies_hz().len(), 101);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_stop_allows_at_most_one_more_sweep() {
    let analyzer = SimulatedAnalyzer::default();
    let session = connected_session(&analyzer).await;
    let running = session.running_flag();
    let session = Arc::new(Mutex::new(session));
    let engine = Arc::new(SweepEngine::new());
    assert!(running.try_start());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = {
        let engine = Arc::clone(&engine);
        let session = Arc::clone(&session);
        let running = running.clone();
        tokio::spawn(async move {
            engine
                .continuous_sweep(session, &sweep_config(0.0, 1.0e9, 101), running, move |decoded| {
                    let _ = tx.send(decoded.trace.len());
                })
                .await
        })
    };

    assert_eq!(rx.recv().await, Some(101));
    running.request_stop();

    let completed = task.await.unwrap().unwrap();
    assert!(
        (1..=2).contains(&completed),
        "Expected at most one sweep after the stop request, got {} total",
        completed
    );
    assert!(!running.is_running());
    assert!(!analyzer.is_continuous());
    assert_eq!(analyzer.commands().last().map(String::as_str), Some(":INIT:CONT OFF"));
    assert_eq!(engine.state(), SweepState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_loop_restores_timeout() {
    let analyzer = SimulatedAnalyzer::default();
    let session = connected_session(&analyzer).await;
    let running = session.running_flag();
    let session = Arc::new(Mutex::new(session));
    assert!(running.try_start());

    let stopper = running.clone();
    let completed = SweepEngine::new()
        .continuous_sweep(Arc::clone(&session), &sweep_config(0.0, 1.0e9, 101), running, |_| {
            stopper.request_stop();
        })
        .await
        .unwrap();

    assert_eq!(completed, 1);
    assert_eq!(
        analyzer.timeout_history(),
        vec![
            Duration::from_secs(120),
            Duration::from_secs(30),
            Duration::from_secs(120)
        ]
    );
    assert_eq!(session.lock().await.timeout(), Some(Duration::from_secs(120)));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_iteration_failure_ends_loop() {
    let analyzer = SimulatedAnalyzer::default();
    let session = connected_session(&analyzer).await;
    let running = session.running_flag();
    let session = Arc::new(Mutex::new(session));
    assert!(running.try_start());
    analyzer.fail_on(":TRAC:DATA?");

    let result = SweepEngine::new()
        .continuous_sweep(Arc::clone(&session), &sweep_config(0.0, 1.0e9, 101), running.clone(), |_| {
            panic!("No trace should be delivered");
        })
        .await;

    tokio_test::assert_err!(&result);
    assert!(matches!(result, Err(SaError::Sweep(_))));
    assert!(!running.is_running());
    assert_eq!(analyzer.initiations(), 1, "The loop must not resume after a failure");
    assert!(!analyzer.is_continuous());
    assert_eq!(session.lock().await.timeout(), Some(Duration::from_secs(120)));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_loop_exits_when_disconnected() {
    let analyzer = SimulatedAnalyzer::default();
    let session = connected_session(&analyzer).await;
    let running = session.running_flag();
    let session = Arc::new(Mutex::new(session));
    assert!(running.try_start());

    let engine = SweepEngine::new();
    let config = sweep_config(0.0, 1.0e9, 101);
    let sweeping = engine.continuous_sweep(
        Arc::clone(&session),
        &config,
        running.clone(),
        |_| {},
    );
    let disconnect = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        session.lock().await.disconnect().await
    };

    let (completed, was_connected) = tokio::join!(sweeping, disconnect);
    assert!(was_connected);
    assert!(completed.unwrap() >= 1);
    assert!(!running.is_running());
    assert!(!session.lock().await.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_sweep_time_falls_back() {
    let analyzer = SimulatedAnalyzer::default();
    analyzer.set_response(":SWE:TIME?", "1e300");
    let mut session = connected_session(&analyzer).await;

    let started = Instant::now();
    let result = SweepEngine::new()
        .single_sweep(&mut session, &sweep_config(0.0, 1.0e9, 101))
        .await;

    tokio_test::assert_ok!(&result);
    assert_secs(started.elapsed(), 1.15 + 1.65 + 1.1);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_loop_survives_out_of_range_sweep_time() {
    let analyzer = SimulatedAnalyzer::default();
    analyzer.set_response(":SWE:TIME?", "1e300");
    let session = connected_session(&analyzer).await;
    let running = session.running_flag();
    let session = Arc::new(Mutex::new(session));
    assert!(running.try_start());

    let task = {
        let session = Arc::clone(&session);
        let running = running.clone();
        let stopper = running.clone();
        tokio::spawn(async move {
            SweepEngine::new()
                .continuous_sweep(session, &sweep_config(0.0, 1.0e9, 101), running, move |_| {
                    stopper.request_stop();
                })
                .await
        })
    };

    let started = Instant::now();
    let completed = task.await.expect("Continuous task must not panic").unwrap();
    assert_eq!(completed, 1);
    // Setup 1.2 s, then 0.2 + 1.5 s x 1.2 + read-back 1.1 s
    assert_secs(started.elapsed(), 1.2 + 0.2 + 1.8 + 1.1);

    assert!(!running.is_running());
    assert_eq!(analyzer.commands().last().map(String::as_str), Some(":INIT:CONT OFF"));
    assert_eq!(session.lock().await.timeout(), Some(Duration::from_secs(120)));
}

use super::*;
use crate::child::ChildState;
use crate::config::SupervisorSettings;
use crate::coordinator::CoordinatorState;
use crate::error::SupervisorError;
use crate::events::SupervisorEvent;
use crate::report::{
    ServiceOutcome, SupervisorReport, EXIT_FATAL_CHILD, EXIT_FORCED_KILL, EXIT_LAUNCH_FAILURE,
    EXIT_OK,
};
use crate::spec::{ReadinessProbe, ServiceSpec};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

const POLITE: &str = "trap 'exit 0' TERM; while true; do sleep 0.1; done";
const SLOW_TO_STOP: &str = "trap 'sleep 0.5; exit 0' TERM; while true; do sleep 0.1; done";
const STUBBORN: &str = "trap '' TERM; while true; do sleep 0.1; done";

fn test_settings(grace_period_ms: u64) -> SupervisorSettings {
    SupervisorSettings {
        grace_period_ms,
        check_ports: false,
        forward_output: false,
        ..SupervisorSettings::default()
    }
}

/// Probes that stay unresolved for longer than any test should take
fn slow_readiness_settings(grace_period_ms: u64) -> SupervisorSettings {
    SupervisorSettings {
        readiness_timeout_ms: 10_000,
        readiness_poll_interval_ms: 50,
        ..test_settings(grace_period_ms)
    }
}

fn shell(name: &str, port: u16, script: &str) -> ServiceSpec {
    ServiceSpec::new(name, port, &["sh", "-c", script])
}

async fn run_to_end(supervisor: &mut Supervisor) -> SupervisorReport {
    timeout(Duration::from_secs(20), supervisor.run())
        .await
        .expect("supervisor did not stop in time")
        .expect("supervisor failed")
}

fn interrupt_after(supervisor: &Supervisor, delay: Duration, times: usize) {
    let handle = supervisor.shutdown_handle();
    tokio::spawn(async move {
        sleep(delay).await;
        for _ in 0..times {
            handle.interrupt();
        }
    });
}

fn transitions(
    events: &mut broadcast::Receiver<SupervisorEvent>,
) -> Vec<(SupervisorState, SupervisorState)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::StateChanged { from, to } = event {
            seen.push((from, to));
        }
    }
    seen
}

fn outcome<'a>(report: &'a SupervisorReport, name: &str) -> &'a ServiceOutcome {
    &report
        .services
        .iter()
        .find(|service| service.name == name)
        .unwrap()
        .outcome
}

#[test]
fn test_state_transitions() {
    use SupervisorState::*;

    assert!(Idle.can_transition_to(Launching));
    assert!(Launching.can_transition_to(Running));
    assert!(Running.can_transition_to(ShuttingDown));
    assert!(ShuttingDown.can_transition_to(Stopped));

    assert!(!Idle.can_transition_to(Running));
    assert!(!Running.can_transition_to(Launching));
    assert!(!Stopped.can_transition_to(Idle));
    assert!(!ShuttingDown.can_transition_to(Running));
}

#[test]
fn test_duplicate_table_rejected_before_launch() {
    let specs = vec![shell("a", 19100, POLITE), shell("b", 19100, POLITE)];

    match Supervisor::with_specs(specs, test_settings(1000)) {
        Err(err @ SupervisorError::Spec(_)) => assert!(err.is_config_error()),
        Err(other) => panic!("Unexpected error: {}", other),
        Ok(_) => panic!("duplicate ports must be rejected"),
    }
}

#[tokio::test]
async fn test_fatal_exit_triggers_single_broadcast() {
    let specs = vec![
        shell("web", 19201, POLITE),
        shell("crash", 19202, "sleep 0.3; exit 1"),
        shell("api", 19203, POLITE),
    ];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(3000)).unwrap();
    let mut events = supervisor.subscribe();

    let report = run_to_end(&mut supervisor).await;

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(report.termination_broadcasts, 1);
    assert_eq!(
        outcome(&report, "crash"),
        &ServiceOutcome::Crashed {
            status: "code 1".to_string()
        }
    );
    assert!(matches!(
        outcome(&report, "web"),
        ServiceOutcome::StoppedCleanly { .. }
    ));
    assert!(matches!(
        outcome(&report, "api"),
        ServiceOutcome::StoppedCleanly { .. }
    ));
    assert_eq!(report.exit_code(), EXIT_FATAL_CHILD);
    assert!(report
        .shutdown_reason
        .as_deref()
        .unwrap()
        .starts_with("crash exited unexpectedly"));

    let mut broadcast_targets = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::TerminationBroadcast { targets } = event {
            broadcast_targets.push(targets);
        }
    }
    assert_eq!(
        broadcast_targets,
        vec![vec!["web".to_string(), "api".to_string()]]
    );
}

#[tokio::test]
async fn test_second_interrupt_is_ignored() {
    let specs = vec![
        shell("one", 19301, SLOW_TO_STOP),
        shell("two", 19302, SLOW_TO_STOP),
    ];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(5000)).unwrap();
    interrupt_after(&supervisor, Duration::from_millis(300), 2);

    let report = run_to_end(&mut supervisor).await;

    assert_eq!(report.termination_broadcasts, 1);
    assert_eq!(report.ignored_triggers, 1);
    assert_eq!(report.shutdown_reason.as_deref(), Some("signal SIGINT"));
    assert_eq!(report.exit_code(), EXIT_OK);
    assert!(supervisor.coordinator().escalated().is_empty());
}

#[tokio::test]
async fn test_stubborn_child_is_force_killed() {
    let specs = vec![
        shell("polite", 19401, POLITE),
        shell("stubborn", 19402, STUBBORN),
        shell("quiet", 19403, POLITE),
    ];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(400)).unwrap();
    interrupt_after(&supervisor, Duration::from_millis(300), 1);

    let report = run_to_end(&mut supervisor).await;

    assert_eq!(outcome(&report, "stubborn"), &ServiceOutcome::ForcedKill);
    assert!(matches!(
        outcome(&report, "polite"),
        ServiceOutcome::StoppedCleanly { .. }
    ));
    assert!(matches!(
        outcome(&report, "quiet"),
        ServiceOutcome::StoppedCleanly { .. }
    ));
    assert_eq!(
        supervisor.coordinator().escalated(),
        ["stubborn".to_string()]
    );
    assert_eq!(supervisor.coordinator().state(), CoordinatorState::Done);
    assert_eq!(report.exit_code(), EXIT_FORCED_KILL);
}

#[tokio::test]
async fn test_launch_failure_does_not_stop_others() {
    let mut specs: Vec<ServiceSpec> = (0..5)
        .map(|i| shell(&format!("svc{}", i), 19501 + i, POLITE))
        .collect();
    specs.insert(
        3,
        ServiceSpec::new("broken", 19510, &["/nonexistent/stackvisor-entry-point"]),
    );
    let mut supervisor = Supervisor::with_specs(specs, test_settings(3000)).unwrap();

    supervisor.launch().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(supervisor.children().len(), 5);
    assert_eq!(supervisor.launch_failures().len(), 1);
    assert_eq!(supervisor.launch_failures()[0].service, "broken");
    assert!(supervisor
        .children()
        .handles()
        .all(|handle| handle.state == ChildState::Running && handle.pid > 0));

    interrupt_after(&supervisor, Duration::from_millis(200), 1);
    let report = run_to_end(&mut supervisor).await;

    assert_eq!(report.services.len(), 6);
    assert_eq!(report.launch_failures().count(), 1);
    assert_eq!(report.services[3].name, "broken");
    assert_eq!(report.exit_code(), EXIT_LAUNCH_FAILURE);
}

#[tokio::test]
async fn test_clean_exit_before_shutdown_is_fatal() {
    let specs = vec![
        shell("oneshot", 19601, "exit 0"),
        shell("server", 19602, POLITE),
    ];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(3000)).unwrap();

    let report = run_to_end(&mut supervisor).await;

    assert_eq!(
        outcome(&report, "oneshot"),
        &ServiceOutcome::Crashed {
            status: "code 0".to_string()
        }
    );
    assert_eq!(report.exit_code(), EXIT_FATAL_CHILD);
}

#[tokio::test]
async fn test_nothing_launched_stops_immediately() {
    let specs = vec![ServiceSpec::new(
        "broken",
        19701,
        &["/nonexistent/stackvisor-entry-point"],
    )];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(3000)).unwrap();

    let report = run_to_end(&mut supervisor).await;

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(
        report.shutdown_reason.as_deref(),
        Some("no service could be launched")
    );
    assert_eq!(report.exit_code(), EXIT_LAUNCH_FAILURE);
}

#[tokio::test]
async fn test_shutdown_handle_outlives_supervisor() {
    let supervisor = Supervisor::with_specs(Vec::new(), test_settings(1000)).unwrap();
    let handle = supervisor.shutdown_handle();

    assert!(handle.request(ShutdownReason::UserRequest));
    drop(supervisor);
    assert!(!handle.interrupt());
}

#[tokio::test]
async fn test_crash_during_launch_stops_everything() {
    use SupervisorState::*;

    let specs = vec![
        shell("crash", 19901, "sleep 0.1; exit 1"),
        shell("slow", 19902, POLITE).with_readiness(ReadinessProbe::TcpConnect),
    ];
    let mut supervisor = Supervisor::with_specs(specs, slow_readiness_settings(3000)).unwrap();
    let mut events = supervisor.subscribe();

    let started = Instant::now();
    let report = run_to_end(&mut supervisor).await;

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "shutdown waited for the readiness probe: {:?}",
        started.elapsed()
    );
    assert!(report
        .shutdown_reason
        .as_deref()
        .unwrap()
        .starts_with("crash exited unexpectedly"));
    assert!(matches!(
        outcome(&report, "slow"),
        ServiceOutcome::StoppedCleanly { .. }
    ));
    assert_eq!(report.exit_code(), EXIT_FATAL_CHILD);
    assert_eq!(
        transitions(&mut events),
        vec![(Idle, Launching), (Launching, ShuttingDown), (ShuttingDown, Stopped)]
    );
}

#[tokio::test]
async fn test_interrupt_during_launch() {
    use SupervisorState::*;

    let specs = vec![shell("slow", 19911, POLITE).with_readiness(ReadinessProbe::TcpConnect)];
    let mut supervisor = Supervisor::with_specs(specs, slow_readiness_settings(3000)).unwrap();
    let mut events = supervisor.subscribe();
    interrupt_after(&supervisor, Duration::from_millis(100), 1);

    let started = Instant::now();
    let report = run_to_end(&mut supervisor).await;

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "interrupt waited for the readiness probe: {:?}",
        started.elapsed()
    );
    assert_eq!(report.shutdown_reason.as_deref(), Some("signal SIGINT"));
    assert_eq!(report.termination_broadcasts, 1);
    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(
        transitions(&mut events),
        vec![(Idle, Launching), (Launching, ShuttingDown), (ShuttingDown, Stopped)]
    );
}

#[tokio::test]
async fn test_shutdown_request_before_running() {
    let specs = vec![
        shell("plain", 19921, POLITE),
        shell("delayed", 19922, POLITE).with_readiness(ReadinessProbe::Delay(Duration::from_secs(5))),
    ];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(3000)).unwrap();
    assert!(supervisor
        .shutdown_handle()
        .request(ShutdownReason::UserRequest));

    timeout(Duration::from_secs(2), supervisor.launch())
        .await
        .expect("launch waited for the readiness probe")
        .unwrap();
    assert_eq!(supervisor.state(), SupervisorState::ShuttingDown);
    assert_eq!(supervisor.children().len(), 2);

    let report = run_to_end(&mut supervisor).await;

    assert_eq!(report.shutdown_reason.as_deref(), Some("shutdown requested"));
    assert_eq!(report.exit_code(), EXIT_OK);
}

#[tokio::test]
async fn test_delay_readiness_settles_before_running() {
    let specs = vec![
        shell("plain", 19931, POLITE),
        shell("delayed", 19932, POLITE).with_readiness(ReadinessProbe::Delay(Duration::from_millis(200))),
    ];
    let mut supervisor = Supervisor::with_specs(specs, test_settings(3000)).unwrap();

    let started = Instant::now();
    supervisor.launch().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(
        supervisor.children().get("delayed").unwrap().state,
        ChildState::Ready
    );
    assert_eq!(
        supervisor.children().get("plain").unwrap().state,
        ChildState::Running
    );

    interrupt_after(&supervisor, Duration::from_millis(50), 1);
    let report = run_to_end(&mut supervisor).await;
    assert_eq!(report.exit_code(), EXIT_OK);
}

//! Start, readiness and error collection.

use std::fs;
use std::time::Duration;

use command_runner::supervisor::{
    GateState, ReleaseReason, SupervisorError, SupervisorState, WaitPolicy,
};
use command_runner::workdir::InputSource;
use tempfile::TempDir;

use super::{builder, recorder};

#[tokio::test]
async fn echo_and_exit_leaves_files_readable() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = builder("cat in.txt > a.txt; echo done")
        .input("in.txt", InputSource::text("hello"))
        .working_dir(dir.path())
        .wait_policy(WaitPolicy::Exit)
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.returncode(), Some(0));

    assert_eq!(supervisor.stop().await.unwrap(), Some(0));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(
        fs::read_to_string(supervisor.files("a.txt")).unwrap(),
        "hello"
    );
    assert!(supervisor.errors().is_empty());
    assert_eq!(supervisor.report().lines, 1);
}

#[tokio::test]
async fn owned_working_dir_is_removed_on_stop() {
    let mut supervisor = builder("true")
        .wait_policy(WaitPolicy::Exit)
        .build()
        .unwrap();
    let dir = supervisor.working_dir().to_path_buf();

    supervisor.start().await.unwrap();
    assert!(dir.is_dir());
    supervisor.stop().await.unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn readiness_fires_once_and_stays_ready() {
    let mut supervisor = builder("echo listening on 4000; echo listening on 5000; sleep 30")
        .wait_policy(WaitPolicy::Ready)
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(
        supervisor.readiness().state(),
        GateState::Ready("4000".to_string())
    );

    supervisor.stop().await.unwrap();
    assert_eq!(
        supervisor.readiness().state(),
        GateState::Ready("4000".to_string())
    );
    assert_eq!(supervisor.report().ready.as_deref(), Some("4000"));
}

#[tokio::test]
async fn stop_request_releases_readiness_wait() {
    let (lines, observer) = recorder();
    let mut supervisor = builder("echo stopping on error; read reply; echo \"got $reply\"")
        .wait_policy(WaitPolicy::Ready)
        .quit_token("quit")
        .observer(observer)
        .build()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), supervisor.start())
        .await
        .expect("start must not hang")
        .unwrap();

    assert!(supervisor.stopped_on_error());
    assert_eq!(
        supervisor.readiness().state(),
        GateState::Released(ReleaseReason::StopRequested)
    );

    // The quit token was sent on the stop request, so the script finishes.
    assert_eq!(supervisor.wait(Some(Duration::from_secs(10))).await, Some(0));
    assert!(lines.lock().unwrap().contains(&"got quit".to_string()));

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn output_ending_before_readiness_releases_wait() {
    let mut supervisor = builder("echo starting; exit 1")
        .wait_policy(WaitPolicy::Ready)
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    assert_eq!(
        supervisor.readiness().state(),
        GateState::Released(ReleaseReason::StreamClosed)
    );
    assert_eq!(supervisor.stop().await.unwrap(), Some(1));
}

#[tokio::test]
async fn block_and_line_errors_are_collected_in_order() {
    let mut supervisor = builder(
        "printf 'Failure:\\n  step one\\n  step two\\nError: bad input\\nall done\\n'",
    )
    .wait_policy(WaitPolicy::Exit)
    .build()
    .unwrap();

    supervisor.start().await.unwrap();
    assert_eq!(
        supervisor.errors(),
        vec![
            "step one\nstep two".to_string(),
            "Error: bad input".to_string()
        ]
    );
    assert!(!supervisor.is_critical());
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn stderr_lines_are_classified() {
    let mut supervisor = builder("echo 'Error: from stderr' >&2")
        .wait_policy(WaitPolicy::Exit)
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.errors(), vec!["Error: from stderr".to_string()]);
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn critical_marker_fails_with_exact_message() {
    let mut supervisor = builder("printf 'Failure:\\n  import big.ttl\\n  out of memory (42 GB)\\n'")
        .wait_policy(WaitPolicy::Exit)
        .build()
        .unwrap();

    let err = supervisor.start().await.unwrap_err();
    match err {
        SupervisorError::Critical { message } => assert_eq!(message, "out of memory (42 GB)"),
        other => panic!("expected critical error, got {other:?}"),
    }
    assert!(supervisor.is_critical());

    // Cleanup still happens, and stop reports the same condition.
    let err = supervisor.stop().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Critical { .. }));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(matches!(
        supervisor.raise_for_errors(),
        Err(SupervisorError::Critical { .. })
    ));
}

#[tokio::test]
async fn critical_preamble_uses_following_line() {
    let mut supervisor = builder("echo CRITICAL; echo 'disk full'")
        .wait_policy(WaitPolicy::Exit)
        .build()
        .unwrap();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Critical { message } if message == "disk full"));
    let _ = supervisor.stop().await;
}

#[tokio::test]
async fn observer_sees_every_line() {
    let (lines, observer) = recorder();
    let mut supervisor = builder("for i in 1 2 3; do echo line $i; done; echo 'Error: x'")
        .wait_policy(WaitPolicy::Exit)
        .observer(observer)
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    supervisor.stop().await.unwrap();

    assert_eq!(
        *lines.lock().unwrap(),
        vec!["line 1", "line 2", "line 3", "Error: x"]
    );
    assert_eq!(supervisor.report().lines, 4);
}

#[tokio::test]
async fn send_line_reaches_process() {
    let (lines, observer) = recorder();
    let mut supervisor = builder("read a; echo \"echo $a\"; read b; echo \"echo $b\"")
        .wait_policy(WaitPolicy::None)
        .observer(observer)
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    assert!(supervisor.send_line("first").await);
    assert!(supervisor.send_line("second").await);
    assert_eq!(supervisor.wait(Some(Duration::from_secs(10))).await, Some(0));
    assert_eq!(*lines.lock().unwrap(), vec!["echo first", "echo second"]);

    supervisor.stop().await.unwrap();
    assert!(!supervisor.send_line("late").await);
}

#[tokio::test]
async fn launch_failure_is_reported() {
    let mut supervisor = command_runner::supervisor::SupervisorBuilder::new()
        .command(command_runner::supervisor::CommandSpec::argv([
            "/nonexistent/binary",
        ]))
        .build()
        .unwrap();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Launch(_)));
    assert_eq!(supervisor.state(), SupervisorState::Staged);
    assert_eq!(supervisor.stop().await.unwrap(), None);
}

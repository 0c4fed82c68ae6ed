//! Ordered shutdown: terminate, escalate, drain and clean up.

use std::time::{Duration, Instant};

use command_runner::supervisor::{GateState, ReleaseReason, SupervisorState, WaitPolicy};

use super::{builder, recorder};

#[tokio::test]
async fn stop_terminates_running_process() {
    let mut supervisor = builder("echo listening on 1; sleep 30")
        .wait_policy(WaitPolicy::Ready)
        .build()
        .unwrap();
    supervisor.start().await.unwrap();
    assert!(supervisor.id().is_some());

    let code = supervisor.stop().await.unwrap();
    assert_eq!(code, Some(-15));
    assert_eq!(supervisor.returncode(), Some(-15));
}

#[tokio::test]
async fn process_ignoring_sigterm_is_killed() {
    let mut supervisor = builder("trap '' TERM; echo listening on 1; while true; do sleep 0.1; done")
        .wait_policy(WaitPolicy::Ready)
        .grace_period(Duration::from_millis(500))
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    let started = Instant::now();
    let code = supervisor.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(code, Some(-9));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(500) + Duration::from_secs(3));
}

#[tokio::test]
async fn background_children_do_not_block_shutdown() {
    let mut supervisor = builder("sleep 30 & echo listening on 1; wait")
        .wait_policy(WaitPolicy::Ready)
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    let started = Instant::now();
    supervisor.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn stop_twice_is_idempotent() {
    let mut supervisor = builder("exit 3")
        .wait_policy(WaitPolicy::Exit)
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    assert_eq!(supervisor.stop().await.unwrap(), Some(3));
    assert_eq!(supervisor.stop().await.unwrap(), Some(3));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn wait_before_stop_lets_process_finish() {
    let (lines, observer) = recorder();
    let mut supervisor = builder("sleep 0.3; echo finished")
        .wait_policy(WaitPolicy::None)
        .wait_before_stop(true)
        .observer(observer)
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    assert_eq!(supervisor.stop().await.unwrap(), Some(0));
    assert_eq!(*lines.lock().unwrap(), vec!["finished"]);
}

#[tokio::test]
async fn soft_wait_timeout_leaves_process_running() {
    let mut supervisor = builder("sleep 30")
        .wait_policy(WaitPolicy::None)
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    assert_eq!(supervisor.wait(Some(Duration::from_millis(100))).await, None);
    assert!(supervisor.returncode().is_none());
    assert_eq!(supervisor.state(), SupervisorState::Running);

    assert_eq!(supervisor.stop().await.unwrap(), Some(-15));
}

#[tokio::test]
async fn exit_wait_honours_timeout() {
    let mut supervisor = builder("sleep 30")
        .wait_policy(WaitPolicy::Exit)
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let started = Instant::now();
    supervisor.start().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(supervisor.returncode().is_none());

    supervisor.stop().await.unwrap();
}

/// Fill the input pipe of a process that never reads it.
async fn fill_stdin(supervisor: &command_runner::supervisor::ProcessSupervisor) {
    let big = "x".repeat(1 << 20);
    let sent = tokio::time::timeout(Duration::from_millis(200), supervisor.send_line(&big)).await;
    assert!(sent.is_err());
}

#[tokio::test]
async fn stop_is_bounded_when_input_pipe_is_full() {
    let mut supervisor = builder("echo up; sleep 30")
        .wait_policy(WaitPolicy::None)
        .quit_token("quit")
        .build()
        .unwrap();
    supervisor.start().await.unwrap();
    fill_stdin(&supervisor).await;

    let started = Instant::now();
    let code = tokio::time::timeout(Duration::from_secs(10), supervisor.stop())
        .await
        .expect("stop() should not hang on a full input pipe")
        .unwrap();

    assert_eq!(code, Some(-15));
    assert!(started.elapsed() < Duration::from_millis(1000) + Duration::from_secs(3));
}

#[tokio::test]
async fn stop_request_with_full_input_pipe_does_not_stall_reader() {
    let mut supervisor = builder("sleep 0.5; echo stopping on error; sleep 30")
        .wait_policy(WaitPolicy::None)
        .quit_token("quit")
        .build()
        .unwrap();
    supervisor.start().await.unwrap();
    fill_stdin(&supervisor).await;

    let state = tokio::time::timeout(Duration::from_secs(5), supervisor.wait_ready())
        .await
        .expect("readiness gate should open after the stop request");
    assert_eq!(state, GateState::Released(ReleaseReason::StopRequested));
    assert!(supervisor.stopped_on_error());

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(10), supervisor.stop())
        .await
        .expect("stop() should not hang on a full input pipe")
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000) + Duration::from_secs(3));
}

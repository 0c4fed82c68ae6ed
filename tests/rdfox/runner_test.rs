//! Integration tests for the RDFox runner.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use command_runner::config::RunnerConfig;
use command_runner::rdfox::{
    run_rdfox_collecting_output, Endpoint, RdfoxError, RdfoxRunner, MASTER_SCRIPT,
};
use command_runner::supervisor::{GateState, ReleaseReason, SupervisorError, WaitPolicy};
use command_runner::workdir::{InputSource, StagedInputs};
use url::Url;

use super::fake_rdfox;

#[derive(Default)]
struct RecordingEndpoint {
    urls: Mutex<Vec<Url>>,
}

impl Endpoint for RecordingEndpoint {
    fn connect(&self, base_url: Url) {
        self.urls.lock().unwrap().push(base_url);
    }
}

fn fake_config() -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.rdfox.executable = fake_rdfox();
    config.grace_period_secs = 1;
    config
}

#[tokio::test]
async fn endpoint_start_connects_rest_endpoint() {
    let mut runner = RdfoxRunner::builder(["import data.ttl", "endpoint start"])
        .input("data.ttl", InputSource::text("<a> <b> <c> ."))
        .config(fake_config())
        .build()
        .unwrap();
    assert_eq!(runner.wait_policy(), WaitPolicy::Ready);

    runner.start().await.unwrap();

    assert_eq!(
        runner.endpoint().base_url().map(Url::as_str),
        Some("http://localhost:12110/")
    );
    assert!(runner.errors().is_empty());
    assert!(!runner.stopped_on_error());
    assert!(runner.files(MASTER_SCRIPT).is_file());

    runner.stop().await.unwrap();
}

#[tokio::test]
async fn custom_endpoint_receives_url() {
    let mut runner = RdfoxRunner::builder(["endpoint start"])
        .endpoint(RecordingEndpoint::default())
        .config(fake_config())
        .build()
        .unwrap();

    runner.start().await.unwrap();
    assert_eq!(
        *runner.endpoint().urls.lock().unwrap(),
        vec![Url::parse("http://localhost:12110").unwrap()]
    );
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn stop_on_error_releases_start() {
    let mut runner = RdfoxRunner::builder([
        "set on-error stop",
        "import missing.ttl",
        "endpoint start",
    ])
    .endpoint(RecordingEndpoint::default())
    .config(fake_config())
    .build()
    .unwrap();

    runner.start().await.unwrap();

    assert!(runner.stopped_on_error());
    assert_eq!(
        runner.supervisor().readiness().state(),
        GateState::Released(ReleaseReason::StopRequested)
    );
    assert_eq!(
        runner.errors(),
        vec!["File with name 'missing.ttl' cannot be found.".to_string()]
    );
    assert!(runner.endpoint().urls.lock().unwrap().is_empty());

    runner.stop().await.unwrap();
}

#[tokio::test]
async fn script_without_endpoint_runs_to_exit() {
    let mut runner = RdfoxRunner::builder(["import data.ttl", "export out.ttl"])
        .input("data.ttl", InputSource::text("<a> <b> <c> ."))
        .config(fake_config())
        .build()
        .unwrap();
    assert_eq!(runner.wait_policy(), WaitPolicy::Exit);

    runner.start().await.unwrap();
    assert_eq!(runner.supervisor().returncode(), Some(0));
    assert!(runner.files("out.ttl").is_file());
    assert_eq!(runner.stop().await.unwrap(), Some(0));
}

#[tokio::test]
async fn out_of_memory_is_critical() {
    let mut runner = RdfoxRunner::builder(["exhaust memory"])
        .config(fake_config())
        .build()
        .unwrap();

    let err = runner.start().await.unwrap_err();
    assert!(matches!(
        err,
        RdfoxError::Supervisor(SupervisorError::Critical { ref message })
            if message == "The server is out of memory."
    ));
    assert!(runner.stop().await.is_err());
}

#[tokio::test]
async fn collecting_output_logs_errors_without_failing() {
    let mut inputs = StagedInputs::new();
    inputs.insert(
        PathBuf::from("data.ttl"),
        InputSource::text("<a> <b> <c> ."),
    );
    let mut outputs = BTreeMap::new();
    outputs.insert("facts", "out.ttl");

    let collected = run_rdfox_collecting_output(
        inputs,
        ["import data.ttl", "import missing.ttl", "export out.ttl"],
        &outputs,
        fake_config(),
    )
    .await
    .unwrap();

    assert_eq!(collected["facts"], "<a> <b> <c> .\n");
}

#[tokio::test]
async fn collecting_output_reports_missing_files() {
    let mut outputs = BTreeMap::new();
    outputs.insert("facts", "never-written.ttl");

    let err = run_rdfox_collecting_output(
        StagedInputs::new(),
        ["import nothing.ttl"],
        &outputs,
        fake_config(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        RdfoxError::Supervisor(SupervisorError::Staging(_))
    ));
}

#[tokio::test]
async fn explicit_executable_overrides_config() {
    let mut runner = RdfoxRunner::builder(["quit"])
        .config(fake_config())
        .executable("/nonexistent/RDFox")
        .build()
        .unwrap();

    let err = runner.start().await.unwrap_err();
    assert!(matches!(
        err,
        RdfoxError::Supervisor(SupervisorError::Launch(_))
    ));
    runner.stop().await.unwrap();
}

//! Run-to-completion helper.

use std::collections::BTreeMap;

use command_runner::supervisor::{run_in_dir, SupervisorBuilder, SupervisorError};
use command_runner::workdir::InputSource;

use super::sh;

#[tokio::test]
async fn collects_output_files() {
    let builder = SupervisorBuilder::new()
        .input("a.txt", InputSource::text("apples"))
        .input("b.txt", InputSource::text("bananas"))
        .command(sh("cat a.txt b.txt > both.txt; mv a.txt moved.txt"));

    let mut outputs = BTreeMap::new();
    outputs.insert("both", "both.txt");
    outputs.insert("moved", "moved.txt");

    let collected = run_in_dir(builder, &outputs).await.unwrap();
    assert_eq!(collected["both"], "applesbananas");
    assert_eq!(collected["moved"], "apples");
}

#[tokio::test]
async fn failing_command_is_an_error() {
    let builder = SupervisorBuilder::new().command(sh("cat missing.txt"));
    let outputs: BTreeMap<&str, &str> = BTreeMap::new();

    let err = run_in_dir(builder, &outputs).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ExitStatus { code: 1 }));
}

#[tokio::test]
async fn missing_output_file_is_an_error() {
    let builder = SupervisorBuilder::new().command(sh("true"));
    let mut outputs = BTreeMap::new();
    outputs.insert("result", "result.txt");

    let err = run_in_dir(builder, &outputs).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Staging(_)));
}

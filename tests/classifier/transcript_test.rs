//! Classify whole RDFox shell transcripts.

use command_runner::classifier::{ClassifierMode, OutputClassifier, OutputEvent};
use command_runner::rdfox::rdfox_patterns;

fn classify_all(lines: &[&str]) -> (OutputClassifier, Vec<OutputEvent>) {
    let mut classifier = OutputClassifier::new(rdfox_patterns().unwrap());
    let mut events: Vec<OutputEvent> = lines.iter().flat_map(|l| classifier.classify(l)).collect();
    events.extend(classifier.finish());
    (classifier, events)
}

#[test]
fn clean_session_with_endpoint() {
    let (classifier, events) = classify_all(&[
        "A new data store 'default' was created and initialized.",
        "Adding data on file '/tmp/run/facts.ttl'.",
        "Import operation took 0.001 s.",
        "The REST endpoint was successfully started at port number/service name 12110",
    ]);

    assert_eq!(events, vec![OutputEvent::Signal("12110".to_string())]);
    assert!(!classifier.is_critical());
}

#[test]
fn block_followed_by_line_error_gives_two_errors() {
    let (_, events) = classify_all(&[
        "An error occurred while executing the command:",
        "    import rules.dlog",
        "    The rule contains a syntax error.",
        "File with name 'missing.ttl' cannot be found.",
    ]);

    assert_eq!(
        events,
        vec![
            OutputEvent::BlockError(
                "import rules.dlog\nThe rule contains a syntax error.".to_string()
            ),
            OutputEvent::LineError("File with name 'missing.ttl' cannot be found.".to_string()),
        ]
    );
}

#[test]
fn block_open_at_end_of_output_is_flushed() {
    let (classifier, events) = classify_all(&[
        "An error occurred while executing the command:",
        "    import data.ttl",
    ]);

    assert_eq!(
        events,
        vec![OutputEvent::BlockError("import data.ttl".to_string())]
    );
    assert_eq!(classifier.mode(), ClassifierMode::Idle);
}

#[test]
fn out_of_memory_inside_block_is_critical() {
    let (classifier, events) = classify_all(&[
        "An error occurred while executing the command:",
        "    import huge.ttl",
        "    The server is out of memory.",
        "Script execution was stopped because 'on-error' is set to 'stop'.",
    ]);

    assert!(classifier.is_critical());
    assert_eq!(
        classifier.critical_message(),
        Some("The server is out of memory.")
    );
    assert!(events.contains(&OutputEvent::StopRequested));
    assert!(events
        .iter()
        .any(|e| matches!(e, OutputEvent::Critical(m) if m == "The server is out of memory.")));
}

#[test]
fn critical_preamble_captures_next_line() {
    let (classifier, events) = classify_all(&[
        "A critical error occurred while processing the request:",
        "Memory pool exhausted",
        "Error: subsequent failure",
    ]);

    assert!(classifier.is_critical());
    assert_eq!(classifier.critical_message(), Some("Memory pool exhausted"));
    assert_eq!(
        events,
        vec![
            OutputEvent::Critical("Memory pool exhausted".to_string()),
            OutputEvent::LineError("Error: subsequent failure".to_string()),
        ]
    );
}

#[test]
fn error_text_mid_line_is_not_an_error() {
    let (_, events) = classify_all(&["Query returned: Error: is a literal"]);
    assert!(events.is_empty());
}

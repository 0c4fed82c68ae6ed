//! Line classification state machine.

use super::ProtocolPatterns;

/// Something worth reacting to in the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Readiness announced, carrying the captured identifier.
    Signal(String),
    /// A single-line error.
    LineError(String),
    /// A multi-line error, its body lines joined with newlines.
    BlockError(String),
    /// A critical condition with its message.
    Critical(String),
    /// The process announced it is halting by its own error policy.
    StopRequested,
}

/// Current accumulation mode of the classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClassifierMode {
    #[default]
    Idle,
    /// Collecting indented lines after a block header.
    AccumulatingBlock,
    /// The next line is the message of a critical error.
    AwaitingCritical,
}

/// Stateful classifier fed one output line at a time.
///
/// A block ends at the first line that is not indented; that line is then
/// classified on its own, so a block immediately followed by another error
/// yields two events.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    patterns: ProtocolPatterns,
    mode: ClassifierMode,
    buffered_lines: Vec<String>,
    critical: bool,
    critical_message: Option<String>,
}

impl OutputClassifier {
    #[must_use]
    pub fn new(patterns: ProtocolPatterns) -> Self {
        Self {
            patterns,
            mode: ClassifierMode::Idle,
            buffered_lines: Vec::new(),
            critical: false,
            critical_message: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ClassifierMode {
        self.mode
    }

    /// Whether a critical condition has been seen.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    #[must_use]
    pub fn critical_message(&self) -> Option<&str> {
        self.critical_message.as_deref()
    }

    /// Lines of the block currently being accumulated.
    #[must_use]
    pub fn buffered_lines(&self) -> &[String] {
        &self.buffered_lines
    }

    /// Classify one line, returning the events it produces.
    pub fn classify(&mut self, line: &str) -> Vec<OutputEvent> {
        let mut events = Vec::new();

        match self.mode {
            ClassifierMode::AwaitingCritical => {
                self.mode = ClassifierMode::Idle;
                self.critical_message = Some(line.to_string());
                events.push(OutputEvent::Critical(line.to_string()));
                return events;
            }
            ClassifierMode::AccumulatingBlock if is_continuation(line) => {
                let content = line.trim();
                if self
                    .patterns
                    .critical_marker
                    .as_ref()
                    .is_some_and(|p| p.matches(content))
                {
                    self.critical = true;
                    self.critical_message = Some(content.to_string());
                    events.push(OutputEvent::Critical(content.to_string()));
                }
                self.buffered_lines.push(content.to_string());
                return events;
            }
            ClassifierMode::AccumulatingBlock => self.close_block(&mut events),
            ClassifierMode::Idle => {}
        }

        self.classify_fresh(line, &mut events);
        events
    }

    /// Flush state at end of stream, closing any open block.
    pub fn finish(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        match self.mode {
            ClassifierMode::AccumulatingBlock => self.close_block(&mut events),
            // The preamble was recorded as the message already.
            ClassifierMode::AwaitingCritical => self.mode = ClassifierMode::Idle,
            ClassifierMode::Idle => {}
        }
        events
    }

    fn close_block(&mut self, events: &mut Vec<OutputEvent>) {
        self.mode = ClassifierMode::Idle;
        if !self.buffered_lines.is_empty() {
            events.push(OutputEvent::BlockError(self.buffered_lines.join("\n")));
            self.buffered_lines.clear();
        }
    }

    fn classify_fresh(&mut self, line: &str, events: &mut Vec<OutputEvent>) {
        let patterns = &self.patterns;

        if patterns.block_start.as_ref().is_some_and(|p| p.matches(line)) {
            self.mode = ClassifierMode::AccumulatingBlock;
            self.buffered_lines.clear();
        } else if let Some(id) = patterns.readiness.as_ref().and_then(|p| p.capture(line)) {
            events.push(OutputEvent::Signal(id.to_string()));
        } else if patterns.line_error.as_ref().is_some_and(|p| p.matches(line)) {
            events.push(OutputEvent::LineError(line.to_string()));
        } else if patterns
            .critical_preamble
            .as_ref()
            .is_some_and(|p| p.matches(line))
        {
            self.mode = ClassifierMode::AwaitingCritical;
            self.critical = true;
            self.critical_message = Some(line.to_string());
        } else if patterns
            .stop_requested
            .as_ref()
            .is_some_and(|p| p.matches(line))
        {
            events.push(OutputEvent::StopRequested);
        }
    }
}

fn is_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t'])
}

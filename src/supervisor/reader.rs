//! Output-reading task.
//!
//! Reads the combined stdout/stderr of the process line by line, feeds each
//! line to the classifier and acts on the resulting events. This task is the
//! only writer of classifier state and of the published [`RunReport`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;

use crate::classifier::{OutputClassifier, OutputEvent};

use super::{GateState, ReadinessGate, ReleaseReason, RunReport, StdinHandle};

/// Callback receiving every raw output line.
pub type OutputObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Hands the identifier from a readiness signal to a downstream client.
#[async_trait]
pub trait ConnectHook: Send + Sync {
    async fn connect(&self, identifier: &str);
}

/// Turn a byte stream into a stream of lines.
///
/// Invalid UTF-8 is replaced rather than rejected, and trailing whitespace
/// (including the line terminator) is stripped.
pub fn line_stream<R>(reader: R) -> impl Stream<Item = std::io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures_util::stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                Some((Ok(line), reader))
            }
            Err(e) => Some((Err(e), reader)),
        }
    })
}

/// Merge two byte streams into one line stream, in arrival order.
pub fn combined_lines<A, B>(
    stdout: A,
    stderr: B,
) -> impl Stream<Item = std::io::Result<String>> + Send
where
    A: AsyncRead + Unpin + Send + 'static,
    B: AsyncRead + Unpin + Send + 'static,
{
    futures_util::stream::select(
        Box::pin(line_stream(stdout)),
        Box::pin(line_stream(stderr)),
    )
}

/// State owned by the output-reading task.
pub(crate) struct OutputReader {
    pub(crate) classifier: OutputClassifier,
    pub(crate) gate: ReadinessGate,
    pub(crate) report: watch::Sender<RunReport>,
    pub(crate) stdin: StdinHandle,
    pub(crate) quit_token: Option<String>,
    /// Bound on sending the quit token; reading stalls while it is sent.
    pub(crate) quit_timeout: Duration,
    pub(crate) observer: Option<OutputObserver>,
    pub(crate) connect: Option<Arc<dyn ConnectHook>>,
}

impl OutputReader {
    /// Consume `lines` until end of stream and return the final report.
    ///
    /// The readiness gate is always open when this returns.
    pub(crate) async fn run<S>(mut self, lines: S) -> RunReport
    where
        S: Stream<Item = std::io::Result<String>>,
    {
        tracing::debug!("Output reader started");
        let mut lines = std::pin::pin!(lines);

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => self.handle_line(&line).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read process output");
                    break;
                }
            }
        }

        for event in self.classifier.finish() {
            self.apply(event).await;
        }
        self.sync_critical();

        if self
            .gate
            .fire(GateState::Released(ReleaseReason::StreamClosed))
        {
            tracing::debug!("Output ended before readiness was signalled");
        }

        let report = self.report.borrow().clone();
        tracing::debug!(
            lines = report.lines,
            errors = report.errors.len(),
            "Output reader finished"
        );
        report
    }

    async fn handle_line(&mut self, line: &str) {
        tracing::debug!("cmd> {line}");
        self.report.send_modify(|r| r.lines += 1);
        if let Some(observer) = &self.observer {
            observer(line);
        }

        for event in self.classifier.classify(line) {
            self.apply(event).await;
        }
        self.sync_critical();
    }

    async fn apply(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Signal(id) => {
                if self.report.borrow().ready.is_some() {
                    tracing::debug!(identifier = %id, "Ignoring repeated readiness signal");
                    return;
                }
                tracing::info!(identifier = %id, "Process signalled readiness");
                self.report.send_modify(|r| r.ready = Some(id.clone()));
                if let Some(hook) = &self.connect {
                    hook.connect(&id).await;
                }
                self.gate.fire(GateState::Ready(id));
            }
            OutputEvent::LineError(message) | OutputEvent::BlockError(message) => {
                tracing::error!("Process error: {message}");
                self.report.send_modify(|r| r.errors.push(message));
            }
            OutputEvent::Critical(message) => {
                tracing::error!(critical = true, "Process critical error: {message}");
            }
            OutputEvent::StopRequested => {
                tracing::warn!("Process is stopping because of an error");
                self.report.send_modify(|r| r.stopped_on_error = true);
                if let Some(token) = &self.quit_token {
                    self.stdin.try_send_line(token, self.quit_timeout).await;
                }
                self.gate
                    .fire(GateState::Released(ReleaseReason::StopRequested));
            }
        }
    }

    fn sync_critical(&self) {
        if !self.classifier.is_critical() {
            return;
        }
        let message = self.classifier.critical_message().map(str::to_string);
        self.report.send_if_modified(|r| {
            if r.critical && r.critical_message == message {
                return false;
            }
            r.critical = true;
            r.critical_message.clone_from(&message);
            true
        });
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::CallRecord;

/// Destination for report lines. Emission is fire-and-forget.
pub trait ReportSink: Send + Sync {
    fn emit(&self, line: &str);
}

impl<F> ReportSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, line: &str) {
        self(line)
    }
}

/// Prints each line to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{line}");
    }
}

/// Emits each line as an INFO event under `request_profiler::report`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "request_profiler::report", "{line}");
    }
}

/// Request metadata printed above the call records.
#[derive(Debug, Clone, Copy)]
pub struct RequestSummary<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub elapsed: Duration,
    pub status: u16,
}

impl fmt::Display for RequestSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.2}, {}",
            self.method,
            self.path,
            self.elapsed.as_secs_f64(),
            self.status
        )
    }
}

/// Renders a reduced profile and writes it line by line.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ReportSink>,
}

impl Reporter {
    pub fn new(sink: Option<Arc<dyn ReportSink>>) -> Self {
        Self {
            sink: sink.unwrap_or_else(|| Arc::new(StdoutSink)),
        }
    }

    /// Summary line first, then one line per record in the given order.
    pub fn render(summary: &RequestSummary<'_>, records: &[CallRecord]) -> Vec<String> {
        std::iter::once(summary.to_string())
            .chain(records.iter().map(ToString::to_string))
            .collect()
    }

    pub fn report(&self, summary: &RequestSummary<'_>, records: &[CallRecord]) {
        for line in Self::render(summary, records) {
            self.sink.emit(&line);
        }
    }
}

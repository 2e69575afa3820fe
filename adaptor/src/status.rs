use std::io::Write;

/// One progress/status report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub progress: Option<f64>,
    pub status_message: Option<String>,
}

/// Destination for status reports aimed at the orchestrator.
pub trait StatusReporter: Send + Sync {
    fn report(&self, update: &StatusUpdate);
}

/// Prints the `openjd_progress` / `openjd_status` lines the worker agent
/// scrapes from the adaptor's stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutStatusReporter;

impl StatusReporter for StdoutStatusReporter {
    fn report(&self, update: &StatusUpdate) {
        let mut stdout = std::io::stdout().lock();
        for line in format_update(update) {
            // Nothing sensible to do if stdout is gone.
            let _ = writeln!(stdout, "{line}");
        }
        let _ = stdout.flush();
    }
}

pub(crate) fn format_update(update: &StatusUpdate) -> Vec<String> {
    let mut lines = Vec::with_capacity(2);
    if let Some(progress) = update.progress {
        lines.push(format!("openjd_progress: {progress:.1}"));
    }
    if let Some(message) = update.status_message.as_deref() {
        lines.push(format!("openjd_status: {message}"));
    }
    lines
}

//! Rules turning Houdini's console output into lifecycle signals.

use std::path::Path;
use std::sync::Arc;

use regex_lite::Captures;
use regex_lite::Regex;
use tracing::debug;
use tracing::warn;

use crate::error::RenderFault;
use crate::regex_handler::RegexCallback;
use crate::regex_handler::RegexHandler;
use crate::session::RenderSession;

const COMPLETED_PATTERN: &str = ".*Finished Rendering.*";
const PROGRESS_PATTERN: &str = ".*ALF_PROGRESS ([0-9]+)%.*";
const PROGRESS_MARKER: &str = "ALF_PROGRESS ";
const ERROR_PATTERN: &str = r"(?i).*Error: .*|.*\[Error\].*";
const LICENSE_PATTERN: &str = "RuntimeError: Error encountered when initializing Houdini";
const VERSION_PATTERN: &str = r"HoudiniClient: Houdini Version ([0-9]+\.[0-9]+)(\.[0-9]+)?";

/// Builds the handler attached to both output streams of the Houdini child.
///
/// Rule order: completion, progress, error (strict mode only), license,
/// version. Completion, progress, error and license do nothing while a fault
/// is pending outside of cleanup. The error rule leaves license lines to the
/// license rule.
pub fn output_handler(
    session: &Arc<RenderSession>,
    strict_error_checking: bool,
) -> Result<RegexHandler, regex_lite::Error> {
    let mut callbacks = Vec::with_capacity(5);

    let s = Arc::clone(session);
    callbacks.push(RegexCallback::new(
        vec![Regex::new(COMPLETED_PATTERN)?],
        move |_: &Captures<'_>| handle_complete(&s),
    ));

    let s = Arc::clone(session);
    callbacks.push(RegexCallback::new(
        vec![Regex::new(PROGRESS_PATTERN)?],
        move |captures: &Captures<'_>| handle_progress(&s, captures),
    ));

    if strict_error_checking {
        let s = Arc::clone(session);
        callbacks.push(RegexCallback::new(
            vec![Regex::new(ERROR_PATTERN)?],
            move |captures: &Captures<'_>| handle_error(&s, captures),
        ));
    }

    let s = Arc::clone(session);
    callbacks.push(RegexCallback::new(
        vec![Regex::new(LICENSE_PATTERN)?],
        move |captures: &Captures<'_>| handle_license_error(&s, captures),
    ));

    let s = Arc::clone(session);
    callbacks.push(RegexCallback::new(
        vec![Regex::new(VERSION_PATTERN)?],
        move |captures: &Captures<'_>| handle_version(&s, captures),
    ));

    Ok(RegexHandler::new(callbacks))
}

fn whole_match<'h>(captures: &Captures<'h>) -> &'h str {
    captures
        .get(0)
        .map(|matched| matched.as_str())
        .unwrap_or_default()
}

fn handle_complete(session: &RenderSession) {
    if session.should_skip_handlers() {
        return;
    }
    session.set_rendering(false);
    session.update_status(Some(100.0), None);
}

fn handle_progress(session: &RenderSession, captures: &Captures<'_>) {
    if session.should_skip_handlers() {
        return;
    }
    match parse_progress(whole_match(captures)) {
        Some(progress) => session.update_status(Some(f64::from(progress)), None),
        None => warn!("unparseable progress line: {}", whole_match(captures)),
    }
}

fn handle_error(session: &RenderSession, captures: &Captures<'_>) {
    let line = whole_match(captures);
    if session.should_skip_handlers() || line.contains(LICENSE_PATTERN) {
        return;
    }
    session.stage_fault(RenderFault::ErrorLine {
        line: line.to_string(),
    });
}

fn handle_license_error(session: &RenderSession, captures: &Captures<'_>) {
    if session.should_skip_handlers() {
        return;
    }
    let free_mib = match std::env::current_dir().and_then(|cwd| free_mib(&cwd)) {
        Ok(free) => free,
        Err(err) => {
            warn!("failed to read free disk space: {err}");
            0
        }
    };
    session.stage_fault(RenderFault::License {
        line: whole_match(captures).to_string(),
        free_mib,
    });
}

fn handle_version(session: &RenderSession, captures: &Captures<'_>) {
    let Some(major_minor) = captures.get(1) else {
        return;
    };
    let mut version = major_minor.as_str().to_string();
    if let Some(patch) = captures.get(2) {
        version.push_str(patch.as_str());
    }
    debug!("detected Houdini version {version}");
    session.set_houdini_version(version);
}

/// Reads the percentage following the progress marker. Only the first two
/// characters after the marker are considered, so `5%` yields 5 and `42%`
/// yields 42.
pub(crate) fn parse_progress(text: &str) -> Option<u32> {
    let start = text.find(PROGRESS_MARKER)? + PROGRESS_MARKER.len();
    let window: String = text[start..].chars().take(2).collect();
    let digits = match window.strip_suffix('%') {
        Some(single) => single,
        None => window.as_str(),
    };
    digits.parse().ok()
}

fn free_mib(path: &Path) -> std::io::Result<u64> {
    Ok(fs2::available_space(path)? / 1024 / 1024)
}

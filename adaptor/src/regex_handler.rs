use regex_lite::Captures;
use regex_lite::Regex;

use crate::subprocess::OutputHandler;
use crate::subprocess::OutputStream;

type MatchCallback = Box<dyn Fn(&Captures<'_>) + Send + Sync>;

/// A set of patterns sharing one callback. The first pattern that matches a
/// line fires the callback; the rest of the set is skipped for that line.
pub struct RegexCallback {
    regexes: Vec<Regex>,
    callback: MatchCallback,
}

impl RegexCallback {
    pub fn new<F>(regexes: Vec<Regex>, callback: F) -> Self
    where
        F: Fn(&Captures<'_>) + Send + Sync + 'static,
    {
        Self {
            regexes,
            callback: Box::new(callback),
        }
    }

    /// Returns `true` when one of the patterns matched.
    fn dispatch(&self, line: &str) -> bool {
        for regex in &self.regexes {
            if let Some(captures) = regex.captures(line) {
                (self.callback)(&captures);
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for RegexCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexCallback")
            .field("regexes", &self.regexes)
            .finish_non_exhaustive()
    }
}

/// Runs every line past each callback set in order. Sets are independent of
/// each other, so one line can fire several callbacks.
#[derive(Debug, Default)]
pub struct RegexHandler {
    callbacks: Vec<RegexCallback>,
}

impl RegexHandler {
    pub fn new(callbacks: Vec<RegexCallback>) -> Self {
        Self { callbacks }
    }

    pub fn handle_line(&self, line: &str) -> usize {
        self.callbacks
            .iter()
            .filter(|callback| callback.dispatch(line))
            .count()
    }
}

impl OutputHandler for RegexHandler {
    fn handle_line(&self, _stream: OutputStream, line: &str) {
        RegexHandler::handle_line(self, line);
    }
}

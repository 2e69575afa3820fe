use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdaptorError>;

/// A fatal condition spotted in the host application's output.
///
/// These are raised on a reader thread and staged on the session until the
/// main thread reaches its next poll point.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderFault {
    #[error("Houdini Encountered an Error: {line}")]
    ErrorLine { line: String },

    #[error(
        "{line}\nThis error is typically associated with a licensing error when using Houdini. \
         Check your licensing configuration.\nFree disc space: {free_mib}M\n"
    )]
    License { line: String, free_mib: u64 },
}

#[derive(Debug, Error)]
pub enum AdaptorError {
    #[error("{kind} failed validation: {}", .errors.join("; "))]
    Validation {
        kind: &'static str,
        errors: Vec<String>,
    },

    #[error("{kind} schema failed to compile: {reason}")]
    InvalidSchema { kind: &'static str, reason: String },

    #[error("init data is missing required field `{0}`")]
    MissingInitField(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not find a socket because the server did not finish initializing")]
    ServerStartTimeout,

    #[error("The Houdini Adaptor server failed to start: {0}")]
    ServerFailed(#[source] io::Error),

    #[error(
        "Houdini did not complete initialization actions in {} seconds and failed to start.",
        .timeout.as_secs_f64()
    )]
    StartupTimeout { timeout: Duration },

    #[error("Houdini encountered an error and was not able to complete initialization actions.")]
    StartupFailed,

    #[error("Cannot render because Houdini is not running.")]
    NotRunning,

    #[error(
        "Houdini exited early and did not render successfully, please check render logs. \
         Exit code {exit_code}"
    )]
    UnexpectedExit { exit_code: i32 },

    #[error(transparent)]
    Render(#[from] RenderFault),

    #[error(
        "Could not find houdini_client.py. Check that the HoudiniClient package is in one of the \
         following directories: {searched:?}"
    )]
    ClientScriptNotFound { searched: Vec<PathBuf> },

    #[error("failed to launch `{}`: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid output pattern: {0}")]
    Pattern(#[from] regex_lite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AdaptorError {
    pub(crate) fn spawn(executable: PathBuf, source: io::Error) -> Self {
        Self::Spawn { executable, source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read adaptor config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse adaptor config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid path mapping rules: {0}")]
    PathMapping(#[source] serde_json::Error),
}

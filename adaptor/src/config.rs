use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use serde::de::Error as _;

use crate::error::AdaptorError;
use crate::error::ConfigError;
use crate::path_mapping::PathMappingRule;

const CLIENT_SCRIPT_RELATIVE: [&str; 4] = [
    "deadline",
    "houdini_adaptor",
    "HoudiniClient",
    "houdini_client.py",
];

/// Adaptor settings, read from an optional TOML file. Every field has a
/// default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptorConfig {
    /// Host application executable, resolved through `PATH` when relative.
    pub executable: PathBuf,
    /// Explicit path to the in-host client script; skips discovery.
    pub client_script: Option<PathBuf>,
    /// Directories searched for the client script. Empty means `PYTHONPATH`.
    pub client_search_paths: Vec<PathBuf>,
    /// Parent of the control socket's temporary directory. Defaults to the
    /// system temp directory.
    pub socket_dir: Option<PathBuf>,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub timeouts: Timeouts,
    pub poll: PollIntervals,
    pub path_mapping_rules: Vec<PathMappingRule>,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("hython"),
            client_script: None,
            client_search_paths: Vec::new(),
            socket_dir: None,
            log_level: "info".to_string(),
            timeouts: Timeouts::default(),
            poll: PollIntervals::default(),
            path_mapping_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Wait for the control server to publish its socket.
    #[serde(deserialize_with = "seconds")]
    pub server_start: Duration,
    /// Wait for the control server thread to exit during cleanup.
    #[serde(deserialize_with = "seconds")]
    pub server_end: Duration,
    /// Wait for Houdini to drain the startup actions.
    #[serde(deserialize_with = "seconds")]
    pub houdini_start: Duration,
    /// Wait for Houdini to exit on its own during cleanup.
    #[serde(deserialize_with = "seconds")]
    pub houdini_end: Duration,
    /// SIGTERM to SIGKILL grace when cleanup has to terminate Houdini.
    #[serde(deserialize_with = "seconds")]
    pub terminate_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            server_start: Duration::from_secs(30),
            server_end: Duration::from_secs(30),
            houdini_start: Duration::from_secs(300),
            houdini_end: Duration::from_secs(30),
            terminate_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollIntervals {
    #[serde(deserialize_with = "millis")]
    pub server_ready: Duration,
    #[serde(deserialize_with = "millis")]
    pub action_drain: Duration,
    #[serde(deserialize_with = "millis")]
    pub render: Duration,
    #[serde(deserialize_with = "millis")]
    pub shutdown: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            server_ready: Duration::from_millis(10),
            action_drain: Duration::from_millis(100),
            render: Duration::from_millis(100),
            shutdown: Duration::from_millis(100),
        }
    }
}

impl AdaptorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Locates the in-host client script.
    pub fn resolve_client_script(&self) -> Result<PathBuf, AdaptorError> {
        if let Some(script) = self.client_script.as_ref() {
            if script.is_file() {
                return Ok(script.clone());
            }
            return Err(AdaptorError::ClientScriptNotFound {
                searched: vec![script.clone()],
            });
        }

        let search_paths = if self.client_search_paths.is_empty() {
            std::env::var_os("PYTHONPATH")
                .map(|value| std::env::split_paths(&value).collect())
                .unwrap_or_default()
        } else {
            self.client_search_paths.clone()
        };
        find_client_script(&search_paths)
    }
}

fn find_client_script(search_paths: &[PathBuf]) -> Result<PathBuf, AdaptorError> {
    search_paths
        .iter()
        .map(|dir| CLIENT_SCRIPT_RELATIVE.iter().fold(dir.clone(), |acc, part| acc.join(part)))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| AdaptorError::ClientScriptNotFound {
            searched: search_paths.to_vec(),
        })
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

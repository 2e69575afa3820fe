//! Messages exchanged over the adaptor control channel.
//!
//! The adaptor hosts a Unix socket and the client running inside the host
//! application polls it. Each request and each response is a single line of
//! JSON.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Environment variable through which the child process learns where the
/// control server is listening.
pub const SERVER_PATH_ENV_VAR: &str = "HOUDINI_ADAPTOR_SERVER_PATH";

/// Name of the action that asks the client to exit the host application.
pub const CLOSE_ACTION: &str = "close";

/// Name of the trailing action of every task.
pub const START_RENDER_ACTION: &str = "start_render";

/// Where an action lands when it is enqueued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActionPriority {
    #[default]
    Normal,
    /// Jump ahead of everything already queued.
    Front,
}

/// A named command with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
    #[serde(skip)]
    priority: ActionPriority,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_args(name, Map::new())
    }

    pub fn with_args(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
            priority: ActionPriority::Normal,
        }
    }

    /// Builds the common `{name: value}` shape where the single argument is
    /// keyed by the action name itself.
    pub fn keyed(name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        let mut args = Map::new();
        args.insert(name.clone(), value);
        Self::with_args(name, args)
    }

    pub fn at_front(mut self) -> Self {
        self.priority = ActionPriority::Front;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn priority(&self) -> ActionPriority {
        self.priority
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    NextAction,
    ReportStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_message: Option<String>,
    },
    ActionCompleted {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerResponse {
    Action { action: Option<Action> },
    Ack,
    Error { message: String },
}

impl ServerResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(
        "HoudiniClient cannot connect to the Adaptor because the environment variable \
         HOUDINI_ADAPTOR_SERVER_PATH does not exist"
    )]
    MissingServerPath,

    #[error(
        "HoudiniClient cannot connect to the Adaptor because the socket at the path defined by \
         the environment variable HOUDINI_ADAPTOR_SERVER_PATH does not exist. Got: {}",
        .0.display()
    )]
    SocketNotFound(PathBuf),

    #[error("The scene file '{}' does not exist", .0.display())]
    SceneNotFound(PathBuf),

    #[error("Render node is 'None', no render node has been loaded")]
    NoRenderNode,

    #[error("WEDGENUM out of range: {0}")]
    WedgeOutOfRange(i64),

    #[error("invalid argument for `{action}`: {reason}")]
    InvalidArgument { action: String, reason: String },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("`{action}` failed: {source}")]
    Host {
        action: String,
        #[source]
        source: HostError,
    },

    #[error("adaptor server returned an error: {0}")]
    Server(String),

    #[error("adaptor server closed the connection")]
    Disconnected,

    #[error("unexpected response from adaptor server: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Protocol(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

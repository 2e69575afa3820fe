//! In-host side of the Houdini adaptor.
//!
//! Runs inside Houdini, polls the adaptor's control server for actions and
//! carries them out against a [`HostApplication`].

mod connection;
mod dispatcher;
mod error;
mod host;

pub use connection::AdaptorClient;
pub use connection::DEFAULT_POLL_INTERVAL;
pub use connection::resolve_server_path;
pub use dispatcher::CommandDispatcher;
pub use dispatcher::Dispatch;
pub use dispatcher::RenderSettings;
pub use error::ClientError;
pub use error::Result;
pub use host::HostApplication;
pub use host::HostError;
pub use host::RenderRequest;

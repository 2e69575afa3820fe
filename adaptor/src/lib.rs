//! Render-farm adaptor that drives Houdini headlessly.
//!
//! [`HoudiniAdaptor`] owns one session: it starts a control server, launches
//! Houdini with the in-host client script, feeds it actions and classifies its
//! console output until the session is cleaned up.

pub mod action_queue;
mod adaptor;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod path_mapping;
pub mod regex_handler;
pub mod server;
pub mod session;
pub mod status;
pub mod subprocess;
pub mod telemetry;
pub mod validation;

pub use adaptor::AdaptorState;
pub use adaptor::CancelHandle;
pub use adaptor::HoudiniAdaptor;
pub use config::AdaptorConfig;
pub use error::AdaptorError;
pub use error::RenderFault;
pub use error::Result;

use std::path::Path;

pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// A single-frame render of one ROP node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub node: String,
    pub frame: i64,
    pub ignore_input_nodes: bool,
}

/// The operations the dispatcher needs from the embedding application.
pub trait HostApplication {
    fn version(&self) -> String;

    fn load_scene(&mut self, path: &Path) -> Result<(), HostError>;

    fn node_exists(&self, path: &str) -> bool;

    /// Number of wedge variants defined on a wedge node.
    fn wedge_count(&self, node: &str) -> Result<usize, HostError>;

    fn apply_wedge(&mut self, node: &str, index: usize) -> Result<(), HostError>;

    /// Sets a global scene variable, e.g. `WEDGENUM`.
    fn set_variable(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    fn render(&mut self, request: &RenderRequest) -> Result<(), HostError>;

    fn exit(&mut self);
}

use std::io::Write;
use std::path::PathBuf;

use houdini_adaptor_protocol::Action;
use houdini_adaptor_protocol::CLOSE_ACTION;
use houdini_adaptor_protocol::START_RENDER_ACTION;
use serde_json::Value;

use crate::error::ClientError;
use crate::error::Result;
use crate::host::HostApplication;
use crate::host::HostError;
use crate::host::RenderRequest;

const WEDGENUM_VARIABLE: &str = "WEDGENUM";

/// Render settings accumulated from the actions seen so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub node: Option<String>,
    pub frame: Option<i64>,
    pub ignore_input_nodes: bool,
    pub wedge_node: Option<String>,
    pub wedgenum: Option<i64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            node: None,
            frame: None,
            ignore_input_nodes: true,
            wedge_node: None,
            wedgenum: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// The adaptor asked the host to exit.
    Close,
}

/// Maps adaptor actions onto calls against the host. Console output the
/// adaptor watches for (version banner, `Finished Rendering`) goes to `out`.
pub struct CommandDispatcher<H, W> {
    host: H,
    out: W,
    settings: RenderSettings,
}

impl<H: HostApplication, W: Write> CommandDispatcher<H, W> {
    pub fn new(host: H, out: W) -> Self {
        Self {
            host,
            out,
            settings: RenderSettings::default(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn into_parts(self) -> (H, W) {
        (self.host, self.out)
    }

    /// Prints the banner the adaptor reads the Houdini version from.
    pub fn announce_version(&mut self) -> Result<()> {
        let version = self.host.version();
        self.say(format_args!("HoudiniClient: Houdini Version {version}"))
    }

    pub fn dispatch(&mut self, action: &Action) -> Result<Dispatch> {
        match action.name() {
            "scene_file" => self.set_scene_file(action)?,
            "render_node" => self.set_render_node(action)?,
            "frame" => {
                self.settings.frame = Some(int_arg(action, "frame")?);
            }
            "ignore_input_nodes" => {
                self.settings.ignore_input_nodes = match action.arg("ignore_input_nodes") {
                    None | Some(Value::Null) => true,
                    Some(Value::Bool(value)) => *value,
                    Some(other) => return Err(invalid(action, format!("expected a boolean, got {other}"))),
                };
            }
            "wedge_node" => self.set_wedge_node(action)?,
            "wedgenum" => {
                if action.arg("wedgenum").is_some_and(|value| !value.is_null()) {
                    let wedgenum = int_arg(action, "wedgenum")?;
                    self.say(format_args!("wedgenum {wedgenum}"))?;
                    self.settings.wedgenum = Some(wedgenum);
                }
            }
            START_RENDER_ACTION => self.start_render(action)?,
            CLOSE_ACTION => return Ok(Dispatch::Close),
            other => return Err(ClientError::UnknownAction(other.to_string())),
        }
        Ok(Dispatch::Continue)
    }

    /// Exits the host application.
    pub fn close(&mut self) {
        self.host.exit();
    }

    fn set_scene_file(&mut self, action: &Action) -> Result<()> {
        let path = PathBuf::from(str_arg(action, "scene_file")?);
        if !path.is_file() {
            return Err(ClientError::SceneNotFound(path));
        }
        self.host
            .load_scene(&path)
            .map_err(|source| host_error(action, source))
    }

    fn set_render_node(&mut self, action: &Action) -> Result<()> {
        let node = str_arg(action, "render_node")?;
        if !self.host.node_exists(node) {
            return Err(ClientError::NoRenderNode);
        }
        self.say(format_args!("node: {node}"))?;
        self.settings.node = Some(node.to_string());
        Ok(())
    }

    fn set_wedge_node(&mut self, action: &Action) -> Result<()> {
        let node = match action.arg("wedge_node") {
            None | Some(Value::Null) => return Ok(()),
            Some(_) => str_arg(action, "wedge_node")?,
        };
        if !node.is_empty() && self.host.node_exists(node) {
            self.say(format_args!("wedge node: {node}"))?;
            self.settings.wedge_node = Some(node.to_string());
        }
        Ok(())
    }

    fn start_render(&mut self, action: &Action) -> Result<()> {
        let node = self.settings.node.clone().ok_or(ClientError::NoRenderNode)?;
        let frame = match action.arg("frame") {
            Some(value) if !value.is_null() => int_arg(action, "frame")?,
            _ => self
                .settings
                .frame
                .ok_or_else(|| invalid(action, "no frame has been set".to_string()))?,
        };

        if let (Some(wedge_node), Some(wedgenum)) =
            (self.settings.wedge_node.clone(), self.settings.wedgenum)
        {
            self.say(format_args!("Wedged step"))?;
            let count = self
                .host
                .wedge_count(&wedge_node)
                .map_err(|source| host_error(action, source))?;
            let index = usize::try_from(wedgenum)
                .ok()
                .filter(|index| *index < count)
                .ok_or(ClientError::WedgeOutOfRange(wedgenum))?;
            self.host
                .set_variable(WEDGENUM_VARIABLE, &wedgenum.to_string())
                .map_err(|source| host_error(action, source))?;
            self.say(format_args!("Applying wedge: {wedgenum}"))?;
            self.host
                .apply_wedge(&wedge_node, index)
                .map_err(|source| host_error(action, source))?;
        }

        let request = RenderRequest {
            node,
            frame,
            ignore_input_nodes: self.settings.ignore_input_nodes,
        };
        self.host
            .render(&request)
            .map_err(|source| host_error(action, source))?;
        self.host
            .set_variable(WEDGENUM_VARIABLE, "")
            .map_err(|source| host_error(action, source))?;
        self.say(format_args!("Finished Rendering"))
    }

    fn say(&mut self, line: std::fmt::Arguments<'_>) -> Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}

fn str_arg<'a>(action: &'a Action, key: &str) -> Result<&'a str> {
    action
        .arg(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(action, format!("expected a string `{key}`")))
}

/// Accepts JSON integers and integer strings.
fn int_arg(action: &Action, key: &str) -> Result<i64> {
    match action.arg(key) {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(action, format!("expected an integer `{key}`")))
}

fn invalid(action: &Action, reason: String) -> ClientError {
    ClientError::InvalidArgument {
        action: action.name().to_string(),
        reason,
    }
}

fn host_error(action: &Action, source: HostError) -> ClientError {
    ClientError::Host {
        action: action.name().to_string(),
        source,
    }
}

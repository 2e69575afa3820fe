//! Fake Houdini for driving the adaptor end to end.
//!
//! The child process is a small shell script. It records the environment it
//! was launched with, then copies a FIFO to its stdout until the writer
//! hangs up. The in-host half runs on a thread of the test process: a real
//! [`AdaptorClient`] executing actions against a [`ScriptedHost`] that
//! writes its console output into that FIFO, so the adaptor sees it on the
//! child's stdout exactly as it would see Houdini's.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::bail;
use houdini_adaptor::AdaptorConfig;
use houdini_adaptor::status::StatusReporter;
use houdini_adaptor::status::StatusUpdate;
use houdini_adaptor_client::AdaptorClient;
use houdini_adaptor_client::ClientError;
use houdini_adaptor_client::CommandDispatcher;
use houdini_adaptor_client::HostApplication;
use houdini_adaptor_client::HostError;
use houdini_adaptor_client::RenderRequest;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

pub const RENDER_NODE: &str = "/out/mantra1";
pub const HOUDINI_VERSION: &str = "19.5.435";

const SCRIPT: &str = "fake_hython.sh";
const CONSOLE: &str = "console";
const SERVER_PATH: &str = "server_path";
const PATHMAP: &str = "pathmap";
const SCENE: &str = "scene.hip";
const FILE_WAIT: Duration = Duration::from_secs(20);

pub struct FakeHoudini {
    dir: TempDir,
}

impl FakeHoudini {
    /// A child that relays whatever the attached client prints and exits
    /// with `exit_code` once the client lets go of the console.
    pub fn client_driven(exit_code: i32) -> anyhow::Result<Self> {
        let fake = Self::empty()?;
        let dir = fake.dir();
        mkfifo(&dir.join(CONSOLE))?;
        let body = format!(
            "printf '%s' \"$HOUDINI_PATHMAP\" > '{pathmap}'\n\
             printf '%s' \"$HOUDINI_ADAPTOR_SERVER_PATH\" > '{server_path}.tmp'\n\
             mv '{server_path}.tmp' '{server_path}'\n\
             cat '{console}'\n\
             exit {exit_code}\n",
            pathmap = dir.join(PATHMAP).display(),
            server_path = dir.join(SERVER_PATH).display(),
            console = dir.join(CONSOLE).display(),
        );
        fake.write_script(&body)?;
        Ok(fake)
    }

    /// A child whose whole behaviour is `body`. Nothing attaches to the
    /// control server.
    pub fn scripted(body: &str) -> anyhow::Result<Self> {
        let fake = Self::empty()?;
        fake.write_script(body)?;
        Ok(fake)
    }

    fn empty() -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("fake-houdini-")
            .tempdir()
            .context("fake houdini tempdir")?;
        std::fs::write(dir.path().join(SCENE), b"").context("scene file")?;
        Ok(Self { dir })
    }

    fn write_script(&self, body: &str) -> anyhow::Result<()> {
        std::fs::write(self.dir().join(SCRIPT), body).context("fake houdini script")
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn script(&self) -> PathBuf {
        self.dir().join(SCRIPT)
    }

    /// Waits for the child to create `name` next to its script.
    pub fn wait_for_marker(&self, name: &str) -> bool {
        let path = self.dir().join(name);
        wait_until(FILE_WAIT, || path.exists())
    }

    pub fn scene_file(&self) -> PathBuf {
        self.dir().join(SCENE)
    }

    pub fn init_data(&self) -> Value {
        json!({
            "scene_file": self.scene_file(),
            "render_node": RENDER_NODE,
        })
    }

    /// Runs the script through `/bin/sh` with short timeouts and fast polling.
    pub fn config(&self) -> AdaptorConfig {
        let mut config = AdaptorConfig::default();
        config.executable = PathBuf::from("/bin/sh");
        config.client_script = Some(self.script());
        config.timeouts.server_start = Duration::from_secs(10);
        config.timeouts.server_end = Duration::from_secs(5);
        config.timeouts.houdini_start = Duration::from_secs(20);
        config.timeouts.houdini_end = Duration::from_secs(10);
        config.timeouts.terminate_grace = Duration::from_secs(1);
        config.poll.server_ready = Duration::from_millis(5);
        config.poll.action_drain = Duration::from_millis(10);
        config.poll.render = Duration::from_millis(10);
        config.poll.shutdown = Duration::from_millis(10);
        config
    }

    /// `HOUDINI_PATHMAP` as the child saw it. `None` when unset or empty.
    pub fn pathmap(&self) -> Option<String> {
        std::fs::read_to_string(self.dir().join(PATHMAP))
            .ok()
            .filter(|pathmap| !pathmap.is_empty())
    }

    /// Connects `host` to the control server once the child has published
    /// its path, and polls until the adaptor sends `close`.
    pub fn attach_client(
        &self,
        mut host: ScriptedHost,
    ) -> JoinHandle<Result<ScriptedHost, ClientError>> {
        let dir = self.dir().to_path_buf();
        thread::spawn(move || {
            let server_path = wait_for_file(&dir.join(SERVER_PATH))?;
            let mut client =
                AdaptorClient::connect(&server_path)?.with_poll_interval(Duration::from_millis(5));
            // Blocks until the child's `cat` opens the other end.
            let console = OpenOptions::new().write(true).open(dir.join(CONSOLE))?;
            host.console = Some(console.try_clone()?);

            let mut dispatcher = CommandDispatcher::new(host, console);
            dispatcher.announce_version()?;
            let result = client.poll(&mut dispatcher);
            let (host, _console) = dispatcher.into_parts();
            result.map(|()| host)
        })
    }
}

fn mkfifo(path: &Path) -> anyhow::Result<()> {
    let status = Command::new("mkfifo")
        .arg(path)
        .status()
        .context("run mkfifo")?;
    if !status.success() {
        bail!("mkfifo {} failed with {status}", path.display());
    }
    Ok(())
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_file(path: &Path) -> io::Result<PathBuf> {
    let deadline = Instant::now() + FILE_WAIT;
    loop {
        if let Ok(contents) = std::fs::read_to_string(path) {
            return Ok(PathBuf::from(contents));
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} never appeared", path.display()),
            ));
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// In-process stand-in for the Houdini session the client drives.
#[derive(Debug)]
pub struct ScriptedHost {
    render_output: Vec<String>,
    failing_frame: Option<i64>,
    stalled_frame: Option<(i64, Arc<AtomicBool>)>,
    loaded_scene: Option<PathBuf>,
    rendered: Vec<i64>,
    exited: bool,
    console: Option<File>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            render_output: vec!["ALF_PROGRESS 50%".to_string()],
            failing_frame: None,
            stalled_frame: None,
            loaded_scene: None,
            rendered: Vec::new(),
            exited: false,
            console: None,
        }
    }

    /// Lines printed while each frame renders, before it is reported done.
    pub fn with_render_output(mut self, lines: &[&str]) -> Self {
        self.render_output = lines.iter().map(ToString::to_string).collect();
        self
    }

    /// Makes rendering `frame` fail, which ends the client's poll loop.
    pub fn failing_on(mut self, frame: i64) -> Self {
        self.failing_frame = Some(frame);
        self
    }

    /// Makes rendering `frame` hang after its output until `release` is set,
    /// so the frame never finishes on its own.
    pub fn stalling_on(mut self, frame: i64, release: Arc<AtomicBool>) -> Self {
        self.stalled_frame = Some((frame, release));
        self
    }

    pub fn loaded_scene(&self) -> Option<&Path> {
        self.loaded_scene.as_deref()
    }

    pub fn rendered(&self) -> &[i64] {
        &self.rendered
    }

    pub fn exited(&self) -> bool {
        self.exited
    }
}

impl HostApplication for ScriptedHost {
    fn version(&self) -> String {
        HOUDINI_VERSION.to_string()
    }

    fn load_scene(&mut self, path: &Path) -> Result<(), HostError> {
        self.loaded_scene = Some(path.to_path_buf());
        Ok(())
    }

    fn node_exists(&self, path: &str) -> bool {
        path == RENDER_NODE
    }

    fn wedge_count(&self, node: &str) -> Result<usize, HostError> {
        Err(format!("{node} is not a wedge node").into())
    }

    fn apply_wedge(&mut self, node: &str, _index: usize) -> Result<(), HostError> {
        Err(format!("{node} is not a wedge node").into())
    }

    fn set_variable(&mut self, _name: &str, _value: &str) -> Result<(), HostError> {
        Ok(())
    }

    fn render(&mut self, request: &RenderRequest) -> Result<(), HostError> {
        if let Some(console) = self.console.as_mut() {
            for line in &self.render_output {
                writeln!(console, "{line}")?;
            }
            console.flush()?;
        }
        if let Some((frame, release)) = self.stalled_frame.as_ref()
            && *frame == request.frame
        {
            wait_until(FILE_WAIT, || release.load(Ordering::SeqCst));
        }
        if self.failing_frame == Some(request.frame) {
            return Err(format!("frame {} failed to render", request.frame).into());
        }
        self.rendered.push(request.frame);
        Ok(())
    }

    fn exit(&mut self) {
        self.exited = true;
        self.console = None;
    }
}

/// Keeps every status update instead of printing it.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.updates()
            .into_iter()
            .filter_map(|update| update.progress)
            .collect()
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, update: &StatusUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update.clone());
        }
    }
}

//! Lifecycle of one Houdini render session.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use houdini_adaptor_protocol::Action;
use houdini_adaptor_protocol::CLOSE_ACTION;
use houdini_adaptor_protocol::SERVER_PATH_ENV_VAR;
use houdini_adaptor_protocol::START_RENDER_ACTION;
use indexmap::IndexMap;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::action_queue::ActionQueue;
use crate::classifier;
use crate::config::AdaptorConfig;
use crate::error::AdaptorError;
use crate::error::Result;
use crate::path_mapping::HOUDINI_PATHMAP_ENV_VAR;
use crate::path_mapping::PathMappingRule;
use crate::path_mapping::houdini_pathmap;
use crate::server::AdaptorServer;
use crate::server::ServerHandle;
use crate::session::RenderSession;
use crate::status::StatusReporter;
use crate::status::StdoutStatusReporter;
use crate::subprocess::LoggingSubprocess;
use crate::telemetry::RUNTIME_START_EVENT;
use crate::telemetry::SessionTelemetry;
use crate::validation::coerce_run_data;
use crate::validation::validate_init_data;
use crate::validation::validate_run_data;

/// Init data keys turned into startup actions, in this order.
const REQUIRED_INIT_KEYS: [&str; 2] = ["scene_file", "render_node"];
const OPTIONAL_INIT_KEYS: [&str; 3] = ["ignore_input_nodes", "wedge_node", "wedgenum"];

/// How long to let the output readers catch up once Houdini has exited, so
/// a fault it printed on the way out is not missed.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptorState {
    New,
    Starting,
    ReadyIdle,
    Rendering,
    Idle,
    Stopping,
    CleanedUp,
    Cancelled,
}

type HoudiniSlot = Arc<Mutex<Option<Arc<LoggingSubprocess>>>>;

/// Drives Houdini headlessly: starts it with the in-host client, feeds it
/// actions through the control server and watches its output.
#[derive(Debug)]
pub struct HoudiniAdaptor {
    init_data: Value,
    config: AdaptorConfig,
    path_mapping_rules: Vec<PathMappingRule>,
    session: Arc<RenderSession>,
    queue: Arc<ActionQueue>,
    server: Option<ServerHandle>,
    houdini: HoudiniSlot,
    state: Arc<Mutex<AdaptorState>>,
    telemetry: SessionTelemetry,
}

impl HoudiniAdaptor {
    pub fn new(init_data: Value, config: AdaptorConfig) -> Self {
        Self::with_reporter(init_data, config, Arc::new(StdoutStatusReporter))
    }

    pub fn with_reporter(
        init_data: Value,
        config: AdaptorConfig,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        let path_mapping_rules = config.path_mapping_rules.clone();
        Self {
            init_data,
            config,
            path_mapping_rules,
            session: Arc::new(RenderSession::new(reporter)),
            queue: Arc::new(ActionQueue::new()),
            server: None,
            houdini: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(AdaptorState::New)),
            telemetry: SessionTelemetry::new(),
        }
    }

    /// Adds rules on top of the ones from the config file.
    pub fn with_path_mapping_rules(mut self, rules: Vec<PathMappingRule>) -> Self {
        self.path_mapping_rules.extend(rules);
        self
    }

    pub fn state(&self) -> AdaptorState {
        *lock(&self.state)
    }

    pub fn session(&self) -> &Arc<RenderSession> {
        &self.session
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn telemetry(&self) -> &SessionTelemetry {
        &self.telemetry
    }

    pub fn houdini_version(&self) -> String {
        self.session.houdini_version()
    }

    /// Socket path of the control server, once it is up.
    pub fn server_path(&self) -> Option<&Path> {
        self.server.as_ref().and_then(ServerHandle::address)
    }

    pub fn houdini_is_running(&self) -> bool {
        self.houdini().is_some_and(|houdini| houdini.is_running())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            houdini: Arc::clone(&self.houdini),
            state: Arc::clone(&self.state),
        }
    }

    /// Validates the init data, starts the control server and Houdini, and
    /// waits until Houdini has consumed every startup action.
    pub fn on_start(&mut self) -> Result<()> {
        validate_init_data(&self.init_data)?;
        let actions = startup_actions(&self.init_data)?;
        self.transition(AdaptorState::Starting);
        let client_script = self.config.resolve_client_script()?;
        let strict_error_checking = self
            .init_data
            .get("strict_error_checking")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        self.session
            .update_status(Some(0.0), Some("Initializing Houdini".to_string()));
        let server_path = self.start_server()?;
        for action in actions {
            self.queue.enqueue(action);
        }
        let houdini = self.start_houdini(&server_path, &client_script, strict_error_checking)?;

        let timeout = self.config.timeouts.houdini_start;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(err) = self.session.check_fatal() {
                return Err(err);
            }
            if !houdini.is_running() {
                houdini.join_readers(READER_DRAIN_TIMEOUT);
                if let Some(err) = self.session.check_fatal() {
                    return Err(err);
                }
                break;
            }
            if self.queue.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(AdaptorError::StartupTimeout { timeout });
            }
            thread::sleep(self.config.poll.action_drain);
        }

        self.telemetry
            .set_houdini_version(&self.session.houdini_version());
        self.telemetry
            .record_event(RUNTIME_START_EVENT, IndexMap::new());

        if !self.queue.is_empty() {
            debug!(pending = ?self.queue.pending_names(), "startup actions left behind");
            return Err(AdaptorError::StartupFailed);
        }
        self.transition(AdaptorState::ReadyIdle);
        Ok(())
    }

    /// Renders one frame and blocks until Houdini reports completion.
    pub fn on_run(&mut self, run_data: Value) -> Result<()> {
        let Some(houdini) = self.houdini().filter(|houdini| houdini.is_running()) else {
            return Err(AdaptorError::NotRunning);
        };
        let run_data = coerce_run_data(run_data);
        validate_run_data(&run_data)?;
        let frame = run_data.get("frame").cloned().unwrap_or(Value::Null);

        self.transition(AdaptorState::Rendering);
        // Raised before queueing so a quick "Finished Rendering" is not lost.
        self.session.set_rendering(true);
        self.queue.enqueue(Action::keyed("frame", frame.clone()));
        let mut render_args = Map::new();
        render_args.insert("frame".to_string(), frame);
        self.queue
            .enqueue(Action::with_args(START_RENDER_ACTION, render_args));

        loop {
            if let Some(err) = self.session.check_fatal() {
                self.session.set_rendering(false);
                return Err(err);
            }
            if !self.session.is_rendering() || !houdini.is_running() {
                break;
            }
            thread::sleep(self.config.poll.render);
        }

        if !houdini.is_running() {
            // The client should still be waiting for the next task.
            self.session.set_rendering(false);
            houdini.join_readers(READER_DRAIN_TIMEOUT);
            if let Some(err) = self.session.check_fatal() {
                return Err(err);
            }
            let exit_code = houdini.exit_code().unwrap_or(-1);
            let mut details = IndexMap::new();
            details.insert("exit_code".to_string(), Value::from(exit_code));
            details.insert("exception_scope".to_string(), Value::from("on_run"));
            self.telemetry.record_error(details, "UnexpectedExit");
            return Err(AdaptorError::UnexpectedExit { exit_code });
        }

        self.transition(AdaptorState::Idle);
        Ok(())
    }

    /// Asks the client to close Houdini. Does not wait.
    pub fn on_stop(&mut self) {
        self.transition(AdaptorState::Stopping);
        self.queue.enqueue(Action::new(CLOSE_ACTION).at_front());
    }

    /// Shuts Houdini and the control server down. Problems are logged, never
    /// returned.
    pub fn on_cleanup(&mut self) {
        self.session.set_performing_cleanup(true);
        self.queue.enqueue(Action::new(CLOSE_ACTION).at_front());

        if let Some(houdini) = self.houdini() {
            let deadline = Instant::now() + self.config.timeouts.houdini_end;
            while houdini.is_running() && Instant::now() < deadline {
                thread::sleep(self.config.poll.shutdown);
            }
            if houdini.is_running() {
                error!(
                    "Houdini did not complete cleanup actions and failed to gracefully shutdown. \
                     Terminating."
                );
                houdini.terminate(self.config.timeouts.terminate_grace);
            }
            houdini.join_readers(READER_DRAIN_TIMEOUT);
        }

        if let Some(server) = self.server.take() {
            server.shutdown();
            if !server.join(self.config.timeouts.server_end) {
                error!("Failed to shutdown the Houdini Adaptor server.");
            }
        }

        self.session.set_performing_cleanup(false);
        self.transition(AdaptorState::CleanedUp);
    }

    /// Kills Houdini immediately, bypassing the action queue.
    pub fn on_cancel(&self) {
        self.cancel_handle().cancel();
    }

    fn start_server(&mut self) -> Result<PathBuf> {
        let server = AdaptorServer::new(Arc::clone(&self.queue), Arc::clone(&self.session))
            .with_socket_dir(self.config.socket_dir.clone())
            .spawn()?;
        let server = self.server.insert(server);

        let deadline = Instant::now() + self.config.timeouts.server_start;
        loop {
            if let Some(path) = server.address() {
                return Ok(path.to_path_buf());
            }
            if server.is_finished() {
                let cause = server
                    .take_error()
                    .unwrap_or_else(|| io::Error::other("server thread exited before binding"));
                return Err(AdaptorError::ServerFailed(cause));
            }
            if Instant::now() >= deadline {
                return Err(AdaptorError::ServerStartTimeout);
            }
            thread::sleep(self.config.poll.server_ready);
        }
    }

    fn start_houdini(
        &self,
        server_path: &Path,
        client_script: &Path,
        strict_error_checking: bool,
    ) -> Result<Arc<LoggingSubprocess>> {
        let handler = classifier::output_handler(&self.session, strict_error_checking)?;

        let mut command = Command::new(&self.config.executable);
        command.arg(client_script);
        command.env(SERVER_PATH_ENV_VAR, server_path);
        let pathmap = houdini_pathmap(&self.path_mapping_rules);
        info!(
            "Setting HOUDINI_PATHMAP to: {}",
            pathmap.as_deref().unwrap_or_default()
        );
        if let Some(pathmap) = pathmap {
            command.env(HOUDINI_PATHMAP_ENV_VAR, pathmap);
        }

        let houdini = LoggingSubprocess::spawn(command, Arc::new(handler))
            .map_err(|err| AdaptorError::spawn(self.config.executable.clone(), err))?;
        let houdini = Arc::new(houdini);
        *lock(&self.houdini) = Some(Arc::clone(&houdini));
        Ok(houdini)
    }

    fn houdini(&self) -> Option<Arc<LoggingSubprocess>> {
        lock(&self.houdini).clone()
    }

    fn transition(&self, next: AdaptorState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!("adaptor state {:?} -> {next:?}", *state);
            *state = next;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_server_handle(&mut self, server: ServerHandle) {
        self.server = Some(server);
    }
}

impl Drop for HoudiniAdaptor {
    fn drop(&mut self) {
        if let Some(server) = self.server.as_ref() {
            server.shutdown();
        }
    }
}

/// Cancels the session from another thread, e.g. a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    houdini: HoudiniSlot,
    state: Arc<Mutex<AdaptorState>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        info!("CANCEL REQUESTED");
        let houdini = lock(&self.houdini).clone();
        match houdini {
            Some(houdini) if houdini.is_running() => {
                houdini.terminate(Duration::ZERO);
                let mut state = lock(&self.state);
                debug!("adaptor state {:?} -> {:?}", *state, AdaptorState::Cancelled);
                *state = AdaptorState::Cancelled;
            }
            _ => info!("Nothing to cancel because Houdini is not running"),
        }
    }
}

fn startup_actions(init_data: &Value) -> Result<Vec<Action>> {
    let mut actions = Vec::with_capacity(REQUIRED_INIT_KEYS.len() + OPTIONAL_INIT_KEYS.len());
    for name in REQUIRED_INIT_KEYS {
        let value = init_data
            .get(name)
            .ok_or(AdaptorError::MissingInitField(name))?;
        actions.push(Action::keyed(name, value.clone()));
    }
    for name in OPTIONAL_INIT_KEYS {
        if let Some(value) = init_data.get(name) {
            actions.push(Action::keyed(name, value.clone()));
        }
    }
    Ok(actions)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

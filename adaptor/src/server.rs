//! Control server the in-host client polls for actions.

use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use houdini_adaptor_protocol::ClientRequest;
use houdini_adaptor_protocol::ServerResponse;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::action_queue::ActionQueue;
use crate::session::RenderSession;

const SOCKET_NAME: &str = "adaptor.sock";
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Serves the action queue and status updates over a Unix socket.
#[derive(Debug, Clone)]
pub struct AdaptorServer {
    queue: Arc<ActionQueue>,
    session: Arc<RenderSession>,
    socket_dir: Option<PathBuf>,
    address: Arc<OnceLock<PathBuf>>,
    shutdown: Arc<AtomicBool>,
}

impl AdaptorServer {
    pub fn new(queue: Arc<ActionQueue>, session: Arc<RenderSession>) -> Self {
        Self {
            queue,
            session,
            socket_dir: None,
            address: Arc::new(OnceLock::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the socket's temporary directory under `dir` instead of the
    /// system temp directory.
    pub fn with_socket_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.socket_dir = dir;
        self
    }

    /// Starts serving on a dedicated thread. The socket path is published on
    /// the returned handle once the listener is bound.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let address = Arc::clone(&self.address);
        let shutdown = Arc::clone(&self.shutdown);
        let thread = thread::Builder::new()
            .name("HoudiniAdaptorServerThread".to_string())
            .spawn(move || {
                let result = self.serve_forever();
                if let Err(err) = result.as_ref() {
                    error!("adaptor server stopped: {err}");
                }
                result
            })?;
        Ok(ServerHandle {
            address,
            shutdown,
            thread: Some(thread),
        })
    }

    fn serve_forever(&self) -> io::Result<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("houdini-adaptor-");
        let socket_dir = match self.socket_dir.as_deref() {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        let path = socket_dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        info!("adaptor server listening on {}", path.display());
        let _ = self.address.set(path);

        while !self.is_shutting_down() {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = self.serve_connection(stream) {
                        warn!("control connection failed: {err}");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        debug!("adaptor server shut down");
        // Dropping `socket_dir` removes the socket file.
        Ok(())
    }

    fn serve_connection(&self, stream: UnixStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        while !self.is_shutting_down() {
            // On a timeout `read_until` keeps the partial line in `buf`.
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) if buf.ends_with(b"\n") => {
                    let response = self.handle_request_line(&buf);
                    buf.clear();
                    let mut line = serde_json::to_vec(&response).map_err(io::Error::other)?;
                    line.push(b'\n');
                    writer.write_all(&line)?;
                    writer.flush()?;
                }
                // EOF in the middle of a line.
                Ok(_) => return Ok(()),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn handle_request_line(&self, line: &[u8]) -> ServerResponse {
        match serde_json::from_slice::<ClientRequest>(line) {
            Ok(request) => self.handle_request(request),
            Err(err) => {
                warn!("malformed control request: {err}");
                ServerResponse::error(format!("malformed request: {err}"))
            }
        }
    }

    pub(crate) fn handle_request(&self, request: ClientRequest) -> ServerResponse {
        match request {
            ClientRequest::NextAction => {
                let action = self.queue.dequeue();
                if let Some(action) = action.as_ref() {
                    debug!(action = action.name(), "handing action to client");
                }
                ServerResponse::Action { action }
            }
            ClientRequest::ReportStatus {
                progress,
                status_message,
            } => {
                self.session.update_status(progress, status_message);
                ServerResponse::Ack
            }
            ClientRequest::ActionCompleted { name } => {
                debug!(action = %name, "client completed action");
                ServerResponse::Ack
            }
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Owner-side handle of a running [`AdaptorServer`].
#[derive(Debug)]
pub struct ServerHandle {
    address: Arc<OnceLock<PathBuf>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl ServerHandle {
    /// Socket path, once the server has bound it.
    pub fn address(&self) -> Option<&Path> {
        self.address.get().map(PathBuf::as_path)
    }

    /// Asks the serve loop to stop. Does not wait.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Reaps a server thread that has already stopped and returns the error
    /// it stopped with, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        if !self.thread.as_ref().is_some_and(JoinHandle::is_finished) {
            return None;
        }
        match self.thread.take()?.join() {
            Ok(result) => result.err(),
            Err(_) => Some(io::Error::other("adaptor server thread panicked")),
        }
    }

    /// Waits up to `timeout` for the server thread to exit. Returns `false`
    /// if it is still running, in which case the thread is left detached.
    pub fn join(mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("adaptor server thread panicked");
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn from_thread(thread: JoinHandle<io::Result<()>>) -> Self {
        Self {
            address: Arc::new(OnceLock::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: Some(thread),
        }
    }
}

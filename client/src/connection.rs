use std::ffi::OsString;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use houdini_adaptor_protocol::Action;
use houdini_adaptor_protocol::ClientRequest;
use houdini_adaptor_protocol::SERVER_PATH_ENV_VAR;
use houdini_adaptor_protocol::ServerResponse;
use tracing::debug;
use tracing::info;

use crate::dispatcher::CommandDispatcher;
use crate::dispatcher::Dispatch;
use crate::error::ClientError;
use crate::error::Result;
use crate::host::HostApplication;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Validates the server path taken from `HOUDINI_ADAPTOR_SERVER_PATH`.
pub fn resolve_server_path(value: Option<OsString>) -> Result<PathBuf> {
    let path = PathBuf::from(value.ok_or(ClientError::MissingServerPath)?);
    if !path.exists() {
        return Err(ClientError::SocketNotFound(path));
    }
    Ok(path)
}

/// Connection to the adaptor's control server.
#[derive(Debug)]
pub struct AdaptorClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    poll_interval: Duration,
}

impl AdaptorClient {
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        let writer = stream.try_clone()?;
        debug!("connected to adaptor server at {}", path.display());
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn from_env() -> Result<Self> {
        let path = resolve_server_path(std::env::var_os(SERVER_PATH_ENV_VAR))?;
        Self::connect(&path)
    }

    /// How long to wait before asking again when the queue is empty.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn next_action(&mut self) -> Result<Option<Action>> {
        match self.request(&ClientRequest::NextAction)? {
            ServerResponse::Action { action } => Ok(action),
            other => Err(unexpected(&other)),
        }
    }

    pub fn report_status(
        &mut self,
        progress: Option<f64>,
        status_message: Option<String>,
    ) -> Result<()> {
        self.expect_ack(&ClientRequest::ReportStatus {
            progress,
            status_message,
        })
    }

    pub fn action_completed(&mut self, name: &str) -> Result<()> {
        self.expect_ack(&ClientRequest::ActionCompleted {
            name: name.to_string(),
        })
    }

    /// Executes actions until the adaptor sends `close`, then exits the host.
    /// A failing action ends the loop with its error.
    pub fn poll<H, W>(&mut self, dispatcher: &mut CommandDispatcher<H, W>) -> Result<()>
    where
        H: HostApplication,
        W: Write,
    {
        loop {
            let Some(action) = self.next_action()? else {
                thread::sleep(self.poll_interval);
                continue;
            };
            debug!(action = action.name(), "running action");
            let outcome = dispatcher.dispatch(&action)?;
            self.action_completed(action.name())?;
            if outcome == Dispatch::Close {
                info!("close requested, exiting host application");
                dispatcher.close();
                return Ok(());
            }
        }
    }

    fn expect_ack(&mut self, request: &ClientRequest) -> Result<()> {
        match self.request(request)? {
            ServerResponse::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn request(&mut self, request: &ClientRequest) -> Result<ServerResponse> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .and_then(|()| self.writer.flush())
            .map_err(disconnected)?;

        let mut response = String::new();
        if self.reader.read_line(&mut response).map_err(disconnected)? == 0 {
            return Err(ClientError::Disconnected);
        }
        match serde_json::from_str(&response)? {
            ServerResponse::Error { message } => Err(ClientError::Server(message)),
            response => Ok(response),
        }
    }
}

fn disconnected(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => ClientError::Disconnected,
        _ => ClientError::Io(err),
    }
}

fn unexpected(response: &ServerResponse) -> ClientError {
    ClientError::UnexpectedResponse(format!("{response:?}"))
}

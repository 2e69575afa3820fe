use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::process::Child;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use tracing::info;
use tracing::warn;

const EXIT_CODE_SIGNAL_BASE: i32 = 128; // conventional shell: 128 + signal
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Receives every line the child writes, on the reader thread of the stream
/// that produced it.
pub trait OutputHandler: Send + Sync {
    fn handle_line(&self, stream: OutputStream, line: &str);
}

/// A child process whose stdout and stderr are read line by line on two
/// dedicated threads, logged, and handed to an [`OutputHandler`].
#[derive(Debug)]
pub struct LoggingSubprocess {
    pid: u32,
    child: Mutex<Child>,
    exit_status: OnceLock<ExitStatus>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl LoggingSubprocess {
    /// Spawns `command` with stdin closed and both output streams piped.
    pub fn spawn(mut command: Command, handler: Arc<dyn OutputHandler>) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_parent_death_signal(&mut command);

        let mut child = command.spawn()?;
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout pipe was unexpectedly not available"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr pipe was unexpectedly not available"))?;

        let readers = vec![
            spawn_reader(pid, OutputStream::Stdout, stdout, Arc::clone(&handler))?,
            spawn_reader(pid, OutputStream::Stderr, stderr, handler)?,
        ];
        info!(pid, "started {:?}", command.get_program());

        Ok(Self {
            pid,
            child: Mutex::new(child),
            exit_status: OnceLock::new(),
            readers: Mutex::new(readers),
        })
    }

    /// True until the process has been observed to exit.
    pub fn is_running(&self) -> bool {
        if self.exit_status.get().is_some() {
            return false;
        }
        let mut child = self.lock_child();
        self.poll_exit(&mut child).is_none()
    }

    /// Exit code once the process has exited. A death by signal maps to
    /// `128 + signal`.
    pub fn exit_code(&self) -> Option<i32> {
        if self.exit_status.get().is_none() {
            let mut child = self.lock_child();
            self.poll_exit(&mut child);
        }
        self.exit_status.get().map(|status| exit_code_of(*status))
    }

    /// Stops the process. A zero `grace` kills immediately; otherwise SIGTERM
    /// is sent first and SIGKILL follows once `grace` has elapsed. The child
    /// is reaped before returning.
    pub fn terminate(&self, grace: Duration) {
        if grace.is_zero() {
            self.kill_and_reap();
            return;
        }

        {
            let mut child = self.lock_child();
            if self.poll_exit(&mut child).is_some() {
                return;
            }
            send_sigterm(self.pid);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_running() {
                return;
            }
            thread::sleep(TERMINATE_POLL_INTERVAL);
        }
        warn!(
            pid = self.pid,
            "process did not exit within {grace:?} of SIGTERM, killing"
        );
        self.kill_and_reap();
    }

    /// Waits for both reader threads to drain their pipes. Returns `false`
    /// when `timeout` elapsed first; the remaining readers are left detached.
    pub fn join_readers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        while readers.iter().any(|reader| !reader.is_finished()) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(TERMINATE_POLL_INTERVAL);
        }
        for reader in readers.drain(..) {
            if reader.join().is_err() {
                warn!(pid = self.pid, "output reader panicked");
            }
        }
        true
    }

    fn kill_and_reap(&self) {
        let mut child = self.lock_child();
        if self.poll_exit(&mut child).is_some() {
            return;
        }
        if let Err(err) = child.kill() {
            warn!(pid = self.pid, "failed to kill process: {err}");
        }
        match child.wait() {
            Ok(status) => {
                let _ = self.exit_status.set(status);
            }
            Err(err) => warn!(pid = self.pid, "failed to reap process: {err}"),
        }
    }

    fn poll_exit(&self, child: &mut Child) -> Option<ExitStatus> {
        if let Some(status) = self.exit_status.get() {
            return Some(*status);
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(
                    pid = self.pid,
                    exit_code = exit_code_of(status),
                    "process exited"
                );
                let _ = self.exit_status.set(status);
                Some(status)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(pid = self.pid, "failed to poll process status: {err}");
                None
            }
        }
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LoggingSubprocess {
    fn drop(&mut self) {
        if self.exit_status.get().is_none() {
            self.kill_and_reap();
        }
    }
}

fn spawn_reader<R>(
    pid: u32,
    stream: OutputStream,
    pipe: R,
    handler: Arc<dyn OutputHandler>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("houdini-{}", stream.as_str()))
        .spawn(move || read_lines(pid, stream, pipe, handler.as_ref()))
}

fn read_lines<R: Read>(pid: u32, stream: OutputStream, pipe: R, handler: &dyn OutputHandler) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                info!(
                    target: "houdini_adaptor::subprocess",
                    pid,
                    stream = stream.as_str(),
                    "{line}"
                );
                handler.handle_line(stream, line);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(pid, stream = stream.as_str(), "failed to read output: {err}");
                break;
            }
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return EXIT_CODE_SIGNAL_BASE + signal;
            }
        }
        -1
    })
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: the child has not been reaped (checked under the child lock),
    // so `pid` still names our own process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, "failed to send SIGTERM: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

/// On Linux the child receives SIGTERM when the adaptor dies, and exits at
/// once if the adaptor is already gone by the time the hook runs.
#[cfg(target_os = "linux")]
fn set_parent_death_signal(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: getpid is async-signal-safe.
    let parent_pid = unsafe { libc::getpid() };
    // SAFETY: the hook only calls async-signal-safe libc functions.
    unsafe {
        command.pre_exec(move || {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::getppid() != parent_pid {
                libc::raise(libc::SIGTERM);
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal(_command: &mut Command) {}

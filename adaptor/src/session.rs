use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::warn;

use crate::error::AdaptorError;
use crate::error::RenderFault;
use crate::status::StatusReporter;
use crate::status::StatusUpdate;

/// State shared between the main thread, the output reader threads and the
/// control server thread for a single adaptor session.
pub struct RenderSession {
    is_rendering: AtomicBool,
    /// Set at most once; the first fatal condition wins.
    fault: OnceLock<RenderFault>,
    performing_cleanup: AtomicBool,
    houdini_version: Mutex<String>,
    status: Mutex<StatusUpdate>,
    reporter: Arc<dyn StatusReporter>,
}

impl std::fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSession")
            .field("is_rendering", &self.is_rendering())
            .field("fault", &self.fault.get())
            .field("performing_cleanup", &self.is_performing_cleanup())
            .field("houdini_version", &self.houdini_version())
            .finish_non_exhaustive()
    }
}

impl RenderSession {
    pub fn new(reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            is_rendering: AtomicBool::new(false),
            fault: OnceLock::new(),
            performing_cleanup: AtomicBool::new(false),
            houdini_version: Mutex::new(String::new()),
            status: Mutex::new(StatusUpdate::default()),
            reporter,
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.is_rendering.load(Ordering::SeqCst)
    }

    pub fn set_rendering(&self, rendering: bool) {
        self.is_rendering.store(rendering, Ordering::SeqCst);
    }

    /// Stages `fault` for the main thread. Returns `false` when an earlier
    /// fault is already pending, in which case `fault` is dropped.
    pub fn stage_fault(&self, fault: RenderFault) -> bool {
        match self.fault.set(fault) {
            Ok(()) => true,
            Err(dropped) => {
                debug!("ignoring fault, one is already pending: {dropped}");
                false
            }
        }
    }

    /// Poll-point check used by every wait loop on the main thread.
    ///
    /// A staged fault is handed back as an error unless cleanup is running,
    /// in which case cleanup is allowed to finish undisturbed.
    pub fn check_fatal(&self) -> Option<AdaptorError> {
        if self.is_performing_cleanup() {
            return None;
        }
        self.fault.get().cloned().map(AdaptorError::from)
    }

    /// Guard for output handlers: true when a fault is pending and handlers
    /// must do nothing.
    pub fn should_skip_handlers(&self) -> bool {
        self.fault.get().is_some() && !self.is_performing_cleanup()
    }

    pub fn is_performing_cleanup(&self) -> bool {
        self.performing_cleanup.load(Ordering::SeqCst)
    }

    pub fn set_performing_cleanup(&self, value: bool) {
        self.performing_cleanup.store(value, Ordering::SeqCst);
    }

    pub fn houdini_version(&self) -> String {
        self.houdini_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_houdini_version(&self, version: String) {
        *self
            .houdini_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = version;
    }

    /// Records the update and forwards it to the reporter.
    pub fn update_status(&self, progress: Option<f64>, status_message: Option<String>) {
        let update = StatusUpdate {
            progress,
            status_message,
        };
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(progress) = update.progress {
                if !(0.0..=100.0).contains(&progress) {
                    warn!(progress, "progress outside of 0..=100");
                }
                status.progress = Some(progress);
            }
            if let Some(message) = update.status_message.as_ref() {
                status.status_message = Some(message.clone());
            }
        }
        self.reporter.report(&update);
    }

    /// Latest known progress and status message.
    pub fn status(&self) -> StatusUpdate {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use houdini_adaptor_protocol::Action;
use houdini_adaptor_protocol::ActionPriority;

/// Pending actions waiting for the client to pick them up.
///
/// Producers are the main thread (startup and per-task actions, stop and
/// cleanup) and the control server thread; the client drains it through the
/// server. Every read and mutation goes through the same lock.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Mutex<VecDeque<Action>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `action`, or puts it at the head when it was built with
    /// [`Action::at_front`].
    pub fn enqueue(&self, action: Action) {
        let mut actions = self.lock();
        match action.priority() {
            ActionPriority::Normal => actions.push_back(action),
            ActionPriority::Front => actions.push_front(action),
        }
    }

    pub fn dequeue(&self) -> Option<Action> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Names of the queued actions, head first.
    pub fn pending_names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|action| action.name().to_string())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Action>> {
        // A panicking producer cannot leave the deque half-modified.
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

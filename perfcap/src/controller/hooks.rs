//! Consumer notification hooks
//!
//! The state machine never calls a hook directly. It queues a
//! [`Notification`] while holding the session lock, and a single notifier
//! task drains the queue and invokes the hooks outside the lock. Queue order
//! is transition order, and hooks are free to call back into the controller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::State;

type StateHook = Arc<dyn Fn(State) + Send + Sync>;
type ChunkHook = Arc<dyn Fn(&[u8], bool) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    StateChanged(State),
    Chunk { data: Vec<u8>, is_last: bool },
    Error(String),
}

#[derive(Default, Clone)]
pub(crate) struct Hooks {
    pub state: Option<StateHook>,
    pub chunk: Option<ChunkHook>,
    pub error: Option<ErrorHook>,
}

pub(crate) fn lock_hooks(hooks: &Mutex<Hooks>) -> MutexGuard<'_, Hooks> {
    hooks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Hooks {
    fn deliver(&self, notification: Notification) {
        match notification {
            Notification::StateChanged(state) => {
                if let Some(hook) = &self.state {
                    hook(state);
                }
            }
            Notification::Chunk { data, is_last } => {
                if let Some(hook) = &self.chunk {
                    hook(&data, is_last);
                }
            }
            Notification::Error(message) => {
                if let Some(hook) = &self.error {
                    hook(&message);
                }
            }
        }
    }
}

/// Spawn the task that feeds notifications to `hooks`, in order
///
/// The task ends once every sender is dropped.
pub(crate) fn spawn_notifier(
    runtime: &Handle,
    hooks: Arc<Mutex<Hooks>>,
) -> mpsc::UnboundedSender<Notification> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    runtime.spawn(async move {
        while let Some(notification) = rx.recv().await {
            // Clone out so a hook may replace hooks without deadlocking
            let current = lock_hooks(&hooks).clone();
            current.deliver(notification);
        }
    });
    tx
}

//! Session deadlines
//!
//! One slot per [`TimerKind`]. Arming a kind that is already armed replaces
//! (and cancels) the previous instance. Each instance carries a
//! [`TimerToken`]; a fire is only honoured when its token still matches the
//! armed slot, so a fire that raced with a cancel is discarded.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// The four deadlines a session can have armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Attach,
    Flush,
    DumpWait,
    Duration,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] =
        [TimerKind::Attach, TimerKind::Flush, TimerKind::DumpWait, TimerKind::Duration];

    fn index(self) -> usize {
        match self {
            TimerKind::Attach => 0,
            TimerKind::Flush => 1,
            TimerKind::DumpWait => 2,
            TimerKind::Duration => 3,
        }
    }
}

/// Identity of one armed timer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(u64);

struct ArmedTimer {
    token: TimerToken,
    task: JoinHandle<()>,
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Timers {
    slots: [Option<ArmedTimer>; 4],
    next_token: u64,
}

impl Default for Timers {
    fn default() -> Self {
        Self { slots: [None, None, None, None], next_token: 0 }
    }
}

impl Timers {
    /// Arm `kind` to call `on_fire` after `delay`, replacing any armed instance
    pub fn arm<F>(&mut self, runtime: &Handle, kind: TimerKind, delay: Duration, on_fire: F)
    where
        F: FnOnce(TimerToken) + Send + 'static,
    {
        self.cancel(kind);
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(token);
        });
        self.slots[kind.index()] = Some(ArmedTimer { token, task });
    }

    /// Cancel `kind`; returns whether it was armed
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.slots[kind.index()].take().is_some()
    }

    pub fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            slot.take();
        }
    }

    /// Disarm `kind` if `token` is the instance currently armed
    ///
    /// Returns false for a stale fire (cancelled or replaced in the meantime).
    pub fn claim(&mut self, kind: TimerKind, token: TimerToken) -> bool {
        let slot = &mut self.slots[kind.index()];
        if slot.as_ref().is_some_and(|armed| armed.token == token) {
            slot.take();
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Kinds currently armed
    pub fn armed(&self) -> Vec<TimerKind> {
        TimerKind::ALL.into_iter().filter(|kind| self.is_armed(*kind)).collect()
    }
}

//! Lifecycle states and the read-only session snapshot

use std::fmt;

use super::timers::TimerKind;

/// Lifecycle state of the tracing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Idle,
    Attaching,
    Tracing,
    Stopping,
    Flushing,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Attaching => "attaching",
            State::Tracing => "tracing",
            State::Stopping => "stopping",
            State::Flushing => "flushing",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the controller's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: State,
    pub generation: u64,
    pub has_target: bool,
    pub has_stream: bool,
    pub armed_timers: Vec<TimerKind>,
    pub memory_dump_pending: bool,
    pub duration_pending: bool,
    pub chunks_delivered: usize,
    pub bytes_delivered: usize,
}

impl SessionSnapshot {
    /// Whether the target/stream invariants hold for this snapshot
    pub fn is_consistent(&self) -> bool {
        let target_ok = self.has_target == (self.state != State::Idle);
        let stream_ok = self.has_stream == (self.state == State::Flushing);
        let timers_ok = self.state != State::Idle || self.armed_timers.is_empty();
        target_ok && stream_ok && timers_ok
    }
}

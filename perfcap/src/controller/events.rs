//! Inputs of the state machine
//!
//! Every completion of work the controller scheduled is tagged with the
//! generation it was issued under. Transport events are not: they are matched
//! against the attached session instead.

use serde_json::Value;

use super::timers::{TimerKind, TimerToken};
use crate::domain::{AttachError, Generation, SessionId, TargetId, TransportError};
use crate::transport::TransportEvent;

#[derive(Debug)]
pub(crate) enum Event {
    Attached { generation: Generation, result: Result<SessionId, AttachError> },
    TargetCreated { generation: Generation, result: Result<TargetId, TransportError> },
    TracingStarted { generation: Generation, result: Result<Value, TransportError> },
    MemoryDumped { generation: Generation, result: Result<Value, TransportError> },
    ChunkRead { generation: Generation, result: Result<Value, TransportError> },
    TimerFired { generation: Generation, kind: TimerKind, token: TimerToken },
    Transport(TransportEvent),
}

impl Event {
    /// Generation the event belongs to, None for transport events
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Event::Attached { generation, .. }
            | Event::TargetCreated { generation, .. }
            | Event::TracingStarted { generation, .. }
            | Event::MemoryDumped { generation, .. }
            | Event::ChunkRead { generation, .. }
            | Event::TimerFired { generation, .. } => Some(*generation),
            Event::Transport(_) => None,
        }
    }
}

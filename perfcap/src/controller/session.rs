//! Per-session fields owned by the controller

use super::state::{SessionSnapshot, State};
use super::timers::Timers;
use crate::domain::{Generation, SessionId, StreamHandle, TargetId};

/// How the debuggable target is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetKind {
    /// The caller's own context
    Own,
    /// A fresh background target created for this session
    Ephemeral,
}

/// The endpoint a session is bound to, filled in as the attach progresses
#[derive(Debug)]
pub(crate) struct AttachedTarget {
    pub kind: TargetKind,
    /// Set once an ephemeral target has been created
    pub target_id: Option<TargetId>,
    /// Set once the attach succeeded
    pub session: Option<SessionId>,
}

impl AttachedTarget {
    pub fn new(kind: TargetKind) -> Self {
        Self { kind, target_id: None, session: None }
    }
}

#[derive(Default)]
pub(crate) struct Session {
    pub state: State,
    pub generation: Generation,
    /// Some iff `state != Idle`
    pub target: Option<AttachedTarget>,
    /// Whether the fallback strategy is in use (no further conflict retries)
    pub on_fallback: bool,
    pub memory_dump_pending: bool,
    pub duration_pending: bool,
    /// Some iff `state == Flushing`
    pub stream: Option<StreamHandle>,
    pub timers: Timers,
    pub chunks_delivered: usize,
    pub bytes_delivered: usize,
}

impl Session {
    /// Reset every per-session field and enter a new generation
    pub fn begin(&mut self, kind: TargetKind) {
        self.generation = self.generation.next();
        self.target = Some(AttachedTarget::new(kind));
        self.on_fallback = kind == TargetKind::Ephemeral;
        self.memory_dump_pending = false;
        self.duration_pending = false;
        self.stream = None;
        self.timers.cancel_all();
        self.chunks_delivered = 0;
        self.bytes_delivered = 0;
    }

    pub fn attached_session(&self) -> Option<&SessionId> {
        self.target.as_ref().and_then(|target| target.session.as_ref())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            generation: self.generation.0,
            has_target: self.target.is_some(),
            has_stream: self.stream.is_some(),
            armed_timers: self.timers.armed(),
            memory_dump_pending: self.memory_dump_pending,
            duration_pending: self.duration_pending,
            chunks_delivered: self.chunks_delivered,
            bytes_delivered: self.bytes_delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_resets_session() {
        let mut session = Session {
            chunks_delivered: 4,
            bytes_delivered: 4096,
            memory_dump_pending: true,
            ..Session::default()
        };
        session.begin(TargetKind::Own);

        assert_eq!(session.generation, Generation(1));
        assert_eq!(session.chunks_delivered, 0);
        assert_eq!(session.bytes_delivered, 0);
        assert!(!session.memory_dump_pending);
        assert!(!session.on_fallback);
        assert_eq!(session.attached_session(), None);
    }

    #[test]
    fn test_begin_on_fallback() {
        let mut session = Session::default();
        session.begin(TargetKind::Ephemeral);
        assert!(session.on_fallback);
        assert_eq!(session.target.as_ref().map(|t| t.kind), Some(TargetKind::Ephemeral));
    }
}

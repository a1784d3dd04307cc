//! # Tracing-Session Controller
//!
//! Drives one trace capture at a time through the debugging protocol:
//!
//! ```text
//!  start() ──▶ Attaching ──▶ Tracing ──▶ Stopping ──▶ Flushing ──▶ Idle
//!                 │  ▲          │           │            │
//!                 │  └conflict  │ duration  │ Tracing.   │ IO.read ×N
//!                 │   (once)    │ + dump    │ tracing-   │ until eof
//!                 ▼             ▼           │ Complete   │
//!                Idle ◀──── abort() / detach / fatal error ◀┘
//! ```
//!
//! ## Concurrency
//!
//! All session fields sit behind one mutex and every input goes through
//! [`Shared::dispatch`], so transitions happen one event at a time. Transport
//! calls and timers run as Tokio tasks that re-enter `dispatch` when they
//! complete, tagged with the generation they were issued under; a completion
//! from a retired generation is discarded. Hooks run on a separate notifier
//! task (see [`hooks`]), never under the session lock.
//!
//! ## Failure Reporting
//!
//! Protocol failures never surface as `Err` or panics: the session returns to
//! [`State::Idle`] and the error hook receives a message. The only panic is
//! calling [`TracingController::start`] while a session is running.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use perfcap_common::{
    events as protocol_events, methods, IoCloseParams, IoReadParams, IoReadResult,
    MemoryDumpResult, TracingCompleteParams, TracingStartParams,
};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{AttachError, Generation, SessionId, StreamHandle, TargetId, TransportError};
use crate::transport::{Target, Transport, TransportEvent};

mod config;
mod events;
mod hooks;
mod session;
mod state;
mod timers;

pub use config::ControllerConfig;
pub use state::{SessionSnapshot, State};
pub use timers::TimerKind;

use events::Event;
use hooks::{lock_hooks, spawn_notifier, Hooks, Notification};
use session::{Session, TargetKind};
use timers::TimerToken;

/// Drives trace captures through a [`Transport`]
///
/// Dropping the controller aborts any running session.
pub struct TracingController {
    shared: Arc<Shared>,
    event_pump: JoinHandle<()>,
}

struct Shared {
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    session: Mutex<Session>,
    hooks: Arc<Mutex<Hooks>>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl TracingController {
    /// Create an idle controller bound to `transport`
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: ControllerConfig, transport: Arc<dyn Transport>) -> Self {
        let runtime = Handle::current();
        let hooks = Arc::new(Mutex::new(Hooks::default()));
        let notifications = spawn_notifier(&runtime, Arc::clone(&hooks));
        let mut transport_events = transport.subscribe();

        let shared = Arc::new(Shared {
            config,
            transport,
            runtime: runtime.clone(),
            session: Mutex::new(Session::default()),
            hooks,
            notifications,
        });

        let weak = Arc::downgrade(&shared);
        let event_pump = runtime.spawn(async move {
            while let Some(event) = transport_events.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.dispatch(Event::Transport(event));
            }
        });

        Self { shared, event_pump }
    }

    /// Hook invoked on every state transition, in transition order
    pub fn on_state_change<F>(&self, hook: F)
    where
        F: Fn(State) + Send + Sync + 'static,
    {
        lock_hooks(&self.shared.hooks).state = Some(Arc::new(hook));
    }

    /// Hook invoked with each trace chunk, in stream order
    pub fn on_trace_chunk<F>(&self, hook: F)
    where
        F: Fn(&[u8], bool) + Send + Sync + 'static,
    {
        lock_hooks(&self.shared.hooks).chunk = Some(Arc::new(hook));
    }

    /// Hook invoked once per failed session
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock_hooks(&self.shared.hooks).error = Some(Arc::new(hook));
    }

    /// Configured capture window
    pub fn duration(&self) -> Duration {
        self.shared.config.duration()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> State {
        self.shared.lock_session().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock_session().snapshot()
    }

    /// Begin a capture
    ///
    /// `use_fallback_target` skips straight to attaching to a freshly created
    /// background target.
    ///
    /// # Panics
    /// Panics if a session is already running (state is not `Idle`).
    pub fn start(&self, use_fallback_target: bool) {
        self.shared.start(use_fallback_target);
    }

    /// End the capture early; only meaningful while tracing
    pub fn stop(&self) {
        let mut session = self.shared.lock_session();
        self.shared.stop_tracing(&mut session);
    }

    /// Tear the session down immediately, from any state
    pub fn abort(&self) {
        self.shared.abort();
    }
}

impl Drop for TracingController {
    fn drop(&mut self) {
        self.shared.abort();
        self.event_pump.abort();
    }
}

fn release_target(transport: &dyn Transport, session: Option<&SessionId>, target: Option<&TargetId>) {
    if let Some(session) = session {
        transport.detach(session);
    }
    if let Some(target) = target {
        transport.close_target(target);
    }
}

/// Decode the payload of one `IO.read` result
fn decode_chunk(read: &IoReadResult) -> Result<Vec<u8>, base64::DecodeError> {
    if read.base64_encoded {
        BASE64.decode(read.data.as_bytes())
    } else {
        Ok(read.data.as_bytes().to_vec())
    }
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notification: Notification) {
        // The notifier only stops with the runtime
        let _ = self.notifications.send(notification);
    }

    fn transition(&self, s: &mut Session, next: State) {
        if s.state == next {
            return;
        }
        debug!("{} -> {next} ({})", s.state, s.generation);
        s.state = next;
        self.notify(Notification::StateChanged(next));
    }

    /// Run `work` on the runtime and feed its resulting event back in
    fn spawn_completion<Fut>(self: &Arc<Self>, work: Fut)
    where
        Fut: Future<Output = Event> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let event = work.await;
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(event);
            }
        });
    }

    fn arm_timer(self: &Arc<Self>, s: &mut Session, kind: TimerKind, delay: Duration) {
        let weak = Arc::downgrade(self);
        let generation = s.generation;
        s.timers.arm(&self.runtime, kind, delay, move |token| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(Event::TimerFired { generation, kind, token });
            }
        });
    }

    /// Send a command on the attached session; its result comes back as an event
    fn send_command<F>(self: &Arc<Self>, s: &Session, method: &'static str, params: Value, into: F)
    where
        F: FnOnce(Generation, Result<Value, TransportError>) -> Event + Send + 'static,
    {
        let Some(session) = s.attached_session().cloned() else {
            warn!("Cannot send {method}: no attached session");
            return;
        };
        let generation = s.generation;
        let transport = Arc::clone(&self.transport);
        self.spawn_completion(async move {
            let result = transport.send_command(&session, method, params).await;
            into(generation, result)
        });
    }

    /// Send a command whose outcome does not affect the state machine
    fn send_unobserved(&self, s: &Session, method: &'static str, params: Value) {
        let Some(session) = s.attached_session().cloned() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        self.runtime.spawn(async move {
            if let Err(e) = transport.send_command(&session, method, params).await {
                warn!("{method} failed: {e}");
            }
        });
    }

    /// Single entry point for every input of the state machine
    fn dispatch(self: &Arc<Self>, event: Event) {
        let mut s = self.lock_session();

        if let Some(generation) = event.generation() {
            if generation != s.generation {
                self.discard_stale(event);
                return;
            }
        }

        match event {
            Event::Attached { result, .. } => self.on_attached(&mut s, result),
            Event::TargetCreated { result, .. } => self.on_target_created(&mut s, result),
            Event::TracingStarted { result, .. } => self.on_tracing_started(&mut s, result),
            Event::MemoryDumped { result, .. } => self.on_memory_dumped(&mut s, result),
            Event::ChunkRead { result, .. } => self.on_chunk_read(&mut s, result),
            Event::TimerFired { kind, token, .. } => self.on_timer(&mut s, kind, token),
            Event::Transport(event) => self.on_transport_event(&mut s, event),
        }
    }

    /// Release anything a completion from a retired session still holds
    fn discard_stale(&self, event: Event) {
        match event {
            Event::Attached { generation, result: Ok(session) } => {
                debug!("Detaching {session} from retired {generation}");
                self.transport.detach(&session);
            }
            Event::TargetCreated { generation, result: Ok(target) } => {
                debug!("Closing {target} from retired {generation}");
                self.transport.close_target(&target);
            }
            other => debug!("Discarding stale {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn start(self: &Arc<Self>, use_fallback_target: bool) {
        let mut s = self.lock_session();
        assert!(
            s.state == State::Idle,
            "TracingController::start called while {} (wait for idle or call abort first)",
            s.state
        );

        let kind = if use_fallback_target { TargetKind::Ephemeral } else { TargetKind::Own };
        s.begin(kind);
        info!(
            "Starting trace capture ({}, {} ms, categories: {:?})",
            s.generation,
            self.config.duration().as_millis(),
            self.config.categories()
        );
        self.transition(&mut s, State::Attaching);
        self.arm_timer(&mut s, TimerKind::Attach, self.config.attach_timeout);
        self.begin_attach(&s);
    }

    fn begin_attach(self: &Arc<Self>, s: &Session) {
        let Some(target) = &s.target else {
            return;
        };
        let generation = s.generation;
        let transport = Arc::clone(&self.transport);

        match target.kind {
            TargetKind::Own => {
                let version = self.config.protocol_version.clone();
                self.spawn_completion(async move {
                    let result = transport.attach(&Target::Own, &version).await;
                    Event::Attached { generation, result }
                });
            }
            TargetKind::Ephemeral => {
                self.spawn_completion(async move {
                    let result = transport.create_ephemeral_target().await;
                    Event::TargetCreated { generation, result }
                });
            }
        }
    }

    fn stop_tracing(self: &Arc<Self>, s: &mut Session) {
        if s.state != State::Tracing {
            debug!("stop ignored in {}", s.state);
            return;
        }
        self.enter_stopping(s);
        self.send_unobserved(s, methods::TRACING_END, json!({}));
    }

    /// Duration and dump-wait give way to the flush deadline
    fn enter_stopping(self: &Arc<Self>, s: &mut Session) {
        s.timers.cancel(TimerKind::Duration);
        s.timers.cancel(TimerKind::DumpWait);
        self.arm_timer(s, TimerKind::Flush, self.config.flush_timeout);
        self.transition(s, State::Stopping);
    }

    fn abort(self: &Arc<Self>) {
        let mut s = self.lock_session();
        if s.state == State::Idle {
            return;
        }
        info!("Aborting trace capture in {}", s.state);
        let end_tracing = s.state == State::Tracing;
        if end_tracing {
            self.enter_stopping(&mut s);
        }
        self.teardown(&mut s, true, end_tracing, None);
    }

    /// Return to idle: cancel timers, release the target, retire the generation
    ///
    /// With `end_tracing`, `Tracing.end` is sent on the session ahead of the release.
    fn teardown(&self, s: &mut Session, detach: bool, end_tracing: bool, error: Option<String>) {
        s.timers.cancel_all();

        let stream = s.stream.take();
        if let Some(target) = s.target.take() {
            let session = target.session.filter(|_| detach);
            let target_id = target.target_id;

            let mut closing = Vec::new();
            if end_tracing {
                closing.push((methods::TRACING_END, json!({})));
            }
            if let Some(stream) = stream {
                closing.push((methods::IO_CLOSE, json!(IoCloseParams { handle: stream.0 })));
            }

            match session.clone() {
                Some(attached) if !closing.is_empty() => {
                    // Session commands must reach the browser before the detach
                    let transport = Arc::clone(&self.transport);
                    self.runtime.spawn(async move {
                        for (method, params) in closing {
                            if let Err(e) = transport.send_command(&attached, method, params).await {
                                warn!("{method} failed: {e}");
                            }
                        }
                        release_target(transport.as_ref(), session.as_ref(), target_id.as_ref());
                    });
                }
                _ => release_target(self.transport.as_ref(), session.as_ref(), target_id.as_ref()),
            }
        }

        s.memory_dump_pending = false;
        s.duration_pending = false;
        s.on_fallback = false;
        s.generation = s.generation.next();

        if let Some(message) = error {
            warn!("Trace capture failed: {message}");
            self.notify(Notification::Error(message));
        }
        self.transition(s, State::Idle);
    }

    fn fail(&self, s: &mut Session, message: String) {
        self.teardown(s, true, false, Some(message));
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    fn on_target_created(
        self: &Arc<Self>,
        s: &mut Session,
        result: Result<TargetId, TransportError>,
    ) {
        if s.state != State::Attaching {
            return;
        }
        match result {
            Ok(target_id) => {
                debug!("Created fallback {target_id}");
                if let Some(target) = s.target.as_mut() {
                    target.target_id = Some(target_id.clone());
                }
                let generation = s.generation;
                let transport = Arc::clone(&self.transport);
                let version = self.config.protocol_version.clone();
                self.spawn_completion(async move {
                    let target = Target::Ephemeral(target_id);
                    let result = transport.attach(&target, &version).await;
                    Event::Attached { generation, result }
                });
            }
            Err(e) => self.fail(s, format!("Failed to create fallback target: {e}")),
        }
    }

    fn on_attached(self: &Arc<Self>, s: &mut Session, result: Result<SessionId, AttachError>) {
        if s.state != State::Attaching {
            return;
        }
        match result {
            Ok(session) => {
                info!("Attached ({session})");
                s.timers.cancel(TimerKind::Attach);
                if let Some(target) = s.target.as_mut() {
                    target.session = Some(session);
                }
                let params = json!(TracingStartParams::streaming(self.config.categories()));
                self.send_command(s, methods::TRACING_START, params, |generation, result| {
                    Event::TracingStarted { generation, result }
                });
            }
            Err(AttachError::AlreadyAttached) if !s.on_fallback => {
                info!("Target already attached by another debugger, retrying on a fresh target");
                s.on_fallback = true;
                if let Some(target) = s.target.as_mut() {
                    target.kind = TargetKind::Ephemeral;
                }
                self.arm_timer(s, TimerKind::Attach, self.config.attach_timeout);
                self.begin_attach(s);
            }
            Err(e) => self.fail(s, format!("Attach failed: {e}")),
        }
    }

    fn on_tracing_started(self: &Arc<Self>, s: &mut Session, result: Result<Value, TransportError>) {
        if s.state != State::Attaching {
            return;
        }
        if let Err(e) = result {
            self.fail(s, format!("Failed to start tracing: {e}"));
            return;
        }

        s.timers.cancel(TimerKind::Attach);
        self.transition(s, State::Tracing);
        s.memory_dump_pending = true;
        s.duration_pending = true;
        let duration = self.config.duration();
        self.arm_timer(s, TimerKind::Duration, duration);
        self.arm_timer(s, TimerKind::DumpWait, duration + self.config.dump_grace);
        self.send_command(s, methods::TRACING_REQUEST_MEMORY_DUMP, json!({}), |generation, result| {
            Event::MemoryDumped { generation, result }
        });
    }

    fn on_memory_dumped(self: &Arc<Self>, s: &mut Session, result: Result<Value, TransportError>) {
        if s.state != State::Tracing {
            return;
        }
        match result.map(serde_json::from_value::<MemoryDumpResult>) {
            Ok(Ok(dump)) if dump.success => debug!("Memory dump {} complete", dump.dump_guid),
            Ok(Ok(_)) => warn!("Browser reported an unsuccessful memory dump"),
            Ok(Err(e)) => warn!("Unexpected memory dump result: {e}"),
            Err(e) => warn!("Memory dump request failed: {e}"),
        }

        s.memory_dump_pending = false;
        if !s.duration_pending {
            self.stop_tracing(s);
        }
    }

    fn on_timer(self: &Arc<Self>, s: &mut Session, kind: TimerKind, token: TimerToken) {
        if !s.timers.claim(kind, token) {
            debug!("Discarding superseded {kind:?} timer");
            return;
        }

        match (kind, s.state) {
            (TimerKind::Attach, State::Attaching) => {
                self.fail(s, "Timed out attaching to the target".to_string());
            }
            (TimerKind::Duration, State::Tracing) => {
                s.duration_pending = false;
                s.timers.cancel(TimerKind::DumpWait);
                if s.memory_dump_pending {
                    debug!("Capture window elapsed, waiting for the memory dump");
                    self.arm_timer(s, TimerKind::DumpWait, self.config.dump_grace);
                } else {
                    self.stop_tracing(s);
                }
            }
            (TimerKind::DumpWait, State::Tracing) => {
                info!("Memory dump did not complete in time, stopping anyway");
                self.stop_tracing(s);
            }
            (TimerKind::Flush, State::Stopping) => {
                self.fail(s, "Timed out waiting for the trace to complete".to_string());
            }
            (TimerKind::Flush, State::Flushing) => {
                self.fail(s, "Timed out reading the trace stream".to_string());
            }
            (kind, state) => debug!("Ignoring {kind:?} timer in {state}"),
        }
    }

    fn on_transport_event(self: &Arc<Self>, s: &mut Session, event: TransportEvent) {
        match event {
            TransportEvent::Protocol { session, method, params } => {
                if method == protocol_events::TRACING_COMPLETE {
                    self.on_tracing_complete(s, session.as_ref(), params);
                }
            }
            TransportEvent::Detached { session, reason } => {
                if s.attached_session() != Some(&session) {
                    debug!("Ignoring detach of unrelated {session}");
                    return;
                }
                info!("{session} detached externally: {reason}");
                self.teardown(s, false, false, None);
            }
            TransportEvent::Closed { reason } => {
                if s.state != State::Idle {
                    let message = format!("Debugging transport closed: {reason}");
                    self.teardown(s, false, false, Some(message));
                }
            }
        }
    }

    fn on_tracing_complete(
        self: &Arc<Self>,
        s: &mut Session,
        session: Option<&SessionId>,
        params: Value,
    ) {
        if s.state != State::Stopping {
            debug!("Ignoring tracing-complete event in {}", s.state);
            return;
        }
        if session.is_some() && session != s.attached_session() {
            return;
        }

        let complete = match serde_json::from_value::<TracingCompleteParams>(params) {
            Ok(complete) => complete,
            Err(e) => {
                self.fail(s, format!("Malformed tracing-complete event: {e}"));
                return;
            }
        };
        let Some(stream) = complete.stream else {
            self.fail(s, "Trace completed without a stream handle".to_string());
            return;
        };
        if complete.data_loss_occurred {
            warn!("Browser reported trace data loss");
        }

        s.timers.cancel(TimerKind::Flush);
        s.stream = Some(StreamHandle(stream));
        self.transition(s, State::Flushing);
        self.arm_timer(s, TimerKind::Flush, self.config.stream_timeout);
        self.read_next_chunk(s);
    }

    fn read_next_chunk(self: &Arc<Self>, s: &Session) {
        let Some(stream) = &s.stream else {
            return;
        };
        let params =
            json!(IoReadParams { handle: stream.0.clone(), size: self.config.chunk_size });
        self.send_command(s, methods::IO_READ, params, |generation, result| Event::ChunkRead {
            generation,
            result,
        });
    }

    fn on_chunk_read(self: &Arc<Self>, s: &mut Session, result: Result<Value, TransportError>) {
        if s.state != State::Flushing {
            return;
        }

        let read = match result.map(serde_json::from_value::<IoReadResult>) {
            Ok(Ok(read)) => read,
            Ok(Err(e)) => {
                debug!("Ignoring malformed read result: {e}");
                self.read_next_chunk(s);
                return;
            }
            Err(e) => {
                debug!("Stream read failed, reading again: {e}");
                self.read_next_chunk(s);
                return;
            }
        };
        let data = match decode_chunk(&read) {
            Ok(data) => data,
            Err(e) => {
                warn!("Ignoring undecodable chunk: {e}");
                self.read_next_chunk(s);
                return;
            }
        };

        if read.eof {
            self.deliver_chunk(s, data, true);
            self.finish(s);
        } else if data.is_empty() {
            self.read_next_chunk(s);
        } else {
            self.deliver_chunk(s, data, false);
            self.read_next_chunk(s);
        }
    }

    fn deliver_chunk(&self, s: &mut Session, data: Vec<u8>, is_last: bool) {
        s.chunks_delivered += 1;
        s.bytes_delivered += data.len();
        self.notify(Notification::Chunk { data, is_last });
    }

    fn finish(&self, s: &mut Session) {
        s.timers.cancel(TimerKind::Flush);
        info!("Trace complete: {} chunks, {} bytes", s.chunks_delivered, s.bytes_delivered);
        self.teardown(s, true, false, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_chunk() {
        let read = IoReadResult { data: "{\"a\":1}".to_string(), eof: false, base64_encoded: false };
        assert_eq!(decode_chunk(&read).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_decode_base64_chunk() {
        let read = IoReadResult { data: "aGVsbG8=".to_string(), eof: true, base64_encoded: true };
        assert_eq!(decode_chunk(&read).unwrap(), b"hello");
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let read = IoReadResult { data: "***".to_string(), eof: false, base64_encoded: true };
        assert!(decode_chunk(&read).is_err());
    }
}

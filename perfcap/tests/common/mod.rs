//! Scripted transport and hook recorder shared by the controller tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use perfcap::controller::{ControllerConfig, State, TracingController};
use perfcap::domain::{AttachError, SessionId, TargetId, TransportError};
use perfcap::transport::{Target, Transport, TransportEvent};
use perfcap_common::{events, methods};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// When a scripted reply resolves
#[derive(Debug, Clone, Copy)]
pub enum Delay {
    Now,
    After(Duration),
    Never,
}

impl Delay {
    async fn wait(self) {
        match self {
            Delay::Now => {}
            Delay::After(d) => tokio::time::sleep(d).await,
            Delay::Never => std::future::pending::<()>().await,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AttachOutcome {
    Ok(&'static str),
    Conflict,
    Fail(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Attach(Target),
    CreateTarget,
    Command { session: SessionId, method: String, params: Value },
    Detach(SessionId),
    CloseTarget(TargetId),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub kind: CallKind,
}

#[derive(Default)]
struct Script {
    attaches: VecDeque<(Delay, AttachOutcome)>,
    targets: VecDeque<(Delay, Result<&'static str, &'static str>)>,
    commands: HashMap<String, VecDeque<(Delay, Result<Value, String>)>>,
    calls: Vec<Call>,
    subscribers: Vec<mpsc::UnboundedSender<TransportEvent>>,
    next_id: u32,
}

/// In-memory [`Transport`] replaying scripted replies and recording every call
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<Script>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_attach(&self, delay: Delay, outcome: AttachOutcome) {
        self.script.lock().unwrap().attaches.push_back((delay, outcome));
    }

    pub fn script_create_target(&self, delay: Delay, result: Result<&'static str, &'static str>) {
        self.script.lock().unwrap().targets.push_back((delay, result));
    }

    pub fn script_command(&self, method: &str, delay: Delay, result: Result<Value, String>) {
        self.script
            .lock()
            .unwrap()
            .commands
            .entry(method.to_string())
            .or_default()
            .push_back((delay, result));
    }

    /// Queue one `IO.read` result
    pub fn script_read(&self, data: &str, eof: bool) {
        self.script_command(methods::IO_READ, Delay::Now, Ok(json!({ "data": data, "eof": eof })));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Methods of every command sent, in order
    pub fn methods(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call.kind {
                CallKind::Command { method, .. } => Some(method),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Time the first `method` command was sent
    pub fn sent_at(&self, method: &str) -> Option<Instant> {
        self.calls().into_iter().find_map(|call| match call.kind {
            CallKind::Command { method: m, .. } if m == method => Some(call.at),
            _ => None,
        })
    }

    pub fn detaches(&self) -> Vec<SessionId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call.kind {
                CallKind::Detach(session) => Some(session),
                _ => None,
            })
            .collect()
    }

    pub fn closed_targets(&self) -> Vec<TargetId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call.kind {
                CallKind::CloseTarget(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn emit(&self, event: TransportEvent) {
        self.script.lock().unwrap().subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn emit_tracing_complete(&self, session: Option<&str>, params: Value) {
        self.emit(TransportEvent::Protocol {
            session: session.map(SessionId::from),
            method: events::TRACING_COMPLETE.to_string(),
            params,
        });
    }

    fn record(&self, kind: CallKind) {
        self.script.lock().unwrap().calls.push(Call { at: Instant::now(), kind });
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn attach(&self, target: &Target, _protocol_version: &str) -> Result<SessionId, AttachError> {
        self.record(CallKind::Attach(target.clone()));
        let (delay, outcome, id) = {
            let mut script = self.script.lock().unwrap();
            script.next_id += 1;
            let (delay, outcome) = script.attaches.pop_front().unwrap_or((Delay::Now, AttachOutcome::Ok("")));
            (delay, outcome, script.next_id)
        };
        delay.wait().await;
        match outcome {
            AttachOutcome::Ok("") => Ok(SessionId(format!("session-{id}"))),
            AttachOutcome::Ok(session) => Ok(SessionId::from(session)),
            AttachOutcome::Conflict => Err(AttachError::AlreadyAttached),
            AttachOutcome::Fail(message) => Err(AttachError::Transport(TransportError::Protocol {
                code: -32000,
                message: message.to_string(),
            })),
        }
    }

    async fn create_ephemeral_target(&self) -> Result<TargetId, TransportError> {
        self.record(CallKind::CreateTarget);
        let (delay, result) = self
            .script
            .lock()
            .unwrap()
            .targets
            .pop_front()
            .unwrap_or((Delay::Now, Ok("fallback-target")));
        delay.wait().await;
        result.map(TargetId::from).map_err(|message| TransportError::Protocol {
            code: -32000,
            message: message.to_string(),
        })
    }

    async fn send_command(
        &self,
        session: &SessionId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        self.record(CallKind::Command {
            session: session.clone(),
            method: method.to_string(),
            params,
        });
        let scripted =
            self.script.lock().unwrap().commands.get_mut(method).and_then(VecDeque::pop_front);
        let (delay, result) = scripted.unwrap_or_else(|| (Delay::Now, Ok(default_reply(method))));
        delay.wait().await;
        result.map_err(|message| TransportError::Protocol { code: -32000, message })
    }

    fn detach(&self, session: &SessionId) {
        self.record(CallKind::Detach(session.clone()));
    }

    fn close_target(&self, target: &TargetId) {
        self.record(CallKind::CloseTarget(target.clone()));
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().subscribers.push(tx);
        rx
    }
}

fn default_reply(method: &str) -> Value {
    match method {
        methods::TRACING_REQUEST_MEMORY_DUMP => json!({ "dumpGuid": "dump-1", "success": true }),
        methods::IO_READ => json!({ "data": "", "eof": true }),
        _ => json!({}),
    }
}

/// Everything the hooks observed
#[derive(Debug, Default)]
pub struct Observed {
    pub states: Vec<State>,
    pub chunks: Vec<(Vec<u8>, bool)>,
    pub errors: Vec<String>,
}

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Observed>>);

impl Recorder {
    pub fn install(controller: &TracingController) -> Self {
        let recorder = Self::default();
        let log = recorder.clone();
        controller.on_state_change(move |state| log.0.lock().unwrap().states.push(state));
        let log = recorder.clone();
        controller.on_trace_chunk(move |data, is_last| {
            log.0.lock().unwrap().chunks.push((data.to_vec(), is_last));
        });
        let log = recorder.clone();
        controller.on_error(move |message| log.0.lock().unwrap().errors.push(message.to_string()));
        recorder
    }

    pub fn push_state(&self, state: State) {
        self.0.lock().unwrap().states.push(state);
    }

    pub fn states(&self) -> Vec<State> {
        self.0.lock().unwrap().states.clone()
    }

    pub fn chunks(&self) -> Vec<(Vec<u8>, bool)> {
        self.0.lock().unwrap().chunks.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.0.lock().unwrap().errors.clone()
    }
}

pub const DURATION_MS: u64 = 1000;

pub fn config() -> ControllerConfig {
    ControllerConfig::new(DURATION_MS, "toplevel,v8").unwrap()
}

/// Controller over a fresh fake, with hooks recorded
pub fn harness(config: ControllerConfig) -> (TracingController, Arc<FakeTransport>, Recorder) {
    let transport = FakeTransport::new();
    let controller = TracingController::new(config, transport.clone());
    let recorder = Recorder::install(&controller);
    (controller, transport, recorder)
}

/// Let every ready task run, advancing the paused clock by `ms`
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Session id the controller attached with (first successful attach)
pub fn attached_session(transport: &FakeTransport) -> SessionId {
    transport
        .calls()
        .into_iter()
        .find_map(|call| match call.kind {
            CallKind::Command { session, .. } => Some(session),
            _ => None,
        })
        .expect("no command was sent on a session")
}

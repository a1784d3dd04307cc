//! # DevTools Pipe Transport
//!
//! Speaks the DevTools protocol over the browser's `--remote-debugging-pipe`
//! channel: every message is one JSON object terminated by a NUL byte.
//!
//! ## Tasks
//!
//! - **Writer**: drains an unbounded queue of framed messages into the pipe
//! - **Reader**: splits the input on NUL, resolves pending commands by id and
//!   fans events out to subscribers
//!
//! When the reader hits end of input every pending command fails with
//! [`TransportError::Closed`] and subscribers receive
//! [`TransportEvent::Closed`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, warn};
use perfcap_common::{
    events, methods, AttachResult, AttachToTargetParams, BrowserVersion, CloseTargetParams,
    CreateTargetParams, CreateTargetResult, DetachParams, DetachedFromTargetParams,
    ALREADY_ATTACHED_MARKER, BLANK_PAGE_URL,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Target, Transport, TransportEvent};
use crate::domain::{AttachError, SessionId, TargetId, TransportError};

type Reply = Result<Value, TransportError>;

/// Message delimiter of the debugging pipe
const FRAME_DELIMITER: u8 = 0;

/// One inbound message: either a response (`id`) or an event (`method`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<ErrorBody>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

/// Commands awaiting a response, plus the closure reason once closed.
/// Kept under one lock so no command can register after closure.
#[derive(Default)]
struct PendingCommands {
    replies: HashMap<u64, oneshot::Sender<Reply>>,
    closed: Option<String>,
}

struct Inner {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    next_id: AtomicU64,
    pending: Mutex<PendingCommands>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    /// Sessions we detached ourselves; their detach events are not reported
    self_detached: Mutex<HashSet<String>>,
}

/// DevTools transport over a NUL-framed byte pipe
pub struct PipeTransport {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode one outbound message, delimiter included
fn encode_frame(id: u64, session: Option<&SessionId>, method: &str, params: Value) -> Vec<u8> {
    let mut message = json!({ "id": id, "method": method, "params": params });
    if let Some(session) = session {
        message["sessionId"] = Value::String(session.0.clone());
    }
    let mut bytes = message.to_string().into_bytes();
    bytes.push(FRAME_DELIMITER);
    bytes
}

fn to_params<T: Serialize>(params: &T) -> Result<Value, TransportError> {
    Ok(serde_json::to_value(params)?)
}

/// Whether a browser speaking `available` accepts clients asking for `requested`
///
/// Versions are `major.minor`; unparseable versions are accepted and left
/// for the browser to reject.
pub fn version_supported(requested: &str, available: &str) -> bool {
    fn parse(version: &str) -> Option<(u32, u32)> {
        let (major, minor) = version.trim().split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    match (parse(requested), parse(available)) {
        (Some(requested), Some(available)) => requested <= available,
        _ => true,
    }
}

/// Map a failed attach command onto the attach taxonomy
fn classify_attach_error(err: TransportError) -> AttachError {
    match err {
        TransportError::Protocol { ref message, .. }
            if message.to_ascii_lowercase().contains(ALREADY_ATTACHED_MARKER) =>
        {
            AttachError::AlreadyAttached
        }
        other => AttachError::Transport(other),
    }
}

impl PipeTransport {
    /// Start the reader and writer tasks over `reader`/`writer`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            outgoing,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingCommands::default()),
            subscribers: Mutex::new(Vec::new()),
            self_detached: Mutex::new(HashSet::new()),
        });

        let writer_task = tokio::spawn(write_loop(writer, queue));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&inner)));

        Self { inner, tasks: vec![writer_task, reader_task] }
    }

    /// Send a command and wait for its response
    async fn call(&self, session: Option<&SessionId>, method: &str, params: Value) -> Reply {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.inner.pending);
            if let Some(reason) = &pending.closed {
                return Err(TransportError::Closed(reason.clone()));
            }
            pending.replies.insert(id, tx);
        }

        debug!("-> #{id} {method}");
        if self.inner.outgoing.send(encode_frame(id, session, method, params)).is_err() {
            lock(&self.inner.pending).replies.remove(&id);
            return Err(TransportError::Closed("pipe writer stopped".to_string()));
        }

        rx.await.unwrap_or_else(|_| Err(TransportError::Closed("transport dropped".to_string())))
    }

    /// Send a command whose response nobody waits for
    fn notify(&self, method: &str, params: Value) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("-> #{id} {method} (no reply expected)");
        if self.inner.outgoing.send(encode_frame(id, None, method, params)).is_err() {
            debug!("Dropping {method}: pipe writer stopped");
        }
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    fn broadcast(&self, event: &TransportEvent) {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn handle_message(&self, bytes: &[u8]) {
        let message: Incoming = match serde_json::from_slice(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed protocol message: {e}");
                return;
            }
        };

        if let Some(id) = message.id {
            let reply = match message.error {
                Some(error) => {
                    Err(TransportError::Protocol { code: error.code, message: error.message })
                }
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
            match lock(&self.pending).replies.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!("<- #{id} response without a waiting command"),
            }
            return;
        }

        if let Some(method) = message.method {
            self.route_event(&method, message.params, message.session_id);
        }
    }

    fn route_event(&self, method: &str, params: Value, session_id: Option<String>) {
        match method {
            events::TARGET_DETACHED => {
                let Ok(detached) = serde_json::from_value::<DetachedFromTargetParams>(params)
                else {
                    warn!("Ignoring malformed {method} event");
                    return;
                };
                if lock(&self.self_detached).remove(&detached.session_id) {
                    debug!("<- {method} for our own detach of {}", detached.session_id);
                    return;
                }
                self.broadcast(&TransportEvent::Detached {
                    session: SessionId(detached.session_id),
                    reason: "target detached".to_string(),
                });
            }
            events::INSPECTOR_DETACHED => {
                let Some(session_id) = session_id else {
                    return;
                };
                if lock(&self.self_detached).remove(&session_id) {
                    debug!("<- {method} for our own detach of {session_id}");
                    return;
                }
                let reason = params["reason"].as_str().unwrap_or("inspector detached").to_string();
                self.broadcast(&TransportEvent::Detached { session: SessionId(session_id), reason });
            }
            _ => {
                debug!("<- {method}");
                self.broadcast(&TransportEvent::Protocol {
                    session: session_id.map(SessionId),
                    method: method.to_string(),
                    params,
                });
            }
        }
    }

    /// Fail every pending command and tell subscribers the pipe is gone
    fn shutdown(&self, reason: String) {
        let drained: Vec<_> = {
            let mut pending = lock(&self.pending);
            pending.closed = Some(reason.clone());
            pending.replies.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(TransportError::Closed(reason.clone())));
        }
        warn!("Debugging pipe closed: {reason}");
        self.broadcast(&TransportEvent::Closed { reason });
    }
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!("Failed to write to debugging pipe: {e}");
            return;
        }
        if let Err(e) = writer.flush().await {
            warn!("Failed to flush debugging pipe: {e}");
            return;
        }
    }
}

async fn read_loop<R>(reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        match reader.read_until(FRAME_DELIMITER, &mut buf).await {
            Ok(0) => break "pipe closed by browser".to_string(),
            Ok(_) => {
                if buf.last() == Some(&FRAME_DELIMITER) {
                    buf.pop();
                }
                if !buf.is_empty() {
                    inner.handle_message(&buf);
                }
            }
            Err(e) => break format!("pipe read failed: {e}"),
        }
    };

    inner.shutdown(reason);
}

#[async_trait]
impl Transport for PipeTransport {
    async fn attach(
        &self,
        target: &Target,
        protocol_version: &str,
    ) -> Result<SessionId, AttachError> {
        let version: BrowserVersion =
            serde_json::from_value(self.call(None, methods::BROWSER_GET_VERSION, json!({})).await?)
                .map_err(TransportError::from)?;
        if !version_supported(protocol_version, &version.protocol_version) {
            return Err(AttachError::UnsupportedVersion {
                requested: protocol_version.to_string(),
                available: version.protocol_version,
            });
        }

        let reply = match target {
            Target::Own => self.call(None, methods::TARGET_ATTACH_TO_BROWSER, json!({})).await,
            Target::Ephemeral(target_id) => {
                let params = to_params(&AttachToTargetParams {
                    target_id: target_id.0.clone(),
                    flatten: true,
                })?;
                self.call(None, methods::TARGET_ATTACH_TO_TARGET, params).await
            }
        };

        let attached: AttachResult = serde_json::from_value(reply.map_err(classify_attach_error)?)
            .map_err(TransportError::from)?;
        Ok(SessionId(attached.session_id))
    }

    async fn create_ephemeral_target(&self) -> Result<TargetId, TransportError> {
        let params =
            to_params(&CreateTargetParams { url: BLANK_PAGE_URL.to_string(), background: true })?;
        let created: CreateTargetResult =
            serde_json::from_value(self.call(None, methods::TARGET_CREATE_TARGET, params).await?)?;
        Ok(TargetId(created.target_id))
    }

    async fn send_command(
        &self,
        session: &SessionId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        self.call(Some(session), method, params).await
    }

    fn detach(&self, session: &SessionId) {
        lock(&self.inner.self_detached).insert(session.0.clone());
        match to_params(&DetachParams { session_id: session.0.clone() }) {
            Ok(params) => self.notify(methods::TARGET_DETACH_FROM_TARGET, params),
            Err(e) => warn!("Failed to encode detach of {session}: {e}"),
        }
    }

    fn close_target(&self, target: &TargetId) {
        match to_params(&CloseTargetParams { target_id: target.0.clone() }) {
            Ok(params) => self.notify(methods::TARGET_CLOSE_TARGET, params),
            Err(e) => warn!("Failed to encode close of {target}: {e}"),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Holding the pending lock orders this against `shutdown`
        let pending = lock(&self.inner.pending);
        match &pending.closed {
            Some(reason) => {
                let _ = tx.send(TransportEvent::Closed { reason: reason.clone() });
            }
            None => lock(&self.inner.subscribers).push(tx),
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_supported() {
        assert!(version_supported("1.3", "1.3"));
        assert!(version_supported("1.2", "1.3"));
        assert!(!version_supported("1.4", "1.3"));
        assert!(!version_supported("2.0", "1.3"));
        assert!(version_supported("garbage", "1.3"));
    }

    #[test]
    fn test_frame_is_nul_terminated() {
        let frame = encode_frame(7, None, "Tracing.end", json!({}));
        assert_eq!(frame.last(), Some(&FRAME_DELIMITER));
        let body: Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();
        assert_eq!(body["id"], 7);
        assert_eq!(body["method"], "Tracing.end");
        assert!(body.get("sessionId").is_none());
    }

    #[test]
    fn test_frame_carries_session() {
        let session = SessionId::from("S1");
        let frame = encode_frame(1, Some(&session), "IO.read", json!({ "handle": "h" }));
        let body: Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();
        assert_eq!(body["sessionId"], "S1");
        assert_eq!(body["params"]["handle"], "h");
    }

    #[test]
    fn test_conflict_is_classified() {
        let err = TransportError::Protocol {
            code: -32000,
            message: "Another debugger is already attached to the target".to_string(),
        };
        assert!(matches!(classify_attach_error(err), AttachError::AlreadyAttached));

        let err = TransportError::Protocol { code: -32602, message: "No target".to_string() };
        assert!(matches!(classify_attach_error(err), AttachError::Transport(_)));
    }
}

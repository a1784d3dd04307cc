//! # Debugging-Protocol Transport
//!
//! The controller never talks to a browser directly: everything goes through
//! the [`Transport`] trait, which is injected at construction so tests can
//! substitute a scripted fake.
//!
//! ## Responsibilities
//!
//! - Attach to a target and hand back a [`SessionId`]
//! - Create an inert background target for the fallback strategy
//! - Dispatch commands on a session and return their JSON result
//! - Deliver protocol events, external detaches and fatal closure through
//!   [`Transport::subscribe`]
//!
//! [`pipe::PipeTransport`] is the concrete implementation speaking the
//! DevTools protocol over the browser's debugging pipe.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::domain::{AttachError, SessionId, TargetId, TransportError};

pub mod pipe;

pub use pipe::PipeTransport;

/// Which endpoint an attach is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The caller's own context (for the pipe transport: the browser target)
    Own,
    /// A target created through [`Transport::create_ephemeral_target`]
    Ephemeral(TargetId),
}

/// Events pushed by the transport to its subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A protocol event, keyed by method name
    Protocol { session: Option<SessionId>, method: String, params: Value },
    /// A session was torn down by something other than [`Transport::detach`]
    Detached { session: SessionId, reason: String },
    /// The connection is gone; no further commands will succeed
    Closed { reason: String },
}

/// Debugging-protocol collaborator driven by the controller
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach to `target`, negotiating `protocol_version`
    ///
    /// # Errors
    /// [`AttachError::AlreadyAttached`] when another debugger holds the target,
    /// any other variant for generic failures
    async fn attach(&self, target: &Target, protocol_version: &str)
        -> Result<SessionId, AttachError>;

    /// Create a fresh, inert background target to attach to
    ///
    /// # Errors
    /// Returns an error if the browser refuses to create the target
    async fn create_ephemeral_target(&self) -> Result<TargetId, TransportError>;

    /// Send `method` with `params` on `session` and wait for its result
    ///
    /// # Errors
    /// Returns the protocol error or the transport failure
    async fn send_command(
        &self,
        session: &SessionId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError>;

    /// Tear down `session` without waiting for acknowledgment
    fn detach(&self, session: &SessionId);

    /// Dispose of a target created by [`Transport::create_ephemeral_target`]
    fn close_target(&self, target: &TargetId);

    /// Register a new event subscriber
    fn subscribe(&self) -> UnboundedReceiver<TransportEvent>;
}

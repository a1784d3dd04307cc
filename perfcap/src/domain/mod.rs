//! Identifiers and errors shared by the controller, transport and binary
//!
//! Protocol identifiers are plain strings on the wire; wrapping each in its
//! own newtype keeps a session id from being passed where a stream handle is
//! expected.

pub mod errors;
pub mod types;

pub use types::{Generation, SessionId, StreamHandle, TargetId};

pub use errors::{AttachError, ConfigError, LaunchError, TransportError};

//! # Shared Protocol Vocabulary (Controller ↔ Transport)
//!
//! Defines the DevTools protocol method names, constants and wire structures
//! shared between the tracing controller and the transports that carry its
//! commands. Every structure mirrors the JSON shape the browser sends or
//! expects, using `camelCase` field names on the wire.
//!
//! ## Key Types
//!
//! - [`TracingStartParams`] - Parameters for `Tracing.start`
//! - [`TracingCompleteParams`] - Payload of the `Tracing.tracingComplete` event
//! - [`IoReadParams`] / [`IoReadResult`] - One chunk of the trace stream
//! - [`MemoryDumpResult`] - Result of `Tracing.requestMemoryDump`

use serde::{Deserialize, Serialize};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Protocol version requested when attaching to a target
pub const PROTOCOL_VERSION: &str = "1.3";

/// Size requested by each `IO.read` during the flush phase (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Stream transfer mode: the browser keeps the trace and hands out a stream handle
pub const TRANSFER_MODE_STREAM: &str = "ReturnAsStream";

/// Target URL used for the fallback (ephemeral) target
pub const BLANK_PAGE_URL: &str = "about:blank";

/// Fragment of the error message a browser returns when another client
/// already holds the debugging session of the requested target
pub const ALREADY_ATTACHED_MARKER: &str = "already attached";

// ============================================================================
// Method and Event Names
// ============================================================================

pub mod methods {
    pub const TRACING_START: &str = "Tracing.start";
    pub const TRACING_END: &str = "Tracing.end";
    pub const TRACING_REQUEST_MEMORY_DUMP: &str = "Tracing.requestMemoryDump";
    pub const IO_READ: &str = "IO.read";
    pub const IO_CLOSE: &str = "IO.close";
    pub const BROWSER_GET_VERSION: &str = "Browser.getVersion";
    pub const TARGET_ATTACH_TO_BROWSER: &str = "Target.attachToBrowserTarget";
    pub const TARGET_ATTACH_TO_TARGET: &str = "Target.attachToTarget";
    pub const TARGET_DETACH_FROM_TARGET: &str = "Target.detachFromTarget";
    pub const TARGET_CREATE_TARGET: &str = "Target.createTarget";
    pub const TARGET_CLOSE_TARGET: &str = "Target.closeTarget";
}

pub mod events {
    /// Emitted once the browser has finished collecting after `Tracing.end`
    pub const TRACING_COMPLETE: &str = "Tracing.tracingComplete";
    /// Emitted when a session is torn down
    pub const TARGET_DETACHED: &str = "Target.detachedFromTarget";
    /// Emitted on a session when the inspected side goes away
    pub const INSPECTOR_DETACHED: &str = "Inspector.detached";
}

// ============================================================================
// Tracing Domain
// ============================================================================

/// Parameters for `Tracing.start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingStartParams {
    /// Category filter; omitted when the browser defaults should apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    pub transfer_mode: String,
}

impl TracingStartParams {
    /// Stream-mode parameters for a (possibly empty) category filter
    pub fn streaming(categories: &str) -> Self {
        Self {
            categories: (!categories.is_empty()).then(|| categories.to_string()),
            transfer_mode: TRANSFER_MODE_STREAM.to_string(),
        }
    }
}

/// Payload of `Tracing.tracingComplete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingCompleteParams {
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub data_loss_occurred: bool,
    #[serde(default)]
    pub trace_format: Option<String>,
}

/// Result of `Tracing.requestMemoryDump`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDumpResult {
    #[serde(default)]
    pub dump_guid: String,
    pub success: bool,
}

// ============================================================================
// IO Domain
// ============================================================================

/// Parameters for `IO.read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoReadParams {
    pub handle: String,
    pub size: u32,
}

/// Result of `IO.read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoReadResult {
    #[serde(default)]
    pub data: String,
    pub eof: bool,
    #[serde(default)]
    pub base64_encoded: bool,
}

/// Parameters for `IO.close`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoCloseParams {
    pub handle: String,
}

// ============================================================================
// Target / Browser Domains
// ============================================================================

/// Result of `Browser.getVersion` (only the fields we read)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserVersion {
    pub protocol_version: String,
    #[serde(default)]
    pub product: String,
}

/// Parameters for `Target.createTarget`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetParams {
    pub url: String,
    pub background: bool,
}

/// Result of `Target.createTarget`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetResult {
    pub target_id: String,
}

/// Parameters for `Target.attachToTarget`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetParams {
    pub target_id: String,
    pub flatten: bool,
}

/// Result of both attach methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachResult {
    pub session_id: String,
}

/// Parameters for `Target.detachFromTarget`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachParams {
    pub session_id: String,
}

/// Parameters for `Target.closeTarget`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTargetParams {
    pub target_id: String,
}

/// Payload of `Target.detachedFromTarget`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetParams {
    pub session_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

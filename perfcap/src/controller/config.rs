//! Controller configuration
//!
//! Fixed at construction; every session started by the controller uses the
//! same capture window, category filter and deadlines.

use std::time::Duration;

use perfcap_common::{DEFAULT_CHUNK_SIZE, PROTOCOL_VERSION};

use crate::domain::ConfigError;

const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_DUMP_GRACE: Duration = Duration::from_secs(5);

/// Immutable configuration of a [`TracingController`](super::TracingController)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    duration: Duration,
    categories: String,
    /// Deadline for the attach handshake (including fallback target creation)
    pub attach_timeout: Duration,
    /// Deadline between `Tracing.end` and `Tracing.tracingComplete`
    pub flush_timeout: Duration,
    /// Deadline for the whole chunk-read loop
    pub stream_timeout: Duration,
    /// How long a memory dump may run past the capture window
    pub dump_grace: Duration,
    /// Bytes requested per `IO.read`
    pub chunk_size: u32,
    pub protocol_version: String,
}

impl ControllerConfig {
    /// Configuration with default deadlines
    ///
    /// # Errors
    /// Returns [`ConfigError::ZeroDuration`] if `duration_ms` is zero
    pub fn new(duration_ms: u64, categories: impl Into<String>) -> Result<Self, ConfigError> {
        if duration_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(Self {
            duration: Duration::from_millis(duration_ms),
            categories: categories.into(),
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            dump_grace: DEFAULT_DUMP_GRACE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            protocol_version: PROTOCOL_VERSION.to_string(),
        })
    }

    #[must_use]
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_dump_grace(mut self, grace: Duration) -> Self {
        self.dump_grace = grace;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Check the deadlines and chunk size set through the builder methods
    ///
    /// # Errors
    /// Returns the first zero-valued setting found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        for (name, timeout) in [
            ("attach", self.attach_timeout),
            ("flush", self.flush_timeout),
            ("stream", self.stream_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout { name });
            }
        }
        Ok(())
    }

    /// Capture window length
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Category filter (empty means the protocol's defaults)
    pub fn categories(&self) -> &str {
        &self.categories
    }
}

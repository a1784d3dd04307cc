//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::ControllerConfig;
use crate::domain::ConfigError;

#[derive(Parser, Debug)]
#[command(
    name = "perfcap",
    version,
    about = "Capture a performance trace from a Chromium-family browser",
    after_help = "\
EXAMPLES:
    perfcap --output trace.json                          Capture 5s with default categories
    perfcap --duration-ms 10000 --categories v8,blink    Longer capture, custom categories
    perfcap --browser /opt/chrome/chrome -o t.json       Explicit browser binary
    perfcap --fallback-target -o trace.json              Trace a fresh background target"
)]
pub struct Args {
    /// Browser executable (searched on PATH when omitted)
    #[arg(long, env = "PERFCAP_BROWSER", value_name = "PATH")]
    pub browser: Option<PathBuf>,

    /// Capture window in milliseconds
    #[arg(short, long = "duration-ms", value_name = "MS", default_value = "5000")]
    pub duration_ms: u64,

    /// Comma-separated trace categories (empty = browser default)
    #[arg(short, long, default_value = "")]
    pub categories: String,

    /// File the trace is written to
    #[arg(short, long, value_name = "FILE", default_value = "trace.json")]
    pub output: PathBuf,

    /// Attach to a freshly created background target instead of the browser
    #[arg(long)]
    pub fallback_target: bool,

    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,

    /// Attach handshake deadline in milliseconds
    #[arg(long, value_name = "MS")]
    pub attach_timeout_ms: Option<u64>,

    /// Deadline for the browser to acknowledge the end of tracing
    #[arg(long, value_name = "MS")]
    pub flush_timeout_ms: Option<u64>,

    /// Deadline for reading the whole trace stream
    #[arg(long, value_name = "MS")]
    pub stream_timeout_ms: Option<u64>,

    /// How long a memory dump may run past the capture window
    #[arg(long, value_name = "MS")]
    pub dump_grace_ms: Option<u64>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Build the controller configuration, applying any timeout overrides
    ///
    /// # Errors
    /// Returns an error for a zero duration or a zero timeout
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let mut config = ControllerConfig::new(self.duration_ms, self.categories.clone())?;
        if let Some(ms) = self.attach_timeout_ms {
            config = config.with_attach_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.flush_timeout_ms {
            config = config.with_flush_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.stream_timeout_ms {
            config = config.with_stream_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.dump_grace_ms {
            config = config.with_dump_grace(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("perfcap").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.duration_ms, 5000);
        assert_eq!(args.output, PathBuf::from("trace.json"));
        assert!(!args.fallback_target);

        let config = args.controller_config().unwrap();
        assert_eq!(config.duration(), Duration::from_secs(5));
        assert_eq!(config.categories(), "");
    }

    #[test]
    fn test_timeout_overrides() {
        let args = parse(&["--attach-timeout-ms", "250", "--dump-grace-ms", "0", "-c", "v8"]);
        let config = args.controller_config().unwrap();
        assert_eq!(config.attach_timeout, Duration::from_millis(250));
        assert_eq!(config.dump_grace, Duration::ZERO);
        assert_eq!(config.categories(), "v8");
    }

    #[test]
    fn test_zero_duration_rejected() {
        let args = parse(&["--duration-ms", "0"]);
        assert_eq!(args.controller_config().unwrap_err(), ConfigError::ZeroDuration);
    }

    #[test]
    fn test_zero_flush_timeout_rejected() {
        let args = parse(&["--flush-timeout-ms", "0"]);
        assert!(matches!(
            args.controller_config(),
            Err(ConfigError::ZeroTimeout { name: "flush" })
        ));
    }
}

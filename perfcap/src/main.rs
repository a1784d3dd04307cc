//! # perfcap - Main Entry Point
//!
//! Launches a browser with the debugging pipe, runs one trace capture through
//! the [`TracingController`], and streams the trace to `--output` on a writer
//! thread. Ctrl+C aborts the capture.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

use perfcap::browser::{self, LaunchOptions};
use perfcap::cli::Args;
use perfcap::controller::{State, TracingController};
use perfcap::domain::ConfigError;
use perfcap::preflight::run_preflight_checks;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(Outcome::Completed) => EXIT_SUCCESS,
        Ok(Outcome::Interrupted) => EXIT_INTERRUPTED,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

enum Outcome {
    Completed,
    Interrupted,
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

enum WriterMsg {
    Chunk(Vec<u8>),
    Finish,
}

/// Write chunks to `path` until told to finish; returns bytes written
fn write_trace(path: &Path, rx: &Receiver<WriterMsg>) -> Result<u64> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create trace output file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;

    while let Ok(WriterMsg::Chunk(data)) = rx.recv() {
        writer.write_all(&data).context("Failed to write trace chunk")?;
        written += data.len() as u64;
    }
    writer.flush().context("Failed to flush trace output")?;
    Ok(written)
}

#[tokio::main]
async fn run() -> Result<Outcome> {
    let args = Args::parse();
    let quiet = args.quiet;

    let config = args.controller_config()?;
    let browser_path = run_preflight_checks(args.browser.as_deref(), &args.output)?;

    if !quiet {
        println!("perfcap v{}", env!("CARGO_PKG_VERSION"));
        println!("browser: {}", browser_path.display());
        println!("duration: {} ms", config.duration().as_millis());
        println!("output: {}", args.output.display());
    }

    // ── Writer thread: file I/O stays off the runtime ───────────────────
    let (chunk_tx, chunk_rx) = unbounded();
    let output = args.output.clone();
    let writer = std::thread::spawn(move || write_trace(&output, &chunk_rx));

    // ── Browser and controller ──────────────────────────────────────────
    let mut options = LaunchOptions::new(&browser_path);
    options.headless = !args.no_headless;
    let browser = browser::launch(&options).context("Failed to launch browser")?;

    let controller = TracingController::new(config, browser.transport());
    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    let failure: Arc<Mutex<Option<String>>> = Arc::default();

    {
        let chunk_tx = chunk_tx.clone();
        controller.on_trace_chunk(move |data, _is_last| {
            let _ = chunk_tx.send(WriterMsg::Chunk(data.to_vec()));
        });
    }
    controller.on_state_change(move |state| {
        let _ = state_tx.send(state);
    });
    {
        let failure = Arc::clone(&failure);
        controller.on_error(move |message| {
            if let Ok(mut slot) = failure.lock() {
                slot.get_or_insert_with(|| message.to_string());
            }
        });
    }

    let started = Instant::now();
    controller.start(args.fallback_target);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    // Chunks are queued before the final Idle notification, so the writer
    // has every chunk by the time the loop ends
    loop {
        tokio::select! {
            state = state_rx.recv() => match state {
                Some(State::Idle) | None => break,
                Some(state) => debug!("Capture {state}"),
            },
            _ = &mut ctrl_c, if !interrupted => {
                info!("Interrupted, aborting capture");
                interrupted = true;
                controller.abort();
            }
        }
    }

    let snapshot = controller.snapshot();
    drop(controller);
    let _ = chunk_tx.send(WriterMsg::Finish);
    let written = writer
        .join()
        .map_err(|_| anyhow::anyhow!("Trace writer thread panicked"))??;
    browser.shutdown().await;

    let failure = failure.lock().ok().and_then(|mut slot| slot.take());
    let complete = snapshot.chunks_delivered > 0;
    let exit_reason = match (&failure, interrupted) {
        (Some(_), _) => "failed",
        (None, true) => "interrupted",
        (None, false) if complete => "trace complete",
        (None, false) => "detached",
    };
    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} chunks, {} bytes written to {}",
            exit_reason,
            started.elapsed().as_secs_f64(),
            snapshot.chunks_delivered,
            written,
            args.output.display(),
        );
    }

    if let Some(message) = failure {
        bail!("Trace capture failed: {message}");
    }
    if !interrupted && !complete {
        bail!(
            "Browser detached before the trace completed.\n\n\
             Another debugger may have taken over the target; retry with --fallback-target."
        );
    }
    Ok(if interrupted { Outcome::Interrupted } else { Outcome::Completed })
}

//! # perfcap - Browser Performance Trace Capture
//!
//! perfcap runs a timed trace capture against a Chromium-family browser over
//! its debugging protocol and streams the resulting trace to a consumer, chunk
//! by chunk, without ever buffering the whole trace.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                Browser (--remote-debugging-pipe)             │
//! └───────────────────────┬──────────────────────────────────────┘
//!                         │ NUL-framed JSON over fds 3/4
//!                         ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  transport::PipeTransport                                    │
//! │  • command ids ↔ pending replies                             │
//! │  • events fanned out to subscribers                          │
//! └───────────────────────┬──────────────────────────────────────┘
//!                         │ Transport trait (injected)
//!                         ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  controller::TracingController                               │
//! │                                                              │
//! │   Idle → Attaching → Tracing → Stopping → Flushing → Idle    │
//! │                                                              │
//! │  ┌──────────┐   ┌────────────┐   ┌────────────────────┐      │
//! │  │  Timers  │──▶│  dispatch  │──▶│ notifier (hooks)   │      │
//! │  └──────────┘   │ (1 mutex)  │   └────────────────────┘      │
//! │                 └────────────┘                               │
//! └───────────────────────┬──────────────────────────────────────┘
//!                         │ on_trace_chunk(bytes, is_last)
//!                         ▼
//!                   trace consumer (file writer in the binary)
//! ```
//!
//! ## Module Structure
//!
//! - [`controller`]: the session state machine, its configuration, timers and
//!   consumer hooks
//! - [`transport`]: the [`transport::Transport`] collaborator trait and the
//!   pipe implementation
//! - [`browser`]: launching a browser wired to a pipe transport
//! - [`domain`]: identifiers and error types
//! - [`preflight`]: browser discovery and output checks for the binary
//! - [`cli`]: command-line arguments
//!
//! ## Typical Usage
//!
//! ```bash
//! # Capture five seconds into trace.json
//! perfcap --output trace.json
//!
//! # Custom categories, ten seconds, verbose controller logs
//! RUST_LOG=perfcap=debug perfcap -d 10000 -c v8,blink -o trace.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Generation**: every session gets a fresh number; completions tagged
//!   with an older one are discarded
//! - **Fallback target**: an inert background target attached to when the
//!   browser target is already held by another debugger
//! - **Stream handle**: the browser-side handle the trace is read from with
//!   `IO.read` after tracing ends

pub mod browser;
pub mod cli;
pub mod controller;
pub mod domain;
pub mod preflight;
pub mod transport;

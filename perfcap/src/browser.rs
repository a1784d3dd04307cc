//! Browser process launcher
//!
//! Starts a Chromium-family browser with `--remote-debugging-pipe`. The
//! browser reads protocol messages from fd 3 and writes to fd 4; the parent
//! keeps the opposite ends and hands them to a [`PipeTransport`].

#![allow(unsafe_code)] // pipe2(), fcntl() and dup2() require unsafe

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};

use crate::domain::LaunchError;
use crate::transport::PipeTransport;

/// Descriptor the browser reads commands from
const BROWSER_READ_FD: RawFd = 3;
/// Descriptor the browser writes responses and events to
const BROWSER_WRITE_FD: RawFd = 4;
/// Temporary descriptors are moved above this before the final dup2
const FD_SCRATCH_FLOOR: RawFd = 10;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    pub headless: bool,
    /// Profile directory; a throwaway one under the temp dir when None
    pub user_data_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into(), headless: true, user_data_dir: None, extra_args: Vec::new() }
    }

    fn profile_dir(&self) -> PathBuf {
        self.user_data_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("perfcap-profile-{}", std::process::id()))
        })
    }

    /// Command-line arguments passed to the browser
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--remote-debugging-pipe".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            format!("--user-data-dir={}", self.profile_dir().display()),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(perfcap_common::BLANK_PAGE_URL.to_string());
        args
    }
}

/// A running browser and the transport connected to its debugging pipe
pub struct Browser {
    child: Child,
    transport: Arc<PipeTransport>,
    profile_dir: Option<PathBuf>,
}

/// Create a pipe whose both ends are close-on-exec
fn cloexec_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: fds is a valid two-element array for pipe2 to fill
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by us
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Install `read_fd`/`write_fd` as the browser's fds 3 and 4
///
/// Runs in the forked child before exec, so only async-signal-safe calls.
fn install_pipe_fds(read_fd: RawFd, write_fd: RawFd) -> std::io::Result<()> {
    // Copy both above the target range first so neither dup2 clobbers the other
    // SAFETY: fcntl/dup2 on descriptors inherited from the parent
    unsafe {
        let read_copy = libc::fcntl(read_fd, libc::F_DUPFD_CLOEXEC, FD_SCRATCH_FLOOR);
        let write_copy = libc::fcntl(write_fd, libc::F_DUPFD_CLOEXEC, FD_SCRATCH_FLOOR);
        if read_copy < 0 || write_copy < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::dup2(read_copy, BROWSER_READ_FD) < 0 || libc::dup2(write_copy, BROWSER_WRITE_FD) < 0
        {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Launch the browser and connect a [`PipeTransport`] to it
///
/// # Errors
/// Returns an error if the pipes cannot be created or the process fails to spawn
pub fn launch(options: &LaunchOptions) -> Result<Browser, LaunchError> {
    let (browser_reads, we_write) = cloexec_pipe().map_err(LaunchError::PipeFailed)?;
    let (we_read, browser_writes) = cloexec_pipe().map_err(LaunchError::PipeFailed)?;

    let profile_dir = options.profile_dir();
    let mut command = Command::new(&options.executable);
    command
        .args(options.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let (read_fd, write_fd) = (browser_reads.as_raw_fd(), browser_writes.as_raw_fd());
    // SAFETY: install_pipe_fds only calls fcntl and dup2, which are async-signal-safe
    unsafe {
        command.pre_exec(move || install_pipe_fds(read_fd, write_fd));
    }

    debug!("Launching {} {:?}", options.executable.display(), options.args());
    let child = command.spawn().map_err(|error| LaunchError::SpawnFailed {
        browser: options.executable.display().to_string(),
        error,
    })?;
    info!("Browser started (pid {})", child.id().unwrap_or_default());

    // The child holds its own copies now
    drop(browser_reads);
    drop(browser_writes);

    let reader = pipe::Receiver::from_owned_fd(we_read).map_err(LaunchError::PipeFailed)?;
    let writer = pipe::Sender::from_owned_fd(we_write).map_err(LaunchError::PipeFailed)?;
    let transport = Arc::new(PipeTransport::new(reader, writer));

    Ok(Browser {
        child,
        transport,
        profile_dir: options.user_data_dir.is_none().then_some(profile_dir),
    })
}

impl Browser {
    pub fn transport(&self) -> Arc<PipeTransport> {
        Arc::clone(&self.transport)
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the browser and remove its throwaway profile
    pub async fn shutdown(mut self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: kill() with a pid we spawned and still own
            if let Ok(pid) = libc::pid_t::try_from(pid) {
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
            }
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Browser exited: {status}"),
            Ok(Err(e)) => warn!("Failed to wait for browser: {e}"),
            Err(_) => {
                warn!("Browser did not exit within {SHUTDOWN_GRACE:?}, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill browser: {e}");
                }
            }
        }

        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                debug!("Could not remove {}: {e}", dir.display());
            }
        }
    }
}

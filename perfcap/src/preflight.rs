//! Pre-flight checks for perfcap
//!
//! Resolves the browser executable and validates the output path before
//! anything is launched. Provides clear, actionable error messages when
//! requirements aren't met.

use anyhow::{bail, Result};
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Executable names searched on PATH, in order of preference
pub const BROWSER_CANDIDATES: &[&str] =
    &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"];

/// Run all pre-flight checks, returning the browser to launch
pub fn run_preflight_checks(browser: Option<&Path>, output: &Path) -> Result<PathBuf> {
    let browser = find_browser(browser)?;
    check_output_path(output)?;
    Ok(browser)
}

fn is_executable(path: &Path) -> bool {
    path.metadata().is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Resolve the browser: an explicit path wins, otherwise search PATH
pub fn find_browser(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!(
                "Browser not found: {}\n\n\
                 Check the --browser path (or PERFCAP_BROWSER).",
                path.display()
            );
        }
        if !is_executable(path) {
            bail!(
                "Not an executable file: {}\n\n\
                 --browser must point to a Chromium-family browser binary.",
                path.display()
            );
        }
        return Ok(path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    match search_path(BROWSER_CANDIDATES, &path_var) {
        Some(found) => Ok(found),
        None => bail!(
            "No Chromium-family browser found on PATH (looked for: {}).\n\n\
             Install Chrome or Chromium, or point to one with:\n  \
             perfcap --browser /path/to/chrome ...",
            BROWSER_CANDIDATES.join(", ")
        ),
    }
}

/// First executable named in `candidates` under the directories of `path_var`
fn search_path(candidates: &[&str], path_var: &OsStr) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = std::env::split_paths(path_var).collect();
    candidates
        .iter()
        .flat_map(|name| dirs.iter().map(move |dir| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

/// Check the trace output can be created at `output`
pub fn check_output_path(output: &Path) -> Result<()> {
    if output.is_dir() {
        bail!(
            "Output path is a directory: {}\n\n\
             --output must name a file, e.g. --output trace.json",
            output.display()
        );
    }
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };
    if !parent.is_dir() {
        bail!(
            "Output directory does not exist: {}\n\n\
             Create it first: mkdir -p {}",
            parent.display(),
            parent.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_explicit_browser_not_found() {
        let result = find_browser(Some(Path::new("/nonexistent/path/to/chrome")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Browser not found"));
    }

    #[test]
    fn test_explicit_browser_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chrome");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let err = find_browser(Some(&path)).unwrap_err().to_string();
        assert!(err.contains("Not an executable"));
    }

    #[test]
    fn test_explicit_browser_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_executable(dir.path(), "my-chrome");
        assert_eq!(find_browser(Some(&path)).unwrap(), path);
    }

    #[test]
    fn test_search_path_prefers_candidate_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        make_executable(first.path(), "chromium");
        let chrome = make_executable(second.path(), "google-chrome");

        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(search_path(BROWSER_CANDIDATES, &path_var), Some(chrome));
    }

    #[test]
    fn test_search_path_skips_non_executables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chromium"), "").unwrap();

        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(search_path(BROWSER_CANDIDATES, &path_var), None);
    }

    #[test]
    fn test_output_path_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_output_path(dir.path()).unwrap_err().to_string();
        assert!(err.contains("is a directory"));
    }

    #[test]
    fn test_output_parent_missing() {
        let err = check_output_path(Path::new("/nonexistent/dir/trace.json")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_output_path_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_output_path(&dir.path().join("trace.json")).is_ok());
        assert!(check_output_path(Path::new("trace.json")).is_ok());
    }
}

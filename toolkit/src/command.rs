//! One-shot invocations of external tools (`nmcli`, `pactl`, `wpctl`).
//!
//! Each call spawns the tool once, captures stdout/stderr, and waits for it
//! to finish. A non-zero exit becomes [`Error::CommandFailed`] carrying the
//! argv, the exit code, and the captured stderr text. No timeout is imposed;
//! callers wanting bounded latency wrap these with [`tokio::time::timeout`].

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Runs `argv` to completion and returns its stdout as a string.
///
/// Stdout is decoded lossily: these tools emit UTF-8, and a stray invalid
/// byte should not turn a successful query into a failure.
pub async fn run(argv: &[String]) -> Result<String> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::CommandFailed {
        argv: argv.to_vec(),
        exit_code: None,
        stderr: "empty command".into(),
    })?;

    debug!(command = ?argv, "running one-shot command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::CommandFailed {
            argv: argv.to_vec(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            argv: argv.to_vec(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Convenience wrapper for callers holding `&str` slices.
pub async fn run_args(argv: &[&str]) -> Result<String> {
    let owned: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
    run(&owned).await
}

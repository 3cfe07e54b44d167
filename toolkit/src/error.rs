use thiserror::Error;

/// Shared `Result` alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way the supervision/monitoring core can fail.
///
/// The set is closed on purpose: handling sites match exhaustively instead of
/// string-probing error messages.
#[derive(Debug, Error)]
pub enum Error {
    /// A supervisor operation referenced a daemon name that was never `set`.
    #[error("no daemon registered under '{name}'")]
    DaemonNotFound { name: String },

    /// A supervised child exited. Any exit counts, code 0 included: a daemon
    /// is expected to run until stopped.
    #[error("daemon '{daemon}' died (exit code {exit_code:?}): {stderr}")]
    DaemonDied {
        daemon: String,
        /// `None` when the child was killed by a signal.
        exit_code: Option<i32>,
        /// Whatever the child wrote to stderr before exiting.
        stderr: String,
    },

    /// A one-shot tool invocation failed to spawn or returned non-zero.
    #[error("command {argv:?} failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        argv: Vec<String>,
        /// `None` when the process never spawned or was killed by a signal.
        exit_code: Option<i32>,
        stderr: String,
    },
}

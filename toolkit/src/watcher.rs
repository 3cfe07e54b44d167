//! Generic line-watcher engine.
//!
//! Turns a long-lived child process that prints line-oriented output (such as
//! `nmcli monitor` or `pactl subscribe`) into a stream of typed events: each
//! complete stdout line goes through a pure parser, and every parse hit is
//! sent over an mpsc channel. If the child exits while the watcher is still
//! wanted, it is respawned after a fixed delay, indefinitely and with no
//! backoff. Both concrete monitors are built on this.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Error;

/// Delay between a child exit and its respawn.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// Sends SIGTERM to the process group led by `pid`.
///
/// Children here are spawned with `process_group(0)`, so the group id equals
/// the child pid and the signal reaches any grandchildren too.
pub(crate) fn terminate_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "process group already gone");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// A running watcher. Keep the handle alive for as long as events are
/// wanted; dropping it tears the engine down the same way [`stop`] does.
///
/// [`stop`]: LineWatcher::stop
pub struct LineWatcher {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LineWatcher {
    /// Spawns the engine task for `command`.
    ///
    /// Every stdout line is passed to `parser`; `Some` results are sent to
    /// `events`. Stream read failures (not child exits) are reported through
    /// `on_error`. The engine stops on its own only if the event receiver is
    /// dropped; otherwise it respawns the child after `restart_delay` each
    /// time it exits.
    pub fn spawn<E, P, F>(
        command: Vec<String>,
        restart_delay: Duration,
        parser: P,
        events: mpsc::Sender<E>,
        on_error: F,
    ) -> Self
    where
        E: Send + 'static,
        P: Fn(&str) -> Option<E> + Send + 'static,
        F: Fn(Error) + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(command, restart_delay, parser, events, on_error, stop_rx));
        Self { stop_tx, task }
    }

    /// Stops the engine: kills the current child (by process group), cancels
    /// any pending restart, and suppresses further events.
    ///
    /// Idempotent; calling it on an already-stopped watcher does nothing.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the engine and waits for its task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}

/// Engine loop: spawn, stream, wait, delay, repeat, until stopped.
async fn run<E, P, F>(
    command: Vec<String>,
    restart_delay: Duration,
    parser: P,
    events: mpsc::Sender<E>,
    on_error: F,
    mut stop_rx: watch::Receiver<bool>,
) where
    E: Send + 'static,
    P: Fn(&str) -> Option<E> + Send + 'static,
    F: Fn(Error) + Send + 'static,
{
    let fail = |stderr: String| Error::CommandFailed {
        argv: command.clone(),
        exit_code: None,
        stderr,
    };

    loop {
        if *stop_rx.borrow() {
            return;
        }

        let Some((program, args)) = command.split_first() else {
            on_error(fail("empty command".into()));
            return;
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // A spawn failure is not a child exit, so it does not enter
                // the restart cycle; the monitor owning us keeps running.
                on_error(fail(e.to_string()));
                return;
            }
        };
        let pid = child.id();
        debug!(command = ?command, pid, "watched child started");

        // The child keeps running while we stream its stdout; `take` leaves
        // the Child itself available for the exit wait below.
        let stdout = child.stdout.take();
        let mut lines = stdout.map(|out| BufReader::new(out).lines());

        if let Some(lines) = lines.as_mut() {
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            kill_child(&mut child, pid).await;
                            return;
                        }
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(event) = parser(&line) {
                                if events.send(event).await.is_err() {
                                    // Receiver gone: nobody is listening any more.
                                    kill_child(&mut child, pid).await;
                                    return;
                                }
                            }
                        }
                        Ok(None) => break, // EOF: the child is exiting.
                        Err(e) => {
                            if !*stop_rx.borrow() {
                                on_error(fail(e.to_string()));
                            }
                            break;
                        }
                    }
                }
            }
        }

        // Wait for the actual exit before scheduling the respawn.
        let status = tokio::select! {
            changed = stop_rx.changed() => {
                let _ = changed;
                kill_child(&mut child, pid).await;
                return;
            }
            status = child.wait() => status,
        };

        if *stop_rx.borrow() {
            return;
        }
        match status {
            Ok(status) => warn!(command = ?command, ?status, "watched child exited; restarting"),
            Err(e) => warn!(command = ?command, error = %e, "wait on watched child failed; restarting"),
        }

        // Fixed-delay restart, cancellable by stop.
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            () = sleep(restart_delay) => {}
        }
    }
}

async fn kill_child(child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        terminate_group(pid);
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    async fn recv(rx: &mut mpsc::Receiver<String>) -> Option<String> {
        timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
    }

    // ── streaming ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn parsed_lines_arrive_as_events() {
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = LineWatcher::spawn(
            sh("printf 'one\\ntwo\\n'; sleep 30"),
            DEFAULT_RESTART_DELAY,
            |line: &str| Some(line.to_uppercase()),
            tx,
            |_| {},
        );

        assert_eq!(recv(&mut rx).await.as_deref(), Some("ONE"));
        assert_eq!(recv(&mut rx).await.as_deref(), Some("TWO"));
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn parser_misses_are_dropped() {
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = LineWatcher::spawn(
            sh("printf 'noise\\nkeep\\n'; sleep 30"),
            DEFAULT_RESTART_DELAY,
            |line: &str| (line == "keep").then(|| line.to_string()),
            tx,
            |_| {},
        );

        assert_eq!(recv(&mut rx).await.as_deref(), Some("keep"));
        watcher.shutdown().await;
    }

    // ── auto-restart ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn exited_child_is_respawned() {
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = LineWatcher::spawn(
            sh("echo tick"),
            Duration::from_millis(50),
            |line: &str| Some(line.to_string()),
            tx,
            |_| {},
        );

        // One event per process lifetime: a second one proves a respawn.
        assert_eq!(recv(&mut rx).await.as_deref(), Some("tick"));
        assert_eq!(recv(&mut rx).await.as_deref(), Some("tick"));
        watcher.shutdown().await;
    }

    // ── stop ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_cancels_pending_restart() {
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = LineWatcher::spawn(
            sh("echo once"),
            Duration::from_secs(3600),
            |line: &str| Some(line.to_string()),
            tx,
            |_| {},
        );

        assert_eq!(recv(&mut rx).await.as_deref(), Some("once"));
        watcher.shutdown().await;
        // The channel closes once the engine task is gone.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (tx, _rx) = mpsc::channel::<String>(1);
        let watcher = LineWatcher::spawn(
            sh("sleep 30"),
            DEFAULT_RESTART_DELAY,
            |_: &str| None,
            tx,
            |_| {},
        );
        watcher.stop();
        watcher.stop();
        watcher.shutdown().await;
    }

    // ── failures ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unspawnable_command_reports_error_once() {
        let (err_tx, mut err_rx) = mpsc::channel(4);
        let (tx, _rx) = mpsc::channel::<String>(1);
        let _watcher = LineWatcher::spawn(
            vec!["definitely-not-a-real-binary-ledge".into()],
            Duration::from_millis(10),
            |_: &str| None,
            tx,
            move |e| {
                let _ = err_tx.try_send(e);
            },
        );

        let err = timeout(Duration::from_secs(5), err_rx.recv())
            .await
            .expect("spawn failure should be reported")
            .unwrap();
        assert!(matches!(err, Error::CommandFailed { .. }));
        // No restart cycle for spawn failures: the channel closes with no
        // second report instead of delivering one.
        let second = timeout(Duration::from_millis(200), err_rx.recv()).await;
        assert!(matches!(second, Ok(None) | Err(_)));
    }
}

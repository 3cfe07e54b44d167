//! Supervisor for named background helper daemons.
//!
//! A status bar leans on a handful of long-running helpers (notification
//! daemon, wallpaper setter, compositor helpers, …). The supervisor keeps a
//! registry of them by name, starts and stops them on demand, tracks a
//! reactive run state per daemon, and reports every death (expected or not)
//! on a channel the host consumes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::watcher::terminate_group;

/// Observable run state of a registered daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
}

/// One registered daemon. The state cell and supervising-task handle survive
/// command updates; only `stop` clears the handle.
struct DaemonEntry {
    command: Vec<String>,
    state: watch::Sender<RunState>,
    task: Option<JoinHandle<Result<()>>>,
    /// Pid (= process group id) of the currently supervised child.
    pid: Option<u32>,
}

/// Owned snapshot of one registry entry, safe to hold across mutations.
///
/// `pid` stands in for the supervising-task handle: two observations with the
/// same pid were made under the same supervised child.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonSnapshot {
    pub name: String,
    pub command: Vec<String>,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Name-keyed daemon registry. All operations serialize on one internal
/// mutex; none of them block or suspend while holding it.
pub struct Supervisor {
    daemons: Mutex<HashMap<String, DaemonEntry>>,
    deaths: mpsc::Sender<Error>,
}

impl Supervisor {
    /// Creates an empty registry plus the receiving end of the death reports.
    ///
    /// Every supervising task delivers its terminal [`Error::DaemonDied`] on
    /// this channel. Note that a death does not flip the daemon's observable
    /// state back to [`RunState::Stopped`]; only [`stop`](Self::stop) does.
    pub fn new() -> (Self, mpsc::Receiver<Error>) {
        let (deaths, deaths_rx) = mpsc::channel(32);
        let supervisor = Self {
            daemons: Mutex::new(HashMap::new()),
            deaths,
        };
        (supervisor, deaths_rx)
    }

    /// Registers `command` under `name`, or replaces the command of an
    /// existing entry. An upsert never touches the entry's state cell or its
    /// supervising task: re-`set`ting a running daemon leaves it running with
    /// the old child, and the new command applies on the next `start`.
    pub fn set(&self, name: &str, command: Vec<String>) {
        let mut daemons = self.daemons.lock().unwrap();
        match daemons.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().command = command;
            }
            Entry::Vacant(slot) => {
                let (state, _) = watch::channel(RunState::Stopped);
                slot.insert(DaemonEntry {
                    command,
                    state,
                    task: None,
                    pid: None,
                });
            }
        }
    }

    /// Starts `name`. No-op if it is already running; otherwise spawns the
    /// registered command in its own process group and forks a supervising
    /// task. The state cell flips to `Running` as soon as the task is forked,
    /// without waiting to confirm the child is alive.
    ///
    /// Fails with [`Error::DaemonNotFound`] for unregistered names and with
    /// [`Error::CommandFailed`] when the command cannot be spawned at all.
    pub fn start(&self, name: &str) -> Result<()> {
        let mut daemons = self.daemons.lock().unwrap();
        let entry = daemons
            .get_mut(name)
            .ok_or_else(|| Error::DaemonNotFound { name: name.to_string() })?;

        if *entry.state.borrow() == RunState::Running {
            debug!(daemon = name, "already running");
            return Ok(());
        }

        let child = spawn_daemon(&entry.command)?;
        let pid = child.id();
        debug!(daemon = name, pid, "daemon started");

        let task = tokio::spawn(supervise(name.to_string(), child, self.deaths.clone()));
        entry.state.send_replace(RunState::Running);
        entry.task = Some(task);
        entry.pid = pid;
        Ok(())
    }

    /// Stops `name`: cancels the supervising task, SIGTERMs the child's
    /// process group, and flips the state cell to `Stopped`. A daemon with no
    /// supervising task is already stopped and this is a no-op success.
    ///
    /// Fails with [`Error::DaemonNotFound`] for unregistered names.
    pub fn stop(&self, name: &str) -> Result<()> {
        let mut daemons = self.daemons.lock().unwrap();
        let entry = daemons
            .get_mut(name)
            .ok_or_else(|| Error::DaemonNotFound { name: name.to_string() })?;

        if let Some(task) = entry.task.take() {
            // Abort first so the supervising task cannot report this exit as
            // a death; the aborted task drops the Child, whose kill_on_drop
            // reaps the direct process while killpg covers the group.
            task.abort();
            if let Some(pid) = entry.pid.take() {
                terminate_group(pid);
            }
            entry.state.send_replace(RunState::Stopped);
            debug!(daemon = name, "daemon stopped");
        }
        Ok(())
    }

    /// Returns a receiver that yields `name`'s current run state immediately
    /// and every change after it.
    pub fn subscribe(&self, name: &str) -> Result<watch::Receiver<RunState>> {
        let daemons = self.daemons.lock().unwrap();
        let entry = daemons
            .get(name)
            .ok_or_else(|| Error::DaemonNotFound { name: name.to_string() })?;
        Ok(entry.state.subscribe())
    }

    /// Owned snapshot of every registered entry, in unspecified order.
    pub fn list(&self) -> Vec<DaemonSnapshot> {
        let daemons = self.daemons.lock().unwrap();
        daemons
            .iter()
            .map(|(name, entry)| DaemonSnapshot {
                name: name.clone(),
                command: entry.command.clone(),
                state: *entry.state.borrow(),
                pid: entry.pid,
            })
            .collect()
    }
}

/// Spawns a daemon command with stderr captured for the death report.
fn spawn_daemon(command: &[String]) -> Result<Child> {
    let (program, args) = command.split_first().ok_or_else(|| Error::CommandFailed {
        argv: command.to_vec(),
        exit_code: None,
        stderr: "empty command".into(),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|e| Error::CommandFailed {
        argv: command.to_vec(),
        exit_code: None,
        stderr: e.to_string(),
    })
}

/// Supervising task: waits for the child to exit while draining its stderr,
/// then reports the death and finishes with it as the task's terminal error.
/// Every exit is a death here, code 0 included.
async fn supervise(name: String, child: Child, deaths: mpsc::Sender<Error>) -> Result<()> {
    let (exit_code, stderr) = match child.wait_with_output().await {
        Ok(output) => (
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ),
        Err(e) => (None, e.to_string()),
    };

    warn!(daemon = %name, ?exit_code, "daemon died");
    let _ = deaths
        .send(Error::DaemonDied {
            daemon: name.clone(),
            exit_code,
            stderr: stderr.clone(),
        })
        .await;
    Err(Error::DaemonDied { daemon: name, exit_code, stderr })
}

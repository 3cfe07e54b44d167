//! Audio state via PulseAudio/PipeWire tooling.
//!
//! `pactl subscribe` provides the change feed, `wpctl` the combined
//! volume+mute readout (one call returns both, with 1.5 = 150%), and pactl's
//! JSON output the sink/source inventories. The composed [`AudioMonitor`]
//! pushes volume and default-sink changes to the host through callbacks.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::command;
use crate::error::{Error, Result};
use crate::watcher::{LineWatcher, DEFAULT_RESTART_DELAY};

// ── Event and snapshot types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioAction {
    New,
    Change,
    Remove,
}

/// Object classes appearing in `pactl subscribe` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioObject {
    Sink,
    Source,
    Server,
    Client,
    Card,
    SinkInput,
    SourceOutput,
    Module,
}

/// One decoded `pactl subscribe` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEvent {
    pub action: AudioAction,
    pub object: AudioObject,
    pub index: u32,
}

/// Volume and mute state of the default sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioStatus {
    /// Percentage, 0..=150 in practice (wpctl allows 150% boost).
    pub volume_percent: u32,
    pub muted: bool,
}

/// One sink or source from pactl's JSON inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub index: u32,
    pub name: String,
    pub description: String,
    #[serde(rename = "mute")]
    pub muted: bool,
}

// ── Line parsers ──────────────────────────────────────────────────────────────

/// Decodes one `Event '<action>' on <object> #<index>` subscription line.
/// Unknown actions or objects and malformed lines are `None`.
pub fn parse_subscribe_line(line: &str) -> Option<AudioEvent> {
    let rest = line.strip_prefix("Event '")?;
    let (action, rest) = rest.split_once("' on ")?;
    let (object, index) = rest.split_once(" #")?;

    let action = match action {
        "new" => AudioAction::New,
        "change" => AudioAction::Change,
        "remove" => AudioAction::Remove,
        _ => return None,
    };
    let object = match object {
        "sink" => AudioObject::Sink,
        "source" => AudioObject::Source,
        "server" => AudioObject::Server,
        "client" => AudioObject::Client,
        "card" => AudioObject::Card,
        "sink-input" => AudioObject::SinkInput,
        "source-output" => AudioObject::SourceOutput,
        "module" => AudioObject::Module,
        _ => return None,
    };
    Some(AudioEvent {
        action,
        object,
        index: index.parse().ok()?,
    })
}

/// Parses wpctl's `Volume: <float>` / `Volume: <float> [MUTED]` readout into
/// a percentage plus mute flag.
fn parse_volume(output: &str) -> Option<AudioStatus> {
    let rest = output.trim().strip_prefix("Volume:")?.trim_start();
    let (value, muted) = match rest.strip_suffix("[MUTED]") {
        Some(value) => (value.trim_end(), true),
        None => (rest, false),
    };
    let value: f64 = value.parse().ok()?;
    Some(AudioStatus {
        volume_percent: (value * 100.0).round() as u32,
        muted,
    })
}

// ── One-shot queries ──────────────────────────────────────────────────────────

fn with_args(base: &[String], args: &[&str]) -> Vec<String> {
    base.iter()
        .cloned()
        .chain(args.iter().map(|s| (*s).to_string()))
        .collect()
}

fn default_pactl() -> Vec<String> {
    vec!["pactl".into()]
}

fn default_wpctl() -> Vec<String> {
    vec!["wpctl".into()]
}

/// Combined volume+mute snapshot of the default sink.
pub async fn volume() -> Result<AudioStatus> {
    volume_with(&default_wpctl()).await
}

async fn volume_with(base: &[String]) -> Result<AudioStatus> {
    let argv = with_args(base, &["get-volume", "@DEFAULT_AUDIO_SINK@"]);
    let output = command::run(&argv).await?;
    parse_volume(&output).ok_or_else(|| Error::CommandFailed {
        argv,
        exit_code: None,
        stderr: format!("unexpected volume output: {}", output.trim()),
    })
}

/// Name of the current default sink.
pub async fn default_sink() -> Result<String> {
    default_sink_with(&default_pactl()).await
}

async fn default_sink_with(base: &[String]) -> Result<String> {
    let output = command::run(&with_args(base, &["get-default-sink"])).await?;
    Ok(output.trim().to_string())
}

/// Makes `name` the default sink.
pub async fn set_default_sink(name: &str) -> Result<()> {
    command::run(&with_args(&default_pactl(), &["set-default-sink", name])).await?;
    Ok(())
}

/// Name of the current default source.
pub async fn default_source() -> Result<String> {
    let output = command::run(&with_args(&default_pactl(), &["get-default-source"])).await?;
    Ok(output.trim().to_string())
}

/// Makes `name` the default source.
pub async fn set_default_source(name: &str) -> Result<()> {
    command::run(&with_args(&default_pactl(), &["set-default-source", name])).await?;
    Ok(())
}

/// Inventory of sinks.
pub async fn sinks() -> Result<Vec<AudioDevice>> {
    list_devices(&default_pactl(), "sinks").await
}

/// Inventory of sources.
pub async fn sources() -> Result<Vec<AudioDevice>> {
    list_devices(&default_pactl(), "sources").await
}

async fn list_devices(base: &[String], what: &str) -> Result<Vec<AudioDevice>> {
    let argv = with_args(base, &["--format=json", "list", what]);
    let output = command::run(&argv).await?;
    serde_json::from_str(&output).map_err(|e| Error::CommandFailed {
        argv,
        exit_code: None,
        stderr: format!("unexpected JSON output: {e}"),
    })
}

// ── Monitor ───────────────────────────────────────────────────────────────────

/// Tuning knobs for [`AudioMonitor`], with command overrides for tests.
pub struct AudioMonitorConfig {
    /// Long-lived subscription process whose stdout is watched.
    pub subscribe_command: Vec<String>,
    /// Base argv for pactl-style queries (default sink name).
    pub pactl_command: Vec<String>,
    /// Base argv for the wpctl volume readout.
    pub wpctl_command: Vec<String>,
    /// Respawn delay for the subscription process.
    pub restart_delay: Duration,
}

impl Default for AudioMonitorConfig {
    fn default() -> Self {
        Self {
            subscribe_command: vec!["pactl".into(), "subscribe".into()],
            pactl_command: default_pactl(),
            wpctl_command: default_wpctl(),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

/// Host-side callbacks, invoked from the monitor's event task.
pub struct AudioCallbacks {
    /// Fresh volume+mute snapshot of the default sink.
    pub on_volume: Box<dyn Fn(AudioStatus) + Send + Sync>,
    /// The server-wide default sink changed; carries the new sink name.
    pub on_default_sink: Box<dyn Fn(String) + Send + Sync>,
    /// A refresh query failed; the monitor keeps running.
    pub on_error: Box<dyn Fn(Error) + Send + Sync>,
}

/// Running audio monitor. Stopping (or dropping) it kills the watched
/// subscription child and the event task.
pub struct AudioMonitor {
    watcher: LineWatcher,
    events_task: JoinHandle<()>,
}

impl AudioMonitor {
    /// Pushes an initial volume snapshot, then starts the subscription
    /// watcher.
    pub async fn spawn(config: AudioMonitorConfig, callbacks: AudioCallbacks) -> Self {
        let callbacks = Arc::new(callbacks);

        match volume_with(&config.wpctl_command).await {
            Ok(status) => (callbacks.on_volume)(status),
            Err(e) => (callbacks.on_error)(e),
        }

        let (event_tx, event_rx) = mpsc::channel(32);
        let watcher = {
            let callbacks = Arc::clone(&callbacks);
            LineWatcher::spawn(
                config.subscribe_command.clone(),
                config.restart_delay,
                |line: &str| parse_subscribe_line(line),
                event_tx,
                move |e| (callbacks.on_error)(e),
            )
        };

        let events_task = tokio::spawn(handle_events(
            event_rx,
            config.pactl_command.clone(),
            config.wpctl_command.clone(),
            callbacks,
        ));

        Self { watcher, events_task }
    }

    /// Stops the monitor. Idempotent.
    pub fn stop(&self) {
        self.watcher.stop();
        self.events_task.abort();
    }
}

impl Drop for AudioMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Event loop. A `change` on a sink means volume or mute moved; a `change`
/// on the server means the default sink may have switched, in which case the
/// default-sink query must complete before the volume query so the two
/// callbacks arrive consistently ordered. Everything else is ignored.
async fn handle_events(
    mut events: mpsc::Receiver<AudioEvent>,
    pactl: Vec<String>,
    wpctl: Vec<String>,
    callbacks: Arc<AudioCallbacks>,
) {
    while let Some(event) = events.recv().await {
        if event.action != AudioAction::Change {
            continue;
        }
        match event.object {
            AudioObject::Sink => {
                debug!(index = event.index, "sink changed");
                report_volume(&wpctl, &callbacks).await;
            }
            AudioObject::Server => {
                debug!("server changed; re-resolving default sink");
                match default_sink_with(&pactl).await {
                    Ok(name) => (callbacks.on_default_sink)(name),
                    Err(e) => (callbacks.on_error)(e),
                }
                report_volume(&wpctl, &callbacks).await;
            }
            _ => {}
        }
    }
}

async fn report_volume(wpctl: &[String], callbacks: &AudioCallbacks) {
    match volume_with(wpctl).await {
        Ok(status) => (callbacks.on_volume)(status),
        Err(e) => (callbacks.on_error)(e),
    }
}

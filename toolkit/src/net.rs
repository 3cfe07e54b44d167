//! Network state via NetworkManager.
//!
//! Three layers, leaves first: pure parsers for `nmcli`'s monitor lines and
//! terse (`-t`) colon-delimited output, one-shot queries that snapshot the
//! current connection state, and the composed [`NetworkMonitor`] that pushes
//! connect/disconnect/signal changes to the host through callbacks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::command;
use crate::error::{Error, Result};
use crate::fastpath;
use crate::watcher::{LineWatcher, DEFAULT_RESTART_DELAY};

// ── Event and snapshot types ──────────────────────────────────────────────────

/// Overall connectivity level as reported by NetworkManager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Full,
    Limited,
    None,
}

/// One decoded `nmcli monitor` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Connected { device: String },
    Disconnected { device: String },
    Connecting { device: String, ssid: String },
    Connectivity(ConnectivityState),
}

/// Kind of an active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Wifi,
    Ethernet,
    Other,
}

/// Snapshot of the active connection, pushed through the connect callback.
/// The optional fields are wifi detail (or the ethernet link rate) and stay
/// `None` where the source has nothing to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    /// Connection profile name (for wifi usually the SSID).
    pub name: String,
    pub kind: NetworkKind,
    pub device: String,
    /// Signal strength percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
}

/// One row of the wifi scan list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub bssid: String,
    pub signal: u8,
    pub rate: String,
    pub frequency: String,
    pub channel: u32,
    pub security: String,
    pub device: String,
    pub active: bool,
}

/// Link state of a wired device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EthernetState {
    Connected,
    Unavailable,
    Disconnected,
}

/// One wired device from `nmcli device status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EthernetStatus {
    pub device: String,
    pub state: EthernetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Link speed in Mb/s from sysfs; absent when the kernel reports unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mbps: Option<u32>,
}

/// One row of `nmcli connection show --active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnection {
    pub name: String,
    pub kind: NetworkKind,
    pub device: String,
}

// ── Line parser ───────────────────────────────────────────────────────────────

/// Decodes one `nmcli monitor` line. Anything outside the four known shapes
/// (including NetworkManager's own chatter) is `None`.
pub fn parse_monitor_line(line: &str) -> Option<NetEvent> {
    if let Some(rest) = line.strip_prefix("Connectivity is now '") {
        let state = match rest.strip_suffix('\'')? {
            "full" => ConnectivityState::Full,
            "limited" => ConnectivityState::Limited,
            "none" => ConnectivityState::None,
            _ => return None,
        };
        return Some(NetEvent::Connectivity(state));
    }

    let (device, action) = line.split_once(": ")?;
    if device.is_empty() {
        return None;
    }
    match action {
        "connected" => Some(NetEvent::Connected { device: device.to_string() }),
        "disconnected" => Some(NetEvent::Disconnected { device: device.to_string() }),
        _ => action
            .strip_prefix("using connection '")
            .and_then(|rest| rest.strip_suffix('\''))
            .map(|ssid| NetEvent::Connecting {
                device: device.to_string(),
                ssid: ssid.to_string(),
            }),
    }
}

// ── Terse-format parsing ──────────────────────────────────────────────────────

/// Splits one terse `nmcli -t` row on `:`, honouring backslash escapes
/// (`\:` inside BSSIDs, `\\` for a literal backslash).
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    field.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Parses `SSID:BSSID:SIGNAL:RATE:FREQ:CHAN:SECURITY:DEVICE:ACTIVE` rows.
/// Rows with the wrong arity or non-numeric signal/channel are skipped.
pub fn parse_wifi_list(output: &str) -> Vec<WifiNetwork> {
    output
        .lines()
        .filter_map(|line| {
            let f = split_terse(line);
            if f.len() != 9 {
                return None;
            }
            Some(WifiNetwork {
                ssid: f[0].clone(),
                bssid: f[1].clone(),
                signal: f[2].parse().ok()?,
                rate: f[3].clone(),
                frequency: f[4].clone(),
                channel: f[5].parse().ok()?,
                security: f[6].clone(),
                device: f[7].clone(),
                active: f[8] == "yes",
            })
        })
        .collect()
}

/// Parses `DEVICE:TYPE:STATE:CONNECTION` rows, keeping only ethernet devices.
pub fn parse_ethernet_list(output: &str) -> Vec<EthernetStatus> {
    output
        .lines()
        .filter_map(|line| {
            let f = split_terse(line);
            if f.len() != 4 || f[1] != "ethernet" {
                return None;
            }
            let state = match f[2].as_str() {
                "connected" => EthernetState::Connected,
                "unavailable" => EthernetState::Unavailable,
                _ => EthernetState::Disconnected,
            };
            Some(EthernetStatus {
                device: f[0].clone(),
                state,
                connection: (!f[3].is_empty()).then(|| f[3].clone()),
                speed_mbps: None,
            })
        })
        .collect()
}

/// Parses `NAME:TYPE:DEVICE` rows of the active-connection list, skipping
/// loopback. Types map to wifi/ethernet/other.
pub fn parse_active_connections(output: &str) -> Vec<ActiveConnection> {
    output
        .lines()
        .filter_map(|line| {
            let f = split_terse(line);
            if f.len() != 3 || f[1] == "loopback" {
                return None;
            }
            let kind = match f[1].as_str() {
                "802-11-wireless" => NetworkKind::Wifi,
                "802-3-ethernet" => NetworkKind::Ethernet,
                _ => NetworkKind::Other,
            };
            Some(ActiveConnection {
                name: f[0].clone(),
                kind,
                device: f[2].clone(),
            })
        })
        .collect()
}

/// Detail row of the currently associated wifi network:
/// `SSID:SIGNAL:RATE:FREQ:CHAN:SECURITY:DEVICE:ACTIVE`, active row only.
struct ActiveWifiDetail {
    signal: Option<u8>,
    rate: Option<String>,
    frequency: Option<String>,
    channel: Option<u32>,
    security: Option<String>,
}

fn parse_active_wifi(output: &str) -> Option<ActiveWifiDetail> {
    output.lines().find_map(|line| {
        let f = split_terse(line);
        if f.len() != 8 || f[7] != "yes" {
            return None;
        }
        Some(ActiveWifiDetail {
            signal: f[1].parse().ok(),
            rate: (!f[2].is_empty()).then(|| f[2].clone()),
            frequency: (!f[3].is_empty()).then(|| f[3].clone()),
            channel: f[4].parse().ok(),
            security: (!f[5].is_empty()).then(|| f[5].clone()),
        })
    })
}

// ── One-shot queries ──────────────────────────────────────────────────────────

fn nmcli(base: &[String], args: &[&str]) -> Vec<String> {
    base.iter()
        .cloned()
        .chain(args.iter().map(|s| (*s).to_string()))
        .collect()
}

fn default_tool() -> Vec<String> {
    vec!["nmcli".into()]
}

/// Scans for visible wifi networks.
pub async fn wifi_networks() -> Result<Vec<WifiNetwork>> {
    wifi_networks_with(&default_tool()).await
}

async fn wifi_networks_with(base: &[String]) -> Result<Vec<WifiNetwork>> {
    let argv = nmcli(
        base,
        &[
            "-t",
            "-f",
            "SSID,BSSID,SIGNAL,RATE,FREQ,CHAN,SECURITY,DEVICE,ACTIVE",
            "device",
            "wifi",
            "list",
        ],
    );
    Ok(parse_wifi_list(&command::run(&argv).await?))
}

/// Lists wired devices, with the sysfs link speed filled in for connected ones.
pub async fn ethernet_devices() -> Result<Vec<EthernetStatus>> {
    ethernet_devices_with(&default_tool()).await
}

async fn ethernet_devices_with(base: &[String]) -> Result<Vec<EthernetStatus>> {
    let argv = nmcli(base, &["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device", "status"]);
    let mut devices = parse_ethernet_list(&command::run(&argv).await?);
    for dev in &mut devices {
        if dev.state == EthernetState::Connected {
            dev.speed_mbps = fastpath::ethernet_speed(&dev.device).await;
        }
    }
    Ok(devices)
}

/// Snapshot of the current active connection, if any. Wifi connections are
/// enriched with signal/rate/frequency/channel/security from the scan table;
/// ethernet connections with the sysfs link rate.
pub async fn active_connection() -> Result<Option<NetworkStatus>> {
    active_connection_with(&default_tool()).await
}

async fn active_connection_with(base: &[String]) -> Result<Option<NetworkStatus>> {
    let argv = nmcli(base, &["-t", "-f", "NAME,TYPE,DEVICE", "connection", "show", "--active"]);
    let connections = parse_active_connections(&command::run(&argv).await?);
    let Some(conn) = connections.into_iter().next() else {
        return Ok(None);
    };

    let mut status = NetworkStatus {
        name: conn.name,
        kind: conn.kind,
        device: conn.device,
        signal: None,
        rate: None,
        frequency: None,
        channel: None,
        security: None,
    };

    match conn.kind {
        NetworkKind::Wifi => {
            let argv = nmcli(
                base,
                &[
                    "-t",
                    "-f",
                    "SSID,SIGNAL,RATE,FREQ,CHAN,SECURITY,DEVICE,ACTIVE",
                    "device",
                    "wifi",
                ],
            );
            if let Some(detail) = parse_active_wifi(&command::run(&argv).await?) {
                status.signal = detail.signal;
                status.rate = detail.rate;
                status.frequency = detail.frequency;
                status.channel = detail.channel;
                status.security = detail.security;
            }
        }
        NetworkKind::Ethernet => {
            status.rate = fastpath::ethernet_speed(&status.device)
                .await
                .map(|mbps| format!("{mbps} Mbit/s"));
        }
        NetworkKind::Other => {}
    }
    Ok(Some(status))
}

// ── Monitor ───────────────────────────────────────────────────────────────────

/// Tuning knobs for [`NetworkMonitor`]. The command overrides exist so tests
/// (and exotic setups) can substitute the external tools.
pub struct NetworkMonitorConfig {
    /// Long-lived monitor process whose stdout is watched.
    pub monitor_command: Vec<String>,
    /// Base argv for one-shot queries; the query arguments are appended.
    pub tool_command: Vec<String>,
    /// Respawn delay for the monitor process.
    pub restart_delay: Duration,
    /// Signal poll cadence while a device is associated.
    pub poll_interval: Duration,
    /// Wireless statistics table to poll.
    pub wireless_table: PathBuf,
}

impl Default for NetworkMonitorConfig {
    fn default() -> Self {
        Self {
            monitor_command: vec!["nmcli".into(), "monitor".into()],
            tool_command: default_tool(),
            restart_delay: DEFAULT_RESTART_DELAY,
            poll_interval: Duration::from_millis(1000),
            wireless_table: PathBuf::from(fastpath::WIRELESS_TABLE_PATH),
        }
    }
}

/// Host-side callbacks. All of them are invoked from the monitor's tasks.
pub struct NetworkCallbacks {
    /// A connection came up (or was up at monitor start).
    pub on_connect: Box<dyn Fn(NetworkStatus) + Send + Sync>,
    /// The device disassociated.
    pub on_disconnect: Box<dyn Fn() + Send + Sync>,
    /// Fresh signal strength percentage from the fast-path poll.
    pub on_signal: Box<dyn Fn(u8) + Send + Sync>,
    /// A refresh query failed; the monitor keeps running.
    pub on_error: Box<dyn Fn(Error) + Send + Sync>,
}

/// Running network monitor. Stopping (or dropping) it kills the watched
/// `nmcli monitor` child and both internal tasks.
pub struct NetworkMonitor {
    watcher: LineWatcher,
    events_task: JoinHandle<()>,
    poller_task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Queries the current active connection, then starts the line watcher
    /// and the signal poller.
    pub async fn spawn(config: NetworkMonitorConfig, callbacks: NetworkCallbacks) -> Self {
        let callbacks = Arc::new(callbacks);
        let device: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        // Initial snapshot: a connection that is already up must reach the
        // host without waiting for the next monitor event.
        match active_connection_with(&config.tool_command).await {
            Ok(Some(status)) => {
                *device.lock().unwrap() = Some(status.device.clone());
                (callbacks.on_connect)(status);
            }
            Ok(None) => {}
            Err(e) => (callbacks.on_error)(e),
        }

        let (event_tx, event_rx) = mpsc::channel(32);
        let watcher = {
            let callbacks = Arc::clone(&callbacks);
            LineWatcher::spawn(
                config.monitor_command.clone(),
                config.restart_delay,
                |line: &str| parse_monitor_line(line),
                event_tx,
                move |e| (callbacks.on_error)(e),
            )
        };

        let events_task = tokio::spawn(handle_events(
            event_rx,
            config.tool_command.clone(),
            Arc::clone(&device),
            Arc::clone(&callbacks),
        ));
        let poller_task = tokio::spawn(poll_signal(
            config.poll_interval,
            config.wireless_table.clone(),
            device,
            callbacks,
        ));

        Self { watcher, events_task, poller_task }
    }

    /// Stops the monitor. Idempotent.
    pub fn stop(&self) {
        self.watcher.stop();
        self.events_task.abort();
        self.poller_task.abort();
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Event loop: tracks the associated device and refreshes the connection
/// snapshot on connect. `Connecting` lines carry the SSID but the follow-up
/// `connected` triggers the refresh; `Connectivity` lines are decoded and
/// deliberately go nowhere.
async fn handle_events(
    mut events: mpsc::Receiver<NetEvent>,
    tool: Vec<String>,
    device: Arc<Mutex<Option<String>>>,
    callbacks: Arc<NetworkCallbacks>,
) {
    while let Some(event) = events.recv().await {
        match event {
            NetEvent::Connected { device: dev } => {
                debug!(device = %dev, "device connected");
                *device.lock().unwrap() = Some(dev);
                // The monitor line has no SSID/signal/rate; re-query for them.
                match active_connection_with(&tool).await {
                    Ok(Some(status)) => (callbacks.on_connect)(status),
                    Ok(None) => {}
                    Err(e) => (callbacks.on_error)(e),
                }
            }
            NetEvent::Disconnected { device: dev } => {
                debug!(device = %dev, "device disconnected");
                *device.lock().unwrap() = None;
                (callbacks.on_disconnect)();
            }
            NetEvent::Connecting { .. } | NetEvent::Connectivity(_) => {}
        }
    }
}

/// Fast-path poll loop: reads the kernel's link quality for the associated
/// device each tick instead of invoking the CLI. Idle when no device is
/// associated or the table yields nothing.
async fn poll_signal(
    poll_interval: Duration,
    table: PathBuf,
    device: Arc<Mutex<Option<String>>>,
    callbacks: Arc<NetworkCallbacks>,
) {
    let mut ticker = interval(poll_interval);
    loop {
        ticker.tick().await;
        let current = device.lock().unwrap().clone();
        let Some(dev) = current else { continue };
        if let Some(signal) = fastpath::wifi_signal(&table, &dev).await {
            (callbacks.on_signal)(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_monitor_line ────────────────────────────────────────────────────

    #[test]
    fn connected_line() {
        assert_eq!(
            parse_monitor_line("wlan0: connected"),
            Some(NetEvent::Connected { device: "wlan0".into() })
        );
    }

    #[test]
    fn disconnected_line() {
        assert_eq!(
            parse_monitor_line("wlan0: disconnected"),
            Some(NetEvent::Disconnected { device: "wlan0".into() })
        );
    }

    #[test]
    fn using_connection_line_keeps_spaces_in_ssid() {
        assert_eq!(
            parse_monitor_line("wlan0: using connection 'My Network 5G'"),
            Some(NetEvent::Connecting {
                device: "wlan0".into(),
                ssid: "My Network 5G".into(),
            })
        );
    }

    #[test]
    fn connectivity_levels() {
        assert_eq!(
            parse_monitor_line("Connectivity is now 'limited'"),
            Some(NetEvent::Connectivity(ConnectivityState::Limited))
        );
        assert_eq!(
            parse_monitor_line("Connectivity is now 'full'"),
            Some(NetEvent::Connectivity(ConnectivityState::Full))
        );
        assert_eq!(
            parse_monitor_line("Connectivity is now 'none'"),
            Some(NetEvent::Connectivity(ConnectivityState::None))
        );
    }

    #[test]
    fn unknown_connectivity_level_is_unrecognized() {
        assert_eq!(parse_monitor_line("Connectivity is now 'portal'"), None);
    }

    #[test]
    fn chatter_is_unrecognized() {
        assert_eq!(parse_monitor_line("NetworkManager is running"), None);
        assert_eq!(parse_monitor_line("wlan0: connection profile changed"), None);
        assert_eq!(parse_monitor_line(""), None);
    }

    // ── terse parsing ─────────────────────────────────────────────────────────

    #[test]
    fn wifi_row_with_escaped_bssid_colons() {
        let out = "HomeNet:AA\\:BB\\:CC\\:DD\\:EE\\:FF:87:270 Mbit/s:5180 MHz:36:WPA2:wlan0:yes\n";
        let nets = parse_wifi_list(out);
        assert_eq!(nets.len(), 1);
        let n = &nets[0];
        assert_eq!(n.ssid, "HomeNet");
        assert_eq!(n.bssid, "AA:BB:CC:DD:EE:FF");
        assert_eq!(n.signal, 87);
        assert_eq!(n.channel, 36);
        assert!(n.active);
    }

    #[test]
    fn wifi_rows_with_bad_arity_or_numbers_are_skipped() {
        let out = "short:row\n\
                   Net:AA\\:BB\\:CC\\:DD\\:EE\\:FF:high:54 Mbit/s:2412 MHz:1:WPA2:wlan0:no\n";
        assert!(parse_wifi_list(out).is_empty());
    }

    #[test]
    fn inactive_wifi_row() {
        let out = "Cafe:11\\:22\\:33\\:44\\:55\\:66:40:130 Mbit/s:2437 MHz:6:WPA2:wlan0:no\n";
        assert!(!parse_wifi_list(out)[0].active);
    }

    #[test]
    fn ethernet_rows_filter_and_map_states() {
        let out = "lo:loopback:unmanaged:\n\
                   eth0:ethernet:connected:Wired connection 1\n\
                   eth1:ethernet:unavailable:\n\
                   eth2:ethernet:connecting:\n\
                   wlan0:wifi:connected:HomeNet\n";
        let devs = parse_ethernet_list(out);
        assert_eq!(devs.len(), 3);
        assert_eq!(devs[0].state, EthernetState::Connected);
        assert_eq!(devs[0].connection.as_deref(), Some("Wired connection 1"));
        assert_eq!(devs[1].state, EthernetState::Unavailable);
        assert_eq!(devs[1].connection, None);
        assert_eq!(devs[2].state, EthernetState::Disconnected);
    }

    #[test]
    fn active_connections_map_types_and_skip_loopback() {
        let out = "lo:loopback:lo\n\
                   HomeNet:802-11-wireless:wlan0\n\
                   Wired connection 1:802-3-ethernet:eth0\n\
                   tun0:tun:tun0\n";
        let conns = parse_active_connections(out);
        assert_eq!(conns.len(), 3);
        assert_eq!(conns[0].kind, NetworkKind::Wifi);
        assert_eq!(conns[0].name, "HomeNet");
        assert_eq!(conns[1].kind, NetworkKind::Ethernet);
        assert_eq!(conns[2].kind, NetworkKind::Other);
    }

    #[test]
    fn active_wifi_picks_the_active_row_only() {
        let out = "Cafe:40:130 Mbit/s:2437 MHz:6:WPA2:wlan0:no\n\
                   HomeNet:87:270 Mbit/s:5180 MHz:36:WPA2:wlan0:yes\n";
        let detail = parse_active_wifi(out).unwrap();
        assert_eq!(detail.signal, Some(87));
        assert_eq!(detail.channel, Some(36));
        assert_eq!(detail.rate.as_deref(), Some("270 Mbit/s"));
    }

    #[test]
    fn active_wifi_without_active_row_is_none() {
        let out = "Cafe:40:130 Mbit/s:2437 MHz:6:WPA2:wlan0:no\n";
        assert!(parse_active_wifi(out).is_none());
    }

    // ── monitor composition ───────────────────────────────────────────────────

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    /// Callbacks that forward everything into one channel for assertions.
    fn channel_callbacks() -> (NetworkCallbacks, mpsc::Receiver<&'static str>) {
        let (tx, rx) = mpsc::channel(32);
        let connect_tx = tx.clone();
        let disconnect_tx = tx.clone();
        let signal_tx = tx.clone();
        let callbacks = NetworkCallbacks {
            on_connect: Box::new(move |_| {
                let _ = connect_tx.try_send("connect");
            }),
            on_disconnect: Box::new(move || {
                let _ = disconnect_tx.try_send("disconnect");
            }),
            on_signal: Box::new(move |_| {
                let _ = signal_tx.try_send("signal");
            }),
            on_error: Box::new(move |_| {
                let _ = tx.try_send("error");
            }),
        };
        (callbacks, rx)
    }

    /// Config whose tool invocations always fail and whose monitor process is
    /// a shell stub, so tests never depend on nmcli being installed.
    fn stub_config(monitor_script: &str) -> NetworkMonitorConfig {
        NetworkMonitorConfig {
            monitor_command: sh(monitor_script),
            // sh -c ignores the query arguments appended after the script.
            tool_command: sh("exit 1"),
            restart_delay: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(50),
            wireless_table: PathBuf::from("/nonexistent/wireless"),
        }
    }

    async fn wait_for(rx: &mut mpsc::Receiver<&'static str>, wanted: &str) {
        loop {
            let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for '{wanted}'"))
                .unwrap();
            if got == wanted {
                return;
            }
        }
    }

    #[tokio::test]
    async fn disconnect_event_reaches_the_callback() {
        let (callbacks, mut rx) = channel_callbacks();
        let monitor = NetworkMonitor::spawn(
            stub_config("echo 'wlan0: disconnected'; sleep 30"),
            callbacks,
        )
        .await;

        wait_for(&mut rx, "disconnect").await;
        monitor.stop();
    }

    #[tokio::test]
    async fn failed_refresh_after_connect_reaches_the_error_callback() {
        let (callbacks, mut rx) = channel_callbacks();
        let monitor = NetworkMonitor::spawn(
            stub_config("echo 'wlan0: connected'; sleep 30"),
            callbacks,
        )
        .await;

        // Init query fails and the connected-event refresh fails again; both
        // land on the error callback rather than killing the monitor.
        wait_for(&mut rx, "error").await;
        monitor.stop();
        monitor.stop();
    }

    #[tokio::test]
    async fn poller_reports_signal_for_the_connected_device() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("wireless");
        std::fs::write(
            &table,
            " wlan0: 0000   63.  -40.  -256        0      0      0      0      0        0\n",
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(32);
        let callbacks = NetworkCallbacks {
            on_connect: Box::new(|_| {}),
            on_disconnect: Box::new(|| {}),
            on_signal: Box::new(move |pct| {
                let _ = tx.try_send(pct);
            }),
            on_error: Box::new(|_| {}),
        };
        let mut config = stub_config("echo 'wlan0: connected'; sleep 30");
        config.wireless_table = table;
        let monitor = NetworkMonitor::spawn(config, callbacks).await;

        let pct = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poller should report a signal")
            .unwrap();
        assert_eq!(pct, 90); // round(63 / 70 * 100)
        monitor.stop();
    }
}

//! Supervision and monitoring core of the Ledge status bar.
//!
//! Two pieces do the heavy lifting: the [`Supervisor`], which owns a registry
//! of named helper daemons and keeps them running until told otherwise, and
//! the line-watcher engine behind [`NetworkMonitor`] and [`AudioMonitor`],
//! which turns `nmcli monitor` / `pactl subscribe` into typed callback
//! streams that survive tool crashes. Rendering, theming, and launcher
//! execution live in the bar itself, on top of this crate.

pub mod audio;
pub mod command;
pub mod config;
pub mod error;
pub mod fastpath;
pub mod net;
pub mod supervisor;
pub mod watcher;

pub use audio::{AudioCallbacks, AudioMonitor, AudioMonitorConfig, AudioStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use net::{NetworkCallbacks, NetworkMonitor, NetworkMonitorConfig, NetworkStatus};
pub use supervisor::{DaemonSnapshot, RunState, Supervisor};
pub use watcher::LineWatcher;

//! Cheap kernel-exposed signal sources, polled instead of shelling out.
//!
//! Re-running `nmcli` every tick just to read a signal strength is wasteful;
//! the kernel already exports wifi link quality in `/proc/net/wireless` and
//! ethernet link speed in sysfs. These readers parse those two sources.

use std::path::Path;

use regex::Regex;
use tokio::fs;

/// Default location of the kernel's wireless statistics table.
pub const WIRELESS_TABLE_PATH: &str = "/proc/net/wireless";

/// Extracts the link quality for `device` from the contents of
/// `/proc/net/wireless` and converts it to a percentage.
///
/// The table reports quality on a 0–70 scale in the third column, printed
/// with a trailing dot (`54.`). Returns `None` when the device has no row.
pub fn parse_link_quality(table: &str, device: &str) -> Option<u8> {
    let pattern = format!(r"(?m)^\s*{}:\s+\d+\s+(\d+)\.", regex::escape(device));
    // The pattern only varies in the escaped device name and cannot fail to compile.
    let re = Regex::new(&pattern).ok()?;
    let quality: f64 = re.captures(table)?.get(1)?.as_str().parse().ok()?;
    Some((quality / 70.0 * 100.0).round() as u8)
}

/// Reads the wireless table at `path` and returns the signal percentage for
/// `device`, or `None` if the table is unreadable or has no row for it.
pub async fn wifi_signal(path: &Path, device: &str) -> Option<u8> {
    let table = fs::read_to_string(path).await.ok()?;
    parse_link_quality(&table, device)
}

/// Parses the contents of `/sys/class/net/<device>/speed`.
///
/// The kernel reports `-1` when the link speed is unknown (interface down,
/// virtual device); that and any other non-positive value is absent, not zero.
pub fn parse_ethernet_speed(raw: &str) -> Option<u32> {
    let speed: i64 = raw.trim().parse().ok()?;
    if speed > 0 {
        Some(speed as u32)
    } else {
        None
    }
}

/// Reads the sysfs link speed for `device` in Mb/s.
pub async fn ethernet_speed(device: &str) -> Option<u32> {
    let path = format!("/sys/class/net/{device}/speed");
    let raw = fs::read_to_string(&path).await.ok()?;
    parse_ethernet_speed(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   32.  -63.  -256        0      0      0      0      0        0
 wlp3s0: 0000   70.  -30.  -256       0      0      0      0      0        0
";

    // ── parse_link_quality ────────────────────────────────────────────────────

    #[test]
    fn quality_32_of_70_is_46_percent() {
        assert_eq!(parse_link_quality(TABLE, "wlan0"), Some(46));
    }

    #[test]
    fn quality_70_of_70_is_100_percent() {
        assert_eq!(parse_link_quality(TABLE, "wlp3s0"), Some(100));
    }

    #[test]
    fn missing_device_has_no_signal() {
        assert_eq!(parse_link_quality(TABLE, "wlan1"), None);
    }

    #[test]
    fn device_name_is_not_treated_as_a_pattern() {
        // A name with regex metacharacters must match literally or not at all.
        assert_eq!(parse_link_quality(TABLE, "wl.n0"), None);
    }

    #[test]
    fn header_lines_do_not_match() {
        assert_eq!(parse_link_quality(TABLE, "face"), None);
    }

    // ── parse_ethernet_speed ──────────────────────────────────────────────────

    #[test]
    fn positive_speed_parses() {
        assert_eq!(parse_ethernet_speed("1000\n"), Some(1000));
    }

    #[test]
    fn minus_one_means_unknown() {
        assert_eq!(parse_ethernet_speed("-1\n"), None);
    }

    #[test]
    fn zero_means_unknown() {
        assert_eq!(parse_ethernet_speed("0"), None);
    }

    #[test]
    fn garbage_means_unknown() {
        assert_eq!(parse_ethernet_speed("unknown"), None);
    }

    // ── wifi_signal ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn wifi_signal_reads_a_table_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wireless");
        std::fs::write(&path, TABLE).unwrap();
        assert_eq!(wifi_signal(&path, "wlan0").await, Some(46));
    }

    #[tokio::test]
    async fn wifi_signal_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent");
        assert_eq!(wifi_signal(&path, "wlan0").await, None);
    }
}

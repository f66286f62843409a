//! Parser for `tc -s class show` output.
//!
//! The listing interleaves class headers with statistics lines:
//!
//! ```text
//! class htb 1:10 parent 1:1 prio 4 rate 2Mbit ceil 2Mbit burst 15Kb cburst 1600b
//!  Sent 52340 bytes 412 pkt (dropped 3, overlimits 17 requeues 0)
//!  rate 1824bit 2pps backlog 0b 0p requeues 0
//! ```
//!
//! Only the header, the `Sent` line and the `rate` line matter; anything
//! else (lending/tokens lines, unrelated qdiscs) is skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^class htb 1:(\d+)").expect("class regex"));
static SENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+Sent (\d+) bytes (\d+) pkt \(dropped (\d+),\s*overlimits (\d+)")
        .expect("sent regex")
});
static RATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+rate (\S+) (\S+)").expect("rate regex"));

/// Counters for one device's HTB class, as last sampled.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TcClassStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub dropped: u64,
    pub overlimits: u64,
    pub current_rate: String,
    pub current_pps: String,
    pub classid: u16,
}

/// Parse one interface's `tc -s class show` listing into per-class stats.
pub fn parse_class_stats(raw: &str) -> HashMap<u16, TcClassStats> {
    let mut stats = HashMap::new();
    let mut current: Option<u16> = None;

    for line in raw.lines() {
        if let Some(caps) = CLASS_RE.captures(line) {
            current = caps[1].parse().ok();
            continue;
        }
        let Some(cid) = current else { continue };

        if let Some(caps) = SENT_RE.captures(line) {
            stats.insert(
                cid,
                TcClassStats {
                    bytes_sent: caps[1].parse().unwrap_or(0),
                    packets_sent: caps[2].parse().unwrap_or(0),
                    dropped: caps[3].parse().unwrap_or(0),
                    overlimits: caps[4].parse().unwrap_or(0),
                    classid: cid,
                    ..Default::default()
                },
            );
        } else if let Some(caps) = RATE_RE.captures(line) {
            if let Some(entry) = stats.get_mut(&cid) {
                entry.current_rate = caps[1].to_string();
                entry.current_pps = caps[2].to_string();
            }
            // rate is the last line of interest in a class block
            current = None;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
class htb 1:1 root rate 50Mbit ceil 50Mbit burst 1600b cburst 1600b
 Sent 902141 bytes 4231 pkt (dropped 0, overlimits 4 requeues 0)
 rate 12Kbit 9pps backlog 0b 0p requeues 0
 lended: 102 borrowed: 0 giants: 0
class htb 1:10 parent 1:1 prio 4 rate 2Mbit ceil 2Mbit burst 15Kb cburst 1600b
 Sent 52340 bytes 412 pkt (dropped 3, overlimits 17 requeues 0)
 rate 1824bit 2pps backlog 0b 0p requeues 0
 lended: 412 borrowed: 0 giants: 0
class htb 1:99 parent 1:1 rate 10Mbit ceil 50Mbit burst 1600b cburst 1600b
 Sent 1000 bytes 8 pkt (dropped 0, overlimits 0 requeues 0)
 rate 0bit 0pps backlog 0b 0p requeues 0
";

    #[test]
    fn parses_every_class_block() {
        let stats = parse_class_stats(SAMPLE);
        assert_eq!(stats.len(), 3);

        let dev = stats.get(&10).unwrap();
        assert_eq!(dev.bytes_sent, 52340);
        assert_eq!(dev.packets_sent, 412);
        assert_eq!(dev.dropped, 3);
        assert_eq!(dev.overlimits, 17);
        assert_eq!(dev.current_rate, "1824bit");
        assert_eq!(dev.current_pps, "2pps");
        assert_eq!(dev.classid, 10);
    }

    #[test]
    fn tolerates_interleaved_and_unrelated_lines() {
        let noisy = format!(
            "qdisc htb 1: root refcnt 2 r2q 10 default 0x63\n{}\nqdisc netem 10: parent 1:10\n",
            SAMPLE
        );
        let stats = parse_class_stats(&noisy);
        assert_eq!(stats.get(&10).unwrap().bytes_sent, 52340);
    }

    #[test]
    fn tolerates_extra_whitespace_in_sent_line() {
        let raw = "\
class htb 1:20 parent 1:1 prio 4 rate 10Mbit ceil 50Mbit
   Sent 77 bytes 2 pkt (dropped 1,  overlimits 5 requeues 0)
   rate 0bit 0pps backlog 0b 0p requeues 0
";
        let stats = parse_class_stats(raw);
        let dev = stats.get(&20).unwrap();
        assert_eq!(dev.bytes_sent, 77);
        assert_eq!(dev.dropped, 1);
        assert_eq!(dev.overlimits, 5);
    }

    #[test]
    fn empty_listing_yields_no_stats() {
        assert!(parse_class_stats("").is_empty());
    }
}

//! Parsers for the Cisco IOS show/ping output the validators read.

use regex_lite::Regex;
use std::sync::OnceLock;

use crate::models::ObservedInterface;

/// Prefixes IOS uses when it refuses a command
const REJECTION_MARKERS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unknown command",
    "% Unrecognized host",
    "% Bad ",
    "% Authorization failed",
];

/// First line in `output` where the device refused a command
pub fn find_rejection(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| {
            REJECTION_MARKERS.iter().any(|m| line.starts_with(m))
                || (line.starts_with('%') && line.contains("overlaps with"))
        })
        .map(str::to_string)
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// One row of `show ip interface brief`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStatus {
    pub name: String,
    pub address: String,
    /// "up", "down" or "administratively down"
    pub status: String,
    pub protocol: String,
}

impl InterfaceStatus {
    pub fn is_up(&self) -> bool {
        self.status == "up" && self.protocol == "up"
    }

    pub fn is_admin_down(&self) -> bool {
        self.status == "administratively down"
    }
}

pub fn parse_interface_brief(output: &str) -> Vec<InterfaceStatus> {
    static ROW: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(
        &ROW,
        r"^(\S+)\s+(\S+)\s+(?:YES|NO)\s+\S+\s+(administratively down|up|down|deleted)\s+(up|down)\s*$",
    ) else {
        return Vec::new();
    };

    output
        .lines()
        .filter_map(|line| re.captures(line.trim_end()))
        .map(|caps| InterfaceStatus {
            name: caps[1].to_string(),
            address: caps[2].to_string(),
            status: caps[3].to_string(),
            protocol: caps[4].to_string(),
        })
        .collect()
}

/// Interfaces from `show interfaces`, with their description and burned-in
/// MAC address when the interface has hardware
pub fn parse_show_interfaces(output: &str) -> Vec<ObservedInterface> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    static MAC: OnceLock<Option<Regex>> = OnceLock::new();
    let (Some(header), Some(mac)) = (
        cached(&HEADER, r"^(\S+) is (administratively down|up|down|deleted), line protocol is"),
        cached(&MAC, r"address is ([0-9a-fA-F]{4})\.([0-9a-fA-F]{4})\.([0-9a-fA-F]{4})"),
    ) else {
        return Vec::new();
    };

    let mut interfaces: Vec<ObservedInterface> = Vec::new();
    for line in output.lines() {
        if let Some(caps) = header.captures(line.trim_end()) {
            interfaces.push(ObservedInterface {
                name: caps[1].to_string(),
                description: String::new(),
                mac_address: None,
                enabled: &caps[2] != "administratively down",
            });
            continue;
        }
        let Some(current) = interfaces.last_mut() else { continue };
        let detail = line.trim();
        if let Some(description) = detail.strip_prefix("Description:") {
            current.description = description.trim().to_string();
        } else if current.mac_address.is_none() && detail.starts_with("Hardware is") {
            current.mac_address = mac.captures(detail).map(|caps| {
                let hex = format!("{}{}{}", &caps[1], &caps[2], &caps[3]).to_uppercase();
                hex.as_bytes()
                    .chunks(2)
                    .map(|pair| String::from_utf8_lossy(pair).into_owned())
                    .collect::<Vec<_>>()
                    .join(":")
            });
        }
    }
    interfaces
}

/// Session state of one BGP peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Established { prefixes: u32 },
    /// Any non-established FSM state, as printed (e.g. "Active", "Idle (Admin)")
    Down(String),
}

impl PeerState {
    /// Shut down by configuration; never converges by waiting
    pub fn is_admin_down(&self) -> bool {
        matches!(self, PeerState::Down(s) if s.starts_with("Idle (Admin)"))
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Established { prefixes } => write!(f, "Established ({} prefixes)", prefixes),
            PeerState::Down(state) => f.write_str(state),
        }
    }
}

/// One neighbor row of `show ip bgp summary`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpPeer {
    pub address: String,
    pub remote_asn: u32,
    pub up_down: String,
    pub state: PeerState,
}

/// Neighbor table of `show ip bgp summary`. Header and footer lines are skipped.
pub fn parse_bgp_summary(output: &str) -> Vec<BgpPeer> {
    static ROW: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(
        &ROW,
        r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\s+\d\s+(\d+(?:\.\d+)?)\s+\d+\s+\d+\s+\d+\s+\d+\s+\d+\s+(\S+)\s+(.+?)\s*$",
    ) else {
        return Vec::new();
    };

    output
        .lines()
        .filter_map(|line| re.captures(line.trim()))
        .filter_map(|caps| {
            let remote_asn = parse_asn(&caps[2])?;
            let state_col = caps[4].trim();
            let state = match state_col.parse::<u32>() {
                Ok(prefixes) => PeerState::Established { prefixes },
                Err(_) => PeerState::Down(state_col.to_string()),
            };
            Some(BgpPeer {
                address: caps[1].to_string(),
                remote_asn,
                up_down: caps[3].to_string(),
                state,
            })
        })
        .collect()
}

/// Plain or asdot ("1.10") notation
fn parse_asn(value: &str) -> Option<u32> {
    match value.split_once('.') {
        Some((high, low)) => {
            let high: u32 = high.parse().ok()?;
            let low: u32 = low.parse().ok()?;
            if high > 0xFFFF || low > 0xFFFF {
                return None;
            }
            Some(high << 16 | low)
        }
        None => value.parse().ok(),
    }
}

/// Summary of one IOS ping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingReport {
    pub sent: u32,
    pub received: u32,
    /// The device answered with ICMP unreachable ('U')
    pub unreachable: bool,
    pub rejected: Option<String>,
}

impl PingReport {
    pub fn lost(&self) -> u32 {
        self.sent.saturating_sub(self.received)
    }
}

pub fn parse_ping(output: &str) -> PingReport {
    static RATE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut report = PingReport {
        rejected: find_rejection(output),
        ..Default::default()
    };

    if let Some(caps) = cached(&RATE, r"Success rate is (\d+) percent \((\d+)/(\d+)\)").and_then(|re| re.captures(output)) {
        report.received = caps[2].parse().unwrap_or(0);
        report.sent = caps[3].parse().unwrap_or(0);
    }

    // The result line is made only of per-echo markers, e.g. "!!.!!" or "UUUUU"
    report.unreachable = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.chars().all(|c| "!.UQM?&".contains(c)))
        .any(|line| line.contains('U'));

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const BGP_SUMMARY: &str = "\
BGP router identifier 1.1.1.1, local AS number 65511
BGP table version is 7, main routing table version 7
4 network entries using 992 bytes of memory

Neighbor        V           AS MsgRcvd MsgSent   TblVer  InQ OutQ Up/Down  State/PfxRcd
172.20.12.2     4        65512      12      11        7    0    0 00:05:12        2
172.20.14.4     4        65514       0       0        1    0    0 never    Active
172.20.15.5     4          1.10      0       0        1    0    0 00:00:09 Idle (Admin)
";

    #[test]
    fn test_parse_bgp_summary() {
        let peers = parse_bgp_summary(BGP_SUMMARY);
        assert_eq!(peers.len(), 3);

        assert_eq!(peers[0].address, "172.20.12.2");
        assert_eq!(peers[0].remote_asn, 65512);
        assert_eq!(peers[0].state, PeerState::Established { prefixes: 2 });
        assert_eq!(peers[0].up_down, "00:05:12");

        assert_eq!(peers[1].state, PeerState::Down("Active".to_string()));
        assert!(!peers[1].state.is_admin_down());

        assert_eq!(peers[2].remote_asn, 65546);
        assert!(peers[2].state.is_admin_down());
    }

    #[test]
    fn test_bgp_summary_without_neighbors() {
        assert!(parse_bgp_summary("% BGP not active\n").is_empty());
        assert!(parse_bgp_summary("").is_empty());
    }

    #[test]
    fn test_parse_interface_brief() {
        let output = "\
Interface              IP-Address      OK? Method Status                Protocol
GigabitEthernet1       172.20.12.1     YES manual up                    up
GigabitEthernet2       172.20.13.1     YES manual administratively down down
GigabitEthernet3       unassigned      YES unset  down                  down
Loopback0              1.1.1.1         YES manual up                    up
";
        let rows = parse_interface_brief(output);
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_up());
        assert_eq!(rows[0].address, "172.20.12.1");
        assert!(rows[1].is_admin_down());
        assert!(!rows[1].is_up());
        assert_eq!(rows[2].address, "unassigned");
        assert_eq!(rows[3].name, "Loopback0");
    }

    #[test]
    fn test_parse_show_interfaces() {
        let output = "\
GigabitEthernet1 is up, line protocol is up 
  Hardware is CSR vNIC, address is 0050.56bb.e99c (bia 0050.56bb.e99c)
  Description: Uplink to CSR-2
  Internet address is 172.20.12.1/24
  MTU 1500 bytes, BW 1000000 Kbit/sec, DLY 10 usec, 
GigabitEthernet3 is administratively down, line protocol is down 
  Hardware is CSR vNIC, address is 0050.56bb.0a01 (bia 0050.56bb.0a01)
Loopback0 is up, line protocol is up 
  Hardware is Loopback
  Description: router-id
  Internet address is 1.1.1.1/32
";
        let interfaces = parse_show_interfaces(output);
        assert_eq!(interfaces.len(), 3);

        assert_eq!(interfaces[0].name, "GigabitEthernet1");
        assert_eq!(interfaces[0].description, "Uplink to CSR-2");
        assert_eq!(interfaces[0].mac_address.as_deref(), Some("00:50:56:BB:E9:9C"));
        assert!(interfaces[0].enabled);

        assert!(!interfaces[1].enabled);
        assert_eq!(interfaces[1].description, "");

        assert_eq!(interfaces[2].name, "Loopback0");
        assert_eq!(interfaces[2].description, "router-id");
        assert!(interfaces[2].mac_address.is_none());
    }

    #[test]
    fn test_parse_successful_ping() {
        let output = "\
Type escape sequence to abort.
Sending 5, 100-byte ICMP Echos to 172.20.12.2, timeout is 2 seconds:
Packet sent with a source address of 172.20.12.1
!!!!!
Success rate is 100 percent (5/5), round-trip min/avg/max = 1/1/2 ms
";
        let report = parse_ping(output);
        assert_eq!(report.sent, 5);
        assert_eq!(report.received, 5);
        assert_eq!(report.lost(), 0);
        assert!(!report.unreachable);
        assert!(report.rejected.is_none());
    }

    #[test]
    fn test_parse_unreachable_ping() {
        let output = "\
Type escape sequence to abort.
Sending 5, 100-byte ICMP Echos to 172.20.13.3, timeout is 2 seconds:
U.U.U
Success rate is 0 percent (0/5)
";
        let report = parse_ping(output);
        assert!(report.unreachable);
        assert_eq!(report.lost(), 5);
    }

    #[test]
    fn test_parse_silent_loss() {
        let report = parse_ping("Sending 5, 100-byte ICMP Echos\n.!!!.\nSuccess rate is 60 percent (3/5)\n");
        assert!(!report.unreachable);
        assert_eq!(report.lost(), 2);
    }

    #[test]
    fn test_find_rejection() {
        let output = "csr-1(config)#interface Gi1\ncsr-1(config-if)#ip adress 1.1.1.1\n                         ^\n% Invalid input detected at '^' marker.\n";
        assert_eq!(
            find_rejection(output).as_deref(),
            Some("% Invalid input detected at '^' marker.")
        );
        assert!(find_rejection("% 172.20.12.0 overlaps with GigabitEthernet2").is_some());
        assert!(find_rejection("csr-1(config)#end\ncsr-1#").is_none());
        assert!(find_rejection("% BGP not active").is_none());
    }
}

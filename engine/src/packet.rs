//! Packet records, address validation, and direction-normalized flow keys.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::config::AppConfig;

/// Destination MAC of Ethernet broadcast frames.
pub const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";

/// Transport protocols accepted into the burst pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Map an IANA protocol number onto a supported transport.
    pub fn from_protocol_number(n: u8) -> Option<Self> {
        match n {
            6 => Some(Transport::Tcp),
            17 => Some(Transport::Udp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
        }
    }
}

/// One captured packet as delivered by the external collector.
///
/// Hostnames are pre-resolved by the collector's DNS/SNI snooping where
/// available; the assembler falls back to the hostname resolver seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Capture timestamp in epoch seconds.
    pub ts: f64,
    /// Frame length in bytes.
    pub frame_len: u32,
    pub src_mac: String,
    pub dst_mac: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// IANA transport protocol number (6 = TCP, 17 = UDP).
    pub transport: u8,
    /// Highest-layer protocol tag (e.g. "TLS", "DNS"); empty for bare
    /// transport segments.
    #[serde(default)]
    pub highest_proto: String,
    #[serde(default)]
    pub src_host: Option<String>,
    #[serde(default)]
    pub dst_host: Option<String>,
}

/// Local-network membership test: RFC 1918 / loopback / unique-local plus
/// any operator-configured subnets.
#[derive(Debug, Clone, Default)]
pub struct LocalNets {
    extra: Vec<IpNetwork>,
}

impl LocalNets {
    /// Build from the config's `local_subnets`; invalid CIDR entries are
    /// skipped with a log line.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut extra = Vec::new();
        for cidr in &config.local_subnets {
            match cidr.parse::<IpNetwork>() {
                Ok(net) => extra.push(net),
                Err(e) => {
                    tracing::warn!(cidr = %cidr, error = %e, "Ignoring invalid local subnet");
                }
            }
        }
        Self { extra }
    }

    pub fn is_private(&self, ip: &IpAddr) -> bool {
        let builtin = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    // fc00::/7 unique local, fe80::/10 link local
                    || (v6.segments()[0] & 0xfe00) == 0xfc00
                    || (v6.segments()[0] & 0xffc0) == 0xfe80
            }
        };
        builtin || self.extra.iter().any(|net| net.contains(*ip))
    }
}

/// Whether an address is usable for flow keying. Unspecified and
/// limited-broadcast addresses fail; link-local destinations are rejected
/// separately by the assembler's broadcast filter.
pub fn is_valid_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_broadcast(),
        IpAddr::V6(v6) => !v6.is_unspecified(),
    }
}

/// Direction-normalized flow identity. Peer A is always the device side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub transport: Transport,
    pub a_ip: IpAddr,
    pub a_port: u16,
    pub b_ip: IpAddr,
    pub b_port: u16,
    pub device_mac: String,
}

/// A packet oriented relative to its flow's device side.
#[derive(Debug, Clone)]
pub struct OrientedPacket {
    pub key: FlowKey,
    /// True when the packet travels device → peer.
    pub outbound: bool,
    /// MAC of the non-device peer (empty when unknown).
    pub peer_mac: String,
}

/// Apply the direction normalization rule: if exactly one side is private,
/// the private side is the device; if both are private, the numerically
/// smaller IP is. Returns `None` for public↔public traffic, which cannot
/// belong to a monitored device.
pub fn orient(pkt: &PacketRecord, transport: Transport, local: &LocalNets) -> Option<OrientedPacket> {
    let src_private = local.is_private(&pkt.src_ip);
    let dst_private = local.is_private(&pkt.dst_ip);

    let device_is_src = match (src_private, dst_private) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => pkt.src_ip < pkt.dst_ip,
        (false, false) => return None,
    };

    let (key, outbound, peer_mac) = if device_is_src {
        (
            FlowKey {
                transport,
                a_ip: pkt.src_ip,
                a_port: pkt.src_port,
                b_ip: pkt.dst_ip,
                b_port: pkt.dst_port,
                device_mac: pkt.src_mac.clone(),
            },
            true,
            pkt.dst_mac.clone(),
        )
    } else {
        (
            FlowKey {
                transport,
                a_ip: pkt.dst_ip,
                a_port: pkt.dst_port,
                b_ip: pkt.src_ip,
                b_port: pkt.src_port,
                device_mac: pkt.dst_mac.clone(),
            },
            false,
            pkt.src_mac.clone(),
        )
    };

    Some(OrientedPacket {
        key,
        outbound,
        peer_mac,
    })
}

#[cfg(test)]
pub(crate) fn test_packet(
    ts: f64,
    frame_len: u32,
    src: (&str, &str, u16),
    dst: (&str, &str, u16),
    transport: u8,
    highest_proto: &str,
) -> PacketRecord {
    PacketRecord {
        ts,
        frame_len,
        src_mac: src.0.to_string(),
        dst_mac: dst.0.to_string(),
        src_ip: src.1.parse().expect("src ip"),
        dst_ip: dst.1.parse().expect("dst ip"),
        src_port: src.2,
        dst_port: dst.2,
        transport,
        highest_proto: highest_proto.to_string(),
        src_host: None,
        dst_host: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_MAC: &str = "aa:bb:cc:dd:ee:ff";
    const GW_MAC: &str = "02:00:00:00:00:01";

    #[test]
    fn test_transport_from_protocol_number() {
        assert_eq!(Transport::from_protocol_number(6), Some(Transport::Tcp));
        assert_eq!(Transport::from_protocol_number(17), Some(Transport::Udp));
        assert_eq!(Transport::from_protocol_number(1), None); // ICMP
    }

    #[test]
    fn test_is_valid_ip() {
        assert!(is_valid_ip(&"10.0.0.5".parse().unwrap()));
        assert!(is_valid_ip(&"8.8.8.8".parse().unwrap()));
        assert!(!is_valid_ip(&"0.0.0.0".parse().unwrap()));
        assert!(!is_valid_ip(&"255.255.255.255".parse().unwrap()));
        assert!(!is_valid_ip(&"::".parse().unwrap()));
    }

    #[test]
    fn test_local_nets_builtin_ranges() {
        let local = LocalNets::default();
        assert!(local.is_private(&"10.0.0.5".parse().unwrap()));
        assert!(local.is_private(&"192.168.1.20".parse().unwrap()));
        assert!(local.is_private(&"172.16.4.1".parse().unwrap()));
        assert!(local.is_private(&"169.254.1.1".parse().unwrap()));
        assert!(local.is_private(&"fe80::1".parse().unwrap()));
        assert!(local.is_private(&"fd00::1".parse().unwrap()));
        assert!(!local.is_private(&"8.8.8.8".parse().unwrap()));
        assert!(!local.is_private(&"2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_local_nets_extra_subnets() {
        let config = AppConfig {
            local_subnets: vec!["100.64.0.0/10".to_string(), "not-a-cidr".to_string()],
            ..AppConfig::default()
        };
        let local = LocalNets::from_config(&config);
        assert!(local.is_private(&"100.64.1.2".parse().unwrap()));
        assert!(!local.is_private(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_orient_private_to_public() {
        let local = LocalNets::default();
        let pkt = test_packet(
            0.0,
            100,
            (DEV_MAC, "10.0.0.5", 443),
            (GW_MAC, "8.8.8.8", 55123),
            6,
            "TLS",
        );
        let oriented = orient(&pkt, Transport::Tcp, &local).expect("should orient");
        assert_eq!(oriented.key.a_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(oriented.key.a_port, 443);
        assert_eq!(oriented.key.b_ip, "8.8.8.8".parse::<IpAddr>().unwrap());
        assert_eq!(oriented.key.device_mac, DEV_MAC);
        assert!(oriented.outbound);
        assert_eq!(oriented.peer_mac, GW_MAC);
    }

    #[test]
    fn test_orient_both_directions_share_key() {
        let local = LocalNets::default();
        let out = test_packet(
            0.0,
            100,
            (DEV_MAC, "10.0.0.5", 443),
            (GW_MAC, "8.8.8.8", 55123),
            6,
            "TLS",
        );
        let back = test_packet(
            0.1,
            200,
            (GW_MAC, "8.8.8.8", 55123),
            (DEV_MAC, "10.0.0.5", 443),
            6,
            "TLS",
        );
        let o1 = orient(&out, Transport::Tcp, &local).unwrap();
        let o2 = orient(&back, Transport::Tcp, &local).unwrap();
        assert_eq!(o1.key, o2.key, "both directions collapse to one flow");
        assert!(o1.outbound);
        assert!(!o2.outbound);
    }

    #[test]
    fn test_orient_local_to_local_smaller_ip_is_device() {
        let local = LocalNets::default();
        let pkt = test_packet(
            0.0,
            100,
            ("11:11:11:11:11:11", "192.168.1.50", 5000),
            ("22:22:22:22:22:22", "192.168.1.7", 6000),
            17,
            "",
        );
        let oriented = orient(&pkt, Transport::Udp, &local).unwrap();
        assert_eq!(oriented.key.a_ip, "192.168.1.7".parse::<IpAddr>().unwrap());
        assert_eq!(oriented.key.device_mac, "22:22:22:22:22:22");
        assert!(!oriented.outbound);
    }

    #[test]
    fn test_orient_public_to_public_rejected() {
        let local = LocalNets::default();
        let pkt = test_packet(
            0.0,
            100,
            (GW_MAC, "8.8.8.8", 53),
            (GW_MAC, "1.1.1.1", 53),
            17,
            "DNS",
        );
        assert!(orient(&pkt, Transport::Udp, &local).is_none());
    }

    #[test]
    fn test_packet_record_jsonl_round_trip() {
        let pkt = test_packet(
            1700000000.25,
            120,
            (DEV_MAC, "10.0.0.5", 443),
            (GW_MAC, "8.8.8.8", 55123),
            6,
            "TLS",
        );
        let line = serde_json::to_string(&pkt).unwrap();
        let back: PacketRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.ts, pkt.ts);
        assert_eq!(back.frame_len, 120);
        assert_eq!(back.src_ip, pkt.src_ip);
        assert_eq!(back.highest_proto, "TLS");

        // Hostname fields are optional in hand-written captures.
        let minimal = r#"{"ts":1.0,"frame_len":60,"src_mac":"aa:bb:cc:dd:ee:ff",
            "dst_mac":"02:00:00:00:00:01","src_ip":"10.0.0.5","dst_ip":"8.8.8.8",
            "src_port":443,"dst_port":55123,"transport":6}"#;
        let parsed: PacketRecord = serde_json::from_str(minimal).unwrap();
        assert_eq!(parsed.highest_proto, "");
        assert!(parsed.src_host.is_none());
    }
}

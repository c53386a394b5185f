//! Protocol, host, and artifact-name normalization shared by the filter,
//! predictor, and trainers.

/// Collapse a burst's highest-layer protocol tag onto the transport it rides
/// on: TCP, MQTT, and TLS become `TCP`; UDP stays `UDP`. Tags that survive
/// uncollapsed but contain `;` are rewritten as `A & B`.
pub fn protocol_transform(proto: &str) -> String {
    let mut p = proto.to_string();
    if p.contains("TCP") {
        p = "TCP".to_string();
    } else if p.contains("MQTT") {
        p = "TCP".to_string();
    } else if p.contains("UDP") {
        p = "UDP".to_string();
    } else if p.contains("TLS") {
        p = "TCP".to_string();
    }
    if p.contains(';') {
        p = p.split(';').collect::<Vec<_>>().join(" & ");
    }
    p
}

/// Normalize a burst's hosts string to a single comparable host: take the
/// first `;`-separated token, lowercase it, and strip `?`. Empty input maps
/// to the sentinel `non`.
pub fn host_transform(hosts: &str) -> String {
    if hosts.is_empty() {
        return "non".to_string();
    }
    let first = hosts.split(';').next().unwrap_or("");
    if first.is_empty() {
        return "non".to_string();
    }
    first.to_lowercase().replace('?', "")
}

/// Whether a host string looks like a MAC address (six `:`-separated hex
/// octets). Such hosts come from all-local bursts and are control-plane
/// noise for the filter.
pub fn is_mac_like(host: &str) -> bool {
    let parts: Vec<&str> = host.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Fold Amazon EC2 hostnames onto a single wildcard so one fingerprint entry
/// covers the whole rotating pool.
pub fn fold_ec2_host(host: &str) -> String {
    if host.ends_with(".compute.amazonaws.com") || host.ends_with(".compute-1.amazonaws.com") {
        "*.compute.amazonaws.com".to_string()
    } else {
        host.to_string()
    }
}

/// Sanitize a string for use in artifact file names: `*` removed, `:`
/// replaced with `-`.
pub fn sanitize_name(name: &str) -> String {
    name.replace('*', "").replace(':', "-")
}

/// The last `n` dot-separated labels of a host, joined back with dots.
/// Used for relaxed suffix matching and host coalescing.
pub fn last_labels(host: &str, n: usize) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= n {
        return host.to_string();
    }
    labels[labels.len() - n..].join(".")
}

/// Protocols that are control-plane noise, never events.
pub const CONTROL_PROTOCOLS: [&str; 5] = ["DNS", "MDNS", "NTP", "SSDP", "DHCP"];

/// Whether a normalized protocol belongs to the control plane.
pub fn is_control_protocol(proto: &str) -> bool {
    CONTROL_PROTOCOLS.contains(&proto)
}

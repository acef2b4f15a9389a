use std::net::{IpAddr, SocketAddr};

/// Label used when a remote address is absent or cannot be parsed.
pub const UNKNOWN_IP: &str = "unknown";

/// Canonical IP text of a socket address, with IPv4-mapped IPv6 folded to IPv4.
pub fn ip_label(addr: &SocketAddr) -> String {
	canonical(addr.ip()).to_string()
}

/// Extract the IP of a `host:port` string, tolerating bracketed IPv6 hosts.
pub fn ip_from_host_port(addr: &str) -> Option<IpAddr> {
	if let Ok(sock) = addr.parse::<SocketAddr>() {
		return Some(canonical(sock.ip()));
	}
	if let Some(ip) = parse_host(addr) {
		return Some(ip);
	}

	let host = match addr.rsplit_once(':') {
		Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
		_ => return None,
	};
	parse_host(host)
}

fn parse_host(host: &str) -> Option<IpAddr> {
	let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
	host.parse::<IpAddr>().ok().map(canonical)
}

fn canonical(ip: IpAddr) -> IpAddr {
	match ip {
		IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
		v4 @ IpAddr::V4(_) => v4,
	}
}

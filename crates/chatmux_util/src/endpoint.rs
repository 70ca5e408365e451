#![forbid(unsafe_code)]

//! `http://host:port` endpoints shared by the server bind flag and the
//! stream client.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
	#[error("endpoint must be non-empty (expected http://host:port)")]
	Empty,

	#[error("unsupported endpoint {0} (expected http://host:port)")]
	Scheme(String),

	#[error("endpoint {0} must be a bare http://host:port")]
	Path(String),

	#[error("endpoint {0} is missing :port")]
	MissingPort(String),

	#[error("invalid host in {0} (IPv6 must be bracketed like http://[::1]:18480)")]
	Host(String),

	#[error("invalid port in {0} (expected 1..=65535)")]
	Port(String),

	#[error("{0} is not a local address to bind (use an IP literal or localhost)")]
	NotBindable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
	Ip(IpAddr),
	Name(String),
}

impl fmt::Display for Host {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
			Host::Ip(ip) => write!(f, "{ip}"),
			Host::Name(name) => f.write_str(name),
		}
	}
}

impl Host {
	fn parse(raw: &str) -> Option<Self> {
		if let Some(inner) = raw.strip_prefix('[') {
			let v6 = inner.strip_suffix(']')?.parse().ok()?;
			return Some(Host::Ip(IpAddr::V6(v6)));
		}
		if let Ok(ip) = raw.parse::<Ipv4Addr>() {
			return Some(Host::Ip(IpAddr::V4(ip)));
		}

		let valid_name = raw
			.split('.')
			.all(|label| !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'));
		valid_name.then(|| Host::Name(raw.to_ascii_lowercase()))
	}
}

/// Parsed `http://host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpEndpoint {
	pub host: Host,
	pub port: u16,
}

impl HttpEndpoint {
	pub fn loopback(port: u16) -> Self {
		Self {
			host: Host::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
			port,
		}
	}

	pub fn parse(s: &str) -> Result<Self, EndpointError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(EndpointError::Empty);
		}

		let rest = s
			.strip_prefix("http://")
			.ok_or_else(|| EndpointError::Scheme(s.to_string()))?;
		let rest = rest.strip_suffix('/').unwrap_or(rest);
		if rest.contains(['/', '?', '#']) {
			return Err(EndpointError::Path(s.to_string()));
		}

		let (host, port) = rest
			.rsplit_once(':')
			.ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
		let host = Host::parse(host.trim()).ok_or_else(|| EndpointError::Host(s.to_string()))?;
		let port = port
			.trim()
			.parse::<u16>()
			.ok()
			.filter(|p| *p != 0)
			.ok_or_else(|| EndpointError::Port(s.to_string()))?;

		Ok(Self { host, port })
	}

	/// `host:port`, IPv6 bracketed.
	pub fn hostport(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	/// `http://host:port` without a trailing slash.
	pub fn base_url(&self) -> String {
		format!("http://{}", self.hostport())
	}

	/// Absolute URL for `path` on this endpoint.
	pub fn url(&self, path: &str) -> String {
		let path = path.trim_start_matches('/');
		format!("{}/{path}", self.base_url())
	}

	/// Socket address to listen on. `localhost` maps to 127.0.0.1; other
	/// names are refused since the server never resolves DNS for its bind.
	pub fn bind_addr(&self) -> Result<SocketAddr, EndpointError> {
		match &self.host {
			Host::Ip(ip) => Ok(SocketAddr::new(*ip, self.port)),
			Host::Name(name) if name == "localhost" => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port)),
			Host::Name(_) => Err(EndpointError::NotBindable(self.base_url())),
		}
	}
}

impl FromStr for HttpEndpoint {
	type Err = EndpointError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for HttpEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.base_url())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn overlay_hostname_builds_stream_urls() {
		let e: HttpEndpoint = "http://Overlay.Example.com:8080/".parse().unwrap();
		assert_eq!(e.host, Host::Name("overlay.example.com".to_string()));
		assert_eq!(e.url("/api/chat/stream"), "http://overlay.example.com:8080/api/chat/stream");
		assert_eq!(e.url("api/chat/status"), "http://overlay.example.com:8080/api/chat/status");
		assert!(matches!(e.bind_addr(), Err(EndpointError::NotBindable(_))));
	}

	#[test]
	fn bind_addresses() {
		let e = HttpEndpoint::parse("http://0.0.0.0:18480").unwrap();
		assert_eq!(e.bind_addr().unwrap().to_string(), "0.0.0.0:18480");

		let e = HttpEndpoint::parse("http://localhost:18480").unwrap();
		assert_eq!(e.bind_addr().unwrap(), SocketAddr::from(([127, 0, 0, 1], 18480)));

		let e = HttpEndpoint::parse("http://[::1]:18480").unwrap();
		assert_eq!(e.to_string(), "http://[::1]:18480");
		assert_eq!(e.bind_addr().unwrap().to_string(), "[::1]:18480");

		assert_eq!(HttpEndpoint::loopback(18480).base_url(), "http://127.0.0.1:18480");
	}

	#[test]
	fn rejects_bad_forms() {
		let err = |s: &str| HttpEndpoint::parse(s).unwrap_err();
		assert_eq!(err("  "), EndpointError::Empty);
		assert!(matches!(err("https://127.0.0.1:18480"), EndpointError::Scheme(_)));
		assert!(matches!(err("http://127.0.0.1:18480/api"), EndpointError::Path(_)));
		assert!(matches!(err("http://127.0.0.1:18480?x=1"), EndpointError::Path(_)));
		assert!(matches!(err("http://127.0.0.1"), EndpointError::MissingPort(_)));
		assert!(matches!(err("http://::1:18480"), EndpointError::Host(_)));
		assert!(matches!(err("http://[nope]:18480"), EndpointError::Host(_)));
		assert!(matches!(err("http://bad_host:18480"), EndpointError::Host(_)));
		assert!(matches!(err("http://:18480"), EndpointError::Host(_)));
		assert!(matches!(err("http://127.0.0.1:0"), EndpointError::Port(_)));
		assert!(matches!(err("http://127.0.0.1:99999"), EndpointError::Port(_)));
	}
}

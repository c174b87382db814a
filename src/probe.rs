//! Off-chain supernode probing.
//!
//! A probe pass takes the last known `host:port` endpoint of a supernode,
//! dials the advertised port and the p2p port, and fetches the node's status
//! document from the status API port. Unreachable nodes are a normal outcome,
//! not an error.

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::STATUS_API_PORT;

const STATUS_HTTP_TIMEOUT: Duration = Duration::from_secs(6);

/// Splits a `host:port` endpoint, tolerating stray whitespace and bracketed
/// IPv6 hosts. Returns nothing for endpoints with a missing, zero or
/// non-numeric port; such rows are malformed and must not be dialed.
pub fn split_host_port(endpoint: &str) -> Option<(String, u16)> {
    let endpoint = endpoint.trim();
    let (host, port) = endpoint.rsplit_once(':')?;
    let port: u16 = port.trim().parse().ok()?;
    if port == 0 {
        return None;
    }
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host.to_owned(), port))
}

/// Accepts an IP literal or a fully qualified domain name.
///
/// Single-label names ("localhost", placeholder strings like "SUNUCUIP") are
/// rejected: they show up in bad upstream records and never identify a
/// reachable production supernode.
pub fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    let bytes = host.as_bytes();
    let mut has_letter = false;
    let mut has_dot = false;
    let mut prev = 0u8;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' => has_letter = true,
            b'0'..=b'9' => (),
            b'.' => {
                has_dot = true;
                if i == 0 || i == bytes.len() - 1 || prev == b'.' {
                    return false;
                }
            }
            b'-' => {
                if i == 0 || i == bytes.len() - 1 {
                    return false;
                }
            }
            _ => return false,
        }
        prev = b;
    }
    has_letter && has_dot
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// Status document, as served by the supernode's own API.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime_seconds: String,
    #[serde(default)]
    pub resources: StatusResources,
    #[serde(default)]
    pub network: StatusNetwork,
    #[serde(default)]
    pub rank: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResources {
    #[serde(default)]
    pub cpu: StatusCpu,
    #[serde(default)]
    pub memory: StatusMemory,
    #[serde(default)]
    pub storage_volumes: Vec<StorageVolume>,
    #[serde(default)]
    pub hardware_summary: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusCpu {
    #[serde(default)]
    pub usage_percent: f64,
    #[serde(default)]
    pub cores: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusMemory {
    #[serde(default)]
    pub total_gb: f64,
    #[serde(default)]
    pub used_gb: f64,
    #[serde(default)]
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageVolume {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub total_bytes: String,
    #[serde(default)]
    pub used_bytes: String,
    #[serde(default)]
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusNetwork {
    #[serde(default)]
    pub peers_count: i32,
}

/// Flattened view of a status document. `available == false` means the
/// status API could not be reached or did not answer with a valid document;
/// all other fields are zeroed in that case.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSummary {
    pub available: bool,
    pub version: String,
    pub uptime_seconds: i64,
    pub cpu_usage_percent: f64,
    pub cpu_cores: i32,
    pub memory_total_gb: f64,
    pub memory_used_gb: f64,
    pub memory_usage_percent: f64,
    pub storage_total_bytes: i64,
    pub storage_used_bytes: i64,
    pub storage_usage_percent: f64,
    pub hardware_summary: String,
    pub peers_count: i32,
    pub rank: i32,
}

/// Collapses a status document into a summary, summing storage volumes.
/// The usage percentage of the last volume stands in for the whole node;
/// an approximation carried over from the upstream format.
pub fn summarize(response: StatusResponse) -> StatusSummary {
    let mut summary = StatusSummary {
        available: true,
        version: response.version,
        uptime_seconds: response.uptime_seconds.parse().unwrap_or(0),
        cpu_usage_percent: response.resources.cpu.usage_percent,
        cpu_cores: response.resources.cpu.cores,
        memory_total_gb: response.resources.memory.total_gb,
        memory_used_gb: response.resources.memory.used_gb,
        memory_usage_percent: response.resources.memory.usage_percent,
        hardware_summary: response.resources.hardware_summary,
        peers_count: response.network.peers_count,
        rank: response.rank,
        ..Default::default()
    };
    for volume in &response.resources.storage_volumes {
        summary.storage_total_bytes += volume.total_bytes.parse().unwrap_or(0);
        summary.storage_used_bytes += volume.used_bytes.parse().unwrap_or(0);
        summary.storage_usage_percent = volume.usage_percent;
    }
    summary
}

/// Result of one full probe sequence against a supernode endpoint.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub port1: u16,
    pub port1_open: bool,
    pub p2p_port: u16,
    pub p2p_open: bool,
    pub status: StatusSummary,
}

pub struct Prober {
    dial_timeout: Duration,
    status_http: reqwest::Client,
}

impl Prober {
    pub fn new(dial_timeout: Duration) -> Result<Self, reqwest::Error> {
        let status_http = reqwest::Client::builder()
            .timeout(STATUS_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            dial_timeout,
            status_http,
        })
    }

    /// Dials both ports and fetches the status document.
    /// `host` must already have passed [`is_valid_host`].
    pub async fn probe(&self, host: &str, port1: u16, p2p_port: u16) -> ProbeOutcome {
        let port1_open = self.tcp_open(host, port1).await;
        let p2p_open = self.tcp_open(host, p2p_port).await;
        let status = self.fetch_status(host).await;
        ProbeOutcome {
            port1,
            port1_open,
            p2p_port,
            p2p_open,
            status,
        }
    }

    async fn tcp_open(&self, host: &str, port: u16) -> bool {
        matches!(
            timeout(self.dial_timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    async fn fetch_status(&self, host: &str) -> StatusSummary {
        let url = format!(
            "http://{}/api/v1/status?includeP2pMetrics=true",
            join_host_port(host, STATUS_API_PORT)
        );
        let response = match self.status_http.get(&url).send().await {
            Ok(r) => r,
            Err(_) => return StatusSummary::default(),
        };
        if response.status() != reqwest::StatusCode::OK {
            return StatusSummary::default();
        }
        match response.json::<StatusResponse>().await {
            Ok(document) => summarize(document),
            Err(_) => StatusSummary::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn host_validation_table() {
        let valid = [
            "192.168.1.1",
            "10.0.0.1",
            "152.53.138.217",
            "::1",
            "2001:db8::1",
            "example.com",
            "sn.example.com",
            "sub.example.com",
            "my-server.example.com",
            "server1.example.com",
            "a.b.c.d.example.com",
        ];
        for host in valid {
            assert!(is_valid_host(host), "{host} should be valid");
        }

        let invalid = [
            "SUNUCUIP",
            "localhost",
            "server1",
            "",
            ".",
            ".example.com",
            "example.com.",
            "example..com",
            "-example.com",
            "example.com-",
            "exam ple.com",
            "example$.com",
            "123",
            "12.34",
        ];
        for host in invalid {
            assert!(!is_valid_host(host), "{host} should be invalid");
        }
    }

    #[test]
    fn host_length_limit() {
        let long = format!("{}.example.com", "a".repeat(250));
        assert!(!is_valid_host(&long));
    }

    #[test]
    fn split_host_port_cases() {
        assert_eq!(
            split_host_port("1.2.3.4:4444"),
            Some(("1.2.3.4".to_owned(), 4444))
        );
        assert_eq!(
            split_host_port("  sn.example.com:4444  "),
            Some(("sn.example.com".to_owned(), 4444))
        );
        assert_eq!(
            split_host_port("sn.example.com : 4444"),
            Some(("sn.example.com".to_owned(), 4444))
        );
        assert_eq!(split_host_port("[::1]:4444"), Some(("::1".to_owned(), 4444)));
        assert_eq!(split_host_port("noport"), None);
        assert_eq!(split_host_port("host:0"), None);
        assert_eq!(split_host_port("host:abc"), None);
        assert_eq!(split_host_port(":4444"), None);
        assert_eq!(split_host_port(""), None);
    }

    #[test]
    fn summarize_sums_storage_volumes() {
        let document: StatusResponse = serde_json::from_str(
            r#"{
                "version": "v2.4.10",
                "uptime_seconds": "86400",
                "resources": {
                    "cpu": {"usage_percent": 12.5, "cores": 8},
                    "memory": {"total_gb": 64.0, "used_gb": 16.0, "usage_percent": 25.0},
                    "storage_volumes": [
                        {"path": "/", "total_bytes": "1000", "used_bytes": "400", "usage_percent": 40.0},
                        {"path": "/data", "total_bytes": "5000", "used_bytes": "1000", "usage_percent": 20.0}
                    ],
                    "hardware_summary": "8c/64g"
                },
                "network": {"peers_count": 17},
                "rank": 3
            }"#,
        )
        .unwrap();
        let summary = summarize(document);
        assert!(summary.available);
        assert_eq!(summary.version, "v2.4.10");
        assert_eq!(summary.uptime_seconds, 86400);
        assert_eq!(summary.cpu_cores, 8);
        assert_eq!(summary.storage_total_bytes, 6000);
        assert_eq!(summary.storage_used_bytes, 1400);
        // Last volume's percentage stands in for the node.
        assert_eq!(summary.storage_usage_percent, 20.0);
        assert_eq!(summary.peers_count, 17);
        assert_eq!(summary.rank, 3);
    }

    #[test]
    fn summarize_tolerates_bad_numbers() {
        let document: StatusResponse = serde_json::from_str(
            r#"{"uptime_seconds": "soon", "resources": {"storage_volumes": [
                {"total_bytes": "x", "used_bytes": ""}
            ]}}"#,
        )
        .unwrap();
        let summary = summarize(document);
        assert_eq!(summary.uptime_seconds, 0);
        assert_eq!(summary.storage_total_bytes, 0);
    }

    #[test]
    fn join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("1.2.3.4", 8002), "1.2.3.4:8002");
        assert_eq!(join_host_port("::1", 8002), "[::1]:8002");
    }
}

//! SSRF-safe URL validation
//!
//! Applied inside the HTTP executor and the client registry before any
//! network I/O, and re-applied to every redirect hop:
//!
//! 1. Scheme must be `https`, or `http` when the config allows it.
//! 2. Cloud-metadata hostnames are rejected outright.
//! 3. A non-empty domain allowlist must contain the host (exact match or
//!    subdomain).
//! 4. The host is resolved; loopback, link-local, private, unique-local,
//!    multicast, and unspecified addresses are rejected when private-IP
//!    blocking is on. Literal IPs never hit DNS, so a denylisted literal
//!    is rejected without any socket activity.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Hostnames that resolve to cloud metadata services.
const METADATA_HOSTS: &[&str] = &["metadata.google.internal", "metadata.goog"];

/// The cloud-metadata IPv4 endpoint (also link-local, but named here so
/// the rejection reason is explicit).
const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// URL validation policy derived from the engine config.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    allow_http: bool,
    block_private_ips: bool,
    allowed_domains: Vec<String>,
    max_response_size: u64,
    follow_redirects: bool,
    max_redirects: u32,
}

impl SecurityGate {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            allow_http: config.allow_http,
            block_private_ips: config.blocks_private_ips(),
            allowed_domains: config
                .allowed_domains
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            max_response_size: config.max_response_size,
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
        }
    }

    pub fn max_response_size(&self) -> u64 {
        self.max_response_size
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// Validate a URL string without touching the network.
    ///
    /// Scheme, metadata hostnames, the domain allowlist, and literal IP
    /// addresses are all checked here. Hostname resolution happens in
    /// [`validate_resolved`](Self::validate_resolved).
    pub fn validate_url(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw)
            .map_err(|e| EngineError::TransportError(format!("invalid URL '{}': {}", raw, e)))?;

        match url.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            scheme => {
                return Err(EngineError::SchemeDisallowed {
                    scheme: scheme.to_string(),
                })
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| EngineError::TransportError(format!("URL '{}' has no host", raw)))?
            .to_ascii_lowercase();

        if METADATA_HOSTS.contains(&host.as_str()) {
            return Err(EngineError::ssrf_blocked(&host, "cloud metadata endpoint"));
        }

        if !self.allowed_domains.is_empty() && !self.domain_allowed(&host) {
            return Err(EngineError::DomainNotAllowed { host });
        }

        // Literal IPs are checked immediately; no resolution involved.
        if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
            if self.block_private_ips {
                if let Some(reason) = blocked_ip_reason(ip) {
                    return Err(EngineError::ssrf_blocked(&host, reason));
                }
            }
        }

        Ok(url)
    }

    /// Resolve the host and reject any blocked address.
    ///
    /// Every address the name resolves to must pass; one bad A record is
    /// enough to reject (DNS rebinding defence).
    pub async fn validate_resolved(&self, url: &Url) -> Result<()> {
        if !self.block_private_ips {
            return Ok(());
        }
        let host = url
            .host_str()
            .ok_or_else(|| EngineError::TransportError("URL has no host".to_string()))?;

        // Literal IPs were already checked in validate_url.
        if host.trim_matches(['[', ']']).parse::<IpAddr>().is_ok() {
            return Ok(());
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| {
                EngineError::TransportError(format!("failed to resolve '{}': {}", host, e))
            })?
            .collect();

        for addr in addrs {
            if let Some(reason) = blocked_ip_reason(addr.ip()) {
                return Err(EngineError::ssrf_blocked(host, reason));
            }
        }
        Ok(())
    }

    fn domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|allowed| {
            host == allowed || host.ends_with(&format!(".{}", allowed))
        })
    }
}

/// Why an address is blocked, or `None` when it is publicly routable.
pub fn blocked_ip_reason(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_v4_reason(v4),
        IpAddr::V6(v6) => {
            // v4-mapped addresses inherit the v4 verdict.
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return blocked_v4_reason(mapped);
            }
            if v6.is_loopback() {
                Some("loopback address")
            } else if v6.is_unspecified() {
                Some("unspecified address")
            } else if is_unique_local_v6(&v6) {
                Some("unique-local (private) address")
            } else if is_link_local_v6(&v6) {
                Some("link-local address")
            } else if v6.is_multicast() {
                Some("multicast address")
            } else {
                None
            }
        }
    }
}

fn blocked_v4_reason(ip: Ipv4Addr) -> Option<&'static str> {
    if ip == METADATA_V4 {
        Some("cloud metadata endpoint")
    } else if ip.is_loopback() {
        Some("loopback address")
    } else if ip.is_unspecified() {
        Some("unspecified address")
    } else if ip.is_private() {
        Some("private address range")
    } else if ip.is_link_local() {
        Some("link-local address")
    } else if ip.is_multicast() {
        Some("multicast address")
    } else if ip.is_broadcast() {
        Some("broadcast address")
    } else {
        None
    }
}

/// fc00::/7
fn is_unique_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// fe80::/10
fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn gate() -> SecurityGate {
        SecurityGate::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_denylisted_literals_rejected() {
        for url in [
            "http://127.0.0.1/",
            "http://169.254.169.254/latest/meta-data/",
            "http://10.0.0.1/",
            "http://172.16.5.5/",
            "http://192.168.1.1/",
            "http://[::1]/",
            "http://[fc00::1]/",
            "http://metadata.google.internal/",
        ] {
            let err = gate().validate_url(url).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SsrfBlocked, "url {} not blocked", url);
        }
    }

    #[test]
    fn test_public_url_accepted() {
        assert!(gate().validate_url("https://example.com/api").is_ok());
        assert!(gate().validate_url("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn test_scheme_policy() {
        let err = gate().validate_url("ftp://example.com/").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemeDisallowed);

        let mut config = EngineConfig::default();
        config.allow_http = false;
        let strict = SecurityGate::from_config(&config);
        let err = strict.validate_url("http://example.com/").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemeDisallowed);
        assert!(strict.validate_url("https://example.com/").is_ok());
    }

    #[test]
    fn test_allowlist() {
        let mut config = EngineConfig::default();
        config.allowed_domains = vec!["api.example.com".to_string()];
        let gate = SecurityGate::from_config(&config);

        assert!(gate.validate_url("https://api.example.com/v1").is_ok());
        assert!(gate.validate_url("https://sub.api.example.com/v1").is_ok());
        let err = gate.validate_url("https://evil.com/").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainNotAllowed);
    }

    #[test]
    fn test_private_blocking_can_be_disabled() {
        let gate = SecurityGate::from_config(&EngineConfig::development());
        assert!(gate.validate_url("http://127.0.0.1:8080/").is_ok());
        // Metadata hostnames stay blocked even in development.
        assert!(gate
            .validate_url("http://metadata.google.internal/")
            .is_err());
    }

    #[test]
    fn test_blocked_ip_reasons() {
        assert!(blocked_ip_reason("127.0.0.1".parse().unwrap()).is_some());
        assert!(blocked_ip_reason("169.254.169.254".parse().unwrap()).is_some());
        assert!(blocked_ip_reason("224.0.0.1".parse().unwrap()).is_some());
        assert!(blocked_ip_reason("::1".parse().unwrap()).is_some());
        assert!(blocked_ip_reason("fe80::1".parse().unwrap()).is_some());
        assert!(blocked_ip_reason("::ffff:10.0.0.1".parse().unwrap()).is_some());
        assert!(blocked_ip_reason("93.184.216.34".parse().unwrap()).is_none());
        assert!(blocked_ip_reason("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()).is_none());
    }
}

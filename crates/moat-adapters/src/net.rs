// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared network validation used by egress adapters.

use crate::AdapterError;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

fn ipv4_blocked(ip: Ipv4Addr) -> bool {
    // RFC 1918 private, loopback, link-local (incl. 169.254.169.254),
    // unspecified, benchmark/documentation, and 240/4 reserved space.
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.octets()[0] >= 240
}

fn ipv6_blocked(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return ipv4_blocked(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (first & 0xffc0) == 0xfe80 // link local fe80::/10
}

/// Whether a hostname points at private or internal address space.
///
/// Literal IPs are classified directly; non-IP hostnames are blocked when
/// they match the well-known private patterns (`localhost`, `*.local`,
/// `*.internal`). Anything else resolves through the HTTP client.
pub fn is_private_host(hostname: &str) -> bool {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => ipv4_blocked(v4),
            IpAddr::V6(v6) => ipv6_blocked(v6),
        };
    }
    let lower = hostname.to_ascii_lowercase();
    lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal")
}

/// Parse a comma-separated domain allowlist into a lowercase set.
pub fn parse_domain_allowlist(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Validate a URL against the domain allowlist and egress security rules.
///
/// Checks run in order: scheme (`https`, with `http` tolerated only for
/// `localhost`/`127.0.0.1`), non-empty hostname, private/internal address
/// rejection, then exact allowlist membership (no wildcard expansion at
/// this layer). Every redirected hop re-enters this function.
pub fn validate_url(
    provider: &str,
    raw_url: &str,
    allowlist: &BTreeSet<String>,
) -> Result<Url, AdapterError> {
    let url = Url::parse(raw_url)
        .map_err(|e| AdapterError::validation(provider, format!("invalid url: {e}")))?;

    match url.scheme() {
        "https" => {}
        "http" => {
            let host = url.host_str().unwrap_or("");
            if host != "localhost" && host != "127.0.0.1" {
                return Err(AdapterError::validation(
                    provider,
                    "HTTP is not allowed for external requests; use HTTPS",
                ));
            }
        }
        other => {
            return Err(AdapterError::validation(
                provider,
                format!("unsupported scheme '{other}'; only HTTPS is allowed"),
            ));
        }
    }

    let hostname = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_ascii_lowercase(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        _ => {
            return Err(AdapterError::validation(provider, "url has no hostname"));
        }
    };

    if is_private_host(&hostname) {
        return Err(AdapterError::validation(
            provider,
            format!("requests to private/internal addresses are blocked: {hostname}"),
        ));
    }

    if !allowlist.contains(&hostname) {
        return Err(AdapterError::validation(
            provider,
            format!("domain '{hostname}' is not in the allowlist"),
        ));
    }

    Ok(url)
}

//! Path and outbound-target validation.
//!
//! Rejections never echo the rejected target back: callers log a generic
//! message and skip the fragment.

use crate::{DiscoveryError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Component, Path, PathBuf};
use url::{Host, Url};

const MAX_REDIRECTS: usize = 5;

const METADATA_HOSTS: &[&str] = &[
    "metadata",
    "metadata.google.internal",
    "metadata.azure.com",
    "instance-data",
    "instance-data.ec2.internal",
];

/// Restricts which files nginx `include` directives may pull in.
#[derive(Debug, Clone)]
pub struct IncludePolicy {
    roots: Vec<PathBuf>,
}

impl IncludePolicy {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut all = Vec::new();
        for root in roots {
            if let Ok(canonical) = std::fs::canonicalize(&root) {
                if canonical != root {
                    all.push(canonical);
                }
            }
            all.push(root);
        }
        Self { roots: all }
    }

    /// Absolute, no `..`, no NUL, and under one of the allowed roots.
    pub fn check(&self, path: &Path) -> Result<()> {
        if !path.is_absolute() {
            return Err(DiscoveryError::Unsafe);
        }
        if path.to_string_lossy().contains('\0') {
            return Err(DiscoveryError::Unsafe);
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(DiscoveryError::Unsafe);
        }
        if !self.roots.iter().any(|root| path.starts_with(root)) {
            return Err(DiscoveryError::Unsafe);
        }
        Ok(())
    }
}

/// Validates a backend URL before any request is issued.
pub fn validate_discovery_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|_| DiscoveryError::Unsafe)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DiscoveryError::Unsafe);
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(DiscoveryError::Unsafe);
    }
    match url.host() {
        None => return Err(DiscoveryError::Unsafe),
        Some(Host::Ipv4(ip)) if is_forbidden_ip(IpAddr::V4(ip)) => {
            return Err(DiscoveryError::Unsafe)
        }
        Some(Host::Ipv6(ip)) if is_forbidden_ip(IpAddr::V6(ip)) => {
            return Err(DiscoveryError::Unsafe)
        }
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain.is_empty() || METADATA_HOSTS.contains(&domain.as_str()) {
                return Err(DiscoveryError::Unsafe);
            }
        }
        Some(_) => {}
    }
    Ok(url)
}

/// Joins `path` onto a validated base URL, keeping the base's authority.
pub fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(None);
    url
}

pub fn same_authority(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Follows redirects only while they stay on the original authority.
pub fn redirect_policy() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let allowed = attempt
            .previous()
            .first()
            .is_some_and(|origin| same_authority(origin, attempt.url()));
        if allowed {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_forbidden_v4(mapped);
            }
            is_forbidden_v6(v6)
        }
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    ip.is_unspecified() || ip.is_link_local() || ip.is_broadcast() || ip.is_multicast()
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    // fe80::/10
    let link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
    ip.is_unspecified() || ip.is_multicast() || link_local
}

//! Wire types shared by the discovery engine and the admin API.
//!
//! `url` is the natural key everywhere: dedup, override matching and staleness
//! detection all compare it by exact string equality.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest number of URLs accepted by one bulk request.
pub const MAX_BULK_URLS: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Docker,
    Nginx,
    Traefik,
    Npm,
    Caddy,
    Unraid,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Docker,
        SourceKind::Nginx,
        SourceKind::Traefik,
        SourceKind::Npm,
        SourceKind::Caddy,
        SourceKind::Unraid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Docker => "docker",
            SourceKind::Nginx => "nginx",
            SourceKind::Traefik => "traefik",
            SourceKind::Npm => "npm",
            SourceKind::Caddy => "caddy",
            SourceKind::Unraid => "unraid",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SourceKind::Docker => "Docker",
            SourceKind::Nginx => "Nginx",
            SourceKind::Traefik => "Traefik",
            SourceKind::Npm => "Nginx Proxy Manager",
            SourceKind::Caddy => "Caddy",
            SourceKind::Unraid => "Unraid",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let needle = raw.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| format!("unknown discovery source: {raw}"))
    }
}

/// Initial reachability guess. The health checker owns the authoritative value.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Online,
    Offline,
}

impl AppStatus {
    pub fn from_running(running: bool) -> Self {
        if running {
            AppStatus::Online
        } else {
            AppStatus::Offline
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DiscoveredApp {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: AppStatus,
}

/// A discovered app tagged with the source that produced it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RawDiscoveredApp {
    #[serde(flatten)]
    pub app: DiscoveredApp,
    pub source: SourceKind,
}

/// Persisted, admin-authored customisation of one discovered app.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DiscoveredAppOverride {
    #[serde(default)]
    pub url: String,
    /// Origin tag. Informational only, may be empty.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl DiscoveredAppOverride {
    pub fn seeded(url: impl Into<String>, source: Option<SourceKind>) -> Self {
        Self {
            url: url.into(),
            source: source.map(|s| s.as_str().to_string()).unwrap_or_default(),
            ..Self::default()
        }
    }
}

/// One live app with its override (if any) applied.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ActiveApp {
    #[serde(flatten)]
    pub app: DiscoveredApp,
    pub source: SourceKind,
    pub hidden: bool,
    pub category: String,
    pub groups: Vec<String>,
    pub overridden: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DiscoveredAppsView {
    pub active: Vec<ActiveApp>,
    pub stale: Vec<DiscoveredAppOverride>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    /// Unhide and apply the supplied category/groups.
    Show,
}

impl FromStr for BulkAction {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "show" => Ok(BulkAction::Show),
            other => Err(other.to_string()),
        }
    }
}

/// Body of `POST /api/admin/discovered-apps/bulk`.
///
/// `action` stays a plain string so an unknown action is reported as a
/// validation failure after the URL checks, not as a JSON error.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct BulkRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BulkResponse {
    pub status: String,
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub source: SourceKind,
    pub enabled: bool,
    pub running: bool,
    pub env_forced: bool,
    pub apps: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SourceToggle {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectionTestResult {
    pub ok: bool,
    pub apps: usize,
    pub auth_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

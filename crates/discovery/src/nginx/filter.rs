use lantern_protocol::DiscoveredApp;
use std::collections::HashMap;

/// Backup, swap and packaging leftovers that nginx itself would not load.
const SKIP_EXTENSIONS: &[&str] = &[
    ".bak",
    ".dpkg-old",
    ".dpkg-new",
    ".dpkg-dist",
    ".rpmnew",
    ".rpmsave",
    ".swp",
    ".swo",
    ".tmp",
    ".orig",
    "~",
];

/// Exact location paths that never name an application.
const SKIP_EXACT_PATHS: &[&str] = &[
    "/",
    "/.well-known",
    "/api",
    "/static",
    "/assets",
    "/public",
    "/media",
    "/uploads",
    "/favicon.ico",
    "/robots.txt",
    "/health",
    "/healthz",
    "/metrics",
    "/stub_status",
    "/nginx_status",
    "/server-status",
];

/// Case-insensitive substrings marking auth middleware, realtime endpoints
/// and sub-features of other apps.
const SKIP_PATTERNS: &[&str] = &[
    "/authelia/",
    "/authentik/",
    "/api/authz",
    "/.oauth/",
    "/oauth2/",
    "/socket.io/",
    "/sockjs/",
    "/websocket/",
    "/api/",
    "/control/",
    "/download/",
    "/downloads/",
];

const SKIP_SUFFIXES: &[&str] = &[
    "/api",
    "/ws",
    "/wss",
    "/feed",
    "/rss",
    "/atom",
    "/auth",
    "/login",
    "/logout",
    "/callback",
    "/signin",
    "/signout",
    "/opds",
    "/kobo",
];

const REGEX_METACHARS: &[char] = &['(', ')', '[', ']', '{', '}', '*', '+', '?', '^', '$', '|', '\\'];

pub(crate) fn is_config_file(name: &str) -> bool {
    if name.starts_with('.') {
        return false;
    }
    if let Some((_, ext)) = name.rsplit_once('.') {
        let ext = format!(".{ext}");
        if SKIP_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
    }
    // Multi-part extensions such as `.conf.dpkg-old`.
    !SKIP_EXTENSIONS.iter().any(|suffix| name.ends_with(suffix))
}

pub(crate) fn has_regex_metachars(path: &str) -> bool {
    path.contains(REGEX_METACHARS)
}

pub(crate) fn should_skip_location(path: &str) -> bool {
    if has_regex_metachars(path) {
        return true;
    }

    let clean = path.trim_end_matches('/');
    let clean = if clean.is_empty() { "/" } else { clean };

    if SKIP_EXACT_PATHS.contains(&clean) {
        return true;
    }

    let lower = path.to_lowercase();
    if SKIP_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return true;
    }

    SKIP_SUFFIXES.iter().any(|suffix| clean.ends_with(suffix))
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// Drops apps whose URL is a sub-path of a shorter app on the same host.
///
/// Hosts keep their first-seen order; within a host, apps are ordered by URL
/// length so `/lidarr` is kept before `/lidarr/api` is considered.
pub(crate) fn dedupe_by_base_path(apps: Vec<DiscoveredApp>) -> Vec<DiscoveredApp> {
    let mut host_order: Vec<String> = Vec::new();
    let mut by_host: HashMap<String, Vec<DiscoveredApp>> = HashMap::new();
    for app in apps {
        let host = host_of(&app.url).to_string();
        if !by_host.contains_key(&host) {
            host_order.push(host.clone());
        }
        by_host.entry(host).or_default().push(app);
    }

    let mut result = Vec::new();
    for host in host_order {
        let Some(mut host_apps) = by_host.remove(&host) else {
            continue;
        };
        host_apps.sort_by_key(|app| app.url.len());

        let mut kept: Vec<String> = Vec::new();
        for app in host_apps {
            let normalized = app.url.trim_end_matches('/').to_string();
            let is_sub_path = kept
                .iter()
                .any(|base| normalized.starts_with(&format!("{base}/")));
            if !is_sub_path {
                kept.push(normalized);
                result.push(app);
            }
        }
    }
    result
}

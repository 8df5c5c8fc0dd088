use super::filter::should_skip_location;
use crate::naming::{display_name, name_from_host};
use lantern_protocol::{AppStatus, DiscoveredApp};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const IGNORED_SERVER_NAMES: &[&str] = &["_", "localhost", "default_server", ""];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(pattern).unwrap_or_else(|e| unreachable!("invalid builtin regex: {e}"))
    })
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Quoted strings are matched first so a `#` inside one is left alone.
    regex(&RE, r#"(?m)"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|#.*$"#)
}

fn server_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bserver\s*\{")
}

fn server_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bserver_name\s+([^;]+);")
}

fn listen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\blisten\s+([^;]+);")
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\blocation\s+([=~^*]*)\s*(/[^\s{]*)\s*\{")
}

fn proxy_pass_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bproxy_pass\s+([^;]+);")
}

/// Removes `#` comments across the whole document, leaving quoted strings intact.
pub(crate) fn strip_comments(content: &str) -> String {
    comment_re()
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            if matched.starts_with('#') {
                String::new()
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

/// Byte offset just past the quote that closes the string opened at the start
/// of `rest`, if it closes before the end of the line.
fn closing_quote(rest: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in rest.char_indices().skip(1) {
        match c {
            '\n' => return None,
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            _ if c == quote => return Some(i + c.len_utf8()),
            _ => {}
        }
    }
    None
}

/// Scans a block body that starts just after its opening `{`.
///
/// Returns the body and the index of the matching `}`, or the whole input and
/// `None` when the block never closes. Braces inside comments are not counted,
/// nor are braces inside a quoted string that closes on the same line. A lone
/// quote (`can't`) is an ordinary character.
pub(crate) fn extract_block(s: &str) -> (&str, Option<usize>) {
    let mut depth = 1usize;
    let mut in_comment = false;
    let mut skip_until = 0usize;

    for (i, c) in s.char_indices() {
        if i < skip_until {
            continue;
        }
        if c == '\n' {
            in_comment = false;
            continue;
        }
        if in_comment {
            continue;
        }
        match c {
            '#' => in_comment = true,
            '"' | '\'' => {
                if let Some(len) = closing_quote(&s[i..], c) {
                    skip_until = i + len;
                }
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return (&s[..i], Some(i));
                }
            }
            _ => {}
        }
    }
    (s, None)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerBlock<'a> {
    pub host: String,
    pub https: bool,
    pub body: &'a str,
}

impl ServerBlock<'_> {
    fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }
}

/// Splits a comment-free document into server block bodies.
pub(crate) fn server_bodies(content: &str) -> Vec<&str> {
    server_open_re()
        .find_iter(content)
        .map(|m| extract_block(&content[m.end()..]).0)
        .collect()
}

pub(crate) fn parse_server_block(body: &str) -> Option<ServerBlock<'_>> {
    let names = server_name_re().captures(body)?;
    let host = names[1]
        .split_whitespace()
        .map(str::trim)
        .find(|name| !IGNORED_SERVER_NAMES.contains(name))?
        .to_string();

    let https = listen_re()
        .captures_iter(body)
        .any(|caps| listen_is_tls(&caps[1]));

    Some(ServerBlock { host, https, body })
}

fn listen_is_tls(spec: &str) -> bool {
    let mut tokens = spec.split_whitespace();
    let Some(address) = tokens.next() else {
        return false;
    };
    let port = address.rsplit_once(':').map_or(address, |(_, port)| port);
    port == "443" || tokens.any(|t| t == "ssl")
}

fn first_proxy_pass(body: &str) -> Option<String> {
    proxy_pass_re()
        .captures(body)
        .map(|caps| caps[1].trim().to_string())
}

fn describe(upstream: &str) -> String {
    format!("Discovered via Nginx (proxied to {upstream})")
}

/// Apps from one server block. `seen` spans the whole discovery run.
pub(crate) fn apps_from_block(
    block: &ServerBlock<'_>,
    seen: &mut HashSet<String>,
) -> Vec<DiscoveredApp> {
    let mut apps = Vec::new();

    for caps in location_re().captures_iter(block.body) {
        let (Some(whole), Some(modifier), Some(path)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let path = path.as_str();
        if modifier.as_str().starts_with('~') || should_skip_location(path) {
            continue;
        }

        let (location_body, _) = extract_block(&block.body[whole.end()..]);
        let Some(upstream) = first_proxy_pass(location_body) else {
            continue;
        };

        let segment = path
            .trim_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();
        let name = display_name(segment);
        if name.is_empty() {
            continue;
        }

        let url = format!("{}://{}{}", block.scheme(), block.host, path);
        if !seen.insert(url.clone()) {
            continue;
        }

        apps.push(DiscoveredApp {
            name,
            url,
            icon: String::new(),
            description: describe(&upstream),
            status: AppStatus::Online,
        });
    }

    if apps.is_empty() {
        if let Some(upstream) = first_proxy_pass(block.body) {
            let url = format!("{}://{}", block.scheme(), block.host);
            if seen.insert(url.clone()) {
                apps.push(DiscoveredApp {
                    name: name_from_host(&block.host),
                    url,
                    icon: String::new(),
                    description: describe(&upstream),
                    status: AppStatus::Online,
                });
            }
        }
    }

    apps
}

/// Apps from a fully inlined document.
pub(crate) fn apps_from_document(
    content: &str,
    seen: &mut HashSet<String>,
) -> Vec<DiscoveredApp> {
    let stripped = strip_comments(content);
    server_bodies(&stripped)
        .into_iter()
        .filter_map(parse_server_block)
        .flat_map(|block| apps_from_block(&block, seen))
        .collect()
}

use crate::limits::{MAX_CONFIG_FILE_BYTES, MAX_INCLUDE_DEPTH};
use crate::safety::IncludePolicy;
use log::{debug, warn};
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub(crate) const SKIPPED_MARKER: &str = "# include skipped (validation failed)";
pub(crate) const NOT_FOUND_MARKER: &str = "# include not found";

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*include\s+([^;]+);")
            .unwrap_or_else(|e| unreachable!("invalid builtin regex: {e}"))
    })
}

/// Where include targets may come from and how relative ones resolve.
#[derive(Debug, Clone)]
pub(crate) struct IncludeContext {
    pub policy: IncludePolicy,
    /// Base for relative include paths (the nginx prefix directory).
    pub base_dir: PathBuf,
}

/// Replaces every `include <glob>;` line with the concatenated contents of the
/// matching files, recursively. Directives below [`MAX_INCLUDE_DEPTH`] are left
/// as they are, which also bounds cyclic include graphs.
pub(crate) fn resolve_includes(content: &str, depth: usize, ctx: &IncludeContext) -> String {
    if depth > MAX_INCLUDE_DEPTH {
        return content.to_string();
    }

    include_re()
        .replace_all(content, |caps: &Captures<'_>| {
            expand_directive(caps[1].trim(), depth, ctx)
        })
        .into_owned()
}

fn expand_directive(raw: &str, depth: usize, ctx: &IncludeContext) -> String {
    let pattern_path = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        ctx.base_dir.join(raw)
    };

    if ctx.policy.check(&pattern_path).is_err() {
        warn!("nginx include skipped: path failed safety validation");
        return SKIPPED_MARKER.to_string();
    }
    let Some(pattern) = pattern_path.to_str() else {
        return SKIPPED_MARKER.to_string();
    };

    let matches: Vec<PathBuf> = match glob::glob(pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
        Err(_) => Vec::new(),
    };
    if matches.is_empty() {
        return NOT_FOUND_MARKER.to_string();
    }

    let mut out = String::new();
    for candidate in matches {
        let Some(text) = read_candidate(&candidate, ctx) else {
            continue;
        };
        out.push_str(&resolve_includes(&text, depth + 1, ctx));
        out.push('\n');
    }
    out
}

fn read_candidate(candidate: &Path, ctx: &IncludeContext) -> Option<String> {
    let resolved = match std::fs::canonicalize(candidate) {
        Ok(path) => path,
        Err(err) => {
            debug!("nginx include: cannot resolve candidate: {err}");
            return None;
        }
    };
    if ctx.policy.check(&resolved).is_err() {
        warn!("nginx include skipped: resolved path failed safety validation");
        return None;
    }
    read_config_file(&resolved)
}

/// Reads a config file if it is a regular file within the size cap.
pub(crate) fn read_config_file(path: &Path) -> Option<String> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            warn!("nginx: cannot stat {}: {err}", path.display());
            return None;
        }
    };
    if !meta.is_file() {
        return None;
    }
    if meta.len() > MAX_CONFIG_FILE_BYTES {
        warn!(
            "nginx: {} exceeds {MAX_CONFIG_FILE_BYTES} byte limit, skipping",
            path.display()
        );
        return None;
    }
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            warn!("nginx: cannot read {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(root: &Path) -> IncludeContext {
        IncludeContext {
            policy: IncludePolicy::new([root.to_path_buf()]),
            base_dir: root.to_path_buf(),
        }
    }

    #[test]
    fn glob_includes_are_inlined_in_order() {
        let temp = TempDir::new().expect("tempdir");
        let snippets = temp.path().join("snippets");
        std::fs::create_dir_all(&snippets).unwrap();
        std::fs::write(snippets.join("a.conf"), "proxy_set_header A 1;").unwrap();
        std::fs::write(snippets.join("b.conf"), "proxy_set_header B 2;").unwrap();

        let out = resolve_includes(
            "server {\n    include snippets/*.conf;\n}",
            0,
            &ctx(temp.path()),
        );
        let a = out.find("A 1").expect("a inlined");
        let b = out.find("B 2").expect("b inlined");
        assert!(a < b);
        assert!(!out.contains("include snippets"));
    }

    #[test]
    fn self_include_terminates_at_depth_cap() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("loop.conf");
        let body = format!("include {};\nlisten 80;", path.display());
        std::fs::write(&path, &body).unwrap();

        let out = resolve_includes(&body, 0, &ctx(temp.path()));
        // Four expansions (depths 0..=3), then the directive stays literal.
        assert_eq!(out.matches("listen 80;").count(), MAX_INCLUDE_DEPTH + 2);
        assert_eq!(out.matches("include ").count(), 1);
    }

    #[test]
    fn paths_outside_roots_become_inert_markers() {
        let temp = TempDir::new().expect("tempdir");
        let out = resolve_includes(
            "include /etc/passwd;\ninclude ../escape/*.conf;",
            0,
            &ctx(temp.path()),
        );
        assert_eq!(out.matches(SKIPPED_MARKER).count(), 2);
        assert!(!out.contains("passwd"));
        assert!(!out.contains("escape"));
    }

    #[test]
    fn missing_includes_are_marked_not_found() {
        let temp = TempDir::new().expect("tempdir");
        let out = resolve_includes("include nothing/*.conf;", 0, &ctx(temp.path()));
        assert_eq!(out, NOT_FOUND_MARKER);
    }

    #[test]
    fn oversized_includes_are_skipped() {
        let temp = TempDir::new().expect("tempdir");
        let big = temp.path().join("big.conf");
        let filler = "#".repeat(MAX_CONFIG_FILE_BYTES as usize + 1);
        std::fs::write(&big, filler).unwrap();
        std::fs::write(temp.path().join("small.conf"), "listen 8080;").unwrap();

        let out = resolve_includes("include *.conf;", 0, &ctx(temp.path()));
        assert!(out.contains("listen 8080;"));
        assert!(out.len() < 1024);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_escaping_the_roots_are_skipped() {
        let outside = TempDir::new().expect("outside");
        let secret = outside.path().join("secret.conf");
        std::fs::write(&secret, "server_name leaked.example;").unwrap();

        let temp = TempDir::new().expect("tempdir");
        std::os::unix::fs::symlink(&secret, temp.path().join("link.conf")).unwrap();

        let out = resolve_includes("include link.conf;", 0, &ctx(temp.path()));
        assert!(!out.contains("leaked"));
    }
}

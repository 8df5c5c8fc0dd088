use anyhow::{Context as AnyhowContext, Result};
use std::net::SocketAddr;

pub const AUTH_TOKEN_ENV: &str = "LANTERN_AUTH_TOKEN";

/// Shared secret for the admin routes.
#[derive(Clone, Debug)]
pub struct AuthToken {
    secret: String,
}

impl AuthToken {
    /// An absent token disables auth; a blank one is a startup error.
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>> {
        match raw.map(str::trim) {
            None => Ok(None),
            Some("") => anyhow::bail!("auth token must be non-empty"),
            Some(secret) => Ok(Some(Self {
                secret: secret.to_string(),
            })),
        }
    }

    /// Accepts `Bearer <token>`; the scheme name is case-insensitive.
    pub fn matches_authorization_header(&self, header_value: &str) -> bool {
        let Some((scheme, credentials)) = header_value.trim().split_once(' ') else {
            return false;
        };
        scheme.eq_ignore_ascii_case("bearer")
            && secrets_equal(credentials.trim().as_bytes(), self.secret.as_bytes())
    }
}

/// Resolves `bind`. Without `public`, every resolved address must be loopback.
pub async fn resolve_guarded_bind_addrs(bind: &str, public: bool) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(bind)
        .await
        .with_context(|| format!("Failed to resolve bind address: {bind}"))?
        .collect();
    if addrs.is_empty() {
        anyhow::bail!("Bind address resolved to zero socket addrs: {bind}")
    }
    if public {
        return Ok(addrs);
    }

    if let Some(exposed) = addrs.iter().find(|addr| !addr.ip().is_loopback()) {
        anyhow::bail!(
            "Refusing to bind to non-loopback address without --public: {bind} ({exposed}). \
             The admin API can change discovery settings; pass --public together with \
             --auth-token or {AUTH_TOKEN_ENV} to expose it."
        )
    }
    Ok(addrs)
}

/// Visits every byte of equal-length inputs, mismatch or not.
fn secrets_equal(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

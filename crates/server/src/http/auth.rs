//! Shared-token guard for everything under `/api`.
//!
//! With `access_control.mode = TOKEN` a request must present the configured
//! token as `Authorization: Bearer <token>` or `x-api-token: <token>`, unless it
//! comes from a loopback peer and the localhost bypass is enabled.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use deployment::Deployment;
use services::services::config::{AccessControlConfig, AccessControlMode};

use crate::{DeploymentImpl, error::ApiError};

const TOKEN_HEADER: &str = "x-api-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Granted,
    /// Token mode is on but no token is configured.
    Unguarded,
    Denied(&'static str),
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The bearer token wins when both headers are sent.
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION)
        .and_then(bearer_token)
        .or_else(|| header_str(headers, TOKEN_HEADER))
}

fn check_access(
    settings: &AccessControlConfig,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Access {
    if settings.mode == AccessControlMode::Disabled {
        return Access::Granted;
    }
    let Some(expected) = settings.token.as_deref().filter(|t| !t.is_empty()) else {
        return Access::Unguarded;
    };
    if settings.allow_localhost_bypass && peer.is_some_and(|addr| addr.ip().is_loopback()) {
        return Access::Granted;
    }

    match presented_token(headers) {
        Some(token) if token == expected => Access::Granted,
        Some(_) => Access::Denied("token_mismatch"),
        None => Access::Denied("missing_token"),
    }
}

pub async fn require_api_auth(
    State(deployment): State<DeploymentImpl>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let settings = deployment.config().read().await.access_control.clone();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match check_access(&settings, req.headers(), peer) {
        Access::Granted => Ok(next.run(req).await),
        Access::Unguarded => {
            tracing::warn!("Token access control is enabled without a token; allowing request");
            Ok(next.run(req).await)
        }
        Access::Denied(reason) => {
            tracing::warn!(
                method = %req.method(),
                path = %req.uri().path(),
                peer = ?peer,
                reason,
                "Rejected API request"
            );
            Err(ApiError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::http::HeaderValue;

    use super::*;

    fn token_mode(bypass: bool) -> AccessControlConfig {
        AccessControlConfig {
            mode: AccessControlMode::Token,
            token: Some("secret".to_string()),
            allow_localhost_bypass: bypass,
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    fn peer(ip: [u8; 4]) -> Option<SocketAddr> {
        Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 40000))
    }

    #[test]
    fn bearer_parsing_is_case_insensitive_and_trims() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("  bearer   abc  "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn bearer_header_takes_precedence_over_token_header() {
        let both = headers(&[("authorization", "Bearer one"), ("x-api-token", "two")]);
        assert_eq!(presented_token(&both), Some("one"));

        let malformed = headers(&[("authorization", "Basic one"), ("x-api-token", " two ")]);
        assert_eq!(presented_token(&malformed), Some("two"));
    }

    #[test]
    fn token_mode_checks_presented_token() {
        let settings = token_mode(false);
        let remote = peer([10, 0, 0, 7]);

        assert_eq!(
            check_access(&settings, &headers(&[("x-api-token", "secret")]), remote),
            Access::Granted
        );
        assert_eq!(
            check_access(&settings, &headers(&[("x-api-token", "wrong")]), remote),
            Access::Denied("token_mismatch")
        );
        assert_eq!(
            check_access(&settings, &HeaderMap::new(), remote),
            Access::Denied("missing_token")
        );
    }

    #[test]
    fn loopback_bypass_and_unset_token() {
        assert_eq!(
            check_access(&token_mode(true), &HeaderMap::new(), peer([127, 0, 0, 1])),
            Access::Granted
        );
        assert_eq!(
            check_access(&token_mode(false), &HeaderMap::new(), peer([127, 0, 0, 1])),
            Access::Denied("missing_token")
        );
        assert_eq!(
            check_access(&token_mode(true), &HeaderMap::new(), None),
            Access::Denied("missing_token")
        );

        let mut unset = token_mode(false);
        unset.token = None;
        assert_eq!(
            check_access(&unset, &HeaderMap::new(), None),
            Access::Unguarded
        );
        assert_eq!(
            check_access(&AccessControlConfig::default(), &HeaderMap::new(), None),
            Access::Granted
        );
    }
}

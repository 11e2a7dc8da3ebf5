pub mod health;
pub mod jwks;
pub mod nonce;
pub mod session;

use crate::error::{AuthenticationError, ErrorKind};
use axum::{
    extract::ConnectInfo,
    http::{
        Extensions, HeaderMap, HeaderValue, StatusCode,
        header::{LOCATION, USER_AGENT, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Address of the calling client.
///
/// The peer socket address, unless the peer is one of `trusted_proxies`; only
/// then are `X-Forwarded-For` / `X-Real-IP` consulted. Empty when the peer is
/// unknown.
pub(crate) fn client_address(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())
    else {
        return String::new();
    };

    if trusted_proxies.contains(&peer)
        && let Some(forwarded) = extract_client_ip(headers, trusted_proxies)
    {
        return forwarded;
    }
    peer.to_string()
}

/// Client address reported by a trusted proxy.
///
/// `X-Forwarded-For` is read right to left, skipping hops that are themselves
/// trusted proxies, so entries prepended by the client are ignored.
pub(crate) fn extract_client_ip(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .rsplit(',')
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .find(|hop| {
                    hop.parse::<IpAddr>()
                        .map_or(true, |ip| !trusted_proxies.contains(&ip.to_canonical()))
                })
        });
    if let Some(forwarded) = forwarded {
        return Some(forwarded.to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `401` with a `WWW-Authenticate` challenge, or `302` when the challenge
/// carries a redirect location.
pub(crate) fn challenge_response(challenge: &AuthenticationError) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(location) = challenge
        .location()
        .and_then(|location| HeaderValue::from_str(location).ok())
    {
        headers.insert(LOCATION, location);
        return (StatusCode::FOUND, headers).into_response();
    }

    match HeaderValue::from_str(&challenge.challenge()) {
        Ok(value) => {
            headers.insert(WWW_AUTHENTICATE, value);
        }
        Err(err) => {
            debug!("Failed to render WWW-Authenticate header: {err}");
            headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
    }
    (StatusCode::UNAUTHORIZED, headers).into_response()
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Configuration => StatusCode::BAD_REQUEST,
        ErrorKind::IllegalState => StatusCode::SERVICE_UNAVAILABLE,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: [u8; 4] = [10, 0, 0, 7];

    fn from_peer(ip: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((ip, 4711))));
        extensions
    }

    fn forwarded_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8, 10.0.0.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        headers
    }

    #[test]
    fn extract_client_ip_skips_trusted_hops() {
        let trusted = [IpAddr::from(PROXY), IpAddr::from([10, 0, 0, 8])];
        assert_eq!(
            extract_client_ip(&forwarded_headers(), &trusted),
            Some("5.6.7.8".to_string())
        );
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers, &[]), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn untrusted_peer_cannot_forward() {
        let headers = forwarded_headers();
        assert_eq!(client_address(&headers, &from_peer(PROXY), &[]), "10.0.0.7");
        assert_eq!(
            client_address(&headers, &from_peer([192, 0, 2, 1]), &[IpAddr::from(PROXY)]),
            "192.0.2.1"
        );
    }

    #[test]
    fn trusted_proxy_forwards_client() {
        let trusted = [IpAddr::from(PROXY)];
        assert_eq!(
            client_address(&forwarded_headers(), &from_peer(PROXY), &trusted),
            "10.0.0.8"
        );
        assert_eq!(client_address(&HeaderMap::new(), &from_peer(PROXY), &trusted), "10.0.0.7");
    }

    #[test]
    fn unknown_peer_has_no_address() {
        assert_eq!(client_address(&forwarded_headers(), &Extensions::new(), &[]), "");
    }

    #[test]
    fn challenge_renders_www_authenticate() {
        let challenge = AuthenticationError::bearer(Some("https://sso.example.test"))
            .with_error("invalid_token");
        let response = challenge_response(&challenge);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok()),
            Some(r#"Bearer realm="https://sso.example.test", error="invalid_token""#)
        );
    }

    #[test]
    fn challenge_with_location_redirects() {
        let challenge = AuthenticationError::bearer(None).with_location("https://login.example.test");
        let response = challenge_response(&challenge);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(response.headers().contains_key(LOCATION));
    }
}

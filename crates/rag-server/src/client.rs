//! Client identity used as the rate-limit key.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

/// Best-effort client address: `CF-Connecting-IP`, then the first
/// `X-Forwarded-For` hop, then the socket peer, else `unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let key = header("cf-connecting-ip")
            .or_else(|| header("x-forwarded-for"))
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Self(key)
    }

    pub fn rate_key(&self) -> String {
        format!("ip:{}", self.0)
    }
}

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_headers(&parts.headers, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.2, 10.0.0.3"));
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        assert_eq!(ClientKey::from_headers(&headers, Some(peer)).0, "10.0.0.2");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.7"));
        assert_eq!(ClientKey::from_headers(&headers, Some(peer)).0, "203.0.113.7");
    }

    #[test]
    fn test_falls_back_to_peer_then_unknown() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.168.1.5:1234".parse().unwrap();

        assert_eq!(ClientKey::from_headers(&headers, Some(peer)).0, "192.168.1.5");
        assert_eq!(ClientKey::from_headers(&headers, None).rate_key(), "ip:unknown");
    }
}

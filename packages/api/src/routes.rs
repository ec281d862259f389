use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Multipart},
    http::{HeaderMap, request::Parts},
};
use serde::Deserialize;

use crate::{error::ApiError, state::AppState};

pub mod analytics;
pub mod auth;
pub mod debug;
pub mod health;
pub mod info;
pub mod predict;

#[derive(Clone, Deserialize, Debug)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

/// One file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Next file part named `field`, skipping other fields and parts without a filename.
async fn next_image(
    multipart: &mut Multipart,
    field: &str,
) -> Result<Option<UploadedImage>, ApiError> {
    while let Some(part) = multipart.next_field().await? {
        if part.name() != Some(field) {
            continue;
        }
        let filename = match part.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => continue,
        };
        let content_type = part.content_type().map(str::to_string);
        let bytes = part.bytes().await?;
        return Ok(Some(UploadedImage {
            filename,
            content_type,
            bytes,
        }));
    }
    Ok(None)
}

/// The first file part named `field`; 400 when there is none.
pub async fn single_image(multipart: &mut Multipart, field: &str) -> Result<UploadedImage, ApiError> {
    next_image(multipart, field)
        .await?
        .ok_or_else(|| ApiError::bad_request("No image provided"))
}

/// Every file part named `field`. Fails once more than `max` files arrive.
pub async fn collect_images(
    multipart: &mut Multipart,
    field: &str,
    max: usize,
) -> Result<Vec<UploadedImage>, ApiError> {
    let mut images = Vec::new();
    while let Some(image) = next_image(multipart, field).await? {
        if images.len() == max {
            return Err(ApiError::bad_request(format!(
                "At most {} images can be uploaded at once",
                max
            )));
        }
        images.push(image);
    }
    Ok(images)
}

/// Address of the caller. The first `x-forwarded-for` hop is used only when
/// `trust_forwarded_for` is configured, otherwise the socket peer.
#[derive(Debug, Clone, Default)]
pub struct ClientAddr(pub Option<String>);

impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientAddr(client_addr(
            &parts.headers,
            peer,
            state.config.trust_forwarded_for,
        )))
    }
}

fn client_addr(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_forwarded_for: bool,
) -> Option<String> {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    trust_forwarded_for
        .then(forwarded)
        .flatten()
        .or_else(|| peer.map(|ip| ip.to_string()))
}

/// `limit` clamped to `1..=max`, `default` when absent.
pub fn clamp_limit(limit: Option<i64>, default: usize, max: usize) -> usize {
    match limit {
        Some(n) => n.clamp(1, max as i64) as usize,
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 10, 100), 10);
        assert_eq!(clamp_limit(Some(0), 10, 100), 1);
        assert_eq!(clamp_limit(Some(-4), 10, 100), 1);
        assert_eq!(clamp_limit(Some(25), 10, 100), 25);
        assert_eq!(clamp_limit(Some(5000), 10, 100), 100);
    }

    #[test]
    fn forwarded_for_needs_explicit_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.2".parse().unwrap());
        let peer = Some(IpAddr::from([10, 0, 0, 2]));

        assert_eq!(client_addr(&headers, peer, false).as_deref(), Some("10.0.0.2"));
        assert_eq!(client_addr(&headers, peer, true).as_deref(), Some("203.0.113.7"));
        assert_eq!(client_addr(&HeaderMap::new(), peer, true).as_deref(), Some("10.0.0.2"));
        assert_eq!(client_addr(&headers, None, false), None);
    }
}

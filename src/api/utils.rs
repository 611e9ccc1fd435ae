//! Stateless helpers for HTTP request processing

use axum::{body::Body, http::HeaderMap};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::api::error::ApiError;

pub const PRINCIPAL_HEADER: &str = "X-Sweepbox-Principal";

/// Authenticated principal, as forwarded by the gateway in front of the API
pub fn principal(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or(ApiError::MissingPrincipal)
}

/// Parses and validates Content-Type header for application/json
///
/// Accepts:
/// - `application/json`
/// - `application/json; charset=utf-8`
///
/// Rejects:
/// - `application/jsonp`
/// - `application/json-patch+json`
/// - `text/json`
/// - Malformed media types
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Reads the request body, failing as soon as it grows past `max_size`.
///
/// The body arrives already decompressed, so the limit applies to the
/// expanded bytes rather than to what went over the wire.
pub async fn read_limited(body: Body, max_size: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, max_size).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge(max_size))
        }
        Err(err) => Err(ApiError::InvalidPayload(err.to_string())),
    }
}

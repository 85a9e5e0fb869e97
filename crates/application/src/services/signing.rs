//! Outbound body signing
//!
//! Targets that configure a signing secret receive an `X-Signature` header
//! carrying the hex HMAC-SHA256 of the request body, plus the signature
//! timestamp and message id, so they can verify authenticity and detect
//! replays.

use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

use domain::entities::Integration;
use domain::value_objects::TraceId;

use crate::error::ApplicationError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Signature";
/// Header carrying the unix timestamp the signature was produced at
pub const SIGNATURE_TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";
/// Header carrying the delivery's trace id
pub const MESSAGE_ID_HEADER: &str = "X-Message-Id";

/// Compute the hex HMAC-SHA256 signature of a body
#[must_use]
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    #[allow(clippy::expect_used)]
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Signature headers for one outbound delivery
///
/// A signing-enabled integration without a secret is a configuration error
/// (business-logic failure, never retried).
pub fn signature_headers(
    integration: &Integration,
    body: &str,
    trace_id: TraceId,
    timestamp: i64,
) -> Result<Vec<(String, String)>, ApplicationError> {
    let mut headers = vec![(MESSAGE_ID_HEADER.to_string(), trace_id.to_string())];

    if integration.signing.enabled {
        let secret = integration.signing.secret.as_ref().ok_or_else(|| {
            ApplicationError::Configuration(format!(
                "integration {} has signing enabled but no secret",
                integration.id
            ))
        })?;
        headers.push((
            SIGNATURE_HEADER.to_string(),
            sign_body(secret.expose_secret(), body.as_bytes()),
        ));
        headers.push((SIGNATURE_TIMESTAMP_HEADER.to_string(), timestamp.to_string()));
    }

    Ok(headers)
}

//! Webhook request authentication with HMAC-SHA256 signatures.
//!
//! A webhook trigger that names a `secret_name` only accepts requests whose
//! `X-Signature` header carries the hex HMAC-SHA256 of the raw body, keyed
//! with that secret. Both `sha256=<hex>` and plain `<hex>` are accepted.
//! Triggers without a secret accept unsigned requests.

use capflow_core::engine::SecretResolver;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing {SIGNATURE_HEADER} header")]
    MissingSignature,

    #[error("HMAC signature verification failed")]
    InvalidSignature,

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),

    #[error("webhook secret '{0}' is not available")]
    SecretUnavailable(String),
}

// ---------------------------------------------------------------------------
// HMAC-SHA256
// ---------------------------------------------------------------------------

/// Verify a hex HMAC-SHA256 signature over `body` in constant time.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], signature_hex: &str) -> Result<(), WebhookError> {
    let expected = hex_decode(signature_hex).ok_or(WebhookError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| WebhookError::InvalidSignature)
}

/// Like [`verify_hmac_sha256`], accepting an optional `sha256=` prefix.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> Result<(), WebhookError> {
    let hex_sig = signature.trim().strip_prefix("sha256=").unwrap_or(signature.trim());
    verify_hmac_sha256(secret, body, hex_sig)
}

/// Hex HMAC-SHA256 of `body`, in the form senders put in `X-Signature`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Authenticate an inbound webhook request.
///
/// `secret_name` comes from the matched trigger; when it is `None` the
/// request is accepted as-is.
pub async fn authenticate(
    secrets: &dyn SecretResolver,
    secret_name: Option<&str>,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), WebhookError> {
    let Some(secret_name) = secret_name else {
        return Ok(());
    };
    let signature = signature.ok_or(WebhookError::MissingSignature)?;
    let secret = secrets.resolve(secret_name).await.map_err(|e| {
        tracing::warn!(secret = secret_name, error = %e, "webhook secret lookup failed");
        WebhookError::SecretUnavailable(secret_name.to_string())
    })?;
    verify_signature(secret.as_bytes(), body, signature)
}

// ---------------------------------------------------------------------------
// Hex helpers
// ---------------------------------------------------------------------------

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

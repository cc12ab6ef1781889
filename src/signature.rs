//! HMAC-SHA1 webhook signature verification.
//!
//! Motive signs every webhook delivery with `hex(HMAC-SHA1(secret, body))`
//! and sends the result in the `X-KT-Webhook-Signature` header. The check
//! runs against the raw body bytes, before anything is parsed.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// SHA-1 digest length in bytes
const SIGNATURE_LEN: usize = 20;

/// Header carrying the hex-encoded signature of the request body
pub const SIGNATURE_HEADER: &str = "X-KT-Webhook-Signature";

/// Compute the signature header value for `body` under `secret`
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a header-supplied signature against the raw request body.
///
/// The header must be exactly the lowercase hex digest `sign` would produce:
/// no surrounding whitespace, no uppercase digits. Returns `false` for a
/// missing or empty signature, an empty secret, any other encoding, or a
/// digest mismatch. The digest comparison is constant time
/// (`Mac::verify_slice`), so timing does not reveal where the first
/// differing byte sits.
pub fn verify(body: &[u8], secret: &str, signature: Option<&str>) -> bool {
    let Some(signature) = signature.filter(|s| !s.is_empty()) else {
        return false;
    };
    if secret.is_empty() || !is_canonical_hex(signature) {
        return false;
    }

    let Ok(provided) = hex::decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

// Shape check only; says nothing about the expected digest
fn is_canonical_hex(signature: &str) -> bool {
    signature.len() == 2 * SIGNATURE_LEN
        && signature
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

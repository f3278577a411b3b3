use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign a raw payload body with HMAC-SHA256, hex-encoded.
///
/// Used for the `X-Signature` header on outbound destination webhooks and
/// for verifying inbound aggregator webhooks.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature using constant-time comparison.
///
/// Returns false on any malformed input (wrong length, non-hex signature);
/// the caller decides how to reject the request.
pub fn verify_payload(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = sign_payload(secret, body);

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(signature_bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let secret = "whsec_destination_secret";
        let body = br#"{"event":"statement.delivered","statement_id":"abc"}"#;

        let signature = sign_payload(secret, body);
        assert!(!signature.is_empty());
        assert!(verify_payload(secret, body, &signature));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = "whsec_destination_secret";
        let body = br#"{"event":"statement.delivered"}"#;

        let signature = sign_payload(secret, body);
        let tampered = br#"{"event":"statement.deleted"}"#;
        assert!(!verify_payload(secret, tampered, &signature));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = br#"{"event":"statement.delivered"}"#;
        let signature = sign_payload("secret_a", body);
        assert!(!verify_payload("secret_b", body, &signature));
    }

    #[test]
    fn verify_rejects_malformed_signature() {
        let body = b"payload";
        assert!(!verify_payload("secret", body, ""));
        assert!(!verify_payload("secret", body, "not-hex"));
        // Flip one character of a valid signature.
        let signature = sign_payload("secret", body);
        let flipped = if signature.starts_with('a') {
            format!("b{}", &signature[1..])
        } else {
            format!("a{}", &signature[1..])
        };
        assert!(!verify_payload("secret", body, &flipped));
    }
}

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a `X-Hub-Signature-256: sha256=<hex>` header against the raw
/// request body using the channel's webhook secret. The comparison runs in
/// constant time so a timing side channel can't be used to recover the
/// signature byte by byte.
pub fn verify_signature(secret: &str, header_value: &str, body: &[u8]) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if provided.len() != expected.len() {
        return false;
    }
    expected.as_slice().ct_eq(&provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"entry":[]}"#;
        let header = sign("my-secret", body);
        assert!(verify_signature("my-secret", &header, body));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"entry":[]}"#;
        let header = sign("my-secret", body);
        assert!(!verify_signature("wrong-secret", &header, body));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"entry":[]}"#;
        let header = sign("my-secret", body);
        assert!(!verify_signature("my-secret", &header, b"{\"entry\":[1]}"));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_signature("my-secret", "not-a-signature", b"{}"));
    }
}

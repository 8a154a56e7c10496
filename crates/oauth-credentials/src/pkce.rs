//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays with the flow and is sent with the code exchange; the
//! S256 challenge goes into the authorization URL.

use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::helpers::urlsafe_b64encode;

/// Random code verifier: 64 bytes as unpadded base64url (86 characters,
/// inside RFC 7636's 43-128 range).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    urlsafe_b64encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    urlsafe_b64encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::urlsafe_b64decode;

    fn is_url_safe(value: &str) -> bool {
        value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn verifier_length_is_within_rfc_range() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(is_url_safe(&verifier), "{verifier}");
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(generate_verifier(), generate_verifier());
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn challenge_is_a_sha256_digest() {
        let challenge = compute_challenge(&generate_verifier());
        assert_eq!(challenge.len(), 43);
        assert!(is_url_safe(&challenge));
        assert_eq!(urlsafe_b64decode(&challenge).unwrap().len(), 32);
    }
}

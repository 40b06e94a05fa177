//
// Proof Key for Code Exchange (RFC 7636)
//
use crate::config::{PKCE_METHOD_PLAIN, PKCE_METHOD_S256};
use crate::crypto;
use crate::error::Result;
use crate::util::b64url_encode;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Fresh verifier (32 random bytes, base64url) and its challenge under the
/// given method. Unknown methods are a configuration error.
pub fn generate_pkce(method: &str) -> Result<PkcePair> {
    let code_verifier = b64url_encode(crypto::get_random_bytes(32));
    let code_challenge = challenge_for(&code_verifier, method)?;
    Ok(PkcePair {
        code_verifier,
        code_challenge,
    })
}

pub fn challenge_for(code_verifier: &str, method: &str) -> Result<String> {
    match method {
        PKCE_METHOD_S256 => Ok(b64url_encode(crypto::sha256(code_verifier.as_bytes()))),
        PKCE_METHOD_PLAIN => Ok(code_verifier.to_string()),
        other => err!(InvalidConfig, format!("Unknown PKCE challenge method: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn s256_challenge_is_the_hashed_verifier() {
        let pair = generate_pkce("S256").unwrap();
        // 32 bytes base64url without padding
        assert_eq!(pair.code_verifier.len(), 43);
        assert_eq!(pair.code_challenge, b64url_encode(crypto::sha256(pair.code_verifier.as_bytes())));
        assert_ne!(pair.code_challenge, pair.code_verifier);
    }

    #[test]
    fn plain_challenge_equals_the_verifier() {
        let pair = generate_pkce("plain").unwrap();
        assert_eq!(pair.code_challenge, pair.code_verifier);
    }

    #[test]
    fn unknown_method_is_invalid_config() {
        let err = generate_pkce("S512").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        let err = generate_pkce("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn verifiers_do_not_repeat() {
        let a = generate_pkce("S256").unwrap();
        let b = generate_pkce("S256").unwrap();
        assert_ne!(a.code_verifier, b.code_verifier);
    }
}

//
// OIDC claim checks for decoded ID tokens
//
use serde_json::Value;

use crate::error::Result;
use crate::jwt::JwtPayload;
use crate::util::now_secs;

const DEFAULT_MAX_FUTURE_SECS: i64 = 300;

/// Enforces the OIDC Core rules on a decoded payload. Checks run in a fixed
/// order and fail on the first violation.
pub struct ClaimsValidator {
    expected_issuer: String,
    expected_audience: String,
    /// Tolerated clock skew for `iat`, in seconds.
    max_future_secs: i64,
}

impl ClaimsValidator {
    pub fn new(expected_issuer: &str, expected_audience: &str) -> Self {
        Self {
            expected_issuer: expected_issuer.to_string(),
            expected_audience: expected_audience.to_string(),
            max_future_secs: DEFAULT_MAX_FUTURE_SECS,
        }
    }

    pub fn with_max_future_secs(mut self, secs: i64) -> Self {
        self.max_future_secs = secs;
        self
    }

    pub fn validate(&self, payload: &JwtPayload, nonce: Option<&str>) -> Result<()> {
        self.validate_at(payload, nonce, now_secs())
    }

    fn validate_at(&self, payload: &JwtPayload, nonce: Option<&str>, now: i64) -> Result<()> {
        // 1. Issuer, byte for byte
        match &payload.iss {
            Some(iss) if *iss == self.expected_issuer => {}
            _ => err!(IdTokenValidationError, "Invalid issuer in ID token"),
        }

        // 2. Our client id must be among the audiences
        let audiences = audience_list(payload.aud.as_ref());
        if !audiences.iter().any(|aud| *aud == self.expected_audience) {
            err!(IdTokenValidationError, "Invalid audience in ID token");
        }

        // 3. Multiple audiences require azp to name us
        if audiences.len() > 1 {
            if let Some(azp) = &payload.azp {
                if *azp != self.expected_audience {
                    err!(IdTokenValidationError, "Invalid azp in ID token");
                }
            }
        }

        // 4. Temporal claims
        match payload.exp {
            Some(exp) if exp > now => {}
            Some(_) => err!(IdTokenValidationError, "ID token is expired"),
            None => err!(IdTokenValidationError, "ID token has no exp claim"),
        }
        match payload.iat {
            Some(iat) if iat <= now + self.max_future_secs => {}
            Some(_) => err!(IdTokenValidationError, "ID token iat is too far in the future"),
            None => err!(IdTokenValidationError, "ID token has no iat claim"),
        }
        if let Some(nbf) = payload.nbf {
            if nbf > now {
                err!(IdTokenValidationError, "ID token is not yet valid");
            }
        }

        // 5. Nonce binding, only when the caller still has one
        if let Some(expected_nonce) = nonce {
            match &payload.nonce {
                Some(actual) if actual == expected_nonce => {}
                _ => err!(IdTokenValidationError, "Nonce mismatch in ID token"),
            }
        }

        Ok(())
    }
}

/// `aud` may be a single string or an array of strings; treat both alike.
fn audience_list(aud: Option<&Value>) -> Vec<String> {
    match aud {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(values)) => {
            values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        _ => Vec::new(),
    }
}

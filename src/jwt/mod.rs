//
// ID token decoding and validation
//
pub mod claims;
pub mod verify;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::ClientConfig,
    discovery::Discovery,
    error::Result,
    jwks::JwksStore,
    util,
};

pub use claims::ClaimsValidator;
pub use verify::SignatureVerifier;

const INVALID_JWT_FORMAT: &str = "Invalid JWT format";

/// JOSE header of a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// Decoded claim set. The registered OIDC claims are typed; everything else
/// lands in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwtPayload {
    #[serde(default)]
    pub iss: Option<String>,
    /// Scalar string or array of strings.
    #[serde(default)]
    pub aud: Option<Value>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl JwtPayload {
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// Whether a token is even shaped like a JWS (three dot-separated segments).
pub fn looks_like_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

fn parse_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T> {
    let bytes =
        util::b64url_decode(segment).map_err(|_| invalid_format())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid_format())?;
    serde_json::from_str(&text).map_err(|_| invalid_format())
}

fn invalid_format() -> crate::error::Error {
    crate::error::Error::new(crate::error::ErrorKind::IdTokenValidationError, INVALID_JWT_FORMAT)
}

/// Decode header and payload without touching the signature.
pub fn decode_jwt(token: &str) -> Result<(JwtHeader, JwtPayload)> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(invalid_format());
    }
    let header = parse_segment::<JwtHeader>(segments[0])?;
    let payload = parse_segment::<JwtPayload>(segments[1])?;
    Ok((header, payload))
}

/// Full ID token check: decode, claim semantics, then signature. Errors from
/// the claim and signature layers surface unchanged.
pub struct JwtValidator {
    config: Arc<ClientConfig>,
    discovery: Arc<Discovery>,
    verifier: SignatureVerifier,
}

impl JwtValidator {
    pub fn new(config: Arc<ClientConfig>, discovery: Arc<Discovery>, jwks: Arc<JwksStore>) -> Self {
        Self {
            config,
            discovery,
            verifier: SignatureVerifier::new(jwks),
        }
    }

    pub async fn validate_id_token(&self, token: &str, nonce: Option<&str>) -> Result<JwtPayload> {
        let (header, payload) = decode_jwt(token)?;

        let metadata = self.discovery.discover(false).await?;
        ClaimsValidator::new(&metadata.issuer, &self.config.client_id).validate(&payload, nonce)?;

        self.verifier.verify(&header, token).await?;
        Ok(payload)
    }
}

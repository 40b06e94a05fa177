//
// JWS signature verification against the provider's JWKS
//
use std::sync::Arc;

use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};

use crate::{
    error::{Error, ErrorKind, MapResult, Result},
    jwks::{Jwk, JwksStore},
    jwt::JwtHeader,
    util,
};

const BAD_SIGNATURE: &str = "Invalid ID token signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlgFamily {
    Rsa,
    RsaPss,
    Ec,
    Hmac,
}

/// Parsed `alg` header value: family plus hash width in bits.
#[derive(Debug, Clone, Copy)]
struct Alg {
    family: AlgFamily,
    bits: u16,
}

impl Alg {
    fn parse(alg: &str) -> Result<Self> {
        let (family, bits) = match alg {
            "RS256" => (AlgFamily::Rsa, 256),
            "RS384" => (AlgFamily::Rsa, 384),
            "RS512" => (AlgFamily::Rsa, 512),
            "PS256" => (AlgFamily::RsaPss, 256),
            "PS384" => (AlgFamily::RsaPss, 384),
            "PS512" => (AlgFamily::RsaPss, 512),
            "ES256" => (AlgFamily::Ec, 256),
            "ES384" => (AlgFamily::Ec, 384),
            "ES512" => (AlgFamily::Ec, 512),
            "HS256" => (AlgFamily::Hmac, 256),
            "HS384" => (AlgFamily::Hmac, 384),
            "HS512" => (AlgFamily::Hmac, 512),
            other => {
                return Err(Error::new(
                    ErrorKind::IdTokenValidationError,
                    format!("Unsupported signing algorithm {other}"),
                ))
            }
        };
        Ok(Self {
            family,
            bits,
        })
    }

    fn digest(&self) -> MessageDigest {
        match self.bits {
            384 => MessageDigest::sha384(),
            512 => MessageDigest::sha512(),
            _ => MessageDigest::sha256(),
        }
    }

    fn hmac_algorithm(&self) -> ring::hmac::Algorithm {
        match self.bits {
            384 => ring::hmac::HMAC_SHA384,
            512 => ring::hmac::HMAC_SHA512,
            _ => ring::hmac::HMAC_SHA256,
        }
    }

    /// PSS salt length in bytes, matching the digest width.
    fn pss_salt_len(&self) -> i32 {
        i32::from(self.bits / 8)
    }

    /// The curve each ES variant is pinned to.
    fn expected_curve(&self) -> &'static str {
        match self.bits {
            384 => "P-384",
            512 => "P-521",
            _ => "P-256",
        }
    }
}

pub struct SignatureVerifier {
    jwks: Arc<JwksStore>,
}

impl SignatureVerifier {
    pub fn new(jwks: Arc<JwksStore>) -> Self {
        Self {
            jwks,
        }
    }

    /// Verify the JWS over `id_token` using the key named by `header.kid`.
    pub async fn verify(&self, header: &JwtHeader, id_token: &str) -> Result<()> {
        let segments: Vec<&str> = id_token.split('.').collect();
        if segments.len() != 3 {
            err!(InvalidFormat, "ID token does not have three segments");
        }

        let kid = match header.kid.as_deref() {
            Some(kid) => kid,
            None => err!(KeyNotFound, "ID token header has no kid"),
        };
        let jwk = self.jwks.get_key(kid).await?;

        verify_with_key(header, id_token, &jwk)
    }
}

/// Signature check against a concrete key; the async wrapper above only adds
/// kid resolution.
pub(crate) fn verify_with_key(header: &JwtHeader, id_token: &str, jwk: &Jwk) -> Result<()> {
    let segments: Vec<&str> = id_token.split('.').collect();
    if segments.len() != 3 {
        err!(InvalidFormat, "ID token does not have three segments");
    }

    let alg = Alg::parse(&header.alg)?;
    check_compatibility(&alg, &header.alg, jwk)?;

    let signing_input = format!("{}.{}", segments[0], segments[1]);
    let signature = util::b64url_decode(segments[2])?;

    let valid = match alg.family {
        AlgFamily::Rsa | AlgFamily::RsaPss => verify_rsa(&alg, jwk, signing_input.as_bytes(), &signature)?,
        AlgFamily::Ec => verify_ec(&alg, jwk, signing_input.as_bytes(), &signature)?,
        AlgFamily::Hmac => verify_hmac(&alg, jwk, signing_input.as_bytes(), &signature)?,
    };

    if !valid {
        err!(IdTokenValidationError, BAD_SIGNATURE);
    }
    Ok(())
}

fn check_compatibility(alg: &Alg, alg_name: &str, jwk: &Jwk) -> Result<()> {
    let expected_kty = match alg.family {
        AlgFamily::Rsa | AlgFamily::RsaPss => "RSA",
        AlgFamily::Ec => "EC",
        AlgFamily::Hmac => "oct",
    };
    if jwk.kty != expected_kty {
        err!(
            IdTokenValidationError,
            format!("Algorithm {alg_name} requires a {expected_kty} key, found {}", jwk.kty)
        );
    }

    if alg.family == AlgFamily::Ec {
        let expected = alg.expected_curve();
        if jwk.crv.as_deref() != Some(expected) {
            err!(
                IdTokenValidationError,
                format!("Algorithm {alg_name} requires curve {expected}, found {:?}", jwk.crv.as_deref())
            );
        }
    }

    if let Some(jwk_alg) = &jwk.alg {
        if jwk_alg != alg_name {
            err!(
                IdTokenValidationError,
                format!("JWK is bound to algorithm {jwk_alg}, token uses {alg_name}")
            );
        }
    }
    Ok(())
}

fn verify_rsa(alg: &Alg, jwk: &Jwk, signing_input: &[u8], signature: &[u8]) -> Result<bool> {
    let pem = jwk.to_pem()?;
    let key = PKey::public_key_from_pem(pem.as_bytes())
        .map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;

    let mut verifier =
        Verifier::new(alg.digest(), &key).map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;
    if alg.family == AlgFamily::RsaPss {
        verifier
            .set_rsa_padding(Padding::PKCS1_PSS)
            .and_then(|()| verifier.set_rsa_pss_saltlen(RsaPssSaltlen::custom(alg.pss_salt_len())))
            .map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;
    }
    verifier.update(signing_input).map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;

    // A malformed signature is reported as a failed check, not an error
    Ok(verifier.verify(signature).unwrap_or(false))
}

fn verify_ec(alg: &Alg, jwk: &Jwk, signing_input: &[u8], signature: &[u8]) -> Result<bool> {
    // JOSE serializes ECDSA signatures as fixed-width r || s; OpenSSL wants DER
    if signature.is_empty() || signature.len() % 2 != 0 {
        return Ok(false);
    }
    let (r, s) = signature.split_at(signature.len() / 2);
    let der = match (BigNum::from_slice(r), BigNum::from_slice(s)) {
        (Ok(r), Ok(s)) => match EcdsaSig::from_private_components(r, s).and_then(|sig| sig.to_der()) {
            Ok(der) => der,
            Err(_) => return Ok(false),
        },
        _ => return Ok(false),
    };

    let pem = jwk.to_pem()?;
    let key = PKey::public_key_from_pem(pem.as_bytes())
        .map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;

    let mut verifier =
        Verifier::new(alg.digest(), &key).map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;
    verifier.update(signing_input).map_kind(ErrorKind::IdTokenValidationError, BAD_SIGNATURE)?;
    Ok(verifier.verify(&der).unwrap_or(false))
}

fn verify_hmac(alg: &Alg, jwk: &Jwk, signing_input: &[u8], signature: &[u8]) -> Result<bool> {
    let secret = jwk.secret_bytes()?;
    let key = ring::hmac::Key::new(alg.hmac_algorithm(), &secret);
    Ok(ring::hmac::verify(&key, signing_input, signature).is_ok())
}

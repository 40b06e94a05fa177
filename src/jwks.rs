//
// JWKS retrieval, kid lookup and JWK to PEM conversion
//
use std::sync::Arc;
use std::time::Duration;

use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use serde::Deserialize;

use crate::{
    cache::Cache,
    discovery::Discovery,
    error::{Error, ErrorKind, MapResult, Result},
    http_client::{HttpTransport, Method},
    lock::Mutex,
    util,
};

const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Single JSON Web Key. Only the members the verifier needs are modeled;
/// unknown members are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,

    // RSA
    pub n: Option<String>,
    pub e: Option<String>,

    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,

    // Symmetric
    pub k: Option<String>,
}

fn member(field: &str, value: Option<&str>) -> Result<Vec<u8>> {
    match value {
        Some(value) => util::b64url_decode(value),
        None => Err(Error::new(ErrorKind::InvalidFormat, format!("JWK is missing the {field} member"))),
    }
}

impl Jwk {
    /// PEM encoding of the public key, as the signature backends consume it.
    /// Symmetric keys have no public PEM form.
    pub fn to_pem(&self) -> Result<String> {
        let pem = match self.kty.as_str() {
            "RSA" => {
                let n = BigNum::from_slice(&member("n", self.n.as_deref())?)
                    .map_kind(ErrorKind::InvalidFormat, "Invalid RSA modulus")?;
                let e = BigNum::from_slice(&member("e", self.e.as_deref())?)
                    .map_kind(ErrorKind::InvalidFormat, "Invalid RSA exponent")?;
                let rsa = Rsa::from_public_components(n, e)
                    .map_kind(ErrorKind::InvalidFormat, "Invalid RSA public key")?;
                let key =
                    PKey::from_rsa(rsa).map_kind(ErrorKind::InvalidFormat, "Invalid RSA public key")?;
                key.public_key_to_pem().map_kind(ErrorKind::InvalidFormat, "Failed to encode RSA key as PEM")?
            }
            "EC" => {
                let group = self.ec_group()?;
                let x = BigNum::from_slice(&member("x", self.x.as_deref())?)
                    .map_kind(ErrorKind::InvalidFormat, "Invalid EC x coordinate")?;
                let y = BigNum::from_slice(&member("y", self.y.as_deref())?)
                    .map_kind(ErrorKind::InvalidFormat, "Invalid EC y coordinate")?;
                let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y)
                    .map_kind(ErrorKind::InvalidFormat, "Invalid EC public key")?;
                let key = PKey::from_ec_key(ec).map_kind(ErrorKind::InvalidFormat, "Invalid EC public key")?;
                key.public_key_to_pem().map_kind(ErrorKind::InvalidFormat, "Failed to encode EC key as PEM")?
            }
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidConfig,
                    format!("Key type {other} has no PEM representation"),
                ))
            }
        };

        String::from_utf8(pem).map_kind(ErrorKind::InvalidFormat, "PEM output is not UTF-8")
    }

    pub(crate) fn ec_group(&self) -> Result<EcGroup> {
        let nid = match self.crv.as_deref() {
            Some("P-256") => Nid::X9_62_PRIME256V1,
            Some("P-384") => Nid::SECP384R1,
            Some("P-521") => Nid::SECP521R1,
            Some(other) => {
                return Err(Error::new(ErrorKind::InvalidFormat, format!("Unsupported EC curve {other}")))
            }
            None => return Err(Error::new(ErrorKind::InvalidFormat, "JWK is missing the crv member")),
        };
        EcGroup::from_curve_name(nid).map_kind(ErrorKind::InvalidFormat, "Failed to build EC group")
    }

    /// Raw symmetric key bytes for `oct` keys.
    pub(crate) fn secret_bytes(&self) -> Result<Vec<u8>> {
        member("k", self.k.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Caches the provider's signing keys by `kid`. The key set is fetched
/// lazily and at most once per miss wave (single-flight, like discovery).
pub struct JwksStore {
    discovery: Arc<Discovery>,
    transport: Arc<dyn HttpTransport>,
    cache: Cache<String, Arc<Jwk>>,
    fetch_lock: Mutex,
}

impl JwksStore {
    pub fn new(discovery: Arc<Discovery>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            discovery,
            transport,
            cache: Cache::new(),
            fetch_lock: Mutex::new(),
        }
    }

    /// Look up a verification key. A miss triggers one JWKS refresh; a miss
    /// after a successful refresh is `KeyNotFound`.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<Jwk>> {
        if let Some(key) = self.cache.get(&kid.to_string()) {
            return Ok(key);
        }

        let guard = self.fetch_lock.acquire().await?;
        if let Some(key) = self.cache.get(&kid.to_string()) {
            guard.release();
            return Ok(key);
        }

        let result = self.refresh().await;
        guard.release();
        result?;

        match self.cache.get(&kid.to_string()) {
            Some(key) => Ok(key),
            None => Err(Error::new(ErrorKind::KeyNotFound, format!("No key with kid {kid} in the JWKS"))),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let metadata = self.discovery.discover(false).await?;

        debug!("Fetching JWKS from {}", metadata.jwks_uri);
        let response = self
            .transport
            .request(Method::Get, &metadata.jwks_uri, &[], None)
            .await
            .map_err(|e| Error::with_source(ErrorKind::DiscoveryError, "Failed to fetch JWKS", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::DiscoveryError,
                format!("JWKS endpoint returned HTTP {}", response.status),
            )
            .set_status(response.status));
        }

        let key_set: JwkSet = serde_json::from_str(&response.body)
            .map_err(|e| Error::with_source(ErrorKind::DiscoveryError, "Failed to parse JWKS", e))?;

        for key in key_set.keys {
            match &key.kid {
                Some(kid) => {
                    self.cache.set_with_ttl(kid.clone(), Arc::new(key), Some(JWKS_CACHE_TTL));
                }
                None => warn!("Skipping JWKS entry without a kid"),
            }
        }
        Ok(())
    }
}

//
// Token lifecycle: exchange, refresh, introspection, revocation, claims
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::{ClientConfig, GrantType},
    discovery::Discovery,
    error::{Error, ErrorKind, Result},
    http_client::{bearer_headers, form_headers, HttpResponse, HttpTransport, Method},
    jwt::{looks_like_jwt, JwtValidator},
    lock::Mutex,
    util,
};

/// Token endpoint response, as on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
}

/// Tokens as the library holds them, with the absolute expiry computed the
/// moment they were stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    /// Epoch milliseconds; `None` when the IdP sent no `expires_in`.
    pub expires_at: Option<i64>,
}

pub struct Token {
    config: Arc<ClientConfig>,
    discovery: Arc<Discovery>,
    transport: Arc<dyn HttpTransport>,
    validator: Arc<JwtValidator>,
    tokens: StdMutex<Option<TokenSet>>,
    refresh_lock: Mutex,
    // Bumped on every successful refresh so waiters can tell a refresh
    // happened while they were queued
    refresh_serial: AtomicU64,
}

impl Token {
    pub fn new(
        config: Arc<ClientConfig>,
        discovery: Arc<Discovery>,
        transport: Arc<dyn HttpTransport>,
        validator: Arc<JwtValidator>,
    ) -> Self {
        Self {
            config,
            discovery,
            transport,
            validator,
            tokens: StdMutex::new(None),
            refresh_lock: Mutex::new(),
            refresh_serial: AtomicU64::new(0),
        }
    }

    //
    // Stored token set
    //

    /// Store a token response, stamping `expires_at = now + expires_in`.
    pub fn set_tokens(&self, response: &TokenResponse) -> Result<TokenSet> {
        let access_token = match &response.access_token {
            Some(token) => token.clone(),
            None => err!(NoAccessToken, "Token response contained no access_token"),
        };

        let previous_refresh =
            self.tokens.lock().expect("token set poisoned").as_ref().and_then(|t| t.refresh_token.clone());

        let token_set = TokenSet {
            access_token,
            // A rotated refresh token replaces the old one; otherwise keep it
            refresh_token: response.refresh_token.clone().or(previous_refresh),
            id_token: response.id_token.clone(),
            token_type: response.token_type.clone(),
            expires_in: response.expires_in,
            expires_at: response.expires_in.map(|secs| util::now_millis() + secs * 1000),
        };

        *self.tokens.lock().expect("token set poisoned") = Some(token_set.clone());
        Ok(token_set)
    }

    pub fn get_tokens(&self) -> Option<TokenSet> {
        self.tokens.lock().expect("token set poisoned").clone()
    }

    /// Adopt a previously persisted token set as-is, keeping its original
    /// absolute expiry. Used when resuming a stored session.
    pub fn restore_tokens(&self, set: TokenSet) {
        *self.tokens.lock().expect("token set poisoned") = Some(set);
    }

    pub fn clear_tokens(&self) {
        *self.tokens.lock().expect("token set poisoned") = None;
    }

    /// A token with no recorded expiry never goes stale; otherwise it is
    /// valid while `now < expires_at - refresh_threshold`.
    pub fn is_token_valid(&self) -> bool {
        match &*self.tokens.lock().expect("token set poisoned") {
            None => false,
            Some(set) => match set.expires_at {
                None => true,
                Some(expires_at) => {
                    util::now_millis() < expires_at - (self.config.token_refresh_threshold as i64) * 1000
                }
            },
        }
    }

    /// Current access token, refreshing first when it is inside the expiry
    /// guard band. Returns `None` when there is nothing to return and no
    /// refresh token to fall back on.
    pub async fn access_token(&self) -> Result<Option<String>> {
        if self.is_token_valid() {
            return Ok(self.get_tokens().map(|t| t.access_token));
        }

        let has_refresh_token = self.get_tokens().is_some_and(|t| t.refresh_token.is_some());
        if !has_refresh_token {
            return Ok(None);
        }

        let guard = self.refresh_lock.acquire().await?;
        // Another caller may have refreshed while we queued
        let result = if self.is_token_valid() {
            Ok(self.get_tokens().map(|t| t.access_token))
        } else {
            self.refresh_locked().await.map(|set| Some(set.access_token))
        };
        guard.release();
        result
    }

    //
    // Refresh
    //

    /// Refresh the access token now. Concurrent callers share a single
    /// round trip to the IdP.
    pub async fn refresh_access_token(&self) -> Result<TokenSet> {
        let serial_before = self.refresh_serial.load(Ordering::SeqCst);
        let guard = self.refresh_lock.acquire().await?;

        let result = if self.refresh_serial.load(Ordering::SeqCst) != serial_before {
            // Someone refreshed while we were queued; their result is ours
            match self.get_tokens() {
                Some(set) => Ok(set),
                None => self.refresh_locked().await,
            }
        } else {
            self.refresh_locked().await
        };

        guard.release();
        result
    }

    async fn refresh_locked(&self) -> Result<TokenSet> {
        let refresh_token = match self.get_tokens().and_then(|t| t.refresh_token) {
            Some(token) => token,
            None => err!(NoRefreshToken, "No refresh token available"),
        };

        let metadata = self.discovery.discover(false).await?;

        let mut body = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            body.push(("client_secret".to_string(), secret.clone()));
        }

        debug!("Refreshing access token");
        let response = self
            .post_form(&metadata.token_endpoint, &body)
            .await
            .map_err(|e| Error::with_source(ErrorKind::TokenRefreshError, "Token refresh request failed", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::TokenRefreshError,
                format!("Token refresh failed with HTTP {}: {}", response.status, response.body),
            )
            .set_status(response.status));
        }

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| Error::with_source(ErrorKind::TokenRefreshError, "Token refresh response was not valid JSON", e))?;

        let set = self.set_tokens(&parsed)?;
        self.refresh_serial.fetch_add(1, Ordering::SeqCst);
        Ok(set)
    }

    //
    // Code exchange
    //

    /// Exchange a grant credential for tokens. `credential` is the
    /// authorization code, device code, refresh token or assertion,
    /// depending on the configured grant.
    pub async fn exchange_code_for_token(
        &self,
        credential: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let body = self.exchange_body(credential, code_verifier)?;
        let metadata = self.discovery.discover(false).await?;

        let response = self
            .post_form(&metadata.token_endpoint, &body)
            .await
            .map_err(|e| Error::with_source(ErrorKind::TokenExchangeError, "Token exchange request failed", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::TokenExchangeError,
                format!("Token exchange failed with HTTP {}: {}", response.status, response.body),
            )
            .set_status(response.status));
        }

        let parsed: TokenResponse = response.json().map_err(|e| {
            Error::with_source(ErrorKind::TokenExchangeError, "Token response was not valid JSON", e)
        })?;

        self.set_tokens(&parsed)
    }

    fn exchange_body(&self, credential: &str, code_verifier: Option<&str>) -> Result<Vec<(String, String)>> {
        let grant_type = self.config.grant_type;
        let mut body = vec![
            ("grant_type".to_string(), grant_type.as_str().to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            body.push(("client_secret".to_string(), secret.clone()));
        }

        match grant_type {
            GrantType::AuthorizationCode => {
                body.push(("code".to_string(), credential.to_string()));
                if let Some(verifier) = code_verifier {
                    body.push(("code_verifier".to_string(), verifier.to_string()));
                }
            }
            GrantType::RefreshToken => {
                body.push(("refresh_token".to_string(), credential.to_string()));
            }
            GrantType::DeviceCode => {
                body.push(("device_code".to_string(), credential.to_string()));
            }
            GrantType::JwtBearer => {
                body.push(("assertion".to_string(), credential.to_string()));
                body.push(("scope".to_string(), self.config.scope_string()));
            }
            GrantType::Saml2Bearer => {
                body.push(("assertion".to_string(), credential.to_string()));
            }
            GrantType::Password => {
                match (&self.config.username, &self.config.password) {
                    (Some(username), Some(password)) => {
                        body.push(("username".to_string(), username.clone()));
                        body.push(("password".to_string(), password.clone()));
                    }
                    _ => err!(InvalidRequest, "Password grant requires username and password"),
                }
            }
            GrantType::ClientCredentials | GrantType::Custom => {}
            GrantType::Implicit => {
                err!(UnsupportedGrantType, "Implicit grant has no token endpoint exchange");
            }
        }

        Ok(body)
    }

    //
    // Introspection and revocation
    //

    pub async fn introspect_token(&self, token: &str) -> Result<Value> {
        let metadata = self.discovery.discover(false).await?;
        let endpoint = match &metadata.introspection_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => err!(IntrospectionUnsupported, "Provider exposes no introspection endpoint"),
        };

        let mut body = vec![
            ("token".to_string(), token.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            body.push(("client_secret".to_string(), secret.clone()));
        }

        let response = self
            .post_form(&endpoint, &body)
            .await
            .map_err(|e| Error::with_source(ErrorKind::IntrospectionError, "Introspection request failed", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::IntrospectionError,
                format!("Introspection failed with HTTP {}", response.status),
            )
            .set_status(response.status));
        }

        response
            .json()
            .map_err(|e| Error::with_source(ErrorKind::IntrospectionError, "Introspection response was not valid JSON", e))
    }

    /// Revoke a token at the IdP. When the revoked value is the stored
    /// access or refresh token, the stored set is dropped too.
    pub async fn revoke_token(&self, token: &str, token_type_hint: Option<&str>) -> Result<()> {
        let metadata = self.discovery.discover(false).await?;
        let endpoint = match &metadata.revocation_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => err!(RevocationUnsupported, "Provider exposes no revocation endpoint"),
        };

        let mut body = vec![
            ("token".to_string(), token.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];
        if let Some(hint) = token_type_hint {
            body.push(("token_type_hint".to_string(), hint.to_string()));
        }
        if let Some(secret) = &self.config.client_secret {
            body.push(("client_secret".to_string(), secret.clone()));
        }

        let response = self
            .post_form(&endpoint, &body)
            .await
            .map_err(|e| Error::with_source(ErrorKind::RevocationError, "Revocation request failed", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::RevocationError,
                format!("Revocation failed with HTTP {}", response.status),
            )
            .set_status(response.status));
        }

        let revoked_stored = self.get_tokens().is_some_and(|set| {
            set.access_token == token || set.refresh_token.as_deref() == Some(token)
        });
        if revoked_stored {
            self.clear_tokens();
        }
        Ok(())
    }

    //
    // Claims and userinfo
    //

    /// Claims of the current access token: validated JWT payload when the
    /// token is a JWS, the userinfo document otherwise.
    pub async fn get_claims(&self) -> Result<Value> {
        let access_token = match self.get_tokens() {
            Some(set) => set.access_token,
            None => err!(NoAccessToken, "No access token stored"),
        };

        if looks_like_jwt(&access_token) {
            let payload = self.validator.validate_id_token(&access_token, None).await?;
            return serde_json::to_value(payload).map_err(Error::from);
        }

        self.user_info(&access_token).await
    }

    /// GET the userinfo endpoint with a bearer token.
    pub async fn user_info(&self, access_token: &str) -> Result<Value> {
        let metadata = self.discovery.discover(false).await?;
        let endpoint = match &metadata.userinfo_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => err!(UserInfoUnavailable, "Provider exposes no userinfo endpoint"),
        };

        let response =
            self.transport.request(Method::Get, &endpoint, &bearer_headers(access_token), None).await?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::HttpError,
                format!("Userinfo request failed with HTTP {}", response.status),
            )
            .set_status(response.status));
        }

        response.json()
    }

    async fn post_form(&self, url: &str, body: &[(String, String)]) -> Result<HttpResponse> {
        self.transport.request(Method::Post, url, &form_headers(), Some(util::build_urlencoded(body))).await
    }
}

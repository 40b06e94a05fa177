//
// Authorization flow orchestration: front-channel URLs, redirect handling,
// the device grant and logout
//
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Deserialize;

use crate::{
    config::{ClientConfig, GrantType, PKCE_METHOD_PLAIN, PKCE_METHOD_S256},
    crypto,
    discovery::Discovery,
    error::{Error, ErrorKind, Result},
    http_client::{form_headers, HttpTransport, Method},
    jwt::JwtValidator,
    pkce,
    state::StateStore,
    token::{Token, TokenResponse, TokenSet},
    util,
};

const DEFAULT_DEVICE_POLL_INTERVAL: u64 = 5;

#[derive(Debug, Clone)]
pub struct AuthorizationUrl {
    pub url: String,
    pub state: String,
}

/// Response of the device authorization endpoint (RFC 8628 §3.2).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: i64,
    #[serde(default = "default_device_interval")]
    pub interval: u64,
}

fn default_device_interval() -> u64 {
    DEFAULT_DEVICE_POLL_INTERVAL
}

pub struct Auth {
    config: Arc<ClientConfig>,
    discovery: Arc<Discovery>,
    transport: Arc<dyn HttpTransport>,
    token: Arc<Token>,
    validator: Arc<JwtValidator>,
    state_store: Arc<StateStore>,
    // Verifier of the authorization request in flight, consumed on redirect
    code_verifier: StdMutex<Option<String>>,
}

impl Auth {
    pub fn new(
        config: Arc<ClientConfig>,
        discovery: Arc<Discovery>,
        transport: Arc<dyn HttpTransport>,
        token: Arc<Token>,
        validator: Arc<JwtValidator>,
        state_store: Arc<StateStore>,
    ) -> Self {
        Self {
            config,
            discovery,
            transport,
            token,
            validator,
            state_store,
            code_verifier: StdMutex::new(None),
        }
    }

    //
    // Authorization URL
    //

    pub async fn authorization_url(&self) -> Result<AuthorizationUrl> {
        self.authorization_url_with(&[]).await
    }

    /// Build the front-channel authorization URL, registering a fresh
    /// `state`/`nonce` pair. `extra` parameters are appended verbatim.
    pub async fn authorization_url_with(&self, extra: &[(String, String)]) -> Result<AuthorizationUrl> {
        if !matches!(
            self.config.grant_type,
            GrantType::AuthorizationCode | GrantType::Implicit | GrantType::DeviceCode
        ) {
            err!(
                InvalidGrantType,
                format!("Grant type {} cannot start an authorization redirect", self.config.grant_type.as_str())
            );
        }

        let metadata = self.discovery.discover(false).await?;

        let state = crypto::random_url_safe(24);
        let nonce = crypto::random_url_safe(24);
        self.state_store.add_state(&state, &nonce).await?;

        let mut params: Vec<(String, String)> = vec![
            (
                "response_type".to_string(),
                self.config.response_type.clone().unwrap_or_else(|| "code".to_string()),
            ),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("scope".to_string(), self.config.scope_string()),
            ("state".to_string(), state.clone()),
        ];

        if self.config.pkce && self.config.grant_type == GrantType::AuthorizationCode {
            let method = self.config.pkce_method.as_str();
            let (pair, include_method) = match method {
                PKCE_METHOD_S256 | PKCE_METHOD_PLAIN => (pkce::generate_pkce(method)?, true),
                other => {
                    warn!("Unknown PKCE challenge method {other}; sending an S256 challenge without code_challenge_method");
                    (pkce::generate_pkce(PKCE_METHOD_S256)?, false)
                }
            };
            params.push(("code_challenge".to_string(), pair.code_challenge.clone()));
            if include_method {
                params.push(("code_challenge_method".to_string(), method.to_string()));
            }
            *self.code_verifier.lock().expect("verifier slot poisoned") = Some(pair.code_verifier);
        }

        if let Some(acr_values) = &self.config.acr_values {
            params.push(("acr_values".to_string(), util::space_join(acr_values)));
        }
        params.push(("nonce".to_string(), nonce));
        if let Some(ui_locales) = &self.config.ui_locales {
            params.push(("ui_locales".to_string(), util::space_join(ui_locales)));
        }
        if let Some(response_mode) = &self.config.response_mode {
            params.push(("response_mode".to_string(), response_mode.clone()));
        }
        params.extend(self.config.authorize_extra_params.iter().cloned());
        params.extend(extra.iter().cloned());

        let url = append_query(&metadata.authorization_endpoint, &util::build_urlencoded(&params));
        Ok(AuthorizationUrl {
            url,
            state,
        })
    }

    //
    // Redirect handling
    //

    /// Handle the authorization-code redirect: consume the state, exchange
    /// the code and validate the ID token against the stored nonce.
    pub async fn handle_redirect(&self, code: &str, returned_state: &str) -> Result<TokenSet> {
        let nonce = self.state_store.take_nonce(returned_state).await?;
        let code_verifier = self.code_verifier.lock().expect("verifier slot poisoned").take();

        let token_set = self.token.exchange_code_for_token(code, code_verifier.as_deref()).await?;

        match &token_set.id_token {
            Some(id_token) => {
                self.validator.validate_id_token(id_token, Some(&nonce)).await?;
            }
            None => warn!("No ID token returned to validate"),
        }

        Ok(token_set)
    }

    /// Handle the fragment of an implicit-flow redirect
    /// (`#access_token=…&state=…`).
    pub async fn handle_redirect_implicit(&self, fragment: &str) -> Result<TokenSet> {
        let params = util::parse_fragment(fragment);

        if let Some(error) = params.get("error") {
            let description = params.get("error_description").map(String::as_str).unwrap_or("");
            return Err(Error::new(
                ErrorKind::TokenRequestError,
                format!("{}: {description}", error.to_uppercase()),
            ));
        }

        let access_token = match params.get("access_token") {
            Some(token) => token.clone(),
            None => err!(InvalidRequest, "Redirect fragment has no access_token"),
        };
        let state = match params.get("state") {
            Some(state) => state.clone(),
            None => err!(InvalidRequest, "Redirect fragment has no state"),
        };

        let nonce = self.state_store.take_nonce(&state).await?;

        if let Some(id_token) = params.get("id_token") {
            self.validator.validate_id_token(id_token, Some(&nonce)).await?;
        }

        let response = TokenResponse {
            access_token: Some(access_token),
            refresh_token: params.get("refresh_token").cloned(),
            id_token: params.get("id_token").cloned(),
            token_type: params.get("token_type").cloned(),
            expires_in: params.get("expires_in").and_then(|v| v.parse().ok()),
        };
        self.token.set_tokens(&response)
    }

    //
    // Device authorization grant
    //

    pub async fn start_device_authorization(&self) -> Result<DeviceAuthorization> {
        let metadata = self.discovery.discover(false).await?;
        let endpoint = match &metadata.device_authorization_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => err!(EndpointMissing, "Provider exposes no device authorization endpoint"),
        };

        let mut body = vec![
            ("client_id".to_string(), self.config.client_id.clone()),
            ("scope".to_string(), self.config.scope_string()),
        ];
        if let Some(secret) = &self.config.client_secret {
            body.push(("client_secret".to_string(), secret.clone()));
        }

        let response = self
            .transport
            .request(Method::Post, &endpoint, &form_headers(), Some(util::build_urlencoded(&body)))
            .await
            .map_err(|e| Error::with_source(ErrorKind::DeviceAuthError, "Device authorization request failed", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::DeviceAuthError,
                format!("Device authorization failed with HTTP {}: {}", response.status, response.body),
            )
            .set_status(response.status));
        }

        response
            .json()
            .map_err(|e| Error::with_source(ErrorKind::DeviceAuthError, "Device authorization response was not valid JSON", e))
    }

    /// Poll the token endpoint until the user approves, the device code
    /// expires, or `timeout` elapses. The sleep interval starts at
    /// `interval_secs` and grows by 5s on every `slow_down`.
    pub async fn poll_device_token(
        &self,
        device_code: &str,
        interval_secs: u64,
        timeout: Duration,
    ) -> Result<TokenSet> {
        let metadata = self.discovery.discover(false).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut interval = if interval_secs == 0 {
            DEFAULT_DEVICE_POLL_INTERVAL
        } else {
            interval_secs
        };

        let body = util::build_urlencoded(&[
            ("grant_type".to_string(), "device_code".to_string()),
            ("device_code".to_string(), device_code.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ]);

        loop {
            if tokio::time::Instant::now() >= deadline {
                err!(Timeout, "Device authorization timed out");
            }

            let response = self
                .transport
                .request(Method::Post, &metadata.token_endpoint, &form_headers(), Some(body.clone()))
                .await
                .map_err(|e| Error::with_source(ErrorKind::TokenPollingError, "Device token poll failed", e))?;

            if response.is_success() {
                let parsed: TokenResponse = response.json().map_err(|e| {
                    Error::with_source(ErrorKind::TokenPollingError, "Device token response was not valid JSON", e)
                })?;
                return self.token.set_tokens(&parsed);
            }

            let error_code = serde_json::from_str::<serde_json::Value>(&response.body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));

            match error_code.as_deref() {
                Some("authorization_pending") => {
                    debug!("Device authorization pending; sleeping {interval}s");
                }
                Some("slow_down") => {
                    interval += 5;
                    debug!("Device poll told to slow down; interval is now {interval}s");
                }
                Some("expired_token") => {
                    err!(DeviceCodeExpired, "Device code expired before the user approved");
                }
                _ => {
                    return Err(Error::new(
                        ErrorKind::TokenPollingError,
                        format!("Device token poll failed with HTTP {}: {}", response.status, response.body),
                    )
                    .set_status(response.status));
                }
            }

            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    //
    // Logout
    //

    /// RP-initiated logout URL built from the end-session endpoint.
    pub async fn logout_url(&self, id_token_hint: Option<&str>, state: Option<&str>) -> Result<String> {
        let metadata = self.discovery.discover(false).await?;
        let endpoint = match &metadata.end_session_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => err!(EndSessionEndpointMissing, "Provider exposes no end session endpoint"),
        };

        let mut params = vec![("client_id".to_string(), self.config.client_id.clone())];
        if let Some(uri) = &self.config.post_logout_redirect_uri {
            params.push(("post_logout_redirect_uri".to_string(), uri.clone()));
        }
        if let Some(hint) = id_token_hint {
            params.push(("id_token_hint".to_string(), hint.to_string()));
        }
        if let Some(state) = state {
            params.push(("state".to_string(), state.to_string()));
        }

        Ok(append_query(&endpoint, &util::build_urlencoded(&params)))
    }

    #[cfg(test)]
    pub(crate) fn pending_code_verifier(&self) -> Option<String> {
        self.code_verifier.lock().expect("verifier slot poisoned").clone()
    }
}

fn append_query(endpoint: &str, query: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}{query}")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::tests::metadata_json;
    use crate::jwks::tests::{as_dyn_transport, RoutingTransport};
    use crate::jwks::JwksStore;
    use crate::token::tests::{body_map, TOKEN_ENDPOINT};
    use std::collections::HashMap;

    const DEVICE_ENDPOINT: &str = "https://idp.example/device";

    pub(crate) struct AuthFixture {
        pub transport: Arc<RoutingTransport>,
        pub auth: Auth,
        pub token: Arc<Token>,
        pub state_store: Arc<StateStore>,
    }

    pub(crate) fn auth_fixture(mutate: impl FnOnce(&mut ClientConfig)) -> AuthFixture {
        let transport = Arc::new(RoutingTransport::new());
        transport.route("https://idp.example/disco", 200, &metadata_json());

        let mut config = ClientConfig::new("client-1", "https://app.example/cb", "https://idp.example/disco");
        config.scopes = vec!["openid".to_string(), "profile".to_string()];
        mutate(&mut config);
        let config = Arc::new(config);

        let discovery = Arc::new(Discovery::new(
            Arc::clone(&config),
            as_dyn_transport(&transport),
        ));
        let jwks = Arc::new(JwksStore::new(
            Arc::clone(&discovery),
            as_dyn_transport(&transport),
        ));
        let validator = Arc::new(JwtValidator::new(
            Arc::clone(&config),
            Arc::clone(&discovery),
            jwks,
        ));
        let token = Arc::new(Token::new(
            Arc::clone(&config),
            Arc::clone(&discovery),
            as_dyn_transport(&transport),
            Arc::clone(&validator),
        ));
        let state_store = Arc::new(StateStore::new());
        let auth = Auth::new(
            config,
            discovery,
            as_dyn_transport(&transport),
            Arc::clone(&token),
            validator,
            Arc::clone(&state_store),
        );

        AuthFixture {
            transport,
            auth,
            token,
            state_store,
        }
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        let (_, query) = url.split_once('?').unwrap();
        util::parse_urlencoded(query).into_iter().collect()
    }

    #[tokio::test]
    async fn authorization_url_carries_the_request_parameters() {
        let fixture = auth_fixture(|c| {
            c.pkce = true;
            c.acr_values = Some(vec!["urn:mfa".to_string(), "urn:pwd".to_string()]);
            c.ui_locales = Some(vec!["nl-NL".to_string(), "en".to_string()]);
        });

        let authorization = fixture.auth.authorization_url().await.unwrap();
        assert!(authorization.url.starts_with("https://idp.example/authorize?"));
        // Scope is %20-joined, never '+'
        assert!(authorization.url.contains("scope=openid%20profile"));

        let query = query_of(&authorization.url);
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["redirect_uri"], "https://app.example/cb");
        assert_eq!(query["state"], authorization.state);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["acr_values"], "urn:mfa urn:pwd");
        assert_eq!(query["ui_locales"], "nl-NL en");
        assert!(query.contains_key("nonce"));

        // The challenge matches the retained verifier
        let verifier = fixture.auth.pending_code_verifier().unwrap();
        assert_eq!(query["code_challenge"], util::b64url_encode(crypto::sha256(verifier.as_bytes())));

        // And the state is redeemable exactly once
        fixture.state_store.take_nonce(&authorization.state).await.unwrap();
    }

    #[tokio::test]
    async fn authorization_url_rejects_back_channel_grants() {
        let fixture = auth_fixture(|c| c.grant_type = GrantType::ClientCredentials);
        let err = fixture.auth.authorization_url().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrantType);
    }

    #[tokio::test]
    async fn unknown_pkce_method_warns_and_omits_the_method_parameter() {
        let fixture = auth_fixture(|c| {
            c.pkce = true;
            c.pkce_method = "S999".to_string();
        });
        let authorization = fixture.auth.authorization_url().await.unwrap();
        let query = query_of(&authorization.url);
        assert!(query.contains_key("code_challenge"));
        assert!(!query.contains_key("code_challenge_method"));
    }

    #[tokio::test]
    async fn extra_parameters_are_appended() {
        let fixture = auth_fixture(|c| {
            c.authorize_extra_params = vec![("prompt".to_string(), "consent".to_string())];
        });
        let authorization = fixture
            .auth
            .authorization_url_with(&[("login_hint".to_string(), "u@example.com".to_string())])
            .await
            .unwrap();
        let query = query_of(&authorization.url);
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["login_hint"], "u@example.com");
    }

    #[tokio::test]
    async fn redirect_with_wrong_state_never_reaches_the_token_endpoint() {
        let fixture = auth_fixture(|_| {});
        fixture.state_store.add_state("right-state", "n1").await.unwrap();

        let err = fixture.auth.handle_redirect("code", "wrong-state").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateMismatch);
        assert_eq!(fixture.transport.hits_for(TOKEN_ENDPOINT), 0);
    }

    #[tokio::test]
    async fn redirect_exchanges_the_code_and_clears_the_verifier() {
        let fixture = auth_fixture(|c| c.pkce = true);
        fixture.transport.route(TOKEN_ENDPOINT, 200, r#"{"access_token":"a","expires_in":3600}"#);

        let authorization = fixture.auth.authorization_url().await.unwrap();
        let verifier = fixture.auth.pending_code_verifier().unwrap();

        let set = fixture.auth.handle_redirect("auth-code", &authorization.state).await.unwrap();
        assert_eq!(set.access_token, "a");
        assert_eq!(fixture.auth.pending_code_verifier(), None);

        let body = body_map(fixture.transport.last_request_to(TOKEN_ENDPOINT).unwrap().body.as_deref().unwrap());
        assert_eq!(body["code"], "auth-code");
        assert_eq!(body["code_verifier"], verifier);
    }

    #[tokio::test]
    async fn implicit_fragment_with_error_fails_with_the_uppercased_code() {
        let fixture = auth_fixture(|_| {});
        let err = fixture
            .auth
            .handle_redirect_implicit("#error=access_denied&error_description=user%20said%20no")
            .await
            .unwrap_err();
        assert!(err.message().starts_with("ACCESS_DENIED"));
        assert!(err.message().contains("user said no"));
    }

    #[tokio::test]
    async fn implicit_fragment_requires_access_token_and_state() {
        let fixture = auth_fixture(|_| {});
        let err = fixture.auth.handle_redirect_implicit("#state=s1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = fixture.auth.handle_redirect_implicit("#access_token=a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn implicit_fragment_stores_tokens_and_consumes_state() {
        let fixture = auth_fixture(|_| {});
        fixture.state_store.add_state("s1", "n1").await.unwrap();

        let set = fixture
            .auth
            .handle_redirect_implicit("#access_token=frag-token&state=s1&expires_in=3600&token_type=Bearer")
            .await
            .unwrap();
        assert_eq!(set.access_token, "frag-token");
        assert_eq!(set.expires_in, Some(3600));
        assert!(set.expires_at.is_some());

        // State is gone now
        assert!(fixture.state_store.is_empty());
        assert_eq!(fixture.token.get_tokens().unwrap().access_token, "frag-token");
    }

    #[tokio::test]
    async fn device_authorization_parses_the_grant_response() {
        let fixture = auth_fixture(|c| c.grant_type = GrantType::DeviceCode);
        fixture.transport.route(
            DEVICE_ENDPOINT,
            200,
            r#"{"device_code":"dc","user_code":"ABCD-EFGH","verification_uri":"https://idp.example/activate","expires_in":600}"#,
        );

        let device = fixture.auth.start_device_authorization().await.unwrap();
        assert_eq!(device.device_code, "dc");
        assert_eq!(device.user_code, "ABCD-EFGH");
        assert_eq!(device.interval, 5);

        let body = body_map(fixture.transport.last_request_to(DEVICE_ENDPOINT).unwrap().body.as_deref().unwrap());
        assert_eq!(body["client_id"], "client-1");
        assert_eq!(body["scope"], "openid profile");
    }

    #[tokio::test]
    async fn device_authorization_without_endpoint_is_endpoint_missing() {
        let fixture = auth_fixture(|_| {});
        let mut metadata: serde_json::Value = serde_json::from_str(&metadata_json()).unwrap();
        metadata.as_object_mut().unwrap().remove("device_authorization_endpoint");
        fixture.transport.route("https://idp.example/disco", 200, &metadata.to_string());

        let err = fixture.auth.start_device_authorization().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndpointMissing);
    }

    #[tokio::test(start_paused = true)]
    async fn device_poll_slow_down_grows_the_interval() {
        let fixture = auth_fixture(|c| c.grant_type = GrantType::DeviceCode);
        fixture.transport.script(
            TOKEN_ENDPOINT,
            &[
                (400, r#"{"error":"slow_down"}"#),
                (200, r#"{"access_token":"a","expires_in":3600}"#),
            ],
        );

        let started = tokio::time::Instant::now();
        let set =
            fixture.auth.poll_device_token("dc", 5, Duration::from_secs(120)).await.unwrap();
        assert_eq!(set.access_token, "a");
        assert_eq!(fixture.token.get_tokens().unwrap().access_token, "a");

        // One slow_down: the second attempt happens after a 10s sleep
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "slept only {elapsed:?}");
        assert!(elapsed < Duration::from_secs(15));
        assert_eq!(fixture.transport.hits_for(TOKEN_ENDPOINT), 2);

        let body = body_map(fixture.transport.last_request_to(TOKEN_ENDPOINT).unwrap().body.as_deref().unwrap());
        assert_eq!(body["grant_type"], "device_code");
        assert_eq!(body["device_code"], "dc");
        assert_eq!(body["client_id"], "client-1");
    }

    #[tokio::test(start_paused = true)]
    async fn device_poll_waits_through_pending_and_times_out() {
        let fixture = auth_fixture(|c| c.grant_type = GrantType::DeviceCode);
        fixture.transport.route(TOKEN_ENDPOINT, 400, r#"{"error":"authorization_pending"}"#);

        let err = fixture.auth.poll_device_token("dc", 5, Duration::from_secs(12)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        // Polls at t=0, 5, 10; the deadline lands before the t=15 attempt
        assert_eq!(fixture.transport.hits_for(TOKEN_ENDPOINT), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn device_poll_stops_on_expired_token() {
        let fixture = auth_fixture(|c| c.grant_type = GrantType::DeviceCode);
        fixture.transport.route(TOKEN_ENDPOINT, 400, r#"{"error":"expired_token"}"#);

        let err = fixture.auth.poll_device_token("dc", 5, Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceCodeExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn device_poll_rejects_unknown_errors() {
        let fixture = auth_fixture(|c| c.grant_type = GrantType::DeviceCode);
        fixture.transport.route(TOKEN_ENDPOINT, 400, "not json at all");

        let err = fixture.auth.poll_device_token("dc", 5, Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenPollingError);
    }

    #[tokio::test]
    async fn logout_url_includes_the_configured_parameters() {
        let fixture = auth_fixture(|c| {
            c.post_logout_redirect_uri = Some("https://app.example/bye".to_string());
        });
        let url = fixture.auth.logout_url(Some("idt"), Some("s1")).await.unwrap();
        assert!(url.starts_with("https://idp.example/logout?"));
        let query = query_of(&url);
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["post_logout_redirect_uri"], "https://app.example/bye");
        assert_eq!(query["id_token_hint"], "idt");
        assert_eq!(query["state"], "s1");
    }

    #[tokio::test]
    async fn logout_url_requires_the_end_session_endpoint() {
        let fixture = auth_fixture(|_| {});
        let mut metadata: serde_json::Value = serde_json::from_str(&metadata_json()).unwrap();
        metadata.as_object_mut().unwrap().remove("end_session_endpoint");
        fixture.transport.route("https://idp.example/disco", 200, &metadata.to_string());

        let err = fixture.auth.logout_url(None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndSessionEndpointMissing);
    }
}

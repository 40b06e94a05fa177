//
// Client facade and the application-owned client registry
//
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::{
    auth::Auth,
    config::ClientConfig,
    discovery::Discovery,
    error::{Error, ErrorKind, Result},
    http_client::{HttpTransport, ReqwestTransport},
    jwks::JwksStore,
    jwt::JwtValidator,
    session::Session,
    state::StateStore,
    store::{MemorySessionStore, SessionStore},
    token::Token,
};

/// One relying-party client: discovery, key handling, validation, token
/// lifecycle, flow orchestration and session management wired together.
pub struct Client {
    config: Arc<ClientConfig>,
    discovery: Arc<Discovery>,
    jwks: Arc<JwksStore>,
    validator: Arc<JwtValidator>,
    token: Arc<Token>,
    auth: Arc<Auth>,
    session: Arc<Session>,
    #[cfg_attr(not(test), allow(dead_code))]
    state_store: Arc<StateStore>,
}

impl Client {
    /// Build a client with the default reqwest transport and the in-memory
    /// session store.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let session_ttl = Duration::from_secs(config.session.ttl);
        Self::with_collaborators(
            config,
            ReqwestTransport::shared(),
            Arc::new(MemorySessionStore::new(session_ttl)),
        )
    }

    /// Build a client around caller-supplied collaborators. This is the seam
    /// tests and exotic deployments use.
    pub fn with_collaborators(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let discovery = Arc::new(Discovery::new(Arc::clone(&config), Arc::clone(&transport)));
        let jwks = Arc::new(JwksStore::new(Arc::clone(&discovery), Arc::clone(&transport)));
        let validator = Arc::new(JwtValidator::new(
            Arc::clone(&config),
            Arc::clone(&discovery),
            Arc::clone(&jwks),
        ));
        let token = Arc::new(Token::new(
            Arc::clone(&config),
            Arc::clone(&discovery),
            Arc::clone(&transport),
            Arc::clone(&validator),
        ));
        let state_store = Arc::new(StateStore::new());
        let auth = Arc::new(Auth::new(
            Arc::clone(&config),
            Arc::clone(&discovery),
            Arc::clone(&transport),
            Arc::clone(&token),
            Arc::clone(&validator),
            Arc::clone(&state_store),
        ));
        let session = Arc::new(Session::new(Arc::clone(&config), Arc::clone(&token), store));

        Ok(Self {
            config,
            discovery,
            jwks,
            validator,
            token,
            auth,
            session,
            state_store,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn jwks(&self) -> &Arc<JwksStore> {
        &self.jwks
    }

    pub fn validator(&self) -> &Arc<JwtValidator> {
        &self.validator
    }

    pub fn token(&self) -> &Arc<Token> {
        &self.token
    }

    pub fn auth(&self) -> &Arc<Auth> {
        &self.auth
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn state_store(&self) -> &Arc<StateStore> {
        &self.state_store
    }
}

/// Named clients, owned by the application instead of process globals. A
/// host serving several IdPs (or several tenants of one) keeps one entry per
/// configuration.
#[derive(Default)]
pub struct ClientRegistry {
    clients: StdMutex<HashMap<String, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under `name`. Names are unique; re-registering is
    /// an error rather than a silent replacement.
    pub fn register(&self, name: &str, client: Client) -> Result<Arc<Client>> {
        let mut clients = self.clients.lock().expect("registry poisoned");
        if clients.contains_key(name) {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                format!("A client named {name} is already registered"),
            ));
        }
        let client = Arc::new(client);
        clients.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Client>> {
        self.clients.lock().expect("registry poisoned").get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Client>> {
        self.clients.lock().expect("registry poisoned").remove(name)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests::metadata_json;
    use crate::jwks::tests::RoutingTransport;
    use crate::jwt::tests::jwks_json;
    use crate::jwt::verify::tests::{rsa_signing_key, sign_rs256};
    use crate::util;

    fn base_config() -> ClientConfig {
        let mut config = ClientConfig::new("client-1", "https://app.example/cb", "https://idp.example/disco");
        config.scopes = vec!["openid".to_string(), "profile".to_string()];
        config.session.use_silent_renew = false;
        config
    }

    fn transport_with_idp() -> Arc<RoutingTransport> {
        let transport = Arc::new(RoutingTransport::new());
        transport.route("https://idp.example/disco", 200, &metadata_json());
        transport
    }

    fn as_dyn_transport(transport: &Arc<RoutingTransport>) -> Arc<dyn HttpTransport> {
        let transport = Arc::clone(transport);
        transport
    }

    fn client_over(transport: &Arc<RoutingTransport>, config: ClientConfig) -> Client {
        Client::with_collaborators(
            config,
            as_dyn_transport(transport),
            Arc::new(MemorySessionStore::new(Duration::from_secs(3600))),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let transport = transport_with_idp();
        let config = ClientConfig::new("client-1", "https://app.example/cb", "");
        let err = Client::with_collaborators(
            config,
            as_dyn_transport(&transport),
            Arc::new(MemorySessionStore::new(Duration::from_secs(60))),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDiscoveryUrl);
    }

    #[tokio::test]
    async fn full_authorization_code_flow_with_pkce() {
        let transport = transport_with_idp();
        let signer = rsa_signing_key("k1", Some("RS256"));
        transport.route("https://idp.example/jwks", 200, &jwks_json(&signer.jwk));

        let mut config = base_config();
        config.pkce = true;
        config.pkce_method = "S256".to_string();
        let client = client_over(&transport, config);

        // Front channel: the authorization URL carries the expected query
        let authorization = client.auth().authorization_url().await.unwrap();
        assert!(authorization.url.contains("client_id=client-1"));
        assert!(authorization.url.contains("code_challenge="));
        assert!(authorization.url.contains("code_challenge_method=S256"));
        assert!(authorization.url.contains("scope=openid%20profile"));
        assert!(authorization.url.contains(&format!("state={}", authorization.state)));

        // The IdP will echo the nonce bound to this state inside the ID token
        let nonce = client.state_store().peek(&authorization.state).unwrap();
        let id_token = sign_rs256(
            &signer.key,
            r#"{"alg":"RS256","kid":"k1"}"#,
            &serde_json::json!({
                "iss": "https://idp.example",
                "aud": "client-1",
                "sub": "user-1",
                "exp": util::now_secs() + 600,
                "iat": util::now_secs(),
                "nonce": nonce,
            })
            .to_string(),
        );
        transport.route(
            "https://idp.example/token",
            200,
            &serde_json::json!({
                "access_token": "a",
                "id_token": id_token,
                "expires_in": 3600,
                "token_type": "Bearer",
            })
            .to_string(),
        );

        // Back channel: redeem the code, ID token validates against the nonce
        let set = client.auth().handle_redirect("auth-code", &authorization.state).await.unwrap();
        assert_eq!(set.access_token, "a");
        assert_eq!(client.token().get_tokens().unwrap().access_token, "a");
        assert_eq!(set.id_token.as_deref(), Some(id_token.as_str()));

        // The state was consumed; replaying the redirect fails closed
        let err = client.auth().handle_redirect("auth-code", &authorization.state).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateMismatch);
    }

    #[tokio::test]
    async fn id_token_bound_to_a_foreign_nonce_is_rejected() {
        let transport = transport_with_idp();
        let signer = rsa_signing_key("k1", Some("RS256"));
        transport.route("https://idp.example/jwks", 200, &jwks_json(&signer.jwk));
        let client = client_over(&transport, base_config());

        let authorization = client.auth().authorization_url().await.unwrap();
        let id_token = sign_rs256(
            &signer.key,
            r#"{"alg":"RS256","kid":"k1"}"#,
            &serde_json::json!({
                "iss": "https://idp.example",
                "aud": "client-1",
                "exp": util::now_secs() + 600,
                "iat": util::now_secs(),
                "nonce": "some-other-nonce",
            })
            .to_string(),
        );
        transport.route(
            "https://idp.example/token",
            200,
            &serde_json::json!({ "access_token": "a", "id_token": id_token, "expires_in": 3600 }).to_string(),
        );

        let err = client.auth().handle_redirect("code", &authorization.state).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdTokenValidationError);
    }

    #[test]
    fn registry_holds_named_clients() {
        let transport = transport_with_idp();
        let registry = ClientRegistry::new();

        let client = client_over(&transport, base_config());
        let registered = registry.register("main-idp", client).unwrap();
        assert_eq!(registered.config().client_id, "client-1");

        assert!(registry.get("main-idp").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.len(), 1);

        // Same name twice is refused
        let duplicate = client_over(&transport, base_config());
        assert!(registry.register("main-idp", duplicate).is_err());

        assert!(registry.remove("main-idp").is_some());
        assert!(registry.is_empty());
    }
}

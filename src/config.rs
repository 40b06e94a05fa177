//
// Caller provided configuration
//
use crate::error::Result;

/// OAuth 2.0 / OIDC grant selection. Decides which body the token endpoint
/// receives and which flows the authorization front-channel allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    DeviceCode,
    ClientCredentials,
    RefreshToken,
    Password,
    JwtBearer,
    Saml2Bearer,
    Custom,
}

impl GrantType {
    /// Wire value sent as `grant_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Implicit => "implicit",
            Self::DeviceCode => "device_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::Password => "password",
            Self::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
            Self::Saml2Bearer => "urn:ietf:params:oauth:grant-type:saml2-bearer",
            Self::Custom => "custom",
        }
    }
}

pub const PKCE_METHOD_S256: &str = "S256";
pub const PKCE_METHOD_PLAIN: &str = "plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Server,
    Client,
    Hybrid,
}

impl SessionMode {
    pub fn server_side(&self) -> bool {
        matches!(self, Self::Server | Self::Hybrid)
    }

    pub fn client_side(&self) -> bool {
        matches!(self, Self::Client | Self::Hybrid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStorage {
    Cookie,
    LocalStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl From<SameSitePolicy> for cookie::SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => cookie::SameSite::Strict,
            SameSitePolicy::Lax => cookie::SameSite::Lax,
            SameSitePolicy::None => cookie::SameSite::None,
        }
    }
}

/// Attributes stamped onto every cookie the library issues.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSitePolicy,
    pub path: String,
    pub domain: Option<String>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: "sid".to_string(),
            http_only: true,
            secure: true,
            same_site: SameSitePolicy::Strict,
            path: "/".to_string(),
            domain: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mode: SessionMode,
    pub client_storage: ClientStorage,
    pub use_silent_renew: bool,
    /// Server-side session lifetime in seconds; also the session cookie max-age.
    pub ttl: u64,
    pub cookie: CookieOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: SessionMode::Server,
            client_storage: ClientStorage::Cookie,
            use_silent_renew: true,
            ttl: 3600,
            cookie: CookieOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoggingOptions {
    pub level: log::LevelFilter,
}

impl LoggingOptions {
    /// Push the configured verbosity into the `log` facade. Opt-in; the
    /// embedding application may prefer to manage the level itself.
    pub fn apply(&self) {
        log::set_max_level(self.level);
    }
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: log::LevelFilter::Info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub discovery_url: String,
    pub grant_type: GrantType,
    pub pkce: bool,
    /// `"S256"` or `"plain"`; anything else fails PKCE generation and is
    /// omitted (with a warning) from authorization URLs.
    pub pkce_method: String,
    pub response_type: Option<String>,
    pub response_mode: Option<String>,
    pub acr_values: Option<Vec<String>>,
    pub ui_locales: Option<Vec<String>>,
    /// Seconds before expiry at which a token stops counting as valid.
    pub token_refresh_threshold: u64,
    /// Resource-owner credentials, only read by the `Password` grant.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Extra query parameters appended to every authorization URL.
    pub authorize_extra_params: Vec<(String, String)>,
    pub session: SessionOptions,
    pub logging: LoggingOptions,
}

impl ClientConfig {
    pub fn new(client_id: &str, redirect_uri: &str, discovery_url: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: None,
            redirect_uri: redirect_uri.to_string(),
            post_logout_redirect_uri: None,
            scopes: vec!["openid".to_string()],
            discovery_url: discovery_url.to_string(),
            grant_type: GrantType::AuthorizationCode,
            pkce: false,
            pkce_method: PKCE_METHOD_S256.to_string(),
            response_type: None,
            response_mode: None,
            acr_values: None,
            ui_locales: None,
            token_refresh_threshold: 60,
            username: None,
            password: None,
            authorize_extra_params: Vec::new(),
            session: SessionOptions::default(),
            logging: LoggingOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery_url.trim().is_empty() {
            err!(InvalidDiscoveryUrl, "Discovery URL is empty");
        }
        if url::Url::parse(&self.discovery_url).is_err() {
            err!(InvalidDiscoveryUrl, format!("Discovery URL is not a valid URL: {}", self.discovery_url));
        }
        if self.client_id.trim().is_empty() {
            err!(InvalidConfig, "client_id is required");
        }
        if self.redirect_uri.trim().is_empty() {
            err!(InvalidConfig, "redirect_uri is required");
        }
        Ok(())
    }

    pub fn scope_string(&self) -> String {
        crate::util::space_join(&self.scopes)
    }
}

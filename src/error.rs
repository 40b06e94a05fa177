//
// Typed errors with a stable code and an optional causal chain
//
use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

pub type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

/// Every failure the library can surface, keyed by a stable textual code.
/// The code is part of the public contract; embedders match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Configuration
    InvalidDiscoveryUrl,
    InvalidConfig,
    InvalidGrantType,
    UnsupportedGrantType,
    InvalidRequest,
    EndpointMissing,
    EndSessionEndpointMissing,
    IntrospectionUnsupported,
    RevocationUnsupported,
    UserInfoUnavailable,

    // State / PKCE
    StateMismatch,
    StateAlreadyExists,
    PkceError,

    // Discovery / keys
    DiscoveryError,
    KeyNotFound,

    // Token lifecycle
    NoRefreshToken,
    TokenRequestError,
    TokenRefreshError,
    TokenExchangeError,
    IntrospectionError,
    RevocationError,
    NoAccessToken,
    NoValidToken,

    // Validation
    IdTokenValidationError,
    InvalidJson,
    InvalidFormat,

    // Device flow
    DeviceAuthError,
    DeviceCodeExpired,
    TokenPollingError,
    Timeout,

    // Session
    NoTokens,
    SessionError,

    // Concurrency
    AcquireFailed,
    AcquireTimeout,

    // Transport
    HttpError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDiscoveryUrl => "InvalidDiscoveryUrl",
            Self::InvalidConfig => "InvalidConfig",
            Self::InvalidGrantType => "InvalidGrantType",
            Self::UnsupportedGrantType => "UnsupportedGrantType",
            Self::InvalidRequest => "InvalidRequest",
            Self::EndpointMissing => "EndpointMissing",
            Self::EndSessionEndpointMissing => "EndSessionEndpointMissing",
            Self::IntrospectionUnsupported => "IntrospectionUnsupported",
            Self::RevocationUnsupported => "RevocationUnsupported",
            Self::UserInfoUnavailable => "UserInfoUnavailable",
            Self::StateMismatch => "StateMismatch",
            Self::StateAlreadyExists => "StateAlreadyExists",
            Self::PkceError => "PkceError",
            Self::DiscoveryError => "DiscoveryError",
            Self::KeyNotFound => "KeyNotFound",
            Self::NoRefreshToken => "NoRefreshToken",
            Self::TokenRequestError => "TokenRequestError",
            Self::TokenRefreshError => "TokenRefreshError",
            Self::TokenExchangeError => "TokenExchangeError",
            Self::IntrospectionError => "IntrospectionError",
            Self::RevocationError => "RevocationError",
            Self::NoAccessToken => "NoAccessToken",
            Self::NoValidToken => "NoValidToken",
            Self::IdTokenValidationError => "IdTokenValidationError",
            Self::InvalidJson => "InvalidJson",
            Self::InvalidFormat => "InvalidFormat",
            Self::DeviceAuthError => "DeviceAuthError",
            Self::DeviceCodeExpired => "DeviceCodeExpired",
            Self::TokenPollingError => "TokenPollingError",
            Self::Timeout => "Timeout",
            Self::NoTokens => "NoTokens",
            Self::SessionError => "SessionError",
            Self::AcquireFailed => "AcquireFailed",
            Self::AcquireTimeout => "AcquireTimeout",
            Self::HttpError => "HttpError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Library error: a kind, a human readable message, the original error that
/// caused it (if any) and, for transport failures, the HTTP status observed.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<BoxedError>,
    status: Option<u16>,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
            status: None,
        }
    }

    pub fn with_source<M, S>(kind: ErrorKind, message: M, source: S) -> Self
    where
        M: Into<String>,
        S: Into<BoxedError>,
    {
        Error {
            kind,
            message: message.into(),
            source: Some(source.into()),
            status: None,
        }
    }

    pub fn set_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable textual code, e.g. `"StateMismatch"`.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status attached to transport failures.
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.source {
            Some(source) => Some(&**source),
            None => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::InvalidJson, "Failed to parse JSON", err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let error = Error::with_source(ErrorKind::HttpError, "HTTP request failed", err);
        match status {
            Some(status) => error.set_status(status),
            None => error,
        }
    }
}

/// Wrap an arbitrary failure into a domain error, keeping the cause attached.
pub trait MapResult<T> {
    fn map_kind(self, kind: ErrorKind, msg: &str) -> Result<T>;
}

impl<T, E> MapResult<T> for std::result::Result<T, E>
where
    E: Into<BoxedError>,
{
    fn map_kind(self, kind: ErrorKind, msg: &str) -> Result<T> {
        self.map_err(|e| Error::with_source(kind, msg, e))
    }
}

///
/// Error return macros
///
#[macro_export]
macro_rules! err {
    ($kind:ident, $msg:expr) => {{
        return Err($crate::error::Error::new($crate::error::ErrorKind::$kind, $msg));
    }};
    ($kind:ident, $msg:expr, $src:expr) => {{
        return Err($crate::error::Error::with_source($crate::error::ErrorKind::$kind, $msg, $src));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::StateMismatch.code(), "StateMismatch");
        assert_eq!(ErrorKind::AcquireTimeout.code(), "AcquireTimeout");
        assert_eq!(ErrorKind::IdTokenValidationError.code(), "IdTokenValidationError");
        assert_eq!(Error::new(ErrorKind::NoTokens, "none stored").code(), "NoTokens");
    }

    #[test]
    fn display_includes_code_and_message() {
        let e = Error::new(ErrorKind::TokenExchangeError, "exchange failed");
        assert_eq!(e.to_string(), "TokenExchangeError: exchange failed");
    }

    #[test]
    fn source_chain_is_preserved() {
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e = Error::with_source(ErrorKind::DiscoveryError, "metadata fetch failed", cause);
        assert!(e.source().is_some());
        assert_eq!(e.kind(), ErrorKind::DiscoveryError);
    }

    #[test]
    fn map_kind_attaches_cause() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let e = res.map_kind(ErrorKind::HttpError, "request failed").unwrap_err();
        assert_eq!(e.code(), "HttpError");
        assert_eq!(e.source().unwrap().to_string(), "boom");
    }

    #[test]
    fn status_is_carried() {
        let e = Error::new(ErrorKind::HttpError, "bad gateway").set_status(502);
        assert_eq!(e.status(), Some(502));
    }

    #[test]
    fn err_macro_returns_early() {
        fn fails() -> Result<()> {
            err!(InvalidConfig, "missing client_id");
        }
        assert_eq!(fails().unwrap_err().kind(), ErrorKind::InvalidConfig);
    }
}

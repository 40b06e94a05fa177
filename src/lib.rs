//! OpenID Connect / OAuth 2.0 relying-party client library.
//!
//! An embedding application builds a [`Client`] from a [`ClientConfig`],
//! sends the user to [`Auth::authorization_url`], redeems the redirect with
//! [`Auth::handle_redirect`] and lets [`Session`] keep the resulting tokens
//! fresh. Every outbound call goes through the [`HttpTransport`] seam and
//! every collaborator (store, transport) is injectable, so the whole flow is
//! testable without a network.

#[macro_use]
extern crate log;

#[macro_use]
pub mod error;

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod http_client;
pub mod jwks;
pub mod jwt;
pub mod lock;
pub mod pkce;
pub mod session;
pub mod state;
pub mod store;
pub mod token;
pub mod util;

pub use crate::{
    auth::{Auth, AuthorizationUrl, DeviceAuthorization},
    cache::Cache,
    client::{Client, ClientRegistry},
    config::{
        ClientConfig, ClientStorage, CookieOptions, GrantType, LoggingOptions, SameSitePolicy,
        SessionMode, SessionOptions,
    },
    discovery::{ClientMetadata, Discovery},
    error::{Error, ErrorKind, Result},
    http_client::{HttpResponse, HttpTransport, Method, ReqwestTransport},
    jwks::{Jwk, JwksStore},
    jwt::{ClaimsValidator, JwtHeader, JwtPayload, JwtValidator, SignatureVerifier},
    lock::{Mutex, MutexGuard},
    pkce::{generate_pkce, PkcePair},
    session::{Session, SessionContext, SessionRequest, SessionResponse},
    state::StateStore,
    store::{MemorySessionStore, SessionData, SessionStore},
    token::{Token, TokenResponse, TokenSet},
};

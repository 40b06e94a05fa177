//
// HTTP transport seam; the default implementation rides on reqwest
//
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{header, Client, ClientBuilder};
use serde::de::DeserializeOwned;

use crate::error::{Error, ErrorKind, MapResult, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Status and body of a completed exchange. Non-2xx responses come back as
/// values, not errors; the caller decides which domain error they become.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(Error::from)
    }
}

/// The one outbound interface of the library. Everything that talks to the
/// IdP goes through this, which is also the seam tests fake.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<String>,
    ) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Self::builder().build().map_kind(ErrorKind::HttpError, "Failed to build HTTP client")?;
        Ok(Self {
            client,
        })
    }

    /// Process-wide transport shared by clients that do not bring their own,
    /// so connection pools are reused across client instances.
    pub fn shared() -> Arc<Self> {
        static INSTANCE: Lazy<Arc<ReqwestTransport>> =
            Lazy::new(|| Arc::new(ReqwestTransport::new().expect("Failed to build HTTP client")));
        Arc::clone(&INSTANCE)
    }

    fn builder() -> ClientBuilder {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static("oxidc"));

        Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(10))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let mut builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(Error::from)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Error::from)?;

        Ok(HttpResponse {
            status,
            body,
        })
    }
}

pub const FORM_CONTENT_TYPE: (&str, &str) = ("Content-Type", "application/x-www-form-urlencoded");

pub fn form_headers() -> Vec<(String, String)> {
    vec![(FORM_CONTENT_TYPE.0.to_string(), FORM_CONTENT_TYPE.1.to_string())]
}

pub fn bearer_headers(access_token: &str) -> Vec<(String, String)> {
    vec![("Authorization".to_string(), format!("Bearer {access_token}"))]
}

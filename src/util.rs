//
// Encoding helpers shared by the URL builders and the wire codecs
//
use std::borrow::Cow;
use std::collections::HashMap;

use cookie::Cookie;
use data_encoding::BASE64URL_NOPAD;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Error, ErrorKind, Result};

// Unreserved characters per RFC 3986, everything else is percent-encoded.
// Spaces encode as %20, also in form bodies.
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

pub fn url_encode(value: &str) -> Cow<'_, str> {
    Cow::from(percent_encode(value.as_bytes(), URL_ENCODE_SET))
}

/// Serialize key/value pairs as `application/x-www-form-urlencoded`.
/// Key order is preserved as given.
pub fn build_urlencoded(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse an urlencoded body or query string back into pairs.
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

/// Parse a redirect fragment (`#a=b&c=d`, leading `#` optional) into a map.
pub fn parse_fragment(fragment: &str) -> HashMap<String, String> {
    let raw = fragment.strip_prefix('#').unwrap_or(fragment);
    url::form_urlencoded::parse(raw.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

//
// Base64url (no padding), the JOSE segment encoding
//
pub fn b64url_encode<T: AsRef<[u8]>>(input: T) -> String {
    BASE64URL_NOPAD.encode(input.as_ref())
}

pub fn b64url_decode(input: &str) -> Result<Vec<u8>> {
    BASE64URL_NOPAD
        .decode(input.as_bytes())
        .map_err(|e| Error::with_source(ErrorKind::InvalidFormat, "Invalid base64url data", e))
}

//
// Cookies
//
/// Extract a named cookie value from a `Cookie` request header.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse(header.to_string())
        .filter_map(|c| c.ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

//
// Time
//
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn space_join(values: &[String]) -> String {
    values.join(" ")
}

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marks responses the interceptor made up rather than fetched or cached.
pub const FALLBACK_HEADER: &str = "x-tradecache-fallback";

/// 1x1 transparent image for broken-image slots.
const PLACEHOLDER_SVG: &str =
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1" viewBox="0 0 1 1"></svg>"#;

/// What the request will be used for, as the issuer declared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// A top-level navigation.
    Document,
    Image,
    Script,
    Style,
    Font,
    #[default]
    Empty,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            destination: Destination::Empty,
            headers: HeaderMap::new(),
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Cache entries are keyed by the exact URL, query included.
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }
}

/// How the response relates to the page's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin; headers and body fully visible.
    Basic,
    Cors,
    Opaque,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub url: Option<Url>,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url: None,
            kind: ResponseKind::Basic,
        }
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status, value.to_string())
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    /// Minimal body for a critical API read made while offline.
    pub fn offline_payload() -> Self {
        let body = serde_json::json!({
            "success": false,
            "offline": true,
            "message": "You are offline. Data will refresh when the connection returns.",
        });
        Self::json(StatusCode::SERVICE_UNAVAILABLE, &body).as_fallback("offline")
    }

    pub fn placeholder_image() -> Self {
        Self::new(StatusCode::OK, PLACEHOLDER_SVG)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("image/svg+xml"))
            .as_fallback("placeholder")
    }

    /// Empty body standing in for a script or stylesheet.
    pub fn empty_placeholder() -> Self {
        Self::new(StatusCode::OK, Vec::new()).as_fallback("placeholder")
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    fn as_fallback(self, reason: &'static str) -> Self {
        self.with_header(
            HeaderName::from_static(FALLBACK_HEADER),
            HeaderValue::from_static(reason),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_fallback(&self) -> bool {
        self.headers.contains_key(FALLBACK_HEADER)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

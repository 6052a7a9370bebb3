// src/base_request.rs

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;

/// A fully resolved request, ready for the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
    #[serde(skip)]
    pub max_content_length: Option<usize>,
}

/// What came back. Header names are lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }
}

/// Transport-level failure. A failure that still produced a response
/// (a status the transport refuses to treat as success) carries it.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub response: Option<HttpResponse>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
            response: None,
        }
    }

    pub fn with_response(message: impl Into<String>, response: HttpResponse) -> Self {
        TransportError {
            message: message.into(),
            response: Some(response),
        }
    }
}

/// Performs one HTTP exchange.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(ReqwestTransport { client })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::new(format!("Invalid method `{}`: {e}", request.method)))?;
        let mut request_builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            request_builder = request_builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            request_builder = request_builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            request_builder = request_builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            request_builder = request_builder.body(body.clone());
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| TransportError::new(format!("Error sending request: {e}")))?;
        let status = response.status().as_u16();
        let headers = header_map_to_btree(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("Error reading response: {e}")))?;
        if let Some(limit) = request.max_content_length {
            if bytes.len() > limit {
                return Err(TransportError::new(format!(
                    "maxContentLength size of {limit} exceeded"
                )));
            }
        }
        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Converts a reqwest HeaderMap, joining repeated headers with `, `.
fn header_map_to_btree(headers: &HeaderMap<HeaderValue>) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (k, v) in headers {
        let v = String::from_utf8_lossy(v.as_bytes()).into_owned();
        out.entry(k.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&v);
            })
            .or_insert(v);
    }
    out
}

/// Splits `"POST http://x/y"` into method and URL; a bare URL means GET.
pub fn split_method_url(line: &str) -> (String, String) {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [method, url] => (method.to_ascii_uppercase(), (*url).to_string()),
        _ => ("GET".to_string(), line.trim().to_string()),
    }
}

/// Inserts a header, replacing any existing one with the same name in a
/// different case.
pub fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: &str) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value.to_string());
}

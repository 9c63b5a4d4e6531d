//! HTTP client used by test bodies

use chrono::Utc;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::RequestRecord;
use crate::utils::timer::Timer;

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to create HTTP client: {0}")]
    Build(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// HTTP client for talking to the system under test
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout_secs: u64,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(30)
    }

    /// Create client with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout_secs,
        })
    }

    /// Set base URL for relative request paths
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add a header sent with every request
    pub fn default_header(
        mut self,
        key: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, HttpError> {
        let name = HeaderName::from_bytes(key.as_ref().as_bytes())
            .map_err(|_| HttpError::InvalidHeader(key.as_ref().to_string()))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|_| HttpError::InvalidHeader(key.as_ref().to_string()))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    fn build_url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) if !path.starts_with("http://") && !path.starts_with("https://") => {
                format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    path.trim_start_matches('/')
                )
            }
            _ => path.to_string(),
        }
    }

    /// Send a request; non-2xx statuses are responses, not errors
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, HttpError> {
        request.url = self.build_url(&request.url);
        debug!("Sending {} request to {}", request.method, request.url);

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &self.default_headers {
            builder = builder.header(key, value);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let timer = Timer::start(format!("{} {}", request.method, request.url));
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                HttpError::ConnectionRefused(request.url.clone())
            } else {
                HttpError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (key.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Body(e.to_string()))?;
        let duration_ms = timer.elapsed_ms();

        debug!(
            "Response: {} {} in {}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(HttpResponse {
            status_code: status.as_u16(),
            headers,
            body,
            duration_ms,
            request,
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.send(HttpRequest::get(url)).await
    }

    pub async fn post(&self, url: &str, body: impl Into<String>) -> Result<HttpResponse, HttpError> {
        self.send(HttpRequest::post(url).body(body)).await
    }
}

/// HTTP request builder
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn options(url: impl Into<String>) -> Self {
        Self::new("OPTIONS", url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// HTTP response together with the request that produced it
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub duration_ms: u64,
    pub request: HttpRequest,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Result<Value, HttpError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Record of this exchange for storing with a result
    pub fn to_record(&self) -> RequestRecord {
        RequestRecord {
            name: None,
            verb: self.request.method.to_lowercase(),
            url: self.request.url.clone(),
            request_headers: self.request.headers.clone(),
            request_body: self.request.body.clone(),
            status: Some(self.status_code),
            response_headers: self.headers.clone(),
            response_body: Some(self.body.clone()),
            duration_ms: self.duration_ms,
            timestamp: Utc::now(),
        }
    }
}

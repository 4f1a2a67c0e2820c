use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::credentials::ApiKey;
use crate::error::SinkError;
use crate::sink::retry::{Attempt, RetryPolicy};

pub const JSON: &str = "application/json";
pub const NDJSON: &str = "application/x-ndjson";

/// Prefixes `http://` when no scheme is given and drops trailing slashes.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    ApiKey,
}

impl AuthScheme {
    fn prefix(self) -> &'static str {
        match self {
            AuthScheme::Bearer => "Bearer",
            AuthScheme::ApiKey => "ApiKey",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Payload {
    content_type: &'static str,
    bytes: Vec<u8>,
}

impl Payload {
    pub fn json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<Self, SinkError> {
        let bytes = serde_json::to_vec(value).map_err(|source| SinkError::Encode {
            what: what.to_string(),
            source,
        })?;
        Ok(Self {
            content_type: JSON,
            bytes,
        })
    }

    pub fn ndjson(bytes: Vec<u8>) -> Self {
        Self {
            content_type: NDJSON,
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn ensure_success(self) -> Result<Self, SinkError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SinkError::Request {
                url: self.url,
                status: self.status,
                message: self.body,
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SinkError> {
        serde_json::from_str(&self.body).map_err(|err| SinkError::Decode {
            url: self.url.clone(),
            reason: err.to_string(),
        })
    }
}

/// Blocking client bound to one base URL, with optional credential and retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    authorization: Option<HeaderValue>,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credential: Option<(AuthScheme, &ApiKey)>,
        retry: RetryPolicy,
    ) -> Result<Self, SinkError> {
        let base_url = normalize_host(base_url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SinkError::Connection {
                url: base_url.clone(),
                reason: format!("failed to build HTTP client: {err}"),
            })?;

        let authorization = credential
            .map(|(scheme, key)| authorization_header(scheme, key, &base_url))
            .transpose()?;

        Ok(Self {
            client,
            base_url,
            authorization,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends the request, retrying connection failures and retryable statuses.
    pub fn send(
        &self,
        method: Method,
        path: &str,
        payload: Option<Payload>,
    ) -> Result<HttpResponse, SinkError> {
        let url = self.url(path);
        self.retry.execute(&url, || {
            match self.attempt(method.clone(), &url, payload.as_ref()) {
                Ok(response) if self.retry.should_retry_status(response.status) => Err(
                    Attempt::Retryable(format!("status {}: {}", response.status, response.body)),
                ),
                Ok(response) => Ok(response),
                Err(err) if err.is_builder() => Err(Attempt::Failed(SinkError::Connection {
                    url: url.clone(),
                    reason: err.to_string(),
                })),
                Err(err) => Err(Attempt::Retryable(err.to_string())),
            }
        })
    }

    /// Single attempt, used for liveness probes.
    pub fn send_once(&self, method: Method, path: &str) -> Result<HttpResponse, SinkError> {
        let url = self.url(path);
        self.attempt(method, &url, None)
            .map_err(|err| SinkError::Connection {
                url: url.clone(),
                reason: err.to_string(),
            })
    }

    fn attempt(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Payload>,
    ) -> Result<HttpResponse, reqwest::Error> {
        let mut request = self.client.request(method, url);

        if let Some(payload) = payload {
            request = request
                .header(CONTENT_TYPE, payload.content_type)
                .body(payload.bytes.clone());
        }
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization.clone());
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;

        Ok(HttpResponse {
            url: url.to_string(),
            status,
            body,
        })
    }
}

fn authorization_header(
    scheme: AuthScheme,
    key: &ApiKey,
    base_url: &str,
) -> Result<HeaderValue, SinkError> {
    let mut value = HeaderValue::from_str(&format!("{} {}", scheme.prefix(), key.expose()))
        .map_err(|_| SinkError::Connection {
            url: base_url.to_string(),
            reason: "API key contains characters not allowed in a header".into(),
        })?;
    value.set_sensitive(true);
    Ok(value)
}

pub fn parse_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, SinkError> {
    response.ensure_success()?.json()
}

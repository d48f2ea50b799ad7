//! Outbound HTTP for provider calls.
//!
//! Requests are built elsewhere (from provider metadata) and arrive here ready
//! to send. [`HttpClient`] is the seam tasks call through; [`RestClient`] is the
//! `reqwest`-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::{Map, Value};

use crate::core::context::AuthCtx;
use crate::error::{ExecError, Result};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// A ready-to-send request.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Rewrites the request to fetch the page identified by `token`.
    pub fn set_next_page(&mut self, token: &str, kind: &NextPageToken) -> Result<()> {
        match kind {
            NextPageToken::QueryParam(name) => {
                let mut url = parse_url(&self.url)?;
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != name.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(name, token);
                self.url = url.to_string();
            }
            NextPageToken::PathReplacement => {
                self.url = match Url::parse(token) {
                    Ok(absolute) => absolute.to_string(),
                    Err(_) => parse_url(&self.url)?
                        .join(token)
                        .map_err(|e| ExecError::InvalidUrl {
                            url: token.to_string(),
                            reason: e.to_string(),
                        })?
                        .to_string(),
                };
            }
            NextPageToken::BodyAttribute(name) => {
                let body = self.body.get_or_insert_with(|| Value::Object(Map::new()));
                let Some(object) = body.as_object_mut() else {
                    return Err(ExecError::MissingParameter(format!(
                        "request body must be an object to carry page token '{name}'"
                    )));
                };
                object.insert(name.clone(), Value::String(token.to_string()));
            }
        }
        Ok(())
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ExecError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Where the next-page token goes on the follow-up request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextPageToken {
    /// `?<name>=<token>`
    QueryParam(String),
    /// The token is the next URL, absolute or relative to the current one.
    PathReplacement,
    /// `{"<name>": "<token>"}` in the JSON body.
    BodyAttribute(String),
}

/// How a paginated resource hands out continuation tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub token_kind: NextPageToken,
    /// Top-level response field holding the next token, e.g. `nextPageToken`.
    pub response_token_field: String,
}

impl Pagination {
    pub fn new(token_kind: NextPageToken, response_token_field: impl Into<String>) -> Self {
        Self {
            token_kind,
            response_token_field: response_token_field.into(),
        }
    }

    /// The non-empty continuation token in `body`, if any.
    pub fn next_token(&self, body: &Value) -> Option<String> {
        match body.get(&self.response_token_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Sends prepared requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest, auth: &AuthCtx) -> Result<HttpResponse>;
}

/// [`HttpClient`] over `reqwest`.
#[derive(Clone, Debug)]
pub struct RestClient {
    pub(crate) client: reqwest::Client,
    pub(crate) timeout: Option<Duration>,
}

impl RestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: None,
        }
    }

    /// A zero timeout means none.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for RestClient {
    async fn send(&self, request: &HttpRequest, auth: &AuthCtx) -> Result<HttpResponse> {
        let url = parse_url(&request.url)?;
        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &auth.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        log::debug!("{} {}", request.method, request.url);
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ExecError::HttpStatus {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }
}

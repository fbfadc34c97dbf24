/// HTTP client for forwarding requests to ESI.
/// Uses reqwest-middleware so every response passes the error limit collector.
use anyhow::Context;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::{Bytes, BytesMut};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use thiserror::Error;
use url::{Origin, Url};

use super::error_limit::{ErrorBudgetGate, ErrorLimitCollector};
use super::paths::{is_rooted_path, PublicPaths};
use crate::config::Config;

/// One proxied call, built per request and discarded afterwards.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// ESI path, possibly carrying its own query string.
    pub path: String,
    /// Caller query parameters, without the character selector.
    pub params: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub access_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Upstream answered and the body was read completely.
    Complete,
    /// The transport failed after the response head arrived.
    Partial,
    /// No response at all; status and body are synthesized.
    TransportFailure,
}

#[derive(Debug)]
pub struct UpstreamResult {
    pub kind: ResultKind,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Bytes received so far, complete unless `body_error` is set.
    pub body: Bytes,
    pub body_error: Option<String>,
}

impl UpstreamResult {
    fn transport_failure(message: String) -> Self {
        Self {
            kind: ResultKind::TransportFailure,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
            body: Bytes::from(message),
            body_error: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("public ESI route {0} cannot be called with a delegated token")]
    PublicPath(String),

    /// The path would not resolve to a route on the configured ESI host.
    #[error("invalid ESI path {0}")]
    InvalidPath(String),
}

pub struct UpstreamClient {
    client: ClientWithMiddleware,
    esi_host: String,
    esi_origin: Origin,
    datasource: String,
    public_paths: PublicPaths,
}

impl UpstreamClient {
    pub fn new(
        config: &Config,
        public_paths: PublicPaths,
        error_limit: ErrorBudgetGate,
    ) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(32)
            .timeout(config.upstream_timeout)
            .connect_timeout(config.upstream_timeout.min(std::time::Duration::from_secs(5)))
            .build()?;

        let client = ClientBuilder::new(reqwest_client)
            .with(ErrorLimitCollector::new(error_limit))
            .build();

        let esi_host = config.esi_host.trim_end_matches('/').to_string();
        let esi_origin = Url::parse(&esi_host)
            .with_context(|| format!("invalid ESI host {esi_host}"))?
            .origin();

        Ok(Self {
            client,
            esi_host,
            esi_origin,
            datasource: config.esi_datasource.clone(),
            public_paths,
        })
    }

    /// `host + path`, then the server datasource, then the caller's parameters.
    /// Fails unless the result stays on the configured ESI origin.
    pub fn build_url(&self, path: &str, params: &[(String, String)]) -> Result<Url, ForwardError> {
        if !is_rooted_path(path) {
            return Err(ForwardError::InvalidPath(path.to_string()));
        }

        let separator = if path.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}{}datasource={}",
            self.esi_host,
            path,
            separator,
            urlencoding::encode(&self.datasource)
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        let url = Url::parse(&url).map_err(|_| ForwardError::InvalidPath(path.to_string()))?;
        if url.origin() != self.esi_origin || !url.username().is_empty() || url.password().is_some() {
            return Err(ForwardError::InvalidPath(path.to_string()));
        }
        Ok(url)
    }

    /// Non-2xx answers are results, not errors. Only public routes and paths
    /// that leave the ESI host are refused.
    pub async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResult, ForwardError> {
        if self.public_paths.is_public(&request.path) {
            return Err(ForwardError::PublicPath(request.path));
        }

        let url = self.build_url(&request.path, &request.params)?;
        let bearer = match HeaderValue::from_str(&format!("Bearer {}", request.access_token)) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Access token is not a valid header value: {}", e);
                return Ok(UpstreamResult::transport_failure(e.to_string()));
            }
        };

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .header(reqwest::header::AUTHORIZATION, bearer);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(method = %request.method, url = %url, "ESI request failed: {}", e);
                return Ok(UpstreamResult::transport_failure(e.to_string()));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();

        // Read chunk by chunk so a connection dropped mid-body keeps what arrived.
        let mut body = BytesMut::new();
        let mut body_error = None;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        method = %request.method,
                        url = %url,
                        status = status.as_u16(),
                        "ESI response interrupted: {}",
                        e
                    );
                    body_error = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(UpstreamResult {
            kind: if body_error.is_some() {
                ResultKind::Partial
            } else {
                ResultKind::Complete
            },
            status,
            headers,
            body: body.freeze(),
            body_error,
        })
    }
}

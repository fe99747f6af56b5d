//! HTTP client for the freezer endpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;

use crate::activity::{Edge, HookError, StateHook};
use crate::config::FreezerConfig;

/// Header carrying the service account token.
pub const TOKEN_HEADER: &str = "Token";

#[derive(Debug, thiserror::Error)]
pub enum FreezerError {
    #[error("invalid freezer endpoint: {0}")]
    Endpoint(#[from] axum::http::uri::InvalidUri),
    #[error("failed to read token: {0}")]
    Token(#[source] std::io::Error),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to build request: {0}")]
    Build(#[from] axum::http::Error),
    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
    #[error("freezer answered {0}")]
    Status(StatusCode),
    #[error("freezer did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Serialize)]
struct ConcurrencyStateRequest {
    action: &'static str,
}

/// Sends pause/resume actions to the freezer.
#[derive(Clone, Debug)]
pub struct FreezerClient {
    endpoint: Uri,
    token_path: Option<PathBuf>,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl FreezerClient {
    pub fn new(
        endpoint: &str,
        token_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, FreezerError> {
        let endpoint: Uri = endpoint.parse()?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            endpoint,
            token_path,
            timeout,
            client,
        })
    }

    /// Build a client from config, or `None` when no endpoint is configured.
    pub fn from_config(config: &FreezerConfig) -> Result<Option<Self>, FreezerError> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(None);
        };
        Self::new(
            endpoint,
            config.token_path.as_ref().map(PathBuf::from),
            Duration::from_millis(config.timeout_ms),
        )
        .map(Some)
    }

    pub async fn pause(&self) -> Result<(), FreezerError> {
        self.relay(Edge::Pause).await
    }

    pub async fn resume(&self) -> Result<(), FreezerError> {
        self.relay(Edge::Resume).await
    }

    /// `(on_active, on_idle)` hooks backed by this client.
    pub fn hooks(self: &Arc<Self>) -> (StateHook, StateHook) {
        let resume = {
            let client = self.clone();
            StateHook::new(move || {
                let client = client.clone();
                async move { client.resume().await.map_err(HookError::from) }
            })
        };
        let pause = {
            let client = self.clone();
            StateHook::new(move || {
                let client = client.clone();
                async move { client.pause().await.map_err(HookError::from) }
            })
        };
        (resume, pause)
    }

    async fn relay(&self, edge: Edge) -> Result<(), FreezerError> {
        let body = serde_json::to_vec(&ConcurrencyStateRequest {
            action: edge.as_str(),
        })?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json");

        // Re-read every time: the token is rotated on disk.
        if let Some(path) = &self.token_path {
            let token = tokio::fs::read_to_string(path)
                .await
                .map_err(FreezerError::Token)?;
            builder = builder.header(TOKEN_HEADER, token.trim());
        }

        let request = builder.body(Body::from(body))?;
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| FreezerError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(FreezerError::Status(status));
        }

        tracing::debug!(action = edge.as_str(), endpoint = %self.endpoint, "Freezer acknowledged");
        Ok(())
    }
}

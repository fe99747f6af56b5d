//! Proxy composition.
//!
//! # Responsibilities
//! - Forward requests to the single backing process
//! - Stack admission, activity tracking and the ambient layers around it
//!
//! # Layer Order (outermost first)
//! ```text
//! request id → timeout → trace (optional) → admission → activity → forward
//! ```
//!
//! # Design Decisions
//! - Admission sits outside activity tracking: a shed request never reached
//!   the backend, so it must not thaw it
//! - Bodies stream in both directions; nothing is buffered
//! - A request counts as in flight until its response body is fully sent,
//!   so the permit and activity guard travel inside the body
//! - Backend transport errors map to 502 Bad Gateway

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, InvalidUri, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::activity::ConcurrencyStateLayer;
use crate::admission::{admission_middleware, AdmissionState};
use crate::config::BackendConfig;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::observability::metrics;

/// State for the forwarding handler.
#[derive(Clone, Debug)]
pub struct ForwardState {
    client: Client<HttpConnector, Body>,
    authority: Authority,
}

impl ForwardState {
    pub fn new(backend: &BackendConfig, connect_timeout: Duration) -> Result<Self, InvalidUri> {
        let authority: Authority = backend.address.parse()?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self { client, authority })
    }

    fn upstream_uri(&self, uri: Uri) -> Result<Uri, axum::http::uri::InvalidUriParts> {
        let mut parts = uri.into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        Uri::from_parts(parts)
    }
}

/// Forward one request to the backend.
pub async fn forward_handler(State(state): State<ForwardState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(&request).unwrap_or("unknown").to_string();
    let method = request.method().clone();

    let (mut parts, body) = request.into_parts();
    parts.uri = match state.upstream_uri(parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Cannot rewrite request URI");
            metrics::record_request(method.as_str(), 400, start_time);
            return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
        }
    };
    // The backend connection is plain HTTP/1.1 regardless of the client's protocol.
    parts.version = Version::HTTP_11;

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        uri = %parts.uri,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(method.as_str(), response.status().as_u16(), start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_request(method.as_str(), 502, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Everything the proxy stack is assembled from.
pub struct ProxyParts {
    pub forward: ForwardState,
    pub admission: AdmissionState,
    pub activity: ConcurrencyStateLayer,
    pub tracing_enabled: bool,
    pub request_timeout: Duration,
}

/// Build the request-serving router.
#[allow(deprecated)]
pub fn proxy_router(parts: ProxyParts) -> Router {
    let router = Router::new()
        .route("/", any(forward_handler))
        .route("/{*path}", any(forward_handler))
        .with_state(parts.forward)
        .layer(parts.activity)
        .layer(middleware::from_fn_with_state(
            parts.admission,
            admission_middleware,
        ));

    let router = if parts.tracing_enabled {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router
        .layer(TimeoutLayer::new(parts.request_timeout))
        .layer(propagate_request_id_layer())
        .layer(set_request_id_layer())
}

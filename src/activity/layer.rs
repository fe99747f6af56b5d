//! Tower middleware that tracks activity around an HTTP service.
//!
//! A request stays active until its response body has been fully produced
//! or dropped, not merely until the handler returns the response head.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use axum::BoxError;
use futures_util::future::BoxFuture;
use hyper::body::Body as HttpBody;
use tower::{Layer, Service};

use crate::activity::hooks::StateHook;
use crate::activity::state::ConcurrencyState;
use crate::http::body::GuardedBody;

/// Wraps services so every call is counted in a shared [`ConcurrencyState`].
#[derive(Clone, Debug)]
pub struct ConcurrencyStateLayer {
    state: Arc<ConcurrencyState>,
}

impl ConcurrencyStateLayer {
    pub fn new(on_active: Option<StateHook>, on_idle: Option<StateHook>) -> Self {
        Self::from_state(Arc::new(ConcurrencyState::new(on_active, on_idle)))
    }

    pub fn from_state(state: Arc<ConcurrencyState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ConcurrencyState> {
        &self.state
    }
}

impl<S> Layer<S> for ConcurrencyStateLayer {
    type Service = ConcurrencyStateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConcurrencyStateService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConcurrencyStateService<S> {
    inner: S,
    state: Arc<ConcurrencyState>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ConcurrencyStateService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response<Body>, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness; leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = self.state.clone();

        Box::pin(async move {
            let guard = state.enter().await;
            match inner.call(request).await {
                Ok(response) => Ok(response.map(|body| GuardedBody::wrap(body, guard))),
                Err(err) => {
                    guard.exit().await;
                    Err(err)
                }
            }
        })
    }
}

//! Per-request refresh hook
//!
//! [`ConfigurationRefresher`] is host-agnostic. For axum, either wrap it in
//! [`RefreshLayer`] or use [`refresh_middleware`] with
//! `axum::middleware::from_fn_with_state`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::trace;

use crate::client::{ConfigurationClient, RefreshTrigger};

/// How a request interacts with a due reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Start the reload in the background and serve the request immediately
    #[default]
    Background,
    /// Finish the reload before serving the request
    WaitForFresh,
}

#[derive(Debug, Clone)]
pub struct ConfigurationRefresher {
    client: ConfigurationClient,
    mode: RefreshMode,
}

impl ConfigurationRefresher {
    pub fn new(client: ConfigurationClient) -> Self {
        Self {
            client,
            mode: RefreshMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: RefreshMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    pub fn client(&self) -> &ConfigurationClient {
        &self.client
    }

    /// Called once per request before the handler runs
    pub async fn refresh_if_due(&self) -> RefreshTrigger {
        let trigger = match self.mode {
            RefreshMode::Background => self.client.refresh_if_due(),
            RefreshMode::WaitForFresh if !self.client.is_enabled() => RefreshTrigger::Disabled,
            RefreshMode::WaitForFresh if !self.client.is_due() => RefreshTrigger::NotDue,
            RefreshMode::WaitForFresh => RefreshTrigger::Completed(self.client.refresh().await),
        };
        trace!(?trigger, "Refresh check");
        trigger
    }
}

/// axum middleware: `from_fn_with_state(refresher, refresh_middleware)`
pub async fn refresh_middleware(
    State(refresher): State<ConfigurationRefresher>,
    request: Request,
    next: Next,
) -> Response {
    refresher.refresh_if_due().await;
    next.run(request).await
}

/// Tower layer running a refresh check before every request
#[derive(Debug, Clone)]
pub struct RefreshLayer {
    refresher: ConfigurationRefresher,
}

impl RefreshLayer {
    pub fn new(refresher: ConfigurationRefresher) -> Self {
        Self { refresher }
    }
}

impl<S> Layer<S> for RefreshLayer {
    type Service = RefreshService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RefreshService {
            inner,
            refresher: self.refresher.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshService<S> {
    inner: S,
    refresher: ConfigurationRefresher,
}

impl<S, ReqBody> Service<axum::http::Request<ReqBody>> for RefreshService<S>
where
    S: Service<axum::http::Request<ReqBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let refresher = self.refresher.clone();

        Box::pin(async move {
            refresher.refresh_if_due().await;
            inner.call(request).await
        })
    }
}

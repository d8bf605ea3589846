//! Per-request diagnostic context.
//!
//! A tower layer opens one tracing span per request and records the
//! request-scoped fields immediately. User-scoped fields (id, roles,
//! organization, auth method) are declared empty and recorded by the
//! authentication pipeline once resolution has run, through [`MdcHandle`]
//! found in the request extensions. No thread-local is involved: the span
//! travels with the request future.

use axum::http::Request;
use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{field, info_span, Span};

use crate::config::MdcConfig;
use crate::request_id::RequestId;

/// Handle to the request span, for recording user fields after resolution.
#[derive(Clone)]
pub struct MdcHandle {
    span: Span,
    config: Arc<MdcConfig>,
}

impl MdcHandle {
    /// Record the resolved identity on the request span, honoring the
    /// configured field switches.
    pub fn record_user(&self, user_id: &str, roles: &str, organization: &str, auth_method: &str) {
        if self.config.user_id {
            self.span.record("enduser.id", user_id);
        }
        if self.config.roles {
            self.span.record("enduser.roles", roles);
        }
        if self.config.organization {
            self.span.record("enduser.org", organization);
        }
        if self.config.auth_method {
            self.span.record("auth.method", auth_method);
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Tower layer that binds the diagnostic span for each request.
#[derive(Clone)]
pub struct MdcLayer {
    config: Arc<MdcConfig>,
}

impl MdcLayer {
    pub fn new(config: MdcConfig) -> Self {
        MdcLayer {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for MdcLayer {
    type Service = MdcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MdcService {
            inner,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MdcService<S> {
    inner: S,
    config: Arc<MdcConfig>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MdcService<S>
where
    S: Service<Request<ReqBody>, Response = axum::http::Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MdcFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let span = info_span!(
            "request",
            http.request_id = field::Empty,
            http.method = field::Empty,
            http.path = field::Empty,
            http.remote_addr = field::Empty,
            http.status_code = field::Empty,
            enduser.id = field::Empty,
            enduser.roles = field::Empty,
            enduser.org = field::Empty,
            auth.method = field::Empty,
            application = field::Empty,
        );

        let config = &self.config;
        if config.request_id {
            if let Some(id) = req.extensions().get::<RequestId>() {
                span.record("http.request_id", field::display(id));
            }
        }
        if config.method {
            span.record("http.method", field::display(req.method()));
        }
        if config.path {
            span.record("http.path", req.uri().path());
        }
        if config.remote_addr {
            if let Some(addr) = req
                .extensions()
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
            {
                span.record("http.remote_addr", field::display(addr.0));
            }
        }
        if !config.application_name.is_empty() {
            span.record("application", config.application_name.as_str());
        }

        req.extensions_mut().insert(MdcHandle {
            span: span.clone(),
            config: self.config.clone(),
        });

        MdcFuture {
            inner: self.inner.call(req),
            span,
        }
    }
}

pin_project! {
    /// Future polled inside the request span; records the status code when
    /// the response is ready.
    pub struct MdcFuture<F> {
        #[pin]
        inner: F,
        span: Span,
    }
}

impl<F, ResBody, E> Future for MdcFuture<F>
where
    F: Future<Output = Result<axum::http::Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _enter = this.span.enter();
        match this.inner.poll(cx) {
            Poll::Ready(result) => {
                if let Ok(ref response) = result {
                    this.span
                        .record("http.status_code", response.status().as_u16());
                }
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

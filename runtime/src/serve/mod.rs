//! Read-only OCI Distribution HTTP surface.
//!
//! A [`RegistryBackend`] answers `/v2/` requests either from the local
//! [`Store`](crate::oci::store::Store) ([`LocalBackend`]) or by forwarding
//! them to an upstream registry ([`ProxyBackend`]). Both run behind the same
//! wrapper, which answers CORS preflights and tags every response with CORS
//! headers so browser UIs can query the registry directly.

mod local;
mod proxy;

pub use local::LocalBackend;
pub use proxy::ProxyBackend;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use skr_core::error::{Result, SkrError};
use tracing::Instrument;

/// Source of registry responses.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Answer one request. Failures are turned into error responses.
    async fn handle(&self, req: Request<Body>) -> Response<Body>;

    /// Human-readable description of where responses come from.
    fn describe(&self) -> String;
}

/// Answer a request through `backend`, applying the CORS wrapper.
pub async fn handle(backend: Arc<dyn RegistryBackend>, req: Request<Body>) -> Response<Body> {
    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path()
    );

    async move {
        let mut response = if req.method() == Method::OPTIONS {
            Response::new(Body::empty())
        } else {
            backend.handle(req).await
        };

        let headers = response.headers_mut();
        headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
        headers.insert(
            "access-control-allow-methods",
            HeaderValue::from_static("GET, HEAD, OPTIONS"),
        );
        headers.insert(
            "access-control-allow-headers",
            HeaderValue::from_static("Authorization, Content-Type, Accept"),
        );

        tracing::debug!(status = %response.status(), "Handled request");
        response
    }
    .instrument(span)
    .await
}

/// Listen on `addr` until `shutdown` resolves, then drain open connections.
pub async fn serve<F>(addr: SocketAddr, backend: Arc<dyn RegistryBackend>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let description = backend.describe();
    let make_svc = make_service_fn(move |_conn| {
        let backend = backend.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let backend = backend.clone();
                async move { Ok::<_, Infallible>(handle(backend, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| SkrError::Other(format!("Failed to bind {}: {}", addr, e)))?
        .serve(make_svc);
    tracing::info!(addr = %server.local_addr(), backend = %description, "Registry server listening");

    server
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SkrError::Other(format!("Registry server failed: {}", e)))?;

    tracing::info!("Registry server stopped");
    Ok(())
}

/// Status code for a failed request.
fn status_for(error: &SkrError) -> StatusCode {
    match error {
        SkrError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plain-text error response. Internal failures get a generic body; the
/// detail stays in the log.
fn error_response(error: &SkrError) -> Response<Body> {
    let status = status_for(error);
    let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %error, "Request failed");
        "internal server error".to_string()
    } else {
        tracing::debug!(error = %error, "Request rejected");
        error.to_string()
    };
    plain_response(status, body)
}

fn plain_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

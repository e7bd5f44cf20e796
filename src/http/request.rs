//! Request correlation.
//!
//! # Responsibilities
//! - Assign every request an `x-request-id` (UUID v4), or keep a sane inbound one
//! - Expose the id to handlers as a request extension
//! - Echo the id on the response
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Inbound ids longer than 128 bytes or with non-visible characters are replaced

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_INBOUND_ID_LEN: usize = 128;

/// Correlation id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.extensions().get::<RequestId>().map(|id| id.0.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B, ResB> Service<Request<B>> for RequestIdService<S>
where
    S: Service<Request<B>, Response = Response<ResB>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let (id, header) = inbound_id(&request).unwrap_or_else(generate_id);

        request.headers_mut().insert(X_REQUEST_ID, header.clone());
        request.extensions_mut().insert(RequestId(id));

        let future = self.inner.call(request);
        Box::pin(async move {
            let mut response = future.await?;
            response.headers_mut().insert(X_REQUEST_ID, header);
            Ok(response)
        })
    }
}

fn inbound_id<B>(request: &Request<B>) -> Option<(String, HeaderValue)> {
    let value = request.headers().get(X_REQUEST_ID)?;
    let id = value.to_str().ok()?;
    if id.is_empty() || id.len() > MAX_INBOUND_ID_LEN || !id.bytes().all(|b| b.is_ascii_graphic()) {
        return None;
    }
    Some((id.to_string(), value.clone()))
}

fn generate_id() -> (String, HeaderValue) {
    let id = Uuid::new_v4();
    let mut buf = Uuid::encode_buffer();
    let header = HeaderValue::from_str(id.hyphenated().encode_lower(&mut buf))
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    (id.to_string(), header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|request: Request<Body>| async move { request.request_id().unwrap_or("missing").to_string() }),
            )
            .layer(RequestIdLayer)
    }

    #[tokio::test]
    async fn test_generates_and_echoes_id() {
        let res = app().oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        let header = res.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn test_keeps_valid_inbound_id() {
        let req = Request::get("/").header(X_REQUEST_ID, "trace-42").body(Body::empty()).unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.headers()[X_REQUEST_ID], "trace-42");

        let req = Request::get("/").header(X_REQUEST_ID, "x".repeat(200)).body(Body::empty()).unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_ne!(res.headers()[X_REQUEST_ID], "x".repeat(200).as_str());
    }
}

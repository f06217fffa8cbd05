// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tower::Service;

use crate::proxy::ForwardingEngine;
use crate::server::admin::AdminHandlers;

/// Component I: routes `/admin/*` to the read-only admin handlers and
/// everything else to the forwarding engine. Admin paths never consult the
/// forwarding engine; non-admin paths never consult the admin handlers.
#[derive(Clone)]
pub struct RequestHandler {
    engine: Arc<ForwardingEngine>,
    admin: Arc<AdminHandlers>,
}

impl RequestHandler {
    pub fn new(engine: Arc<ForwardingEngine>, admin: Arc<AdminHandlers>) -> Self {
        Self { engine, admin }
    }

    async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let path = req.uri().path();
        if let Some(rest) = path.strip_prefix("/admin/") {
            return self.admin_response(rest).await;
        }
        self.engine.forward(req).await
    }

    async fn admin_response(&self, rest: &str) -> Response<Body> {
        match rest {
            "health" => self.admin.health().await,
            "strategy" => self.admin.strategy().await,
            "stats" => self.admin.stats().await,
            "discovery" => self.admin.discovery().await,
            _ => Response::builder()
                .status(404)
                .body(Body::empty())
                .expect("static status/body is always a valid response"),
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.dispatch(req).await) })
    }
}

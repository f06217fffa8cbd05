// src/proxy/error.rs
use hyper::{Body, Response};

/// Error taxonomy surfaced by the forwarding engine (SPEC_FULL §7).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("All backend servers are unavailable")]
    NoRouteAvailable,

    #[error("No healthy servers available")]
    NoHealthyAvailable,

    #[error("Backend server error: {0}")]
    BackendError(String),
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match &err {
            ProxyError::NoRouteAvailable => (503, "All backend servers are unavailable".to_string()),
            ProxyError::NoHealthyAvailable => (503, "No healthy servers available".to_string()),
            ProxyError::BackendError(_) => (502, err.to_string()),
        };

        Response::builder()
            .status(status)
            .body(Body::from(message))
            .expect("static status/body is always a valid response")
    }
}

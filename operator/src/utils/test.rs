use std::sync::Arc;

use anyhow::Result;
use hyper::{body::to_bytes, Body};
use kube::Client;
use tower_test::mock::SendResponse;

use crate::utils::{Context, ControllerConfig};

pub type ApiServerHandle = tower_test::mock::Handle<http::Request<Body>, http::Response<Body>>;

/// Mock API server answering the requests of a kube client.
pub struct ApiServerVerifier(ApiServerHandle);

impl ApiServerVerifier {
    /// Create a kube client whose requests are served by the returned verifier.
    pub fn client() -> (Client, Self) {
        let (mock_service, handle) =
            tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
        (Client::new(mock_service, "default"), Self(handle))
    }

    /// Wait for the next request of the client.
    pub async fn next_request(
        &mut self,
    ) -> (http::Request<Body>, SendResponse<http::Response<Body>>) {
        self.0.next_request().await.expect("service not called")
    }
}

// Add test specific implementation to the Context
impl<S> Context<S> {
    // Create a test context with the default configuration
    pub fn test(store: S) -> Arc<Self> {
        Arc::new(Self::new(store, ControllerConfig::default()))
    }
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("stub succeeded")
}

/// Parts of a mock request that tests assert on.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub json: serde_json::Value,
}

impl Request {
    pub async fn from_request(request: http::Request<Body>) -> Result<Self> {
        let method = request.method().to_string();
        let path = request.uri().path().to_owned();
        let body_bytes = to_bytes(request.into_body()).await?;
        let json = if body_bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body_bytes)?
        };
        Ok(Self { method, path, json })
    }
}

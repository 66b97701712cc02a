//! Docker Engine HTTP API client.
//!
//! Speaks HTTP/1.1 to the daemon over its Unix socket. Error statuses are
//! mapped onto [`RuntimeError`] so callers can tell "gone" and "in use"
//! apart from real failures.
//!
//! Reference: https://docs.docker.com/engine/api/

use std::path::Path;

use hyper::{Body, Client, Method, Request, Response, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::models::ErrorMessage;
use crate::runtime::RuntimeError;

/// Low-level Engine API client.
pub struct DockerApi {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl std::fmt::Debug for DockerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerApi")
            .field("socket_path", &self.socket_path)
            .finish_non_exhaustive()
    }
}

impl DockerApi {
    /// Create a client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        Self {
            socket_path,
            client: Client::unix(),
        }
    }

    /// Socket path.
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        if !Path::new(&self.socket_path).exists() {
            return Err(RuntimeError::Transport(format!(
                "socket not found: {}",
                self.socket_path
            )));
        }

        let response = self.send(Method::GET, "/_ping").await?;
        Self::check(response).await.map(|_| ())
    }

    /// GET a JSON document.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let response = Self::check(self.send(Method::GET, path).await?).await?;
        let body = hyper::body::to_bytes(response.into_body()).await?;
        serde_json::from_slice(&body)
            .map_err(|e| RuntimeError::InvalidResponse(format!("{path}: {e}")))
    }

    /// DELETE a resource, discarding the response body.
    pub async fn delete(&self, path: &str) -> Result<(), RuntimeError> {
        let response = Self::check(self.send(Method::DELETE, path).await?).await?;
        hyper::body::to_bytes(response.into_body()).await?;
        Ok(())
    }

    /// GET a streaming endpoint, returning the open body.
    pub async fn stream(&self, path: &str) -> Result<Body, RuntimeError> {
        let response = Self::check(self.send(Method::GET, path).await?).await?;
        Ok(response.into_body())
    }

    async fn send(&self, method: Method, path: &str) -> Result<Response<Body>, RuntimeError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(method = %method, path = path, "Request to Docker API");

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json")
            .body(Body::empty())?;

        Ok(self.client.request(request).await?)
    }

    /// Pass successful responses through; turn the rest into errors.
    async fn check(response: Response<Body>) -> Result<Response<Body>, RuntimeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = hyper::body::to_bytes(response.into_body()).await?;
        let message = serde_json::from_slice::<ErrorMessage>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());

        Err(status_error(status, message))
    }
}

fn status_error(status: StatusCode, message: String) -> RuntimeError {
    match status {
        StatusCode::NOT_FOUND => RuntimeError::NotFound(message),
        StatusCode::CONFLICT => RuntimeError::Conflict(message),
        _ => RuntimeError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

impl From<hyper::Error> for RuntimeError {
    fn from(err: hyper::Error) -> Self {
        RuntimeError::Transport(err.to_string())
    }
}

impl From<hyper::http::Error> for RuntimeError {
    fn from(err: hyper::http::Error) -> Self {
        RuntimeError::Transport(err.to_string())
    }
}

/// Percent-encode a query parameter value.
pub fn encode_query(value: &str) -> String {
    encode(value, b"")
}

/// Percent-encode a path segment that may itself contain `/` and `:`
/// (image references like `registry:5000/team/app:v1`).
pub fn encode_path(value: &str) -> String {
    encode(value, b"/:@")
}

fn encode(value: &str, keep: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) || keep.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

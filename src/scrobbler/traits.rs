// Common traits for talking to the scrobbling service

use thiserror::Error;

/// Raw HTTP outcome of a request that reached the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rate limiting or server-side failure, worth retrying
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// A request that produced no HTTP response at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("could not resolve host: {0}")]
    Resolve(String),
    #[error("operation timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Other(String),
}

/// Blocking HTTP transport used by the API client and the queue's reachability check
pub trait Transport: Send + Sync {
    /// POST an already-encoded form body
    fn post_form(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError>;

    /// Lightweight HEAD request, true if the server answered at all
    fn probe(&self, url: &str) -> bool;
}

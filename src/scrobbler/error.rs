// Error taxonomy for Last.fm requests

use super::traits::TransportError;
use thiserror::Error;

/// Why a Last.fm operation did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No session key; the user has to authenticate first
    #[error("not authenticated")]
    NotAuthenticated,

    /// API key or secret missing from the configuration
    #[error("missing API credentials")]
    MissingCredentials,

    /// Artist or title empty
    #[error("track is missing artist or title")]
    MissingMetadata,

    /// The request never got an HTTP response
    #[error("offline: {0}")]
    Offline(#[from] TransportError),

    /// Final HTTP status after retries was not 2xx
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// Application-level `error` field in the response body
    #[error("Last.fm error {code}: {message}")]
    Api { code: i64, message: String },

    /// Body was not JSON or lacked the expected fields
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Connectivity problem rather than a problem with the request or session
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }

    /// Server rejected the session outright
    pub fn is_session_rejection(&self) -> bool {
        matches!(self, Self::Http { status: 401 | 403 })
    }
}

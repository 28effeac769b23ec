use std::fmt;

use thiserror::Error;

use crate::common::types::AnyError;

/// Failures raised while parsing playlists or fetching segment data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HlsError {
    #[error("malformed playlist: {0}")]
    MalformedPlaylist(String),

    /// HTTP 403 on a key, map or segment. The signed URL has expired and the whole
    /// pipeline must be re-resolved.
    #[error("authorization expired for {url}")]
    AuthorizationExpired { url: String },

    #[error("fetch failed for {url}: {reason}")]
    TransientFetch { url: String, reason: String },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("stream closed")]
    Cancelled,
}

impl HlsError {
    pub fn is_authorization_expired(&self) -> bool {
        matches!(self, Self::AuthorizationExpired { .. })
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    pub fn transient(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::TransientFetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of the stream-url endpoint that hands out the HLS entry playlist.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("stream api request failed: {0}")]
    Request(String),

    #[error("stream api returned status {0}")]
    Status(u16),

    #[error("stream api error: {0}")]
    ApiStatus(String),

    #[error("no stream path returned")]
    MissingStreamPath,

    #[error("failed to decrypt stream path: {0}")]
    StreamPath(String),
}

/// Exception severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// The single failure event a caller sees when playback cannot continue.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PlaybackError {
    pub severity: Severity,
    pub message: String,
    #[source]
    pub cause: Option<AnyError>,
}

impl PlaybackError {
    pub fn new(severity: Severity, message: impl Into<String>, cause: Option<AnyError>) -> Self {
        Self {
            severity,
            message: message.into(),
            cause,
        }
    }

    /// Failure reported as "Gaana playback failed", keeping the underlying cause.
    pub fn playback_failed(cause: impl Into<AnyError>) -> Self {
        let cause = cause.into();
        Self::new(
            Severity::Suspicious,
            format!("Gaana playback failed: {}", cause),
            Some(cause),
        )
    }
}

impl From<ResolveError> for PlaybackError {
    fn from(err: ResolveError) -> Self {
        Self::new(
            Severity::Common,
            format!("Could not resolve Gaana stream: {}", err),
            Some(Box::new(err)),
        )
    }
}

impl From<HlsError> for PlaybackError {
    fn from(err: HlsError) -> Self {
        Self::playback_failed(err)
    }
}

impl From<HlsError> for std::io::Error {
    fn from(err: HlsError) -> Self {
        let kind = match &err {
            HlsError::AuthorizationExpired { .. } => std::io::ErrorKind::PermissionDenied,
            HlsError::Cancelled => std::io::ErrorKind::ConnectionAborted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

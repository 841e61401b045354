// src/error.rs
//
// Classified error type for every storage operation.
//
// Callers decide their own retry policy, so each failure is reported with one of
// a small set of kinds and the object it concerns. Transport-level retries are
// left to the object_store client; nothing here retries.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// The object an operation was addressing, rendered as `az://account/container/key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Target {
    pub account: String,
    pub container: String,
    pub key: String,
}

impl Target {
    pub fn new(account: impl Into<String>, container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            key: key.into(),
        }
    }

    /// Same account/container, different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            account: self.account.clone(),
            container: self.container.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "az://{}/{}/{}", self.account, self.container, self.key)
    }
}

/// Coarse classification surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedQuery,
    Authentication,
    NotFound,
    TransientTransport,
    PermissionDenied,
    UnexpectedBackend,
    Io,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::MalformedQuery => "MalformedQuery",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::TransientTransport => "TransientTransportError",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::UnexpectedBackend => "UnexpectedBackendError",
            ErrorKind::Io => "LocalIoError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("MalformedQuery: '{query}': {reason}")]
    MalformedQuery { query: String, reason: String },

    #[error("AuthenticationError: account '{account}': {reason}")]
    Authentication { account: String, reason: String },

    #[error("NotFound: {target}: {message}")]
    NotFound { target: Target, message: String },

    #[error("TransientTransportError: {target}: {message}")]
    TransientTransport { target: Target, message: String },

    #[error("PermissionDenied: {target}: {message}")]
    PermissionDenied { target: Target, message: String },

    #[error("UnexpectedBackendError: {target}: {message}")]
    UnexpectedBackend { target: Target, message: String },

    #[error("local I/O error for {target}: {source}")]
    Io {
        target: Target,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled: {target}")]
    Cancelled { target: Target },
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::MalformedQuery { .. } => ErrorKind::MalformedQuery,
            StorageError::Authentication { .. } => ErrorKind::Authentication,
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::TransientTransport { .. } => ErrorKind::TransientTransport,
            StorageError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            StorageError::UnexpectedBackend { .. } => ErrorKind::UnexpectedBackend,
            StorageError::Io { .. } => ErrorKind::Io,
            StorageError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Only transport hiccups are worth a caller-side retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientTransport
    }

    pub fn malformed(query: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::MalformedQuery {
            query: query.into(),
            reason: reason.into(),
        }
    }

    pub fn auth(account: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::Authentication {
            account: account.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(target: &Target, message: impl Into<String>) -> Self {
        StorageError::NotFound {
            target: target.clone(),
            message: message.into(),
        }
    }

    pub fn io(target: &Target, source: std::io::Error) -> Self {
        StorageError::Io {
            target: target.clone(),
            source,
        }
    }

    pub fn cancelled(target: &Target) -> Self {
        StorageError::Cancelled { target: target.clone() }
    }

    /// Classify an `object_store` failure for `target`.
    pub fn from_object_store(target: &Target, err: object_store::Error) -> Self {
        let message = err.to_string();
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                target: target.clone(),
                message,
            },
            object_store::Error::PermissionDenied { .. } => StorageError::PermissionDenied {
                target: target.clone(),
                message,
            },
            object_store::Error::Unauthenticated { .. } => StorageError::Authentication {
                account: target.account.clone(),
                reason: format!("{target}: {message}"),
            },
            object_store::Error::InvalidPath { .. } => StorageError::MalformedQuery {
                query: target.to_string(),
                reason: message,
            },
            _ => classify_message(target, message),
        }
    }

    /// Classify an HTTP status returned by a raw REST call.
    pub fn from_status(target: &Target, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => StorageError::Authentication {
                account: target.account.clone(),
                reason: format!("{target}: {message}"),
            },
            403 => StorageError::PermissionDenied {
                target: target.clone(),
                message,
            },
            404 => StorageError::NotFound {
                target: target.clone(),
                message,
            },
            s if is_transient_status(s) => StorageError::TransientTransport {
                target: target.clone(),
                message,
            },
            _ => StorageError::UnexpectedBackend {
                target: target.clone(),
                message,
            },
        }
    }

    /// Classify a `reqwest` failure (connection, timeout, body read).
    pub fn from_http(target: &Target, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(target, status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return StorageError::TransientTransport {
                target: target.clone(),
                message: err.to_string(),
            };
        }
        StorageError::UnexpectedBackend {
            target: target.clone(),
            message: err.to_string(),
        }
    }

    /// Map a local I/O failure, unwrapping an `object_store` error carried inside it.
    pub fn from_io(target: &Target, err: std::io::Error) -> Self {
        let wraps_backend = err
            .get_ref()
            .map(|inner| inner.is::<object_store::Error>())
            .unwrap_or(false);
        if !wraps_backend {
            return StorageError::Io {
                target: target.clone(),
                source: err,
            };
        }
        match err.into_inner().map(|inner| inner.downcast::<object_store::Error>()) {
            Some(Ok(inner)) => Self::from_object_store(target, *inner),
            _ => StorageError::UnexpectedBackend {
                target: target.clone(),
                message: "unreadable wrapped backend error".to_string(),
            },
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

static STATUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)status(?: code)?:?\s*(\d{3})").expect("static regex"));

/// Generic backend errors only carry text; recover the HTTP status or the
/// transport failure mode from it.
fn classify_message(target: &Target, message: String) -> StorageError {
    if let Some(status) = STATUS_RE
        .captures(&message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        return StorageError::from_status(target, status, message);
    }

    let lower = message.to_lowercase();
    let transient = ["timed out", "timeout", "connection reset", "connection refused", "connection closed", "error sending request", "broken pipe"];
    if transient.iter().any(|needle| lower.contains(needle)) {
        return StorageError::TransientTransport {
            target: target.clone(),
            message,
        };
    }

    StorageError::UnexpectedBackend {
        target: target.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::new("acct", "data", "dir/file.txt")
    }

    #[test]
    fn test_target_display() {
        assert_eq!(target().to_string(), "az://acct/data/dir/file.txt");
    }

    #[test]
    fn test_not_found_mapping() {
        let err = object_store::Error::NotFound {
            path: "dir/file.txt".to_string(),
            source: "missing".into(),
        };
        let mapped = StorageError::from_object_store(&target(), err);
        assert_eq!(mapped.kind(), ErrorKind::NotFound);
        assert!(mapped.to_string().contains("data/dir/file.txt"));
        assert!(!mapped.is_retryable());
    }

    #[test]
    fn test_generic_status_mapping() {
        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "Server returned non-2xx status code: 503 Service Unavailable".into(),
        };
        let mapped = StorageError::from_object_store(&target(), err);
        assert_eq!(mapped.kind(), ErrorKind::TransientTransport);
        assert!(mapped.is_retryable());

        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "Server returned non-2xx status code: 403 Forbidden".into(),
        };
        assert_eq!(
            StorageError::from_object_store(&target(), err).kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_generic_timeout_is_transient() {
        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "error sending request: operation timed out".into(),
        };
        assert_eq!(
            StorageError::from_object_store(&target(), err).kind(),
            ErrorKind::TransientTransport
        );
    }

    #[test]
    fn test_unclassified_is_unexpected() {
        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "something odd".into(),
        };
        assert_eq!(
            StorageError::from_object_store(&target(), err).kind(),
            ErrorKind::UnexpectedBackend
        );
    }

    #[test]
    fn test_status_mapping() {
        let t = target();
        assert_eq!(StorageError::from_status(&t, 401, "x").kind(), ErrorKind::Authentication);
        assert_eq!(StorageError::from_status(&t, 403, "x").kind(), ErrorKind::PermissionDenied);
        assert_eq!(StorageError::from_status(&t, 404, "x").kind(), ErrorKind::NotFound);
        assert_eq!(StorageError::from_status(&t, 429, "x").kind(), ErrorKind::TransientTransport);
        assert_eq!(StorageError::from_status(&t, 409, "x").kind(), ErrorKind::UnexpectedBackend);
    }

    #[test]
    fn test_io_wrapping_object_store_error() {
        let inner = object_store::Error::NotFound {
            path: "dir/file.txt".to_string(),
            source: "missing".into(),
        };
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, inner);
        assert_eq!(StorageError::from_io(&target(), io).kind(), ErrorKind::NotFound);

        let plain = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "local fs");
        assert_eq!(StorageError::from_io(&target(), plain).kind(), ErrorKind::Io);
    }
}

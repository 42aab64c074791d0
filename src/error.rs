//! Error types for the paperless-stamp library.
//!
//! A single [`StampError`] enum covers every failure the worker can see,
//! grouped into the classes the orchestrator cares about:
//!
//! * **Store errors**: [`StampError::Connection`], [`StampError::Auth`] and
//!   [`StampError::Api`] come from the document-management service.
//! * **Stamp errors**: [`StampError::Generation`] (bad stamp inputs) and
//!   [`StampError::Merge`] (encrypted or unreadable PDF).
//!
//! Inside one document's pipeline every class is document-scoped: the
//! worker converts it into the `stamp:error` transition. Only errors raised
//! while *discovering* documents escape a poll cycle.

use std::fmt;
use thiserror::Error;

/// All errors returned by the paperless-stamp library.
#[derive(Debug, Error)]
pub enum StampError {
    // ── Store errors ──────────────────────────────────────────────────────
    /// The store could not be reached (DNS, refused connection, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The token is invalid or lacks permission (HTTP 401 / 403).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The store rejected a request.
    #[error("{}", api_message(*status, detail))]
    Api { status: u16, detail: String },

    // ── Stamp errors ──────────────────────────────────────────────────────
    /// Invalid stamp inputs: empty stamp list, bad page size, bad color.
    #[error("Stamp generation failed: {0}")]
    Generation(String),

    /// The overlay could not be merged into the original document.
    #[error("{}", merge_message(*cause, detail))]
    Merge { cause: MergeCause, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, undecodable response).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a merge failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeCause {
    /// The document cannot be opened without a user password.
    Encrypted,
    /// The document could not be parsed or is missing page 1.
    Invalid,
}

/// Coarse error classification, used for structured log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Auth,
    Api,
    Generation,
    Merge,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Auth => "auth",
            ErrorKind::Api => "api",
            ErrorKind::Generation => "generation",
            ErrorKind::Merge => "merge",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl StampError {
    /// Shorthand for an encrypted-document merge failure.
    pub fn encrypted(detail: impl Into<String>) -> Self {
        StampError::Merge {
            cause: MergeCause::Encrypted,
            detail: detail.into(),
        }
    }

    /// Shorthand for an unreadable-document merge failure.
    pub fn invalid_pdf(detail: impl Into<String>) -> Self {
        StampError::Merge {
            cause: MergeCause::Invalid,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StampError::Connection(_) => ErrorKind::Connectivity,
            StampError::Auth(_) => ErrorKind::Auth,
            StampError::Api { .. } => ErrorKind::Api,
            StampError::Generation(_) => ErrorKind::Generation,
            StampError::Merge { .. } => ErrorKind::Merge,
            StampError::InvalidConfig(_) => ErrorKind::Config,
            StampError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-like status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            StampError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn api_message(status: u16, detail: &str) -> String {
    if detail.is_empty() {
        format!("API error {status}")
    } else {
        format!("API error {status}: {detail}")
    }
}

fn merge_message(cause: MergeCause, detail: &str) -> String {
    match cause {
        MergeCause::Encrypted => format!("PDF is encrypted: {detail}"),
        MergeCause::Invalid => format!("Invalid PDF: {detail}"),
    }
}

//! Error types for the SEFAZ client.
//!
//! This module defines all error types that can occur while building,
//! signing and transmitting fiscal documents, including the taxonomy the
//! submission state machine depends on: validation failures are raised
//! before any network call, transient network failures drive the fallback
//! chain, and authority rejections preserve the authority's own status
//! code and message verbatim.

use thiserror::Error;

/// Result type alias using [`SefazError`].
pub type Result<T> = std::result::Result<T, SefazError>;

/// Errors that can occur during fiscal document operations.
#[derive(Debug, Error)]
pub enum SefazError {
    /// Malformed input model, rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rendered or received XML fails structural checks (element order,
    /// namespace, self-closing tags, QR supplement hygiene).
    #[error("Structural error: {0}")]
    Structural(String),

    /// The element referenced by the signature `Id` was not found, or
    /// signature construction failed.
    #[error("Signature error: {0}")]
    Signature(String),

    /// PKCS#12 container could not be parsed: wrong password, missing
    /// private-key or certificate bag, or expired material.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Connection reset, timeout or DNS failure. Triggers the SOAP
    /// fallback chain; surfaced only once all fallbacks are exhausted.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// A well-formed authority response carrying a failure status.
    /// Never retried; `status` and `message` are the authority's own.
    #[error("Authority rejection {status}: {message}")]
    AuthorityRejection {
        /// Numeric status code (`cStat`) as received.
        status: String,
        /// Reason text (`xMotivo`) as received.
        message: String,
    },

    /// The `tpAmb` embedded in signed XML disagrees with the configured
    /// environment. Always fatal; never auto-corrected.
    #[error("Environment mismatch: document tpAmb is '{document}', client is configured for '{configured}'")]
    ProtocolMismatch {
        /// Environment flag found in the document.
        document: String,
        /// Environment the client is configured for.
        configured: String,
    },

    /// TLS configuration or connection error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// XML parser-level error (malformed markup, not a structural check).
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SefazError {
    /// Create a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a structural error with the given message.
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    /// Create a signature error with the given message.
    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature(msg.into())
    }

    /// Create a certificate error with the given message.
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate(msg.into())
    }

    /// Create a transient network error with the given message.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    /// Create an authority rejection preserving the authority's wording.
    pub fn rejection(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthorityRejection {
            status: status.into(),
            message: message.into(),
        }
    }

    /// Create an environment mismatch error.
    pub fn mismatch(document: impl Into<String>, configured: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            document: document.into(),
            configured: configured.into(),
        }
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Returns true if this error should drive the SOAP fallback chain.
    ///
    /// Only transport-level failures are retried. An authority rejection
    /// is a final answer, and submitting the same signed document twice
    /// is not idempotent at the authority.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientNetwork(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Returns the authority status code if this is a rejection.
    pub fn authority_status(&self) -> Option<&str> {
        match self {
            Self::AuthorityRejection { status, .. } => Some(status),
            _ => None,
        }
    }
}

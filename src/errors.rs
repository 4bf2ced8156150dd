//! Error types for the git-transport crate.
//!
//! This module defines the unified error enumeration returned by the selector,
//! sessions and backends. It integrates with `thiserror` to provide `Display`
//! implementations and source chaining.
//!
//! Notes:
//! - URLs carried in variants are anonymized before the error is built.
//! - An unrecognized option is not an error; see `OptionResult::NotRecognized`.
//! - A rejected ref in a push is not an error either; it is reported per ref
//!   in the `PushReport`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the transport layer.
pub enum TransportError {
    /// No backend matches the URL; no session was created.
    #[error("Unable to find a transport for `{0}`")]
    UnsupportedScheme(String),

    /// The option is meaningful for the backend but its value failed validation.
    #[error("Invalid value for transport option `{name}`: {reason}")]
    OptionInvalid { name: String, reason: String },

    /// Ref listing failed (unreachable remote, authentication, protocol mismatch).
    #[error("Could not read refs from `{url}`: {source}")]
    DiscoveryFailed {
        url: String,
        #[source]
        source: Box<TransportError>,
    },

    /// The fetch call failed as a whole.
    #[error("Fetch from `{url}` failed: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: Box<TransportError>,
    },

    /// The push call failed as a whole (individual ref rejections are not errors).
    #[error("Push to `{url}` failed: {source}")]
    PushFailed {
        url: String,
        #[source]
        source: Box<TransportError>,
    },

    /// Backend cleanup reported a problem.
    #[error("Disconnect from `{url}` failed: {source}")]
    DisconnectFailed {
        url: String,
        #[source]
        source: Box<TransportError>,
    },

    /// Refspec could not be parsed or resolved against the known refs.
    #[error("Invalid refspec: {0}")]
    InvalidRefspec(String),

    /// A fetch was requested while the previous fetch's pack lock is still held.
    #[error("Pack lock `{}` is still held; release it before fetching again", .0.display())]
    PackLockHeld(PathBuf),

    /// A previous ref discovery failed; only disconnect is allowed now.
    #[error("Transport session for `{0}` is unusable after a failed ref discovery")]
    SessionPoisoned(String),

    /// The remote helper process misbehaved or produced malformed output.
    #[error("Remote helper error: {0}")]
    Helper(String),

    /// The backend does not implement this operation.
    #[error("Operation `{0}` is not supported by this transport")]
    UnsupportedOperation(&'static str),

    /// Failure reported by the remote side.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Configuration could not be parsed.
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error from the underlying socket, pipe or file.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl TransportError {
    pub fn helper(msg: impl Into<String>) -> Self {
        TransportError::Helper(msg.into())
    }

    pub fn invalid_refspec(msg: impl Into<String>) -> Self {
        TransportError::InvalidRefspec(msg.into())
    }
}

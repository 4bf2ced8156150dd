/// Transport Module
///
/// This module provides a protocol-agnostic facade for talking to a remote repository.
/// A URL is classified into a protocol family, bound to a backend through a registered
/// `Connector`, and wrapped in a `Session` that offers option negotiation, ref discovery,
/// fetch with pack locking, push with per-ref status, and disconnect.
pub mod core;
pub mod helper;
pub mod pack_lock;
pub mod push;
pub mod selector;
pub mod types;
pub mod utils;

// Re-export main interfaces
pub use core::{Backend, Session};
pub use helper::{HelperBackend, HelperConnector, ProcessHelper};
pub use pack_lock::PackLock;
pub use push::{LocalRefs, PushReport, Refspec};
pub use selector::{Connector, Transport, TransportFamily, TransportKind};
pub use types::*;
pub use utils::anonymize_url;

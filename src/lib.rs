//! git-transport: a protocol-agnostic transport layer for talking to remote Git repositories.
//!
//! Goals
//! - One calling surface for every protocol family (native git, SSH, HTTP, local, bundle,
//!   remote helpers), selected from the URL alone.
//! - Per-session state kept generic: ref cache per direction, pack lock, output settings.
//! - Per-ref push outcomes instead of all-or-nothing failures.
//!
//! Core Capabilities
//! - Selection: `Transport::get` classifies a URL and binds the registered `Connector`.
//! - Options: `Session::set_option` validates the well-known options and reports
//!   applied, not recognized or invalid.
//! - Discovery: `Session::get_refs` lists refs at most once per direction.
//! - Fetch: `Session::fetch_refs` with an optional pack lock handed to the caller.
//! - Push: `Session::push` resolves refspecs, classifies fast-forwards and reports per ref.
//! - Remote helpers: `HelperBackend` drives `git-remote-<name>` programs.
//!
//! Modules
//! - `transport`: selector, session, backends, push orchestration, pack locks, URL helpers.
//! - `config`: transport settings and remote descriptors.
//! - `errors`: unified error types.
//! - `hash`: object ids as they appear on the wire.

pub mod config;
pub mod errors;
pub mod hash;
pub mod transport;

// Core traits and types that external users need to implement/use
pub use config::{RemoteDescriptor, TransportConfig};
pub use errors::TransportError;
pub use hash::{HashKind, ObjectHash};
pub use transport::{
    Backend, Connector, LocalRefs, OptionResult, PushFlags, PushReport, Ref, RefUpdate, Session,
    Transport, TransportKind,
};

//! Core transport session
//!
//! This module provides the `Backend` trait every protocol family implements and the
//! `Session` handle callers use regardless of which backend is bound. The session owns
//! the generic state: the per-direction ref cache, the pack-lock slot and the output
//! settings handed to each backend call.
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RemoteDescriptor;
use crate::errors::TransportError;
use crate::transport::pack_lock::PackLock;
use crate::transport::selector::TransportKind;
use crate::transport::types::{
    FetchOutcome, OperationContext, OptionResult, PushFlags, Ref, RefUpdate, TransportOption,
    Verbosity,
};
use crate::transport::utils::anonymize_url;

/// Backend trait for one protocol family
///
/// A backend owns all of its protocol state (sockets, child processes, negotiated
/// capabilities). The session never looks inside it; it only calls these operations.
#[async_trait]
pub trait Backend: Send {
    /// Offer an option. Backends without a use for it must answer `NotRecognized`.
    async fn set_option(&mut self, _option: &TransportOption) -> OptionResult {
        OptionResult::NotRecognized
    }

    /// List the remote refs, for fetching or for pushing.
    async fn list_refs(
        &mut self,
        for_push: bool,
        ctx: &OperationContext,
    ) -> Result<Vec<Ref>, TransportError>;

    /// Transfer the objects needed to make every ref in `wanted` resolvable locally.
    async fn fetch(
        &mut self,
        _wanted: &[Ref],
        _ctx: &OperationContext,
    ) -> Result<FetchOutcome, TransportError> {
        Err(TransportError::UnsupportedOperation("fetch"))
    }

    /// Send `updates` and record a status on each one.
    ///
    /// `Err` means the call as a whole failed. A refused ref is reported through
    /// `RefUpdate::reject` instead.
    async fn push_refs(
        &mut self,
        _updates: &mut [RefUpdate],
        _flags: PushFlags,
        _ctx: &OperationContext,
    ) -> Result<(), TransportError> {
        Err(TransportError::UnsupportedOperation("push"))
    }

    /// Release sockets, processes and any in-flight state.
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A connection to one remote through one bound backend.
///
/// Every operation takes `&mut self`, so a session is used by one caller at a time
/// and operations run in the order they are awaited. `disconnect` consumes the
/// session, which makes any later use a compile error:
///
/// ```compile_fail
/// # async fn demo(session: git_transport::transport::Session) {
/// let mut session = session;
/// session.disconnect().await.ok();
/// session.get_refs(false).await.ok();
/// # }
/// ```
pub struct Session {
    remote: Arc<RemoteDescriptor>,
    url: String,
    display_url: String,
    kind: TransportKind,
    backend: Box<dyn Backend>,
    /// Indexed by `for_push as usize`.
    remote_refs: [Option<Vec<Ref>>; 2],
    pub(crate) pack_lock: Option<PackLock>,
    verbosity: Verbosity,
    progress: bool,
    poisoned: bool,
}

impl Session {
    /// Bind `backend` to `url`. Usually called by `Transport::get`.
    pub fn new(
        remote: Arc<RemoteDescriptor>,
        url: impl Into<String>,
        kind: TransportKind,
        backend: Box<dyn Backend>,
    ) -> Self {
        let url = url.into();
        Self {
            remote,
            display_url: anonymize_url(&url),
            url,
            kind,
            backend,
            remote_refs: [None, None],
            pack_lock: None,
            verbosity: Verbosity::default(),
            progress: false,
            poisoned: false,
        }
    }

    pub fn remote(&self) -> &RemoteDescriptor {
        &self.remote
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL with credentials stripped, for messages.
    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    pub fn kind(&self) -> &TransportKind {
        &self.kind
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    /// Force progress reporting even when the output is not a terminal.
    pub fn set_progress(&mut self, progress: bool) {
        self.progress = progress;
    }

    pub fn context(&self) -> OperationContext {
        OperationContext {
            verbosity: self.verbosity,
            progress: self.progress,
        }
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), TransportError> {
        if self.poisoned {
            return Err(TransportError::SessionPoisoned(self.display_url.clone()));
        }
        Ok(())
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// Validate `name`/`value` and offer the option to the backend.
    ///
    /// Validation failures of the well-known options are answered here without
    /// reaching the backend. `NotRecognized` leaves the session unchanged and only
    /// produces a diagnostic.
    pub async fn set_option(&mut self, name: &str, value: Option<&str>) -> OptionResult {
        let option = match TransportOption::parse(name, value) {
            Ok(option) => option,
            Err(reason) => {
                tracing::debug!("option {name} rejected before reaching backend: {reason}");
                return OptionResult::Invalid(reason);
            }
        };

        let result = self.backend.set_option(&option).await;
        match &result {
            OptionResult::Applied => tracing::debug!("option {name} applied"),
            OptionResult::NotRecognized => tracing::warn!(
                "option {name} is ignored by the {} transport for {}",
                self.kind,
                self.display_url
            ),
            OptionResult::Invalid(reason) => {
                tracing::debug!("option {name} rejected by backend: {reason}")
            }
        }
        result
    }

    /// `set_option` with `Invalid` turned into an error.
    /// Returns whether the backend applied the option.
    pub async fn apply_option(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<bool, TransportError> {
        match self.set_option(name, value).await {
            OptionResult::Applied => Ok(true),
            OptionResult::NotRecognized => Ok(false),
            OptionResult::Invalid(reason) => Err(TransportError::OptionInvalid {
                name: name.to_string(),
                reason,
            }),
        }
    }

    /// Remote refs for the given direction, listed by the backend at most once.
    ///
    /// A failed listing leaves the session usable for `disconnect` only.
    pub async fn get_refs(&mut self, for_push: bool) -> Result<&[Ref], TransportError> {
        self.ensure_usable()?;
        let slot = usize::from(for_push);

        if self.remote_refs[slot].is_none() {
            let ctx = self.context();
            match self.backend.list_refs(for_push, &ctx).await {
                Ok(refs) => {
                    tracing::debug!(
                        "discovered {} refs from {} (for_push: {for_push})",
                        refs.len(),
                        self.display_url
                    );
                    self.remote_refs[slot] = Some(refs);
                }
                Err(e) => {
                    self.poisoned = true;
                    return Err(TransportError::DiscoveryFailed {
                        url: self.display_url.clone(),
                        source: Box::new(e),
                    });
                }
            }
        } else {
            tracing::debug!("using cached refs for {} (for_push: {for_push})", self.display_url);
        }

        Ok(self.remote_refs[slot].as_deref().unwrap_or_default())
    }

    /// Fetch-direction refs, if they have been discovered already.
    pub fn remote_refs(&self) -> Option<&[Ref]> {
        self.remote_refs[0].as_deref()
    }

    /// Fetch the objects behind `wanted`, which may be any subset of the discovered refs.
    ///
    /// When the backend defers pack finalization, the session keeps the resulting
    /// lock until `unlock_pack` or `take_pack_lock`.
    pub async fn fetch_refs(&mut self, wanted: &[Ref]) -> Result<(), TransportError> {
        self.ensure_usable()?;
        if let Some(lock) = &self.pack_lock {
            return Err(TransportError::PackLockHeld(lock.path().to_path_buf()));
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let ctx = self.context();
        let outcome = self
            .backend
            .fetch(wanted, &ctx)
            .await
            .map_err(|e| TransportError::FetchFailed {
                url: self.display_url.clone(),
                source: Box::new(e),
            })?;

        tracing::info!("fetched {} refs from {}", wanted.len(), self.display_url);
        if let Some(path) = outcome.pack_lockfile.filter(|p| !p.as_os_str().is_empty()) {
            tracing::debug!("holding pack lock {}", path.display());
            self.pack_lock = Some(PackLock::new(path));
        }
        Ok(())
    }

    pub fn pack_lock(&self) -> Option<&PackLock> {
        self.pack_lock.as_ref()
    }

    /// Hand the pack lock to the caller, who must then release it.
    pub fn take_pack_lock(&mut self) -> Option<PackLock> {
        self.pack_lock.take()
    }

    /// Release the pack lock. Returns `Ok(false)` when no lock is held, so a second
    /// call after a successful release is a no-op.
    pub fn unlock_pack(&mut self) -> Result<bool, TransportError> {
        match self.pack_lock.take() {
            Some(lock) => {
                lock.release()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear the session down. Any pack lock still held is released first.
    pub async fn disconnect(mut self) -> Result<(), TransportError> {
        if let Some(lock) = self.pack_lock.take() {
            tracing::warn!(
                "releasing pack lock {} on disconnect from {}",
                lock.path().display(),
                self.display_url
            );
            if let Err(e) = lock.release() {
                tracing::warn!("failed to release pack lock: {e}");
            }
        }

        self.backend
            .disconnect()
            .await
            .map_err(|e| TransportError::DisconnectFailed {
                url: self.display_url.clone(),
                source: Box::new(e),
            })?;
        tracing::debug!("disconnected from {}", self.display_url);
        Ok(())
    }
}

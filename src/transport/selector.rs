//! Transport selection: classify a remote URL, pick the connector registered for that
//! family and bind the backend it builds into a `Session`.
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RemoteDescriptor, TransportConfig};
use crate::errors::TransportError;
use crate::transport::core::{Backend, Session};
use crate::transport::helper::HelperConnector;
use crate::transport::types::{OptionResult, TransportOption, Verbosity};
use crate::transport::utils::{
    anonymize_url, is_local, is_scp_like, split_helper_prefix, url_scheme,
};

const BUNDLE_SIGNATURES: &[&[u8]] = &[b"# v2 git bundle\n", b"# v3 git bundle\n"];

/// A regular file that starts with a bundle signature. Anything unreadable is
/// not a bundle and is left for the local transport to report.
fn is_bundle(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let mut header = [0u8; 16];
    let read = File::open(path).and_then(|mut file| file.read_exact(&mut header));
    match read {
        Ok(()) => BUNDLE_SIGNATURES.iter().any(|sig| header.starts_with(sig)),
        Err(e) => {
            tracing::debug!("{} is not a readable bundle: {e}", path.display());
            false
        }
    }
}

/// The protocol family a URL resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// `git://` daemon protocol
    Native,
    /// `ssh://` or scp-like `[user@]host:path`
    Ssh,
    /// `http(s)://` and `ftp(s)://`; smart or dumb is probed by the connector
    Http,
    /// a path or `file://` URL
    Local,
    /// a bundle file on disk
    Bundle,
    /// an external `git-remote-<name>` program
    Helper { name: String },
}

/// Registry key for connectors. `TransportKind` without the helper name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFamily {
    Native,
    Ssh,
    Http,
    Local,
    Bundle,
    Helper,
}

impl TransportKind {
    /// Classify `url`. An explicit `vcs` on the remote wins over the URL form.
    pub fn classify(
        url: &str,
        remote: Option<&RemoteDescriptor>,
    ) -> Result<TransportKind, TransportError> {
        if let Some(vcs) = remote.and_then(|r| r.vcs.as_deref()) {
            return Ok(TransportKind::Helper {
                name: vcs.to_string(),
            });
        }
        if url.is_empty() {
            return Err(TransportError::UnsupportedScheme(String::new()));
        }
        if let Some((name, _)) = split_helper_prefix(url) {
            return Ok(TransportKind::Helper {
                name: name.to_string(),
            });
        }

        if let Some(scheme) = url_scheme(url) {
            return Ok(match scheme.to_ascii_lowercase().as_str() {
                "git" => TransportKind::Native,
                "ssh" | "git+ssh" | "ssh+git" => TransportKind::Ssh,
                "http" | "https" | "ftp" | "ftps" => TransportKind::Http,
                "file" => TransportKind::Local,
                other => TransportKind::Helper {
                    name: other.to_string(),
                },
            });
        }
        if let Some((scheme, _)) = url.split_once("://") {
            if !is_local(url) {
                return Err(TransportError::UnsupportedScheme(scheme.to_string()));
            }
        }

        if is_local(url) {
            if is_bundle(Path::new(url)) {
                return Ok(TransportKind::Bundle);
            }
            return Ok(TransportKind::Local);
        }
        if is_scp_like(url) {
            return Ok(TransportKind::Ssh);
        }
        Err(TransportError::UnsupportedScheme(anonymize_url(url)))
    }

    pub fn family(&self) -> TransportFamily {
        match self {
            TransportKind::Native => TransportFamily::Native,
            TransportKind::Ssh => TransportFamily::Ssh,
            TransportKind::Http => TransportFamily::Http,
            TransportKind::Local => TransportFamily::Local,
            TransportKind::Bundle => TransportFamily::Bundle,
            TransportKind::Helper { .. } => TransportFamily::Helper,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Native => write!(f, "git"),
            TransportKind::Ssh => write!(f, "ssh"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Local => write!(f, "local"),
            TransportKind::Bundle => write!(f, "bundle"),
            TransportKind::Helper { name } => write!(f, "remote-{name}"),
        }
    }
}

/// The address a remote helper is given: the part after `<name>::`, or the whole URL.
pub fn helper_address(url: &str) -> &str {
    split_helper_prefix(url).map_or(url, |(_, address)| address)
}

/// Builds a backend for one protocol family.
///
/// Connecting may open a socket or spawn a process right away, or defer that to
/// the first operation; either way the returned backend must accept `disconnect`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        remote: &RemoteDescriptor,
        url: &str,
        kind: &TransportKind,
        config: &TransportConfig,
    ) -> Result<Box<dyn Backend>, TransportError>;
}

/// The transport selector.
///
/// Holds the connectors the client has registered per family. Helper kinds are
/// looked up by helper name first, then by family, and finally fall back to
/// spawning `git-remote-<name>` when the configuration allows helpers.
#[derive(Clone)]
pub struct Transport {
    config: TransportConfig,
    connectors: HashMap<TransportFamily, Arc<dyn Connector>>,
    helpers: HashMap<String, Arc<dyn Connector>>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            connectors: HashMap::new(),
            helpers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn register(&mut self, family: TransportFamily, connector: Arc<dyn Connector>) {
        self.connectors.insert(family, connector);
    }

    /// Serve the helper `name` in-process instead of spawning a program.
    pub fn register_helper(&mut self, name: impl Into<String>, connector: Arc<dyn Connector>) {
        self.helpers.insert(name.into(), connector);
    }

    pub fn with_connector(mut self, family: TransportFamily, connector: Arc<dyn Connector>) -> Self {
        self.register(family, connector);
        self
    }

    fn connector_for(&self, kind: &TransportKind) -> Option<Arc<dyn Connector>> {
        if let TransportKind::Helper { name } = kind {
            if let Some(connector) = self.helpers.get(name) {
                return Some(connector.clone());
            }
            if let Some(connector) = self.connectors.get(&TransportFamily::Helper) {
                return Some(connector.clone());
            }
            return self
                .config
                .allow_helpers
                .then(|| Arc::new(HelperConnector) as Arc<dyn Connector>);
        }
        self.connectors.get(&kind.family()).cloned()
    }

    /// Returns a session bound to the backend matching `url`.
    ///
    /// Fails with `UnsupportedScheme`, without building a session, when no
    /// connector serves the URL.
    pub async fn get(
        &self,
        remote: Arc<RemoteDescriptor>,
        url: &str,
    ) -> Result<Session, TransportError> {
        let display_url = anonymize_url(url);
        let kind = TransportKind::classify(url, Some(remote.as_ref()))?;
        let connector = self.connector_for(&kind).ok_or_else(|| {
            tracing::debug!("no connector registered for {kind} transport");
            TransportError::UnsupportedScheme(display_url.clone())
        })?;

        let mut backend = connector.connect(&remote, url, &kind, &self.config).await?;
        if let Err(e) = apply_remote_programs(backend.as_mut(), &remote).await {
            if let Err(cleanup) = backend.disconnect().await {
                tracing::warn!("disconnect after failed setup of {display_url}: {cleanup}");
            }
            return Err(e);
        }

        tracing::info!("bound {kind} transport for {display_url}");
        let mut session = Session::new(remote, url, kind, backend);
        session.set_verbosity(Verbosity::new(self.config.verbosity));
        session.set_progress(self.config.progress);
        Ok(session)
    }

    /// Session for fetching, using the remote's first URL.
    pub async fn get_for_fetch(
        &self,
        remote: Arc<RemoteDescriptor>,
    ) -> Result<Session, TransportError> {
        let url = remote.url().unwrap_or_default().to_string();
        self.get(remote, &url).await
    }

    /// Session for pushing, using the remote's push URL.
    pub async fn get_for_push(
        &self,
        remote: Arc<RemoteDescriptor>,
    ) -> Result<Session, TransportError> {
        let url = remote.push_url().unwrap_or_default().to_string();
        self.get(remote, &url).await
    }
}

/// Offer the remote's upload/receive program overrides to a fresh backend.
async fn apply_remote_programs(
    backend: &mut dyn Backend,
    remote: &RemoteDescriptor,
) -> Result<(), TransportError> {
    let overrides = [
        remote.upload_pack.clone().map(TransportOption::UploadPack),
        remote.receive_pack.clone().map(TransportOption::ReceivePack),
    ];
    for option in overrides.into_iter().flatten() {
        match backend.set_option(&option).await {
            OptionResult::Applied => {}
            OptionResult::NotRecognized => {
                tracing::debug!("{} not used by this transport", option.name())
            }
            OptionResult::Invalid(reason) => {
                return Err(TransportError::OptionInvalid {
                    name: option.name().to_string(),
                    reason,
                });
            }
        }
    }
    Ok(())
}

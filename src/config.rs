use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

/// Transport-wide settings shared by every session a `Transport` creates.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// Prefix used to derive a remote helper executable from a scheme name.
    pub helper_prefix: String,
    /// Whether unrecognized schemes may be served by `git-remote-<scheme>` helpers.
    pub allow_helpers: bool,
    pub verbosity: i8,
    /// Force progress output even when stderr is not a terminal.
    pub progress: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            helper_prefix: "git-remote-".to_string(),
            allow_helpers: true,
            verbosity: 0,
            progress: false,
        }
    }
}

impl TransportConfig {
    pub fn from_json(s: &str) -> Result<Self, TransportError> {
        serde_json::from_str(s).map_err(|e| TransportError::InvalidConfig(e.to_string()))
    }
}

/// A configured remote. Sessions borrow it through an `Arc` and never modify it,
/// so one descriptor can back a fetch session and a push session at the same time.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RemoteDescriptor {
    pub name: String,
    pub urls: Vec<String>,
    pub push_urls: Vec<String>,
    pub upload_pack: Option<String>,
    pub receive_pack: Option<String>,
    /// Remote helper to use regardless of the URL form (`remote.<name>.vcs`).
    pub vcs: Option<String>,
    pub mirror: bool,
}

impl RemoteDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_urls.push(url.into());
        self
    }

    pub fn with_upload_pack(mut self, program: impl Into<String>) -> Self {
        self.upload_pack = Some(program.into());
        self
    }

    pub fn with_receive_pack(mut self, program: impl Into<String>) -> Self {
        self.receive_pack = Some(program.into());
        self
    }

    pub fn with_vcs(mut self, helper: impl Into<String>) -> Self {
        self.vcs = Some(helper.into());
        self
    }

    /// First fetch URL, if any.
    pub fn url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    /// URL used for pushing: the first push URL, falling back to the fetch URL.
    pub fn push_url(&self) -> Option<&str> {
        self.push_urls.first().map(String::as_str).or_else(|| self.url())
    }

    pub fn from_json(s: &str) -> Result<Self, TransportError> {
        serde_json::from_str(s).map_err(|e| TransportError::InvalidConfig(e.to_string()))
    }
}

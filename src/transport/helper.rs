//! Remote-helper backend
//!
//! Talks the line-oriented remote-helper protocol to an external `git-remote-<name>`
//! process (or any pair of async streams): `capabilities`, `option`, `list`,
//! `fetch` and `push` commands, each answered by lines terminated with a blank line.
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::{RemoteDescriptor, TransportConfig};
use crate::errors::TransportError;
use crate::hash::{HashKind, ObjectHash};
use crate::transport::core::Backend;
use crate::transport::pack_lock::PackLock;
use crate::transport::selector::{Connector, TransportKind, helper_address};
use crate::transport::types::{
    FetchOutcome, OperationContext, OptionResult, PushFlags, Ref, RefUpdate, RejectReason,
    TransportOption,
};
use crate::transport::utils::anonymize_url;

/// Capabilities this backend understands. A helper marking anything else as
/// mandatory (`*name`) cannot be driven.
const KNOWN_CAPABILITIES: &[&str] = &[
    "fetch",
    "push",
    "option",
    "import",
    "export",
    "connect",
    "stateless-connect",
    "check-connectivity",
    "refspec",
    "bidi-import",
    "export-marks",
    "import-marks",
    "signed-tags",
    "object-format",
    "no-private-update",
];

/// Helper spawned as a child process, speaking over its stdin/stdout.
pub type ProcessHelper = HelperBackend<BufReader<ChildStdout>, ChildStdin>;

pub struct HelperBackend<R, W> {
    name: String,
    reader: R,
    writer: Option<W>,
    child: Option<Child>,
    capabilities: HashSet<String>,
    hash_kind: HashKind,
    /// Output settings last forwarded with `option verbosity` / `option progress`.
    sent_context: Option<OperationContext>,
}

impl<R, W> HelperBackend<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap the helper's streams and run the capability handshake.
    pub async fn start(name: impl Into<String>, reader: R, writer: W) -> Result<Self, TransportError> {
        let mut backend = HelperBackend {
            name: name.into(),
            reader,
            writer: Some(writer),
            child: None,
            capabilities: HashSet::new(),
            hash_kind: HashKind::default(),
            sent_context: None,
        };
        backend.handshake().await?;
        Ok(backend)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Object format announced by the last `list`.
    pub fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        tracing::debug!("remote-{} <- {line}", self.name);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TransportError::helper("helper input is already closed"))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// One response line without its terminator; `None` at end of output.
    async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        tracing::debug!("remote-{} -> {line}", self.name);
        Ok(Some(line))
    }

    async fn expect_line(&mut self) -> Result<String, TransportError> {
        self.read_line().await?.ok_or_else(|| {
            TransportError::helper(format!("remote-{} closed its output unexpectedly", self.name))
        })
    }

    /// Lines up to the terminating blank line.
    async fn read_block(&mut self) -> Result<Vec<String>, TransportError> {
        let mut lines = Vec::new();
        loop {
            let line = self.expect_line().await?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    async fn handshake(&mut self) -> Result<(), TransportError> {
        self.write_line("capabilities").await?;
        for line in self.read_block().await? {
            let (mandatory, capability) = match line.strip_prefix('*') {
                Some(rest) => (true, rest),
                None => (false, line.as_str()),
            };
            let word = capability.split_whitespace().next().unwrap_or_default();
            if mandatory && !KNOWN_CAPABILITIES.contains(&word) {
                return Err(TransportError::helper(format!(
                    "unknown mandatory capability `{capability}`; remote-{} needs a newer client",
                    self.name
                )));
            }
            self.capabilities.insert(word.to_string());
        }
        tracing::debug!(
            "remote-{} capabilities: {:?}",
            self.name,
            self.capabilities
        );
        Ok(())
    }

    /// Sends `option <name> <value>` and maps the single-line answer.
    async fn send_option(&mut self, name: &str, value: &str) -> Result<OptionResult, TransportError> {
        if !self.has_capability("option") {
            return Ok(OptionResult::NotRecognized);
        }
        self.write_line(&format!("option {name} {value}")).await?;
        let response = self.expect_line().await?;
        Ok(match response.as_str() {
            "ok" => OptionResult::Applied,
            "unsupported" => OptionResult::NotRecognized,
            other => match other.strip_prefix("error") {
                Some(msg) if !msg.trim().is_empty() => OptionResult::Invalid(msg.trim().to_string()),
                Some(_) => OptionResult::Invalid(format!("remote-{} refused `{name}`", self.name)),
                None => {
                    return Err(TransportError::helper(format!(
                        "unexpected answer to option {name}: `{other}`"
                    )));
                }
            },
        })
    }

    /// Forward verbosity and progress when they differ from what the helper last saw.
    async fn sync_context(&mut self, ctx: &OperationContext) -> Result<(), TransportError> {
        if self.sent_context == Some(*ctx) || !self.has_capability("option") {
            return Ok(());
        }
        let verbosity = (ctx.verbosity.level() + 1).to_string();
        self.send_option("verbosity", &verbosity).await?;
        self.send_option("progress", if ctx.progress { "true" } else { "false" })
            .await?;
        self.sent_context = Some(*ctx);
        Ok(())
    }

    fn parse_refs(&mut self, lines: Vec<String>) -> Result<Vec<Ref>, TransportError> {
        enum Value {
            Oid(ObjectHash),
            Symref(String),
            Unknown,
        }

        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some(attr) = line.strip_prefix(':') {
                if let Some(format) = attr.strip_prefix("object-format ") {
                    self.hash_kind = HashKind::from_str(format.trim()).map_err(|_| {
                        TransportError::helper(format!("unknown object format `{format}`"))
                    })?;
                }
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(value), Some(name)) = (parts.next(), parts.next()) else {
                return Err(TransportError::helper(format!("malformed ref line `{line}`")));
            };
            let value = if let Some(target) = value.strip_prefix('@') {
                Value::Symref(target.to_string())
            } else if value == "?" {
                Value::Unknown
            } else {
                Value::Oid(ObjectHash::from_str(value).map_err(|_| {
                    TransportError::helper(format!("bad object id in ref line `{line}`"))
                })?)
            };
            entries.push((name.to_string(), value));
        }

        let zero = ObjectHash::zero(self.hash_kind);
        let direct = |target: &str| {
            entries.iter().find_map(|(name, value)| match value {
                Value::Oid(id) if name == target => Some(*id),
                _ => None,
            })
        };
        let refs = entries
            .iter()
            .map(|(name, value)| match value {
                Value::Oid(id) => Ref::new(name.clone(), *id),
                Value::Unknown => Ref::new(name.clone(), zero),
                Value::Symref(target) => {
                    Ref::new(name.clone(), direct(target).unwrap_or(zero)).with_symref(target.clone())
                }
            })
            .collect();
        Ok(refs)
    }

    /// Reads the reply to a fetch batch, collecting every `lock` line into `locks`
    /// as it is seen so the caller can release them if the reply turns out bad.
    async fn read_fetch_reply(&mut self, locks: &mut Vec<PathBuf>) -> Result<(), TransportError> {
        loop {
            let line = self.expect_line().await?;
            if line.is_empty() {
                break;
            }
            if let Some(path) = line.strip_prefix("lock ") {
                locks.push(PathBuf::from(path));
            } else if line == "connectivity-ok" {
                tracing::debug!("remote-{} verified connectivity", self.name);
            } else {
                return Err(TransportError::helper(format!(
                    "unexpected line after fetch: `{line}`"
                )));
            }
        }
        if locks.len() > 1 {
            return Err(TransportError::helper("helper reported more than one lockfile"));
        }
        Ok(())
    }

    fn require(&self, capability: &'static str) -> Result<(), TransportError> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(TransportError::UnsupportedOperation(capability))
        }
    }
}

impl ProcessHelper {
    /// Run the handshake with an already spawned helper process.
    pub async fn from_child(name: impl Into<String>, mut child: Child) -> Result<Self, TransportError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::helper("helper stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::helper("helper stdout is not piped"))?;
        let mut backend = HelperBackend::start(name, BufReader::new(stdout), stdin).await?;
        backend.child = Some(child);
        Ok(backend)
    }
}

fn push_status(why: Option<&str>) -> RejectReason {
    let why = why.map(|w| w.trim().trim_matches('"')).unwrap_or_default();
    match why {
        "non-fast-forward" => RejectReason::NonFastForward,
        "fetch first" => RejectReason::FetchFirst,
        "" => RejectReason::Remote("rejected".to_string()),
        other => RejectReason::Remote(other.to_string()),
    }
}

#[async_trait]
impl<R, W> Backend for HelperBackend<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn set_option(&mut self, option: &TransportOption) -> OptionResult {
        let (name, value) = match option {
            // the helper picks its own programs and pack shape
            TransportOption::UploadPack(_)
            | TransportOption::ReceivePack(_)
            | TransportOption::Thin(_)
            | TransportOption::Keep(_) => return OptionResult::NotRecognized,
            TransportOption::Depth(None) => return OptionResult::Applied,
            TransportOption::Depth(Some(depth)) => ("depth".to_string(), depth.to_string()),
            TransportOption::FollowTags(on) => ("followtags".to_string(), on.to_string()),
            TransportOption::Other { name, value } => (
                name.clone(),
                value.clone().unwrap_or_else(|| "false".to_string()),
            ),
        };
        match self.send_option(&name, &value).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("remote-{} failed while setting option {name}: {e}", self.name);
                OptionResult::Invalid(format!("helper I/O failed: {e}"))
            }
        }
    }

    async fn list_refs(
        &mut self,
        for_push: bool,
        ctx: &OperationContext,
    ) -> Result<Vec<Ref>, TransportError> {
        self.sync_context(ctx).await?;
        self.write_line(if for_push { "list for-push" } else { "list" })
            .await?;
        let lines = self.read_block().await?;
        self.parse_refs(lines)
    }

    async fn fetch(
        &mut self,
        wanted: &[Ref],
        ctx: &OperationContext,
    ) -> Result<FetchOutcome, TransportError> {
        self.require("fetch")?;
        self.sync_context(ctx).await?;
        for r in wanted {
            self.write_line(&format!("fetch {} {}", r.target(), r.name()))
                .await?;
        }
        self.write_line("").await?;

        let mut locks = Vec::new();
        if let Err(e) = self.read_fetch_reply(&mut locks).await {
            // nobody else will ever see these locks
            for path in locks {
                tracing::warn!(
                    "releasing {} after failed fetch from remote-{}",
                    path.display(),
                    self.name
                );
                if let Err(release) = PackLock::new(path).release() {
                    tracing::warn!("could not release pack lock: {release}");
                }
            }
            return Err(e);
        }
        Ok(FetchOutcome {
            pack_lockfile: locks.pop(),
        })
    }

    async fn push_refs(
        &mut self,
        updates: &mut [RefUpdate],
        _flags: PushFlags,
        ctx: &OperationContext,
    ) -> Result<(), TransportError> {
        self.require("push")?;
        self.sync_context(ctx).await?;
        for update in updates.iter() {
            let src = match &update.source {
                _ if update.is_delete() => String::new(),
                Some(source) => source.clone(),
                None => update.new.to_string(),
            };
            let force = if update.force && !update.is_delete() { "+" } else { "" };
            self.write_line(&format!("push {force}{src}:{}", update.name))
                .await?;
        }
        self.write_line("").await?;

        for line in self.read_block().await? {
            let (status, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let (dst, why) = match rest.split_once(' ') {
                Some((dst, why)) => (dst, Some(why)),
                None => (rest, None),
            };
            match status {
                "ok" | "error" => {
                    let update = updates
                        .iter_mut()
                        .find(|u| u.name == dst)
                        .ok_or_else(|| {
                            TransportError::helper(format!("status for unknown ref `{dst}`"))
                        })?;
                    if status == "ok" {
                        update.accept();
                    } else {
                        update.reject(push_status(why));
                    }
                }
                "option" => {}
                _ => {
                    return Err(TransportError::helper(format!(
                        "unexpected line after push: `{line}`"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.writer.is_some() {
            // a blank line asks the helper to exit; it may already be gone
            if let Err(e) = self.write_line("").await {
                tracing::debug!("remote-{} did not take the final newline: {e}", self.name);
            }
            if let Some(mut writer) = self.writer.take() {
                writer.shutdown().await.ok();
            }
        }
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            if !status.success() {
                return Err(TransportError::helper(format!(
                    "remote-{} exited with {status}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Spawns `<helper_prefix><name>` for `Helper` kinds.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelperConnector;

#[async_trait]
impl Connector for HelperConnector {
    async fn connect(
        &self,
        remote: &RemoteDescriptor,
        url: &str,
        kind: &TransportKind,
        config: &TransportConfig,
    ) -> Result<Box<dyn Backend>, TransportError> {
        let TransportKind::Helper { name } = kind else {
            return Err(TransportError::UnsupportedScheme(anonymize_url(url)));
        };
        let program = format!("{}{name}", config.helper_prefix);
        let alias = if remote.name.is_empty() {
            url
        } else {
            remote.name.as_str()
        };

        let child = Command::new(&program)
            .arg(alias)
            .arg(helper_address(url))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    tracing::warn!("remote helper {program} not found");
                    TransportError::UnsupportedScheme(anonymize_url(url))
                }
                _ => TransportError::IOError(e),
            })?;
        tracing::debug!("spawned {program} for {}", anonymize_url(url));

        let backend = HelperBackend::from_child(name.clone(), child).await?;
        Ok(Box::new(backend))
    }
}

use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::hash::{HashKind, ObjectHash};

/// The program to use on the remote side to send a pack
pub const TRANS_OPT_UPLOADPACK: &str = "uploadpack";
/// The program to use on the remote side to receive a pack
pub const TRANS_OPT_RECEIVEPACK: &str = "receivepack";
/// Transfer the data as a thin pack if present
pub const TRANS_OPT_THIN: &str = "thin";
/// Keep the pack that was transferred if present
pub const TRANS_OPT_KEEP: &str = "keep";
/// Limit the depth of the fetch; 0 or absent means unlimited
pub const TRANS_OPT_DEPTH: &str = "depth";
/// Aggressively fetch annotated tags if possible
pub const TRANS_OPT_FOLLOWTAGS: &str = "followtags";

/// A transport option after facade-level validation.
///
/// The six well-known names get typed variants. Anything else is carried through
/// untouched as `Other` so a backend can still claim it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOption {
    UploadPack(String),
    ReceivePack(String),
    Thin(bool),
    Keep(bool),
    /// `None` means unlimited.
    Depth(Option<u32>),
    FollowTags(bool),
    Other { name: String, value: Option<String> },
}

impl TransportOption {
    /// Validates `value` for a well-known option name.
    ///
    /// Toggles are presence tests: any value turns them on, `None` turns them off.
    pub fn parse(name: &str, value: Option<&str>) -> Result<Self, String> {
        match name {
            TRANS_OPT_UPLOADPACK | TRANS_OPT_RECEIVEPACK => {
                let program = value
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| format!("`{name}` requires a program name"))?;
                if name == TRANS_OPT_UPLOADPACK {
                    Ok(TransportOption::UploadPack(program.to_string()))
                } else {
                    Ok(TransportOption::ReceivePack(program.to_string()))
                }
            }
            TRANS_OPT_THIN => Ok(TransportOption::Thin(value.is_some())),
            TRANS_OPT_KEEP => Ok(TransportOption::Keep(value.is_some())),
            TRANS_OPT_FOLLOWTAGS => Ok(TransportOption::FollowTags(value.is_some())),
            TRANS_OPT_DEPTH => match value {
                None => Ok(TransportOption::Depth(None)),
                Some(v) => {
                    let depth: u32 = v
                        .trim()
                        .parse()
                        .map_err(|_| format!("depth `{v}` is not a non-negative integer"))?;
                    Ok(TransportOption::Depth((depth > 0).then_some(depth)))
                }
            },
            _ => Ok(TransportOption::Other {
                name: name.to_string(),
                value: value.map(str::to_string),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TransportOption::UploadPack(_) => TRANS_OPT_UPLOADPACK,
            TransportOption::ReceivePack(_) => TRANS_OPT_RECEIVEPACK,
            TransportOption::Thin(_) => TRANS_OPT_THIN,
            TransportOption::Keep(_) => TRANS_OPT_KEEP,
            TransportOption::Depth(_) => TRANS_OPT_DEPTH,
            TransportOption::FollowTags(_) => TRANS_OPT_FOLLOWTAGS,
            TransportOption::Other { name, .. } => name,
        }
    }
}

/// Outcome of offering an option to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionResult {
    Applied,
    /// The backend has no concept of this option. Callers treat it as a no-op.
    NotRecognized,
    /// The option applies, but the value failed validation.
    Invalid(String),
}

impl OptionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, OptionResult::Applied)
    }
}

/// Output intensity: negative is quiet, zero normal, positive chatty.
/// Clamped to the range of a 2-bit signed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Verbosity(i8);

impl Verbosity {
    pub const MIN: i8 = -2;
    pub const MAX: i8 = 1;

    pub fn new(level: i8) -> Self {
        Verbosity(level.clamp(Self::MIN, Self::MAX))
    }

    pub fn level(&self) -> i8 {
        self.0
    }

    pub fn is_quiet(&self) -> bool {
        self.0 < 0
    }

    pub fn is_verbose(&self) -> bool {
        self.0 > 0
    }
}

/// Per-session output settings handed to every backend data operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationContext {
    pub verbosity: Verbosity,
    pub progress: bool,
}

bitflags! {
    /// Caller-level push modifiers. Bit values match the classic `TRANSPORT_PUSH_*` constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PushFlags: u32 {
        /// Push every local branch.
        const ALL = 1;
        /// Allow non-fast-forward updates.
        const FORCE = 2;
        /// Compute and report the update set without changing the remote.
        const DRY_RUN = 4;
        /// Make the remote ref set match the local one, deletions included.
        const MIRROR = 8;
        const VERBOSE = 16;
        /// Machine-parseable per-ref status lines.
        const PORCELAIN = 32;
    }
}

impl PushFlags {
    /// Flags with implications applied: MIRROR forces every update.
    pub fn effective(self) -> Self {
        if self.contains(PushFlags::MIRROR) {
            self | PushFlags::FORCE
        } else {
            self
        }
    }
}

/// A ref advertised by a remote. Only backends construct these; callers read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    name: String,
    target: ObjectHash,
    symref: Option<String>,
    peeled: Option<ObjectHash>,
}

impl Ref {
    pub fn new(name: impl Into<String>, target: ObjectHash) -> Self {
        Self {
            name: name.into(),
            target,
            symref: None,
            peeled: None,
        }
    }

    pub fn with_symref(mut self, target_ref: impl Into<String>) -> Self {
        self.symref = Some(target_ref.into());
        self
    }

    pub fn with_peeled(mut self, peeled: ObjectHash) -> Self {
        self.peeled = Some(peeled);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> ObjectHash {
        self.target
    }

    /// Name of the ref this one points at, e.g. `refs/heads/main` for `HEAD`.
    pub fn symref(&self) -> Option<&str> {
        self.symref.as_deref()
    }

    /// Object an annotated tag ultimately points to.
    pub fn peeled(&self) -> Option<ObjectHash> {
        self.peeled
    }
}

/// What a backend hands back after a successful fetch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// `.keep` file protecting a pack whose finalization was deferred to the caller.
    pub pack_lockfile: Option<PathBuf>,
}

/// Why a ref update was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The remote value is not an ancestor of the pushed value and FORCE was not given.
    NonFastForward,
    /// The remote value is not known locally, so fast-forwardness cannot be checked.
    FetchFirst,
    /// The remote side refused the update.
    Remote(String),
    /// The backend returned without reporting on this ref.
    NotAttempted(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NonFastForward => write!(f, "non-fast-forward"),
            RejectReason::FetchFirst => write!(f, "fetch first"),
            RejectReason::Remote(msg) => write!(f, "{msg}"),
            RejectReason::NotAttempted(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PushStatus {
    /// Still to be sent to the backend.
    #[default]
    Pending,
    Accepted,
    UpToDate,
    Rejected(RejectReason),
}

/// One remote ref change. `old` is the expected remote value (zero for a creation),
/// `new` the pushed value (zero for a deletion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub source: Option<String>,
    pub old: ObjectHash,
    pub new: ObjectHash,
    pub force: bool,
    pub status: PushStatus,
}

impl RefUpdate {
    pub fn new(
        name: impl Into<String>,
        source: Option<String>,
        old: ObjectHash,
        new: ObjectHash,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            old,
            new,
            force: false,
            status: PushStatus::Pending,
        }
    }

    pub fn delete(name: impl Into<String>, old: ObjectHash) -> Self {
        let zero = ObjectHash::zero(old.kind());
        Self::new(name, None, old, zero)
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }

    pub fn is_pending(&self) -> bool {
        self.status == PushStatus::Pending
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, PushStatus::Rejected(_))
    }

    pub fn accept(&mut self) {
        self.status = PushStatus::Accepted;
    }

    pub fn reject(&mut self, reason: RejectReason) {
        self.status = PushStatus::Rejected(reason);
    }

    pub fn hash_kind(&self) -> HashKind {
        if self.new.is_zero() {
            self.old.kind()
        } else {
            self.new.kind()
        }
    }

    /// Status flag character of porcelain output.
    pub fn flag(&self) -> char {
        match &self.status {
            PushStatus::UpToDate => '=',
            PushStatus::Rejected(_) => '!',
            _ if self.is_delete() => '-',
            _ if self.is_create() => '*',
            _ if self.force => '+',
            _ => ' ',
        }
    }

    /// Short status description, e.g. `[new branch]` or `1a2b3c4..5d6e7f8`.
    pub fn summary(&self) -> String {
        match &self.status {
            PushStatus::UpToDate => "[up to date]".to_string(),
            PushStatus::Rejected(RejectReason::Remote(_)) => "[remote rejected]".to_string(),
            PushStatus::Rejected(_) => "[rejected]".to_string(),
            _ if self.is_delete() => "[deleted]".to_string(),
            _ if self.is_create() => {
                if self.name.starts_with("refs/tags/") {
                    "[new tag]".to_string()
                } else if self.name.starts_with("refs/heads/") {
                    "[new branch]".to_string()
                } else {
                    "[new reference]".to_string()
                }
            }
            _ if self.force => format!("{}...{}", self.old.short(), self.new.short()),
            _ => format!("{}..{}", self.old.short(), self.new.short()),
        }
    }

    /// Parenthesized detail shown after the summary.
    pub fn reason(&self) -> Option<String> {
        match &self.status {
            PushStatus::Rejected(reason) => Some(reason.to_string()),
            PushStatus::UpToDate => None,
            _ if self.force && !self.is_create() && !self.is_delete() => {
                Some("forced update".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn oid(c: char) -> ObjectHash {
        ObjectHash::from_str(&c.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn parse_well_known_options() {
        assert_eq!(
            TransportOption::parse(TRANS_OPT_UPLOADPACK, Some("/usr/bin/git-upload-pack")),
            Ok(TransportOption::UploadPack("/usr/bin/git-upload-pack".to_string()))
        );
        assert_eq!(
            TransportOption::parse(TRANS_OPT_THIN, Some("yes")),
            Ok(TransportOption::Thin(true))
        );
        assert_eq!(
            TransportOption::parse(TRANS_OPT_FOLLOWTAGS, None),
            Ok(TransportOption::FollowTags(false))
        );
        assert_eq!(
            TransportOption::parse(TRANS_OPT_DEPTH, Some("3")),
            Ok(TransportOption::Depth(Some(3)))
        );
        assert_eq!(
            TransportOption::parse(TRANS_OPT_DEPTH, Some("0")),
            Ok(TransportOption::Depth(None))
        );
    }

    #[test]
    fn parse_rejects_bad_values() {
        assert!(TransportOption::parse(TRANS_OPT_DEPTH, Some("-1")).is_err());
        assert!(TransportOption::parse(TRANS_OPT_DEPTH, Some("deep")).is_err());
        assert!(TransportOption::parse(TRANS_OPT_RECEIVEPACK, Some("  ")).is_err());
        assert!(TransportOption::parse(TRANS_OPT_UPLOADPACK, None).is_err());
    }

    #[test]
    fn unknown_options_pass_through() {
        let opt = TransportOption::parse("cloning", Some("true")).unwrap();
        assert_eq!(opt.name(), "cloning");
        assert_eq!(
            opt,
            TransportOption::Other {
                name: "cloning".to_string(),
                value: Some("true".to_string())
            }
        );
    }

    #[test]
    fn verbosity_is_clamped() {
        assert_eq!(Verbosity::new(5).level(), 1);
        assert_eq!(Verbosity::new(-7).level(), -2);
        assert!(Verbosity::new(-1).is_quiet());
        assert!(Verbosity::new(1).is_verbose());
        assert!(!Verbosity::default().is_verbose());
    }

    #[test]
    fn mirror_implies_force() {
        let flags = PushFlags::MIRROR | PushFlags::DRY_RUN;
        assert!(flags.effective().contains(PushFlags::FORCE));
        assert!(!PushFlags::ALL.effective().contains(PushFlags::FORCE));
        assert_eq!(PushFlags::from_bits(36), Some(PushFlags::DRY_RUN | PushFlags::PORCELAIN));
    }

    #[test]
    fn update_flags_and_summaries() {
        let mut ff = RefUpdate::new("refs/heads/main", Some("refs/heads/main".into()), oid('a'), oid('b'));
        ff.accept();
        assert_eq!(ff.flag(), ' ');
        assert_eq!(ff.summary(), "aaaaaaa..bbbbbbb");

        let forced = ff.clone().forced(true);
        assert_eq!(forced.flag(), '+');
        assert_eq!(forced.summary(), "aaaaaaa...bbbbbbb");
        assert_eq!(forced.reason().as_deref(), Some("forced update"));
        assert_eq!(ff.reason(), None);

        let create = RefUpdate::new("refs/tags/v1", None, ObjectHash::zero(HashKind::Sha1), oid('c'));
        assert_eq!(create.flag(), '*');
        assert_eq!(create.summary(), "[new tag]");

        let delete = RefUpdate::delete("refs/heads/old", oid('d'));
        assert!(delete.is_delete());
        assert_eq!(delete.flag(), '-');
        assert_eq!(delete.summary(), "[deleted]");

        let mut rejected = RefUpdate::new("refs/heads/dev", None, oid('e'), oid('f'));
        rejected.reject(RejectReason::NonFastForward);
        assert_eq!(rejected.flag(), '!');
        assert_eq!(rejected.summary(), "[rejected]");
        assert_eq!(rejected.reason().as_deref(), Some("non-fast-forward"));

        rejected.reject(RejectReason::Remote("hook declined".into()));
        assert_eq!(rejected.summary(), "[remote rejected]");
        assert_eq!(rejected.reason().as_deref(), Some("hook declined"));
    }
}

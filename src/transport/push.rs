//! Push orchestration: refspec parsing, resolution of refspecs against local and
//! remote refs, fast-forward classification, and the per-ref push report.
//!
//! `Session::push` is the only entry point that resolves refspecs. It hands the
//! resulting update set to `Session::push_refs`, which callers holding an exact
//! update list may also use directly.
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::hash::{HashKind, ObjectHash};
use crate::transport::core::Session;
use crate::transport::types::{PushFlags, PushStatus, Ref, RefUpdate, RejectReason};

/// Read access to the local repository that a push needs.
#[async_trait]
pub trait LocalRefs: Send + Sync {
    /// All local refs; symbolic refs carry their target in `Ref::symref`.
    async fn local_refs(&self) -> Result<Vec<Ref>, TransportError>;

    async fn has_object(&self, id: &ObjectHash) -> Result<bool, TransportError>;

    /// Whether `ancestor` is reachable from `descendant`.
    async fn is_ancestor(
        &self,
        ancestor: &ObjectHash,
        descendant: &ObjectHash,
    ) -> Result<bool, TransportError>;
}

/// `[+]<src>[:<dst>]`. An empty `src` deletes `dst`; a bare `:` pushes matching refs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    pub src: Option<String>,
    pub dst: Option<String>,
}

impl Refspec {
    pub fn is_delete(&self) -> bool {
        self.src.is_none() && self.dst.is_some()
    }

    pub fn is_matching(&self) -> bool {
        self.src.is_none() && self.dst.is_none()
    }
}

impl FromStr for Refspec {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (force, spec) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if spec.is_empty() {
            return Err(TransportError::invalid_refspec(format!("empty refspec `{s}`")));
        }
        if spec.contains('*') {
            return Err(TransportError::invalid_refspec(format!(
                "pattern refspec `{s}` must be expanded before pushing"
            )));
        }

        let non_empty = |part: &str| (!part.is_empty()).then(|| part.to_string());
        let (src, dst) = match spec.split_once(':') {
            Some((src, dst)) => (non_empty(src), non_empty(dst)),
            None => (non_empty(spec), None),
        };
        if src.is_none() && force && dst.is_some() {
            return Err(TransportError::invalid_refspec(format!(
                "forcing a deletion makes no sense in `{s}`"
            )));
        }
        Ok(Refspec { force, src, dst })
    }
}

/// Finds `name` among `refs` by exact name, then by the usual short-name expansions.
fn find_ref<'a>(refs: &'a [Ref], name: &str) -> Result<Option<&'a Ref>, TransportError> {
    if let Some(r) = refs.iter().find(|r| r.name() == name) {
        return Ok(Some(r));
    }
    if name.starts_with("refs/") {
        return Ok(None);
    }
    let candidates = [
        format!("refs/{name}"),
        format!("refs/tags/{name}"),
        format!("refs/heads/{name}"),
        format!("refs/remotes/{name}"),
    ];
    let found: Vec<&Ref> = candidates
        .iter()
        .filter_map(|full| refs.iter().find(|r| r.name() == full.as_str()))
        .collect();
    match found.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(*one)),
        _ => Err(TransportError::invalid_refspec(format!(
            "`{name}` matches more than one ref"
        ))),
    }
}

/// Full remote name for a refspec destination.
fn expand_dst(dst: &str, src_ref: Option<&str>, remote_refs: &[Ref]) -> Result<String, TransportError> {
    if dst.starts_with("refs/") {
        return Ok(dst.to_string());
    }
    if let Some(existing) = find_ref(remote_refs, dst)? {
        return Ok(existing.name().to_string());
    }
    match src_ref {
        Some(src) if src.starts_with("refs/heads/") => Ok(format!("refs/heads/{dst}")),
        Some(src) if src.starts_with("refs/tags/") => Ok(format!("refs/tags/{dst}")),
        _ => Err(TransportError::invalid_refspec(format!(
            "destination `{dst}` is not a full ref name and cannot be guessed"
        ))),
    }
}

fn remote_value(remote_refs: &[Ref], name: &str, kind: HashKind) -> ObjectHash {
    remote_refs
        .iter()
        .find(|r| r.name() == name)
        .map_or(ObjectHash::zero(kind), Ref::target)
}

/// Computes the ordered update set for a push. Every update starts `Pending`.
pub fn resolve_updates(
    refspecs: &[Refspec],
    local_refs: &[Ref],
    remote_refs: &[Ref],
    flags: PushFlags,
) -> Result<Vec<RefUpdate>, TransportError> {
    let flags = flags.effective();
    let kind = local_refs
        .iter()
        .chain(remote_refs)
        .map(|r| r.target().kind())
        .next()
        .unwrap_or_default();
    let direct_local: Vec<&Ref> = local_refs.iter().filter(|r| r.symref().is_none()).collect();

    let mirror = flags.contains(PushFlags::MIRROR);
    let all = flags.contains(PushFlags::ALL);
    if mirror && all {
        return Err(TransportError::invalid_refspec(
            "--all and --mirror are incompatible",
        ));
    }
    if all && !refspecs.is_empty() {
        return Err(TransportError::invalid_refspec(
            "--all cannot be combined with refspecs",
        ));
    }

    let mut updates: Vec<RefUpdate> = Vec::new();
    if (mirror && refspecs.is_empty()) || all {
        let heads_only = all;
        for local in direct_local
            .iter()
            .filter(|r| !heads_only || r.name().starts_with("refs/heads/"))
        {
            let old = remote_value(remote_refs, local.name(), kind);
            add_update(
                &mut updates,
                RefUpdate::new(local.name(), Some(local.name().to_string()), old, local.target()),
            )?;
        }
    } else if refspecs.is_empty() || refspecs.iter().any(Refspec::is_matching) {
        let force = refspecs.iter().any(|s| s.is_matching() && s.force);
        for local in &direct_local {
            if let Some(remote) = remote_refs.iter().find(|r| r.name() == local.name()) {
                add_update(
                    &mut updates,
                    RefUpdate::new(
                        local.name(),
                        Some(local.name().to_string()),
                        remote.target(),
                        local.target(),
                    )
                    .forced(force),
                )?;
            }
        }
    }

    for spec in refspecs.iter().filter(|s| !s.is_matching()) {
        let update = resolve_refspec(spec, local_refs, remote_refs, kind)?;
        add_update(&mut updates, update.forced(spec.force))?;
    }

    if mirror {
        // every remote ref no update covers goes away
        let covered: HashSet<String> = updates.iter().map(|u| u.name.clone()).collect();
        for remote in remote_refs {
            if remote.symref().is_some() || remote.name() == "HEAD" {
                continue;
            }
            if !covered.contains(remote.name()) {
                add_update(&mut updates, RefUpdate::delete(remote.name(), remote.target()))?;
            }
        }
    }

    if flags.contains(PushFlags::FORCE) {
        for update in &mut updates {
            update.force = true;
        }
    }
    Ok(updates)
}

/// Appends `update` unless the same ref is already updated to the same value.
fn add_update(updates: &mut Vec<RefUpdate>, update: RefUpdate) -> Result<(), TransportError> {
    if let Some(prev) = updates.iter().find(|u| u.name == update.name) {
        if prev.new != update.new {
            return Err(TransportError::invalid_refspec(format!(
                "multiple updates for ref `{}`",
                update.name
            )));
        }
        return Ok(());
    }
    updates.push(update);
    Ok(())
}

fn resolve_refspec(
    spec: &Refspec,
    local_refs: &[Ref],
    remote_refs: &[Ref],
    kind: HashKind,
) -> Result<RefUpdate, TransportError> {
    let Some(src) = &spec.src else {
        let dst = spec.dst.as_deref().unwrap_or_default();
        let target = find_ref(remote_refs, dst)?.ok_or_else(|| {
            TransportError::invalid_refspec(format!(
                "unable to delete `{dst}`: remote ref does not exist"
            ))
        })?;
        return Ok(RefUpdate::delete(target.name(), target.target()));
    };

    let (source_name, new) = match find_ref(local_refs, src)? {
        Some(local) => {
            // a symbolic ref such as HEAD pushes the branch it points at
            let name = local.symref().unwrap_or(local.name()).to_string();
            (Some(name), local.target())
        }
        None => match ObjectHash::from_str(src) {
            Ok(id) if spec.dst.is_some() => (None, id),
            _ => {
                return Err(TransportError::invalid_refspec(format!(
                    "src refspec `{src}` does not match any local ref"
                )));
            }
        },
    };

    let dst = match &spec.dst {
        Some(dst) => expand_dst(dst, source_name.as_deref(), remote_refs)?,
        None => source_name.clone().ok_or_else(|| {
            TransportError::invalid_refspec(format!("refspec `{src}` needs a destination"))
        })?,
    };
    let old = remote_value(remote_refs, &dst, kind);
    Ok(RefUpdate::new(dst, source_name, old, new))
}

/// Marks updates that need no transfer or must be refused before contacting the remote.
pub async fn classify_updates(
    updates: &mut [RefUpdate],
    local: &dyn LocalRefs,
) -> Result<(), TransportError> {
    for update in updates.iter_mut().filter(|u| u.is_pending()) {
        if !update.is_delete() && update.old == update.new {
            update.status = PushStatus::UpToDate;
        } else if update.is_delete() || update.is_create() || update.force {
            continue;
        } else if !local.has_object(&update.old).await? {
            update.reject(RejectReason::FetchFirst);
        } else if !local.is_ancestor(&update.old, &update.new).await? {
            update.reject(RejectReason::NonFastForward);
        }
    }
    Ok(())
}

/// Per-ref outcome of a push call.
#[derive(Debug, Clone)]
pub struct PushReport {
    url: String,
    flags: PushFlags,
    updates: Vec<RefUpdate>,
}

impl PushReport {
    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    pub fn into_updates(self) -> Vec<RefUpdate> {
        self.updates
    }

    pub fn update(&self, name: &str) -> Option<&RefUpdate> {
        self.updates.iter().find(|u| u.name == name)
    }

    pub fn is_dry_run(&self) -> bool {
        self.flags.contains(PushFlags::DRY_RUN)
    }

    /// True when no ref was rejected.
    pub fn is_ok(&self) -> bool {
        !self.updates.iter().any(RefUpdate::is_rejected)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &RefUpdate> {
        self.updates.iter().filter(|u| u.is_rejected())
    }
}

fn short_ref_name(name: &str) -> &str {
    ["refs/heads/", "refs/tags/", "refs/remotes/"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

fn source_label(update: &RefUpdate) -> String {
    match &update.source {
        Some(source) => source.clone(),
        None if update.is_delete() => String::new(),
        None => update.new.to_string(),
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "To {}", self.url)?;
        if self.flags.contains(PushFlags::PORCELAIN) {
            for update in &self.updates {
                write!(
                    f,
                    "{}\t{}:{}\t{}",
                    update.flag(),
                    source_label(update),
                    update.name,
                    update.summary()
                )?;
                match update.reason() {
                    Some(reason) => writeln!(f, " ({reason})")?,
                    None => writeln!(f)?,
                }
            }
            return writeln!(f, "Done");
        }

        let verbose = self.flags.contains(PushFlags::VERBOSE);
        let mut shown = 0;
        for update in &self.updates {
            if update.status == PushStatus::UpToDate && !verbose {
                continue;
            }
            shown += 1;
            let from = if update.is_delete() {
                "(delete)".to_string()
            } else {
                short_ref_name(&source_label(update)).to_string()
            };
            write!(
                f,
                " {} {:<17} {} -> {}",
                update.flag(),
                update.summary(),
                from,
                short_ref_name(&update.name)
            )?;
            match update.reason() {
                Some(reason) => writeln!(f, " ({reason})")?,
                None => writeln!(f)?,
            }
        }
        if shown == 0 {
            writeln!(f, "Everything up-to-date")?;
        }
        Ok(())
    }
}

impl Session {
    /// Resolve `refspecs` against `local` and the remote's push-direction refs, then
    /// push the resulting updates.
    ///
    /// Non-fast-forward updates without FORCE are rejected per ref; the other refs
    /// in the same call still go through. A remote configured as a mirror pushes
    /// with MIRROR whether or not the caller asked for it.
    pub async fn push<S>(
        &mut self,
        local: &dyn LocalRefs,
        refspecs: &[S],
        flags: PushFlags,
    ) -> Result<PushReport, TransportError>
    where
        S: AsRef<str> + Sync,
    {
        self.ensure_usable()?;
        let mut flags = flags;
        if self.remote().mirror {
            flags |= PushFlags::MIRROR;
        }
        let flags = flags.effective();
        let specs = refspecs
            .iter()
            .map(|s| s.as_ref().parse::<Refspec>())
            .collect::<Result<Vec<_>, _>>()?;

        let remote_refs = self.get_refs(true).await?.to_vec();
        let local_refs = local.local_refs().await?;
        let mut updates = resolve_updates(&specs, &local_refs, &remote_refs, flags)?;
        classify_updates(&mut updates, local).await?;
        tracing::debug!("resolved {} ref updates for {}", updates.len(), self.display_url());

        self.push_refs(updates, flags).await
    }

    /// Push an already-resolved update set.
    ///
    /// Only `Pending` updates are sent. With DRY_RUN nothing is sent and every
    /// pending update is reported as it would have been attempted.
    pub async fn push_refs(
        &mut self,
        mut updates: Vec<RefUpdate>,
        flags: PushFlags,
    ) -> Result<PushReport, TransportError> {
        self.ensure_usable()?;
        let flags = flags.effective();
        if flags.contains(PushFlags::FORCE) {
            for update in updates.iter_mut() {
                update.force = true;
            }
        }

        let pending: Vec<usize> = (0..updates.len()).filter(|&i| updates[i].is_pending()).collect();
        if flags.contains(PushFlags::DRY_RUN) {
            for &i in &pending {
                updates[i].accept();
            }
        } else if !pending.is_empty() {
            let mut batch: Vec<RefUpdate> = pending.iter().map(|&i| updates[i].clone()).collect();
            let ctx = self.context();
            let url = self.display_url().to_string();
            self.backend_mut()
                .push_refs(&mut batch, flags, &ctx)
                .await
                .map_err(|e| TransportError::PushFailed {
                    url,
                    source: Box::new(e),
                })?;

            for (&i, mut sent) in pending.iter().zip(batch) {
                if sent.is_pending() {
                    sent.reject(RejectReason::NotAttempted(
                        "remote did not report status".to_string(),
                    ));
                }
                updates[i] = sent;
            }
        }

        let report = PushReport {
            url: self.display_url().to_string(),
            flags,
            updates,
        };
        let rejected = report.rejected().count();
        tracing::info!(
            "push to {}: {} updates, {} rejected{}",
            report.url,
            report.updates.len(),
            rejected,
            if report.is_dry_run() { " (dry run)" } else { "" }
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::config::RemoteDescriptor;
    use crate::transport::core::Backend;
    use crate::transport::selector::TransportKind;
    use crate::transport::types::OperationContext;

    fn oid(c: char) -> ObjectHash {
        ObjectHash::from_str(&c.to_string().repeat(40)).unwrap()
    }

    /// Local repository with a fixed ancestry table.
    struct TestLocal {
        refs: Vec<Ref>,
        /// descendant -> ancestors
        history: HashMap<ObjectHash, Vec<ObjectHash>>,
    }

    #[async_trait]
    impl LocalRefs for TestLocal {
        async fn local_refs(&self) -> Result<Vec<Ref>, TransportError> {
            Ok(self.refs.clone())
        }

        async fn has_object(&self, id: &ObjectHash) -> Result<bool, TransportError> {
            Ok(self.history.contains_key(id)
                || self.history.values().any(|ancestors| ancestors.contains(id)))
        }

        async fn is_ancestor(
            &self,
            ancestor: &ObjectHash,
            descendant: &ObjectHash,
        ) -> Result<bool, TransportError> {
            Ok(ancestor == descendant
                || self
                    .history
                    .get(descendant)
                    .is_some_and(|ancestors| ancestors.contains(ancestor)))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingBackend {
        remote: Vec<Ref>,
        push_calls: Arc<AtomicUsize>,
        pushed: Arc<Mutex<Vec<String>>>,
        refuse: Option<String>,
        skip_status: bool,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn list_refs(
            &mut self,
            _for_push: bool,
            _ctx: &OperationContext,
        ) -> Result<Vec<Ref>, TransportError> {
            Ok(self.remote.clone())
        }

        async fn push_refs(
            &mut self,
            updates: &mut [RefUpdate],
            _flags: PushFlags,
            _ctx: &OperationContext,
        ) -> Result<(), TransportError> {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            for update in updates.iter_mut() {
                self.pushed.lock().unwrap().push(update.name.clone());
                if self.skip_status {
                    continue;
                }
                if self.refuse.as_deref() == Some(update.name.as_str()) {
                    update.reject(RejectReason::Remote("hook declined".to_string()));
                } else {
                    update.accept();
                }
            }
            Ok(())
        }
    }

    // a -> b is a fast-forward on main; c and d diverge on dev
    fn fixture() -> (TestLocal, RecordingBackend) {
        let local = TestLocal {
            refs: vec![
                Ref::new("HEAD", oid('b')).with_symref("refs/heads/main"),
                Ref::new("refs/heads/main", oid('b')),
                Ref::new("refs/heads/dev", oid('d')),
                Ref::new("refs/heads/topic", oid('e')),
                Ref::new("refs/tags/v1", oid('a')),
            ],
            history: HashMap::from([
                (oid('b'), vec![oid('a')]),
                (oid('d'), vec![oid('a')]),
                (oid('c'), vec![oid('a')]),
                (oid('e'), vec![oid('a')]),
            ]),
        };
        let backend = RecordingBackend {
            remote: vec![
                Ref::new("HEAD", oid('a')).with_symref("refs/heads/main"),
                Ref::new("refs/heads/main", oid('a')),
                Ref::new("refs/heads/dev", oid('c')),
                Ref::new("refs/heads/stale", oid('f')),
                Ref::new("refs/tags/v1", oid('a')),
            ],
            ..Default::default()
        };
        (local, backend)
    }

    fn session(backend: RecordingBackend) -> Session {
        Session::new(
            Arc::new(RemoteDescriptor::new("origin", "ssh://git@example.com/r.git")),
            "ssh://git@example.com/r.git",
            TransportKind::Ssh,
            Box::new(backend),
        )
    }

    #[test]
    fn parse_refspecs() {
        assert_eq!(
            "+refs/heads/a:refs/heads/b".parse::<Refspec>().unwrap(),
            Refspec {
                force: true,
                src: Some("refs/heads/a".into()),
                dst: Some("refs/heads/b".into())
            }
        );
        let delete: Refspec = ":refs/heads/gone".parse().unwrap();
        assert!(delete.is_delete());
        assert!(":".parse::<Refspec>().unwrap().is_matching());
        assert!("main".parse::<Refspec>().unwrap().dst.is_none());
        assert!("refs/heads/*:refs/heads/*".parse::<Refspec>().is_err());
        assert!("".parse::<Refspec>().is_err());
        assert!("+:refs/heads/x".parse::<Refspec>().is_err());
    }

    #[tokio::test]
    async fn non_fast_forward_is_rejected_per_ref() {
        let (local, backend) = fixture();
        let pushed = backend.pushed.clone();
        let mut session = session(backend);

        let report = session
            .push(&local, &["main", "dev"], PushFlags::empty())
            .await
            .unwrap();

        assert_eq!(report.update("refs/heads/main").unwrap().status, PushStatus::Accepted);
        assert_eq!(
            report.update("refs/heads/dev").unwrap().status,
            PushStatus::Rejected(RejectReason::NonFastForward)
        );
        assert!(!report.is_ok());
        assert_eq!(pushed.lock().unwrap().as_slice(), &["refs/heads/main".to_string()]);
    }

    #[tokio::test]
    async fn force_allows_non_fast_forward() {
        let (local, backend) = fixture();
        let mut session = session(backend);
        let report = session
            .push(&local, &["dev"], PushFlags::FORCE)
            .await
            .unwrap();
        let dev = report.update("refs/heads/dev").unwrap();
        assert_eq!(dev.status, PushStatus::Accepted);
        assert_eq!(dev.flag(), '+');

        let report = session.push(&local, &["+dev:dev"], PushFlags::empty()).await.unwrap();
        assert!(report.is_ok());
    }

    #[tokio::test]
    async fn dry_run_classifies_without_pushing() {
        let (local, backend) = fixture();
        let calls = backend.push_calls.clone();
        let mut dry = session(backend.clone());
        let dry_report = dry
            .push(&local, &["main", "dev", "topic"], PushFlags::DRY_RUN)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut real = session(backend);
        let real_report = real
            .push(&local, &["main", "dev", "topic"], PushFlags::empty())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let statuses = |r: &PushReport| r.updates().iter().map(|u| u.status.clone()).collect::<Vec<_>>();
        assert_eq!(statuses(&dry_report), statuses(&real_report));
        assert!(dry_report.is_dry_run());
    }

    #[tokio::test]
    async fn mirror_deletes_refs_missing_locally() {
        let (local, backend) = fixture();
        let mut session = session(backend);
        let report = session.push(&local, &[] as &[&str], PushFlags::MIRROR).await.unwrap();

        let stale = report.update("refs/heads/stale").unwrap();
        assert!(stale.is_delete());
        assert_eq!(stale.status, PushStatus::Accepted);
        // mirror forces the divergent branch through
        assert_eq!(report.update("refs/heads/dev").unwrap().status, PushStatus::Accepted);
        assert_eq!(report.update("refs/tags/v1").unwrap().status, PushStatus::UpToDate);
        assert!(report.update("refs/heads/topic").unwrap().is_create());
        assert!(report.update("HEAD").is_none());
    }

    #[tokio::test]
    async fn mirror_remote_implies_mirror_push() {
        let (local, backend) = fixture();
        let url = "ssh://git@example.com/r.git";
        let remote = RemoteDescriptor {
            mirror: true,
            ..RemoteDescriptor::new("backup", url)
        };
        let mut session = Session::new(Arc::new(remote), url, TransportKind::Ssh, Box::new(backend));

        let report = session
            .push(&local, &[] as &[&str], PushFlags::DRY_RUN)
            .await
            .unwrap();
        let stale = report.update("refs/heads/stale").unwrap();
        assert!(stale.is_delete());
        assert_eq!(stale.status, PushStatus::Accepted);
        assert!(report.update("refs/heads/topic").unwrap().is_create());
        assert_eq!(report.update("refs/heads/dev").unwrap().status, PushStatus::Accepted);

        // ALL on a mirror remote is the same conflict as ALL | MIRROR
        assert!(matches!(
            session.push(&local, &[] as &[&str], PushFlags::ALL).await,
            Err(TransportError::InvalidRefspec(_))
        ));
    }

    #[tokio::test]
    async fn mirror_with_refspecs_deletes_uncovered_refs() {
        let (local, backend) = fixture();
        let mut session = session(backend);
        let report = session
            .push(&local, &["main", "v1"], PushFlags::MIRROR | PushFlags::DRY_RUN)
            .await
            .unwrap();
        let names: Vec<&str> = report.updates().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            ["refs/heads/main", "refs/tags/v1", "refs/heads/dev", "refs/heads/stale"]
        );
        assert!(report.update("refs/heads/dev").unwrap().is_delete());
        assert!(report.update("refs/heads/stale").unwrap().is_delete());

        assert!(matches!(
            session
                .push(&local, &["main"], PushFlags::ALL | PushFlags::DRY_RUN)
                .await,
            Err(TransportError::InvalidRefspec(_))
        ));
        assert!(matches!(
            session
                .push(&local, &[] as &[&str], PushFlags::ALL | PushFlags::MIRROR)
                .await,
            Err(TransportError::InvalidRefspec(_))
        ));
    }

    #[tokio::test]
    async fn all_and_matching_modes() {
        let (local, backend) = fixture();
        let mut session = session(backend);

        let all = session.push(&local, &[] as &[&str], PushFlags::ALL | PushFlags::DRY_RUN).await.unwrap();
        let names: Vec<&str> = all.updates().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["refs/heads/main", "refs/heads/dev", "refs/heads/topic"]);

        let matching = session.push(&local, &[] as &[&str], PushFlags::DRY_RUN).await.unwrap();
        let names: Vec<&str> = matching.updates().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["refs/heads/main", "refs/heads/dev", "refs/tags/v1"]);
    }

    #[tokio::test]
    async fn delete_and_rename_refspecs() {
        let (local, backend) = fixture();
        let mut session = session(backend);
        let report = session
            .push(&local, &[":stale", "topic:feature", "HEAD:refs/heads/release"], PushFlags::DRY_RUN)
            .await
            .unwrap();
        assert!(report.update("refs/heads/stale").unwrap().is_delete());
        let feature = report.update("refs/heads/feature").unwrap();
        assert_eq!(feature.source.as_deref(), Some("refs/heads/topic"));
        assert!(feature.is_create());
        assert_eq!(
            report.update("refs/heads/release").unwrap().source.as_deref(),
            Some("refs/heads/main")
        );

        assert!(matches!(
            session.push(&local, &[":nope"], PushFlags::DRY_RUN).await,
            Err(TransportError::InvalidRefspec(_))
        ));
        assert!(matches!(
            session.push(&local, &["missing"], PushFlags::DRY_RUN).await,
            Err(TransportError::InvalidRefspec(_))
        ));
    }

    #[tokio::test]
    async fn unknown_remote_value_needs_fetch_first() {
        let (mut local, backend) = fixture();
        local.history.remove(&oid('c'));
        local.history.insert(oid('d'), vec![]);
        let mut session = session(backend);
        let report = session.push(&local, &["dev"], PushFlags::empty()).await.unwrap();
        assert_eq!(
            report.update("refs/heads/dev").unwrap().status,
            PushStatus::Rejected(RejectReason::FetchFirst)
        );
    }

    #[tokio::test]
    async fn push_refs_reports_remote_rejections_and_missing_status() {
        let (_, mut backend) = fixture();
        backend.refuse = Some("refs/heads/b".to_string());
        let mut session = session(backend);
        let updates = vec![
            RefUpdate::new("refs/heads/a", None, oid('1'), oid('2')),
            RefUpdate::new("refs/heads/b", None, oid('3'), oid('4')),
        ];
        let report = session.push_refs(updates, PushFlags::empty()).await.unwrap();
        assert_eq!(report.update("refs/heads/a").unwrap().status, PushStatus::Accepted);
        assert_eq!(
            report.update("refs/heads/b").unwrap().status,
            PushStatus::Rejected(RejectReason::Remote("hook declined".to_string()))
        );

        let (_, mut silent) = fixture();
        silent.skip_status = true;
        let mut session = self::session(silent);
        let report = session
            .push_refs(
                vec![RefUpdate::new("refs/heads/a", None, oid('1'), oid('2'))],
                PushFlags::empty(),
            )
            .await
            .unwrap();
        assert!(matches!(
            report.update("refs/heads/a").unwrap().status,
            PushStatus::Rejected(RejectReason::NotAttempted(_))
        ));
    }

    #[tokio::test]
    async fn porcelain_changes_only_output() {
        let (local, backend) = fixture();
        let pushed = backend.pushed.clone();
        let mut session = session(backend);
        let report = session
            .push(&local, &["main", "dev", "v1"], PushFlags::PORCELAIN)
            .await
            .unwrap();
        assert_eq!(pushed.lock().unwrap().len(), 1);

        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "To ssh://example.com/r.git");
        assert_eq!(lines[1], " \trefs/heads/main:refs/heads/main\taaaaaaa..bbbbbbb");
        assert_eq!(
            lines[2],
            "!\trefs/heads/dev:refs/heads/dev\t[rejected] (non-fast-forward)"
        );
        assert_eq!(lines[3], "=\trefs/tags/v1:refs/tags/v1\t[up to date]");
        assert_eq!(lines[4], "Done");
    }

    #[tokio::test]
    async fn human_report_hides_up_to_date_unless_verbose() {
        let (local, backend) = fixture();
        let mut session = session(backend);
        let report = session.push(&local, &["v1"], PushFlags::empty()).await.unwrap();
        assert!(report.to_string().contains("Everything up-to-date"));

        let report = session
            .push(&local, &["v1", "main"], PushFlags::VERBOSE | PushFlags::DRY_RUN)
            .await
            .unwrap();
        let text = report.to_string();
        assert!(text.contains("[up to date]      v1 -> v1"));
        assert!(text.contains("aaaaaaa..bbbbbbb  main -> main"));
    }
}

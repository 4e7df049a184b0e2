//! Commit editor state machine
//!
//! Accumulates a client's proposed changes against a base revision and, on
//! finalize, turns them into a new Git commit published through the
//! revision cache. All pending state lives and dies with the editor, so an
//! abort is a single drop, not a distributed rollback. The engine never
//! auto-retries a lost publish race; that policy belongs to the caller.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::locks::LockTable;
use crate::object::{FileMode, GitCommit, GitTree, GitTreeEntry, ObjectId};
use crate::paths;
use crate::props;
use crate::revcache::Revision;
use crate::store::GitStore;
use crate::treewalk::{NodeKind, TreeResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Accumulating,
    Finalizing,
    Committed,
    Aborted,
}

/// Pending operation for one path
#[derive(Debug, Clone)]
enum NodeOp {
    AddDir {
        /// Tree id to seed the directory from (copy support)
        copy_from: Option<ObjectId>,
    },
    AddFile {
        /// Set by `set_file_content`; must be present by finalize
        content_id: Option<ObjectId>,
        mode: FileMode,
    },
    EditFile {
        content_id: Option<ObjectId>,
        mode: Option<FileMode>,
    },
    Delete,
}

#[derive(Debug, Clone)]
struct PendingChange {
    op: NodeOp,
    base_revision: u64,
}

#[derive(Debug, Clone)]
pub struct EditorOptions {
    /// Bounded wait for commit-time path guards
    pub lock_wait: Duration,
    /// Keep supplied locks alive after a successful commit
    pub keep_locks: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(10),
            keep_locks: false,
        }
    }
}

pub struct CommitEditor {
    resolver: Arc<TreeResolver>,
    locks: Arc<LockTable>,
    base_revision: u64,
    state: EditorState,
    pending: BTreeMap<String, PendingChange>,
    mergeinfo: BTreeMap<String, String>,
    lock_tokens: HashMap<String, String>,
    options: EditorOptions,
}

impl CommitEditor {
    /// Open an editor bound to a base revision snapshot
    pub async fn open(
        resolver: Arc<TreeResolver>,
        locks: Arc<LockTable>,
        base_revision: u64,
        options: EditorOptions,
    ) -> Result<Self> {
        // Fails with NoSuchRevision if the client's base is bogus.
        resolver.revcache().resolve(base_revision).await?;
        Ok(Self {
            resolver,
            locks,
            base_revision,
            state: EditorState::Accumulating,
            pending: BTreeMap::new(),
            mergeinfo: BTreeMap::new(),
            lock_tokens: HashMap::new(),
            options,
        })
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn base_revision(&self) -> u64 {
        self.base_revision
    }

    /// Paths this editor intends to change, normalized and sorted
    pub fn touched_paths(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    fn ensure_accumulating(&self) -> Result<()> {
        if self.state != EditorState::Accumulating {
            return Err(BridgeError::ProtocolViolation(format!(
                "editor operation in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn store(&self) -> &Arc<dyn GitStore> {
        self.resolver.revcache().store()
    }

    /// Whether the parent of `path` will exist once pending changes apply
    async fn parent_available(&self, path: &str) -> Result<bool> {
        let Some(parent) = paths::parent(path) else {
            return Ok(true); // the root itself
        };
        if parent.is_empty() {
            return Ok(true);
        }
        match self.pending.get(parent).map(|p| &p.op) {
            Some(NodeOp::AddDir { .. }) => return Ok(true),
            Some(NodeOp::Delete) => return Ok(false),
            _ => {}
        }
        Ok(matches!(
            self.resolver.check_path(self.base_revision, parent).await?,
            Some(NodeKind::Directory)
        ))
    }

    /// Tree id of a directory at a revision, for copy seeding
    async fn tree_id_at(&self, revision: u64, path: &str) -> Result<ObjectId> {
        let path = paths::normalize(path);
        if path.is_empty() {
            return match self.resolver.root_tree_id(revision).await? {
                Some(id) => Ok(id),
                None => self.store().write_tree(&GitTree::new()).await,
            };
        }
        let parent = paths::parent(&path).unwrap_or("");
        let tree = self.resolver.dir_tree(revision, parent).await?;
        let entry = tree
            .get(paths::basename(&path))
            .filter(|e| e.mode.is_dir())
            .ok_or_else(|| BridgeError::NotFound(format!("/{}", path)))?;
        Ok(entry.id)
    }

    /// OutOfDate when `path` (or, for a directory, anything under it)
    /// changed in a revision after the client's stated base
    ///
    /// The editor itself opens at head, so this is the only place a stale
    /// working copy is caught; without it an old base silently overwrites
    /// newer content.
    async fn check_up_to_date(&self, path: &str, base_revision: u64) -> Result<()> {
        for number in (base_revision + 1)..=self.base_revision {
            let revision = self.resolver.revcache().resolve(number).await?;
            if revision
                .changed_paths
                .iter()
                .any(|c| paths::is_ancestor_or_self(path, &c.path))
            {
                return Err(BridgeError::OutOfDate {
                    path: format!("/{}", path),
                    base_revision,
                });
            }
        }
        Ok(())
    }

    async fn check_addable(&mut self, path: &str, base_revision: u64) -> Result<()> {
        self.ensure_accumulating()?;
        if !self.parent_available(path).await? {
            return Err(BridgeError::NotFound(format!("/{}", path)));
        }
        // A pending delete at the same path turns the add into a replace.
        if let Some(pending) = self.pending.get(path) {
            if matches!(pending.op, NodeOp::Delete) {
                return Ok(());
            }
            return Err(BridgeError::ProtocolViolation(format!(
                "path '/{}' already has a pending change",
                path
            )));
        }
        if self.resolver.check_path(base_revision, path).await?.is_some() {
            return Err(BridgeError::OutOfDate {
                path: format!("/{}", path),
                base_revision,
            });
        }
        Ok(())
    }

    /// Add a directory, optionally copied from an existing one
    pub async fn add_directory(
        &mut self,
        path: &str,
        copy_from: Option<(&str, u64)>,
    ) -> Result<()> {
        let path = paths::normalize(path);
        self.check_addable(&path, self.base_revision).await?;
        let copy_from = match copy_from {
            Some((src, rev)) => Some(self.tree_id_at(rev, src).await?),
            None => None,
        };
        self.pending.insert(
            path,
            PendingChange {
                op: NodeOp::AddDir { copy_from },
                base_revision: self.base_revision,
            },
        );
        Ok(())
    }

    /// Open an existing directory for property changes
    pub async fn open_directory(&mut self, path: &str, base_revision: u64) -> Result<()> {
        self.ensure_accumulating()?;
        let path = paths::normalize(path);
        match self.resolver.check_path(base_revision, &path).await? {
            Some(NodeKind::Directory) => Ok(()),
            _ => Err(BridgeError::OutOfDate {
                path: format!("/{}", path),
                base_revision,
            }),
        }
    }

    /// Add a file, optionally copied from an existing one
    pub async fn add_file(&mut self, path: &str, copy_from: Option<(&str, u64)>) -> Result<()> {
        let path = paths::normalize(path);
        self.check_addable(&path, self.base_revision).await?;
        let (content_id, mode) = match copy_from {
            Some((src, rev)) => {
                let entry = self.resolver.entry_at(rev, src).await?;
                match entry.content_id {
                    Some(id) => (Some(id), entry.mode),
                    None => {
                        return Err(BridgeError::ProtocolViolation(format!(
                            "cannot copy directory '{}' as a file",
                            src
                        )))
                    }
                }
            }
            None => (None, FileMode::Normal),
        };
        self.pending.insert(
            path,
            PendingChange {
                op: NodeOp::AddFile { content_id, mode },
                base_revision: self.base_revision,
            },
        );
        Ok(())
    }

    /// Open an existing file for content or property modification
    pub async fn open_file(&mut self, path: &str, base_revision: u64) -> Result<()> {
        self.ensure_accumulating()?;
        let path = paths::normalize(path);
        match self.resolver.check_path(base_revision, &path).await? {
            Some(NodeKind::File) => {}
            _ => {
                return Err(BridgeError::OutOfDate {
                    path: format!("/{}", path),
                    base_revision,
                })
            }
        }
        self.check_up_to_date(&path, base_revision).await?;
        self.pending.entry(path).or_insert(PendingChange {
            op: NodeOp::EditFile {
                content_id: None,
                mode: None,
            },
            base_revision,
        });
        Ok(())
    }

    /// Delete a file or directory as of `base_revision`
    pub async fn delete_entry(&mut self, path: &str, base_revision: u64) -> Result<()> {
        self.ensure_accumulating()?;
        let path = paths::normalize(path);
        if path.is_empty() {
            return Err(BridgeError::ProtocolViolation(
                "cannot delete the repository root".into(),
            ));
        }
        if self.resolver.check_path(base_revision, &path).await?.is_none() {
            return Err(BridgeError::OutOfDate {
                path: format!("/{}", path),
                base_revision,
            });
        }
        self.check_up_to_date(&path, base_revision).await?;
        self.pending.insert(
            path,
            PendingChange {
                op: NodeOp::Delete,
                base_revision,
            },
        );
        Ok(())
    }

    /// Store new content for a pending file
    pub async fn set_file_content(&mut self, path: &str, content: Bytes) -> Result<()> {
        self.ensure_accumulating()?;
        let path = paths::normalize(path);
        let blob_id = self.store().write_blob(content).await?;
        match self.pending.get_mut(&path).map(|p| &mut p.op) {
            Some(NodeOp::AddFile { content_id, .. }) => {
                *content_id = Some(blob_id);
                Ok(())
            }
            Some(NodeOp::EditFile { content_id, .. }) => {
                *content_id = Some(blob_id);
                Ok(())
            }
            _ => Err(BridgeError::ProtocolViolation(format!(
                "text delta for path '/{}' which is not open for editing",
                path
            ))),
        }
    }

    /// Current content of a file as this editor sees it
    ///
    /// Used by the protocol layer as the base text for incoming deltas.
    /// For a pending add this is the copied source content (or empty);
    /// otherwise it is the file at the change's base revision.
    pub async fn base_content(&self, path: &str) -> Result<Bytes> {
        let path = paths::normalize(path);
        match self.pending.get(&path) {
            Some(PendingChange {
                op: NodeOp::AddFile { content_id, .. },
                ..
            })
            | Some(PendingChange {
                op: NodeOp::EditFile { content_id: content_id @ Some(_), .. },
                ..
            }) => {
                return match content_id {
                    Some(id) => self.store().read_blob(*id).await,
                    None => Ok(Bytes::new()),
                };
            }
            _ => {}
        }
        let revision = self
            .pending
            .get(&path)
            .map(|p| p.base_revision)
            .unwrap_or(self.base_revision);
        let entry = self.resolver.entry_at(revision, &path).await?;
        match entry.content_id {
            Some(id) => self.store().read_blob(id).await,
            None => Ok(Bytes::new()),
        }
    }

    /// Apply a property change to a pending path
    pub async fn change_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        self.ensure_accumulating()?;
        props::check_storable(name)?;
        let path = paths::normalize(path);

        if name == props::SVN_MERGEINFO {
            match value {
                Some(v) => {
                    self.mergeinfo.insert(path, v.to_string());
                }
                None => {
                    self.mergeinfo.remove(&path);
                }
            }
            return Ok(());
        }

        match self.pending.get_mut(&path).map(|p| &mut p.op) {
            Some(NodeOp::AddFile { mode, .. }) => {
                *mode = props::apply_to_mode(*mode, name, value);
                Ok(())
            }
            Some(NodeOp::EditFile { mode, content_id: _ }) => {
                let current = match *mode {
                    Some(m) => m,
                    None => self.resolver.entry_at(self.base_revision, &path).await?.mode,
                };
                *mode = Some(props::apply_to_mode(current, name, value));
                Ok(())
            }
            _ => Err(BridgeError::PropertyUnsupported {
                name: name.to_string(),
            }),
        }
    }

    /// Record a lock token supplied with the commit
    pub fn supply_lock_token(&mut self, path: &str, token: &str) {
        self.lock_tokens
            .insert(paths::normalize(path), token.to_string());
    }

    /// Discard all pending state; idempotent
    pub fn abort(&mut self) {
        if self.state == EditorState::Committed {
            return;
        }
        self.pending.clear();
        self.mergeinfo.clear();
        self.state = EditorState::Aborted;
    }

    /// Turn the accumulated changes into a published revision
    pub async fn finalize(&mut self, author: &str, message: &str) -> Result<Revision> {
        self.ensure_accumulating()?;
        self.state = EditorState::Finalizing;
        match self.finalize_inner(author, message).await {
            Ok(revision) => {
                self.state = EditorState::Committed;
                Ok(revision)
            }
            Err(e) => {
                // Recoverable races drop back to Accumulating so the
                // caller can decide whether to retry.
                if e.is_recoverable() {
                    self.state = EditorState::Accumulating;
                } else {
                    self.abort();
                }
                Err(e)
            }
        }
    }

    async fn finalize_inner(&mut self, author: &str, message: &str) -> Result<Revision> {
        let touched = self.touched_paths();
        let revcache = self.resolver.revcache().clone();

        // Canonical-order path guards; bounded wait.
        let _guards = self.locks.guard_paths(&touched, self.options.lock_wait).await?;

        // Re-validate against the *current* head, not the editor's base.
        let head = revcache.head_revision().await;
        for number in (self.base_revision + 1)..=head {
            let revision = revcache.resolve(number).await?;
            for change in &revision.changed_paths {
                if touched.iter().any(|t| paths::conflicts(t, &change.path)) {
                    debug!(rev = number, path = %change.path, "finalize lost to published change");
                    return Err(BridgeError::ConcurrentModification);
                }
            }
        }

        // Lock preconditions before any tree mutation.
        self.locks.check_for_commit(&touched, &self.lock_tokens)?;

        // Build the new root tree bottom-up, layered on the head tree.
        let head_commit = revcache.head_commit_id().await;
        let base_tree = match head_commit {
            Some(id) => Some(self.store().read_commit(id).await?.tree_id),
            None => None,
        };
        let mut change_root = ChangeNode::default();
        for (path, change) in &self.pending {
            change_root.insert(path, change.op.clone());
        }
        let tree_id = match apply_changes(self.store().clone(), base_tree, &change_root).await? {
            Some(id) => id,
            None => self.store().write_tree(&GitTree::new()).await?,
        };

        let commit = GitCommit::new(
            tree_id,
            head_commit.into_iter().collect(),
            author.to_string(),
            chrono::Utc::now().timestamp(),
            message.to_string(),
        );
        let commit_id = self.store().write_commit(&commit).await?;
        let revision = revcache
            .publish(head_commit, commit_id, self.mergeinfo.clone())
            .await?;

        if !self.options.keep_locks {
            self.locks.release_after_commit(&touched, &self.lock_tokens);
        }
        debug!(rev = revision.number, paths = touched.len(), "commit finalized");
        Ok(revision)
    }
}

/// Nested view of the pending change set, grouped by path segment
#[derive(Default)]
struct ChangeNode {
    op: Option<NodeOp>,
    children: BTreeMap<String, ChangeNode>,
}

impl ChangeNode {
    fn insert(&mut self, path: &str, op: NodeOp) {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.op = Some(op);
    }
}

/// Apply a change node onto a base tree, writing new trees bottom-up
///
/// Returns the new tree id, or `None` when the result is the unchanged
/// base (callers treat `None` base + `None` result as the empty tree).
fn apply_changes<'a>(
    store: Arc<dyn GitStore>,
    base: Option<ObjectId>,
    node: &'a ChangeNode,
) -> BoxFuture<'a, Result<Option<ObjectId>>> {
    async move {
        let mut tree = match base {
            Some(id) => store.read_tree(id).await?,
            None => GitTree::new(),
        };

        for (name, child) in &node.children {
            let existing = tree.get(name).copied();
            match &child.op {
                None => {
                    // Interior node: descend into an existing directory.
                    let entry = existing
                        .filter(|e| e.mode.is_dir())
                        .ok_or_else(|| BridgeError::NotFound(format!("/{}", name)))?;
                    if let Some(sub) = apply_changes(store.clone(), Some(entry.id), child).await? {
                        tree.insert(name.clone(), GitTreeEntry::new(FileMode::Directory, sub));
                    }
                }
                Some(NodeOp::Delete) => {
                    tree.remove(name);
                }
                Some(NodeOp::AddDir { copy_from }) => {
                    let sub = apply_changes(store.clone(), *copy_from, child).await?;
                    let sub = match (sub, copy_from) {
                        (Some(id), _) => id,
                        (None, Some(id)) => *id,
                        (None, None) => store.write_tree(&GitTree::new()).await?,
                    };
                    tree.insert(name.clone(), GitTreeEntry::new(FileMode::Directory, sub));
                }
                Some(NodeOp::AddFile { content_id, mode }) => {
                    let id = content_id.ok_or_else(|| {
                        BridgeError::ProtocolViolation(format!(
                            "file '{}' added without content",
                            name
                        ))
                    })?;
                    tree.insert(name.clone(), GitTreeEntry::new(*mode, id));
                }
                Some(NodeOp::EditFile { content_id, mode }) => {
                    let entry = existing
                        .filter(|e| !e.mode.is_dir())
                        .ok_or_else(|| BridgeError::NotFound(format!("/{}", name)))?;
                    let id = content_id.unwrap_or(entry.id);
                    let mode = mode.unwrap_or(entry.mode);
                    tree.insert(name.clone(), GitTreeEntry::new(mode, id));
                }
            }
        }

        let id = store.write_tree(&tree).await?;
        if Some(id) == base {
            return Ok(base);
        }
        Ok(Some(id))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revcache::RevisionCache;
    use crate::store::MemoryGitStore;
    use crate::treewalk::TreeResolver;

    struct Fixture {
        resolver: Arc<TreeResolver>,
        locks: Arc<LockTable>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryGitStore::new());
        let cache = RevisionCache::open(store, "refs/heads/master", None)
            .await
            .unwrap();
        Fixture {
            resolver: Arc::new(TreeResolver::new(Arc::new(cache))),
            locks: Arc::new(LockTable::new()),
        }
    }

    impl Fixture {
        async fn editor(&self, base: u64) -> CommitEditor {
            CommitEditor::open(
                self.resolver.clone(),
                self.locks.clone(),
                base,
                EditorOptions::default(),
            )
            .await
            .unwrap()
        }

        /// Seed /trunk with x.txt and y.txt at r1
        async fn seed_trunk(&self) -> u64 {
            let mut editor = self.editor(0).await;
            editor.add_directory("/trunk", None).await.unwrap();
            editor.add_file("/trunk/x.txt", None).await.unwrap();
            editor
                .set_file_content("/trunk/x.txt", Bytes::from_static(b"x"))
                .await
                .unwrap();
            editor.add_file("/trunk/y.txt", None).await.unwrap();
            editor
                .set_file_content("/trunk/y.txt", Bytes::from_static(b"y"))
                .await
                .unwrap();
            editor.finalize("seed", "layout").await.unwrap().number
        }
    }

    #[tokio::test]
    async fn test_add_and_read_back() {
        let fx = fixture().await;
        let mut editor = fx.editor(0).await;
        editor.add_directory("/trunk", None).await.unwrap();
        editor.add_file("/trunk/hello.txt", None).await.unwrap();
        editor
            .set_file_content("/trunk/hello.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let revision = editor.finalize("alice", "add hello").await.unwrap();
        assert_eq!(revision.number, 1);
        assert_eq!(revision.author, "alice");
        assert_eq!(editor.state(), EditorState::Committed);

        let entry = fx.resolver.entry_at(1, "/trunk/hello.txt").await.unwrap();
        let content = fx
            .resolver
            .revcache()
            .store()
            .read_blob(entry.content_id.unwrap())
            .await
            .unwrap();
        assert_eq!(content.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_delete_round_trip() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        editor.delete_entry("/trunk/x.txt", base).await.unwrap();
        let revision = editor.finalize("alice", "rm x").await.unwrap();

        // Gone at the new revision, still there at the old one.
        assert_eq!(
            fx.resolver.check_path(revision.number, "/trunk/x.txt").await.unwrap(),
            None
        );
        assert!(fx.resolver.entry_at(base, "/trunk/x.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_add_existing_path_is_out_of_date() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        let err = editor.add_file("/trunk/x.txt", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::OutOfDate { .. }));
    }

    #[tokio::test]
    async fn test_stale_base_cannot_overwrite_newer_commit() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        editor.open_file("/trunk/x.txt", base).await.unwrap();
        editor
            .set_file_content("/trunk/x.txt", Bytes::from_static(b"v2"))
            .await
            .unwrap();
        let head = editor.finalize("alice", "v2").await.unwrap().number;

        // A working copy still at the old revision must not clobber the
        // newer content, even though the editor opens at head.
        let mut stale = fx.editor(head).await;
        let err = stale.open_file("/trunk/x.txt", base).await.unwrap_err();
        assert!(matches!(err, BridgeError::OutOfDate { .. }));
        let err = stale.delete_entry("/trunk/x.txt", base).await.unwrap_err();
        assert!(matches!(err, BridgeError::OutOfDate { .. }));

        // The untouched sibling is still editable at the old base.
        stale.open_file("/trunk/y.txt", base).await.unwrap();

        // Deleting the whole directory at the old base is stale too: a
        // change anywhere under it counts.
        let err = stale.delete_entry("/trunk", base).await.unwrap_err();
        assert!(matches!(err, BridgeError::OutOfDate { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_out_of_date() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        let err = editor.open_file("/trunk/nope.txt", base).await.unwrap_err();
        assert!(matches!(err, BridgeError::OutOfDate { .. }));
    }

    #[tokio::test]
    async fn test_disjoint_editors_both_succeed() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;

        let mut a = fx.editor(base).await;
        a.add_file("/trunk/a.txt", None).await.unwrap();
        a.set_file_content("/trunk/a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let mut b = fx.editor(base).await;
        b.open_file("/trunk/y.txt", base).await.unwrap();
        b.set_file_content("/trunk/y.txt", Bytes::from_static(b"why"))
            .await
            .unwrap();

        let ra = a.finalize("alice", "add a").await.unwrap();
        let rb = b.finalize("bob", "edit y").await.unwrap();
        assert_eq!((ra.number, rb.number), (base + 1, base + 2));

        // Both changes are present at the final head.
        assert!(fx.resolver.entry_at(rb.number, "/trunk/a.txt").await.is_ok());
        let y = fx.resolver.entry_at(rb.number, "/trunk/y.txt").await.unwrap();
        let content = fx
            .resolver
            .revcache()
            .store()
            .read_blob(y.content_id.unwrap())
            .await
            .unwrap();
        assert_eq!(content.as_ref(), b"why");
    }

    #[tokio::test]
    async fn test_overlapping_editors_one_loses() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;

        let mut a = fx.editor(base).await;
        a.open_file("/trunk/x.txt", base).await.unwrap();
        a.set_file_content("/trunk/x.txt", Bytes::from_static(b"from a"))
            .await
            .unwrap();

        let mut b = fx.editor(base).await;
        b.open_file("/trunk/x.txt", base).await.unwrap();
        b.set_file_content("/trunk/x.txt", Bytes::from_static(b"from b"))
            .await
            .unwrap();

        a.finalize("alice", "a wins").await.unwrap();
        let err = b.finalize("bob", "b loses").await.unwrap_err();
        assert!(matches!(err, BridgeError::ConcurrentModification));
        assert_eq!(b.state(), EditorState::Accumulating);
        assert_eq!(fx.resolver.revcache().head_revision().await, base + 1);
    }

    #[tokio::test]
    async fn test_lock_enforcement() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let lock = fx.locks.acquire("/trunk/x.txt", "alice", None).unwrap();

        // Bob commits without the token: LockMismatch, head untouched.
        let mut bob = fx.editor(base).await;
        bob.open_file("/trunk/x.txt", base).await.unwrap();
        bob.set_file_content("/trunk/x.txt", Bytes::from_static(b"bob"))
            .await
            .unwrap();
        let err = bob.finalize("bob", "no token").await.unwrap_err();
        assert!(matches!(err, BridgeError::LockMismatch { .. }));
        assert_eq!(fx.resolver.revcache().head_revision().await, base);

        // Alice commits with the token and the lock is released.
        let mut alice = fx.editor(base).await;
        alice.open_file("/trunk/x.txt", base).await.unwrap();
        alice
            .set_file_content("/trunk/x.txt", Bytes::from_static(b"alice"))
            .await
            .unwrap();
        alice.supply_lock_token("/trunk/x.txt", &lock.token);
        alice.finalize("alice", "with token").await.unwrap();
        assert!(fx.locks.get("/trunk/x.txt").is_none());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let fx = fixture().await;
        let mut editor = fx.editor(0).await;
        editor.add_directory("/trunk", None).await.unwrap();
        editor.abort();
        editor.abort();
        assert_eq!(editor.state(), EditorState::Aborted);
        assert!(editor.finalize("a", "m").await.is_err());
        assert_eq!(fx.resolver.revcache().head_revision().await, 0);
    }

    #[tokio::test]
    async fn test_executable_property_changes_mode() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        editor.open_file("/trunk/x.txt", base).await.unwrap();
        editor
            .change_prop("/trunk/x.txt", props::SVN_EXECUTABLE, Some("*"))
            .await
            .unwrap();
        let revision = editor.finalize("alice", "chmod").await.unwrap();
        let entry = fx
            .resolver
            .entry_at(revision.number, "/trunk/x.txt")
            .await
            .unwrap();
        assert_eq!(entry.mode, FileMode::Executable);
        assert_eq!(entry.properties.get(props::SVN_EXECUTABLE).unwrap(), "*");
    }

    #[tokio::test]
    async fn test_unsupported_property_rejected() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        editor.open_file("/trunk/x.txt", base).await.unwrap();
        let err = editor
            .change_prop("/trunk/x.txt", "user:custom", Some("v"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PropertyUnsupported { .. }));
    }

    #[tokio::test]
    async fn test_copy_directory() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        editor.add_directory("/branches", None).await.unwrap();
        editor
            .add_directory("/branches/feature", Some(("/trunk", base)))
            .await
            .unwrap();
        let revision = editor.finalize("alice", "branch").await.unwrap();
        let entry = fx
            .resolver
            .entry_at(revision.number, "/branches/feature/x.txt")
            .await
            .unwrap();
        assert_eq!(entry.kind, NodeKind::File);
    }

    #[tokio::test]
    async fn test_mergeinfo_passes_through() {
        let fx = fixture().await;
        let base = fx.seed_trunk().await;
        let mut editor = fx.editor(base).await;
        editor.open_file("/trunk/x.txt", base).await.unwrap();
        editor
            .set_file_content("/trunk/x.txt", Bytes::from_static(b"merged"))
            .await
            .unwrap();
        editor
            .change_prop("/trunk/x.txt", props::SVN_MERGEINFO, Some("/branches/f:1-2"))
            .await
            .unwrap();
        let revision = editor.finalize("alice", "merge").await.unwrap();
        let entry = fx
            .resolver
            .entry_at(revision.number, "/trunk/x.txt")
            .await
            .unwrap();
        assert_eq!(
            entry.properties.get(props::SVN_MERGEINFO).unwrap(),
            "/branches/f:1-2"
        );
    }
}

//! Revision cache: the SVN revision number <-> Git commit mapping
//!
//! Owns the only writer path for new revisions. Numbers are assigned by
//! first-parent topological order from the configured branch tip, so
//! re-opening the same repository always yields identical numbering. The
//! SQLite index is an accelerator, never a source of truth: it is verified
//! against and rebuilt from the Git history on open.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::object::{GitTree, ObjectId};
use crate::paths;
use crate::store::GitStore;

/// What happened to a path in a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Replaced,
}

impl ChangeKind {
    /// Single-letter code used by `svn log -v`
    pub fn code(&self) -> &'static str {
        match self {
            ChangeKind::Added => "A",
            ChangeKind::Deleted => "D",
            ChangeKind::Modified => "M",
            ChangeKind::Replaced => "R",
        }
    }
}

/// One entry of a revision's changed-paths index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedPath {
    pub path: String,
    pub kind: ChangeKind,
    pub is_dir: bool,
    /// Opaque svn:mergeinfo pass-through recorded at commit time
    pub mergeinfo: Option<String>,
}

/// Immutable, published revision
#[derive(Debug, Clone)]
pub struct Revision {
    pub number: u64,
    /// `None` only for the synthetic empty revision 0
    pub commit_id: Option<ObjectId>,
    pub author: String,
    pub date: i64,
    pub message: String,
    pub changed_paths: Vec<ChangedPath>,
}

impl Revision {
    fn empty_root() -> Self {
        Self {
            number: 0,
            commit_id: None,
            author: String::new(),
            date: 0,
            message: String::new(),
            changed_paths: Vec::new(),
        }
    }
}

/// Diff two trees, producing changed paths in sorted order
///
/// `old`/`new` are tree ids; `None` stands for the empty tree. Directory
/// additions list the directory and everything below it; deletions list
/// only the deleted root, matching what SVN reports.
pub async fn diff_trees(
    store: &dyn GitStore,
    old: Option<ObjectId>,
    new: Option<ObjectId>,
) -> Result<Vec<ChangedPath>> {
    let mut out = Vec::new();
    let mut stack: Vec<(String, Option<ObjectId>, Option<ObjectId>)> =
        vec![(String::new(), old, new)];

    while let Some((prefix, old_id, new_id)) = stack.pop() {
        if old_id == new_id {
            continue;
        }
        let old_tree = match old_id {
            Some(id) => store.read_tree(id).await?,
            None => GitTree::new(),
        };
        let new_tree = match new_id {
            Some(id) => store.read_tree(id).await?,
            None => GitTree::new(),
        };

        let mut names: Vec<&String> = old_tree.entries.keys().collect();
        for name in new_tree.entries.keys() {
            if !old_tree.entries.contains_key(name) {
                names.push(name);
            }
        }

        for name in names {
            let path = paths::join(&prefix, name);
            match (old_tree.get(name), new_tree.get(name)) {
                (None, Some(added)) => {
                    out.push(ChangedPath {
                        path: path.clone(),
                        kind: ChangeKind::Added,
                        is_dir: added.mode.is_dir(),
                        mergeinfo: None,
                    });
                    if added.mode.is_dir() {
                        stack.push((path, None, Some(added.id)));
                    }
                }
                (Some(removed), None) => {
                    out.push(ChangedPath {
                        path,
                        kind: ChangeKind::Deleted,
                        is_dir: removed.mode.is_dir(),
                        mergeinfo: None,
                    });
                }
                (Some(before), Some(after)) => {
                    if before.id == after.id && before.mode == after.mode {
                        continue;
                    }
                    match (before.mode.is_dir(), after.mode.is_dir()) {
                        (true, true) => stack.push((path, Some(before.id), Some(after.id))),
                        (false, false) => out.push(ChangedPath {
                            path,
                            kind: ChangeKind::Modified,
                            is_dir: false,
                            mergeinfo: None,
                        }),
                        _ => {
                            out.push(ChangedPath {
                                path: path.clone(),
                                kind: ChangeKind::Replaced,
                                is_dir: after.mode.is_dir(),
                                mergeinfo: None,
                            });
                            if after.mode.is_dir() {
                                stack.push((path, None, Some(after.id)));
                            }
                        }
                    }
                }
                (None, None) => unreachable!(),
            }
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// Persistent, append-only revision index
pub struct RevisionCache {
    store: Arc<dyn GitStore>,
    ref_name: String,
    uuid: String,
    revisions: RwLock<Vec<Revision>>,
    /// Single-writer discipline for publish; readers never take this.
    publish_lock: AsyncMutex<()>,
    index: Option<std::sync::Mutex<Connection>>,
}

fn open_index(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS revisions (
            rev INTEGER PRIMARY KEY,
            commit_id BLOB NOT NULL,
            author TEXT NOT NULL,
            date INTEGER NOT NULL,
            message TEXT NOT NULL,
            changed_paths BLOB NOT NULL
        );",
    )?;
    Ok(conn)
}

fn index_row(conn: &Connection, rev: u64) -> Result<Option<Revision>> {
    let mut stmt = conn.prepare_cached(
        "SELECT commit_id, author, date, message, changed_paths FROM revisions WHERE rev=?1",
    )?;
    let mut rows = stmt.query(rusqlite::params![rev as i64])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let commit_blob: Vec<u8> = row.get(0)?;
    if commit_blob.len() != 20 {
        return Err(BridgeError::Database(format!(
            "revision index row r{} has a malformed commit id",
            rev
        )));
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&commit_blob);
    let changed_blob: Vec<u8> = row.get(4)?;
    Ok(Some(Revision {
        number: rev,
        commit_id: Some(ObjectId::new(arr)),
        author: row.get(1)?,
        date: row.get(2)?,
        message: row.get(3)?,
        changed_paths: bincode::deserialize(&changed_blob)?,
    }))
}

fn index_insert(conn: &Connection, revision: &Revision) -> Result<()> {
    let commit_id = revision
        .commit_id
        .ok_or_else(|| BridgeError::Database("cannot index the synthetic revision".into()))?;
    conn.execute(
        "INSERT OR REPLACE INTO revisions (rev, commit_id, author, date, message, changed_paths)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            revision.number as i64,
            commit_id.as_bytes().as_slice(),
            revision.author,
            revision.date,
            revision.message,
            bincode::serialize(&revision.changed_paths)?,
        ],
    )?;
    Ok(())
}

impl RevisionCache {
    /// Open the cache, rebuilding the number mapping from the branch tip
    pub async fn open(
        store: Arc<dyn GitStore>,
        ref_name: impl Into<String>,
        index_path: Option<&Path>,
    ) -> Result<Self> {
        let ref_name = ref_name.into();
        let index = match index_path {
            Some(path) => Some(std::sync::Mutex::new(open_index(path)?)),
            None => None,
        };

        let uuid = {
            let mut uuid = None;
            if let Some(conn) = &index {
                let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                uuid = conn
                    .query_row("SELECT value FROM meta WHERE key='uuid'", [], |r| r.get(0))
                    .ok();
            }
            match uuid {
                Some(u) => u,
                None => {
                    let u = uuid::Uuid::new_v4().to_string();
                    if let Some(conn) = &index {
                        let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                        conn.execute(
                            "INSERT OR REPLACE INTO meta (key, value) VALUES ('uuid', ?1)",
                            rusqlite::params![u],
                        )?;
                    }
                    u
                }
            }
        };

        // First-parent chain from the tip, oldest first.
        let mut chain = Vec::new();
        if let Some(tip) = store.read_ref(&ref_name).await? {
            let mut cursor = Some(tip);
            while let Some(id) = cursor {
                let commit = store.read_commit(id).await?;
                cursor = commit.first_parent();
                chain.push((id, commit));
            }
            chain.reverse();
        }

        let mut revisions = vec![Revision::empty_root()];
        let mut prev_tree: Option<ObjectId> = None;
        let mut rebuilt = 0usize;
        for (i, (commit_id, commit)) in chain.iter().enumerate() {
            let number = (i + 1) as u64;
            let cached = match &index {
                Some(conn) => {
                    let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                    index_row(&conn, number)?
                }
                None => None,
            };
            let revision = match cached {
                Some(rev) if rev.commit_id == Some(*commit_id) => rev,
                _ => {
                    let changed_paths =
                        diff_trees(store.as_ref(), prev_tree, Some(commit.tree_id)).await?;
                    let revision = Revision {
                        number,
                        commit_id: Some(*commit_id),
                        author: commit.author_name().to_string(),
                        date: commit.date,
                        message: commit.message.clone(),
                        changed_paths,
                    };
                    if let Some(conn) = &index {
                        let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                        index_insert(&conn, &revision)?;
                    }
                    rebuilt += 1;
                    revision
                }
            };
            prev_tree = Some(commit.tree_id);
            revisions.push(revision);
        }

        // Rows beyond the current history (branch rewound) are stale.
        if let Some(conn) = &index {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "DELETE FROM revisions WHERE rev > ?1",
                rusqlite::params![chain.len() as i64],
            )?;
        }

        info!(
            head = revisions.len() as u64 - 1,
            rebuilt, branch = %ref_name,
            "revision cache opened"
        );

        Ok(Self {
            store,
            ref_name,
            uuid,
            revisions: RwLock::new(revisions),
            publish_lock: AsyncMutex::new(()),
            index,
        })
    }

    /// Repository UUID reported to clients
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Highest published revision number
    pub async fn head_revision(&self) -> u64 {
        self.revisions.read().await.len() as u64 - 1
    }

    /// Commit id of the current head (`None` while only r0 exists)
    pub async fn head_commit_id(&self) -> Option<ObjectId> {
        self.revisions.read().await.last().and_then(|r| r.commit_id)
    }

    /// Resolve a revision number
    pub async fn resolve(&self, number: u64) -> Result<Revision> {
        self.revisions
            .read()
            .await
            .get(number as usize)
            .cloned()
            .ok_or(BridgeError::NoSuchRevision(number))
    }

    /// Latest opaque mergeinfo recorded at or below `revision` for `path`
    pub async fn mergeinfo(&self, revision: u64, path: &str) -> Option<String> {
        let path = paths::normalize(path);
        let revisions = self.revisions.read().await;
        let upper = std::cmp::min(revision as usize, revisions.len() - 1);
        for rev in revisions[..=upper].iter().rev() {
            for change in &rev.changed_paths {
                if change.path == path {
                    if let Some(info) = &change.mergeinfo {
                        return Some(info.clone());
                    }
                }
            }
        }
        None
    }

    /// Atomically allocate the next revision number for `new_commit`
    ///
    /// `parent` must be the current head's commit; anything else means a
    /// concurrent publish won and the caller has to rebase and retry. The
    /// race is surfaced, never silently merged.
    pub async fn publish(
        &self,
        parent: Option<ObjectId>,
        new_commit: ObjectId,
        mergeinfo: BTreeMap<String, String>,
    ) -> Result<Revision> {
        let _guard = self.publish_lock.lock().await;

        let head_commit = self.head_commit_id().await;
        if parent != head_commit {
            debug!(?parent, ?head_commit, "publish rejected: stale parent");
            return Err(BridgeError::ConcurrentModification);
        }

        let commit = self.store.read_commit(new_commit).await?;
        if commit.first_parent() != parent {
            return Err(BridgeError::StorageCorruption(
                "published commit does not extend its stated parent".into(),
            ));
        }

        if !self
            .store
            .compare_and_swap_ref(&self.ref_name, parent, new_commit)
            .await?
        {
            return Err(BridgeError::ConcurrentModification);
        }

        let parent_tree = match parent {
            Some(id) => Some(self.store.read_commit(id).await?.tree_id),
            None => None,
        };
        let mut changed_paths =
            diff_trees(self.store.as_ref(), parent_tree, Some(commit.tree_id)).await?;
        for change in &mut changed_paths {
            if let Some(info) = mergeinfo.get(&change.path) {
                change.mergeinfo = Some(info.clone());
            }
        }

        let mut revisions = self.revisions.write().await;
        let revision = Revision {
            number: revisions.len() as u64,
            commit_id: Some(new_commit),
            author: commit.author_name().to_string(),
            date: commit.date,
            message: commit.message.clone(),
            changed_paths,
        };
        if let Some(conn) = &self.index {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            index_insert(&conn, &revision)?;
        }
        revisions.push(revision.clone());
        debug!(rev = revision.number, commit = %new_commit, "revision published");
        Ok(revision)
    }

    /// Ref name the cache publishes to
    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    /// Store this cache reads from
    pub fn store(&self) -> &Arc<dyn GitStore> {
        &self.store
    }
}

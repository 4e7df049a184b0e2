//! Tree snapshot resolver
//!
//! Resolves `(revision, path)` to a directory/file entry by walking the Git
//! tree of the mapped commit, one tree level per path segment. Every
//! intermediate directory tree is memoized per revision, so listing a
//! directory and then resolving each child is O(depth) amortized. Cached
//! trees are immutable for a fixed revision (content addressing), which
//! makes eviction and racing inserts harmless.

use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::error::{BridgeError, Result};
use crate::object::{FileMode, GitTree, ObjectId};
use crate::paths;
use crate::props;
use crate::revcache::RevisionCache;

const DEFAULT_CACHE_ENTRIES: usize = 4096;

/// Node kind as SVN reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    /// Wire word for check-path/stat responses
    pub fn as_word(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "dir",
        }
    }
}

/// Resolved entry for a path at a revision
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: NodeKind,
    pub mode: FileMode,
    /// Blob id for files, `None` for directories
    pub content_id: Option<ObjectId>,
    pub size: u64,
    pub properties: BTreeMap<String, String>,
}

pub struct TreeResolver {
    revcache: Arc<RevisionCache>,
    trees: Mutex<LruCache<(u64, String), GitTree>>,
}

impl TreeResolver {
    pub fn new(revcache: Arc<RevisionCache>) -> Self {
        Self::with_capacity(revcache, DEFAULT_CACHE_ENTRIES)
    }

    pub fn with_capacity(revcache: Arc<RevisionCache>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            revcache,
            trees: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cache_get(&self, revision: u64, dir: &str) -> Option<GitTree> {
        let mut cache = self.trees.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&(revision, dir.to_string())).cloned()
    }

    fn cache_put(&self, revision: u64, dir: String, tree: GitTree) {
        let mut cache = self.trees.lock().unwrap_or_else(|e| e.into_inner());
        cache.put((revision, dir), tree);
    }

    /// Root tree id of a revision (`None` means the empty tree of r0)
    pub async fn root_tree_id(&self, revision: u64) -> Result<Option<ObjectId>> {
        let rev = self.revcache.resolve(revision).await?;
        match rev.commit_id {
            Some(commit_id) => {
                let commit = self.revcache.store().read_commit(commit_id).await?;
                Ok(Some(commit.tree_id))
            }
            None => Ok(None),
        }
    }

    /// Directory tree at `dir` in `revision`
    ///
    /// Fails with `NotFound` if the path does not exist or is a file.
    pub async fn dir_tree(&self, revision: u64, dir: &str) -> Result<GitTree> {
        let dir = paths::normalize(dir);
        if let Some(tree) = self.cache_get(revision, &dir) {
            return Ok(tree);
        }

        let mut current = match self.cache_get(revision, "") {
            Some(tree) => tree,
            None => {
                let tree = match self.root_tree_id(revision).await? {
                    Some(id) => self.revcache.store().read_tree(id).await?,
                    None => GitTree::new(),
                };
                self.cache_put(revision, String::new(), tree.clone());
                tree
            }
        };

        let mut walked = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            walked = paths::join(&walked, segment);
            if let Some(tree) = self.cache_get(revision, &walked) {
                current = tree;
                continue;
            }
            let entry = current
                .get(segment)
                .filter(|e| e.mode.is_dir())
                .ok_or_else(|| BridgeError::NotFound(format!("/{}", dir)))?;
            let tree = self.revcache.store().read_tree(entry.id).await?;
            self.cache_put(revision, walked.clone(), tree.clone());
            current = tree;
        }
        Ok(current)
    }

    /// Resolve a path to its entry at a revision
    pub async fn entry_at(&self, revision: u64, path: &str) -> Result<Entry> {
        let path = paths::normalize(path);
        if path.is_empty() {
            // Root is always a directory; make sure the revision exists.
            self.revcache.resolve(revision).await?;
            return self.directory_entry(revision, "").await;
        }

        let parent = paths::parent(&path).unwrap_or("");
        let tree = self.dir_tree(revision, parent).await?;
        let name = paths::basename(&path);
        let entry = tree
            .get(name)
            .ok_or_else(|| BridgeError::NotFound(format!("/{}", path)))?;

        if entry.mode.is_dir() {
            return self.directory_entry(revision, &path).await;
        }

        let size = self.revcache.store().blob_size(entry.id).await?;
        let mut properties = props::for_mode(entry.mode);
        if let Some(info) = self.revcache.mergeinfo(revision, &path).await {
            properties.insert(props::SVN_MERGEINFO.to_string(), info);
        }
        Ok(Entry {
            kind: NodeKind::File,
            mode: entry.mode,
            content_id: Some(entry.id),
            size,
            properties,
        })
    }

    async fn directory_entry(&self, revision: u64, path: &str) -> Result<Entry> {
        let mut properties = BTreeMap::new();
        if let Some(info) = self.revcache.mergeinfo(revision, path).await {
            properties.insert(props::SVN_MERGEINFO.to_string(), info);
        }
        Ok(Entry {
            kind: NodeKind::Directory,
            mode: FileMode::Directory,
            content_id: None,
            size: 0,
            properties,
        })
    }

    /// Node kind of a path, `None` if it does not exist
    pub async fn check_path(&self, revision: u64, path: &str) -> Result<Option<NodeKind>> {
        match self.entry_at(revision, path).await {
            Ok(entry) => Ok(Some(entry.kind)),
            Err(BridgeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Directory listing with resolved child entries
    pub async fn list_dir(&self, revision: u64, path: &str) -> Result<Vec<(String, Entry)>> {
        let path = paths::normalize(path);
        // Reject files explicitly; dir_tree would succeed for "" only.
        if let Some(kind) = self.check_path(revision, &path).await? {
            if kind == NodeKind::File {
                return Err(BridgeError::NotFound(format!("/{}", path)));
            }
        } else {
            return Err(BridgeError::NotFound(format!("/{}", path)));
        }

        let tree = self.dir_tree(revision, &path).await?;
        let mut out = Vec::with_capacity(tree.entries.len());
        for name in tree.entries.keys() {
            let child = paths::join(&path, name);
            let entry = self.entry_at(revision, &child).await?;
            out.push((name.clone(), entry));
        }
        Ok(out)
    }

    /// Last revision at or before `revision` that changed `path`
    ///
    /// For directories, any change at or below the path counts, matching
    /// SVN's created-rev semantics for dirents.
    pub async fn last_changed(&self, revision: u64, path: &str) -> Result<(u64, String, i64)> {
        let path = paths::normalize(path);
        let is_dir = matches!(
            self.check_path(revision, &path).await?,
            Some(NodeKind::Directory)
        );
        for number in (1..=revision).rev() {
            let rev = self.revcache.resolve(number).await?;
            let touched = rev.changed_paths.iter().any(|c| {
                if is_dir {
                    paths::is_ancestor_or_self(&path, &c.path)
                } else {
                    c.path == path
                }
            });
            if touched {
                return Ok((number, rev.author, rev.date));
            }
        }
        let r0 = self.revcache.resolve(0).await?;
        Ok((0, r0.author, r0.date))
    }

    /// Shared revision cache handle
    pub fn revcache(&self) -> &Arc<RevisionCache> {
        &self.revcache
    }
}

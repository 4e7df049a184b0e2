//! On-disk Git store backed by libgit2
//!
//! All object and ref plumbing is delegated to `git2`; this file only maps
//! between the bridge's object model and libgit2's. The repository handle is
//! not `Sync`, so it sits behind a mutex; every operation is synchronous
//! local-disk work and no guard is held across an await point.

use async_trait::async_trait;
use bytes::Bytes;
use git2::{ErrorCode, Oid, Repository, Signature, Time};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{BridgeError, Result};
use crate::object::{FileMode, GitCommit, GitTree, GitTreeEntry, ObjectId};
use crate::store::GitStore;

pub struct Git2Store {
    repo: Mutex<Repository>,
}

fn to_oid(id: ObjectId) -> Result<Oid> {
    Oid::from_bytes(id.as_bytes()).map_err(BridgeError::from)
}

fn from_oid(oid: Oid) -> ObjectId {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(oid.as_bytes());
    ObjectId::new(bytes)
}

fn missing(id: ObjectId, err: git2::Error) -> BridgeError {
    if err.code() == ErrorCode::NotFound {
        BridgeError::ObjectMissing(id)
    } else {
        BridgeError::from(err)
    }
}

impl Git2Store {
    /// Open an existing repository (bare or with a worktree)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path.as_ref())?;
        Ok(Self { repo: Mutex::new(repo) })
    }

    /// Initialize a new bare repository
    pub fn init_bare<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::init_bare(path.as_ref())?;
        Ok(Self { repo: Mutex::new(repo) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Repository> {
        // Mutex poisoning only happens if a panic escaped libgit2 glue;
        // continuing with the inner value is the least bad option.
        self.repo.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn signature_for(commit: &GitCommit) -> Result<Signature<'static>> {
        let identity = commit.identity();
        let (name, email) = match (identity.find('<'), identity.rfind('>')) {
            (Some(open), Some(close)) if open < close => (
                identity[..open].trim_end().to_string(),
                identity[open + 1..close].to_string(),
            ),
            _ => (identity.clone(), format!("{}@svngit.invalid", identity)),
        };
        Signature::new(&name, &email, &Time::new(commit.date, 0)).map_err(BridgeError::from)
    }
}

#[async_trait]
impl GitStore for Git2Store {
    async fn read_commit(&self, id: ObjectId) -> Result<GitCommit> {
        let repo = self.lock();
        let commit = repo.find_commit(to_oid(id)?).map_err(|e| missing(id, e))?;
        let author = commit.author();
        let identity = format!(
            "{} <{}>",
            author.name().unwrap_or(""),
            author.email().unwrap_or("")
        );
        Ok(GitCommit {
            tree_id: from_oid(commit.tree_id()),
            parents: commit.parent_ids().map(from_oid).collect(),
            author: identity,
            date: author.when().seconds(),
            message: commit.message().unwrap_or("").to_string(),
        })
    }

    async fn read_tree(&self, id: ObjectId) -> Result<GitTree> {
        let repo = self.lock();
        let tree = repo.find_tree(to_oid(id)?).map_err(|e| missing(id, e))?;
        let mut out = GitTree::new();
        for entry in tree.iter() {
            let name = match entry.name() {
                Some(name) => name.to_string(),
                None => {
                    return Err(BridgeError::StorageCorruption(format!(
                        "tree {} has a non-utf8 entry name",
                        id
                    )))
                }
            };
            out.insert(
                name,
                GitTreeEntry::new(FileMode::from_raw(entry.filemode() as u32), from_oid(entry.id())),
            );
        }
        Ok(out)
    }

    async fn read_blob(&self, id: ObjectId) -> Result<Bytes> {
        let repo = self.lock();
        let blob = repo.find_blob(to_oid(id)?).map_err(|e| missing(id, e))?;
        Ok(Bytes::copy_from_slice(blob.content()))
    }

    async fn blob_size(&self, id: ObjectId) -> Result<u64> {
        let repo = self.lock();
        let blob = repo.find_blob(to_oid(id)?).map_err(|e| missing(id, e))?;
        Ok(blob.size() as u64)
    }

    async fn write_blob(&self, data: Bytes) -> Result<ObjectId> {
        let repo = self.lock();
        Ok(from_oid(repo.blob(&data)?))
    }

    async fn write_tree(&self, tree: &GitTree) -> Result<ObjectId> {
        let repo = self.lock();
        let mut builder = repo.treebuilder(None)?;
        for (name, entry) in &tree.entries {
            builder.insert(name, to_oid(entry.id)?, entry.mode.as_raw() as i32)?;
        }
        Ok(from_oid(builder.write()?))
    }

    async fn write_commit(&self, commit: &GitCommit) -> Result<ObjectId> {
        let repo = self.lock();
        let tree = repo.find_tree(to_oid(commit.tree_id)?)?;
        let mut parents = Vec::with_capacity(commit.parents.len());
        for parent in &commit.parents {
            parents.push(repo.find_commit(to_oid(*parent)?)?);
        }
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let sig = Self::signature_for(commit)?;
        let oid = repo.commit(None, &sig, &sig, &commit.message, &tree, &parent_refs)?;
        Ok(from_oid(oid))
    }

    async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let repo = self.lock();
        match repo.refname_to_id(name) {
            Ok(oid) => Ok(Some(from_oid(oid))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(BridgeError::from(e)),
        }
    }

    async fn compare_and_swap_ref(
        &self,
        name: &str,
        expected_old: Option<ObjectId>,
        new: ObjectId,
    ) -> Result<bool> {
        let repo = self.lock();
        let new_oid = to_oid(new)?;
        let result = match expected_old {
            None => repo.reference(name, new_oid, false, "svngit: publish").map(|_| ()),
            Some(old) => repo
                .reference_matching(name, new_oid, true, to_oid(old)?, "svngit: publish")
                .map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.code(), ErrorCode::Exists | ErrorCode::Modified | ErrorCode::NotFound) => {
                Ok(false)
            }
            Err(e) => Err(BridgeError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{FileMode, GitTreeEntry};

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Git2Store::init_bare(dir.path()).unwrap();

        let blob = store.write_blob(Bytes::from_static(b"hello\n")).await.unwrap();
        assert_eq!(blob.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");

        let mut tree = GitTree::new();
        tree.insert("hello.txt".into(), GitTreeEntry::new(FileMode::Normal, blob));
        let tree_id = store.write_tree(&tree).await.unwrap();
        let read_back = store.read_tree(tree_id).await.unwrap();
        assert_eq!(read_back.get("hello.txt").unwrap().id, blob);

        let commit = GitCommit::new(tree_id, vec![], "alice".into(), 1_700_000_000, "init".into());
        let commit_id = store.write_commit(&commit).await.unwrap();
        let read_back = store.read_commit(commit_id).await.unwrap();
        assert_eq!(read_back.tree_id, tree_id);
        assert_eq!(read_back.author_name(), "alice");
        assert_eq!(read_back.message, "init");
    }

    #[tokio::test]
    async fn test_ref_cas_against_real_repo() {
        let dir = tempfile::tempdir().unwrap();
        let store = Git2Store::init_bare(dir.path()).unwrap();

        let blob = store.write_blob(Bytes::from_static(b"a")).await.unwrap();
        let mut tree = GitTree::new();
        tree.insert("a".into(), GitTreeEntry::new(FileMode::Normal, blob));
        let tree_id = store.write_tree(&tree).await.unwrap();
        let c1 = store
            .write_commit(&GitCommit::new(tree_id, vec![], "a".into(), 0, "one".into()))
            .await
            .unwrap();
        let c2 = store
            .write_commit(&GitCommit::new(tree_id, vec![c1], "a".into(), 1, "two".into()))
            .await
            .unwrap();

        let name = "refs/heads/master";
        assert!(store.compare_and_swap_ref(name, None, c1).await.unwrap());
        assert!(!store.compare_and_swap_ref(name, None, c2).await.unwrap());
        assert!(store.compare_and_swap_ref(name, Some(c1), c2).await.unwrap());
        assert_eq!(store.read_ref(name).await.unwrap(), Some(c2));
        assert!(!store.compare_and_swap_ref(name, Some(c1), c1).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_ref_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Git2Store::init_bare(dir.path()).unwrap();
        assert_eq!(store.read_ref("refs/heads/nope").await.unwrap(), None);
    }
}

//! Git object/ref storage seam
//!
//! The bridge never implements a generic object store; it talks to whatever
//! backs the repository through this trait. `compare_and_swap_ref` is the
//! primitive the revision cache's publish step is built on.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{BridgeError, Result};
use crate::object::{GitCommit, GitObject, GitTree, ObjectId};

/// Read/write access to Git objects and refs
#[async_trait]
pub trait GitStore: Send + Sync {
    /// Read a commit object
    async fn read_commit(&self, id: ObjectId) -> Result<GitCommit>;

    /// Read a tree object
    async fn read_tree(&self, id: ObjectId) -> Result<GitTree>;

    /// Read a blob's content
    async fn read_blob(&self, id: ObjectId) -> Result<Bytes>;

    /// Size of a blob without materializing it for callers
    async fn blob_size(&self, id: ObjectId) -> Result<u64>;

    /// Write a blob, returning its id
    async fn write_blob(&self, data: Bytes) -> Result<ObjectId>;

    /// Write a tree object, returning its id
    async fn write_tree(&self, tree: &GitTree) -> Result<ObjectId>;

    /// Write a commit object, returning its id
    async fn write_commit(&self, commit: &GitCommit) -> Result<ObjectId>;

    /// Resolve a ref name to a commit id, `None` if the ref does not exist
    async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>>;

    /// Atomically move a ref from `expected_old` to `new`
    ///
    /// Returns `false` when the ref no longer points at `expected_old`
    /// (somebody else won the race); the caller decides what to do.
    async fn compare_and_swap_ref(
        &self,
        name: &str,
        expected_old: Option<ObjectId>,
        new: ObjectId,
    ) -> Result<bool>;
}

/// In-memory Git store
///
/// Backs unit and integration tests; also useful as a scratch repository.
pub struct MemoryGitStore {
    objects: RwLock<HashMap<ObjectId, GitObject>>,
    refs: RwLock<HashMap<String, ObjectId>>,
}

impl MemoryGitStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            refs: RwLock::new(HashMap::new()),
        }
    }

    async fn insert(&self, object: GitObject) -> ObjectId {
        let id = object.id();
        // Content addressing makes duplicate inserts idempotent.
        self.objects.write().await.insert(id, object);
        id
    }
}

impl Default for MemoryGitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitStore for MemoryGitStore {
    async fn read_commit(&self, id: ObjectId) -> Result<GitCommit> {
        match self.objects.read().await.get(&id) {
            Some(GitObject::Commit(commit)) => Ok(commit.clone()),
            Some(other) => Err(BridgeError::StorageCorruption(format!(
                "{} is a {}, expected commit",
                id,
                other.kind()
            ))),
            None => Err(BridgeError::ObjectMissing(id)),
        }
    }

    async fn read_tree(&self, id: ObjectId) -> Result<GitTree> {
        match self.objects.read().await.get(&id) {
            Some(GitObject::Tree(tree)) => Ok(tree.clone()),
            Some(other) => Err(BridgeError::StorageCorruption(format!(
                "{} is a {}, expected tree",
                id,
                other.kind()
            ))),
            None => Err(BridgeError::ObjectMissing(id)),
        }
    }

    async fn read_blob(&self, id: ObjectId) -> Result<Bytes> {
        match self.objects.read().await.get(&id) {
            Some(GitObject::Blob(data)) => Ok(data.clone()),
            Some(other) => Err(BridgeError::StorageCorruption(format!(
                "{} is a {}, expected blob",
                id,
                other.kind()
            ))),
            None => Err(BridgeError::ObjectMissing(id)),
        }
    }

    async fn blob_size(&self, id: ObjectId) -> Result<u64> {
        Ok(self.read_blob(id).await?.len() as u64)
    }

    async fn write_blob(&self, data: Bytes) -> Result<ObjectId> {
        Ok(self.insert(GitObject::Blob(data)).await)
    }

    async fn write_tree(&self, tree: &GitTree) -> Result<ObjectId> {
        Ok(self.insert(GitObject::Tree(tree.clone())).await)
    }

    async fn write_commit(&self, commit: &GitCommit) -> Result<ObjectId> {
        Ok(self.insert(GitObject::Commit(commit.clone())).await)
    }

    async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self.refs.read().await.get(name).copied())
    }

    async fn compare_and_swap_ref(
        &self,
        name: &str,
        expected_old: Option<ObjectId>,
        new: ObjectId,
    ) -> Result<bool> {
        let mut refs = self.refs.write().await;
        if refs.get(name).copied() != expected_old {
            return Ok(false);
        }
        refs.insert(name.to_string(), new);
        Ok(true)
    }
}

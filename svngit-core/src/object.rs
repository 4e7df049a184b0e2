//! Git object model for the bridge
//!
//! Commits, trees and blobs are addressed by SHA-1 exactly as Git computes
//! them, so ids produced by the in-memory store agree with ids produced by a
//! real on-disk repository.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Unique identifier for any Git object (20-byte SHA-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Compute the id of a Git object given its type name and payload
    pub fn for_object(kind: &str, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.as_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Git file mode for a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    Normal,
    Executable,
    Symlink,
    Directory,
}

impl FileMode {
    /// Octal representation as it appears in a tree object
    pub fn as_octal(&self) -> &'static str {
        match self {
            FileMode::Normal => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
            FileMode::Directory => "40000",
        }
    }

    /// Parse from the numeric mode Git libraries report
    pub fn from_raw(mode: u32) -> Self {
        match mode {
            0o100755 => FileMode::Executable,
            0o120000 => FileMode::Symlink,
            0o040000 => FileMode::Directory,
            _ => FileMode::Normal,
        }
    }

    /// Numeric mode as Git libraries expect it
    pub fn as_raw(&self) -> u32 {
        match self {
            FileMode::Normal => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::Symlink => 0o120000,
            FileMode::Directory => 0o040000,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileMode::Directory)
    }
}

/// Single entry of a tree object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitTreeEntry {
    pub mode: FileMode,
    pub id: ObjectId,
}

impl GitTreeEntry {
    pub fn new(mode: FileMode, id: ObjectId) -> Self {
        Self { mode, id }
    }
}

/// Directory object
///
/// Entries are kept in a BTreeMap; the canonical encoding re-sorts them with
/// Git's tree ordering (directory names compare as if they had a trailing
/// slash), so ids are stable regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitTree {
    pub entries: BTreeMap<String, GitTreeEntry>,
}

impl GitTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, entry: GitTreeEntry) {
        self.entries.insert(name, entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<GitTreeEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&GitTreeEntry> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical Git encoding of this tree
    pub fn encode(&self) -> Vec<u8> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort_by_key(|name| {
            let entry = &self.entries[*name];
            let mut key = name.as_bytes().to_vec();
            if entry.mode.is_dir() {
                key.push(b'/');
            }
            key
        });

        let mut out = Vec::new();
        for name in names {
            let entry = &self.entries[name];
            out.extend_from_slice(entry.mode.as_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(name.as_bytes());
            out.push(b'\0');
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Compute the object id of this tree
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object("tree", &self.encode())
    }
}

/// Commit object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCommit {
    /// Root tree of this commit
    pub tree_id: ObjectId,
    /// Parent commit ids (first parent carries the SVN revision line)
    pub parents: Vec<ObjectId>,
    /// Author identity, either `Name <email>` or a bare name
    pub author: String,
    /// Commit timestamp (Unix seconds, UTC)
    pub date: i64,
    /// Log message
    pub message: String,
}

impl GitCommit {
    pub fn new(
        tree_id: ObjectId,
        parents: Vec<ObjectId>,
        author: String,
        date: i64,
        message: String,
    ) -> Self {
        Self {
            tree_id,
            parents,
            author,
            date,
            message,
        }
    }

    /// Author formatted as a full Git identity
    pub fn identity(&self) -> String {
        if self.author.contains('<') {
            self.author.clone()
        } else {
            format!("{} <{}@svngit.invalid>", self.author, self.author)
        }
    }

    /// Bare author name without the email part
    pub fn author_name(&self) -> &str {
        match self.author.find('<') {
            Some(idx) => self.author[..idx].trim_end(),
            None => &self.author,
        }
    }

    /// Canonical Git encoding of this commit
    pub fn encode(&self) -> Vec<u8> {
        let identity = self.identity();
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree_id.to_hex()));
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent.to_hex()));
        }
        out.push_str(&format!("author {} {} +0000\n", identity, self.date));
        out.push_str(&format!("committer {} {} +0000\n", identity, self.date));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// Compute the object id of this commit
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object("commit", &self.encode())
    }

    /// First parent, the one SVN revision numbering follows
    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }
}

/// Generic object that can be any type
#[derive(Debug, Clone)]
pub enum GitObject {
    Blob(bytes::Bytes),
    Tree(GitTree),
    Commit(GitCommit),
}

impl GitObject {
    pub fn id(&self) -> ObjectId {
        match self {
            GitObject::Blob(data) => ObjectId::for_object("blob", data),
            GitObject::Tree(tree) => tree.id(),
            GitObject::Commit(commit) => commit.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GitObject::Blob(_) => "blob",
            GitObject::Tree(_) => "tree",
            GitObject::Commit(_) => "commit",
        }
    }
}

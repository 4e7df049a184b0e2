//! SvnGit Core Library
//!
//! Core functionality for the SVN-to-Git bridge:
//! - Git object model (blob, tree, commit) with canonical SHA-1 ids
//! - Storage seam over Git objects and refs, with in-memory and libgit2 backends
//! - Revision cache mapping SVN revision numbers onto first-parent Git history
//! - Tree snapshot resolver for (revision, path) lookups
//! - Commit editor turning accumulated client changes into published revisions
//! - Advisory path locks and commit-time path guards
//! - Authentication providers and LFS pointer resolution

pub mod auth;
pub mod editor;
pub mod error;
pub mod lfs;
pub mod locks;
pub mod object;
pub mod paths;
pub mod props;
pub mod revcache;
pub mod store;
pub mod treewalk;

mod git2_store;

pub use auth::{
    AnonymousAuthProvider, AuthProvider, Credentials, PasswordFileAuthProvider, Principal,
    SingleUserAuthProvider,
};
pub use editor::{CommitEditor, EditorOptions, EditorState};
pub use error::{BridgeError, Result};
pub use git2_store::Git2Store;
pub use lfs::{ContentAccess, ContentFetcher, LfsPointer};
pub use locks::{Lock, LockTable, PathGuards};
pub use object::{FileMode, GitCommit, GitObject, GitTree, GitTreeEntry, ObjectId};
pub use revcache::{ChangeKind, ChangedPath, Revision, RevisionCache};
pub use store::{GitStore, MemoryGitStore};
pub use treewalk::{Entry, NodeKind, TreeResolver};

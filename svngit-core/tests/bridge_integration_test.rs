//! End-to-end bridge tests against a real on-disk Git repository

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use svngit_core::{
    BridgeError, ChangeKind, CommitEditor, EditorOptions, Git2Store, GitStore, LockTable,
    NodeKind, RevisionCache, TreeResolver,
};

struct Bridge {
    resolver: Arc<TreeResolver>,
    locks: Arc<LockTable>,
}

async fn open_bridge(store: Arc<dyn GitStore>, index: Option<&std::path::Path>) -> Bridge {
    let cache = RevisionCache::open(store, "refs/heads/master", index)
        .await
        .unwrap();
    Bridge {
        resolver: Arc::new(TreeResolver::new(Arc::new(cache))),
        locks: Arc::new(LockTable::new()),
    }
}

impl Bridge {
    async fn editor(&self, base: u64) -> CommitEditor {
        CommitEditor::open(
            self.resolver.clone(),
            self.locks.clone(),
            base,
            EditorOptions {
                lock_wait: Duration::from_millis(200),
                keep_locks: false,
            },
        )
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_commit_history_on_disk() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn GitStore> = Arc::new(Git2Store::init_bare(dir.path().join("repo")).unwrap());
    let bridge = open_bridge(store.clone(), None).await;

    let mut editor = bridge.editor(0).await;
    editor.add_directory("/trunk", None).await.unwrap();
    editor.add_file("/trunk/readme.txt", None).await.unwrap();
    editor
        .set_file_content("/trunk/readme.txt", Bytes::from_static(b"hello\n"))
        .await
        .unwrap();
    let r1 = editor.finalize("alice", "initial layout").await.unwrap();
    assert_eq!(r1.number, 1);

    let mut editor = bridge.editor(1).await;
    editor.open_file("/trunk/readme.txt", 1).await.unwrap();
    editor
        .set_file_content("/trunk/readme.txt", Bytes::from_static(b"hello world\n"))
        .await
        .unwrap();
    let r2 = editor.finalize("bob", "expand greeting").await.unwrap();
    assert_eq!(r2.number, 2);
    assert_eq!(r2.author, "bob");
    assert_eq!(r2.changed_paths.len(), 1);
    assert_eq!(r2.changed_paths[0].kind, ChangeKind::Modified);

    // Both snapshots remain addressable.
    let old = bridge.resolver.entry_at(1, "/trunk/readme.txt").await.unwrap();
    let new = bridge.resolver.entry_at(2, "/trunk/readme.txt").await.unwrap();
    assert_ne!(old.content_id, new.content_id);
    let content = store.read_blob(new.content_id.unwrap()).await.unwrap();
    assert_eq!(content.as_ref(), b"hello world\n");
}

#[tokio::test]
async fn test_reopen_yields_identical_numbering() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    let store: Arc<dyn GitStore> = Arc::new(Git2Store::init_bare(&repo_path).unwrap());
    let bridge = open_bridge(store, None).await;

    for i in 0..3u64 {
        let mut editor = bridge.editor(i).await;
        editor.add_file(&format!("/file-{}.txt", i), None).await.unwrap();
        editor
            .set_file_content(&format!("/file-{}.txt", i), Bytes::from_static(b"x"))
            .await
            .unwrap();
        editor.finalize("alice", &format!("commit {}", i)).await.unwrap();
    }
    let commits: Vec<_> = {
        let cache = bridge.resolver.revcache();
        let mut out = Vec::new();
        for rev in 0..=cache.head_revision().await {
            out.push(cache.resolve(rev).await.unwrap().commit_id);
        }
        out
    };

    // A fresh process over the same Git repository sees the same mapping.
    let store: Arc<dyn GitStore> = Arc::new(Git2Store::open(&repo_path).unwrap());
    let reopened = open_bridge(store, None).await;
    let cache = reopened.resolver.revcache();
    assert_eq!(cache.head_revision().await, 3);
    for (rev, commit) in commits.iter().enumerate() {
        assert_eq!(cache.resolve(rev as u64).await.unwrap().commit_id, *commit);
    }
}

#[tokio::test]
async fn test_sqlite_index_reuse_keeps_uuid() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    let db_path = dir.path().join("revindex.sqlite");
    let store: Arc<dyn GitStore> = Arc::new(Git2Store::init_bare(&repo_path).unwrap());
    let bridge = open_bridge(store, Some(db_path.as_path())).await;

    let mut editor = bridge.editor(0).await;
    editor.add_file("/a.txt", None).await.unwrap();
    editor
        .set_file_content("/a.txt", Bytes::from_static(b"a"))
        .await
        .unwrap();
    editor.finalize("alice", "add a").await.unwrap();
    let uuid = bridge.resolver.revcache().uuid().to_string();
    drop(bridge);

    let store: Arc<dyn GitStore> = Arc::new(Git2Store::open(&repo_path).unwrap());
    let reopened = open_bridge(store, Some(db_path.as_path())).await;
    let cache = reopened.resolver.revcache();
    assert_eq!(cache.uuid(), uuid);
    assert_eq!(cache.head_revision().await, 1);
    assert_eq!(cache.resolve(1).await.unwrap().message, "add a");
}

#[tokio::test]
async fn test_concurrent_commit_outcomes() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn GitStore> = Arc::new(Git2Store::init_bare(dir.path().join("repo")).unwrap());
    let bridge = open_bridge(store, None).await;

    let mut seed = bridge.editor(0).await;
    seed.add_directory("/trunk", None).await.unwrap();
    seed.add_file("/trunk/x.txt", None).await.unwrap();
    seed.set_file_content("/trunk/x.txt", Bytes::from_static(b"x"))
        .await
        .unwrap();
    let base = seed.finalize("seed", "layout").await.unwrap().number;

    // Disjoint edits based on the same revision both land.
    let mut a = bridge.editor(base).await;
    a.add_file("/trunk/a.txt", None).await.unwrap();
    a.set_file_content("/trunk/a.txt", Bytes::from_static(b"a"))
        .await
        .unwrap();
    let mut b = bridge.editor(base).await;
    b.add_file("/trunk/b.txt", None).await.unwrap();
    b.set_file_content("/trunk/b.txt", Bytes::from_static(b"b"))
        .await
        .unwrap();
    let ra = a.finalize("alice", "add a").await.unwrap();
    let rb = b.finalize("bob", "add b").await.unwrap();
    assert_eq!((ra.number, rb.number), (base + 1, base + 2));

    // An overlapping edit based on the stale revision is rejected.
    let mut stale = bridge.editor(base).await;
    stale.open_file("/trunk/x.txt", base).await.unwrap();
    stale
        .set_file_content("/trunk/x.txt", Bytes::from_static(b"stale"))
        .await
        .unwrap();
    let mut winner = bridge.editor(rb.number).await;
    winner.open_file("/trunk/x.txt", rb.number).await.unwrap();
    winner
        .set_file_content("/trunk/x.txt", Bytes::from_static(b"fresh"))
        .await
        .unwrap();
    winner.finalize("carol", "edit x").await.unwrap();
    let err = stale.finalize("dave", "stale edit").await.unwrap_err();
    assert!(matches!(err, BridgeError::ConcurrentModification));

    // Gapless numbering throughout.
    let cache = bridge.resolver.revcache();
    assert_eq!(cache.head_revision().await, base + 3);
    for rev in 0..=cache.head_revision().await {
        assert_eq!(cache.resolve(rev).await.unwrap().number, rev);
    }
}

#[tokio::test]
async fn test_check_path_across_revisions() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn GitStore> = Arc::new(Git2Store::init_bare(dir.path().join("repo")).unwrap());
    let bridge = open_bridge(store, None).await;

    let mut editor = bridge.editor(0).await;
    editor.add_directory("/trunk", None).await.unwrap();
    editor.add_file("/trunk/doomed.txt", None).await.unwrap();
    editor
        .set_file_content("/trunk/doomed.txt", Bytes::from_static(b"bye"))
        .await
        .unwrap();
    editor.finalize("alice", "add").await.unwrap();

    let mut editor = bridge.editor(1).await;
    editor.delete_entry("/trunk/doomed.txt", 1).await.unwrap();
    editor.finalize("alice", "remove").await.unwrap();

    let resolver = &bridge.resolver;
    assert_eq!(resolver.check_path(0, "/trunk").await.unwrap(), None);
    assert_eq!(
        resolver.check_path(1, "/trunk/doomed.txt").await.unwrap(),
        Some(NodeKind::File)
    );
    assert_eq!(resolver.check_path(2, "/trunk/doomed.txt").await.unwrap(), None);
    assert_eq!(
        resolver.check_path(2, "/trunk").await.unwrap(),
        Some(NodeKind::Directory)
    );
}

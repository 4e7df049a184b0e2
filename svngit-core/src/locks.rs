//! Advisory path locks and commit-time path guards
//!
//! Two separate mechanisms live here. Client-visible SVN locks are advisory
//! write reservations keyed by path, independent of version history. Path
//! guards are short-lived mutual exclusion used only while a commit editor
//! finalizes, acquired in canonical order with a bounded wait so a stalled
//! client cannot starve others.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::paths;

/// A live advisory lock on one path
#[derive(Debug, Clone)]
pub struct Lock {
    pub path: String,
    pub token: String,
    pub owner: String,
    pub comment: Option<String>,
    /// Creation time (Unix seconds, UTC)
    pub created: i64,
}

#[derive(Debug)]
struct GuardState {
    held: Mutex<HashSet<String>>,
    released: Notify,
}

pub struct LockTable {
    locks: Mutex<HashMap<String, Lock>>,
    guards: Arc<GuardState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            guards: Arc::new(GuardState {
                held: Mutex::new(HashSet::new()),
                released: Notify::new(),
            }),
        }
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Lock>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire an advisory lock on a path
    pub fn acquire(&self, path: &str, owner: &str, comment: Option<String>) -> Result<Lock> {
        let path = paths::normalize(path);
        let mut locks = self.locks();
        if let Some(existing) = locks.get(&path) {
            return Err(BridgeError::AlreadyLocked {
                path: format!("/{}", path),
                owner: existing.owner.clone(),
            });
        }
        let lock = Lock {
            path: path.clone(),
            token: format!("opaquelocktoken:{}", uuid::Uuid::new_v4()),
            owner: owner.to_string(),
            comment,
            created: chrono::Utc::now().timestamp(),
        };
        debug!(path = %lock.path, owner = %lock.owner, "lock acquired");
        locks.insert(path, lock.clone());
        Ok(lock)
    }

    /// Release a lock, verifying the token
    pub fn release(&self, path: &str, token: &str) -> Result<()> {
        let path = paths::normalize(path);
        let mut locks = self.locks();
        match locks.get(&path) {
            Some(lock) if lock.token == token => {
                locks.remove(&path);
                debug!(path = %path, "lock released");
                Ok(())
            }
            Some(_) => Err(BridgeError::InvalidToken {
                path: format!("/{}", path),
            }),
            None => Err(BridgeError::NotLocked {
                path: format!("/{}", path),
            }),
        }
    }

    /// Administrative override: drop a lock without its token
    ///
    /// Separately authorized from `release`; never the default path.
    pub fn release_forced(&self, path: &str) -> Result<()> {
        let path = paths::normalize(path);
        if self.locks().remove(&path).is_none() {
            return Err(BridgeError::NotLocked {
                path: format!("/{}", path),
            });
        }
        debug!(path = %path, "lock force-released");
        Ok(())
    }

    /// Current lock on a path, if any
    pub fn get(&self, path: &str) -> Option<Lock> {
        self.locks().get(&paths::normalize(path)).cloned()
    }

    /// All locks at or below a path
    pub fn list(&self, path: &str) -> Vec<Lock> {
        let prefix = paths::normalize(path);
        let mut out: Vec<Lock> = self
            .locks()
            .values()
            .filter(|l| paths::is_ancestor_or_self(&prefix, &l.path))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Commit precondition: every locked touched path needs its token
    ///
    /// Called by the commit editor before any tree mutation; a missing or
    /// wrong token fails the whole commit with `LockMismatch`.
    pub fn check_for_commit(
        &self,
        touched: &[String],
        supplied: &HashMap<String, String>,
    ) -> Result<()> {
        let locks = self.locks();
        for path in touched {
            if let Some(lock) = locks.get(path) {
                match supplied.get(path) {
                    Some(token) if *token == lock.token => {}
                    _ => {
                        return Err(BridgeError::LockMismatch {
                            path: format!("/{}", path),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    /// Release locks whose tokens were supplied with a successful commit
    pub fn release_after_commit(&self, touched: &[String], supplied: &HashMap<String, String>) {
        let mut locks = self.locks();
        for path in touched {
            if let (Some(lock), Some(token)) = (locks.get(path), supplied.get(path)) {
                if lock.token == *token {
                    locks.remove(path);
                }
            }
        }
    }

    /// Acquire commit-time guards for a set of paths
    ///
    /// Paths are claimed all-or-nothing under one critical section, and the
    /// caller passes them pre-sorted (canonical lexicographic order), so
    /// two finalizing editors can never deadlock. Waits at most `wait` for
    /// contended paths, then fails with `LockTimeout`.
    pub async fn guard_paths(&self, sorted: &[String], wait: Duration) -> Result<PathGuards> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register for wakeups before inspecting the held set;
            // notify_waiters only reaches already-registered waiters, so a
            // release landing between the check and the await would
            // otherwise be missed and the waiter would sleep out its
            // whole deadline.
            let mut notified = std::pin::pin!(self.guards.released.notified());
            notified.as_mut().enable();
            {
                let mut held = self.guards.held.lock().unwrap_or_else(|e| e.into_inner());
                if sorted.iter().all(|p| !held.contains(p)) {
                    for p in sorted {
                        held.insert(p.clone());
                    }
                    return Ok(PathGuards {
                        state: self.guards.clone(),
                        paths: sorted.to_vec(),
                    });
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BridgeError::LockTimeout);
            }
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII holder for commit-time path guards
#[derive(Debug)]
pub struct PathGuards {
    state: Arc<GuardState>,
    paths: Vec<String>,
}

impl Drop for PathGuards {
    fn drop(&mut self) {
        let mut held = self.state.held.lock().unwrap_or_else(|e| e.into_inner());
        for p in &self.paths {
            held.remove(p);
        }
        self.state.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let table = LockTable::new();
        let lock = table.acquire("/trunk/a.txt", "alice", None).unwrap();
        assert!(lock.token.starts_with("opaquelocktoken:"));
        assert!(table.get("/trunk/a.txt").is_some());
        table.release("/trunk/a.txt", &lock.token).unwrap();
        assert!(table.get("/trunk/a.txt").is_none());
    }

    #[test]
    fn test_double_acquire_fails() {
        let table = LockTable::new();
        table.acquire("/a", "alice", None).unwrap();
        let err = table.acquire("/a", "bob", None).unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyLocked { owner, .. } if owner == "alice"));
    }

    #[test]
    fn test_release_wrong_token() {
        let table = LockTable::new();
        table.acquire("/a", "alice", None).unwrap();
        assert!(matches!(
            table.release("/a", "opaquelocktoken:bogus"),
            Err(BridgeError::InvalidToken { .. })
        ));
        assert!(matches!(
            table.release("/b", "opaquelocktoken:bogus"),
            Err(BridgeError::NotLocked { .. })
        ));
    }

    #[test]
    fn test_forced_release() {
        let table = LockTable::new();
        table.acquire("/a", "alice", None).unwrap();
        table.release_forced("/a").unwrap();
        assert!(table.get("/a").is_none());
        assert!(matches!(
            table.release_forced("/a"),
            Err(BridgeError::NotLocked { .. })
        ));
    }

    #[test]
    fn test_list_scoped_by_path() {
        let table = LockTable::new();
        table.acquire("/trunk/a", "alice", None).unwrap();
        table.acquire("/trunk/sub/b", "alice", None).unwrap();
        table.acquire("/branches/c", "bob", None).unwrap();
        let locks = table.list("/trunk");
        assert_eq!(locks.len(), 2);
        assert_eq!(table.list("/").len(), 3);
    }

    #[test]
    fn test_check_for_commit() {
        let table = LockTable::new();
        let lock = table.acquire("/trunk/a", "alice", None).unwrap();
        let touched = vec!["trunk/a".to_string(), "trunk/b".to_string()];

        let err = table.check_for_commit(&touched, &HashMap::new()).unwrap_err();
        assert!(matches!(err, BridgeError::LockMismatch { .. }));

        let mut supplied = HashMap::new();
        supplied.insert("trunk/a".to_string(), lock.token.clone());
        table.check_for_commit(&touched, &supplied).unwrap();

        table.release_after_commit(&touched, &supplied);
        assert!(table.get("/trunk/a").is_none());
    }

    #[tokio::test]
    async fn test_guard_contention_times_out() {
        let table = Arc::new(LockTable::new());
        let paths = vec!["trunk/a".to_string()];
        let _held = table.guard_paths(&paths, Duration::from_millis(10)).await.unwrap();
        let err = table
            .guard_paths(&paths, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::LockTimeout));
    }

    #[tokio::test]
    async fn test_guard_released_on_drop() {
        let table = Arc::new(LockTable::new());
        let paths = vec!["trunk/a".to_string()];
        let held = table.guard_paths(&paths, Duration::from_millis(10)).await.unwrap();
        drop(held);
        let again = table.guard_paths(&paths, Duration::from_millis(10)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_guard_waiter_wakes_on_release() {
        let table = Arc::new(LockTable::new());
        let paths = vec!["trunk/a".to_string()];
        let held = table
            .guard_paths(&paths, Duration::from_millis(10))
            .await
            .unwrap();

        // A contending waiter with a generous deadline must acquire as
        // soon as the holder drops, not time out.
        let waiter = tokio::spawn({
            let table = table.clone();
            let paths = paths.clone();
            async move { table.guard_paths(&paths, Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        let acquired = waiter.await.unwrap();
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_disjoint_guards_do_not_contend() {
        let table = Arc::new(LockTable::new());
        let a = table
            .guard_paths(&["trunk/a".to_string()], Duration::from_millis(10))
            .await
            .unwrap();
        let b = table
            .guard_paths(&["trunk/b".to_string()], Duration::from_millis(10))
            .await
            .unwrap();
        drop(a);
        drop(b);
    }
}

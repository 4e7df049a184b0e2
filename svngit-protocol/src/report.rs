//! Update report and the server-driven editor walk
//!
//! The client first describes what it already has (set-path/delete-path),
//! then the server drives the client's editor with the commands that turn
//! that state into the target revision. File content always goes out as
//! full-text svndiff windows, so the delta base the client holds never
//! matters for correctness.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use svngit_core::{paths, BridgeError, FileMode, NodeKind, Result};
use tracing::debug;

use crate::items::{encode, Item};
use crate::session::SessionContext;
use crate::svndiff;
use crate::wire::optional;

const CHUNK: usize = 64 * 1024;

/// Client-reported working copy state for one update
pub struct ReportState {
    target_rev: u64,
    /// Update target relative to the anchor; empty means the whole tree
    target: String,
    /// Reported paths (normalized, anchor-relative) and their base
    /// revision; `None` marks start-empty entries
    entries: Vec<(String, Option<u64>)>,
    deletes: Vec<String>,
}

impl ReportState {
    pub fn new(target_rev: u64, target: String) -> Self {
        Self {
            target_rev,
            target: paths::normalize(&target),
            entries: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn set_path(&mut self, path: &str, rev: u64, start_empty: bool) {
        let base = if start_empty { None } else { Some(rev) };
        self.entries.push((paths::normalize(path), base));
    }

    pub fn delete_path(&mut self, path: &str) {
        self.deletes.push(paths::normalize(path));
    }

    /// Base revision the client holds for `path`, `None` when the client
    /// has nothing there (start-empty, deleted, or never reported)
    fn base_rev_for(&self, path: &str) -> Option<u64> {
        let mut best: Option<(&str, Option<u64>)> = None;
        for (reported, base) in &self.entries {
            if paths::is_ancestor_or_self(reported, path) {
                let better = match best {
                    Some((current, _)) => reported.len() >= current.len(),
                    None => true,
                };
                if better {
                    best = Some((reported, *base));
                }
            }
        }
        let (_, base) = best?;
        // A delete-path at or above wipes the client's copy of the subtree.
        if self.deletes.iter().any(|d| paths::is_ancestor_or_self(d, path)) {
            return None;
        }
        base
    }

    /// Produce the full editor command stream for this report
    pub async fn drive(&self, ctx: &SessionContext) -> Result<Vec<u8>> {
        let mut walk = Walk {
            ctx,
            report: self,
            out: Vec::new(),
            next_token: 0,
        };

        walk.command("target-rev", vec![Item::Number(self.target_rev)]);
        let root = walk.token("d");
        walk.command(
            "open-root",
            vec![optional(None), Item::str(&root)],
        );
        walk.dir(String::new(), root.clone(), self.base_rev_for("")).await?;
        walk.command("close-dir", vec![Item::str(&root)]);
        walk.command("close-edit", vec![]);
        debug!(target_rev = self.target_rev, bytes = walk.out.len(), "editor drive prepared");
        Ok(walk.out)
    }
}

struct Walk<'a> {
    ctx: &'a SessionContext,
    report: &'a ReportState,
    out: Vec<u8>,
    next_token: u64,
}

impl<'a> Walk<'a> {
    fn token(&mut self, prefix: &str) -> String {
        self.next_token += 1;
        format!("{}{}", prefix, self.next_token)
    }

    fn command(&mut self, name: &str, params: Vec<Item>) {
        self.out.extend_from_slice(&encode(&Item::list(vec![
            Item::word(name),
            Item::List(params),
        ])));
    }

    async fn send_file_content(&mut self, token: &str, content: &Bytes) {
        self.command(
            "apply-textdelta",
            vec![Item::str(token), optional(None)],
        );
        let delta = svndiff::encode_full(content);
        for chunk in delta.chunks(CHUNK) {
            self.command(
                "textdelta-chunk",
                vec![Item::str(token), Item::Str(Bytes::copy_from_slice(chunk))],
            );
        }
        self.command("textdelta-end", vec![Item::str(token)]);
    }

    async fn add_file(&mut self, path: &str, parent_token: &str) -> Result<()> {
        let entry = self.ctx.resolver.entry_at(self.report.target_rev, path).await?;
        let content_id = entry
            .content_id
            .ok_or_else(|| BridgeError::NotFound(format!("/{}", path)))?;
        let content = self.ctx.content.read_file(content_id).await?;
        let token = self.token("f");
        self.command(
            "add-file",
            vec![
                Item::str(path),
                Item::str(parent_token),
                Item::str(&token),
                optional(None),
            ],
        );
        self.send_file_content(&token, &content).await;
        for (name, value) in &entry.properties {
            self.command(
                "change-file-prop",
                vec![
                    Item::str(&token),
                    Item::str(name),
                    optional(Some(Item::str(value))),
                ],
            );
        }
        let checksum = format!("{:x}", md5::compute(&content));
        self.command(
            "close-file",
            vec![Item::str(&token), optional(Some(Item::str(&checksum)))],
        );
        Ok(())
    }

    async fn update_file(&mut self, path: &str, parent_token: &str, base_rev: u64) -> Result<()> {
        let target = self.ctx.resolver.entry_at(self.report.target_rev, path).await?;
        let base = self.ctx.resolver.entry_at(base_rev, path).await?;
        if target.content_id == base.content_id && target.mode == base.mode {
            return Ok(());
        }
        let token = self.token("f");
        self.command(
            "open-file",
            vec![
                Item::str(path),
                Item::str(parent_token),
                Item::str(&token),
                optional(Some(Item::Number(base_rev))),
            ],
        );
        let content_id = target
            .content_id
            .ok_or_else(|| BridgeError::NotFound(format!("/{}", path)))?;
        let content = self.ctx.content.read_file(content_id).await?;
        if target.content_id != base.content_id {
            self.send_file_content(&token, &content).await;
        }
        if target.mode != base.mode {
            // Property diff between the two modes.
            for (name, value) in &target.properties {
                if base.properties.get(name) != Some(value) {
                    self.command(
                        "change-file-prop",
                        vec![
                            Item::str(&token),
                            Item::str(name),
                            optional(Some(Item::str(value))),
                        ],
                    );
                }
            }
            for name in base.properties.keys() {
                if !target.properties.contains_key(name) {
                    self.command(
                        "change-file-prop",
                        vec![Item::str(&token), Item::str(name), optional(None)],
                    );
                }
            }
        }
        let checksum = format!("{:x}", md5::compute(&content));
        self.command(
            "close-file",
            vec![Item::str(&token), optional(Some(Item::str(&checksum)))],
        );
        Ok(())
    }

    /// Emit the commands that reconcile one directory
    ///
    /// `base_rev` is what the client holds for this directory; `None`
    /// means it has nothing and every target entry is an add.
    fn dir(
        &mut self,
        path: String,
        token: String,
        base_rev: Option<u64>,
    ) -> BoxFuture<'_, Result<()>> {
        async move {
            let target_tree = self.ctx.resolver.dir_tree(self.report.target_rev, &path).await?;
            let base_tree = match base_rev {
                Some(rev) => match self.ctx.resolver.check_path(rev, &path).await? {
                    Some(NodeKind::Directory) => Some(self.ctx.resolver.dir_tree(rev, &path).await?),
                    _ => None,
                },
                None => None,
            };

            let mut names: Vec<String> = target_tree.entries.keys().cloned().collect();
            if let Some(base) = &base_tree {
                for name in base.entries.keys() {
                    if !target_tree.entries.contains_key(name) {
                        names.push(name.clone());
                    }
                }
            }
            names.sort();

            for name in names {
                // A non-empty update target restricts the top level.
                if path.is_empty() && !self.report.target.is_empty() && name != self.report.target
                {
                    continue;
                }
                let child = paths::join(&path, &name);
                let child_base_rev = self.report.base_rev_for(&child).or(base_rev);
                let target_entry = target_tree.get(&name).copied();
                let base_entry = match (&base_tree, child_base_rev) {
                    (Some(base), Some(_)) => base.get(&name).copied(),
                    _ => None,
                };

                match (base_entry, target_entry) {
                    (Some(_), None) => {
                        self.command(
                            "delete-entry",
                            vec![
                                Item::str(&child),
                                optional(Some(Item::Number(self.report.target_rev))),
                                Item::str(&token),
                            ],
                        );
                    }
                    (None, Some(entry)) => {
                        if entry.mode == FileMode::Directory {
                            let child_token = self.token("d");
                            self.command(
                                "add-dir",
                                vec![
                                    Item::str(&child),
                                    Item::str(&token),
                                    Item::str(&child_token),
                                    optional(None),
                                ],
                            );
                            self.dir(child.clone(), child_token.clone(), None).await?;
                            self.command("close-dir", vec![Item::str(&child_token)]);
                        } else {
                            self.add_file(&child, &token).await?;
                        }
                    }
                    (Some(base), Some(target)) => {
                        match (base.mode.is_dir(), target.mode.is_dir()) {
                            (true, true) => {
                                if base.id != target.id {
                                    let child_token = self.token("d");
                                    self.command(
                                        "open-dir",
                                        vec![
                                            Item::str(&child),
                                            Item::str(&token),
                                            Item::str(&child_token),
                                            optional(child_base_rev.map(Item::Number)),
                                        ],
                                    );
                                    self.dir(child.clone(), child_token.clone(), child_base_rev)
                                        .await?;
                                    self.command("close-dir", vec![Item::str(&child_token)]);
                                }
                            }
                            (false, false) => {
                                if let Some(rev) = child_base_rev {
                                    self.update_file(&child, &token, rev).await?;
                                }
                            }
                            _ => {
                                // Kind change: replace wholesale.
                                self.command(
                                    "delete-entry",
                                    vec![
                                        Item::str(&child),
                                        optional(Some(Item::Number(self.report.target_rev))),
                                        Item::str(&token),
                                    ],
                                );
                                if target.mode == FileMode::Directory {
                                    let child_token = self.token("d");
                                    self.command(
                                        "add-dir",
                                        vec![
                                            Item::str(&child),
                                            Item::str(&token),
                                            Item::str(&child_token),
                                            optional(None),
                                        ],
                                    );
                                    self.dir(child.clone(), child_token.clone(), None).await?;
                                    self.command("close-dir", vec![Item::str(&child_token)]);
                                } else {
                                    self.add_file(&child, &token).await?;
                                }
                            }
                        }
                    }
                    (None, None) => {}
                }
            }
            Ok(())
        }
        .boxed()
    }
}

//! Client-driven commit editor command set
//!
//! With the edit-pipeline capability the client streams editor commands
//! without waiting for per-command responses. A failed command therefore
//! poisons the edit: later commands are swallowed and the stored error is
//! reported when the client finally asks for a response at close-edit (or
//! abort-edit).

use bytes::Bytes;
use std::collections::HashMap;
use svngit_core::{BridgeError, CommitEditor, Result};
use tracing::debug;

use crate::commands::{opt_rev, opt_str, param};
use crate::items::Item;
use crate::session::SessionContext;
use crate::svndiff;
use crate::wire::{auth_request, failure, success, svn_date};

/// What the session should do after feeding one edit command
pub enum EditOutcome {
    /// Stay in the edit phase, nothing to send
    Continue,
    /// Edit concluded; send these bytes and return to the ready state
    Finished(Vec<u8>),
}

pub struct EditState {
    editor: CommitEditor,
    author: String,
    log_message: String,
    retry_on_conflict: bool,
    /// token -> normalized path
    dir_tokens: HashMap<String, String>,
    file_tokens: HashMap<String, String>,
    /// file token -> accumulated svndiff bytes
    deltas: HashMap<String, Vec<u8>>,
    /// file token -> final content, for close-file checksum verification
    contents: HashMap<String, Bytes>,
    deferred: Option<BridgeError>,
}

impl EditState {
    pub fn new(
        editor: CommitEditor,
        author: String,
        log_message: String,
        retry_on_conflict: bool,
    ) -> Self {
        Self {
            editor,
            author,
            log_message,
            retry_on_conflict,
            dir_tokens: HashMap::new(),
            file_tokens: HashMap::new(),
            deltas: HashMap::new(),
            contents: HashMap::new(),
            deferred: None,
        }
    }

    fn dir_path(&self, token: &str) -> Result<String> {
        self.dir_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| BridgeError::ProtocolViolation(format!("unknown dir token '{}'", token)))
    }

    fn file_path(&self, token: &str) -> Result<String> {
        self.file_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| {
                BridgeError::ProtocolViolation(format!("unknown file token '{}'", token))
            })
    }

    /// `( copy-path copy-rev )?` — the copy path arrives as a URL
    fn copy_from<'a>(
        &self,
        ctx: &'a SessionContext,
        item: Option<&'a Item>,
    ) -> Result<Option<(String, u64)>> {
        let Some(list) = item.map(|i| i.as_list()).transpose()? else {
            return Ok(None);
        };
        if list.is_empty() {
            return Ok(None);
        }
        if list.len() != 2 {
            return Err(BridgeError::ProtocolViolation(
                "malformed copy-from tuple".into(),
            ));
        }
        let url = list[0].as_str()?;
        let rev = list[1].as_number()?;
        Ok(Some((ctx.path_from_url(url), rev)))
    }

    pub async fn feed(
        &mut self,
        ctx: &SessionContext,
        command: &str,
        params: &[Item],
    ) -> Result<EditOutcome> {
        // Terminal commands always get a response, even on a poisoned edit.
        match command {
            "close-edit" => return Ok(EditOutcome::Finished(self.close(ctx).await)),
            "abort-edit" => {
                self.editor.abort();
                return Ok(EditOutcome::Finished(success(vec![])));
            }
            _ => {}
        }
        if self.deferred.is_some() {
            return Ok(EditOutcome::Continue);
        }
        if let Err(e) = self.apply(ctx, command, params).await {
            debug!(command, error = %e, "edit command failed, deferring");
            self.deferred = Some(e);
        }
        Ok(EditOutcome::Continue)
    }

    async fn apply(
        &mut self,
        ctx: &SessionContext,
        command: &str,
        params: &[Item],
    ) -> Result<()> {
        match command {
            "open-root" => {
                let token = param(params, 1, "root-token")?.as_str()?.to_string();
                self.dir_tokens.insert(token, String::new());
            }
            "delete-entry" => {
                let path = param(params, 0, "path")?.as_str()?.to_string();
                let rev = opt_rev(param(params, 1, "rev")?)?
                    .unwrap_or(self.editor.base_revision());
                self.editor.delete_entry(&path, rev).await?;
            }
            "add-dir" => {
                let path = param(params, 0, "path")?.as_str()?.to_string();
                let token = param(params, 2, "child-token")?.as_str()?.to_string();
                let copy = self.copy_from(ctx, params.get(3))?;
                let copy_ref = copy.as_ref().map(|(p, r)| (p.as_str(), *r));
                self.editor.add_directory(&path, copy_ref).await?;
                self.dir_tokens
                    .insert(token, svngit_core::paths::normalize(&path));
            }
            "open-dir" => {
                let path = param(params, 0, "path")?.as_str()?.to_string();
                let token = param(params, 2, "child-token")?.as_str()?.to_string();
                let rev = opt_rev(param(params, 3, "rev")?)?
                    .unwrap_or(self.editor.base_revision());
                self.editor.open_directory(&path, rev).await?;
                self.dir_tokens
                    .insert(token, svngit_core::paths::normalize(&path));
            }
            "change-dir-prop" => {
                let path = self.dir_path(param(params, 0, "dir-token")?.as_str()?)?;
                let name = param(params, 1, "name")?.as_str()?.to_string();
                let value = opt_str(param(params, 2, "value")?)?;
                self.editor.change_prop(&path, &name, value.as_deref()).await?;
            }
            "close-dir" => {
                let token = param(params, 0, "dir-token")?.as_str()?;
                self.dir_tokens.remove(token);
            }
            "add-file" => {
                let path = param(params, 0, "path")?.as_str()?.to_string();
                let token = param(params, 2, "file-token")?.as_str()?.to_string();
                let copy = self.copy_from(ctx, params.get(3))?;
                let copy_ref = copy.as_ref().map(|(p, r)| (p.as_str(), *r));
                self.editor.add_file(&path, copy_ref).await?;
                self.file_tokens
                    .insert(token, svngit_core::paths::normalize(&path));
            }
            "open-file" => {
                let path = param(params, 0, "path")?.as_str()?.to_string();
                let token = param(params, 2, "file-token")?.as_str()?.to_string();
                let rev = opt_rev(param(params, 3, "rev")?)?
                    .unwrap_or(self.editor.base_revision());
                self.editor.open_file(&path, rev).await?;
                self.file_tokens
                    .insert(token, svngit_core::paths::normalize(&path));
            }
            "apply-textdelta" => {
                let token = param(params, 0, "file-token")?.as_str()?.to_string();
                self.file_path(&token)?;
                self.deltas.insert(token, Vec::new());
            }
            "textdelta-chunk" => {
                let token = param(params, 0, "file-token")?.as_str()?;
                let chunk = param(params, 1, "chunk")?.as_bytes()?;
                self.deltas
                    .get_mut(token)
                    .ok_or_else(|| {
                        BridgeError::ProtocolViolation("textdelta-chunk without apply-textdelta".into())
                    })?
                    .extend_from_slice(chunk);
            }
            "textdelta-end" => {
                let token = param(params, 0, "file-token")?.as_str()?.to_string();
                let delta = self.deltas.remove(&token).ok_or_else(|| {
                    BridgeError::ProtocolViolation("textdelta-end without apply-textdelta".into())
                })?;
                let path = self.file_path(&token)?;
                let base = self.editor.base_content(&path).await?;
                let content = Bytes::from(svndiff::apply(&base, &delta)?);
                self.contents.insert(token, content.clone());
                self.editor.set_file_content(&path, content).await?;
            }
            "change-file-prop" => {
                let path = self.file_path(param(params, 0, "file-token")?.as_str()?)?;
                let name = param(params, 1, "name")?.as_str()?.to_string();
                let value = opt_str(param(params, 2, "value")?)?;
                self.editor.change_prop(&path, &name, value.as_deref()).await?;
            }
            "close-file" => {
                let token = param(params, 0, "file-token")?.as_str()?.to_string();
                if let Some(expected) = opt_str(param(params, 1, "checksum")?)? {
                    if let Some(content) = self.contents.get(&token) {
                        let actual = format!("{:x}", md5::compute(content));
                        if actual != expected {
                            return Err(BridgeError::ProtocolViolation(format!(
                                "checksum mismatch for '{}': expected {}, got {}",
                                self.file_path(&token)?,
                                expected,
                                actual
                            )));
                        }
                    }
                }
                self.file_tokens.remove(&token);
                self.contents.remove(&token);
            }
            other => {
                return Err(BridgeError::ProtocolViolation(format!(
                    "unexpected command '{}' during edit",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Respond to close-edit: failure for a poisoned edit, otherwise
    /// finalize (with the optional transparent retry) and send commit-info.
    async fn close(&mut self, _ctx: &SessionContext) -> Vec<u8> {
        if let Some(e) = self.deferred.take() {
            self.editor.abort();
            return failure(&e);
        }
        let mut result = self.editor.finalize(&self.author, &self.log_message).await;
        if self.retry_on_conflict
            && matches!(result, Err(BridgeError::ConcurrentModification))
        {
            // The editor re-validates against the new head on its own; a
            // second attempt only succeeds when nothing overlapping landed.
            debug!("retrying finalize after publish race");
            result = self.editor.finalize(&self.author, &self.log_message).await;
        }
        match result {
            Ok(revision) => {
                let mut out = success(vec![]);
                out.extend_from_slice(&auth_request(&[], ""));
                out.extend_from_slice(&crate::items::encode(&Item::list(vec![
                    Item::Number(revision.number),
                    Item::list(vec![Item::str(&svn_date(revision.date))]),
                    Item::list(vec![Item::str(&revision.author)]),
                    Item::list(vec![]),
                ])));
                out
            }
            Err(e) => {
                self.editor.abort();
                failure(&e)
            }
        }
    }
}

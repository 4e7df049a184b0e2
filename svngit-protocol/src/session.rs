//! Protocol session state machine
//!
//! Sans-io: the session consumes raw bytes and yields raw bytes, so the
//! whole protocol is testable without a socket. The server binary owns the
//! TCP plumbing and simply pipes data through `feed`.
//!
//! Lifecycle: greeting -> auth -> ready, with the update report and the
//! commit edit as the two sub-states that temporarily take over command
//! dispatch. Malformed or out-of-sequence input produces one failure
//! response and closes the session; command-level errors (missing path,
//! stale base) are answered and the session stays up.

use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use svngit_core::{
    AuthProvider, BridgeError, CommitEditor, ContentAccess, Credentials, EditorOptions, LockTable,
    Principal, Result, TreeResolver,
};

use crate::commands::{self, opt_rev, param};
use crate::editcmds::{EditOutcome, EditState};
use crate::items::{parse_item, Item};
use crate::report::ReportState;
use crate::wire::{auth_request, failure, success};

/// Capabilities advertised in the greeting and repos-info
pub const CAPABILITIES: &[&str] = &[
    "edit-pipeline",
    "svndiff1",
    "absent-entries",
    "depth",
    "log-revprops",
];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Realm string presented during authentication
    pub realm: String,
    /// Repository root URL, e.g. `svn://host/repo`
    pub url: String,
    /// Retry a finalize once when a non-overlapping publish wins the race
    pub retry_on_conflict: bool,
    /// Bounded wait for commit-time path guards
    pub lock_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            realm: "svngit".to_string(),
            url: "svn://localhost/repo".to_string(),
            retry_on_conflict: true,
            lock_wait: Duration::from_secs(10),
        }
    }
}

/// Shared per-repository state every session operates on
pub struct SessionContext {
    pub resolver: Arc<TreeResolver>,
    pub locks: Arc<LockTable>,
    pub auth: Arc<dyn AuthProvider>,
    pub content: Arc<ContentAccess>,
    pub config: SessionConfig,
}

impl SessionContext {
    /// Repository path of a copy-from URL
    pub fn path_from_url(&self, url: &str) -> String {
        if let Some(rest) = url.strip_prefix(&self.config.url) {
            return svngit_core::paths::normalize(rest);
        }
        // Foreign prefix: best effort, strip scheme and authority.
        let path = url.splitn(4, '/').nth(3).unwrap_or("");
        svngit_core::paths::normalize(path)
    }
}

enum State {
    AwaitGreeting,
    AwaitAuth,
    Ready,
    Reporting(ReportState),
    AwaitEditAck,
    Editing(Box<EditState>),
    Closed,
}

/// Bytes to send plus whether the connection should be torn down
pub struct SessionOutput {
    pub bytes: Vec<u8>,
    pub close: bool,
}

pub struct Session {
    ctx: Arc<SessionContext>,
    state: State,
    buf: Vec<u8>,
    principal: Option<Principal>,
}

impl Session {
    /// Create a session; the returned bytes are the server greeting and
    /// must be sent before any input is fed.
    pub fn new(ctx: Arc<SessionContext>) -> (Self, Vec<u8>) {
        let caps = CAPABILITIES.iter().map(|c| Item::word(c)).collect();
        let greeting = success(vec![
            Item::Number(2),
            Item::Number(2),
            Item::List(Vec::new()),
            Item::List(caps),
        ]);
        let session = Self {
            ctx,
            state: State::AwaitGreeting,
            buf: Vec::new(),
            principal: None,
        };
        (session, greeting)
    }

    fn principal(&self) -> Principal {
        self.principal.clone().unwrap_or_else(Principal::anonymous)
    }

    /// Feed raw client bytes, producing whatever the server says next
    pub async fn feed(&mut self, data: &[u8]) -> SessionOutput {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        let mut close = false;
        loop {
            if matches!(self.state, State::Closed) {
                close = true;
                break;
            }
            match parse_item(&self.buf) {
                Ok(None) => break,
                Ok(Some((item, used))) => {
                    self.buf.drain(..used);
                    if let Err(e) = self.handle(item, &mut out).await {
                        warn!(error = %e, "fatal protocol error, closing session");
                        out.extend_from_slice(&failure(&e));
                        self.state = State::Closed;
                        close = true;
                        break;
                    }
                }
                Err(e) => {
                    out.extend_from_slice(&failure(&e));
                    self.state = State::Closed;
                    close = true;
                    break;
                }
            }
        }
        SessionOutput { bytes: out, close }
    }

    async fn handle(&mut self, item: Item, out: &mut Vec<u8>) -> Result<()> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        match state {
            State::AwaitGreeting => self.handle_greeting(item, out).await?,
            State::AwaitAuth => self.handle_auth(item, out).await?,
            State::Ready => self.handle_command(item, out).await?,
            State::Reporting(report) => self.handle_report(report, item, out).await?,
            State::AwaitEditAck => {
                // The client acknowledged (or failed) the edit drive;
                // either way the update command now gets its response.
                out.extend_from_slice(&success(vec![]));
                self.state_set(State::Ready);
            }
            State::Editing(mut edit) => {
                let (command, params) = split_command(&item)?;
                match edit.feed(&self.ctx, command, &params).await? {
                    EditOutcome::Continue => self.state_set(State::Editing(edit)),
                    EditOutcome::Finished(bytes) => {
                        out.extend_from_slice(&bytes);
                        self.state_set(State::Ready);
                    }
                }
            }
            State::Closed => {}
        }
        Ok(())
    }

    async fn handle_greeting(&mut self, item: Item, out: &mut Vec<u8>) -> Result<()> {
        let list = item.as_list()?;
        let version = param(list, 0, "version")?.as_number()?;
        if version != 2 {
            return Err(BridgeError::ProtocolViolation(format!(
                "unsupported protocol version {}",
                version
            )));
        }
        let url = param(list, 2, "url")?.as_str()?;
        debug!(url, "client greeting received");
        out.extend_from_slice(&auth_request(
            &self.ctx.auth.mechanisms(),
            &self.ctx.config.realm,
        ));
        self.state_set(State::AwaitAuth);
        Ok(())
    }

    async fn handle_auth(&mut self, item: Item, out: &mut Vec<u8>) -> Result<()> {
        let list = item.as_list()?;
        let mechanism = param(list, 0, "mechanism")?.as_word()?;
        let token = list
            .get(1)
            .and_then(|t| t.as_list().ok())
            .and_then(|l| l.first())
            .and_then(|s| s.as_bytes().ok().cloned())
            .unwrap_or_else(Bytes::new);

        let credentials = match mechanism {
            "ANONYMOUS" => Credentials::Anonymous,
            "PLAIN" => plain_credentials(&token)?,
            other => {
                return Err(BridgeError::AuthFailure(format!(
                    "unsupported mechanism '{}'",
                    other
                )))
            }
        };

        match self.ctx.auth.authenticate(&credentials).await {
            Ok(principal) => {
                info!(user = principal.author(), "session authenticated");
                out.extend_from_slice(&success(vec![]));
                let caps = CAPABILITIES.iter().map(|c| Item::word(c)).collect();
                out.extend_from_slice(&success(vec![
                    Item::str(self.ctx.resolver.revcache().uuid()),
                    Item::str(&self.ctx.config.url),
                    Item::List(caps),
                ]));
                self.principal = Some(principal);
                self.state_set(State::Ready);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_command(&mut self, item: Item, out: &mut Vec<u8>) -> Result<()> {
        let (command, params) = split_command(&item)?;
        let ctx = self.ctx.clone();
        let result: Result<State> = match command {
            "get-latest-rev" => respond(out, commands::get_latest_rev(&ctx).await),
            "check-path" => respond(out, commands::check_path(&ctx, &params).await),
            "stat" => respond(out, commands::stat(&ctx, &params).await),
            "get-file" => respond(out, commands::get_file(&ctx, &params).await),
            "get-dir" => respond(out, commands::get_dir(&ctx, &params).await),
            "log" => respond(out, commands::log(&ctx, &params).await),
            "get-lock" => respond(out, commands::get_lock(&ctx, &params).await),
            "get-locks" => respond(out, commands::get_locks(&ctx, &params).await),
            "lock" => respond(out, commands::lock(&ctx, &self.principal(), &params).await),
            "unlock" => respond(out, commands::unlock(&ctx, &params).await),
            "reparent" => {
                out.extend_from_slice(&success(vec![]));
                Ok(State::Ready)
            }
            "update" => self.begin_update(&params, out).await,
            "commit" => self.begin_commit(&params, out).await,
            other => Err(BridgeError::ProtocolViolation(format!(
                "unknown command '{}'",
                other
            ))),
        };
        match result {
            Ok(state) => {
                self.state_set(state);
                Ok(())
            }
            // Recoverable command failures are answered in-band.
            Err(e) if e.is_recoverable() => {
                debug!(command, error = %e, "command failed");
                out.extend_from_slice(&failure(&e));
                self.state_set(State::Ready);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn begin_update(&mut self, params: &[Item], _out: &mut Vec<u8>) -> Result<State> {
        let rev = opt_rev(param(params, 0, "rev")?)?;
        let target = param(params, 1, "target")?.as_str()?.to_string();
        let head = self.ctx.resolver.revcache().head_revision().await;
        let target_rev = rev.unwrap_or(head);
        self.ctx.resolver.revcache().resolve(target_rev).await?;
        debug!(target_rev, target = %target, "update report started");
        Ok(State::Reporting(ReportState::new(target_rev, target)))
    }

    async fn begin_commit(&mut self, params: &[Item], out: &mut Vec<u8>) -> Result<State> {
        let log_message = param(params, 0, "log-message")?.as_str()?.to_string();
        let mut lock_tokens: Vec<(String, String)> = Vec::new();
        if let Some(list) = params.get(1).and_then(|i| i.as_list().ok()) {
            for entry in list {
                let pair = entry.as_list()?;
                if pair.len() == 2 {
                    lock_tokens.push((pair[0].as_str()?.to_string(), pair[1].as_str()?.to_string()));
                }
            }
        }
        let keep_locks = params
            .get(2)
            .and_then(|i| i.as_bool().ok())
            .unwrap_or(false);

        let head = self.ctx.resolver.revcache().head_revision().await;
        let mut editor = CommitEditor::open(
            self.ctx.resolver.clone(),
            self.ctx.locks.clone(),
            head,
            EditorOptions {
                lock_wait: self.ctx.config.lock_wait,
                keep_locks,
            },
        )
        .await?;
        for (path, token) in &lock_tokens {
            editor.supply_lock_token(path, token);
        }

        out.extend_from_slice(&auth_request(&[], ""));
        out.extend_from_slice(&success(vec![]));
        debug!(base = head, user = %self.principal().author(), "commit edit started");
        Ok(State::Editing(Box::new(EditState::new(
            editor,
            self.principal().author().to_string(),
            log_message,
            self.ctx.config.retry_on_conflict,
        ))))
    }

    async fn handle_report(
        &mut self,
        mut report: ReportState,
        item: Item,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let (command, params) = split_command(&item)?;
        let next = match command {
            "set-path" => {
                let path = param(&params, 0, "path")?.as_str()?.to_string();
                let rev = param(&params, 1, "rev")?.as_number()?;
                let start_empty = param(&params, 2, "start-empty")?.as_bool()?;
                report.set_path(&path, rev, start_empty);
                State::Reporting(report)
            }
            "delete-path" => {
                let path = param(&params, 0, "path")?.as_str()?.to_string();
                report.delete_path(&path);
                State::Reporting(report)
            }
            "link-path" => {
                out.extend_from_slice(&failure(&BridgeError::ProtocolViolation(
                    "link-path is not supported".into(),
                )));
                State::Ready
            }
            "finish-report" => {
                out.extend_from_slice(&auth_request(&[], ""));
                match report.drive(&self.ctx).await {
                    Ok(bytes) => {
                        out.extend_from_slice(&bytes);
                        State::AwaitEditAck
                    }
                    Err(e) if e.is_recoverable() => {
                        out.extend_from_slice(&failure(&e));
                        State::Ready
                    }
                    Err(e) => return Err(e),
                }
            }
            "abort-report" => State::Ready,
            other => {
                return Err(BridgeError::ProtocolViolation(format!(
                    "unexpected command '{}' during report",
                    other
                )))
            }
        };
        self.state_set(next);
        Ok(())
    }

    fn state_set(&mut self, state: State) {
        self.state = state;
    }
}

fn respond(out: &mut Vec<u8>, result: Result<Vec<u8>>) -> Result<State> {
    out.extend_from_slice(&result?);
    Ok(State::Ready)
}

fn split_command(item: &Item) -> Result<(&str, Vec<Item>)> {
    let list = item.as_list()?;
    let command = param(list, 0, "command")?.as_word()?;
    let params = match list.get(1) {
        Some(p) => p.as_list()?.to_vec(),
        None => Vec::new(),
    };
    Ok((command, params))
}

/// PLAIN SASL token: `authzid \0 authcid \0 password`
fn plain_credentials(token: &[u8]) -> Result<Credentials> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|_| BridgeError::AuthFailure("malformed PLAIN token".into()))?;
    let mut parts = decoded.split(|b| *b == 0);
    let _authzid = parts.next();
    let username = parts
        .next()
        .and_then(|p| std::str::from_utf8(p).ok())
        .ok_or_else(|| BridgeError::AuthFailure("malformed PLAIN token".into()))?;
    let password = parts
        .next()
        .and_then(|p| std::str::from_utf8(p).ok())
        .ok_or_else(|| BridgeError::AuthFailure("malformed PLAIN token".into()))?;
    Ok(Credentials::Password {
        username: username.to_string(),
        password: password.to_string(),
    })
}

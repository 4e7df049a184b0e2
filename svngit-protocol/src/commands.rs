//! Read and lock command handlers
//!
//! Each handler parses its params tuple, asks the core for the answer and
//! produces the complete response byte sequence. Streamed responses
//! (get-file contents, log entries) append their extra frames after the
//! initial command response, exactly as svnserve does.

use svngit_core::{BridgeError, Lock, NodeKind, Principal, Result};

use crate::items::{encode, Item};
use crate::session::SessionContext;
use crate::wire::{auth_request, optional, success, svn_date};

pub(crate) fn param<'a>(params: &'a [Item], idx: usize, what: &str) -> Result<&'a Item> {
    params.get(idx).ok_or_else(|| {
        BridgeError::ProtocolViolation(format!("missing parameter {} ({})", idx, what))
    })
}

/// `( rev? )` optional revision tuple
pub(crate) fn opt_rev(item: &Item) -> Result<Option<u64>> {
    let list = item.as_list()?;
    match list.first() {
        Some(rev) => Ok(Some(rev.as_number()?)),
        None => Ok(None),
    }
}

/// Optional string from a zero-or-one element tuple
pub(crate) fn opt_str(item: &Item) -> Result<Option<String>> {
    let list = item.as_list()?;
    match list.first() {
        Some(s) => Ok(Some(s.as_str()?.to_string())),
        None => Ok(None),
    }
}

async fn resolve_rev(ctx: &SessionContext, requested: Option<u64>) -> u64 {
    match requested {
        Some(rev) => rev,
        None => ctx.resolver.revcache().head_revision().await,
    }
}

fn prop_list(properties: &std::collections::BTreeMap<String, String>) -> Item {
    Item::List(
        properties
            .iter()
            .map(|(name, value)| Item::list(vec![Item::str(name), Item::str(value)]))
            .collect(),
    )
}

fn lock_item(lock: &Lock) -> Item {
    Item::list(vec![
        Item::str(&format!("/{}", lock.path)),
        Item::str(&lock.token),
        Item::str(&lock.owner),
        optional(lock.comment.as_deref().map(Item::str)),
        Item::str(&svn_date(lock.created)),
        optional(None), // no expiration
    ])
}

pub async fn get_latest_rev(ctx: &SessionContext) -> Result<Vec<u8>> {
    let head = ctx.resolver.revcache().head_revision().await;
    Ok(success(vec![Item::Number(head)]))
}

pub async fn check_path(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let rev = resolve_rev(ctx, opt_rev(param(params, 1, "rev")?)?).await;
    let kind = match ctx.resolver.check_path(rev, path).await? {
        Some(kind) => kind.as_word(),
        None => "none",
    };
    Ok(success(vec![Item::word(kind)]))
}

async fn dirent_fields(
    ctx: &SessionContext,
    rev: u64,
    path: &str,
    entry: &svngit_core::Entry,
) -> Result<Vec<Item>> {
    let (created_rev, author, date) = ctx.resolver.last_changed(rev, path).await?;
    Ok(vec![
        Item::word(entry.kind.as_word()),
        Item::Number(entry.size),
        Item::word(if entry.properties.is_empty() { "false" } else { "true" }),
        Item::Number(created_rev),
        optional(Some(Item::str(&svn_date(date)))),
        optional(if author.is_empty() { None } else { Some(Item::str(&author)) }),
    ])
}

pub async fn stat(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let rev = resolve_rev(ctx, opt_rev(param(params, 1, "rev")?)?).await;
    let dirent = match ctx.resolver.check_path(rev, path).await? {
        Some(_) => {
            let entry = ctx.resolver.entry_at(rev, path).await?;
            Some(Item::List(dirent_fields(ctx, rev, path, &entry).await?))
        }
        None => None,
    };
    Ok(success(vec![optional(dirent)]))
}

pub async fn get_file(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let rev = resolve_rev(ctx, opt_rev(param(params, 1, "rev")?)?).await;
    let want_props = param(params, 2, "want-props")?.as_bool()?;
    let want_contents = param(params, 3, "want-contents")?.as_bool()?;

    let entry = ctx.resolver.entry_at(rev, path).await?;
    let content_id = entry
        .content_id
        .ok_or_else(|| BridgeError::NotFound(format!("'{}' is not a file", path)))?;
    let content = ctx.content.read_file(content_id).await?;
    let checksum = format!("{:x}", md5::compute(&content));

    let props = if want_props { entry.properties.clone() } else { Default::default() };
    let mut out = success(vec![
        optional(Some(Item::str(&checksum))),
        Item::Number(rev),
        prop_list(&props),
    ]);

    if want_contents {
        // Content streams as counted strings, terminated by an empty one.
        for chunk in content.chunks(64 * 1024) {
            out.extend_from_slice(&encode(&Item::Str(bytes::Bytes::copy_from_slice(chunk))));
        }
        out.extend_from_slice(&encode(&Item::str("")));
        out.extend_from_slice(&success(vec![]));
    }
    Ok(out)
}

pub async fn get_dir(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let rev = resolve_rev(ctx, opt_rev(param(params, 1, "rev")?)?).await;
    let want_props = param(params, 2, "want-props")?.as_bool()?;
    let want_contents = param(params, 3, "want-contents")?.as_bool()?;

    let dir = ctx.resolver.entry_at(rev, path).await?;
    if dir.kind != NodeKind::Directory {
        return Err(BridgeError::NotFound(format!("'{}' is not a directory", path)));
    }

    let props = if want_props { dir.properties.clone() } else { Default::default() };
    let mut entries = Vec::new();
    if want_contents {
        for (name, entry) in ctx.resolver.list_dir(rev, path).await? {
            let child = if path.is_empty() || path == "/" {
                name.clone()
            } else {
                format!("{}/{}", path.trim_matches('/'), name)
            };
            let mut fields = vec![Item::str(&name)];
            fields.extend(dirent_fields(ctx, rev, &child, &entry).await?);
            entries.push(Item::List(fields));
        }
    }

    Ok(success(vec![
        Item::Number(rev),
        prop_list(&props),
        Item::List(entries),
    ]))
}

fn log_entry(rev: &svngit_core::Revision, include_changed: bool) -> Item {
    let changed = if include_changed {
        rev.changed_paths
            .iter()
            .map(|c| {
                Item::list(vec![
                    Item::str(&format!("/{}", c.path)),
                    Item::word(c.kind.code()),
                ])
            })
            .collect()
    } else {
        Vec::new()
    };
    Item::list(vec![
        Item::List(changed),
        Item::Number(rev.number),
        optional(if rev.author.is_empty() { None } else { Some(Item::str(&rev.author)) }),
        optional(Some(Item::str(&svn_date(rev.date)))),
        optional(Some(Item::str(&rev.message))),
    ])
}

pub async fn log(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let paths: Vec<String> = param(params, 0, "paths")?
        .as_list()?
        .iter()
        .map(|p| p.as_str().map(svngit_core::paths::normalize))
        .collect::<Result<_>>()?;
    let start = opt_rev(param(params, 1, "start-rev")?)?;
    let end = opt_rev(param(params, 2, "end-rev")?)?;
    let include_changed = param(params, 3, "changed-paths")?.as_bool()?;
    // Older clients send the limit bare, newer ones as a tuple.
    let limit = params
        .get(5)
        .and_then(|i| {
            i.as_number().ok().or_else(|| {
                i.as_list().ok().and_then(|l| l.first()).and_then(|n| n.as_number().ok())
            })
        })
        .filter(|n| *n > 0);

    let cache = ctx.resolver.revcache();
    let head = cache.head_revision().await;
    let start = start.unwrap_or(head).min(head);
    let end = end.unwrap_or(0).min(head);
    let descending = start >= end;
    let (lo, hi) = if descending { (end, start) } else { (start, end) };

    let mut numbers: Vec<u64> = (lo..=hi).collect();
    if descending {
        numbers.reverse();
    }

    let mut out = Vec::new();
    let mut sent = 0u64;
    for number in numbers {
        let rev = cache.resolve(number).await?;
        let relevant = paths.iter().all(|p| p.is_empty())
            || rev.changed_paths.iter().any(|c| {
                paths
                    .iter()
                    .any(|p| svngit_core::paths::conflicts(p, &c.path))
            });
        if !relevant {
            continue;
        }
        out.extend_from_slice(&encode(&log_entry(&rev, include_changed)));
        sent += 1;
        if let Some(limit) = limit {
            if sent >= limit {
                break;
            }
        }
    }
    out.extend_from_slice(&encode(&Item::word("done")));
    out.extend_from_slice(&success(vec![]));
    Ok(out)
}

pub async fn lock(
    ctx: &SessionContext,
    principal: &Principal,
    params: &[Item],
) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let comment = opt_str(param(params, 1, "comment")?)?;
    let steal = param(params, 2, "steal-lock")?.as_bool()?;

    // Locks only make sense on existing files.
    let head = ctx.resolver.revcache().head_revision().await;
    match ctx.resolver.check_path(head, path).await? {
        Some(NodeKind::File) => {}
        _ => return Err(BridgeError::NotFound(format!("/{}", svngit_core::paths::normalize(path)))),
    }

    if steal && ctx.locks.get(path).is_some() {
        ctx.locks.release_forced(path)?;
    }
    let lock = ctx.locks.acquire(path, principal.author(), comment)?;
    let mut out = auth_request(&[], "");
    out.extend_from_slice(&success(vec![lock_item(&lock)]));
    Ok(out)
}

pub async fn unlock(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let token = opt_str(param(params, 1, "token")?)?;
    let break_lock = param(params, 2, "break-lock")?.as_bool()?;

    if break_lock {
        ctx.locks.release_forced(path)?;
    } else {
        let token = token.ok_or_else(|| BridgeError::InvalidToken {
            path: format!("/{}", svngit_core::paths::normalize(path)),
        })?;
        ctx.locks.release(path, &token)?;
    }
    let mut out = auth_request(&[], "");
    out.extend_from_slice(&success(vec![]));
    Ok(out)
}

pub async fn get_lock(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let lock = ctx.locks.get(path).map(|l| lock_item(&l));
    Ok(success(vec![optional(lock)]))
}

pub async fn get_locks(ctx: &SessionContext, params: &[Item]) -> Result<Vec<u8>> {
    let path = param(params, 0, "path")?.as_str()?;
    let locks: Vec<Item> = ctx.locks.list(path).iter().map(lock_item).collect();
    Ok(success(vec![Item::List(locks)]))
}

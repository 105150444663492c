use std::sync::Arc;

use compact_str::CompactString;

use super::CallCtx;
use crate::engine::iterator::effective_boolean_value;
use crate::error::{Error, Result};
use crate::item::{Item, Sequence};

pub(super) fn empty_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    Ok(vec![Item::Boolean(args[0].is_empty())])
}

pub(super) fn not_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    Ok(vec![Item::Boolean(!effective_boolean_value(&args[0], ctx.location)?)])
}

pub(super) fn boolean_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    Ok(vec![Item::Boolean(effective_boolean_value(&args[0], ctx.location)?)])
}

pub(super) fn size_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    match args[0].as_slice() {
        [] => Ok(Vec::new()),
        [Item::Array(members)] => Ok(vec![Item::Integer(i64::try_from(members.len()).unwrap_or(i64::MAX))]),
        [other] => Err(Error::unexpected_type(format!("size expects an array, got {}", other.dynamic_type()), ctx.location)),
        more => Err(Error::unexpected_type(format!("size expects at most one array, got {} items", more.len()), ctx.location)),
    }
}

/// Distinct keys of the objects in the argument, in order of first
/// appearance. Other items are ignored.
pub(super) fn keys_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let mut keys: Vec<CompactString> = Vec::new();
    for item in &args[0] {
        if let Item::Object(members) = item {
            for (key, _) in members.iter() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
    }
    Ok(keys.into_iter().map(Item::String).collect())
}

fn flatten_into(item: &Item, out: &mut Sequence) {
    match item {
        Item::Array(members) => members.iter().for_each(|m| flatten_into(m, out)),
        other => out.push(other.clone()),
    }
}

/// Recursively unboxes nested arrays.
pub(super) fn flatten_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let mut out = Vec::with_capacity(args[0].len());
    for item in &args[0] {
        flatten_into(item, &mut out);
    }
    Ok(out)
}

/// The object with the given keys removed; non-objects are dropped.
pub(super) fn remove_keys_fn(ctx: &CallCtx, item: &Item, args: &[Sequence]) -> Result<Sequence> {
    let Item::Object(members) = item else { return Ok(Vec::new()) };
    let mut removed = Vec::with_capacity(args[0].len());
    for key in &args[0] {
        match key {
            Item::String(key) => removed.push(key),
            other => {
                return Err(Error::unexpected_type(
                    format!("remove-keys expects string keys, got {}", other.dynamic_type()),
                    ctx.location,
                ));
            }
        }
    }
    let kept = members.iter().filter(|(key, _)| !removed.contains(&key)).cloned().collect();
    Ok(vec![Item::Object(Arc::new(kept))])
}

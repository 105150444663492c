use super::CallCtx;
use super::strings::optional_string;
use crate::engine::distributed::Collection;
use crate::error::{Error, Result};
use crate::io::resolve_uri;
use crate::item::{Item, Sequence};

fn location_argument(ctx: &CallCtx, seq: &[Item], what: &str) -> Result<url::Url> {
    let Some(location) = optional_string(seq, what, ctx.location)? else {
        return Err(Error::unexpected_type(format!("{what} expects a location, got an empty sequence"), ctx.location));
    };
    resolve_uri(None, &location).map_err(|e| e.at(ctx.location))
}

fn partitions_argument(ctx: &CallCtx, args: &[Sequence]) -> Result<usize> {
    match args.get(1).map(Vec::as_slice) {
        None => Ok(ctx.runtime.parallelism()),
        Some([Item::Integer(n)]) if *n >= 1 => Ok(usize::try_from(*n).unwrap_or(usize::MAX)),
        Some(_) => Err(Error::unexpected_type("The number of partitions must be a positive integer", ctx.location)),
    }
}

fn parse_lines(ctx: &CallCtx, url: &url::Url) -> Result<Vec<Item>> {
    let lines = ctx.runtime.reader().read_lines(url).map_err(|e| e.at(ctx.location))?;
    tracing::debug!(location = %url, lines = lines.len(), "read JSON lines");
    lines
        .iter()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).map_err(|e| Error::from(e).at(ctx.location))?;
            Ok(Item::from_json(&value))
        })
        .collect()
}

pub(super) fn parallelize_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Collection> {
    let partitions = partitions_argument(ctx, args)?;
    Ok(Collection::from_items(args[0].clone(), partitions))
}

pub(super) fn json_lines_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Collection> {
    let url = location_argument(ctx, &args[0], "json-lines")?;
    let partitions = partitions_argument(ctx, args)?;
    Ok(Collection::from_items(parse_lines(ctx, &url)?, partitions))
}

/// Like `json-lines`, but every line must be an object so the result can be
/// viewed as a table.
pub(super) fn structured_json_lines_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Collection> {
    let url = location_argument(ctx, &args[0], "structured-json-lines")?;
    let items = parse_lines(ctx, &url)?;
    if let Some(bad) = items.iter().find(|i| !matches!(i, Item::Object(_))) {
        return Err(Error::unexpected_type(
            format!("structured-json-lines expects one object per line, got {}", bad.dynamic_type()),
            ctx.location,
        ));
    }
    Ok(Collection::from_items(items, ctx.runtime.parallelism()))
}

pub(super) fn json_doc_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let url = location_argument(ctx, &args[0], "json-doc")?;
    let text = ctx.runtime.reader().read_to_string(&url).map_err(|e| e.at(ctx.location))?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| Error::from(e).at(ctx.location))?;
    Ok(vec![Item::from_json(&value)])
}

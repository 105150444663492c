use core::cmp::Ordering;

use super::CallCtx;
use crate::ast::ArithmeticOp;
use crate::engine::expressions::operators::arithmetic;
use crate::error::{Error, Result, SourceLocation};
use crate::item::{Item, Sequence, compare_atomics};

/// `number($x)`: never fails; anything that is not a single castable value is NaN.
pub(super) fn number_fn(_ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let value = match args[0].as_slice() {
        #[allow(clippy::cast_precision_loss)]
        [Item::Integer(i)] => *i as f64,
        [Item::Decimal(d) | Item::Double(d)] => *d,
        [Item::Boolean(b)] => f64::from(u8::from(*b)),
        [Item::String(s)] => parse_double(s),
        _ => f64::NAN,
    };
    Ok(vec![Item::Double(value)])
}

fn parse_double(s: &str) -> f64 {
    match s.trim() {
        "INF" | "+INF" => f64::INFINITY,
        "-INF" => f64::NEG_INFINITY,
        trimmed if trimmed.chars().any(char::is_alphabetic) && !trimmed.contains(['e', 'E']) => f64::NAN,
        trimmed => trimmed.parse().unwrap_or(f64::NAN),
    }
}

fn numeric_items<'a>(seq: &'a [Item], what: &str, location: SourceLocation) -> Result<&'a [Item]> {
    if let Some(bad) = seq.iter().find(|i| !i.is_numeric()) {
        return Err(Error::unexpected_type(format!("{what} expects numbers, got {}", bad.dynamic_type()), location));
    }
    Ok(seq)
}

fn total(seq: &[Item], location: SourceLocation) -> Result<Item> {
    seq.iter().try_fold(Item::Integer(0), |acc, item| arithmetic(ArithmeticOp::Add, &acc, item, location))
}

pub(super) fn sum_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let items = numeric_items(&args[0], "sum", ctx.location)?;
    Ok(vec![total(items, ctx.location)?])
}

pub(super) fn avg_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let items = numeric_items(&args[0], "avg", ctx.location)?;
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let count = Item::Integer(i64::try_from(items.len()).unwrap_or(i64::MAX));
    Ok(vec![arithmetic(ArithmeticOp::Div, &total(items, ctx.location)?, &count, ctx.location)?])
}

fn extremum(args: &[Sequence], what: &str, wanted: Ordering, location: SourceLocation) -> Result<Sequence> {
    let mut best: Option<&Item> = None;
    for item in &args[0] {
        if !item.is_atomic() {
            return Err(Error::unexpected_type(format!("{what} expects atomic values, got {}", item.dynamic_type()), location));
        }
        if item.as_f64().is_some_and(f64::is_nan) {
            return Ok(vec![item.clone()]);
        }
        best = match best {
            Some(current) if compare_atomics(item, current, location)? != wanted => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.cloned().into_iter().collect())
}

pub(super) fn min_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    extremum(args, "min", Ordering::Less, ctx.location)
}

pub(super) fn max_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    extremum(args, "max", Ordering::Greater, ctx.location)
}

pub(super) fn pi_fn(_ctx: &CallCtx, _args: &[Sequence]) -> Result<Sequence> {
    Ok(vec![Item::Double(std::f64::consts::PI)])
}

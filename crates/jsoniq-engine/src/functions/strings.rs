use super::CallCtx;
use crate::error::{Error, Result, SourceLocation};
use crate::item::{Item, Sequence};

/// String value of an argument that may hold at most one atomic item.
pub(super) fn optional_string(seq: &[Item], what: &str, location: SourceLocation) -> Result<Option<String>> {
    match seq {
        [] => Ok(None),
        [item] if item.is_atomic() => item.string_value().map(Some).map_err(|e| e.at(location)),
        [item] => Err(Error::unexpected_type(
            format!("{what} expects an atomic value, got {}", item.dynamic_type()),
            location,
        )),
        _ => Err(Error::unexpected_type(format!("{what} expects at most one item, got {}", seq.len()), location)),
    }
}

pub(super) fn concat_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let mut out = String::new();
    for arg in args {
        if let Some(s) = optional_string(arg, "concat", ctx.location)? {
            out.push_str(&s);
        }
    }
    Ok(vec![Item::string(out)])
}

/// XPath rounding: halves round towards positive infinity.
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

fn numeric_argument(seq: &[Item], what: &str, location: SourceLocation) -> Result<f64> {
    match seq {
        [item] => item.as_f64().ok_or_else(|| {
            Error::unexpected_type(format!("{what} expects a number, got {}", item.dynamic_type()), location)
        }),
        _ => Err(Error::unexpected_type(format!("{what} expects exactly one number, got {} item(s)", seq.len()), location)),
    }
}

pub(super) fn substring_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let source = optional_string(&args[0], "substring", ctx.location)?.unwrap_or_default();
    let start = round_half_up(numeric_argument(&args[1], "substring start", ctx.location)?);
    let end = match args.get(2) {
        Some(length) => start + round_half_up(numeric_argument(length, "substring length", ctx.location)?),
        None => f64::INFINITY,
    };
    if start.is_nan() || end.is_nan() {
        return Ok(vec![Item::string("")]);
    }
    #[allow(clippy::cast_precision_loss)]
    let out: String = source
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let position = (*i + 1) as f64;
            position >= start && position < end
        })
        .map(|(_, c)| c)
        .collect();
    Ok(vec![Item::string(out)])
}

pub(super) fn translate_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let Some(source) = optional_string(&args[0], "translate", ctx.location)? else {
        return Ok(vec![Item::string("")]);
    };
    let map: Vec<char> = optional_string(&args[1], "translate", ctx.location)?.unwrap_or_default().chars().collect();
    let replacements: Vec<char> =
        optional_string(&args[2], "translate", ctx.location)?.unwrap_or_default().chars().collect();
    let out: String = source
        .chars()
        .filter_map(|c| match map.iter().position(|m| *m == c) {
            // the first occurrence in the map wins; no replacement deletes the character
            Some(index) => replacements.get(index).copied(),
            None => Some(c),
        })
        .collect();
    Ok(vec![Item::string(out)])
}

pub(super) fn string_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    match args[0].as_slice() {
        [] => Ok(vec![Item::string("")]),
        [item] => Ok(vec![Item::string(item.string_value().map_err(|e| e.at(ctx.location))?)]),
        more => Err(Error::unexpected_type(format!("string expects at most one item, got {}", more.len()), ctx.location)),
    }
}

pub(super) fn string_length_fn(ctx: &CallCtx, args: &[Sequence]) -> Result<Sequence> {
    let length = optional_string(&args[0], "string-length", ctx.location)?.map_or(0, |s| s.chars().count());
    Ok(vec![Item::Integer(i64::try_from(length).unwrap_or(i64::MAX))])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::config::RuntimeConfiguration;
    use crate::engine::runtime::{FunctionRegistry, Runtime};
    use crate::io::MemoryFileReader;

    fn runtime() -> Runtime {
        Runtime::new(
            Arc::new(RuntimeConfiguration::new()),
            Arc::new(FunctionRegistry::new()),
            Arc::new(MemoryFileReader::new()),
        )
        .unwrap()
    }

    fn call(f: crate::functions::EagerFn, args: &[Sequence]) -> Result<Sequence> {
        let rt = runtime();
        f(&CallCtx { runtime: &rt, location: SourceLocation::unknown() }, args)
    }

    fn s(value: &str) -> Sequence {
        vec![Item::string(value)]
    }

    fn n(value: f64) -> Sequence {
        vec![Item::Double(value)]
    }

    #[rstest]
    #[case(s("motor car"), n(6.0), None, " car")]
    #[case(s("metadata"), n(4.0), Some(n(3.0)), "ada")]
    #[case(s("12345"), n(1.5), Some(n(2.6)), "234")]
    #[case(s("12345"), n(0.0), Some(n(3.0)), "12")]
    #[case(s("12345"), n(5.0), Some(n(-3.0)), "")]
    #[case(s("12345"), n(-3.0), Some(n(5.0)), "1")]
    #[case(s("12345"), n(f64::NAN), Some(n(3.0)), "")]
    #[case(s("12345"), n(10.0), None, "")]
    #[case(vec![], n(1.0), None, "")]
    fn substring_positions(#[case] source: Sequence, #[case] start: Sequence, #[case] length: Option<Sequence>, #[case] expected: &str) {
        let mut args = vec![source, start];
        args.extend(length);
        assert_eq!(call(substring_fn, &args).unwrap(), s(expected));
    }

    #[test]
    fn substring_requires_a_start() {
        assert!(call(substring_fn, &[s("abc"), vec![]]).is_err());
    }

    #[rstest]
    #[case("bar", "abc", "ABC", "BAr")]
    #[case("--aaa--", "abc-", "ABC", "AAA")]
    #[case("abcdabc", "abca", "AB", "ABdAB")]
    fn translate_maps_and_deletes(#[case] source: &str, #[case] map: &str, #[case] with: &str, #[case] expected: &str) {
        assert_eq!(call(translate_fn, &[s(source), s(map), s(with)]).unwrap(), s(expected));
    }

    #[test]
    fn concat_skips_empty_arguments() {
        assert_eq!(call(concat_fn, &[]).unwrap(), s(""));
        assert_eq!(call(concat_fn, &[s("a"), vec![], s("b")]).unwrap(), s("ab"));
        assert_eq!(call(concat_fn, &[vec![Item::Integer(1)], vec![Item::Boolean(true)]]).unwrap(), s("1true"));
        assert!(call(concat_fn, &[vec![Item::Integer(1), Item::Integer(2)]]).is_err());
    }
}

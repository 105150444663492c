use std::sync::Arc;

use jsoniq_engine::engine::iterator::materialize;
use jsoniq_engine::{
    BoxedIterator, ErrorCode, Item, MemoryFileReader, Runtime, RuntimeConfiguration, build_iterator, compile_query,
};
use rstest::rstest;

fn prepare(text: &str) -> (BoxedIterator, Runtime) {
    let query = compile_query(text).unwrap();
    let body = query.module.body.as_ref().unwrap();
    let iter = build_iterator(body, &query.functions).unwrap();
    let rt = Runtime::new(
        Arc::new(RuntimeConfiguration::new()),
        Arc::clone(&query.functions),
        Arc::new(MemoryFileReader::new()),
    )
    .unwrap();
    (iter, rt)
}

fn drain(iter: &mut BoxedIterator, rt: &mut Runtime) -> Vec<Item> {
    let mut items = Vec::new();
    while iter.has_next() {
        items.push(iter.next(rt).unwrap());
    }
    items
}

const QUERIES: [&str; 5] = [
    "1 to 5",
    "for $x in (3, 1, 2) order by $x return $x * 2",
    r#"for $x in 1 to 6 group by $k := $x mod 3 return {"k": $k, "n": count($x)}"#,
    "let $f := function($x) { $x + 1 } return $f(1)",
    "for $x in parallelize(1 to 4) return $x",
];

#[rstest]
fn open_close_twice_yields_the_same_items(#[values(0, 1, 2, 3, 4)] index: usize) {
    let (mut iter, mut rt) = prepare(QUERIES[index]);
    let ctx = rt.globals();
    let first = materialize(iter.as_mut(), &mut rt, ctx).unwrap();
    let second = materialize(iter.as_mut(), &mut rt, ctx).unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert!(!iter.is_open());
}

#[rstest]
fn reset_matches_a_fresh_open(#[values(0, 1, 2, 3, 4)] index: usize) {
    let (mut iter, mut rt) = prepare(QUERIES[index]);
    let ctx = rt.globals();
    iter.open(&mut rt, ctx).unwrap();
    let fresh = drain(&mut iter, &mut rt);

    iter.reset(&mut rt, ctx).unwrap();
    let _ = iter.next(&mut rt).unwrap();
    iter.reset(&mut rt, ctx).unwrap();
    assert_eq!(drain(&mut iter, &mut rt), fresh);
    iter.close(&mut rt);
}

#[rstest]
fn opening_twice_is_an_internal_error() {
    let (mut iter, mut rt) = prepare("for $x in 1 to 3 return $x");
    let ctx = rt.globals();
    iter.open(&mut rt, ctx).unwrap();
    let err = iter.open(&mut rt, ctx).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::JNRT0003);
    iter.close(&mut rt);
}

#[rstest]
#[case("(1, 2)")]
#[case("for $x in (1, 2) return $x")]
fn next_past_the_end_is_a_flow_error(#[case] text: &str) {
    let (mut iter, mut rt) = prepare(text);
    let ctx = rt.globals();
    iter.open(&mut rt, ctx).unwrap();
    drain(&mut iter, &mut rt);
    let err = iter.next(&mut rt).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::JNRT0001);
    assert!(err.location.is_some());
    iter.close(&mut rt);
}

#[rstest]
fn close_is_idempotent() {
    let (mut iter, mut rt) = prepare("for $x in 1 to 3 return $x");
    iter.close(&mut rt);
    let ctx = rt.globals();
    iter.open(&mut rt, ctx).unwrap();
    assert!(iter.is_open());
    iter.close(&mut rt);
    iter.close(&mut rt);
    assert!(!iter.is_open());
}

#[rstest]
fn distributed_plans_produce_collections() {
    let (mut iter, mut rt) = prepare("for $x in parallelize(1 to 8) where $x gt 2 return $x");
    assert!(iter.execution_mode().is_distributed());
    let ctx = rt.globals();
    let collection = iter.get_collection(&mut rt, ctx).unwrap();
    assert_eq!(collection.count(), 6);
}

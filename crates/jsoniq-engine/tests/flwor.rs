use std::sync::Arc;

use jsoniq_engine::{
    ErrorCode, Item, MemoryFileReader, RuntimeConfiguration, compile_query, evaluate_compiled, evaluate_expr,
};
use rstest::rstest;

fn ints(values: &[i64]) -> Vec<Item> {
    values.iter().copied().map(Item::Integer).collect()
}

fn strings(values: &[&str]) -> Vec<Item> {
    values.iter().copied().map(Item::string).collect()
}

fn json_lines(text: &str) -> Vec<String> {
    evaluate_expr(text).unwrap().iter().map(|item| item.to_json_string().unwrap()).collect()
}

fn sorted_ints(text: &str) -> Vec<i64> {
    let mut values: Vec<i64> = evaluate_expr(text)
        .unwrap()
        .into_iter()
        .map(|item| match item {
            Item::Integer(i) => i,
            other => panic!("expected an integer, got {other:?}"),
        })
        .collect();
    values.sort_unstable();
    values
}

#[rstest]
fn unboxed_array_is_filtered_and_doubled() {
    assert_eq!(evaluate_expr("for $x in [1, 2, 3][] where $x > 1 return $x * 2").unwrap(), ints(&[4, 6]));
}

#[rstest]
fn nested_for_clauses_iterate_in_order() {
    let query = "for $a in (1, 2) for $b in (1, 2) return $a * 10 + $b";
    assert_eq!(evaluate_expr(query).unwrap(), ints(&[11, 12, 21, 22]));
}

#[rstest]
fn allowing_empty_keeps_one_tuple() {
    let query = r#"for $x allowing empty at $i in () return {"x": $x, "i": $i}"#;
    assert_eq!(json_lines(query), vec![r#"{"x":null,"i":0}"#.to_string()]);
    let query = "for $x allowing empty at $i in () return ($i, count($x))";
    assert_eq!(evaluate_expr(query).unwrap(), ints(&[0, 0]));
}

#[rstest]
fn positional_variables_start_at_one() {
    let query = r#"for $x at $i in ("a", "b", "c") return $i"#;
    assert_eq!(evaluate_expr(query).unwrap(), ints(&[1, 2, 3]));
}

#[rstest]
#[case("for $x in (1, 2, 3) return ($x, $x)", 6)]
#[case("for $x in (1, 2) for $y in (1, 2, 3) return $y", 6)]
#[case("for $x in (1, 2, 3) where $x ne 2 return $x", 2)]
#[case("for $x in () return $x", 0)]
#[case("let $x := (1, 2, 3) return $x", 3)]
fn flwor_cardinality(#[case] query: &str, #[case] expected: usize) {
    assert_eq!(evaluate_expr(query).unwrap().len(), expected);
}

#[rstest]
fn let_shadows_earlier_bindings() {
    let query = "let $x := 1 let $y := $x + 1 let $x := $y * 10 return ($x, $y)";
    assert_eq!(evaluate_expr(query).unwrap(), ints(&[20, 2]));
}

#[rstest]
fn group_by_keeps_first_encountered_order() {
    let query = r#"for $x in 1 to 6
                   group by $k := $x mod 2
                   return {"k": $k, "values": [$x]}"#;
    assert_eq!(json_lines(query), vec![r#"{"k":1,"values":[1,3,5]}"#, r#"{"k":0,"values":[2,4,6]}"#]);
}

#[rstest]
fn group_by_existing_variable() {
    let query = r#"for $p in ({"c": "x", "v": 1}, {"c": "y", "v": 2}, {"c": "x", "v": 3})
                   let $c := $p.c
                   group by $c
                   return {"c": $c, "total": sum($p.v)}"#;
    assert_eq!(json_lines(query), vec![r#"{"c":"x","total":4}"#, r#"{"c":"y","total":2}"#]);
}

#[rstest]
#[case("ascending", &[1, 2, 3])]
#[case("descending", &[3, 2, 1])]
fn order_by_direction(#[case] direction: &str, #[case] expected: &[i64]) {
    let query = format!("for $x in (3, 1, 2) order by $x {direction} return $x");
    assert_eq!(evaluate_expr(&query).unwrap(), ints(expected));
}

#[rstest]
#[case("", &["q", "r", "p"])]
#[case("empty least", &["q", "r", "p"])]
#[case("empty greatest", &["r", "p", "q"])]
fn order_by_places_empty_keys(#[case] empty: &str, #[case] expected: &[&str]) {
    let query = format!(
        r#"for $x in ({{"id": "p", "a": 2}}, {{"id": "q"}}, {{"id": "r", "a": 1}})
           order by $x.a {empty}
           return $x.id"#
    );
    assert_eq!(evaluate_expr(&query).unwrap(), strings(expected));
}

#[rstest]
fn order_by_is_stable() {
    let query = r#"for $x in ({"k": 1, "id": "a"}, {"k": 0, "id": "b"}, {"k": 1, "id": "c"}, {"k": 0, "id": "d"})
                   order by $x.k
                   return $x.id"#;
    assert_eq!(evaluate_expr(query).unwrap(), strings(&["b", "d", "a", "c"]));
}

#[rstest]
fn order_by_incomparable_keys_fail() {
    let err = evaluate_expr(r#"for $x in (1, "a") order by $x return $x"#).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[rstest]
fn count_clause_numbers_tuples() {
    let query = r#"for $x in ("a", "b", "c") where $x ne "b" count $c return $c"#;
    assert_eq!(evaluate_expr(query).unwrap(), ints(&[1, 2]));
}

#[rstest]
fn distributed_for_over_parallelized_input() {
    assert_eq!(sorted_ints("for $x in parallelize(1 to 5) where $x mod 2 eq 1 return $x"), vec![1, 3, 5]);
}

#[rstest]
fn distributed_cartesian_product() {
    let query = "for $x in parallelize(1 to 3) for $y in parallelize(2 to 4) where $x eq $y return $x";
    assert_eq!(sorted_ints(query), vec![2, 3]);
}

#[rstest]
fn distributed_join_on_equality() {
    let query = r#"declare variable $orders := parallelize(({"c": 1, "n": 10}, {"c": 2, "n": 20}, {"c": 1, "n": 30}));
                   for $c in parallelize(({"id": 1}, {"id": 2}, {"id": 3}))
                   for $o in $orders[$$.c eq $c.id]
                   return $o.n"#;
    assert_eq!(sorted_ints(query), vec![10, 20, 30]);
}

#[rstest]
fn distributed_explode_of_local_sequence() {
    let query = "for $x in parallelize((1, 2)) for $y in 1 to $x return $y";
    assert_eq!(sorted_ints(query), vec![1, 1, 2]);
}

#[rstest]
fn distributed_group_and_order() {
    let query = r#"for $x in parallelize(1 to 10)
                   group by $k := $x mod 3
                   order by $k descending
                   return count($x)"#;
    assert_eq!(evaluate_expr(query).unwrap(), ints(&[3, 4, 3]));
}

#[rstest]
fn nested_distributed_iteration_is_rejected() {
    let query = "for $x in parallelize(1 to 3) for $y at $i in parallelize(1 to $x) return $y";
    let err = evaluate_expr(query).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::JNRT0002);
}

#[rstest]
fn json_lines_feed_a_flwor() {
    let reader = MemoryFileReader::new().with_file(
        "file:///data/people.json",
        "{\"name\": \"ann\", \"age\": 31}\n\n{\"name\": \"bob\", \"age\": 17}\n{\"name\": \"cid\", \"age\": 45}\n",
    );
    let query = compile_query(
        r#"for $p in json-lines("file:///data/people.json")
           where $p.age ge 18
           order by $p.name
           return $p.name"#,
    )
    .unwrap();
    let config = Arc::new(RuntimeConfiguration::builder().result_size_cap(0).build());
    let result = evaluate_compiled(&query, config, Arc::new(reader)).unwrap();
    assert_eq!(result.items, strings(&["ann", "cid"]));
}

#[rstest]
fn missing_input_is_a_resource_error() {
    let query = compile_query(r#"count(json-lines("file:///data/none.json"))"#).unwrap();
    let config = Arc::new(RuntimeConfiguration::new());
    let err = evaluate_compiled(&query, config, Arc::new(MemoryFileReader::new())).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::FODC0002);
    assert!(err.location.is_some());
}

#[rstest]
fn json_doc_reads_local_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    std::fs::write(&path, r#"{"items": [1, 2, 3]}"#).unwrap();
    let query = format!(r#"for $i in json-doc("{}").items[] return $i * $i"#, path.display());
    assert_eq!(evaluate_expr(&query).unwrap(), ints(&[1, 4, 9]));
}

#[rstest]
fn constructed_objects_render_in_member_order() {
    assert_eq!(json_lines(r#"{"b": 1, "a": 2}"#), vec![r#"{"b":1,"a":2}"#.to_string()]);
    assert_eq!(evaluate_expr(r#"keys({"b": 1, "a": 2})"#).unwrap(), strings(&["b", "a"]));
}

#[rstest]
fn documents_keep_their_member_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    std::fs::write(&path, r#"{"z": 1, "a": 2}"#).unwrap();
    let query = format!(r#"keys(json-doc("{}"))"#, path.display());
    assert_eq!(evaluate_expr(&query).unwrap(), strings(&["z", "a"]));
    let query = format!(r#"json-doc("{}")"#, path.display());
    assert_eq!(json_lines(&query), vec![r#"{"z":1,"a":2}"#.to_string()]);
}

use std::sync::Arc;

use jsoniq_engine::ast::{ExprKind, Literal};
use jsoniq_engine::{ErrorCode, FunctionItem, Item, Name, evaluate_expr};
use rstest::rstest;

fn single(text: &str) -> Item {
    let mut items = evaluate_expr(text).unwrap();
    assert_eq!(items.len(), 1, "{text} produced {items:?}");
    items.remove(0)
}

#[rstest]
#[case("concat()", "")]
#[case(r#"concat("a", (), "b")"#, "ab")]
#[case(r#"concat("n", 1, true)"#, "n1true")]
#[case(r#"translate("bar", "abc", "ABC")"#, "BAr")]
#[case(r#"translate("--aaa--", "abc-", "ABC")"#, "AAA")]
#[case(r#"substring("motor car", 6)"#, " car")]
#[case(r#"substring("metadata", 4, 3)"#, "ada")]
#[case(r#"substring((), 1)"#, "")]
#[case(r#""a" || 1 || "b""#, "a1b")]
#[case("string(12)", "12")]
fn string_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(single(query), Item::string(expected));
}

#[rstest]
#[case("exists(())", false)]
#[case("exists((1, 2))", true)]
#[case("exists(parallelize(()))", false)]
#[case("exists(parallelize(1 to 1000))", true)]
#[case("empty([])", false)]
#[case("not(0)", true)]
#[case("boolean(\"\")", false)]
fn sequence_predicates(#[case] query: &str, #[case] expected: bool) {
    assert_eq!(single(query), Item::Boolean(expected));
}

#[rstest]
#[case(r#"number("12")"#, 12.0)]
#[case("number(true)", 1.0)]
#[case("sum((1.5, 2.5))", 4.0)]
#[case("avg((1, 2, 3, 4))", 2.5)]
fn numeric_functions(#[case] query: &str, #[case] expected: f64) {
    let value = single(query).as_f64().unwrap();
    assert!((value - expected).abs() < 1e-9, "{query} = {value}");
}

#[rstest]
#[case(r#"number("abc")"#)]
#[case("number(())")]
fn unparsable_numbers_are_nan(#[case] query: &str) {
    assert!(single(query).as_f64().unwrap().is_nan());
}

#[rstest]
#[case("count(1 to 10)", 10)]
#[case("count(parallelize(1 to 10))", 10)]
#[case("size([1, 2, 3])", 3)]
#[case("max((3, 9, 2))", 9)]
#[case("min((3, 9, 2))", 2)]
#[case("string-length(\"héllo\")", 5)]
#[case("count(keys({\"a\": 1, \"b\": 2}))", 2)]
#[case("count(flatten([1, [2, [3]]]))", 3)]
fn counting_functions(#[case] query: &str, #[case] expected: i64) {
    assert_eq!(single(query), Item::Integer(expected));
}

#[rstest]
fn inline_functions_capture_their_environment() {
    let query = "let $a := 10 let $f := function($x) { $x + $a } let $a := 20 return $f(5)";
    assert_eq!(single(query), Item::Integer(15));
}

#[rstest]
fn closures_outlive_their_flwor() {
    let query = "let $adders := for $n in (1, 2, 3) return function($x) { $x + $n }
                 return for $f in $adders return $f(10)";
    assert_eq!(evaluate_expr(query).unwrap(), vec![Item::Integer(11), Item::Integer(12), Item::Integer(13)]);
}

#[rstest]
fn named_references_and_partial_application() {
    let query = "declare function local:add($a, $b) { $a + $b };
                 let $g := local:add#2
                 let $inc := local:add(?, 1)
                 return ($g(1, 2), $inc(41))";
    assert_eq!(evaluate_expr(query).unwrap(), vec![Item::Integer(3), Item::Integer(42)]);
}

#[rstest]
fn builtins_can_be_referenced() {
    assert_eq!(single(r#"let $f := concat#3 return $f("a", "b", "c")"#), Item::string("abc"));
}

#[rstest]
fn recursive_functions() {
    let query = "declare function local:fact($n) { if ($n le 1) then 1 else $n * local:fact($n - 1) };
                 local:fact(10)";
    assert_eq!(single(query), Item::Integer(3_628_800));
}

#[rstest]
fn mutually_recursive_functions_declared_out_of_order() {
    let query = "declare function local:even($n) { if ($n eq 0) then true else local:odd($n - 1) };
                 declare function local:odd($n) { if ($n eq 0) then false else local:even($n - 1) };
                 (local:even(10), local:odd(7))";
    assert_eq!(evaluate_expr(query).unwrap(), vec![Item::Boolean(true), Item::Boolean(true)]);
}

#[rstest]
fn functions_returning_distributed_sequences() {
    let query = "declare function local:numbers($n) { parallelize(1 to $n) };
                 count(for $x in local:numbers(6) where $x gt 3 return $x)";
    assert_eq!(single(query), Item::Integer(3));
}

#[rstest]
#[case("let $f := 1 return $f(2)", ErrorCode::XPTY0004)]
#[case("let $f := function($x) { $x } return $f(1, 2)", ErrorCode::XPTY0004)]
#[case("let $f := (function($x) { $x }, function($x) { $x }) return $f(1)", ErrorCode::XPTY0004)]
fn dynamic_calls_need_exactly_one_matching_function(#[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(evaluate_expr(query).unwrap_err().code_enum(), code);
}

#[rstest]
#[case("1 div 0", ErrorCode::FOAR0001)]
#[case("1 idiv 0", ErrorCode::FOAR0001)]
#[case("9223372036854775807 + 1", ErrorCode::FOAR0002)]
#[case(r#""a" + 1"#, ErrorCode::XPTY0004)]
#[case("if ((1, 2)) then 1 else 2", ErrorCode::FORG0006)]
#[case(r#"{"a": 1, "a": 2}"#, ErrorCode::JNDY0003)]
fn runtime_errors_carry_codes_and_locations(#[case] query: &str, #[case] code: ErrorCode) {
    let err = evaluate_expr(query).unwrap_err();
    assert_eq!(err.code_enum(), code);
    assert!(err.location.is_some(), "{err}");
}

#[rstest]
#[case("some $x in (1, 2, 3) satisfies $x gt 2", true)]
#[case("every $x in (1, 2, 3) satisfies $x gt 2", false)]
#[case("every $x in () satisfies false", true)]
#[case(r#"(1, 2) = (2, 3)"#, true)]
#[case(r#"1 instance of integer"#, true)]
#[case(r#""a" instance of integer"#, false)]
fn boolean_expressions(#[case] query: &str, #[case] expected: bool) {
    assert_eq!(single(query), Item::Boolean(expected));
}

#[rstest]
#[case(r#"switch (2) case 1 return "one" case 2 case 3 return "few" default return "many""#, "few")]
#[case(r#"typeswitch (1) case string return "s" case $i as integer return string($i) default return "d""#, "1")]
#[case(r#"typeswitch ({}) case string return "s" default $d return string(count(keys($d)))"#, "0")]
#[case(r#"if (()) then "t" else "e""#, "e")]
fn conditional_expressions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(single(query), Item::string(expected));
}

#[rstest]
#[case("[1, 2, 3][[2]]", Item::Integer(2))]
#[case(r#"{"a": {"b": 7}}.a.b"#, Item::Integer(7))]
#[case(r#"let $k := "b" return {"b": 8}.$k"#, Item::Integer(8))]
#[case("(10, 20, 30)[2]", Item::Integer(20))]
#[case("count((1 to 10)[$$ mod 2 eq 0])", Item::Integer(5))]
fn navigation(#[case] query: &str, #[case] expected: Item) {
    assert_eq!(single(query), expected);
}

#[rstest]
#[case("(1, 2, 3) ! ($$ * 10)", vec![Item::Integer(10), Item::Integer(20), Item::Integer(30)])]
#[case("(1, 2) ! ($$, $$)", vec![Item::Integer(1), Item::Integer(1), Item::Integer(2), Item::Integer(2)])]
#[case("() ! 1", vec![])]
#[case(r#"({"a": 1}, {"a": 2}, 3) ! $$.a"#, vec![Item::Integer(1), Item::Integer(2)])]
#[case("(1, 2) ! ($$ + 1) ! ($$ * 2)", vec![Item::Integer(4), Item::Integer(6)])]
fn simple_map_evaluates_once_per_item(#[case] query: &str, #[case] expected: Vec<Item>) {
    assert_eq!(evaluate_expr(query).unwrap(), expected);
}

#[rstest]
fn distributed_simple_map_keeps_item_order() {
    let query = "parallelize(1 to 6, 3) ! ($$ * $$)";
    let expected: Vec<Item> = [1, 4, 9, 16, 25, 36].into_iter().map(Item::Integer).collect();
    assert_eq!(evaluate_expr(query).unwrap(), expected);
    assert_eq!(single("count(parallelize(1 to 6, 3) ! ($$, $$))"), Item::Integer(12));
}

#[rstest]
#[case(r#"remove-keys({"a": 1, "b": 2, "c": 3}, ("a", "c"))"#, vec![r#"{"b":2}"#])]
#[case(r#"remove-keys(({"a": 1}, 2, {"b": 2, "a": 3}), "a")"#, vec!["{}", r#"{"b":2}"#])]
#[case(r#"remove-keys({"a": 1}, ())"#, vec![r#"{"a":1}"#])]
#[case(r#"remove-keys(parallelize(({"k": 1, "v": 2}, {"k": 3}), 2), "k")"#, vec![r#"{"v":2}"#, "{}"])]
fn remove_keys_drops_members(#[case] query: &str, #[case] expected: Vec<&str>) {
    let rendered: Vec<String> = evaluate_expr(query).unwrap().iter().map(|item| item.to_json_string().unwrap()).collect();
    assert_eq!(rendered, expected);
}

#[rstest]
fn remove_keys_requires_string_keys() {
    let err = evaluate_expr(r#"remove-keys({"a": 1}, 1)"#).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

fn function_item(text: &str) -> Arc<FunctionItem> {
    match single(text) {
        Item::Function(function) => function,
        other => panic!("{text} produced {other:?}"),
    }
}

fn reserialized(function: &FunctionItem) -> FunctionItem {
    let json = serde_json::to_string(function).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[rstest]
fn function_items_serialize_with_their_closure() {
    let f = function_item("let $n := 1 return function() { $n }");
    let back = reserialized(&f);
    assert_eq!(back.identifier(), f.identifier());
    assert_eq!(back.params(), f.params());
    assert_eq!(back.closure().locals.get(&Name::local("n")), Some(&vec![Item::Integer(1)]));
    assert_eq!(
        serde_json::to_value(back.body().as_ref()).unwrap(),
        serde_json::to_value(f.body().as_ref()).unwrap()
    );
}

#[rstest]
fn non_finite_doubles_survive_function_serialization() {
    let f = function_item("let $nan := 1e999 - 1e999 return function() { ($nan, 1e999) }");
    let back = reserialized(&f);
    match back.closure().locals.get(&Name::local("nan")).map(Vec::as_slice) {
        Some([Item::Double(value)]) => assert!(value.is_nan()),
        other => panic!("unexpected closure value {other:?}"),
    }
    let ExprKind::Sequence(members) = &back.body().kind else { panic!("unexpected body {:?}", back.body()) };
    assert!(matches!(members[1].kind, ExprKind::Literal(Literal::Double(value)) if value == f64::INFINITY));
}

#[rstest]
fn nested_calls_to_one_function_item_do_not_share_state() {
    let query = "let $f := function($n) { for $i in 1 to $n return $i }
                 return for $a in $f(2) return count($f($a + 1))";
    assert_eq!(evaluate_expr(query).unwrap(), vec![Item::Integer(2), Item::Integer(3)]);
}

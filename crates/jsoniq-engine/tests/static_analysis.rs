use jsoniq_engine::compiler::{FunctionCatalogue, StaticContextVisitor, StaticContexts};
use jsoniq_engine::{
    ErrorCode, ExecutionMode, ExprKind, LibraryModules, compile_query, compile_query_with, evaluate_expr, explain,
    parse_module,
};
use rstest::rstest;

#[rstest]
fn undeclared_variables_fail_before_evaluation() {
    let err = compile_query("for $x in (1, 2)\nreturn $y").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    let location = err.location.expect("location");
    assert_eq!((location.line, location.column), (2, 8));
}

#[rstest]
#[case("let $x := $x return $x")]
#[case("(for $x in 1 to 3 return $x, $x)")]
#[case("(some $q in (1, 2) satisfies $q eq 1, $q)")]
#[case("declare function local:f() { $outer }; let $outer := 1 return local:f()")]
#[case("for $x in 1 to 3 group by $k return $k")]
#[case("$$")]
fn variables_out_of_scope(#[case] query: &str) {
    assert_eq!(compile_query(query).unwrap_err().code_enum(), ErrorCode::XPST0008);
}

#[rstest]
#[case("declare variable $a := 1; declare variable $a := 2; $a", ErrorCode::XQST0049)]
#[case("declare function local:f() { 1 }; declare function local:f() { 2 }; local:f()", ErrorCode::XQST0034)]
#[case("local:missing(1)", ErrorCode::XPST0017)]
#[case(r#"substring("abc")"#, ErrorCode::XPST0017)]
#[case("unknown#1", ErrorCode::XPST0017)]
#[case("for $x in", ErrorCode::XPST0003)]
#[case("1 +", ErrorCode::XPST0003)]
fn static_errors(#[case] query: &str, #[case] code: ErrorCode) {
    let err = compile_query(query).unwrap_err();
    assert_eq!(err.code_enum(), code, "{err}");
    assert!(err.location.is_some() || code == ErrorCode::XQST0034, "{err}");
}

#[rstest]
fn static_errors_are_reported_by_evaluation_entry_points() {
    assert_eq!(evaluate_expr("$nope").unwrap_err().code_enum(), ErrorCode::XPST0008);
}

#[rstest]
#[case("for $x in 1 to 3 return $x")]
#[case("for $x in parallelize(1 to 3) let $y := $x * 2 where $y gt 2 order by $y return $y")]
#[case("declare function local:g($s) { for $i in $s return $i }; local:g(parallelize(1 to 4))")]
#[case("declare variable $v := parallelize(1 to 3); count($v)")]
fn resolution_is_idempotent(#[case] query: &str) {
    let analyze = |module: &mut jsoniq_engine::Module| {
        let mut contexts = StaticContexts::new();
        let mut catalogue = FunctionCatalogue::new();
        StaticContextVisitor::analyze(&mut contexts, &mut catalogue, module, &mut []).unwrap();
    };
    let mut module = parse_module(query).unwrap();
    analyze(&mut module);
    let once = module.clone();
    analyze(&mut module);
    assert_eq!(module, once);
}

#[rstest]
#[case("1 to 3", ExecutionMode::Local)]
#[case("parallelize(1 to 3)", ExecutionMode::Rdd)]
#[case("for $x in parallelize(1 to 3) return $x", ExecutionMode::Rdd)]
#[case("for $x in 1 to 3 return $x", ExecutionMode::Local)]
#[case("parallelize(1 to 3)[$$ gt 1]", ExecutionMode::Rdd)]
#[case("parallelize(1 to 3) ! ($$ * 2)", ExecutionMode::Rdd)]
#[case("(1 to 3) ! ($$ * 2)", ExecutionMode::Local)]
#[case(r#"remove-keys(parallelize(({"a": 1}, {"b": 2})), "a")"#, ExecutionMode::Rdd)]
#[case(r#"remove-keys({"a": 1}, "a")"#, ExecutionMode::Local)]
#[case("count(parallelize(1 to 3))", ExecutionMode::Local)]
#[case("structured-json-lines(\"file:///x.json\")", ExecutionMode::DataFrame)]
fn body_modes(#[case] query: &str, #[case] expected: ExecutionMode) {
    let compiled = compile_query(query).unwrap();
    assert_eq!(compiled.module.body.as_ref().unwrap().mode, expected);
}

#[rstest]
fn every_expression_has_a_resolved_mode() {
    let compiled = compile_query(
        "declare function local:f($x) { $x + 1 };
         for $a in (1, 2) let $b := local:f($a) where $b gt 1 return [$a, $b]",
    )
    .unwrap();
    let mut pending = vec![compiled.module.body.as_ref().unwrap()];
    while let Some(expr) = pending.pop() {
        assert_ne!(expr.mode, ExecutionMode::Unset, "{}", expr.describe());
        if let ExprKind::Flwor(flwor) = &expr.kind {
            for clause in &flwor.clauses {
                assert_ne!(clause.mode, ExecutionMode::Unset, "{}", clause.describe());
                pending.extend(clause.expressions());
            }
            pending.push(&flwor.return_expr);
        }
        pending.extend(expr.children());
    }
}

#[rstest]
fn library_functions_and_variables_are_visible() {
    let mut libraries = LibraryModules::new();
    libraries
        .add_source(
            r#"module namespace geo = "http://example.com/geo";
               declare variable $geo:origin := {"x": 0, "y": 0};
               declare function geo:shift($p, $dx) { {"x": $p.x + $dx, "y": $p.y} };"#,
        )
        .unwrap();
    let query = compile_query_with(
        r#"import module namespace g = "http://example.com/geo";
           g:shift($g:origin, 3).x"#,
        &libraries,
    )
    .unwrap();
    assert_eq!(query.global_variables().count(), 1);
    let result = jsoniq_engine::evaluate_compiled(
        &query,
        std::sync::Arc::new(jsoniq_engine::RuntimeConfiguration::new()),
        std::sync::Arc::new(jsoniq_engine::MemoryFileReader::new()),
    )
    .unwrap();
    assert_eq!(result.items, vec![jsoniq_engine::Item::Integer(3)]);
}

#[rstest]
fn missing_library_is_a_resource_error() {
    let err = compile_query(r#"import module namespace m = "urn:nowhere"; 1"#).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::FODC0002);
}

#[rstest]
fn explain_reports_the_plan() {
    let query = compile_query("for $x in parallelize(1 to 3) where $x gt 1 return $x").unwrap();
    let plan = explain(&query);
    assert!(plan.lines().count() > 3, "{plan}");
    assert!(plan.contains("where clause [DATAFRAME]"), "{plan}");
}

use clap::Parser;
use jsoniq_cli::{Cli, OutputFormat, execute, render, write_output};
use jsoniq_engine::ErrorCode;
use rstest::rstest;

fn cli(args: &[&str]) -> Cli {
    let mut full = vec!["jsoniq"];
    full.extend_from_slice(args);
    Cli::try_parse_from(full).expect("arguments parse")
}

#[rstest]
#[case(OutputFormat::Lines, "1\n\"a\"\n{\"k\":[true,null]}\n")]
fn items_render_as_json_lines(#[case] format: OutputFormat, #[case] expected: &str) {
    let result = execute(&cli(&[r#"(1, "a", {"k": [true, null]})"#])).unwrap();
    assert_eq!(render(&result, format).unwrap(), expected);
}

#[rstest]
fn json_format_wraps_items_in_one_array() {
    let result = execute(&cli(&["--format", "json", "(1, 2)"])).unwrap();
    let rendered = render(&result, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value, serde_json::json!([1, 2]));
}

#[rstest]
fn result_size_caps_the_output() {
    let result = execute(&cli(&["--result-size", "2", "1 to 10"])).unwrap();
    assert_eq!(result.items.len(), 2);
    assert!(result.truncated);
}

#[rstest]
fn query_is_read_from_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("query.jq");
    std::fs::write(&path, "for $x in 1 to 3 return $x * $x").unwrap();
    let result = execute(&cli(&["--query-path", path.to_str().unwrap()])).unwrap();
    assert_eq!(render(&result, OutputFormat::Lines).unwrap(), "1\n4\n9\n");
}

#[rstest]
fn external_variables_come_from_arguments() {
    let result = execute(&cli(&[
        "--variable",
        "n=4",
        "declare variable $n as integer external; $n + 1",
    ]))
    .unwrap();
    assert_eq!(render(&result, OutputFormat::Lines).unwrap(), "5\n");
}

#[rstest]
fn library_modules_are_imported() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("math.jq");
    std::fs::write(
        &library,
        r#"module namespace m = "http://example.com/math";
           declare function m:square($x) { $x * $x };"#,
    )
    .unwrap();
    let query = r#"import module namespace m = "http://example.com/math"; m:square(7)"#;
    let result = execute(&cli(&["--library", library.to_str().unwrap(), query])).unwrap();
    assert_eq!(render(&result, OutputFormat::Lines).unwrap(), "49\n");
}

#[rstest]
fn static_errors_keep_their_code() {
    let error = execute(&cli(&["$undeclared"])).unwrap_err();
    let engine_error = error.downcast_ref::<jsoniq_engine::Error>().expect("engine error");
    assert_eq!(engine_error.code_enum(), ErrorCode::XPST0008);
}

#[rstest]
fn existing_output_needs_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    std::fs::write(&path, "old").unwrap();
    assert!(write_output("new\n", Some(&path), false).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
    write_output("new\n", Some(&path), true).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
}

#[rstest]
fn function_items_cannot_be_serialized() {
    let result = execute(&cli(&["function($x) { $x }"])).unwrap();
    assert!(render(&result, OutputFormat::Lines).is_err());
}

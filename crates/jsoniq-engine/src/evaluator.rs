//! Query execution entry points.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::ast::{Clause, Expr, ExprKind, VariableDecl};
use crate::compiler::{CompiledQuery, LibraryModules, compile};
use crate::config::RuntimeConfiguration;
use crate::engine::builder::build_iterator;
use crate::engine::iterator::{RuntimeIterator, materialize};
use crate::engine::runtime::{FunctionRegistry, Runtime};
use crate::error::{Error, ErrorCode, Result};
use crate::io::{FileReader, LocalFileReader};
use crate::item::Item;
use crate::types::ItemType;

/// Items produced by a query, capped at the configured result size.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub items: Vec<Item>,
    /// More items were available than the cap allowed.
    pub truncated: bool,
}

pub fn compile_query(text: &str) -> Result<CompiledQuery> {
    compile(text, &LibraryModules::new())
}

pub fn compile_query_with(text: &str, libraries: &LibraryModules) -> Result<CompiledQuery> {
    compile(text, libraries)
}

/// Compile and run `text` reading input files from the local file system.
pub fn evaluate_query(text: &str, config: &RuntimeConfiguration) -> Result<QueryResult> {
    let query = compile_query(text)?;
    evaluate_compiled(&query, Arc::new(config.clone()), Arc::new(LocalFileReader))
}

/// Evaluate `text` without a result cap.
pub fn evaluate_expr(text: &str) -> Result<Vec<Item>> {
    let config = RuntimeConfiguration::builder().result_size_cap(0).build();
    evaluate_query(text, &config).map(|result| result.items)
}

pub fn evaluate_compiled(
    query: &CompiledQuery,
    config: Arc<RuntimeConfiguration>,
    reader: Arc<dyn FileReader>,
) -> Result<QueryResult> {
    let cap = config.result_size_cap()?;
    if config.print_iterator_tree() {
        tracing::info!(plan = %explain(query), "query plan");
    }
    let mut rt = Runtime::new(config, Arc::clone(&query.functions), reader)?;
    for declaration in query.global_variables() {
        initialize_global(declaration, &query.functions, &mut rt)?;
    }
    let Some(body) = &query.module.body else {
        return Err(Error::internal("compiled main module has no body"));
    };
    let mut iter = build_iterator(body, &query.functions)?;
    let globals = rt.globals();
    let (items, truncated) = if iter.execution_mode().is_distributed() {
        let collection = iter.get_collection(&mut rt, globals)?;
        let limit = if cap == 0 { collection.count() } else { cap };
        (collection.take(limit), collection.count() > limit)
    } else {
        pull_capped(iter.as_mut(), &mut rt, cap)?
    };
    if truncated {
        tracing::warn!(cap, "query result truncated; raise --result-size to see every item");
    }
    Ok(QueryResult { items, truncated })
}

fn pull_capped(iter: &mut dyn RuntimeIterator, rt: &mut Runtime, cap: usize) -> Result<(Vec<Item>, bool)> {
    let globals = rt.globals();
    iter.open(rt, globals)?;
    let mut items = Vec::new();
    let result: Result<bool> = (|| {
        while iter.has_next() {
            if cap != 0 && items.len() == cap {
                return Ok(true);
            }
            items.push(iter.next(rt)?);
        }
        Ok(false)
    })();
    iter.close(rt);
    result.map(|truncated| (items, truncated))
}

fn initialize_global(
    declaration: &VariableDecl,
    functions: &FunctionRegistry,
    rt: &mut Runtime,
) -> Result<()> {
    let globals = rt.globals();
    let name = declaration.name.clone();
    if declaration.external {
        let key = match declaration.name.namespace() {
            None => declaration.name.local_name().to_string(),
            Some(_) => declaration.name.to_string(),
        };
        if let Some(raw) = rt.config().external_variable_value(&key) {
            let items = external_value(declaration, raw)?;
            tracing::debug!(variable = %name, "bound external variable");
            rt.contexts.bind_items(globals, name, items);
            return Ok(());
        }
    }
    let Some(expr) = &declaration.expr else {
        return Err(Error::from_code(
            ErrorCode::XPDY0002,
            format!("External variable ${} has no value", declaration.name),
        )
        .at(declaration.location));
    };
    let mut iter = build_iterator(expr, functions)?;
    if iter.execution_mode().is_distributed() && declaration.seq_type.is_none() {
        let collection = iter.get_collection(rt, globals)?;
        rt.contexts.bind_collection(globals, name, collection);
        return Ok(());
    }
    let items = materialize(iter.as_mut(), rt, globals)?;
    check_declared_type(declaration, &items)?;
    rt.contexts.bind_items(globals, name, items);
    Ok(())
}

fn check_declared_type(declaration: &VariableDecl, items: &[Item]) -> Result<()> {
    match declaration.seq_type {
        Some(seq_type) if !seq_type.matches(items) => Err(Error::unexpected_type(
            format!("Value of ${} does not match its declared type {seq_type}", declaration.name),
            declaration.location,
        )),
        _ => Ok(()),
    }
}

/// Value of an external variable given as text, read according to its
/// declared item type.
fn external_value(declaration: &VariableDecl, raw: &str) -> Result<Vec<Item>> {
    let item_type = declaration.seq_type.and_then(|t| t.item_type()).unwrap_or(ItemType::Item);
    let trimmed = raw.trim();
    let item = match item_type {
        ItemType::Item | ItemType::Atomic | ItemType::String => Some(Item::string(raw)),
        ItemType::Integer => trimmed.parse().ok().map(Item::Integer),
        ItemType::Decimal => trimmed.parse().ok().map(Item::Decimal),
        ItemType::Double | ItemType::Numeric => trimmed.parse().ok().map(Item::Double),
        ItemType::Boolean => match trimmed {
            "true" => Some(Item::Boolean(true)),
            "false" => Some(Item::Boolean(false)),
            _ => None,
        },
        ItemType::Null => (trimmed == "null").then_some(Item::Null),
        ItemType::Object | ItemType::Array => serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .map(|value| Item::from_json(&value))
            .filter(|item| item_type.matches(item)),
        ItemType::Function => None,
    };
    let item = item.ok_or_else(|| {
        Error::from_code(
            ErrorCode::FORG0001,
            format!("Cannot read '{raw}' as a value of type {item_type} for ${}", declaration.name),
        )
        .at(declaration.location)
    })?;
    let items = vec![item];
    check_declared_type(declaration, &items)?;
    Ok(items)
}

/// Indented outline of the analysed query with the execution mode of
/// every expression and clause.
pub fn explain(query: &CompiledQuery) -> String {
    let mut out = String::new();
    for function in &query.module.functions {
        let _ = writeln!(out, "function {}#{}", function.name, function.params.len());
        explain_expr(&function.body, 1, &mut out);
    }
    for variable in &query.module.variables {
        let _ = writeln!(out, "variable ${}", variable.name);
        if let Some(expr) = &variable.expr {
            explain_expr(expr, 1, &mut out);
        }
    }
    if let Some(body) = &query.module.body {
        explain_expr(body, 0, &mut out);
    }
    out
}

fn explain_expr(expr: &Expr, depth: usize, out: &mut String) {
    let _ = writeln!(out, "{:indent$}{} [{}]", "", expr.describe(), expr.mode, indent = depth * 2);
    if let ExprKind::Flwor(flwor) = &expr.kind {
        for clause in &flwor.clauses {
            explain_clause(clause, depth + 1, out);
        }
        explain_expr(&flwor.return_expr, depth + 1, out);
        return;
    }
    for child in expr.children() {
        explain_expr(child, depth + 1, out);
    }
}

fn explain_clause(clause: &Clause, depth: usize, out: &mut String) {
    let _ = writeln!(out, "{:indent$}{} [{}]", "", clause.describe(), clause.mode, indent = depth * 2);
    for expr in clause.expressions() {
        explain_expr(expr, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::io::MemoryFileReader;

    fn run(text: &str, config: RuntimeConfiguration) -> Result<QueryResult> {
        let query = compile_query(text)?;
        evaluate_compiled(&query, Arc::new(config), Arc::new(MemoryFileReader::new()))
    }

    #[rstest]
    fn results_are_capped() {
        let result = run("1 to 10", RuntimeConfiguration::builder().result_size_cap(3).build()).unwrap();
        assert_eq!(result.items, vec![Item::Integer(1), Item::Integer(2), Item::Integer(3)]);
        assert!(result.truncated);
    }

    #[rstest]
    fn distributed_results_are_capped() {
        let config = RuntimeConfiguration::builder().result_size_cap(2).build();
        let result = run("parallelize(1 to 5)", config).unwrap();
        assert_eq!(result.items.len(), 2);
        assert!(result.truncated);
    }

    #[rstest]
    #[case("integer", "42", Item::Integer(42))]
    #[case("string", "42", Item::string("42"))]
    #[case("boolean", "true", Item::Boolean(true))]
    fn external_variables_follow_their_type(#[case] type_name: &str, #[case] raw: &str, #[case] expected: Item) {
        let text = format!("declare variable $v as {type_name} external; $v");
        let result = run(&text, RuntimeConfiguration::builder().variable("v", raw).build()).unwrap();
        assert_eq!(result.items, vec![expected]);
    }

    #[rstest]
    fn unreadable_external_values_are_cast_errors() {
        let config = RuntimeConfiguration::builder().variable("v", "forty").build();
        let err = run("declare variable $v as integer external; $v", config).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
        assert!(err.message.contains("of type integer for $v"), "{}", err.message);
    }

    #[rstest]
    fn missing_external_values_fall_back_to_the_default() {
        let result = run("declare variable $v external := 7; $v", RuntimeConfiguration::new()).unwrap();
        assert_eq!(result.items, vec![Item::Integer(7)]);
        let err = run("declare variable $v external; $v", RuntimeConfiguration::new()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPDY0002);
    }

    #[rstest]
    fn explain_lists_modes() {
        let query = compile_query("for $x in parallelize(1 to 3) return $x").unwrap();
        let plan = explain(&query);
        assert!(plan.starts_with("FLWOR expression [RDD]"), "{plan}");
        assert!(plan.contains("for clause [DATAFRAME]"), "{plan}");
    }
}

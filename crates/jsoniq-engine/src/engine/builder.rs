//! Turns annotated expressions into runtime iterators.

use std::collections::BTreeSet;

use crate::ast::{Expr, ExprKind, Literal};
use crate::compiler::dependencies::{expression_dependencies, free_variables};
use crate::engine::calls::{
    BuiltinCall, ConstantFunction, DynamicCallSource, InlineFunctionSource, PartialApplicationSource, UserCallSource,
    named_function_item,
};
use crate::engine::expressions::control::{
    IfSource, Quantified, QuantifiedVariable, SwitchSource, TypeswitchCaseTypes, TypeswitchSource,
};
use crate::engine::expressions::operators::{Arithmetic, Comparison, InstanceOf, Logical, Negate, StringConcat};
use crate::engine::expressions::postfix::{NavigationSource, PredicateSource, Selector, SimpleMapSource};
use crate::engine::expressions::primary::{
    ArrayConstructor, LiteralValue, ObjectConstructor, RangeSource, SequenceSource, VariableSource,
};
use crate::engine::flwor::build_flwor;
use crate::engine::iterator::{BoxedIterator, Eager, IteratorMeta, StreamIterator};
use crate::engine::runtime::FunctionRegistry;
use crate::error::{Error, ErrorCode, Result};
use crate::functions::{is_builtin_name, lookup_builtin};
use crate::item::Item;
use crate::mode::ExecutionMode;
use crate::name::{FunctionIdentifier, Name};

/// Modes left unset by the static pass are evaluated locally.
pub(crate) fn effective_mode(mode: ExecutionMode) -> ExecutionMode {
    mode.resolve_unset(true)
}

fn meta_for(expr: &Expr) -> IteratorMeta {
    IteratorMeta::new(expr.describe(), expr.location, effective_mode(expr.mode))
        .with_dependencies(expression_dependencies(expr))
}

fn literal_item(literal: &Literal) -> Item {
    match literal {
        Literal::Null => Item::Null,
        Literal::Boolean(b) => Item::Boolean(*b),
        Literal::Integer(i) => Item::Integer(*i),
        Literal::Decimal(d) => Item::Decimal(*d),
        Literal::Double(d) => Item::Double(*d),
        Literal::String(s) => Item::string(s.as_str()),
    }
}

fn unknown_function(name: &Name, arity: usize, expr: &Expr) -> Error {
    Error::from_code(ErrorCode::XPST0017, format!("Undefined function {name}#{arity}")).at(expr.location)
}

fn build_all(exprs: &[Expr], functions: &FunctionRegistry) -> Result<Vec<BoxedIterator>> {
    exprs.iter().map(|e| build_iterator(e, functions)).collect()
}

/// Build the iterator tree for `expr`. User-defined function bodies are
/// built lazily by the call iterators, so recursion terminates.
pub fn build_iterator(expr: &Expr, functions: &FunctionRegistry) -> Result<BoxedIterator> {
    let meta = meta_for(expr);
    let build = |e: &Expr| build_iterator(e, functions);
    let location = expr.location;
    Ok(match &expr.kind {
        ExprKind::Literal(literal) => {
            StreamIterator::boxed(Eager::new(LiteralValue { item: literal_item(literal) }), meta)
        }
        ExprKind::VarRef(name) => {
            StreamIterator::boxed(Eager::new(VariableSource { name: name.clone(), location }), meta)
        }
        ExprKind::ContextItem => {
            StreamIterator::boxed(Eager::new(VariableSource { name: Name::context_item(), location }), meta)
        }
        ExprKind::Sequence(items) => StreamIterator::boxed(SequenceSource::new(build_all(items, functions)?), meta),
        ExprKind::Range(from, to) => StreamIterator::boxed(RangeSource::new(build(from)?, build(to)?), meta),
        ExprKind::ObjectConstructor(pairs) => {
            let pairs = pairs.iter().map(|(k, v)| Ok((build(k)?, build(v)?))).collect::<Result<Vec<_>>>()?;
            StreamIterator::boxed(Eager::new(ObjectConstructor { pairs }), meta)
        }
        ExprKind::ArrayConstructor(content) => {
            let content = content.as_deref().map(build).transpose()?;
            StreamIterator::boxed(Eager::new(ArrayConstructor { content }), meta)
        }
        ExprKind::Arithmetic { op, left, right } => StreamIterator::boxed(
            Eager::new(Arithmetic { op: *op, left: build(left)?, right: build(right)?, location }),
            meta,
        ),
        ExprKind::Negate(operand) => {
            StreamIterator::boxed(Eager::new(Negate { operand: build(operand)?, location }), meta)
        }
        ExprKind::Comparison { op, general, left, right } => StreamIterator::boxed(
            Eager::new(Comparison { op: *op, general: *general, left: build(left)?, right: build(right)?, location }),
            meta,
        ),
        ExprKind::And(l, r) => StreamIterator::boxed(Eager::new(Logical::And(build(l)?, build(r)?)), meta),
        ExprKind::Or(l, r) => StreamIterator::boxed(Eager::new(Logical::Or(build(l)?, build(r)?)), meta),
        ExprKind::Not(operand) => StreamIterator::boxed(Eager::new(Logical::Not(build(operand)?)), meta),
        ExprKind::StringConcat(l, r) => {
            StreamIterator::boxed(Eager::new(StringConcat { left: build(l)?, right: build(r)? }), meta)
        }
        ExprKind::InstanceOf { operand, seq_type } => {
            StreamIterator::boxed(Eager::new(InstanceOf { operand: build(operand)?, seq_type: *seq_type }), meta)
        }
        ExprKind::If { condition, then_branch, else_branch } => StreamIterator::boxed(
            IfSource::new(build(condition)?, build(then_branch)?, build(else_branch)?),
            meta,
        ),
        ExprKind::Switch { test, cases, default } => {
            let cases = cases
                .iter()
                .map(|case| Ok((build_all(&case.tests, functions)?, build(&case.result)?)))
                .collect::<Result<Vec<_>>>()?;
            StreamIterator::boxed(SwitchSource::new(build(test)?, cases, build(default)?, location), meta)
        }
        ExprKind::Typeswitch { operand, cases, default_var, default } => {
            let cases = cases
                .iter()
                .map(|case| {
                    let types = TypeswitchCaseTypes { var: case.var.clone(), types: case.types.clone() };
                    Ok((types, build(&case.result)?))
                })
                .collect::<Result<Vec<_>>>()?;
            StreamIterator::boxed(
                TypeswitchSource::new(build(operand)?, cases, default_var.clone(), build(default)?),
                meta,
            )
        }
        ExprKind::Quantified { kind, bindings, satisfies } => {
            let bindings = bindings
                .iter()
                .map(|b| Ok(QuantifiedVariable { var: b.var.clone(), seq_type: b.seq_type, expr: build(&b.expr)? }))
                .collect::<Result<Vec<_>>>()?;
            StreamIterator::boxed(
                Eager::new(Quantified { kind: *kind, bindings, satisfies: build(satisfies)?, location }),
                meta,
            )
        }
        ExprKind::Predicate { sequence, predicate } => {
            StreamIterator::boxed(PredicateSource::new(build(sequence)?, build(predicate)?), meta)
        }
        ExprKind::SimpleMap { sequence, mapping } => {
            StreamIterator::boxed(SimpleMapSource::new(build(sequence)?, build(mapping)?), meta)
        }
        ExprKind::ObjectLookup { object, key } => {
            StreamIterator::boxed(NavigationSource::new(build(object)?, Selector::Member(build(key)?), location), meta)
        }
        ExprKind::ArrayLookup { array, index } => {
            StreamIterator::boxed(NavigationSource::new(build(array)?, Selector::Index(build(index)?), location), meta)
        }
        ExprKind::ArrayUnbox(array) => {
            StreamIterator::boxed(NavigationSource::new(build(array)?, Selector::Unbox, location), meta)
        }
        ExprKind::FunctionCall { name, args } => {
            let identifier = FunctionIdentifier::new(name.clone(), args.len());
            if args.iter().any(Option::is_none) {
                if !functions.contains(&identifier) && lookup_builtin(name, args.len()).is_none() {
                    return Err(unknown_function(name, args.len(), expr));
                }
                let declared =
                    functions.get(&identifier).map(|def| def.params.iter().map(|p| p.seq_type).collect());
                let args = args.iter().map(|a| a.as_ref().map(build).transpose()).collect::<Result<Vec<_>>>()?;
                return Ok(StreamIterator::boxed(
                    Eager::new(PartialApplicationSource::new(name, args, declared, location)),
                    meta,
                ));
            }
            let args = args.iter().flatten().map(build).collect::<Result<Vec<_>>>()?;
            if functions.contains(&identifier) {
                StreamIterator::boxed(UserCallSource::new(identifier, args, location), meta)
            } else if let Some(builtin) = lookup_builtin(name, args.len()) {
                StreamIterator::boxed(Eager::new(BuiltinCall { builtin, args, location }), meta)
            } else {
                return Err(unknown_function(name, args.len(), expr));
            }
        }
        ExprKind::NamedFunctionRef { name, arity } => {
            let identifier = FunctionIdentifier::new(name.clone(), *arity);
            let definition = functions.get(&identifier);
            if definition.is_none() && lookup_builtin(name, *arity).is_none() {
                return Err(unknown_function(name, *arity, expr));
            }
            let item = named_function_item(name, *arity, definition.map(|d| &**d), location);
            StreamIterator::boxed(Eager::new(ConstantFunction { item: std::sync::Arc::new(item) }), meta)
        }
        ExprKind::InlineFunction(inline) => {
            let params: BTreeSet<&Name> = inline.params.iter().map(|p| &p.name).collect();
            let free = free_variables(&inline.body).into_iter().filter(|v| !params.contains(v)).collect();
            StreamIterator::boxed(
                Eager::new(InlineFunctionSource::new(&inline.params, inline.return_type, &inline.body, free)),
                meta,
            )
        }
        ExprKind::DynamicCall { function, args } => {
            StreamIterator::boxed(DynamicCallSource::new(build(function)?, build_all(args, functions)?, location), meta)
        }
        ExprKind::Flwor(flwor) => build_flwor(flwor, meta, functions)?,
    })
}

/// Whether `name` can be called with `arity` arguments.
pub fn is_known_function(name: &Name, arity: usize, functions: &FunctionRegistry) -> bool {
    functions.contains(&FunctionIdentifier::new(name.clone(), arity)) || lookup_builtin(name, arity).is_some()
}

/// Whether any function with `name` exists, whatever its arity.
pub fn is_known_function_name(name: &Name, functions: &FunctionRegistry) -> bool {
    is_builtin_name(name) || functions.iter().any(|def| def.identifier.name == *name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::ast::build::*;
    use crate::config::RuntimeConfiguration;
    use crate::engine::iterator::materialize;
    use crate::engine::runtime::Runtime;
    use crate::io::MemoryFileReader;

    fn run(expr: &Expr) -> Result<Vec<Item>> {
        let functions = Arc::new(FunctionRegistry::new());
        let mut iter = build_iterator(expr, &functions)?;
        let mut rt =
            Runtime::new(Arc::new(RuntimeConfiguration::new()), functions, Arc::new(MemoryFileReader::new()))?;
        let ctx = rt.globals();
        materialize(iter.as_mut(), &mut rt, ctx)
    }

    #[rstest]
    fn literals_and_sequences() {
        let expr = seq(vec![int(1), string("a"), null(), boolean(false)]);
        assert_eq!(
            run(&expr).unwrap(),
            vec![Item::Integer(1), Item::string("a"), Item::Null, Item::Boolean(false)]
        );
    }

    #[rstest]
    fn unknown_functions_fail_at_build_time() {
        let err = run(&call("no-such-function", vec![int(1)])).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0017);
    }

    #[rstest]
    fn builtin_calls_are_dispatched_by_arity() {
        assert_eq!(run(&call("count", vec![range(int(1), int(4))])).unwrap(), vec![Item::Integer(4)]);
    }
}

//! Variable-dependency analysis: which variables an expression reads and how.
//!
//! Aggregating builtins applied directly to a variable only need part of its
//! value (its count, sum, ...); everything else needs the full sequence. Two
//! different requirements on the same name merge to `Full`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ast::{Clause, ClauseKind, Expr, ExprKind};
use crate::name::{FN_NS, Name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableDependency {
    Full,
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

pub type VariableDependencies = BTreeMap<Name, VariableDependency>;

/// Insert a requirement, falling back to `Full` when a different kind is
/// already recorded for the same name.
pub fn merge_dependency(target: &mut VariableDependencies, name: Name, kind: VariableDependency) {
    target
        .entry(name)
        .and_modify(|existing| {
            if *existing != kind {
                *existing = VariableDependency::Full;
            }
        })
        .or_insert(kind);
}

pub fn merge_all(target: &mut VariableDependencies, other: VariableDependencies) {
    for (name, kind) in other {
        merge_dependency(target, name, kind);
    }
}

fn without(mut deps: VariableDependencies, bound: &BTreeSet<Name>) -> VariableDependencies {
    deps.retain(|name, _| !bound.contains(name));
    deps
}

fn aggregate_kind(name: &Name) -> Option<VariableDependency> {
    if name.namespace.is_some() && !name.is_in_namespace(FN_NS) {
        return None;
    }
    Some(match name.local_name() {
        "count" => VariableDependency::Count,
        "sum" => VariableDependency::Sum,
        "avg" => VariableDependency::Avg,
        "max" => VariableDependency::Max,
        "min" => VariableDependency::Min,
        _ => return None,
    })
}

/// Free variables of `expr` with the kind of access each one needs.
pub fn expression_dependencies(expr: &Expr) -> VariableDependencies {
    let mut deps = VariableDependencies::new();
    match &expr.kind {
        ExprKind::VarRef(name) => {
            deps.insert(name.clone(), VariableDependency::Full);
        }
        ExprKind::ContextItem => {
            deps.insert(Name::context_item(), VariableDependency::Full);
        }
        ExprKind::FunctionCall { name, args } if args.len() == 1 => {
            if let (Some(kind), Some(Some(Expr { kind: ExprKind::VarRef(var), .. }))) = (aggregate_kind(name), args.first()) {
                deps.insert(var.clone(), kind);
            } else {
                for child in expr.children() {
                    merge_all(&mut deps, expression_dependencies(child));
                }
            }
        }
        ExprKind::Flwor(flwor) => {
            let mut bound = BTreeSet::new();
            for clause in &flwor.clauses {
                merge_all(&mut deps, without(clause_dependencies(clause), &bound));
                bound.extend(clause.bound_variables().into_iter().cloned());
            }
            merge_all(&mut deps, without(expression_dependencies(&flwor.return_expr), &bound));
        }
        ExprKind::Quantified { bindings, satisfies, .. } => {
            let mut bound = BTreeSet::new();
            for binding in bindings {
                merge_all(&mut deps, without(expression_dependencies(&binding.expr), &bound));
                bound.insert(binding.var.clone());
            }
            merge_all(&mut deps, without(expression_dependencies(satisfies), &bound));
        }
        ExprKind::Typeswitch { operand, cases, default_var, default } => {
            merge_all(&mut deps, expression_dependencies(operand));
            for case in cases {
                let bound: BTreeSet<Name> = case.var.iter().cloned().collect();
                merge_all(&mut deps, without(expression_dependencies(&case.result), &bound));
            }
            let bound: BTreeSet<Name> = default_var.iter().cloned().collect();
            merge_all(&mut deps, without(expression_dependencies(default), &bound));
        }
        ExprKind::InlineFunction(function) => {
            let bound: BTreeSet<Name> = function.params.iter().map(|p| p.name.clone()).collect();
            merge_all(&mut deps, without(expression_dependencies(&function.body), &bound));
        }
        ExprKind::Predicate { sequence, predicate: scoped } | ExprKind::SimpleMap { sequence, mapping: scoped } => {
            merge_all(&mut deps, expression_dependencies(sequence));
            let bound: BTreeSet<Name> = [Name::context_item(), Name::context_position(), Name::context_count()].into();
            merge_all(&mut deps, without(expression_dependencies(scoped), &bound));
        }
        _ => {
            for child in expr.children() {
                merge_all(&mut deps, expression_dependencies(child));
            }
        }
    }
    deps
}

/// Variables a single clause reads, before removing what earlier clauses bind.
pub fn clause_dependencies(clause: &Clause) -> VariableDependencies {
    let mut deps = VariableDependencies::new();
    match &clause.kind {
        ClauseKind::GroupBy(specs) => {
            for spec in specs {
                match &spec.expr {
                    Some(expr) => merge_all(&mut deps, expression_dependencies(expr)),
                    None => merge_dependency(&mut deps, spec.var.clone(), VariableDependency::Full),
                }
            }
        }
        _ => {
            for expr in clause.expressions() {
                merge_all(&mut deps, expression_dependencies(expr));
            }
        }
    }
    deps
}

/// Free variables of an expression, ignoring the kind of access.
pub fn free_variables(expr: &Expr) -> BTreeSet<Name> {
    expression_dependencies(expr).into_keys().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn conflicting_kinds_merge_to_full() {
        let mut deps = VariableDependencies::new();
        merge_dependency(&mut deps, Name::local("x"), VariableDependency::Count);
        merge_dependency(&mut deps, Name::local("x"), VariableDependency::Count);
        assert_eq!(deps[&Name::local("x")], VariableDependency::Count);
        merge_dependency(&mut deps, Name::local("x"), VariableDependency::Sum);
        assert_eq!(deps[&Name::local("x")], VariableDependency::Full);
    }

    #[test]
    fn aggregate_over_variable_is_partial() {
        let expr = call("count", vec![var("x")]);
        assert_eq!(expression_dependencies(&expr)[&Name::local("x")], VariableDependency::Count);
        let mixed = seq(vec![call("count", vec![var("x")]), var("x")]);
        assert_eq!(expression_dependencies(&mixed)[&Name::local("x")], VariableDependency::Full);
    }

    #[test]
    fn flwor_bound_variables_are_not_free() {
        // for $x in $input let $y := $x + $z return $y
        let expr = flwor(
            vec![for_in("x", var("input")), let_bind("y", add(var("x"), var("z")))],
            var("y"),
        );
        let free = free_variables(&expr);
        assert_eq!(free, [Name::local("input"), Name::local("z")].into());
    }

    #[test]
    fn predicate_hides_context_item() {
        let expr = predicate(var("seq"), gt(context_item(), var("limit")));
        assert_eq!(free_variables(&expr), [Name::local("limit"), Name::local("seq")].into());
    }
}

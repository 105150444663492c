//! Helpers for building expression trees programmatically.
//!
//! ```
//! use jsoniq_engine::ast::build::*;
//! // for $x in (1, 2) return $x * 10
//! let expr = flwor(vec![for_in("x", seq(vec![int(1), int(2)]))], mul(var("x"), int(10)));
//! assert_eq!(expr.describe(), "FLWOR expression");
//! ```

use crate::ast::{
    ArithmeticOp, Clause, ClauseKind, ComparisonOp, Expr, ExprKind, Flwor, ForClause, GroupingSpec, InlineFunction,
    LetClause, Literal, OrderSpec, Param, QuantifiedBinding, QuantifierKind,
};
use crate::error::SourceLocation;
use crate::name::Name;
use crate::types::SequenceType;

fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, SourceLocation::unknown())
}

fn clause(kind: ClauseKind) -> Clause {
    Clause::new(kind, SourceLocation::unknown())
}

pub fn int(value: i64) -> Expr {
    expr(ExprKind::Literal(Literal::Integer(value)))
}

pub fn dec(value: f64) -> Expr {
    expr(ExprKind::Literal(Literal::Decimal(value)))
}

pub fn dbl(value: f64) -> Expr {
    expr(ExprKind::Literal(Literal::Double(value)))
}

pub fn string(value: &str) -> Expr {
    expr(ExprKind::Literal(Literal::String(value.to_string())))
}

pub fn boolean(value: bool) -> Expr {
    expr(ExprKind::Literal(Literal::Boolean(value)))
}

pub fn null() -> Expr {
    expr(ExprKind::Literal(Literal::Null))
}

pub fn var(name: &str) -> Expr {
    expr(ExprKind::VarRef(Name::local(name)))
}

pub fn context_item() -> Expr {
    expr(ExprKind::ContextItem)
}

pub fn seq(items: Vec<Expr>) -> Expr {
    expr(ExprKind::Sequence(items))
}

pub fn empty() -> Expr {
    seq(Vec::new())
}

fn arithmetic(op: ArithmeticOp, left: Expr, right: Expr) -> Expr {
    expr(ExprKind::Arithmetic { op, left: Box::new(left), right: Box::new(right) })
}

pub fn add(left: Expr, right: Expr) -> Expr {
    arithmetic(ArithmeticOp::Add, left, right)
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    arithmetic(ArithmeticOp::Sub, left, right)
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    arithmetic(ArithmeticOp::Mul, left, right)
}

pub fn div(left: Expr, right: Expr) -> Expr {
    arithmetic(ArithmeticOp::Div, left, right)
}

/// General (existential) comparison.
pub fn compare(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
    expr(ExprKind::Comparison { op, general: true, left: Box::new(left), right: Box::new(right) })
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    compare(ComparisonOp::Eq, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    compare(ComparisonOp::Gt, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    compare(ComparisonOp::Lt, left, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    expr(ExprKind::And(Box::new(left), Box::new(right)))
}

pub fn or(left: Expr, right: Expr) -> Expr {
    expr(ExprKind::Or(Box::new(left), Box::new(right)))
}

pub fn range(from: Expr, to: Expr) -> Expr {
    expr(ExprKind::Range(Box::new(from), Box::new(to)))
}

pub fn if_then_else(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    expr(ExprKind::If {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
    })
}

/// Call of a function in no namespace; builtins resolve by local name.
pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::FunctionCall { name: Name::local(name), args: args.into_iter().map(Some).collect() })
}

pub fn inline_function(params: &[&str], body: Expr) -> Expr {
    expr(ExprKind::InlineFunction(InlineFunction {
        params: params.iter().map(|p| Param { name: Name::local(p), seq_type: SequenceType::ITEM_STAR }).collect(),
        return_type: SequenceType::ITEM_STAR,
        body: Box::new(body),
    }))
}

pub fn dynamic_call(function: Expr, args: Vec<Expr>) -> Expr {
    expr(ExprKind::DynamicCall { function: Box::new(function), args })
}

pub fn predicate(sequence: Expr, predicate: Expr) -> Expr {
    expr(ExprKind::Predicate { sequence: Box::new(sequence), predicate: Box::new(predicate) })
}

pub fn lookup(object: Expr, key: &str) -> Expr {
    expr(ExprKind::ObjectLookup { object: Box::new(object), key: Box::new(string(key)) })
}

pub fn unbox(array: Expr) -> Expr {
    expr(ExprKind::ArrayUnbox(Box::new(array)))
}

pub fn array(members: Vec<Expr>) -> Expr {
    if members.is_empty() {
        expr(ExprKind::ArrayConstructor(None))
    } else {
        expr(ExprKind::ArrayConstructor(Some(Box::new(seq(members)))))
    }
}

pub fn object(pairs: Vec<(&str, Expr)>) -> Expr {
    expr(ExprKind::ObjectConstructor(pairs.into_iter().map(|(k, v)| (string(k), v)).collect()))
}

pub fn some(bindings: Vec<(&str, Expr)>, satisfies: Expr) -> Expr {
    expr(ExprKind::Quantified {
        kind: QuantifierKind::Some,
        bindings: bindings
            .into_iter()
            .map(|(v, e)| QuantifiedBinding { var: Name::local(v), seq_type: None, expr: e })
            .collect(),
        satisfies: Box::new(satisfies),
    })
}

pub fn flwor(clauses: Vec<Clause>, return_expr: Expr) -> Expr {
    expr(ExprKind::Flwor(Flwor { clauses, return_expr: Box::new(return_expr) }))
}

pub fn for_in(name: &str, source: Expr) -> Clause {
    ForBuilder::new(name, source).build()
}

pub fn let_bind(name: &str, value: Expr) -> Clause {
    clause(ClauseKind::Let(LetClause { var: Name::local(name), seq_type: None, expr: value }))
}

pub fn where_(condition: Expr) -> Clause {
    clause(ClauseKind::Where(condition))
}

/// `group by $name` over an already bound variable.
pub fn group_by(names: &[&str]) -> Clause {
    clause(ClauseKind::GroupBy(
        names.iter().map(|n| GroupingSpec { var: Name::local(n), seq_type: None, expr: None }).collect(),
    ))
}

pub fn order_by(keys: Vec<(Expr, bool)>) -> Clause {
    clause(ClauseKind::OrderBy {
        specs: keys.into_iter().map(|(e, descending)| OrderSpec { expr: e, descending, empty_greatest: false }).collect(),
        stable: true,
    })
}

pub fn count(name: &str) -> Clause {
    clause(ClauseKind::Count(Name::local(name)))
}

/// Builder for `for` clauses with the optional parts.
pub struct ForBuilder {
    clause: ForClause,
}

impl ForBuilder {
    pub fn new(name: &str, source: Expr) -> Self {
        Self {
            clause: ForClause { var: Name::local(name), seq_type: None, allowing_empty: false, positional: None, expr: source },
        }
    }

    #[must_use]
    pub fn allowing_empty(mut self) -> Self {
        self.clause.allowing_empty = true;
        self
    }

    #[must_use]
    pub fn at(mut self, positional: &str) -> Self {
        self.clause.positional = Some(Name::local(positional));
        self
    }

    pub fn build(self) -> Clause {
        clause(ClauseKind::For(self.clause))
    }
}

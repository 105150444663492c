//! Choosing how a for clause is evaluated.
//!
//! A for clause is local when neither its input tuples nor its expression are
//! distributed. Otherwise it produces a table, and the strategy depends on
//! where the distribution comes from:
//!
//! | input tuples | expression  | reads FLWOR variables | strategy   |
//! |--------------|-------------|-----------------------|------------|
//! | none         | distributed | -                     | starting   |
//! | local        | distributed | -                     | union      |
//! | table        | local       | -                     | explode    |
//! | table        | distributed | no                    | cartesian  |
//! | table        | distributed | yes                   | join       |

use std::collections::BTreeSet;

use crate::ast::{ComparisonOp, Expr, ExprKind, ForClause};
use crate::compiler::dependencies::free_variables;
use crate::error::{Error, Result, SourceLocation};
use crate::mode::ExecutionMode;
use crate::name::Name;

/// Which join condition a join strategy evaluates.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinShape {
    /// `left_key = right_key`, with the right key reading only `$$` and the
    /// left key reading only FLWOR variables. Evaluated by hashing.
    Equi { left_key: Expr, right_key: Expr, general: bool },
    /// Any other predicate; every pair of input tuple and item is tested.
    Theta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForStrategy {
    Local,
    Starting,
    Union,
    Explode,
    Cartesian,
    /// `outer` keeps input tuples without a match, binding the variable to
    /// the empty sequence.
    Join { shape: JoinShape, outer: bool },
}

impl ForStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ForStrategy::Local => "local",
            ForStrategy::Starting => "starting",
            ForStrategy::Union => "union",
            ForStrategy::Explode => "explode",
            ForStrategy::Cartesian => "cartesian",
            ForStrategy::Join { shape: JoinShape::Equi { .. }, .. } => "equi-join",
            ForStrategy::Join { shape: JoinShape::Theta, .. } => "theta-join",
        }
    }
}

fn reads_any(expr: &Expr, names: &BTreeSet<Name>) -> bool {
    free_variables(expr).iter().any(|v| names.contains(v))
}

/// Splits `left = right` into a left key over the input tuples and a right
/// key over the joined item. Keys that read the position or size of the
/// joined sequence cannot be hashed.
fn equi_join_keys(predicate: &Expr, flwor_bound: &BTreeSet<Name>) -> Option<JoinShape> {
    let ExprKind::Comparison { op: ComparisonOp::Eq, general, left, right } = &predicate.kind else {
        return None;
    };
    let context_item = Name::context_item();
    let positional: BTreeSet<Name> = [Name::context_position(), Name::context_count()].into();
    let is_right_key = |e: &Expr| {
        let free = free_variables(e);
        free.contains(&context_item) && !reads_any(e, flwor_bound) && !free.iter().any(|v| positional.contains(v))
    };
    let is_left_key = |e: &Expr| {
        let free = free_variables(e);
        !free.contains(&context_item) && !free.iter().any(|v| positional.contains(v))
    };
    if is_right_key(right) && is_left_key(left) {
        Some(JoinShape::Equi { left_key: (**left).clone(), right_key: (**right).clone(), general: *general })
    } else if is_right_key(left) && is_left_key(right) {
        Some(JoinShape::Equi { left_key: (**right).clone(), right_key: (**left).clone(), general: *general })
    } else {
        None
    }
}

/// Pick the strategy for `clause`. `previous` is the mode of the clause
/// before it (`None` for the first clause), `flwor_bound` the variables bound
/// by earlier clauses.
pub fn plan_for_clause(
    previous: Option<ExecutionMode>,
    clause: &ForClause,
    expression_mode: ExecutionMode,
    flwor_bound: &BTreeSet<Name>,
    location: SourceLocation,
) -> Result<ForStrategy> {
    let tabular_input = previous.is_some_and(ExecutionMode::is_dataframe);
    let strategy = match (tabular_input, expression_mode.is_distributed()) {
        (false, false) => ForStrategy::Local,
        (false, true) if previous.is_none() => ForStrategy::Starting,
        (false, true) => ForStrategy::Union,
        (true, false) => ForStrategy::Explode,
        (true, true) if !reads_any(&clause.expr, flwor_bound) => ForStrategy::Cartesian,
        (true, true) => {
            if clause.positional.is_some() {
                return Err(Error::job_within_a_job(location));
            }
            let ExprKind::Predicate { sequence, predicate } = &clause.expr.kind else {
                return Err(Error::job_within_a_job(location));
            };
            if reads_any(sequence, flwor_bound) {
                return Err(Error::job_within_a_job(location));
            }
            let shape = equi_join_keys(predicate, flwor_bound).unwrap_or(JoinShape::Theta);
            ForStrategy::Join { shape, outer: clause.allowing_empty }
        }
    };
    tracing::debug!(variable = %clause.var, strategy = strategy.name(), "planned for clause");
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::ast::ClauseKind;
    use crate::ast::build::*;
    use crate::error::ErrorCode;
    use crate::mode::ExecutionMode::{DataFrame, Local, Rdd};

    fn for_clause(var_name: &str, source: Expr) -> ForClause {
        match for_in(var_name, source).kind {
            ClauseKind::For(f) => f,
            _ => unreachable!(),
        }
    }

    fn bound(names: &[&str]) -> BTreeSet<Name> {
        names.iter().map(|n| Name::local(n)).collect()
    }

    fn plan(previous: Option<ExecutionMode>, clause: &ForClause, mode: ExecutionMode, names: &[&str]) -> Result<ForStrategy> {
        plan_for_clause(previous, clause, mode, &bound(names), SourceLocation::unknown())
    }

    #[rstest]
    #[case(None, Local, ForStrategy::Local)]
    #[case(Some(Local), Local, ForStrategy::Local)]
    #[case(None, Rdd, ForStrategy::Starting)]
    #[case(Some(Local), Rdd, ForStrategy::Union)]
    #[case(Some(DataFrame), Local, ForStrategy::Explode)]
    #[case(Some(DataFrame), Rdd, ForStrategy::Cartesian)]
    fn strategy_follows_the_regimes(
        #[case] previous: Option<ExecutionMode>,
        #[case] mode: ExecutionMode,
        #[case] expected: ForStrategy,
    ) {
        let clause = for_clause("y", call("parallelize", vec![range(int(1), int(3))]));
        assert_eq!(plan(previous, &clause, mode, &["x"]).unwrap(), expected);
    }

    #[rstest]
    fn equality_on_the_context_item_is_an_equi_join() {
        let source = predicate(call("parallelize", vec![var("items")]), eq(lookup(context_item(), "id"), var("x")));
        let clause = for_clause("y", source);
        let ForStrategy::Join { shape: JoinShape::Equi { left_key, right_key, .. }, outer } =
            plan(Some(DataFrame), &clause, Rdd, &["x"]).unwrap()
        else {
            panic!("expected an equi-join");
        };
        assert_eq!(left_key, var("x"));
        assert_eq!(right_key, lookup(context_item(), "id"));
        assert!(!outer);
    }

    #[rstest]
    fn other_predicates_are_theta_joins() {
        let source = predicate(call("parallelize", vec![var("items")]), gt(context_item(), var("x")));
        let clause = for_clause("y", source);
        assert_eq!(
            plan(Some(DataFrame), &clause, Rdd, &["x"]).unwrap(),
            ForStrategy::Join { shape: JoinShape::Theta, outer: false }
        );
    }

    #[rstest]
    fn dependent_distributed_expressions_without_a_predicate_are_rejected() {
        let clause = for_clause("y", call("parallelize", vec![var("x")]));
        let err = plan(Some(DataFrame), &clause, Rdd, &["x"]).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::JNRT0002);
    }

    #[rstest]
    fn joined_sequences_must_not_read_flwor_variables() {
        let source = predicate(call("parallelize", vec![var("x")]), eq(context_item(), var("x")));
        let clause = for_clause("y", source);
        assert!(plan(Some(DataFrame), &clause, Rdd, &["x"]).is_err());
    }
}

//! Execution modes and the rules composite expressions use to combine them.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Where an expression's value is produced: locally as a stream of items, as
/// a distributed item collection, or as a distributed table of tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[default]
    Unset,
    Local,
    Rdd,
    DataFrame,
}

impl ExecutionMode {
    pub fn is_unset(self) -> bool {
        self == ExecutionMode::Unset
    }

    pub fn is_local(self) -> bool {
        self == ExecutionMode::Local
    }

    pub fn is_rdd(self) -> bool {
        self == ExecutionMode::Rdd
    }

    pub fn is_dataframe(self) -> bool {
        self == ExecutionMode::DataFrame
    }

    /// Rdd or DataFrame.
    pub fn is_distributed(self) -> bool {
        matches!(self, ExecutionMode::Rdd | ExecutionMode::DataFrame)
    }

    /// Mode a variable reference resolves to once unresolved modes are
    /// pinned down.
    pub fn resolve_unset(self, set_unset_to_local: bool) -> Self {
        if set_unset_to_local && self.is_unset() { ExecutionMode::Local } else { self }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Unset => "UNSET",
            ExecutionMode::Local => "LOCAL",
            ExecutionMode::Rdd => "RDD",
            ExecutionMode::DataFrame => "DATAFRAME",
        })
    }
}

/// Comma expression: distributed only if every operand is.
pub fn sequence_mode(operands: impl IntoIterator<Item = ExecutionMode>) -> ExecutionMode {
    let mut any = false;
    for mode in operands {
        if !mode.is_distributed() {
            return ExecutionMode::Local;
        }
        any = true;
    }
    if any { ExecutionMode::Rdd } else { ExecutionMode::Local }
}

/// Conditional: the condition is always evaluated locally and does not count.
pub fn conditional_mode(then_branch: ExecutionMode, else_branch: ExecutionMode) -> ExecutionMode {
    if then_branch.is_distributed() && else_branch.is_distributed() { ExecutionMode::Rdd } else { ExecutionMode::Local }
}

/// Switch and typeswitch: start from the default branch, downgrade unless
/// every case is distributed too.
pub fn switch_mode(default: ExecutionMode, cases: impl IntoIterator<Item = ExecutionMode>) -> ExecutionMode {
    if !default.is_distributed() {
        return default.resolve_unset(true);
    }
    if cases.into_iter().all(ExecutionMode::is_distributed) { ExecutionMode::Rdd } else { ExecutionMode::Local }
}

/// For clause: tabular once anything upstream or the assignment is distributed.
pub fn for_clause_mode(previous: Option<ExecutionMode>, expression: ExecutionMode) -> ExecutionMode {
    if previous.is_some_and(ExecutionMode::is_dataframe) || expression.is_distributed() {
        ExecutionMode::DataFrame
    } else {
        ExecutionMode::Local
    }
}

/// Let, where, group-by, order-by and count keep the previous clause's regime.
pub fn inherited_clause_mode(previous: Option<ExecutionMode>) -> ExecutionMode {
    if previous.is_some_and(ExecutionMode::is_dataframe) { ExecutionMode::DataFrame } else { ExecutionMode::Local }
}

/// A FLWOR expression yields a distributed collection when its last clause is tabular.
pub fn flwor_mode(last_clause: ExecutionMode) -> ExecutionMode {
    if last_clause.is_dataframe() { ExecutionMode::Rdd } else { ExecutionMode::Local }
}

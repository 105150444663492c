//! Built-in function library.
//!
//! Registration conventions:
//! - One entry per function name with an arity range; implementations
//!   dispatch on `args.len()` for optional parameters.
//! - Names are matched in the built-in namespace or without a namespace.
//! - Functions that produce distributed collections declare their execution
//!   mode here; the static pass reads it from the table.

use core::fmt;

use crate::engine::distributed::Collection;
use crate::engine::runtime::Runtime;
use crate::error::{Result, SourceLocation};
use crate::item::{Item, Sequence};
use crate::mode::ExecutionMode;
use crate::name::{FN_NS, Name};

mod io;
mod numeric;
mod sequences;
mod strings;

/// What a builtin sees of the evaluation while it runs.
pub struct CallCtx<'a> {
    pub runtime: &'a Runtime,
    pub location: SourceLocation,
}

pub type EagerFn = fn(&CallCtx<'_>, &[Sequence]) -> Result<Sequence>;
pub type DistributedFn = fn(&CallCtx<'_>, &[Sequence]) -> Result<Collection>;
pub type ItemMapFn = fn(&CallCtx<'_>, &Item, &[Sequence]) -> Result<Sequence>;

#[derive(Clone, Copy)]
pub enum BuiltinKind {
    /// Arguments are materialised and passed as sequences.
    Eager(EagerFn),
    /// Produces a partitioned collection; local evaluation collects it.
    Distributed(DistributedFn),
    /// Applied to each item of the first argument, with the remaining
    /// arguments materialised once. Distributed when the first argument is.
    ItemMap(ItemMapFn),
    /// Pulls at most one item of its argument.
    Exists,
    /// Counts without materialising distributed arguments.
    Count,
}

impl fmt::Debug for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuiltinKind::Eager(_) => "Eager",
            BuiltinKind::Distributed(_) => "Distributed",
            BuiltinKind::ItemMap(_) => "ItemMap",
            BuiltinKind::Exists => "Exists",
            BuiltinKind::Count => "Count",
        })
    }
}

#[derive(Debug)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub min_arity: usize,
    pub max_arity: usize,
    pub mode: ExecutionMode,
    pub kind: BuiltinKind,
}

impl BuiltinFunction {
    pub fn accepts_arity(&self, arity: usize) -> bool {
        (self.min_arity..=self.max_arity).contains(&arity)
    }
}

const fn local(name: &'static str, min_arity: usize, max_arity: usize, f: EagerFn) -> BuiltinFunction {
    BuiltinFunction { name, min_arity, max_arity, mode: ExecutionMode::Local, kind: BuiltinKind::Eager(f) }
}

static BUILTINS: &[BuiltinFunction] = &[
    // strings
    local("concat", 0, 100, strings::concat_fn),
    local("substring", 2, 3, strings::substring_fn),
    local("translate", 3, 3, strings::translate_fn),
    local("string", 1, 1, strings::string_fn),
    local("string-length", 1, 1, strings::string_length_fn),
    // numbers
    local("number", 1, 1, numeric::number_fn),
    local("sum", 1, 1, numeric::sum_fn),
    local("avg", 1, 1, numeric::avg_fn),
    local("min", 1, 1, numeric::min_fn),
    local("max", 1, 1, numeric::max_fn),
    local("pi", 0, 0, numeric::pi_fn),
    // sequences, objects, arrays
    BuiltinFunction { name: "exists", min_arity: 1, max_arity: 1, mode: ExecutionMode::Local, kind: BuiltinKind::Exists },
    BuiltinFunction { name: "count", min_arity: 1, max_arity: 1, mode: ExecutionMode::Local, kind: BuiltinKind::Count },
    local("empty", 1, 1, sequences::empty_fn),
    local("not", 1, 1, sequences::not_fn),
    local("boolean", 1, 1, sequences::boolean_fn),
    local("size", 1, 1, sequences::size_fn),
    local("keys", 1, 1, sequences::keys_fn),
    local("flatten", 1, 1, sequences::flatten_fn),
    BuiltinFunction {
        name: "remove-keys",
        min_arity: 2,
        max_arity: 2,
        mode: ExecutionMode::Local,
        kind: BuiltinKind::ItemMap(sequences::remove_keys_fn),
    },
    // input
    local("json-doc", 1, 1, io::json_doc_fn),
    BuiltinFunction {
        name: "parallelize",
        min_arity: 1,
        max_arity: 2,
        mode: ExecutionMode::Rdd,
        kind: BuiltinKind::Distributed(io::parallelize_fn),
    },
    BuiltinFunction {
        name: "json-lines",
        min_arity: 1,
        max_arity: 2,
        mode: ExecutionMode::Rdd,
        kind: BuiltinKind::Distributed(io::json_lines_fn),
    },
    BuiltinFunction {
        name: "structured-json-lines",
        min_arity: 1,
        max_arity: 1,
        mode: ExecutionMode::DataFrame,
        kind: BuiltinKind::Distributed(io::structured_json_lines_fn),
    },
];

fn is_builtin_namespace(name: &Name) -> bool {
    name.namespace.is_none() || name.is_in_namespace(FN_NS)
}

/// Builtin called `name` accepting `arity` arguments.
pub fn lookup_builtin(name: &Name, arity: usize) -> Option<&'static BuiltinFunction> {
    if !is_builtin_namespace(name) {
        return None;
    }
    BUILTINS.iter().find(|f| f.name == name.local_name() && f.accepts_arity(arity))
}

/// Whether any builtin is called `name`, regardless of arity.
pub fn is_builtin_name(name: &Name) -> bool {
    is_builtin_namespace(name) && BUILTINS.iter().any(|f| f.name == name.local_name())
}

/// Names of all builtins, for diagnostics.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|f| f.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("concat", 0, true)]
    #[case("concat", 100, true)]
    #[case("concat", 101, false)]
    #[case("substring", 1, false)]
    #[case("substring", 3, true)]
    #[case("nope", 1, false)]
    fn arity_ranges(#[case] name: &str, #[case] arity: usize, #[case] found: bool) {
        assert_eq!(lookup_builtin(&Name::local(name), arity).is_some(), found);
    }

    #[test]
    fn namespaced_names_resolve_only_in_builtin_namespace() {
        assert!(lookup_builtin(&Name::builtin("count"), 1).is_some());
        assert!(lookup_builtin(&Name::new(Some("urn:mine"), "count"), 1).is_none());
        assert!(is_builtin_name(&Name::local("translate")));
    }

    #[test]
    fn input_functions_declare_distributed_modes() {
        let mode = |n: &str, arity| lookup_builtin(&Name::local(n), arity).map(|f| f.mode);
        assert_eq!(mode("parallelize", 1), Some(ExecutionMode::Rdd));
        assert_eq!(mode("json-lines", 1), Some(ExecutionMode::Rdd));
        assert_eq!(mode("structured-json-lines", 1), Some(ExecutionMode::DataFrame));
        assert_eq!(mode("count", 1), Some(ExecutionMode::Local));
    }
}

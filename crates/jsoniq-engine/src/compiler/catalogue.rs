//! Per-compilation record of user-defined functions.
//!
//! The catalogue is threaded through both static passes. The first pass
//! fills it (declarations, parameter modes observed at call sites, body
//! modes); the second pass reads the hoisted facts so that calls may precede
//! declarations and parameters of functions called with distributed
//! arguments stay distributed.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::Param;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::mode::ExecutionMode;
use crate::name::FunctionIdentifier;
use crate::types::SequenceType;

#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredFunction {
    pub params: Vec<Param>,
    pub return_type: SequenceType,
    pub location: SourceLocation,
}

#[derive(Debug, Default)]
pub struct FunctionCatalogue {
    declared: BTreeMap<FunctionIdentifier, DeclaredFunction>,
    /// Declarations seen since the last [`FunctionCatalogue::begin_pass`].
    declared_this_pass: BTreeSet<FunctionIdentifier>,
    parameter_modes: BTreeMap<FunctionIdentifier, Vec<ExecutionMode>>,
    body_modes: BTreeMap<FunctionIdentifier, ExecutionMode>,
}

impl FunctionCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_pass(&mut self) {
        self.declared_this_pass.clear();
    }

    /// Register a declaration. A second declaration of the same name and
    /// arity within one pass is `XQST0034` unless `suppress_collisions`.
    pub fn declare(
        &mut self,
        identifier: FunctionIdentifier,
        declaration: DeclaredFunction,
        suppress_collisions: bool,
    ) -> Result<()> {
        if !self.declared_this_pass.insert(identifier.clone()) && !suppress_collisions {
            return Err(Error::from_code(
                ErrorCode::XQST0034,
                format!("Function {identifier} is declared more than once"),
            )
            .at(declaration.location));
        }
        self.declared.insert(identifier, declaration);
        Ok(())
    }

    pub fn get(&self, identifier: &FunctionIdentifier) -> Option<&DeclaredFunction> {
        self.declared.get(identifier)
    }

    pub fn contains(&self, identifier: &FunctionIdentifier) -> bool {
        self.declared.contains_key(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &FunctionIdentifier> {
        self.declared.keys()
    }

    /// Merge the argument modes of one call site. Positions on which call
    /// sites disagree fall back to local.
    pub fn record_call(&mut self, identifier: &FunctionIdentifier, modes: Vec<ExecutionMode>) {
        match self.parameter_modes.get_mut(identifier) {
            Some(existing) => {
                for (current, observed) in existing.iter_mut().zip(modes) {
                    if *current != observed {
                        *current = ExecutionMode::Local;
                    }
                }
            }
            None => {
                self.parameter_modes.insert(identifier.clone(), modes);
            }
        }
    }

    /// Storage mode of each parameter of `identifier`. Parameters that hold
    /// at most one item, and functions never called directly, are local.
    pub fn parameter_modes(&self, identifier: &FunctionIdentifier) -> Vec<ExecutionMode> {
        let Some(declaration) = self.declared.get(identifier) else {
            return vec![ExecutionMode::Local; identifier.arity];
        };
        let observed = self.parameter_modes.get(identifier);
        declaration
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                if param.seq_type.prefers_local() {
                    return ExecutionMode::Local;
                }
                observed.and_then(|modes| modes.get(i).copied()).unwrap_or(ExecutionMode::Local)
            })
            .collect()
    }

    pub fn register_body_mode(&mut self, identifier: &FunctionIdentifier, mode: ExecutionMode) {
        tracing::debug!(function = %identifier, %mode, "registered function body mode");
        self.body_modes.insert(identifier.clone(), mode);
    }

    /// Mode of the function body, `Unset` until its declaration was visited.
    pub fn body_mode(&self, identifier: &FunctionIdentifier) -> ExecutionMode {
        self.body_modes.get(identifier).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::mode::ExecutionMode::{Local, Rdd, Unset};
    use crate::name::Name;
    use crate::types::{Arity, ItemType};

    fn declaration(types: &[SequenceType]) -> DeclaredFunction {
        DeclaredFunction {
            params: types
                .iter()
                .enumerate()
                .map(|(i, t)| Param { name: Name::local(&format!("p{i}")), seq_type: *t })
                .collect(),
            return_type: SequenceType::ITEM_STAR,
            location: SourceLocation::unknown(),
        }
    }

    fn id(arity: usize) -> FunctionIdentifier {
        FunctionIdentifier::new(Name::local("f"), arity)
    }

    #[rstest]
    fn duplicates_are_reported_once_per_pass() {
        let mut catalogue = FunctionCatalogue::new();
        catalogue.declare(id(1), declaration(&[SequenceType::ITEM_STAR]), false).unwrap();
        let err = catalogue.declare(id(1), declaration(&[SequenceType::ITEM_STAR]), false).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0034);

        catalogue.begin_pass();
        catalogue.declare(id(1), declaration(&[SequenceType::ITEM_STAR]), false).unwrap();
        catalogue.declare(id(1), declaration(&[SequenceType::ITEM_STAR]), true).unwrap();
    }

    #[rstest]
    fn different_arities_are_different_functions() {
        let mut catalogue = FunctionCatalogue::new();
        catalogue.declare(id(1), declaration(&[SequenceType::ITEM_STAR]), false).unwrap();
        catalogue.declare(id(2), declaration(&[SequenceType::ITEM_STAR; 2]), false).unwrap();
        assert_eq!(catalogue.identifiers().count(), 2);
    }

    #[rstest]
    fn disagreeing_call_sites_fall_back_to_local() {
        let mut catalogue = FunctionCatalogue::new();
        catalogue.declare(id(2), declaration(&[SequenceType::ITEM_STAR; 2]), false).unwrap();
        catalogue.record_call(&id(2), vec![Rdd, Rdd]);
        catalogue.record_call(&id(2), vec![Rdd, Local]);
        assert_eq!(catalogue.parameter_modes(&id(2)), vec![Rdd, Local]);
    }

    #[rstest]
    fn singleton_parameters_are_always_local() {
        let mut catalogue = FunctionCatalogue::new();
        let single = SequenceType::new(ItemType::Integer, Arity::One);
        catalogue.declare(id(2), declaration(&[single, SequenceType::Empty]), false).unwrap();
        catalogue.record_call(&id(2), vec![Rdd, Rdd]);
        assert_eq!(catalogue.parameter_modes(&id(2)), vec![Local, Local]);
    }

    #[rstest]
    fn body_mode_is_unset_until_registered() {
        let mut catalogue = FunctionCatalogue::new();
        assert_eq!(catalogue.body_mode(&id(0)), Unset);
        catalogue.register_body_mode(&id(0), Rdd);
        assert_eq!(catalogue.body_mode(&id(0)), Rdd);
    }
}

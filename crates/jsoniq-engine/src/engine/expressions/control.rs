//! Conditional, switch, typeswitch and quantified expressions.

use crate::ast::QuantifierKind;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Collection;
use crate::engine::iterator::{
    BoxedIterator, Compute, ItemSource, RuntimeIterator, ebv_of, materialize, materialize_at_most_one,
};
use crate::engine::runtime::Runtime;
use crate::error::{Error, Result, SourceLocation};
use crate::item::Item;
use crate::name::Name;
use crate::types::SequenceType;

/// Streams the branch chosen in `start`.
#[derive(Debug)]
struct Branches {
    branches: Vec<BoxedIterator>,
    active: Option<usize>,
}

impl Branches {
    fn new(branches: Vec<BoxedIterator>) -> Self {
        Self { branches, active: None }
    }

    fn open(&mut self, rt: &mut Runtime, ctx: DynamicContextId, index: usize) -> Result<()> {
        self.active = Some(index);
        match self.branches.get_mut(index) {
            Some(branch) => branch.open(rt, ctx),
            None => Err(Error::internal(format!("branch {index} does not exist"))),
        }
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        match self.active.and_then(|i| self.branches.get_mut(i)) {
            Some(branch) if branch.has_next() => branch.next(rt).map(Some),
            _ => Ok(None),
        }
    }

    fn stop(&mut self, rt: &mut Runtime) {
        if let Some(branch) = self.active.take().and_then(|i| self.branches.get_mut(i)) {
            branch.close(rt);
        }
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId, index: usize) -> Result<Option<Collection>> {
        match self.branches.get_mut(index) {
            Some(branch) => branch.get_collection(rt, ctx).map(Some),
            None => Err(Error::internal(format!("branch {index} does not exist"))),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IfSource {
    condition: BoxedIterator,
    branches: Branches,
}

impl IfSource {
    pub(crate) fn new(condition: BoxedIterator, then_branch: BoxedIterator, else_branch: BoxedIterator) -> Self {
        Self { condition, branches: Branches::new(vec![then_branch, else_branch]) }
    }

    fn choose(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<usize> {
        Ok(if ebv_of(self.condition.as_mut(), rt, ctx)? { 0 } else { 1 })
    }
}

impl ItemSource for IfSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let branch = self.choose(rt, ctx)?;
        self.branches.open(rt, ctx, branch)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        self.branches.pull(rt)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.branches.stop(rt);
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let branch = self.choose(rt, ctx)?;
        self.branches.collection(rt, ctx, branch)
    }
}

/// Cases are `(tests, result)` pairs; the default is the last branch.
#[derive(Debug)]
pub(crate) struct SwitchSource {
    test: BoxedIterator,
    case_tests: Vec<Vec<BoxedIterator>>,
    branches: Branches,
    location: SourceLocation,
}

impl SwitchSource {
    pub(crate) fn new(
        test: BoxedIterator,
        cases: Vec<(Vec<BoxedIterator>, BoxedIterator)>,
        default: BoxedIterator,
        location: SourceLocation,
    ) -> Self {
        let (case_tests, mut results): (Vec<_>, Vec<_>) = cases.into_iter().unzip();
        results.push(default);
        Self { test, case_tests, branches: Branches::new(results), location }
    }

    fn switch_value(
        iter: &mut dyn RuntimeIterator,
        rt: &mut Runtime,
        ctx: DynamicContextId,
        location: SourceLocation,
    ) -> Result<Option<Item>> {
        match materialize_at_most_one(iter, rt, ctx, "switch")? {
            Some(item) if !item.is_atomic() => Err(Error::unexpected_type(
                format!("Switch operands must be atomic, got {}", item.dynamic_type()),
                location,
            )),
            other => Ok(other),
        }
    }

    fn choose(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<usize> {
        let value = Self::switch_value(self.test.as_mut(), rt, ctx, self.location)?;
        for (index, tests) in self.case_tests.iter_mut().enumerate() {
            for test in tests {
                let candidate = Self::switch_value(test.as_mut(), rt, ctx, self.location)?;
                let matched = match (&value, &candidate) {
                    (None, None) => true,
                    (Some(v), Some(c)) => v.deep_equals(c),
                    _ => false,
                };
                if matched {
                    return Ok(index);
                }
            }
        }
        Ok(self.case_tests.len())
    }
}

impl ItemSource for SwitchSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let branch = self.choose(rt, ctx)?;
        self.branches.open(rt, ctx, branch)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        self.branches.pull(rt)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.branches.stop(rt);
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let branch = self.choose(rt, ctx)?;
        self.branches.collection(rt, ctx, branch)
    }
}

#[derive(Debug)]
pub(crate) struct TypeswitchCaseTypes {
    pub(crate) var: Option<Name>,
    pub(crate) types: Vec<SequenceType>,
}

/// Binds the operand to the matching case's variable in a fresh frame.
#[derive(Debug)]
pub(crate) struct TypeswitchSource {
    operand: BoxedIterator,
    cases: Vec<TypeswitchCaseTypes>,
    default_var: Option<Name>,
    branches: Branches,
    frame: Option<DynamicContextId>,
}

impl TypeswitchSource {
    pub(crate) fn new(
        operand: BoxedIterator,
        cases: Vec<(TypeswitchCaseTypes, BoxedIterator)>,
        default_var: Option<Name>,
        default: BoxedIterator,
    ) -> Self {
        let (cases, mut results): (Vec<_>, Vec<_>) = cases.into_iter().unzip();
        results.push(default);
        Self { operand, cases, default_var, branches: Branches::new(results), frame: None }
    }

    /// Allocate the frame for the chosen case and return the branch index.
    fn bind(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<(usize, DynamicContextId)> {
        let value = materialize(self.operand.as_mut(), rt, ctx)?;
        let index = self
            .cases
            .iter()
            .position(|case| case.types.iter().any(|t| t.matches(&value)))
            .unwrap_or(self.cases.len());
        let var = match self.cases.get(index) {
            Some(case) => case.var.clone(),
            None => self.default_var.clone(),
        };
        let frame = rt.contexts.new_child(ctx);
        if let Some(var) = var {
            rt.contexts.bind_items(frame, var, value);
        }
        Ok((index, frame))
    }
}

impl ItemSource for TypeswitchSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let (index, frame) = self.bind(rt, ctx)?;
        self.frame = Some(frame);
        self.branches.open(rt, frame, index)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        self.branches.pull(rt)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.branches.stop(rt);
        if let Some(frame) = self.frame.take() {
            rt.contexts.release(frame);
        }
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let (index, frame) = self.bind(rt, ctx)?;
        let result = self.branches.collection(rt, frame, index);
        rt.contexts.release(frame);
        result
    }
}

#[derive(Debug)]
pub(crate) struct QuantifiedVariable {
    pub(crate) var: Name,
    pub(crate) seq_type: Option<SequenceType>,
    pub(crate) expr: BoxedIterator,
}

#[derive(Debug)]
pub(crate) struct Quantified {
    pub(crate) kind: QuantifierKind,
    pub(crate) bindings: Vec<QuantifiedVariable>,
    pub(crate) satisfies: BoxedIterator,
    pub(crate) location: SourceLocation,
}

impl Quantified {
    fn holds(&mut self, rt: &mut Runtime, ctx: DynamicContextId, level: usize) -> Result<bool> {
        let Some(binding) = self.bindings.get_mut(level) else {
            return ebv_of(self.satisfies.as_mut(), rt, ctx);
        };
        let items = materialize(binding.expr.as_mut(), rt, ctx)?;
        let var = binding.var.clone();
        let seq_type = binding.seq_type;
        let frame = rt.contexts.new_child(ctx);
        let result: Result<bool> = (|| {
            for item in items {
                if let Some(ty) = seq_type.and_then(|t| t.item_type()) {
                    if !ty.matches(&item) {
                        return Err(Error::unexpected_type(
                            format!("${var} expects {ty}, got {}", item.dynamic_type()),
                            self.location,
                        ));
                    }
                }
                rt.contexts.bind_items(frame, var.clone(), vec![item]);
                let holds = self.holds(rt, frame, level + 1)?;
                match self.kind {
                    QuantifierKind::Some if holds => return Ok(true),
                    QuantifierKind::Every if !holds => return Ok(false),
                    _ => {}
                }
            }
            Ok(self.kind == QuantifierKind::Every)
        })();
        rt.contexts.release(frame);
        result
    }
}

impl Compute for Quantified {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        Ok(vec![Item::Boolean(self.holds(rt, ctx, 0)?)])
    }
}

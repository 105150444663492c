//! FLWOR clauses as a pipeline of tuple iterators.
//!
//! Each clause pulls tuples from the clause before it (the first clause
//! starts from a single empty tuple) and the return clause turns the final
//! tuple stream back into items. A clause in the tabular regime computes its
//! whole output as a [`Table`] instead; consumed locally, that table is
//! buffered and streamed row by row.

use std::collections::BTreeSet;
use std::fmt;

use crate::ast::{Clause, ClauseKind, Flwor};
use crate::compiler::dependencies::{VariableDependencies, VariableDependency, clause_dependencies, merge_all};
use crate::engine::builder::{build_iterator, effective_mode};
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::iterator::{BoxedIterator, IteratorMeta, IteratorState, StreamIterator};
use crate::engine::runtime::{FunctionRegistry, Runtime};
use crate::error::{Error, Result, SourceLocation};
use crate::mode::{ExecutionMode, for_clause_mode, inherited_clause_mode};
use crate::name::Name;

mod count;
mod for_clause;
mod group_by;
mod let_clause;
mod order_by;
pub mod planner;
mod return_clause;
pub mod tuple;
mod where_clause;

pub use planner::{ForStrategy, JoinShape, plan_for_clause};
use tuple::FlworTuple;

pub type BoxedTupleIterator = Box<dyn TupleIterator>;

/// Lifecycle of a clause iterator; mirrors [`crate::engine::iterator::RuntimeIterator`]
/// with tuples in place of items.
pub trait TupleIterator: fmt::Debug {
    fn open(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()>;

    fn has_next(&self) -> bool;

    fn next(&mut self, rt: &mut Runtime) -> Result<FlworTuple>;

    fn reset(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()>;

    fn close(&mut self, rt: &mut Runtime);

    fn is_open(&self) -> bool;

    fn execution_mode(&self) -> ExecutionMode;

    fn location(&self) -> SourceLocation;

    /// Every variable bound by this clause or an earlier one.
    fn bound_variables(&self) -> &BTreeSet<Name>;

    /// Variables the clause's own expressions read.
    fn variable_dependencies(&self) -> &VariableDependencies;

    /// What the previous clause must provide so that this clause can provide
    /// `parent`: the parent's needs minus what this clause binds, plus what
    /// this clause reads.
    fn projection(&self, parent: &VariableDependencies) -> VariableDependencies;

    /// The clause's output as a table restricted to `projection`.
    fn get_table(&mut self, rt: &mut Runtime, ctx: DynamicContextId, projection: &VariableDependencies) -> Result<Table>;
}

/// Static facts about a clause iterator.
#[derive(Debug, Clone)]
pub(crate) struct ClauseMeta {
    pub(crate) construct: &'static str,
    pub(crate) location: SourceLocation,
    pub(crate) mode: ExecutionMode,
    pub(crate) own: BTreeSet<Name>,
    pub(crate) bound: BTreeSet<Name>,
    pub(crate) dependencies: VariableDependencies,
}

/// Clause-specific part of a clause iterator.
pub(crate) trait TupleSource: fmt::Debug {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()>;

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>>;

    fn stop(&mut self, rt: &mut Runtime);

    /// Tabular evaluation. `upstream` is what to request from the previous
    /// clause. `None` falls back to local evaluation.
    fn table(
        &mut self,
        _rt: &mut Runtime,
        _ctx: DynamicContextId,
        _upstream: &VariableDependencies,
    ) -> Result<Option<Table>> {
        Ok(None)
    }
}

#[derive(Debug)]
pub(crate) struct ClauseIterator<S> {
    source: S,
    meta: ClauseMeta,
    state: IteratorState<FlworTuple>,
    buffered: Option<std::vec::IntoIter<FlworTuple>>,
}

impl<S: TupleSource + 'static> ClauseIterator<S> {
    pub(crate) fn boxed(source: S, meta: ClauseMeta) -> BoxedTupleIterator {
        Box::new(Self { source, meta, state: IteratorState::Closed, buffered: None })
    }

    fn fetch(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        match &mut self.buffered {
            Some(rows) => Ok(rows.next()),
            None => self.source.pull(rt),
        }
    }

    fn everything(&self) -> VariableDependencies {
        self.meta.bound.iter().map(|name| (name.clone(), VariableDependency::Full)).collect()
    }
}

impl<S: TupleSource + 'static> TupleIterator for ClauseIterator<S> {
    fn open(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        if !self.state.is_closed() {
            return Err(Error::internal(format!("{} opened twice", self.meta.construct)).at(self.meta.location));
        }
        tracing::trace!(construct = self.meta.construct, mode = %self.meta.mode, "open");
        if self.meta.mode.is_dataframe() {
            let upstream = self.projection(&self.everything());
            if let Some(table) = self.source.table(rt, ctx, &upstream).map_err(|e| e.at(self.meta.location))? {
                self.buffered = Some(table.collect_rows().into_iter());
            }
        }
        if self.buffered.is_none() {
            if let Err(e) = self.source.start(rt, ctx) {
                self.source.stop(rt);
                return Err(e.at(self.meta.location));
            }
        }
        self.state = IteratorState::Exhausted;
        match self.fetch(rt) {
            Ok(first) => {
                self.state = IteratorState::primed(first);
                Ok(())
            }
            Err(e) => {
                self.close(rt);
                Err(e.at(self.meta.location))
            }
        }
    }

    fn has_next(&self) -> bool {
        self.state.has_pending()
    }

    fn next(&mut self, rt: &mut Runtime) -> Result<FlworTuple> {
        let Some(tuple) = self.state.take_pending() else {
            return Err(Error::iterator_flow(self.meta.construct, self.meta.location));
        };
        let upcoming = self.fetch(rt).map_err(|e| e.at(self.meta.location))?;
        self.state = IteratorState::primed(upcoming);
        Ok(tuple)
    }

    fn reset(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.close(rt);
        self.open(rt, ctx)
    }

    fn close(&mut self, rt: &mut Runtime) {
        if self.state.is_closed() {
            return;
        }
        tracing::trace!(construct = self.meta.construct, "close");
        if self.buffered.take().is_none() {
            self.source.stop(rt);
        }
        self.state = IteratorState::Closed;
    }

    fn is_open(&self) -> bool {
        !self.state.is_closed()
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.meta.mode
    }

    fn location(&self) -> SourceLocation {
        self.meta.location
    }

    fn bound_variables(&self) -> &BTreeSet<Name> {
        &self.meta.bound
    }

    fn variable_dependencies(&self) -> &VariableDependencies {
        &self.meta.dependencies
    }

    fn projection(&self, parent: &VariableDependencies) -> VariableDependencies {
        let mut upstream: VariableDependencies =
            parent.iter().filter(|(name, _)| !self.meta.own.contains(*name)).map(|(n, k)| (n.clone(), *k)).collect();
        merge_all(&mut upstream, self.meta.dependencies.clone());
        upstream
    }

    fn get_table(&mut self, rt: &mut Runtime, ctx: DynamicContextId, projection: &VariableDependencies) -> Result<Table> {
        if self.meta.mode.is_dataframe() {
            let upstream = self.projection(projection);
            if let Some(table) = self.source.table(rt, ctx, &upstream).map_err(|e| e.at(self.meta.location))? {
                tracing::debug!(construct = self.meta.construct, columns = %table.describe_columns(), "computed table");
                return Ok(table.project(projection));
            }
        }
        let rows = materialize_tuples(self, rt, ctx)?;
        let columns = self.meta.bound.iter().filter(|c| projection.contains_key(*c)).cloned().collect();
        let rows = rows.iter().map(|row| row.project(projection)).collect();
        Ok(Table::from_rows(columns, rows, rt.parallelism()))
    }
}

/// Run `iter` to completion against `ctx`, closing it afterwards.
pub fn materialize_tuples(
    iter: &mut dyn TupleIterator,
    rt: &mut Runtime,
    ctx: DynamicContextId,
) -> Result<Vec<FlworTuple>> {
    iter.open(rt, ctx)?;
    let mut rows = Vec::new();
    let result: Result<()> = (|| {
        while iter.has_next() {
            rows.push(iter.next(rt)?);
        }
        Ok(())
    })();
    iter.close(rt);
    result.map(|()| rows)
}

/// Tuples entering a clause: the previous clause's output, or a single empty
/// tuple for the first clause.
#[derive(Debug)]
pub(crate) struct TupleInput {
    previous: Option<BoxedTupleIterator>,
    initial_pending: bool,
}

impl TupleInput {
    pub(crate) fn new(previous: Option<BoxedTupleIterator>) -> Self {
        Self { previous, initial_pending: false }
    }

    pub(crate) fn mode(&self) -> Option<ExecutionMode> {
        self.previous.as_ref().map(|p| p.execution_mode())
    }

    pub(crate) fn is_tabular(&self) -> bool {
        self.mode().is_some_and(ExecutionMode::is_dataframe)
    }

    pub(crate) fn open(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        match &mut self.previous {
            Some(previous) => previous.open(rt, ctx),
            None => {
                self.initial_pending = true;
                Ok(())
            }
        }
    }

    pub(crate) fn next(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        match &mut self.previous {
            Some(previous) if previous.has_next() => previous.next(rt).map(Some),
            Some(_) => Ok(None),
            None => Ok(std::mem::take(&mut self.initial_pending).then(FlworTuple::new)),
        }
    }

    pub(crate) fn close(&mut self, rt: &mut Runtime) {
        if let Some(previous) = &mut self.previous {
            previous.close(rt);
        }
        self.initial_pending = false;
    }

    /// Every input tuple, materialised.
    pub(crate) fn all(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<FlworTuple>> {
        match &mut self.previous {
            Some(previous) => materialize_tuples(previous.as_mut(), rt, ctx),
            None => Ok(vec![FlworTuple::new()]),
        }
    }

    /// The input as a table restricted to `projection`.
    pub(crate) fn table(
        &mut self,
        rt: &mut Runtime,
        ctx: DynamicContextId,
        projection: &VariableDependencies,
    ) -> Result<Table> {
        match &mut self.previous {
            Some(previous) => previous.get_table(rt, ctx, projection),
            None => Ok(Table::from_rows(Vec::new(), vec![FlworTuple::new()], 1)),
        }
    }
}

/// Frame a clause binds its input tuples into.
#[derive(Debug, Default)]
pub(crate) struct TupleFrame(Option<DynamicContextId>);

impl TupleFrame {
    pub(crate) fn enter(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> DynamicContextId {
        if let Some(previous) = self.0.take() {
            rt.contexts.release(previous);
        }
        let frame = rt.contexts.new_child(ctx);
        self.0 = Some(frame);
        frame
    }

    pub(crate) fn get(&self) -> Option<DynamicContextId> {
        self.0
    }

    pub(crate) fn leave(&mut self, rt: &mut Runtime) {
        if let Some(frame) = self.0.take() {
            rt.contexts.release(frame);
        }
    }
}

/// Run `f` with a fresh child frame of `ctx`, releasing it afterwards.
pub(crate) fn with_frame<T>(
    rt: &mut Runtime,
    ctx: DynamicContextId,
    f: impl FnOnce(&mut Runtime, DynamicContextId) -> Result<T>,
) -> Result<T> {
    let frame = rt.contexts.new_child(ctx);
    let result = f(rt, frame);
    rt.contexts.release(frame);
    result
}

fn clause_meta(
    clause: &Clause,
    construct: &'static str,
    mode: ExecutionMode,
    bound_before: &BTreeSet<Name>,
) -> ClauseMeta {
    let own: BTreeSet<Name> = clause.bound_variables().into_iter().cloned().collect();
    let bound = bound_before.union(&own).cloned().collect();
    ClauseMeta { construct, location: clause.location, mode, own, bound, dependencies: clause_dependencies(clause) }
}

fn build_clause(
    clause: &Clause,
    previous: Option<BoxedTupleIterator>,
    bound_before: &BTreeSet<Name>,
    functions: &FunctionRegistry,
) -> Result<BoxedTupleIterator> {
    let previous_mode = previous.as_ref().map(|p| p.execution_mode());
    let input = TupleInput::new(previous);
    Ok(match &clause.kind {
        ClauseKind::For(for_clause) => {
            let expr_mode = effective_mode(for_clause.expr.mode);
            let strategy =
                plan_for_clause(previous_mode, for_clause, expr_mode, bound_before, clause.location)?;
            let mode = for_clause_mode(previous_mode, expr_mode);
            let meta = clause_meta(clause, "for clause", mode, bound_before);
            let source = for_clause::ForSource::new(
                input,
                for_clause,
                strategy,
                bound_before.clone(),
                clause.location,
                functions,
            )?;
            ClauseIterator::boxed(source, meta)
        }
        ClauseKind::Let(let_clause) => {
            let meta = clause_meta(clause, "let clause", inherited_clause_mode(previous_mode), bound_before);
            let expr = build_iterator(&let_clause.expr, functions)?;
            let source = let_clause::LetSource::new(input, let_clause.var.clone(), let_clause.seq_type, expr, clause.location);
            ClauseIterator::boxed(source, meta)
        }
        ClauseKind::Where(condition) => {
            let meta = clause_meta(clause, "where clause", inherited_clause_mode(previous_mode), bound_before);
            let source = where_clause::WhereSource::new(input, build_iterator(condition, functions)?);
            ClauseIterator::boxed(source, meta)
        }
        ClauseKind::GroupBy(specs) => {
            let meta = clause_meta(clause, "group by clause", inherited_clause_mode(previous_mode), bound_before);
            let keys = specs
                .iter()
                .map(|spec| {
                    let expr = spec.expr.as_ref().map(|e| build_iterator(e, functions)).transpose()?;
                    Ok(group_by::GroupingKey { var: spec.var.clone(), seq_type: spec.seq_type, expr })
                })
                .collect::<Result<Vec<_>>>()?;
            ClauseIterator::boxed(group_by::GroupBySource::new(input, keys, clause.location), meta)
        }
        ClauseKind::OrderBy { specs, .. } => {
            let meta = clause_meta(clause, "order by clause", inherited_clause_mode(previous_mode), bound_before);
            let keys = specs
                .iter()
                .map(|spec| {
                    Ok(order_by::OrderingKey {
                        expr: build_iterator(&spec.expr, functions)?,
                        descending: spec.descending,
                        empty_greatest: spec.empty_greatest,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            ClauseIterator::boxed(order_by::OrderBySource::new(input, keys, clause.location), meta)
        }
        ClauseKind::Count(var) => {
            let meta = clause_meta(clause, "count clause", inherited_clause_mode(previous_mode), bound_before);
            ClauseIterator::boxed(count::CountSource::new(input, var.clone()), meta)
        }
    })
}

/// Chain the clauses of `flwor` and wrap them with the return expression.
pub(crate) fn build_flwor(flwor: &Flwor, meta: IteratorMeta, functions: &FunctionRegistry) -> Result<BoxedIterator> {
    let mut previous: Option<BoxedTupleIterator> = None;
    let mut bound = BTreeSet::new();
    for clause in &flwor.clauses {
        let built = build_clause(clause, previous.take(), &bound, functions)?;
        bound.clone_from(built.bound_variables());
        previous = Some(built);
    }
    let Some(last) = previous else {
        return Err(Error::internal("FLWOR expression without clauses").at(meta.location));
    };
    let return_expr = build_iterator(&flwor.return_expr, functions)?;
    Ok(StreamIterator::boxed(return_clause::ReturnSource::new(last, return_expr), meta))
}

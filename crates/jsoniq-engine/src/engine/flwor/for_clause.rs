use std::collections::{BTreeSet, HashMap};

use super::planner::{ForStrategy, JoinShape};
use super::tuple::FlworTuple;
use super::{TupleFrame, TupleInput, TupleSource, with_frame};
use crate::ast::{ExprKind, ForClause};
use crate::compiler::dependencies::VariableDependencies;
use crate::engine::builder::build_iterator;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::expressions::postfix::accepts;
use crate::engine::iterator::{BoxedIterator, RuntimeIterator, materialize};
use crate::engine::runtime::{FunctionRegistry, Runtime};
use crate::error::{Error, Result, SourceLocation};
use crate::item::{AtomicKey, Item};
use crate::name::Name;
use crate::types::SequenceType;

fn position_item(position: usize) -> Item {
    Item::Integer(i64::try_from(position).unwrap_or(i64::MAX))
}

/// How the clause extends a tuple with one binding.
#[derive(Debug, Clone)]
struct Binder {
    var: Name,
    positional: Option<Name>,
    allowing_empty: bool,
    seq_type: Option<SequenceType>,
    location: SourceLocation,
}

impl Binder {
    fn bind(&self, tuple: &FlworTuple, item: Item, position: usize) -> Result<FlworTuple> {
        if let Some(seq_type) = &self.seq_type {
            if !seq_type.matches(std::slice::from_ref(&item)) {
                return Err(Error::unexpected_type(
                    format!("Invalid item for ${}: expected {seq_type}, got {}", self.var, item.dynamic_type()),
                    self.location,
                ));
            }
        }
        let mut out = tuple.with_items(self.var.clone(), vec![item]);
        if let Some(positional) = &self.positional {
            out = out.with_items(positional.clone(), vec![position_item(position)]);
        }
        Ok(out)
    }

    /// `allowing empty` binding: the empty sequence at position 0.
    fn bind_empty(&self, tuple: &FlworTuple) -> FlworTuple {
        let mut out = tuple.with_items(self.var.clone(), Vec::new());
        if let Some(positional) = &self.positional {
            out = out.with_items(positional.clone(), vec![position_item(0)]);
        }
        out
    }

    /// One output tuple per item, or the empty binding when allowed.
    fn bind_all(&self, tuple: &FlworTuple, items: Vec<Item>, out: &mut Vec<FlworTuple>) -> Result<()> {
        if items.is_empty() {
            if self.allowing_empty {
                out.push(self.bind_empty(tuple));
            }
            return Ok(());
        }
        for (i, item) in items.into_iter().enumerate() {
            out.push(self.bind(tuple, item, i + 1)?);
        }
        Ok(())
    }

    fn columns<'a>(&self, upstream: impl IntoIterator<Item = &'a Name>) -> Vec<Name> {
        let own: Vec<&Name> = std::iter::once(&self.var).chain(self.positional.as_ref()).collect();
        let mut columns: Vec<Name> = upstream.into_iter().filter(|c| !own.contains(c)).cloned().collect();
        columns.extend(own.into_iter().cloned());
        columns
    }
}

#[derive(Debug)]
enum Plan {
    Local,
    Starting,
    Union,
    Explode,
    Cartesian,
    EquiJoin { sequence: BoxedIterator, left_key: BoxedIterator, right_key: BoxedIterator, general: bool, outer: bool },
    ThetaJoin { sequence: BoxedIterator, predicate: BoxedIterator, outer: bool },
}

/// `for $x [at $i] [allowing empty] in expr`.
#[derive(Debug)]
pub(crate) struct ForSource {
    input: TupleInput,
    binder: Binder,
    expr: BoxedIterator,
    plan: Plan,
    /// Variables bound before this clause.
    previous_bound: BTreeSet<Name>,
    frame: TupleFrame,
    current: Option<FlworTuple>,
    position: usize,
}

impl ForSource {
    pub(crate) fn new(
        input: TupleInput,
        clause: &ForClause,
        strategy: ForStrategy,
        previous_bound: BTreeSet<Name>,
        location: SourceLocation,
        functions: &FunctionRegistry,
    ) -> Result<Self> {
        let plan = match strategy {
            ForStrategy::Local => Plan::Local,
            ForStrategy::Starting => Plan::Starting,
            ForStrategy::Union => Plan::Union,
            ForStrategy::Explode => Plan::Explode,
            ForStrategy::Cartesian => Plan::Cartesian,
            ForStrategy::Join { shape, outer } => {
                let ExprKind::Predicate { sequence, predicate } = &clause.expr.kind else {
                    return Err(Error::job_within_a_job(location));
                };
                let sequence = build_iterator(sequence, functions)?;
                match shape {
                    JoinShape::Equi { left_key, right_key, general } => Plan::EquiJoin {
                        sequence,
                        left_key: build_iterator(&left_key, functions)?,
                        right_key: build_iterator(&right_key, functions)?,
                        general,
                        outer,
                    },
                    JoinShape::Theta => {
                        Plan::ThetaJoin { sequence, predicate: build_iterator(predicate, functions)?, outer }
                    }
                }
            }
        };
        let binder = Binder {
            var: clause.var.clone(),
            positional: clause.positional.clone(),
            allowing_empty: clause.allowing_empty,
            seq_type: clause.seq_type,
            location,
        };
        Ok(Self {
            input,
            binder,
            expr: build_iterator(&clause.expr, functions)?,
            plan,
            previous_bound,
            frame: TupleFrame::default(),
            current: None,
            position: 0,
        })
    }
}

impl TupleSource for ForSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.input.open(rt, ctx)?;
        self.frame.enter(rt, ctx);
        self.current = None;
        self.position = 0;
        Ok(())
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        let Some(frame) = self.frame.get() else { return Ok(None) };
        loop {
            if let Some(input) = &self.current {
                if self.expr.has_next() {
                    let item = self.expr.next(rt)?;
                    self.position += 1;
                    return self.binder.bind(input, item, self.position).map(Some);
                }
                let empty = self.binder.allowing_empty && self.position == 0;
                let exhausted = self.current.take();
                if let (true, Some(input)) = (empty, exhausted) {
                    return Ok(Some(self.binder.bind_empty(&input)));
                }
            }
            let Some(next_input) = self.input.next(rt)? else { return Ok(None) };
            rt.contexts.rebind_tuple(frame, &next_input);
            if self.expr.is_open() {
                self.expr.reset(rt, frame)?;
            } else {
                self.expr.open(rt, frame)?;
            }
            self.position = 0;
            self.current = Some(next_input);
        }
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.expr.close(rt);
        self.input.close(rt);
        self.frame.leave(rt);
        self.current = None;
    }

    fn table(
        &mut self,
        rt: &mut Runtime,
        ctx: DynamicContextId,
        upstream: &VariableDependencies,
    ) -> Result<Option<Table>> {
        let binder = &self.binder;
        let expr = self.expr.as_mut();
        let table = match &mut self.plan {
            Plan::Local => return Ok(None),
            Plan::Starting => starting(binder, expr, rt, ctx)?,
            Plan::Union => {
                let tuples = self.input.all(rt, ctx)?;
                let columns =
                    binder.columns(self.previous_bound.iter().filter(|name| upstream.contains_key(*name)));
                union(binder, expr, &tuples, columns, upstream, rt, ctx)?
            }
            Plan::Explode => {
                let left = self.input.table(rt, ctx, upstream)?;
                explode(binder, expr, &left, rt, ctx)?
            }
            Plan::Cartesian => {
                let left = self.input.table(rt, ctx, upstream)?;
                let right = expr.get_collection(rt, ctx)?.collect();
                left.map_partitions(binder.columns(left.columns()), |_, rows| {
                    let mut out = Vec::with_capacity(rows.len() * right.len());
                    for row in rows {
                        binder.bind_all(row, right.clone(), &mut out)?;
                    }
                    Ok(out)
                })?
            }
            Plan::EquiJoin { sequence, left_key, right_key, general, outer } => {
                let left = self.input.table(rt, ctx, upstream)?;
                let right = sequence.get_collection(rt, ctx)?.collect();
                let keys = EquiKeys { left: left_key.as_mut(), right: right_key.as_mut(), general: *general };
                equi_join(binder, keys, &left, &right, *outer, rt, ctx)?
            }
            Plan::ThetaJoin { sequence, predicate, outer } => {
                let left = self.input.table(rt, ctx, upstream)?;
                let right = sequence.get_collection(rt, ctx)?.collect();
                theta_join(binder, predicate.as_mut(), &left, &right, *outer, rt, ctx)?
            }
        };
        tracing::debug!(variable = %binder.var, rows = table.row_count(), "for clause produced table");
        Ok(Some(table))
    }
}

/// First clause over a distributed expression: one row per item, positions
/// counted across partitions.
fn starting(binder: &Binder, expr: &mut dyn RuntimeIterator, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Table> {
    let collection = expr.get_collection(rt, ctx)?;
    let columns = binder.columns(&[]);
    let base = FlworTuple::new();
    if collection.is_empty() {
        let rows = if binder.allowing_empty { vec![binder.bind_empty(&base)] } else { Vec::new() };
        return Ok(Table::from_rows(columns, rows, 1));
    }
    let mut partitions = Vec::with_capacity(collection.partition_count());
    let mut offset = 0;
    for partition in collection.partitions() {
        let rows = partition
            .iter()
            .enumerate()
            .map(|(i, item)| binder.bind(&base, item.clone(), offset + i + 1))
            .collect::<Result<Vec<_>>>()?;
        offset += partition.len();
        partitions.push(rows);
    }
    Ok(Table::from_partitions(columns, partitions))
}

/// Local input tuples over a distributed expression: the expression is
/// evaluated once per tuple and the results are concatenated.
#[allow(clippy::too_many_arguments)]
fn union(
    binder: &Binder,
    expr: &mut dyn RuntimeIterator,
    tuples: &[FlworTuple],
    columns: Vec<Name>,
    upstream: &VariableDependencies,
    rt: &mut Runtime,
    ctx: DynamicContextId,
) -> Result<Table> {
    with_frame(rt, ctx, |rt, frame| {
        let mut partitions = Vec::new();
        for tuple in tuples {
            rt.contexts.rebind_tuple(frame, tuple);
            let collection = expr.get_collection(rt, frame)?;
            let base = tuple.project(upstream);
            if collection.is_empty() {
                if binder.allowing_empty {
                    partitions.push(vec![binder.bind_empty(&base)]);
                }
                continue;
            }
            let mut offset = 0;
            for partition in collection.partitions() {
                let rows = partition
                    .iter()
                    .enumerate()
                    .map(|(i, item)| binder.bind(&base, item.clone(), offset + i + 1))
                    .collect::<Result<Vec<_>>>()?;
                offset += partition.len();
                partitions.push(rows);
            }
        }
        Ok(Table::from_partitions(columns, partitions))
    })
}

/// Tabular input over a local expression: each row is expanded by the
/// expression's items.
fn explode(
    binder: &Binder,
    expr: &mut dyn RuntimeIterator,
    left: &Table,
    rt: &mut Runtime,
    ctx: DynamicContextId,
) -> Result<Table> {
    with_frame(rt, ctx, |rt, frame| {
        left.map_partitions(binder.columns(left.columns()), |_, rows| {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                rt.contexts.rebind_tuple(frame, row);
                let items = materialize(expr, rt, frame)?;
                binder.bind_all(row, items, &mut out)?;
            }
            Ok(out)
        })
    })
}

struct EquiKeys<'a> {
    left: &'a mut dyn RuntimeIterator,
    right: &'a mut dyn RuntimeIterator,
    general: bool,
}

/// Atomic keys of one side of an equi-join. Value comparison (`eq`) allows
/// at most one key; NaN never matches.
fn join_keys(
    iter: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    frame: DynamicContextId,
    general: bool,
) -> Result<Vec<AtomicKey>> {
    let items = materialize(iter, rt, frame)?;
    if !general && items.len() > 1 {
        return Err(Error::unexpected_type(
            format!("A value comparison expects at most one item, got {}", items.len()),
            iter.location(),
        ));
    }
    let mut keys = Vec::with_capacity(items.len());
    for item in &items {
        match AtomicKey::from_item(item, iter.location())? {
            AtomicKey::NaN => {}
            key => keys.push(key),
        }
    }
    Ok(keys)
}

#[allow(clippy::too_many_arguments)]
fn equi_join(
    binder: &Binder,
    keys: EquiKeys<'_>,
    left: &Table,
    right: &[Item],
    outer: bool,
    rt: &mut Runtime,
    ctx: DynamicContextId,
) -> Result<Table> {
    let EquiKeys { left: left_key, right: right_key, general } = keys;
    with_frame(rt, ctx, |rt, frame| {
        let mut index: HashMap<AtomicKey, Vec<usize>> = HashMap::new();
        for (i, item) in right.iter().enumerate() {
            rt.contexts.bind_items(frame, Name::context_item(), vec![item.clone()]);
            for key in join_keys(right_key, rt, frame, general)? {
                let positions = index.entry(key).or_default();
                if positions.last() != Some(&i) {
                    positions.push(i);
                }
            }
        }
        tracing::debug!(keys = index.len(), items = right.len(), "built join index");
        left.map_partitions(binder.columns(left.columns()), |_, rows| {
            let mut out = Vec::new();
            for row in rows {
                rt.contexts.rebind_tuple(frame, row);
                let mut matches = BTreeSet::new();
                for key in join_keys(left_key, rt, frame, general)? {
                    if let Some(positions) = index.get(&key) {
                        matches.extend(positions.iter().copied());
                    }
                }
                if matches.is_empty() && outer {
                    out.push(binder.bind_empty(row));
                }
                for i in matches {
                    out.push(binder.bind(row, right[i].clone(), i + 1)?);
                }
            }
            Ok(out)
        })
    })
}

fn theta_join(
    binder: &Binder,
    predicate: &mut dyn RuntimeIterator,
    left: &Table,
    right: &[Item],
    outer: bool,
    rt: &mut Runtime,
    ctx: DynamicContextId,
) -> Result<Table> {
    with_frame(rt, ctx, |rt, frame| {
        left.map_partitions(binder.columns(left.columns()), |_, rows| {
            let mut out = Vec::new();
            for row in rows {
                rt.contexts.rebind_tuple(frame, row);
                let mut matched = false;
                for (i, item) in right.iter().enumerate() {
                    if accepts(predicate, rt, frame, item, i + 1, Some(right.len()))? {
                        out.push(binder.bind(row, item.clone(), i + 1)?);
                        matched = true;
                    }
                }
                if !matched && outer {
                    out.push(binder.bind_empty(row));
                }
            }
            Ok(out)
        })
    })
}

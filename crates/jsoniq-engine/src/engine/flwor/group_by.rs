use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use smallvec::SmallVec;

use super::tuple::{FlworTuple, TupleValue};
use super::{TupleInput, TupleSource, with_frame};
use crate::compiler::dependencies::VariableDependencies;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::iterator::{BoxedIterator, materialize};
use crate::engine::runtime::Runtime;
use crate::error::{Error, Result, SourceLocation};
use crate::item::{AtomicKey, Item};
use crate::name::Name;
use crate::types::SequenceType;

type GroupKey = SmallVec<[Option<AtomicKey>; 2]>;

/// One `$var [as type] [:= expr]` of a group-by clause.
#[derive(Debug)]
pub(crate) struct GroupingKey {
    pub(crate) var: Name,
    pub(crate) seq_type: Option<SequenceType>,
    pub(crate) expr: Option<BoxedIterator>,
}

/// `group by`: tuples with equal keys collapse into one. Grouping variables
/// keep their key; every other variable becomes the concatenation of its
/// values across the group. Groups come out in order of first appearance.
#[derive(Debug)]
pub(crate) struct GroupBySource {
    input: TupleInput,
    keys: Vec<GroupingKey>,
    results: std::vec::IntoIter<FlworTuple>,
    location: SourceLocation,
}

impl GroupBySource {
    pub(crate) fn new(input: TupleInput, keys: Vec<GroupingKey>, location: SourceLocation) -> Self {
        Self { input, keys, results: Vec::new().into_iter(), location }
    }
}

fn key_items(key: &mut GroupingKey, row: &FlworTuple, rt: &mut Runtime, frame: DynamicContextId) -> Result<Vec<Item>> {
    let Some(expr) = &mut key.expr else {
        return Ok(row.get(&key.var).map(TupleValue::to_items).unwrap_or_default());
    };
    let items = materialize(expr.as_mut(), rt, frame)?;
    if let Some(seq_type) = &key.seq_type {
        if !seq_type.matches(&items) {
            return Err(Error::unexpected_type(
                format!("Invalid grouping key ${}: expected {seq_type}, got {} item(s)", key.var, items.len()),
                expr.location(),
            ));
        }
    }
    rt.contexts.bind_items(frame, key.var.clone(), items.clone());
    Ok(items)
}

fn group(
    keys: &mut [GroupingKey],
    rows: Vec<FlworTuple>,
    rt: &mut Runtime,
    ctx: DynamicContextId,
    location: SourceLocation,
) -> Result<Vec<FlworTuple>> {
    let grouping: BTreeSet<Name> = keys.iter().map(|k| k.var.clone()).collect();
    let groups = with_frame(rt, ctx, |rt, frame| {
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<Vec<FlworTuple>> = Vec::new();
        for row in rows {
            rt.contexts.rebind_tuple(frame, &row);
            let mut group_key = GroupKey::new();
            let mut keyed = row.clone();
            for key in keys.iter_mut() {
                let items = key_items(key, &row, rt, frame)?;
                let atom = match items.as_slice() {
                    [] => None,
                    [item] if item.is_atomic() => Some(AtomicKey::from_item(item, location)?),
                    _ => {
                        return Err(Error::unexpected_type(
                            format!("Grouping key ${} must be at most one atomic item", key.var),
                            location,
                        ));
                    }
                };
                group_key.push(atom);
                keyed = keyed.with_items(key.var.clone(), items);
            }
            match index.entry(group_key) {
                Entry::Occupied(entry) => groups[*entry.get()].push(keyed),
                Entry::Vacant(entry) => {
                    entry.insert(groups.len());
                    groups.push(vec![keyed]);
                }
            }
        }
        Ok(groups)
    })?;
    tracing::debug!(groups = groups.len(), "grouped tuples");
    Ok(groups
        .into_iter()
        .filter_map(|members| {
            let first = members.first()?;
            let mut out = FlworTuple::new();
            for name in first.names() {
                let value = if grouping.contains(name) {
                    first.get(name).cloned().unwrap_or_else(TupleValue::empty)
                } else {
                    let items = members.iter().flat_map(|m| m.get(name).map(TupleValue::to_items).unwrap_or_default());
                    TupleValue::Items(items.collect())
                };
                out = out.with(name.clone(), value);
            }
            Some(out)
        })
        .collect())
}

impl TupleSource for GroupBySource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let rows = self.input.all(rt, ctx)?;
        self.results = group(&mut self.keys, rows, rt, ctx, self.location)?.into_iter();
        Ok(())
    }

    fn pull(&mut self, _rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        Ok(self.results.next())
    }

    fn stop(&mut self, _rt: &mut Runtime) {
        self.results = Vec::new().into_iter();
    }

    fn table(
        &mut self,
        rt: &mut Runtime,
        ctx: DynamicContextId,
        upstream: &VariableDependencies,
    ) -> Result<Option<Table>> {
        if !self.input.is_tabular() {
            return Ok(None);
        }
        let left = self.input.table(rt, ctx, upstream)?;
        let mut columns = left.columns().to_vec();
        for key in &self.keys {
            if !columns.contains(&key.var) {
                columns.push(key.var.clone());
            }
        }
        let grouped = group(&mut self.keys, left.collect_rows(), rt, ctx, self.location)?;
        Ok(Some(Table::from_rows(columns, grouped, rt.parallelism())))
    }
}

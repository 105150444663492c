use super::tuple::FlworTuple;
use super::{TupleInput, TupleSource};
use crate::compiler::dependencies::VariableDependencies;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::runtime::Runtime;
use crate::error::Result;
use crate::item::Item;
use crate::name::Name;

fn counter(position: usize) -> Vec<Item> {
    vec![Item::Integer(i64::try_from(position).unwrap_or(i64::MAX))]
}

/// `count $c`: binds the 1-based position of each tuple in the stream.
#[derive(Debug)]
pub(crate) struct CountSource {
    input: TupleInput,
    var: Name,
    position: usize,
}

impl CountSource {
    pub(crate) fn new(input: TupleInput, var: Name) -> Self {
        Self { input, var, position: 0 }
    }
}

impl TupleSource for CountSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.position = 0;
        self.input.open(rt, ctx)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        let Some(tuple) = self.input.next(rt)? else { return Ok(None) };
        self.position += 1;
        Ok(Some(tuple.with_items(self.var.clone(), counter(self.position))))
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.input.close(rt);
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
        let mut columns: Vec<Name> = left.columns().iter().filter(|c| **c != self.var).cloned().collect();
        columns.push(self.var.clone());
        let table = left.map_partitions(columns, |offset, rows| {
            Ok(rows.iter().enumerate().map(|(i, row)| row.with_items(self.var.clone(), counter(offset + i + 1))).collect())
        })?;
        Ok(Some(table))
    }
}

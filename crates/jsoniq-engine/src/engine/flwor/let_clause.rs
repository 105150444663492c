use super::tuple::{FlworTuple, TupleValue};
use super::{TupleFrame, TupleInput, TupleSource, with_frame};
use crate::compiler::dependencies::VariableDependencies;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::iterator::{BoxedIterator, RuntimeIterator, materialize};
use crate::engine::runtime::Runtime;
use crate::error::{Error, Result, SourceLocation};
use crate::item::Item;
use crate::name::Name;
use crate::types::SequenceType;

/// `let $x := expr`: one output tuple per input tuple.
#[derive(Debug)]
pub(crate) struct LetSource {
    input: TupleInput,
    var: Name,
    seq_type: Option<SequenceType>,
    expr: BoxedIterator,
    frame: TupleFrame,
    location: SourceLocation,
}

impl LetSource {
    pub(crate) fn new(
        input: TupleInput,
        var: Name,
        seq_type: Option<SequenceType>,
        expr: BoxedIterator,
        location: SourceLocation,
    ) -> Self {
        Self { input, var, seq_type, expr, frame: TupleFrame::default(), location }
    }
}

fn check_type(var: &Name, seq_type: Option<&SequenceType>, items: &[Item], location: SourceLocation) -> Result<()> {
    match seq_type {
        Some(seq_type) if !seq_type.matches(items) => Err(Error::unexpected_type(
            format!("Invalid value for ${var}: expected {seq_type}, got {} item(s)", items.len()),
            location,
        )),
        _ => Ok(()),
    }
}

/// Value of the let expression; distributed results stay distributed.
fn evaluate(
    expr: &mut dyn RuntimeIterator,
    var: &Name,
    seq_type: Option<&SequenceType>,
    rt: &mut Runtime,
    frame: DynamicContextId,
    location: SourceLocation,
) -> Result<TupleValue> {
    let mode = expr.execution_mode();
    if mode.is_dataframe() {
        return expr.get_table(rt, frame).map(TupleValue::Table);
    }
    if mode.is_rdd() {
        return expr.get_collection(rt, frame).map(TupleValue::Collection);
    }
    let items = materialize(expr, rt, frame)?;
    check_type(var, seq_type, &items, location)?;
    Ok(TupleValue::Items(items))
}

impl TupleSource for LetSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.input.open(rt, ctx)?;
        self.frame.enter(rt, ctx);
        Ok(())
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        let Some(frame) = self.frame.get() else { return Ok(None) };
        let Some(tuple) = self.input.next(rt)? else { return Ok(None) };
        rt.contexts.rebind_tuple(frame, &tuple);
        let value = evaluate(self.expr.as_mut(), &self.var, self.seq_type.as_ref(), rt, frame, self.location)?;
        Ok(Some(tuple.with(self.var.clone(), value)))
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.input.close(rt);
        self.frame.leave(rt);
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
        let (var, seq_type, location) = (&self.var, self.seq_type.as_ref(), self.location);
        let expr = self.expr.as_mut();
        let table = with_frame(rt, ctx, |rt, frame| {
            left.map_partitions(columns, |_, rows| {
                rows.iter()
                    .map(|row| {
                        rt.contexts.rebind_tuple(frame, row);
                        let items = materialize(expr, rt, frame)?;
                        check_type(var, seq_type, &items, location)?;
                        Ok(row.with_items(var.clone(), items))
                    })
                    .collect()
            })
        })?;
        Ok(Some(table))
    }
}

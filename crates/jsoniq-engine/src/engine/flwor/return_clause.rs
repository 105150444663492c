use super::{BoxedTupleIterator, TupleFrame, with_frame};
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Collection;
use crate::engine::iterator::{BoxedIterator, ItemSource, materialize};
use crate::engine::runtime::Runtime;
use crate::error::Result;
use crate::item::Item;

/// `return expr`: evaluates the expression once per tuple and concatenates
/// the results.
#[derive(Debug)]
pub(crate) struct ReturnSource {
    tuples: BoxedTupleIterator,
    expr: BoxedIterator,
    frame: TupleFrame,
}

impl ReturnSource {
    pub(crate) fn new(tuples: BoxedTupleIterator, expr: BoxedIterator) -> Self {
        Self { tuples, expr, frame: TupleFrame::default() }
    }
}

impl ItemSource for ReturnSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.tuples.open(rt, ctx)?;
        self.frame.enter(rt, ctx);
        Ok(())
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        let Some(frame) = self.frame.get() else { return Ok(None) };
        loop {
            if self.expr.is_open() && self.expr.has_next() {
                return self.expr.next(rt).map(Some);
            }
            if !self.tuples.has_next() {
                return Ok(None);
            }
            let tuple = self.tuples.next(rt)?;
            rt.contexts.rebind_tuple(frame, &tuple);
            if self.expr.is_open() {
                self.expr.reset(rt, frame)?;
            } else {
                self.expr.open(rt, frame)?;
            }
        }
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.expr.close(rt);
        self.tuples.close(rt);
        self.frame.leave(rt);
    }

    /// With a tabular last clause, the return expression runs partition by
    /// partition over the table.
    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        if !self.tuples.execution_mode().is_dataframe() {
            return Ok(None);
        }
        let projection = self.expr.variable_dependencies().clone();
        let table = self.tuples.get_table(rt, ctx, &projection)?;
        let expr = self.expr.as_mut();
        let partitions = with_frame(rt, ctx, |rt, frame| {
            table
                .partitions()
                .iter()
                .map(|rows| {
                    let mut items = Vec::new();
                    for row in rows {
                        rt.contexts.rebind_tuple(frame, row);
                        items.extend(materialize(expr, rt, frame)?);
                    }
                    Ok(items)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(Some(Collection::from_partitions(partitions)))
    }
}

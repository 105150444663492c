use super::tuple::FlworTuple;
use super::{TupleFrame, TupleInput, TupleSource, with_frame};
use crate::compiler::dependencies::VariableDependencies;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::iterator::{BoxedIterator, ebv_of};
use crate::engine::runtime::Runtime;
use crate::error::Result;

/// `where condition`: keeps the tuples whose condition has a true
/// effective boolean value.
#[derive(Debug)]
pub(crate) struct WhereSource {
    input: TupleInput,
    condition: BoxedIterator,
    frame: TupleFrame,
}

impl WhereSource {
    pub(crate) fn new(input: TupleInput, condition: BoxedIterator) -> Self {
        Self { input, condition, frame: TupleFrame::default() }
    }
}

impl TupleSource for WhereSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.input.open(rt, ctx)?;
        self.frame.enter(rt, ctx);
        Ok(())
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        let Some(frame) = self.frame.get() else { return Ok(None) };
        while let Some(tuple) = self.input.next(rt)? {
            rt.contexts.rebind_tuple(frame, &tuple);
            if ebv_of(self.condition.as_mut(), rt, frame)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
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
        let condition = self.condition.as_mut();
        let table = with_frame(rt, ctx, |rt, frame| {
            left.map_partitions(left.columns().to_vec(), |_, rows| {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    rt.contexts.rebind_tuple(frame, row);
                    if ebv_of(condition, rt, frame)? {
                        kept.push(row.clone());
                    }
                }
                Ok(kept)
            })
        })?;
        Ok(Some(table))
    }
}

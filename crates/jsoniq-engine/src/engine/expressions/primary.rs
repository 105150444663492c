//! Literals, variable references, comma expressions, ranges and constructors.

use compact_str::CompactString;

use crate::engine::context::{DynamicContextId, VariableValue};
use crate::engine::distributed::Collection;
use crate::engine::iterator::{
    BoxedIterator, Compute, ItemSource, RuntimeIterator, materialize, materialize_at_most_one,
};
use crate::engine::runtime::Runtime;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::item::Item;
use crate::name::Name;

#[derive(Debug)]
pub(crate) struct LiteralValue {
    pub(crate) item: Item,
}

impl Compute for LiteralValue {
    fn compute(&mut self, _rt: &mut Runtime, _ctx: DynamicContextId) -> Result<Vec<Item>> {
        Ok(vec![self.item.clone()])
    }
}

/// `$name` and `$$`.
#[derive(Debug)]
pub(crate) struct VariableSource {
    pub(crate) name: Name,
    pub(crate) location: SourceLocation,
}

impl VariableSource {
    fn value<'r>(&self, rt: &'r Runtime, ctx: DynamicContextId) -> Result<VariableValue<'r>> {
        rt.contexts
            .lookup(ctx, &self.name)
            .ok_or_else(|| Error::undeclared_variable(&self.name, self.location))
    }
}

impl Compute for VariableSource {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        match self.value(rt, ctx)? {
            VariableValue::Items(items) => Ok(items.to_vec()),
            VariableValue::Collection(collection) => Ok(collection.collect()),
            VariableValue::Table(table) => table.to_objects(),
        }
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let partitions = rt.parallelism();
        Ok(Some(match self.value(rt, ctx)? {
            VariableValue::Collection(collection) => collection.clone(),
            VariableValue::Table(table) => Collection::from_items(table.to_objects()?, partitions),
            VariableValue::Items(items) => Collection::from_items(items.to_vec(), partitions),
        }))
    }
}

/// Comma expression: operands are streamed one after the other.
#[derive(Debug)]
pub(crate) struct SequenceSource {
    operands: Vec<BoxedIterator>,
    current: usize,
    ctx: Option<DynamicContextId>,
}

impl SequenceSource {
    pub(crate) fn new(operands: Vec<BoxedIterator>) -> Self {
        Self { operands, current: 0, ctx: None }
    }
}

impl ItemSource for SequenceSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.ctx = Some(ctx);
        self.current = 0;
        if let Some(first) = self.operands.first_mut() {
            first.open(rt, ctx)?;
        }
        Ok(())
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        let Some(ctx) = self.ctx else { return Ok(None) };
        while let Some(operand) = self.operands.get_mut(self.current) {
            if operand.has_next() {
                return operand.next(rt).map(Some);
            }
            operand.close(rt);
            self.current += 1;
            if let Some(next) = self.operands.get_mut(self.current) {
                next.open(rt, ctx)?;
            }
        }
        Ok(None)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        for operand in &mut self.operands {
            operand.close(rt);
        }
        self.ctx = None;
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let mut result = Collection::default();
        for operand in &mut self.operands {
            let part = operand.get_collection(rt, ctx)?;
            result = if result.partition_count() == 0 { part } else { result.union(&part) };
        }
        Ok(Some(result))
    }
}

/// `from to to`, produced lazily.
#[derive(Debug)]
pub(crate) struct RangeSource {
    from: BoxedIterator,
    to: BoxedIterator,
    next: i64,
    end: i64,
}

impl RangeSource {
    pub(crate) fn new(from: BoxedIterator, to: BoxedIterator) -> Self {
        Self { from, to, next: 1, end: 0 }
    }
}

fn range_bound(iter: &mut dyn RuntimeIterator, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<i64>> {
    match materialize_at_most_one(iter, rt, ctx, "range expression")? {
        None => Ok(None),
        Some(Item::Integer(i)) => Ok(Some(i)),
        Some(other) => Err(Error::unexpected_type(
            format!("Range bounds must be integers, got {}", other.dynamic_type()),
            iter.location(),
        )),
    }
}

impl ItemSource for RangeSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let from = range_bound(self.from.as_mut(), rt, ctx)?;
        let to = range_bound(self.to.as_mut(), rt, ctx)?;
        (self.next, self.end) = match (from, to) {
            (Some(from), Some(to)) => (from, to),
            _ => (1, 0),
        };
        Ok(())
    }

    fn pull(&mut self, _rt: &mut Runtime) -> Result<Option<Item>> {
        if self.next > self.end {
            return Ok(None);
        }
        let value = self.next;
        // `end` may be i64::MAX
        match self.next.checked_add(1) {
            Some(next) => self.next = next,
            None => self.end = i64::MIN,
        }
        Ok(Some(Item::Integer(value)))
    }

    fn stop(&mut self, _rt: &mut Runtime) {
        self.next = 1;
        self.end = 0;
    }
}

#[derive(Debug)]
pub(crate) struct ObjectConstructor {
    pub(crate) pairs: Vec<(BoxedIterator, BoxedIterator)>,
}

impl Compute for ObjectConstructor {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let mut members: Vec<(CompactString, Item)> = Vec::with_capacity(self.pairs.len());
        for (key, value) in &mut self.pairs {
            let location = key.location();
            let key = match materialize_at_most_one(key.as_mut(), rt, ctx, "object key")? {
                Some(Item::String(s)) => s,
                Some(other) => {
                    return Err(Error::unexpected_type(
                        format!("Object keys must be strings, got {}", other.dynamic_type()),
                        location,
                    ));
                }
                None => return Err(Error::unexpected_type("Object keys cannot be empty sequences", location)),
            };
            if members.iter().any(|(k, _)| *k == key) {
                return Err(Error::from_code(ErrorCode::JNDY0003, format!("Duplicate key \"{key}\" in object constructor"))
                    .at(location));
            }
            let mut items = materialize(value.as_mut(), rt, ctx)?;
            let value = match items.len() {
                0 => Item::Null,
                1 => items.remove(0),
                _ => Item::array(items),
            };
            members.push((key, value));
        }
        Ok(vec![Item::Object(std::sync::Arc::new(members))])
    }
}

#[derive(Debug)]
pub(crate) struct ArrayConstructor {
    pub(crate) content: Option<BoxedIterator>,
}

impl Compute for ArrayConstructor {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let members = match &mut self.content {
            Some(content) => materialize(content.as_mut(), rt, ctx)?,
            None => Vec::new(),
        };
        Ok(vec![Item::array(members)])
    }
}

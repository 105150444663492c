//! Predicates, simple maps, object and array navigation.

use std::collections::VecDeque;

use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Collection;
use crate::engine::iterator::{
    BoxedIterator, ItemSource, RuntimeIterator, effective_boolean_value, materialize, materialize_at_most_one,
};
use crate::engine::runtime::Runtime;
use crate::error::{Error, Result, SourceLocation};
use crate::item::Item;
use crate::name::Name;

/// `sequence[predicate]`. Inside the predicate `$$` is the current item; a
/// single numeric result selects by position, anything else is filtered by
/// its effective boolean value.
#[derive(Debug)]
pub(crate) struct PredicateSource {
    sequence: BoxedIterator,
    predicate: BoxedIterator,
    needs_count: bool,
    frame: Option<DynamicContextId>,
    buffered: Option<std::vec::IntoIter<Item>>,
    count: usize,
    position: usize,
}

impl PredicateSource {
    pub(crate) fn new(sequence: BoxedIterator, predicate: BoxedIterator) -> Self {
        let needs_count = predicate.variable_dependencies().contains_key(&Name::context_count());
        Self { sequence, predicate, needs_count, frame: None, buffered: None, count: 0, position: 0 }
    }

    fn next_candidate(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        match &mut self.buffered {
            Some(items) => Ok(items.next()),
            None if self.sequence.has_next() => self.sequence.next(rt).map(Some),
            None => Ok(None),
        }
    }
}

/// Whether `item` at 1-based `position` passes `predicate`, evaluated in `frame`.
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
pub(crate) fn accepts(
    predicate: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    frame: DynamicContextId,
    item: &Item,
    position: usize,
    count: Option<usize>,
) -> Result<bool> {
    rt.contexts.bind_items(frame, Name::context_item(), vec![item.clone()]);
    rt.contexts.bind_items(frame, Name::context_position(), vec![Item::Integer(position as i64)]);
    if let Some(count) = count {
        rt.contexts.bind_items(frame, Name::context_count(), vec![Item::Integer(count as i64)]);
    }
    let result = materialize(predicate, rt, frame)?;
    match result.as_slice() {
        [single] if single.is_numeric() => Ok(single.as_f64() == Some(position as f64)),
        _ => effective_boolean_value(&result, predicate.location()),
    }
}

impl ItemSource for PredicateSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.frame = Some(rt.contexts.new_child(ctx));
        self.position = 0;
        if self.needs_count {
            let items = materialize(self.sequence.as_mut(), rt, ctx)?;
            self.count = items.len();
            self.buffered = Some(items.into_iter());
        } else {
            self.sequence.open(rt, ctx)?;
        }
        Ok(())
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        let Some(frame) = self.frame else { return Ok(None) };
        let count = self.needs_count.then_some(self.count);
        while let Some(item) = self.next_candidate(rt)? {
            self.position += 1;
            if accepts(self.predicate.as_mut(), rt, frame, &item, self.position, count)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.sequence.close(rt);
        self.buffered = None;
        if let Some(frame) = self.frame.take() {
            rt.contexts.release(frame);
        }
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let input = self.sequence.get_collection(rt, ctx)?;
        let count = self.needs_count.then(|| input.count());
        let frame = rt.contexts.new_child(ctx);
        let predicate = self.predicate.as_mut();
        let result = input.map_partitions(|offset, items| {
            let mut kept = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if accepts(predicate, rt, frame, item, offset + i + 1, count)? {
                    kept.push(item.clone());
                }
            }
            Ok(kept)
        });
        rt.contexts.release(frame);
        result.map(Some)
    }
}

/// `sequence ! mapping`: the mapping is evaluated once per item with `$$`
/// bound to it, and the results are concatenated in order.
#[derive(Debug)]
pub(crate) struct SimpleMapSource {
    sequence: BoxedIterator,
    mapping: BoxedIterator,
    frame: Option<DynamicContextId>,
    pending: VecDeque<Item>,
    position: usize,
}

impl SimpleMapSource {
    pub(crate) fn new(sequence: BoxedIterator, mapping: BoxedIterator) -> Self {
        Self { sequence, mapping, frame: None, pending: VecDeque::new(), position: 0 }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn map_item(
    mapping: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    frame: DynamicContextId,
    item: &Item,
    position: usize,
) -> Result<Vec<Item>> {
    rt.contexts.bind_items(frame, Name::context_item(), vec![item.clone()]);
    rt.contexts.bind_items(frame, Name::context_position(), vec![Item::Integer(position as i64)]);
    materialize(mapping, rt, frame)
}

impl ItemSource for SimpleMapSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.frame = Some(rt.contexts.new_child(ctx));
        self.pending.clear();
        self.position = 0;
        self.sequence.open(rt, ctx)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        let Some(frame) = self.frame else { return Ok(None) };
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            if !self.sequence.has_next() {
                return Ok(None);
            }
            let item = self.sequence.next(rt)?;
            self.position += 1;
            self.pending.extend(map_item(self.mapping.as_mut(), rt, frame, &item, self.position)?);
        }
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.sequence.close(rt);
        self.pending.clear();
        if let Some(frame) = self.frame.take() {
            rt.contexts.release(frame);
        }
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let input = self.sequence.get_collection(rt, ctx)?;
        let frame = rt.contexts.new_child(ctx);
        let mapping = self.mapping.as_mut();
        let result = input.map_partitions(|offset, items| {
            let mut mapped = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                mapped.extend(map_item(mapping, rt, frame, item, offset + i + 1)?);
            }
            Ok(mapped)
        });
        rt.contexts.release(frame);
        result.map(Some)
    }
}

/// Per-item navigation step applied by [`NavigationSource`].
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// `.key`; non-objects and missing keys yield nothing.
    Member(compact_str::CompactString),
    /// `[[n]]`, 1-based; non-arrays and out-of-range indexes yield nothing.
    Index(i64),
    /// `[]`; non-arrays yield nothing.
    Unbox,
}

impl Step {
    fn apply(&self, item: &Item, out: &mut impl Extend<Item>) {
        match (self, item) {
            (Step::Member(key), Item::Object(_)) => out.extend(item.member(key).cloned()),
            (Step::Index(index), Item::Array(members)) => {
                let member = usize::try_from(*index).ok().and_then(|i| i.checked_sub(1)).and_then(|i| members.get(i));
                out.extend(member.cloned());
            }
            (Step::Unbox, Item::Array(members)) => out.extend(members.iter().cloned()),
            _ => {}
        }
    }
}

/// Which step a navigation expression applies; the selector of a lookup is
/// evaluated once per open.
#[derive(Debug)]
pub(crate) enum Selector {
    Member(BoxedIterator),
    Index(BoxedIterator),
    Unbox,
}

#[derive(Debug)]
pub(crate) struct NavigationSource {
    operand: BoxedIterator,
    selector: Selector,
    step: Option<Step>,
    pending: VecDeque<Item>,
    location: SourceLocation,
}

impl NavigationSource {
    pub(crate) fn new(operand: BoxedIterator, selector: Selector, location: SourceLocation) -> Self {
        Self { operand, selector, step: None, pending: VecDeque::new(), location }
    }

    fn resolve_step(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Step> {
        match &mut self.selector {
            Selector::Unbox => Ok(Step::Unbox),
            Selector::Member(key) => match materialize_at_most_one(key.as_mut(), rt, ctx, "object lookup")? {
                Some(Item::String(s)) => Ok(Step::Member(s)),
                Some(other) if other.is_atomic() => Ok(Step::Member(other.string_value()?.into())),
                Some(other) => Err(Error::unexpected_type(
                    format!("Object lookup keys must be atomic, got {}", other.dynamic_type()),
                    self.location,
                )),
                None => Err(Error::unexpected_type("Object lookup key cannot be an empty sequence", self.location)),
            },
            Selector::Index(index) => match materialize_at_most_one(index.as_mut(), rt, ctx, "array lookup")? {
                Some(Item::Integer(i)) => Ok(Step::Index(i)),
                Some(other) => Err(Error::unexpected_type(
                    format!("Array lookup positions must be integers, got {}", other.dynamic_type()),
                    self.location,
                )),
                None => Err(Error::unexpected_type("Array lookup position cannot be an empty sequence", self.location)),
            },
        }
    }
}

impl ItemSource for NavigationSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.step = Some(self.resolve_step(rt, ctx)?);
        self.operand.open(rt, ctx)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        let Some(step) = &self.step else { return Ok(None) };
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            if !self.operand.has_next() {
                return Ok(None);
            }
            let item = self.operand.next(rt)?;
            step.apply(&item, &mut self.pending);
        }
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.operand.close(rt);
        self.pending.clear();
        self.step = None;
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let step = self.resolve_step(rt, ctx)?;
        let input = self.operand.get_collection(rt, ctx)?;
        input
            .map_partitions(|_, items| {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    step.apply(item, &mut out);
                }
                Ok(out)
            })
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_skip_mismatching_kinds() {
        let object = Item::object([("a", Item::Integer(1))]);
        let array = Item::array(vec![Item::Integer(10), Item::Integer(20)]);
        let mut out = Vec::new();
        Step::Member("a".into()).apply(&object, &mut out);
        Step::Member("a".into()).apply(&array, &mut out);
        Step::Index(2).apply(&array, &mut out);
        Step::Index(0).apply(&array, &mut out);
        Step::Index(3).apply(&array, &mut out);
        Step::Unbox.apply(&object, &mut out);
        Step::Unbox.apply(&array, &mut out);
        assert_eq!(out, vec![Item::Integer(1), Item::Integer(20), Item::Integer(10), Item::Integer(20)]);
    }
}

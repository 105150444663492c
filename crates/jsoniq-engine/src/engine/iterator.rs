//! Pull-based runtime iterators.
//!
//! Every expression compiles to a [`RuntimeIterator`] with the lifecycle
//! `open → (has_next/next)* → close`, optionally re-primed with `reset`.
//! Concrete expressions implement the smaller [`ItemSource`] trait and are
//! wrapped in a [`StreamIterator`], which owns the lifecycle state and the
//! one-item lookahead.

use std::fmt;

use crate::compiler::dependencies::VariableDependencies;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::{Collection, Table};
use crate::engine::runtime::Runtime;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::item::Item;
use crate::mode::ExecutionMode;

pub type BoxedIterator = Box<dyn RuntimeIterator>;

pub trait RuntimeIterator: fmt::Debug {
    /// Bind to `ctx` and prime the first result. Opening an open iterator is
    /// an internal error.
    fn open(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()>;

    fn has_next(&self) -> bool;

    /// Current lookahead item; fails with `JNRT0001` when there is none.
    fn next(&mut self, rt: &mut Runtime) -> Result<Item>;

    /// Re-prime from the beginning, possibly against a different context.
    fn reset(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()>;

    /// Release children and frames. A no-op when already closed.
    fn close(&mut self, rt: &mut Runtime);

    fn is_open(&self) -> bool;

    fn execution_mode(&self) -> ExecutionMode;

    fn location(&self) -> SourceLocation;

    /// Free variables of the expression and how much of each it reads.
    fn variable_dependencies(&self) -> &VariableDependencies;

    /// The whole value as a partitioned collection.
    fn get_collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Collection>;

    /// The value as a table with one column per object key.
    fn get_table(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Table> {
        let items = self.get_collection(rt, ctx)?.collect();
        Table::from_objects(&items, rt.parallelism(), self.location())
    }
}

/// Lifecycle state shared by item and tuple iterators.
#[derive(Debug, Default)]
pub(crate) enum IteratorState<T> {
    #[default]
    Closed,
    Open {
        pending: T,
    },
    Exhausted,
}

impl<T> IteratorState<T> {
    pub(crate) fn primed(pending: Option<T>) -> Self {
        match pending {
            Some(pending) => IteratorState::Open { pending },
            None => IteratorState::Exhausted,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self, IteratorState::Closed)
    }

    pub(crate) fn has_pending(&self) -> bool {
        matches!(self, IteratorState::Open { .. })
    }

    /// Take the pending value, leaving the state exhausted until the caller
    /// installs the next lookahead.
    pub(crate) fn take_pending(&mut self) -> Option<T> {
        match std::mem::replace(self, IteratorState::Exhausted) {
            IteratorState::Open { pending } => Some(pending),
            IteratorState::Closed => {
                *self = IteratorState::Closed;
                None
            }
            IteratorState::Exhausted => None,
        }
    }
}

/// Static facts about an iterator, fixed at construction.
#[derive(Debug, Clone)]
pub struct IteratorMeta {
    pub construct: &'static str,
    pub location: SourceLocation,
    pub mode: ExecutionMode,
    pub dependencies: VariableDependencies,
}

impl IteratorMeta {
    pub fn new(construct: &'static str, location: SourceLocation, mode: ExecutionMode) -> Self {
        Self { construct, location, mode, dependencies: VariableDependencies::new() }
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: VariableDependencies) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Expression-specific part of an iterator.
pub(crate) trait ItemSource: fmt::Debug {
    /// Open children and set up per-bracket state.
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()>;

    /// Produce the next item, `None` once exhausted.
    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>>;

    /// Close children and release frames. Called at most once per `start`.
    fn stop(&mut self, rt: &mut Runtime);

    /// The value computed as a collection, for sources that have a
    /// distributed form. `None` falls back to local evaluation.
    fn collection(&mut self, _rt: &mut Runtime, _ctx: DynamicContextId) -> Result<Option<Collection>> {
        Ok(None)
    }
}

/// Sources that compute their whole result in one step. Children are
/// materialised (and closed again) inside `compute`.
pub(crate) trait Compute: fmt::Debug {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>>;

    fn collection(&mut self, _rt: &mut Runtime, _ctx: DynamicContextId) -> Result<Option<Collection>> {
        Ok(None)
    }
}

#[derive(Debug)]
pub(crate) struct Eager<C> {
    inner: C,
    results: std::vec::IntoIter<Item>,
}

impl<C: Compute> Eager<C> {
    pub(crate) fn new(inner: C) -> Self {
        Self { inner, results: Vec::new().into_iter() }
    }
}

impl<C: Compute> ItemSource for Eager<C> {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        self.results = self.inner.compute(rt, ctx)?.into_iter();
        Ok(())
    }

    fn pull(&mut self, _rt: &mut Runtime) -> Result<Option<Item>> {
        Ok(self.results.next())
    }

    fn stop(&mut self, _rt: &mut Runtime) {
        self.results = Vec::new().into_iter();
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        self.inner.collection(rt, ctx)
    }
}

#[derive(Debug)]
pub(crate) struct StreamIterator<S> {
    source: S,
    meta: IteratorMeta,
    state: IteratorState<Item>,
    /// Items of a distributed value consumed locally.
    buffered: Option<std::vec::IntoIter<Item>>,
}

impl<S: ItemSource + 'static> StreamIterator<S> {
    pub(crate) fn new(source: S, meta: IteratorMeta) -> Self {
        Self { source, meta, state: IteratorState::Closed, buffered: None }
    }

    pub(crate) fn boxed(source: S, meta: IteratorMeta) -> BoxedIterator {
        Box::new(Self::new(source, meta))
    }
    fn fetch(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        match &mut self.buffered {
            Some(items) => Ok(items.next()),
            None => self.source.pull(rt),
        }
    }
}

impl<S: ItemSource + 'static> RuntimeIterator for StreamIterator<S> {
    fn open(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        if !self.state.is_closed() {
            return Err(Error::internal(format!("{} opened twice", self.meta.construct)).at(self.meta.location));
        }
        tracing::trace!(construct = self.meta.construct, mode = %self.meta.mode, "open");
        if self.meta.mode.is_distributed() {
            if let Some(collection) = self.source.collection(rt, ctx).map_err(|e| e.at(self.meta.location))? {
                self.buffered = Some(collection.collect().into_iter());
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

    fn next(&mut self, rt: &mut Runtime) -> Result<Item> {
        let Some(item) = self.state.take_pending() else {
            return Err(Error::iterator_flow(self.meta.construct, self.meta.location));
        };
        let upcoming = self.fetch(rt).map_err(|e| e.at(self.meta.location))?;
        self.state = IteratorState::primed(upcoming);
        Ok(item)
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

    fn variable_dependencies(&self) -> &VariableDependencies {
        &self.meta.dependencies
    }

    fn get_collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Collection> {
        if self.meta.mode.is_distributed() {
            if let Some(collection) = self.source.collection(rt, ctx).map_err(|e| e.at(self.meta.location))? {
                return Ok(collection);
            }
        }
        let items = materialize(self, rt, ctx)?;
        Ok(Collection::from_items(items, rt.parallelism()))
    }
}

/// Evaluate `iter` against `ctx` into a vector, closing it afterwards.
pub fn materialize(iter: &mut dyn RuntimeIterator, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
    iter.open(rt, ctx)?;
    let mut items = Vec::new();
    let result: Result<()> = (|| {
        while iter.has_next() {
            items.push(iter.next(rt)?);
        }
        Ok(())
    })();
    iter.close(rt);
    result.map(|()| items)
}

/// First item or `None`; stops pulling after one item.
pub fn materialize_first_or_none(
    iter: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    ctx: DynamicContextId,
) -> Result<Option<Item>> {
    iter.open(rt, ctx)?;
    let result = if iter.has_next() { iter.next(rt).map(Some) } else { Ok(None) };
    iter.close(rt);
    result
}

/// At most one item; more is a type error naming `what`.
pub fn materialize_at_most_one(
    iter: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    ctx: DynamicContextId,
    what: &str,
) -> Result<Option<Item>> {
    let mut items = materialize(iter, rt, ctx)?;
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        n => Err(Error::unexpected_type(format!("{what} expects at most one item, got {n}"), iter.location())),
    }
}

/// Exactly one item; anything else is a type error naming `what`.
pub fn materialize_exactly_one(
    iter: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    ctx: DynamicContextId,
    what: &str,
) -> Result<Item> {
    let location = iter.location();
    materialize_at_most_one(iter, rt, ctx, what)?
        .ok_or_else(|| Error::unexpected_type(format!("{what} expects exactly one item, got an empty sequence"), location))
}

/// Effective boolean value of a sequence.
pub fn effective_boolean_value(items: &[Item], location: SourceLocation) -> Result<bool> {
    let Some(first) = items.first() else { return Ok(false) };
    if !first.is_atomic() {
        return Ok(true);
    }
    if items.len() > 1 {
        return Err(Error::from_code(
            ErrorCode::FORG0006,
            "Effective boolean value is not defined for a sequence of more than one atomic item",
        )
        .at(location));
    }
    Ok(match first {
        Item::Null => false,
        Item::Boolean(b) => *b,
        Item::String(s) => !s.is_empty(),
        Item::Integer(i) => *i != 0,
        Item::Decimal(d) | Item::Double(d) => *d != 0.0 && !d.is_nan(),
        Item::Array(_) | Item::Object(_) | Item::Function(_) => true,
    })
}

/// Effective boolean value of an iterator's result, pulling at most two items.
pub fn ebv_of(iter: &mut dyn RuntimeIterator, rt: &mut Runtime, ctx: DynamicContextId) -> Result<bool> {
    iter.open(rt, ctx)?;
    let result: Result<bool> = (|| {
        let mut head = Vec::with_capacity(2);
        while iter.has_next() && head.len() < 2 {
            let item = iter.next(rt)?;
            if !item.is_atomic() && head.is_empty() {
                return Ok(true);
            }
            head.push(item);
        }
        effective_boolean_value(&head, iter.location())
    })();
    iter.close(rt);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(vec![], false)]
    #[case(vec![Item::Null], false)]
    #[case(vec![Item::string("")], false)]
    #[case(vec![Item::string("a")], true)]
    #[case(vec![Item::Double(f64::NAN)], false)]
    #[case(vec![Item::Integer(2)], true)]
    #[case(vec![Item::Object(std::sync::Arc::new(Vec::new())), Item::Integer(0)], true)]
    fn ebv_rules(#[case] items: Vec<Item>, #[case] expected: bool) {
        assert_eq!(effective_boolean_value(&items, SourceLocation::unknown()).unwrap(), expected);
    }

    #[test]
    fn ebv_of_several_atomics_fails() {
        let err = effective_boolean_value(&[Item::Integer(1), Item::Integer(2)], SourceLocation::new(1, 1)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0006);
    }

    #[test]
    fn take_pending_keeps_closed_state() {
        let mut state: IteratorState<i32> = IteratorState::Closed;
        assert_eq!(state.take_pending(), None);
        assert!(state.is_closed());
        let mut state = IteratorState::primed(Some(1));
        assert_eq!(state.take_pending(), Some(1));
        assert!(!state.has_pending());
        assert!(!state.is_closed());
    }
}

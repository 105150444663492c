//! Runtime variable bindings. Frames live in an arena indexed by
//! [`DynamicContextId`]; freed slots are reused, so an id must not be kept
//! after the iterator that allocated it was closed.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::distributed::{Collection, Table};
use crate::engine::flwor::tuple::{FlworTuple, TupleValue};
use crate::engine::function_item::Closure;
use crate::item::Item;
use crate::name::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicContextId(usize);

/// A bound value as seen through a lookup.
#[derive(Debug, Clone, Copy)]
pub enum VariableValue<'a> {
    Items(&'a [Item]),
    Collection(&'a Collection),
    Table(&'a Table),
}

#[derive(Debug, Default)]
struct Frame {
    parent: Option<DynamicContextId>,
    locals: BTreeMap<Name, Vec<Item>>,
    collections: BTreeMap<Name, Collection>,
    tables: BTreeMap<Name, Table>,
}

impl Frame {
    fn clear(&mut self) {
        self.locals.clear();
        self.collections.clear();
        self.tables.clear();
    }
}

#[derive(Debug, Default)]
pub struct DynamicContexts {
    frames: Vec<Frame>,
    free: Vec<usize>,
}

impl DynamicContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_root(&mut self) -> DynamicContextId {
        self.allocate(None)
    }

    pub fn new_child(&mut self, parent: DynamicContextId) -> DynamicContextId {
        self.allocate(Some(parent))
    }

    fn allocate(&mut self, parent: Option<DynamicContextId>) -> DynamicContextId {
        let frame = Frame { parent, ..Frame::default() };
        if let Some(slot) = self.free.pop() {
            self.frames[slot] = frame;
            DynamicContextId(slot)
        } else {
            self.frames.push(frame);
            DynamicContextId(self.frames.len() - 1)
        }
    }

    /// Return a frame to the arena.
    pub fn release(&mut self, ctx: DynamicContextId) {
        if let Some(frame) = self.frames.get_mut(ctx.0) {
            frame.clear();
            frame.parent = None;
            self.free.push(ctx.0);
        }
    }

    /// Number of frames currently in use.
    pub fn live_frames(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    /// Drop every local binding so the frame can be rebound for the next
    /// iteration.
    pub fn clear(&mut self, ctx: DynamicContextId) {
        if let Some(frame) = self.frames.get_mut(ctx.0) {
            frame.clear();
        }
    }

    pub fn bind_items(&mut self, ctx: DynamicContextId, name: Name, items: Vec<Item>) {
        if let Some(frame) = self.frames.get_mut(ctx.0) {
            frame.collections.remove(&name);
            frame.tables.remove(&name);
            frame.locals.insert(name, items);
        }
    }

    pub fn bind_collection(&mut self, ctx: DynamicContextId, name: Name, collection: Collection) {
        if let Some(frame) = self.frames.get_mut(ctx.0) {
            frame.locals.remove(&name);
            frame.tables.remove(&name);
            frame.collections.insert(name, collection);
        }
    }

    pub fn bind_table(&mut self, ctx: DynamicContextId, name: Name, table: Table) {
        if let Some(frame) = self.frames.get_mut(ctx.0) {
            frame.locals.remove(&name);
            frame.collections.remove(&name);
            frame.tables.insert(name, table);
        }
    }

    pub fn bind_value(&mut self, ctx: DynamicContextId, name: Name, value: TupleValue) {
        match value {
            TupleValue::Items(items) => self.bind_items(ctx, name, items),
            TupleValue::Collection(collection) => self.bind_collection(ctx, name, collection),
            TupleValue::Table(table) => self.bind_table(ctx, name, table),
        }
    }

    /// Clear `ctx` and bind every column of `tuple` into it.
    pub fn rebind_tuple(&mut self, ctx: DynamicContextId, tuple: &FlworTuple) {
        self.clear(ctx);
        for (name, value) in tuple.iter() {
            self.bind_value(ctx, name.clone(), value.clone());
        }
    }

    pub fn lookup(&self, ctx: DynamicContextId, name: &Name) -> Option<VariableValue<'_>> {
        let mut current = Some(ctx);
        while let Some(id) = current {
            let frame = self.frames.get(id.0)?;
            if let Some(items) = frame.locals.get(name) {
                return Some(VariableValue::Items(items));
            }
            if let Some(collection) = frame.collections.get(name) {
                return Some(VariableValue::Collection(collection));
            }
            if let Some(table) = frame.tables.get(name) {
                return Some(VariableValue::Table(table));
            }
            current = frame.parent;
        }
        None
    }

    /// Snapshot the current values of `names` visible from `ctx`. Names that
    /// are not bound are skipped.
    pub fn capture(&self, ctx: DynamicContextId, names: &BTreeSet<Name>) -> Closure {
        let mut closure = Closure::default();
        for name in names {
            match self.lookup(ctx, name) {
                Some(VariableValue::Items(items)) => {
                    closure.locals.insert(name.clone(), items.to_vec());
                }
                Some(VariableValue::Collection(collection)) => {
                    closure.collections.insert(name.clone(), collection.clone());
                }
                Some(VariableValue::Table(table)) => {
                    closure.tables.insert(name.clone(), table.clone());
                }
                None => {}
            }
        }
        closure
    }

    pub fn bind_closure(&mut self, ctx: DynamicContextId, closure: &Closure) {
        for (name, items) in &closure.locals {
            self.bind_items(ctx, name.clone(), items.clone());
        }
        for (name, collection) in &closure.collections {
            self.bind_collection(ctx, name.clone(), collection.clone());
        }
        for (name, table) in &closure.tables {
            self.bind_table(ctx, name.clone(), table.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_frames_see_parent_bindings() {
        let mut contexts = DynamicContexts::new();
        let root = contexts.new_root();
        contexts.bind_items(root, Name::local("x"), vec![Item::Integer(1)]);
        let child = contexts.new_child(root);
        contexts.bind_collection(child, Name::local("c"), Collection::from_items(vec![Item::Null], 2));

        assert!(matches!(contexts.lookup(child, &Name::local("x")), Some(VariableValue::Items([Item::Integer(1)]))));
        assert!(matches!(contexts.lookup(child, &Name::local("c")), Some(VariableValue::Collection(_))));
        assert!(contexts.lookup(root, &Name::local("c")).is_none());
    }

    #[test]
    fn released_slots_are_reused_empty() {
        let mut contexts = DynamicContexts::new();
        let root = contexts.new_root();
        let child = contexts.new_child(root);
        contexts.bind_items(child, Name::local("x"), vec![Item::Null]);
        contexts.release(child);
        assert_eq!(contexts.live_frames(), 1);
        let reused = contexts.new_child(root);
        assert_eq!(reused, child);
        assert!(contexts.lookup(reused, &Name::local("x")).is_none());
    }

    #[test]
    fn rebinding_replaces_previous_iteration() {
        let mut contexts = DynamicContexts::new();
        let root = contexts.new_root();
        let frame = contexts.new_child(root);
        contexts.rebind_tuple(frame, &FlworTuple::new().with_items(Name::local("a"), vec![Item::Integer(1)]));
        contexts.rebind_tuple(frame, &FlworTuple::new().with_items(Name::local("b"), vec![Item::Integer(2)]));
        assert!(contexts.lookup(frame, &Name::local("a")).is_none());
        assert!(contexts.lookup(frame, &Name::local("b")).is_some());
    }

    #[test]
    fn capture_snapshots_values() {
        let mut contexts = DynamicContexts::new();
        let root = contexts.new_root();
        contexts.bind_items(root, Name::local("x"), vec![Item::Integer(1)]);
        let closure = contexts.capture(root, &[Name::local("x"), Name::local("unbound")].into());
        contexts.bind_items(root, Name::local("x"), vec![Item::Integer(2)]);
        assert_eq!(closure.locals[&Name::local("x")], vec![Item::Integer(1)]);
        assert_eq!(closure.locals.len(), 1);
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compiler::dependencies::VariableDependencies;
use crate::engine::distributed::{Collection, Table};
use crate::item::Item;
use crate::name::Name;

/// Value of one tuple column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TupleValue {
    Items(Vec<Item>),
    Collection(Collection),
    Table(Table),
}

impl TupleValue {
    pub fn empty() -> Self {
        TupleValue::Items(Vec::new())
    }

    /// The value as local items; distributed values are collected.
    pub fn to_items(&self) -> Vec<Item> {
        match self {
            TupleValue::Items(items) => items.clone(),
            TupleValue::Collection(collection) => collection.collect(),
            TupleValue::Table(table) => table.to_objects().unwrap_or_default(),
        }
    }
}

/// One row of FLWOR bindings. Clauses derive new tuples with [`FlworTuple::with`]
/// and never change a tuple they received.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlworTuple {
    bindings: BTreeMap<Name, TupleValue>,
}

impl FlworTuple {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(&self, name: Name, value: TupleValue) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.insert(name, value);
        Self { bindings }
    }

    #[must_use]
    pub fn with_items(&self, name: Name, items: Vec<Item>) -> Self {
        self.with(name, TupleValue::Items(items))
    }

    pub fn get(&self, name: &Name) -> Option<&TupleValue> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.bindings.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &TupleValue)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Copy of the tuple restricted to the names `projection` mentions.
    #[must_use]
    pub fn project(&self, projection: &VariableDependencies) -> Self {
        Self {
            bindings: self
                .bindings
                .iter()
                .filter(|(name, _)| projection.contains_key(*name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

impl From<BTreeMap<Name, TupleValue>> for FlworTuple {
    fn from(bindings: BTreeMap<Name, TupleValue>) -> Self {
        Self { bindings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deriving_leaves_the_source_untouched() {
        let base = FlworTuple::new().with_items(Name::local("x"), vec![Item::Integer(1)]);
        let derived = base.with_items(Name::local("x"), vec![Item::Integer(2)]);
        assert_eq!(base.get(&Name::local("x")).unwrap().to_items(), vec![Item::Integer(1)]);
        assert_eq!(derived.get(&Name::local("x")).unwrap().to_items(), vec![Item::Integer(2)]);
    }
}

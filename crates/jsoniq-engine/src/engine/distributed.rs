//! In-process partitioned collections.
//!
//! [`Collection`] stands in for a distributed item collection and [`Table`]
//! for a distributed table of FLWOR tuples. Both are immutable, cheap to clone
//! and keep their partitions in order, so concatenating the partitions gives
//! the local result order.

use std::collections::BTreeMap;
use std::sync::Arc;

use compact_str::CompactString;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::compiler::dependencies::VariableDependencies;
use crate::engine::flwor::tuple::{FlworTuple, TupleValue};
use crate::error::{Error, Result, SourceLocation};
use crate::item::Item;
use crate::name::Name;

fn split<T>(mut rows: Vec<T>, partitions: usize) -> Vec<Vec<T>> {
    let partitions = partitions.max(1);
    let chunk = rows.len().div_ceil(partitions).max(1);
    let mut out = Vec::with_capacity(partitions);
    while rows.len() > chunk {
        let rest = rows.split_off(chunk);
        out.push(rows);
        rows = rest;
    }
    out.push(rows);
    out
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    partitions: Arc<Vec<Vec<Item>>>,
}

impl Collection {
    /// Split `items` into at most `partitions` contiguous partitions.
    pub fn from_items(items: Vec<Item>, partitions: usize) -> Self {
        Self { partitions: Arc::new(split(items, partitions)) }
    }

    pub fn from_partitions(partitions: Vec<Vec<Item>>) -> Self {
        Self { partitions: Arc::new(partitions) }
    }

    pub fn partitions(&self) -> &[Vec<Item>] {
        &self.partitions
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.partitions.iter().flatten()
    }

    /// First `n` items, scanning partitions only until enough were found.
    pub fn take(&self, n: usize) -> Vec<Item> {
        self.iter().take(n).cloned().collect()
    }

    pub fn collect(&self) -> Vec<Item> {
        self.iter().cloned().collect()
    }

    /// Apply `f` to every partition; `f` receives the global index of the
    /// partition's first item.
    pub fn map_partitions<F>(&self, mut f: F) -> Result<Collection>
    where
        F: FnMut(usize, &[Item]) -> Result<Vec<Item>>,
    {
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.partitions.len());
        for partition in self.partitions.iter() {
            out.push(f(offset, partition)?);
            offset += partition.len();
        }
        Ok(Collection::from_partitions(out))
    }

    pub fn union(&self, other: &Collection) -> Collection {
        Collection::from_partitions(self.partitions.iter().chain(other.partitions.iter()).cloned().collect())
    }
}

/// Rows of FLWOR tuples with a known set of columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Name>,
    partitions: Arc<Vec<Vec<FlworTuple>>>,
}

impl Table {
    pub fn from_rows(columns: Vec<Name>, rows: Vec<FlworTuple>, partitions: usize) -> Self {
        Self { columns, partitions: Arc::new(split(rows, partitions)) }
    }

    pub fn from_partitions(columns: Vec<Name>, partitions: Vec<Vec<FlworTuple>>) -> Self {
        Self { columns, partitions: Arc::new(partitions) }
    }

    pub fn columns(&self) -> &[Name] {
        &self.columns
    }

    pub fn partitions(&self) -> &[Vec<FlworTuple>] {
        &self.partitions
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &FlworTuple> {
        self.partitions.iter().flatten()
    }

    pub fn collect_rows(&self) -> Vec<FlworTuple> {
        self.rows().cloned().collect()
    }

    /// Apply `f` to every partition, producing a table with `columns`. `f`
    /// receives the global index of the partition's first row.
    pub fn map_partitions<F>(&self, columns: Vec<Name>, mut f: F) -> Result<Table>
    where
        F: FnMut(usize, &[FlworTuple]) -> Result<Vec<FlworTuple>>,
    {
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.partitions.len());
        for partition in self.partitions.iter() {
            out.push(f(offset, partition)?);
            offset += partition.len();
        }
        Ok(Table::from_partitions(columns, out))
    }

    /// Keep only the columns `projection` asks for.
    pub fn project(&self, projection: &VariableDependencies) -> Table {
        if self.columns.iter().all(|c| projection.contains_key(c)) {
            return self.clone();
        }
        let columns: Vec<Name> = self.columns.iter().filter(|c| projection.contains_key(*c)).cloned().collect();
        let partitions = self
            .partitions
            .iter()
            .map(|rows| rows.iter().map(|row| row.project(projection)).collect())
            .collect();
        Table::from_partitions(columns, partitions)
    }

    /// Table view of a sequence of objects: one column per key, in order of
    /// first appearance; a missing key is an empty column value.
    pub fn from_objects(items: &[Item], partitions: usize, location: SourceLocation) -> Result<Table> {
        let mut columns: Vec<CompactString> = Vec::new();
        for item in items {
            let Item::Object(members) = item else {
                return Err(Error::unexpected_type(
                    format!("Only objects can be stored in a table, got {}", item.dynamic_type()),
                    location,
                ));
            };
            for (key, _) in members.iter() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = items
            .iter()
            .map(|item| {
                let bindings: BTreeMap<Name, TupleValue> = columns
                    .iter()
                    .map(|key| (Name::local(key), TupleValue::Items(item.member(key).cloned().into_iter().collect())))
                    .collect();
                FlworTuple::from(bindings)
            })
            .collect();
        let columns = columns.iter().map(|c| Name::local(c)).collect();
        Ok(Table::from_rows(columns, rows, partitions))
    }

    /// Inverse of [`Table::from_objects`]: empty values are left out, values
    /// with several items become arrays.
    pub fn to_objects(&self) -> Result<Vec<Item>> {
        self.rows()
            .map(|row| {
                let mut members = Vec::with_capacity(self.columns.len());
                for column in &self.columns {
                    let mut items = match row.get(column) {
                        Some(value) => value.to_items(),
                        None => continue,
                    };
                    match items.len() {
                        0 => {}
                        1 => members.push((CompactString::from(column.local_name()), items.remove(0))),
                        _ => members.push((CompactString::from(column.local_name()), Item::array(items))),
                    }
                }
                Ok(Item::Object(Arc::new(members)))
            })
            .collect()
    }

    pub fn describe_columns(&self) -> String {
        self.columns.iter().map(|c| format!("${c}")).join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::dependencies::VariableDependency;

    #[test]
    fn partitions_preserve_order() {
        let items: Vec<Item> = (1..=10).map(Item::Integer).collect();
        let collection = Collection::from_items(items.clone(), 4);
        assert_eq!(collection.partition_count(), 4);
        assert_eq!(collection.collect(), items);
        assert_eq!(collection.take(2), vec![Item::Integer(1), Item::Integer(2)]);
        assert_eq!(collection.count(), 10);
    }

    #[test]
    fn empty_collection_has_one_empty_partition() {
        let collection = Collection::from_items(Vec::new(), 4);
        assert!(collection.is_empty());
        assert_eq!(collection.partition_count(), 1);
    }

    #[test]
    fn map_partitions_sees_global_offsets() {
        let collection = Collection::from_items((0..6).map(Item::Integer).collect(), 3);
        let mapped = collection
            .map_partitions(|offset, items| {
                #[allow(clippy::cast_possible_wrap)]
                Ok(items.iter().enumerate().map(|(i, _)| Item::Integer((offset + i) as i64)).collect())
            })
            .unwrap();
        assert_eq!(mapped.collect(), (0..6).map(Item::Integer).collect::<Vec<_>>());
    }

    #[test]
    fn objects_round_trip_through_tables() {
        let items = vec![
            Item::object([("a", Item::Integer(1)), ("b", Item::string("x"))]),
            Item::object([("a", Item::Integer(2))]),
        ];
        let table = Table::from_objects(&items, 2, SourceLocation::unknown()).unwrap();
        assert_eq!(table.columns(), &[Name::local("a"), Name::local("b")]);
        assert_eq!(table.to_objects().unwrap(), items);

        let projection: VariableDependencies = [(Name::local("a"), VariableDependency::Full)].into();
        let projected = table.project(&projection);
        assert_eq!(projected.columns(), &[Name::local("a")]);
        assert_eq!(projected.row_count(), 2);
    }
}

use core::cmp::Ordering;

use super::tuple::FlworTuple;
use super::{TupleInput, TupleSource, with_frame};
use crate::compiler::dependencies::VariableDependencies;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Table;
use crate::engine::iterator::{BoxedIterator, materialize_at_most_one};
use crate::engine::runtime::Runtime;
use crate::error::{Error, Result, SourceLocation};
use crate::item::{Item, compare_atomics};

#[derive(Debug)]
pub(crate) struct OrderingKey {
    pub(crate) expr: BoxedIterator,
    pub(crate) descending: bool,
    pub(crate) empty_greatest: bool,
}

/// `order by`: a stable sort of the whole tuple stream.
#[derive(Debug)]
pub(crate) struct OrderBySource {
    input: TupleInput,
    keys: Vec<OrderingKey>,
    results: std::vec::IntoIter<FlworTuple>,
    location: SourceLocation,
}

impl OrderBySource {
    pub(crate) fn new(input: TupleInput, keys: Vec<OrderingKey>, location: SourceLocation) -> Self {
        Self { input, keys, results: Vec::new().into_iter(), location }
    }
}

#[derive(Debug, Clone, Copy)]
struct Direction {
    descending: bool,
    empty_greatest: bool,
}

fn compare_keys(
    left: &[Option<Item>],
    right: &[Option<Item>],
    directions: &[Direction],
    location: SourceLocation,
) -> Result<Ordering> {
    for ((l, r), direction) in left.iter().zip(right).zip(directions) {
        let ordering = match (l, r) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) if direction.empty_greatest => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) if direction.empty_greatest => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(l), Some(r)) => compare_atomics(l, r, location)?,
        };
        let ordering = if direction.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

fn sort(
    keys: &mut [OrderingKey],
    rows: Vec<FlworTuple>,
    rt: &mut Runtime,
    ctx: DynamicContextId,
    location: SourceLocation,
) -> Result<Vec<FlworTuple>> {
    let mut keyed = with_frame(rt, ctx, |rt, frame| {
        rows.into_iter()
            .map(|row| {
                rt.contexts.rebind_tuple(frame, &row);
                let mut values = Vec::with_capacity(keys.len());
                for key in keys.iter_mut() {
                    let value = materialize_at_most_one(key.expr.as_mut(), rt, frame, "An order by key")?;
                    if let Some(item) = &value {
                        if !item.is_atomic() {
                            return Err(Error::unexpected_type(
                                format!("Order by keys must be atomic, got {}", item.dynamic_type()),
                                key.expr.location(),
                            ));
                        }
                    }
                    values.push(value);
                }
                Ok((values, row))
            })
            .collect::<Result<Vec<_>>>()
    })?;
    let directions: Vec<Direction> =
        keys.iter().map(|k| Direction { descending: k.descending, empty_greatest: k.empty_greatest }).collect();
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        compare_keys(a, b, &directions, location).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

impl TupleSource for OrderBySource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let rows = self.input.all(rt, ctx)?;
        self.results = sort(&mut self.keys, rows, rt, ctx, self.location)?.into_iter();
        Ok(())
    }

    fn pull(&mut self, _rt: &mut Runtime) -> Result<Option<FlworTuple>> {
        Ok(self.results.next())
    }

    fn stop(&mut self, _rt: &mut Runtime) {
        self.results = Vec::new().into_iter();
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
        let sorted = sort(&mut self.keys, left.collect_rows(), rt, ctx, self.location)?;
        Ok(Some(Table::from_rows(left.columns().to_vec(), sorted, rt.parallelism())))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const ASCENDING: Direction = Direction { descending: false, empty_greatest: false };

    #[rstest]
    #[case(None, Some(Item::Integer(1)), ASCENDING, Ordering::Less)]
    #[case(None, Some(Item::Integer(1)), Direction { descending: false, empty_greatest: true }, Ordering::Greater)]
    #[case(None, Some(Item::Integer(1)), Direction { descending: true, empty_greatest: false }, Ordering::Greater)]
    #[case(Some(Item::Integer(2)), Some(Item::Double(1.5)), ASCENDING, Ordering::Greater)]
    #[case(Some(Item::Null), Some(Item::string("a")), ASCENDING, Ordering::Less)]
    fn empty_and_mixed_keys(
        #[case] left: Option<Item>,
        #[case] right: Option<Item>,
        #[case] direction: Direction,
        #[case] expected: Ordering,
    ) {
        let ordering = compare_keys(&[left], &[right], &[direction], SourceLocation::unknown()).unwrap();
        assert_eq!(ordering, expected);
    }

    #[rstest]
    fn incomparable_keys_are_type_errors() {
        let err = compare_keys(
            &[Some(Item::string("a"))],
            &[Some(Item::Integer(1))],
            &[ASCENDING],
            SourceLocation::unknown(),
        )
        .unwrap_err();
        assert_eq!(err.code_enum(), crate::error::ErrorCode::XPTY0004);
    }
}

//! Arithmetic, comparison, logical and string operators.

use core::cmp::Ordering;

use crate::ast::{ArithmeticOp, ComparisonOp};
use crate::engine::context::DynamicContextId;
use crate::engine::iterator::{
    BoxedIterator, Compute, RuntimeIterator, ebv_of, materialize, materialize_at_most_one,
};
use crate::engine::runtime::Runtime;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::item::{Item, compare_atomics};
use crate::types::SequenceType;

/// One operand of an arithmetic or value comparison: at most one atomic item.
fn atomic_operand(
    iter: &mut dyn RuntimeIterator,
    rt: &mut Runtime,
    ctx: DynamicContextId,
    what: &str,
) -> Result<Option<Item>> {
    let location = iter.location();
    match materialize_at_most_one(iter, rt, ctx, what)? {
        Some(item) if !item.is_atomic() => {
            Err(Error::unexpected_type(format!("{what} expects an atomic operand, got {}", item.dynamic_type()), location))
        }
        other => Ok(other),
    }
}

fn division_by_zero(location: SourceLocation) -> Error {
    Error::from_code(ErrorCode::FOAR0001, "Division by zero").at(location)
}

fn overflow(location: SourceLocation) -> Error {
    Error::from_code(ErrorCode::FOAR0002, "Numeric overflow").at(location)
}

/// Apply `op` to two numeric items, promoting integer → decimal → double.
pub(crate) fn arithmetic(op: ArithmeticOp, left: &Item, right: &Item, location: SourceLocation) -> Result<Item> {
    match (left, right) {
        (Item::Integer(a), Item::Integer(b)) => integer_arithmetic(op, *a, *b, location),
        (l, r) if l.is_numeric() && r.is_numeric() => {
            let (a, b) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            let double = matches!(l, Item::Double(_)) || matches!(r, Item::Double(_));
            float_arithmetic(op, a, b, double, location)
        }
        _ => Err(Error::unexpected_type(
            format!("Arithmetic is not defined on {} and {}", left.dynamic_type(), right.dynamic_type()),
            location,
        )),
    }
}

#[allow(clippy::cast_precision_loss)]
fn integer_arithmetic(op: ArithmeticOp, a: i64, b: i64, location: SourceLocation) -> Result<Item> {
    let checked = match op {
        ArithmeticOp::Add => a.checked_add(b),
        ArithmeticOp::Sub => a.checked_sub(b),
        ArithmeticOp::Mul => a.checked_mul(b),
        ArithmeticOp::Div => {
            if b == 0 {
                return Err(division_by_zero(location));
            }
            return Ok(Item::Decimal(a as f64 / b as f64));
        }
        ArithmeticOp::IDiv | ArithmeticOp::Mod if b == 0 => return Err(division_by_zero(location)),
        ArithmeticOp::IDiv => a.checked_div(b),
        ArithmeticOp::Mod => a.checked_rem(b),
    };
    checked.map(Item::Integer).ok_or_else(|| overflow(location))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_arithmetic(op: ArithmeticOp, a: f64, b: f64, double: bool, location: SourceLocation) -> Result<Item> {
    let wrap = |v: f64| if double { Item::Double(v) } else { Item::Decimal(v) };
    Ok(match op {
        ArithmeticOp::Add => wrap(a + b),
        ArithmeticOp::Sub => wrap(a - b),
        ArithmeticOp::Mul => wrap(a * b),
        ArithmeticOp::Div => {
            if b == 0.0 && !double {
                return Err(division_by_zero(location));
            }
            wrap(a / b)
        }
        ArithmeticOp::Mod => {
            if b == 0.0 && !double {
                return Err(division_by_zero(location));
            }
            wrap(a % b)
        }
        ArithmeticOp::IDiv => {
            if b == 0.0 {
                return Err(division_by_zero(location));
            }
            let quotient = (a / b).trunc();
            if !quotient.is_finite() || quotient.abs() >= i64::MAX as f64 {
                return Err(overflow(location));
            }
            Item::Integer(quotient as i64)
        }
    })
}

#[derive(Debug)]
pub(crate) struct Arithmetic {
    pub(crate) op: ArithmeticOp,
    pub(crate) left: BoxedIterator,
    pub(crate) right: BoxedIterator,
    pub(crate) location: SourceLocation,
}

impl Compute for Arithmetic {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let left = atomic_operand(self.left.as_mut(), rt, ctx, "arithmetic expression")?;
        let right = atomic_operand(self.right.as_mut(), rt, ctx, "arithmetic expression")?;
        match (left, right) {
            (Some(l), Some(r)) => Ok(vec![arithmetic(self.op, &l, &r, self.location)?]),
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Negate {
    pub(crate) operand: BoxedIterator,
    pub(crate) location: SourceLocation,
}

impl Compute for Negate {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        Ok(match atomic_operand(self.operand.as_mut(), rt, ctx, "unary minus")? {
            None => Vec::new(),
            Some(Item::Integer(i)) => vec![Item::Integer(i.checked_neg().ok_or_else(|| overflow(self.location))?)],
            Some(Item::Decimal(d)) => vec![Item::Decimal(-d)],
            Some(Item::Double(d)) => vec![Item::Double(-d)],
            Some(other) => {
                return Err(Error::unexpected_type(
                    format!("Unary minus is not defined on {}", other.dynamic_type()),
                    self.location,
                ));
            }
        })
    }
}

/// Compare two atomics under `op`. NaN is unequal to everything.
pub(crate) fn compare_items(op: ComparisonOp, left: &Item, right: &Item, location: SourceLocation) -> Result<bool> {
    let nan = |i: &Item| i.as_f64().is_some_and(f64::is_nan);
    if left.is_numeric() && right.is_numeric() && (nan(left) || nan(right)) {
        return Ok(op == ComparisonOp::Ne);
    }
    let ordering = compare_atomics(left, right, location)?;
    Ok(match op {
        ComparisonOp::Eq => ordering == Ordering::Equal,
        ComparisonOp::Ne => ordering != Ordering::Equal,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Le => ordering != Ordering::Greater,
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Ge => ordering != Ordering::Less,
    })
}

#[derive(Debug)]
pub(crate) struct Comparison {
    pub(crate) op: ComparisonOp,
    pub(crate) general: bool,
    pub(crate) left: BoxedIterator,
    pub(crate) right: BoxedIterator,
    pub(crate) location: SourceLocation,
}

impl Comparison {
    fn general_comparison(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<bool> {
        let left = materialize(self.left.as_mut(), rt, ctx)?;
        let right = materialize(self.right.as_mut(), rt, ctx)?;
        for l in &left {
            for r in &right {
                if !l.is_atomic() || !r.is_atomic() {
                    return Err(Error::unexpected_type("General comparisons require atomic operands", self.location));
                }
                if compare_items(self.op, l, r, self.location)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl Compute for Comparison {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        if self.general {
            return Ok(vec![Item::Boolean(self.general_comparison(rt, ctx)?)]);
        }
        let left = atomic_operand(self.left.as_mut(), rt, ctx, "value comparison")?;
        let right = atomic_operand(self.right.as_mut(), rt, ctx, "value comparison")?;
        match (left, right) {
            (Some(l), Some(r)) => Ok(vec![Item::Boolean(compare_items(self.op, &l, &r, self.location)?)]),
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Logical {
    And(BoxedIterator, BoxedIterator),
    Or(BoxedIterator, BoxedIterator),
    Not(BoxedIterator),
}

impl Compute for Logical {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let value = match self {
            Logical::And(left, right) => ebv_of(left.as_mut(), rt, ctx)? && ebv_of(right.as_mut(), rt, ctx)?,
            Logical::Or(left, right) => ebv_of(left.as_mut(), rt, ctx)? || ebv_of(right.as_mut(), rt, ctx)?,
            Logical::Not(operand) => !ebv_of(operand.as_mut(), rt, ctx)?,
        };
        Ok(vec![Item::Boolean(value)])
    }
}

/// `a || b`; an empty operand counts as the empty string.
#[derive(Debug)]
pub(crate) struct StringConcat {
    pub(crate) left: BoxedIterator,
    pub(crate) right: BoxedIterator,
}

impl Compute for StringConcat {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let mut out = String::new();
        for operand in [&mut self.left, &mut self.right] {
            if let Some(item) = atomic_operand(operand.as_mut(), rt, ctx, "string concatenation")? {
                out.push_str(&item.string_value()?);
            }
        }
        Ok(vec![Item::string(out)])
    }
}

#[derive(Debug)]
pub(crate) struct InstanceOf {
    pub(crate) operand: BoxedIterator,
    pub(crate) seq_type: SequenceType,
}

impl Compute for InstanceOf {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let items = materialize(self.operand.as_mut(), rt, ctx)?;
        Ok(vec![Item::Boolean(self.seq_type.matches(&items))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArithmeticOp::Add, Item::Integer(2), Item::Integer(3), Item::Integer(5))]
    #[case(ArithmeticOp::Div, Item::Integer(3), Item::Integer(2), Item::Decimal(1.5))]
    #[case(ArithmeticOp::IDiv, Item::Integer(7), Item::Integer(2), Item::Integer(3))]
    #[case(ArithmeticOp::Mod, Item::Integer(7), Item::Integer(2), Item::Integer(1))]
    #[case(ArithmeticOp::Mul, Item::Integer(2), Item::Decimal(1.25), Item::Decimal(2.5))]
    #[case(ArithmeticOp::Sub, Item::Decimal(1.0), Item::Double(0.5), Item::Double(0.5))]
    fn numeric_promotion(#[case] op: ArithmeticOp, #[case] l: Item, #[case] r: Item, #[case] expected: Item) {
        assert_eq!(arithmetic(op, &l, &r, SourceLocation::unknown()).unwrap(), expected);
    }

    #[rstest]
    #[case(ArithmeticOp::Div, Item::Integer(1), Item::Integer(0), ErrorCode::FOAR0001)]
    #[case(ArithmeticOp::Mod, Item::Decimal(1.0), Item::Integer(0), ErrorCode::FOAR0001)]
    #[case(ArithmeticOp::Add, Item::Integer(i64::MAX), Item::Integer(1), ErrorCode::FOAR0002)]
    #[case(ArithmeticOp::Add, Item::string("1"), Item::Integer(1), ErrorCode::XPTY0004)]
    fn arithmetic_errors(#[case] op: ArithmeticOp, #[case] l: Item, #[case] r: Item, #[case] code: ErrorCode) {
        assert_eq!(arithmetic(op, &l, &r, SourceLocation::unknown()).unwrap_err().code_enum(), code);
    }

    #[test]
    fn double_division_by_zero_is_infinite() {
        let result = arithmetic(ArithmeticOp::Div, &Item::Double(1.0), &Item::Integer(0), SourceLocation::unknown());
        assert_eq!(result.unwrap(), Item::Double(f64::INFINITY));
    }

    #[test]
    fn nan_is_unequal_to_itself() {
        let nan = Item::Double(f64::NAN);
        assert!(!compare_items(ComparisonOp::Eq, &nan, &nan, SourceLocation::unknown()).unwrap());
        assert!(compare_items(ComparisonOp::Ne, &nan, &Item::Integer(1), SourceLocation::unknown()).unwrap());
    }
}

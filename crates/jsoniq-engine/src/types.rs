//! Item types and sequence types used for declarations and runtime checks.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Item,
    Atomic,
    Object,
    Array,
    Function,
    String,
    Integer,
    Decimal,
    Double,
    Numeric,
    Boolean,
    Null,
}

impl ItemType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "item" => ItemType::Item,
            "atomic" | "anyAtomicType" => ItemType::Atomic,
            "object" => ItemType::Object,
            "array" => ItemType::Array,
            "function" => ItemType::Function,
            "string" => ItemType::String,
            "integer" => ItemType::Integer,
            "decimal" => ItemType::Decimal,
            "double" => ItemType::Double,
            "numeric" => ItemType::Numeric,
            "boolean" => ItemType::Boolean,
            "null" => ItemType::Null,
            _ => return None,
        })
    }

    /// Whether `self` is the same as or a supertype of `other`.
    pub fn is_supertype_of(self, other: ItemType) -> bool {
        match self {
            ItemType::Item => true,
            ItemType::Atomic => !matches!(other, ItemType::Item | ItemType::Object | ItemType::Array | ItemType::Function),
            ItemType::Numeric => matches!(other, ItemType::Numeric | ItemType::Integer | ItemType::Decimal | ItemType::Double),
            // integers are decimals
            ItemType::Decimal => matches!(other, ItemType::Decimal | ItemType::Integer),
            _ => self == other,
        }
    }

    pub fn matches(self, item: &Item) -> bool {
        self.is_supertype_of(item.dynamic_type())
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemType::Item => "item",
            ItemType::Atomic => "atomic",
            ItemType::Object => "object",
            ItemType::Array => "array",
            ItemType::Function => "function",
            ItemType::String => "string",
            ItemType::Integer => "integer",
            ItemType::Decimal => "decimal",
            ItemType::Double => "double",
            ItemType::Numeric => "numeric",
            ItemType::Boolean => "boolean",
            ItemType::Null => "null",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arity {
    One,
    OneOrZero,
    OneOrMore,
    ZeroOrMore,
}

impl Arity {
    pub fn allows(self, count: usize) -> bool {
        match self {
            Arity::One => count == 1,
            Arity::OneOrZero => count <= 1,
            Arity::OneOrMore => count >= 1,
            Arity::ZeroOrMore => true,
        }
    }

    /// Singleton arities prefer local evaluation.
    pub fn is_singleton(self) -> bool {
        matches!(self, Arity::One | Arity::OneOrZero)
    }

    fn symbol(self) -> &'static str {
        match self {
            Arity::One => "",
            Arity::OneOrZero => "?",
            Arity::OneOrMore => "+",
            Arity::ZeroOrMore => "*",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceType {
    Empty,
    Of(ItemType, Arity),
}

impl SequenceType {
    pub const ITEM_STAR: SequenceType = SequenceType::Of(ItemType::Item, Arity::ZeroOrMore);
    pub const INTEGER: SequenceType = SequenceType::Of(ItemType::Integer, Arity::One);

    pub const fn new(item_type: ItemType, arity: Arity) -> Self {
        SequenceType::Of(item_type, arity)
    }

    pub fn is_empty_sequence(&self) -> bool {
        matches!(self, SequenceType::Empty)
    }

    pub fn item_type(&self) -> Option<ItemType> {
        match self {
            SequenceType::Empty => None,
            SequenceType::Of(t, _) => Some(*t),
        }
    }

    pub fn arity(&self) -> Option<Arity> {
        match self {
            SequenceType::Empty => None,
            SequenceType::Of(_, a) => Some(*a),
        }
    }

    /// Declared types that can hold at most one item are evaluated locally.
    pub fn prefers_local(&self) -> bool {
        match self {
            SequenceType::Empty => true,
            SequenceType::Of(_, arity) => arity.is_singleton(),
        }
    }

    pub fn matches(&self, items: &[Item]) -> bool {
        match self {
            SequenceType::Empty => items.is_empty(),
            SequenceType::Of(item_type, arity) => arity.allows(items.len()) && items.iter().all(|i| item_type.matches(i)),
        }
    }
}

impl Default for SequenceType {
    fn default() -> Self {
        SequenceType::ITEM_STAR
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceType::Empty => f.write_str("()"),
            SequenceType::Of(t, a) => write!(f, "{t}{}", a.symbol()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SequenceType::INTEGER, vec![Item::Integer(1)], true)]
    #[case(SequenceType::INTEGER, vec![], false)]
    #[case(SequenceType::new(ItemType::Decimal, Arity::OneOrMore), vec![Item::Integer(1), Item::Decimal(0.5)], true)]
    #[case(SequenceType::new(ItemType::Atomic, Arity::ZeroOrMore), vec![Item::array(vec![])], false)]
    #[case(SequenceType::Empty, vec![], true)]
    fn sequence_type_matching(#[case] ty: SequenceType, #[case] items: Vec<Item>, #[case] expected: bool) {
        assert_eq!(ty.matches(&items), expected, "{ty}");
    }

    #[test]
    fn singleton_types_prefer_local() {
        assert!(SequenceType::new(ItemType::Item, Arity::OneOrZero).prefers_local());
        assert!(SequenceType::Empty.prefers_local());
        assert!(!SequenceType::ITEM_STAR.prefers_local());
        assert_eq!(SequenceType::ITEM_STAR.to_string(), "item*");
    }
}

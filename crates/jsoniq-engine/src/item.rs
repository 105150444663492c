//! Item model: JSON-like values (objects, arrays, atomics) plus function items.

use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::engine::function_item::FunctionItem;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::types::ItemType;

/// An ordered, possibly empty list of items.
pub type Sequence = Vec<Item>;

/// Object members in insertion order.
pub type ObjectMembers = Vec<(CompactString, Item)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(#[serde(with = "canonical_float")] f64),
    Double(#[serde(with = "canonical_float")] f64),
    String(CompactString),
    Array(Arc<Vec<Item>>),
    Object(Arc<ObjectMembers>),
    Function(Arc<FunctionItem>),
}

impl Item {
    pub fn string(s: impl Into<CompactString>) -> Self {
        Item::String(s.into())
    }

    pub fn array(items: Vec<Item>) -> Self {
        Item::Array(Arc::new(items))
    }

    pub fn object<K: Into<CompactString>>(members: impl IntoIterator<Item = (K, Item)>) -> Self {
        Item::Object(Arc::new(members.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    pub fn is_atomic(&self) -> bool {
        !matches!(self, Item::Array(_) | Item::Object(_) | Item::Function(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Item::Integer(_) | Item::Decimal(_) | Item::Double(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Item::Function(_))
    }

    pub fn dynamic_type(&self) -> ItemType {
        match self {
            Item::Null => ItemType::Null,
            Item::Boolean(_) => ItemType::Boolean,
            Item::Integer(_) => ItemType::Integer,
            Item::Decimal(_) => ItemType::Decimal,
            Item::Double(_) => ItemType::Double,
            Item::String(_) => ItemType::String,
            Item::Array(_) => ItemType::Array,
            Item::Object(_) => ItemType::Object,
            Item::Function(_) => ItemType::Function,
        }
    }

    /// Numeric value as a double, if the item is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Item::Integer(i) => Some(*i as f64),
            Item::Decimal(d) | Item::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Item::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<FunctionItem>> {
        match self {
            Item::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Member lookup on objects; `None` for missing keys and non-objects.
    pub fn member(&self, key: &str) -> Option<&Item> {
        match self {
            Item::Object(members) => members.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// String value of an atomic item: strings unquoted, numbers in their
    /// canonical lexical form.
    pub fn string_value(&self) -> Result<String> {
        match self {
            Item::Null => Ok("null".to_string()),
            Item::Boolean(b) => Ok(b.to_string()),
            Item::Integer(i) => Ok(i.to_string()),
            Item::Decimal(d) => Ok(format_decimal(*d)),
            Item::Double(d) => Ok(format_double(*d)),
            Item::String(s) => Ok(s.to_string()),
            Item::Array(_) | Item::Object(_) => Ok(self.to_json_string()?),
            Item::Function(_) => Err(functions_not_serializable()),
        }
    }

    /// Serialise as JSON text. Function items cannot be serialised.
    pub fn to_json_string(&self) -> Result<String> {
        let value = self.to_json()?;
        Ok(value.to_string())
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        use serde_json::Value;
        Ok(match self {
            Item::Null => Value::Null,
            Item::Boolean(b) => Value::Bool(*b),
            Item::Integer(i) => Value::from(*i),
            Item::Decimal(d) | Item::Double(d) => {
                serde_json::Number::from_f64(*d).map_or_else(|| Value::String(format_double(*d)), Value::Number)
            }
            Item::String(s) => Value::String(s.to_string()),
            Item::Array(items) => Value::Array(items.iter().map(Item::to_json).collect::<Result<_>>()?),
            Item::Object(members) => {
                let mut map = serde_json::Map::with_capacity(members.len());
                for (k, v) in members.iter() {
                    map.insert(k.to_string(), v.to_json()?);
                }
                Value::Object(map)
            }
            Item::Function(_) => return Err(functions_not_serializable()),
        })
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Item::Null,
            Value::Bool(b) => Item::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Item::Integer(i),
                None => Item::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Item::string(s.as_str()),
            Value::Array(items) => Item::array(items.iter().map(Item::from_json).collect()),
            Value::Object(map) => Item::object(map.iter().map(|(k, v)| (k.as_str(), Item::from_json(v)))),
        }
    }

    /// Value equality used by grouping and equi-joins. Numbers compare
    /// numerically across integer/decimal/double, NaN equals NaN.
    pub fn deep_equals(&self, other: &Item) -> bool {
        match (self, other) {
            (Item::Function(_), _) | (_, Item::Function(_)) => false,
            (Item::Array(a), Item::Array(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_equals(y)),
            (Item::Object(a), Item::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| other.member(k).is_some_and(|w| v.deep_equals(w)))
                    && b.iter().all(|(k, _)| self.member(k).is_some())
            }
            _ if self.is_numeric() && other.is_numeric() => {
                let (x, y) = (self.as_f64().unwrap_or(f64::NAN), other.as_f64().unwrap_or(f64::NAN));
                x == y || (x.is_nan() && y.is_nan())
            }
            (Item::Null, Item::Null) => true,
            (Item::Boolean(a), Item::Boolean(b)) => a == b,
            (Item::String(a), Item::String(b)) => a == b,
            _ => false,
        }
    }
}

/// Functions are not comparable: any equality involving one is false.
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::Null, Item::Null) => true,
            (Item::Boolean(a), Item::Boolean(b)) => a == b,
            (Item::Integer(a), Item::Integer(b)) => a == b,
            (Item::Decimal(a), Item::Decimal(b)) | (Item::Double(a), Item::Double(b)) => a == b,
            (Item::String(a), Item::String(b)) => a == b,
            (Item::Array(a), Item::Array(b)) => a == b,
            (Item::Object(a), Item::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Self {
        Item::Integer(i)
    }
}

impl From<f64> for Item {
    fn from(d: f64) -> Self {
        Item::Double(d)
    }
}

impl From<bool> for Item {
    fn from(b: bool) -> Self {
        Item::Boolean(b)
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::string(s)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::String(s) => write!(f, "\"{s}\""),
            Item::Function(func) => write!(f, "{}", func.identifier()),
            other => match other.to_json_string() {
                Ok(json) => f.write_str(&json),
                Err(_) => f.write_str("<item>"),
            },
        }
    }
}

fn functions_not_serializable() -> Error {
    Error::from_code(ErrorCode::JNRT0005, "Function items cannot be serialized")
}

pub(crate) fn format_decimal(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e18 { format!("{d:.0}") } else { d.to_string() }
}

pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if d != 0.0 && (d.abs() >= 1e6 || d.abs() < 1e-6) {
        format!("{d:E}")
    } else {
        format_decimal(d)
    }
}

/// Serde form of decimal and double values: finite numbers stay JSON
/// numbers, NaN and the infinities travel as their canonical strings.
pub(crate) mod canonical_float {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::format_double;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&format_double(*value))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Wire::deserialize(deserializer)? {
            Wire::Number(value) => Ok(value),
            Wire::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" | "INF" => Ok(f64::INFINITY),
                "-Infinity" | "-INF" => Ok(f64::NEG_INFINITY),
                _ => Err(serde::de::Error::custom(format!("'{text}' is not a canonical double"))),
            },
        }
    }
}

/// Ordering between two atomic items as used by value comparisons and
/// order-by. Null sorts before every other atomic; numbers compare across
/// numeric types. Other mixed kinds are a type error.
pub fn compare_atomics(left: &Item, right: &Item, location: SourceLocation) -> Result<Ordering> {
    match (left, right) {
        (Item::Null, Item::Null) => Ok(Ordering::Equal),
        (Item::Null, r) if r.is_atomic() => Ok(Ordering::Less),
        (l, Item::Null) if l.is_atomic() => Ok(Ordering::Greater),
        (Item::Integer(a), Item::Integer(b)) => Ok(a.cmp(b)),
        (l, r) if l.is_numeric() && r.is_numeric() => {
            let (a, b) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            Ok(a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()).reverse()))
        }
        (Item::String(a), Item::String(b)) => Ok(a.cmp(b)),
        (Item::Boolean(a), Item::Boolean(b)) => Ok(a.cmp(b)),
        _ => Err(Error::unexpected_type(
            format!(
                "Invalid comparison between {} and {}",
                left.dynamic_type(),
                right.dynamic_type()
            ),
            location,
        )),
    }
}

/// Hashable form of an atomic item used for grouping and equi-joins. Numbers
/// of every numeric type share one representation so `1` and `1.0` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AtomicKey {
    Null,
    Boolean(bool),
    Number(u64),
    NaN,
    String(CompactString),
}

impl AtomicKey {
    pub(crate) fn from_item(item: &Item, location: SourceLocation) -> Result<Self> {
        Ok(match item {
            Item::Null => AtomicKey::Null,
            Item::Boolean(b) => AtomicKey::Boolean(*b),
            Item::String(s) => AtomicKey::String(s.clone()),
            numeric if numeric.is_numeric() => {
                let value = numeric.as_f64().unwrap_or(f64::NAN);
                if value.is_nan() {
                    AtomicKey::NaN
                } else {
                    // -0.0 and 0.0 are the same key
                    AtomicKey::Number((value + 0.0).to_bits())
                }
            }
            other => {
                return Err(Error::unexpected_type(
                    format!("Grouping and join keys must be atomic, got {}", other.dynamic_type()),
                    location,
                ));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_keeps_member_order() {
        let item = Item::object([("b", Item::Integer(1)), ("a", Item::array(vec![Item::Null, Item::from(true)]))]);
        let json = item.to_json_string().unwrap();
        assert_eq!(json, r#"{"b":1,"a":[null,true]}"#);
    }

    #[test]
    fn non_finite_numbers_survive_serde() {
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let json = serde_json::to_value(Item::Double(value)).unwrap();
            assert!(json["Double"].is_string(), "{json}");
            let Item::Double(back) = serde_json::from_value(json).unwrap() else { panic!("expected a double") };
            assert!(back == value || (back.is_nan() && value.is_nan()));
        }
        let json = serde_json::to_value(Item::Decimal(1.5)).unwrap();
        assert_eq!(json["Decimal"], serde_json::json!(1.5));
        assert!(serde_json::from_value::<Item>(serde_json::json!({"Double": "many"})).is_err());
    }

    #[test]
    fn numbers_have_canonical_string_values() {
        assert_eq!(Item::Double(2.0).string_value().unwrap(), "2");
        assert_eq!(Item::Double(f64::NAN).string_value().unwrap(), "NaN");
        assert_eq!(Item::Decimal(1.5).string_value().unwrap(), "1.5");
        assert_eq!(Item::Double(1e20).string_value().unwrap(), "1E20");
    }

    #[test]
    fn deep_equality_is_numeric_across_types() {
        assert!(Item::Integer(1).deep_equals(&Item::Double(1.0)));
        assert!(!Item::Integer(1).deep_equals(&Item::string("1")));
        assert_ne!(Item::Integer(1), Item::Double(1.0));
    }

    #[test]
    fn numeric_keys_collide_across_types() {
        let loc = SourceLocation::unknown();
        assert_eq!(AtomicKey::from_item(&Item::Integer(1), loc).unwrap(), AtomicKey::from_item(&Item::Double(1.0), loc).unwrap());
        assert_ne!(AtomicKey::from_item(&Item::Integer(1), loc).unwrap(), AtomicKey::from_item(&Item::string("1"), loc).unwrap());
        assert!(AtomicKey::from_item(&Item::array(vec![]), loc).is_err());
    }

    #[test]
    fn null_sorts_first_and_mixed_kinds_fail() {
        let loc = SourceLocation::unknown();
        assert_eq!(compare_atomics(&Item::Null, &Item::Integer(0), loc).unwrap(), Ordering::Less);
        assert_eq!(compare_atomics(&Item::Integer(2), &Item::Decimal(1.5), loc).unwrap(), Ordering::Greater);
        let err = compare_atomics(&Item::string("a"), &Item::Integer(1), loc).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }
}

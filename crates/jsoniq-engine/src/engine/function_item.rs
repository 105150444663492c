//! Function values: named references, inline functions and partial
//! applications, each carrying a body plan and a snapshot of the variables
//! the body reads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};

use crate::ast::Expr;
use crate::engine::distributed::{Collection, Table};
use crate::error::{Error, ErrorCode};
use crate::item::Item;
use crate::name::{FunctionIdentifier, Name};
use crate::types::SequenceType;

/// Values of the free variables of a function body, captured when the
/// function item was created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Closure {
    pub locals: BTreeMap<Name, Vec<Item>>,
    pub collections: BTreeMap<Name, Collection>,
    pub tables: BTreeMap<Name, Table>,
}

impl Closure {
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty() && self.collections.is_empty() && self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locals.len() + self.collections.len() + self.tables.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub params: Vec<SequenceType>,
    pub return_type: SequenceType,
}

impl FunctionSignature {
    /// Signature accepting and returning `item*` for every parameter.
    pub fn untyped(arity: usize) -> Self {
        Self { params: vec![SequenceType::ITEM_STAR; arity], return_type: SequenceType::ITEM_STAR }
    }
}

#[derive(Clone, Deserialize)]
#[serde(try_from = "SerializedFunction")]
pub struct FunctionItem {
    identifier: FunctionIdentifier,
    params: Vec<Name>,
    signature: FunctionSignature,
    body: Arc<Expr>,
    closure: Closure,
}

impl FunctionItem {
    pub fn new(
        identifier: FunctionIdentifier,
        params: Vec<Name>,
        signature: FunctionSignature,
        body: Arc<Expr>,
        closure: Closure,
    ) -> Self {
        Self { identifier, params, signature, body, closure }
    }

    pub fn identifier(&self) -> &FunctionIdentifier {
        &self.identifier
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[Name] {
        &self.params
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn body(&self) -> &Arc<Expr> {
        &self.body
    }

    pub fn closure(&self) -> &Closure {
        &self.closure
    }

    /// Copy that shares neither the body plan nor the closure maps. Each
    /// dynamic call runs on its own copy.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            params: self.params.clone(),
            signature: self.signature.clone(),
            body: Arc::new(Expr::clone(&self.body)),
            closure: self.closure.clone(),
        }
    }

}

/// Function items have no identity-based equality.
impl PartialEq for FunctionItem {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl fmt::Debug for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionItem")
            .field("identifier", &self.identifier)
            .field("params", &self.params)
            .field("closure", &self.closure.len())
            .finish_non_exhaustive()
    }
}

/// Wire form: everything structured except the body, which travels as an
/// opaque base64 blob.
#[derive(Deserialize)]
struct SerializedFunction {
    identifier: FunctionIdentifier,
    params: Vec<Name>,
    signature: FunctionSignature,
    body: String,
    closure: Closure,
}

#[derive(Serialize)]
struct SerializedFunctionRef<'a> {
    identifier: &'a FunctionIdentifier,
    params: &'a [Name],
    signature: &'a FunctionSignature,
    body: String,
    closure: &'a Closure,
}

impl Serialize for FunctionItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let plan = serde_json::to_vec(self.body.as_ref()).map_err(|e| {
            serde::ser::Error::custom(format!("Cannot serialize the body of {}: {e}", self.identifier))
        })?;
        SerializedFunctionRef {
            identifier: &self.identifier,
            params: &self.params,
            signature: &self.signature,
            body: STANDARD.encode(plan),
            closure: &self.closure,
        }
        .serialize(serializer)
    }
}

impl TryFrom<SerializedFunction> for FunctionItem {
    type Error = Error;

    fn try_from(wire: SerializedFunction) -> Result<Self, Self::Error> {
        let plan = STANDARD.decode(wire.body.as_bytes()).map_err(|e| {
            Error::from_code(ErrorCode::JNRT0003, format!("Corrupt function body for {}: {e}", wire.identifier))
        })?;
        let body: Expr = serde_json::from_slice(&plan).map_err(|e| {
            Error::from_code(ErrorCode::JNRT0003, format!("Corrupt function body for {}: {e}", wire.identifier))
        })?;
        Ok(Self {
            identifier: wire.identifier,
            params: wire.params,
            signature: wire.signature,
            body: Arc::new(body),
            closure: wire.closure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::{add, int, var};

    fn adder() -> FunctionItem {
        let mut closure = Closure::default();
        closure.locals.insert(Name::local("offset"), vec![Item::Integer(10)]);
        FunctionItem::new(
            FunctionIdentifier::new(Name::generated("anonymous-function"), 1),
            vec![Name::local("x")],
            FunctionSignature::untyped(1),
            Arc::new(add(var("x"), var("offset"))),
            closure,
        )
    }

    #[test]
    fn function_items_never_compare_equal() {
        let f = adder();
        assert!(f != f.clone());
        assert_ne!(Item::Function(Arc::new(f.clone())), Item::Function(Arc::new(f)));
    }

    #[test]
    fn serialization_keeps_closure_and_body() {
        let f = adder();
        let json = serde_json::to_value(&f).unwrap();
        assert!(json["body"].is_string());
        assert_eq!(json["closure"]["locals"].as_object().map(serde_json::Map::len), Some(1));

        let back: FunctionItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.identifier(), f.identifier());
        assert_eq!(back.params(), f.params());
        assert_eq!(back.body().as_ref(), f.body().as_ref());
        assert_eq!(back.closure().locals[&Name::local("offset")], vec![Item::Integer(10)]);
    }

    #[test]
    fn corrupt_body_is_rejected() {
        let mut json = serde_json::to_value(adder()).unwrap();
        json["body"] = serde_json::Value::String("not base64!".into());
        assert!(serde_json::from_value::<FunctionItem>(json).is_err());
    }

    #[test]
    fn deep_copy_does_not_share_the_body() {
        let f = adder();
        let copy = f.deep_copy();
        assert!(!Arc::ptr_eq(f.body(), copy.body()));
        assert_eq!(copy.body().as_ref(), &add(var("x"), var("offset")));
        assert_ne!(copy.body().as_ref(), &int(0));
        assert_eq!(copy.closure().locals, f.closure().locals);
    }
}

//! Interned, namespace-qualified names for variables and functions.

use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};
use string_cache::DefaultAtom;

/// Namespace of the built-in function library.
pub const FN_NS: &str = "http://jsoniq.org/functions";
/// Namespace of the error codes defined by XPath/XQuery.
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
/// Namespace of engine-specific error codes.
pub const ENGINE_ERR_NS: &str = "http://jsoniq.org/errors";
/// Namespace used for names the engine generates itself.
pub const ENGINE_NS: &str = "http://jsoniq.org/engine";

/// A qualified name. Equality and ordering compare the namespace first, then
/// the local part; both parts are interned so cloning is cheap.
///
/// On the wire a name is a single string: the bare local part when there is
/// no namespace, `Q{namespace}local` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Name {
    pub namespace: Option<DefaultAtom>,
    pub local: DefaultAtom,
}

impl Name {
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        Self { namespace: namespace.map(DefaultAtom::from), local: DefaultAtom::from(local) }
    }

    /// Name in no namespace.
    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    /// Name of a built-in function.
    pub fn builtin(local: &str) -> Self {
        Self::new(Some(FN_NS), local)
    }

    /// Synthetic name used for generated parameters and bindings.
    pub fn generated(local: &str) -> Self {
        Self::new(Some(ENGINE_NS), local)
    }

    /// `$$`: the context item inside predicates.
    pub fn context_item() -> Self {
        Self::generated("context-item")
    }

    /// Position of the context item inside predicates.
    pub fn context_position() -> Self {
        Self::generated("context-position")
    }

    /// Size of the sequence a predicate filters.
    pub fn context_count() -> Self {
        Self::generated("context-count")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn is_in_namespace(&self, namespace: &str) -> bool {
        self.namespace.as_deref() == Some(namespace)
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.namespace
            .as_deref()
            .cmp(&other.namespace.as_deref())
            .then_with(|| self.local.as_ref().cmp(other.local.as_ref()))
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            None | Some(FN_NS) => write!(f, "{}", self.local),
            Some(ENGINE_NS) if *self == Name::context_item() => write!(f, "$"),
            Some(ns) => write!(f, "Q{{{ns}}}{}", self.local),
        }
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        match name.namespace {
            None => name.local.to_string(),
            Some(ns) => format!("Q{{{ns}}}{}", name.local),
        }
    }
}

impl TryFrom<String> for Name {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let Some(rest) = raw.strip_prefix("Q{") else {
            return if raw.is_empty() { Err("empty name".to_string()) } else { Ok(Name::local(&raw)) };
        };
        match rest.split_once('}') {
            Some((ns, local)) if !ns.is_empty() && !local.is_empty() => Ok(Name::new(Some(ns), local)),
            _ => Err(format!("malformed expanded name '{raw}'")),
        }
    }
}

/// Function identity: a name plus an arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionIdentifier {
    pub name: Name,
    pub arity: usize,
}

impl FunctionIdentifier {
    pub fn new(name: Name, arity: usize) -> Self {
        Self { name, arity }
    }
}

impl fmt::Display for FunctionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.arity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_compares_namespace_then_local() {
        let a = Name::local("b");
        let b = Name::new(Some("urn:x"), "a");
        assert!(a < b, "no namespace sorts first");
        assert!(Name::local("a") < Name::local("b"));
        assert_eq!(Name::local("x"), Name::new(None, "x"));
        assert_ne!(Name::local("x"), Name::new(Some("urn:x"), "x"));
    }

    #[test]
    fn display_hides_builtin_namespace() {
        assert_eq!(Name::builtin("concat").to_string(), "concat");
        assert_eq!(Name::new(Some("urn:m"), "f").to_string(), "Q{urn:m}f");
        assert_eq!(FunctionIdentifier::new(Name::local("f"), 2).to_string(), "f#2");
    }

    #[test]
    fn names_serialize_as_expanded_strings() {
        let names = [Name::local("x"), Name::builtin("concat"), Name::context_item(), Name::new(Some("urn:m"), "f")];
        for name in names {
            let json = serde_json::to_value(&name).unwrap();
            assert!(json.is_string(), "{json}");
            assert_eq!(serde_json::from_value::<Name>(json).unwrap(), name);
        }
        assert_eq!(serde_json::to_value(Name::builtin("count")).unwrap(), format!("Q{{{FN_NS}}}count"));
    }

    #[test]
    fn malformed_expanded_names_are_rejected() {
        for raw in ["", "Q{urn:m", "Q{}f", "Q{urn:m}"] {
            assert!(serde_json::from_value::<Name>(serde_json::Value::String(raw.into())).is_err(), "{raw}");
        }
    }
}

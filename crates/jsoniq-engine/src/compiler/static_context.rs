//! Compile-time scope chain. Frames live in an arena and are referenced by
//! [`StaticContextId`]; a child frame only ever writes its own bindings.

use std::collections::BTreeMap;

use crate::error::{Error, Result, SourceLocation};
use crate::mode::ExecutionMode;
use crate::name::Name;
use crate::types::SequenceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticContextId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableBinding {
    pub seq_type: SequenceType,
    pub location: SourceLocation,
    pub mode: ExecutionMode,
}

#[derive(Debug, Default)]
struct Frame {
    parent: Option<StaticContextId>,
    variables: BTreeMap<Name, VariableBinding>,
}

#[derive(Debug, Default)]
pub struct StaticContexts {
    frames: Vec<Frame>,
}

impl StaticContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_root(&mut self) -> StaticContextId {
        self.push(None)
    }

    pub fn new_child(&mut self, parent: StaticContextId) -> StaticContextId {
        self.push(Some(parent))
    }

    fn push(&mut self, parent: Option<StaticContextId>) -> StaticContextId {
        self.frames.push(Frame { parent, variables: BTreeMap::new() });
        StaticContextId(self.frames.len() - 1)
    }

    pub fn parent(&self, ctx: StaticContextId) -> Option<StaticContextId> {
        self.frames.get(ctx.0).and_then(|f| f.parent)
    }

    /// Bind `name` in the local frame of `ctx`. Existing local bindings are
    /// overwritten; callers check [`has_variable`](Self::has_variable) first
    /// when re-declaration is an error.
    pub fn add_variable(
        &mut self,
        ctx: StaticContextId,
        name: Name,
        seq_type: SequenceType,
        location: SourceLocation,
        mode: ExecutionMode,
    ) -> Result<()> {
        let frame = self.frames.get_mut(ctx.0).ok_or_else(|| unknown_context(ctx))?;
        frame.variables.insert(name, VariableBinding { seq_type, location, mode });
        Ok(())
    }

    /// Whether `name` is bound in `ctx` or any ancestor.
    pub fn is_in_scope(&self, ctx: StaticContextId, name: &Name) -> bool {
        self.lookup(ctx, name).is_some()
    }

    /// Whether `name` is bound in the local frame of `ctx` only.
    pub fn has_variable(&self, ctx: StaticContextId, name: &Name) -> bool {
        self.frames.get(ctx.0).is_some_and(|f| f.variables.contains_key(name))
    }

    pub fn lookup(&self, ctx: StaticContextId, name: &Name) -> Option<&VariableBinding> {
        let mut current = Some(ctx);
        while let Some(id) = current {
            let frame = self.frames.get(id.0)?;
            if let Some(binding) = frame.variables.get(name) {
                return Some(binding);
            }
            current = frame.parent;
        }
        None
    }

    pub fn variable_sequence_type(&self, ctx: StaticContextId, name: &Name) -> Result<SequenceType> {
        self.lookup(ctx, name).map(|b| b.seq_type).ok_or_else(|| unbound(name))
    }

    pub fn variable_storage_mode(&self, ctx: StaticContextId, name: &Name) -> Result<ExecutionMode> {
        self.lookup(ctx, name).map(|b| b.mode).ok_or_else(|| unbound(name))
    }

    /// Copy every binding visible from `module_ctx` whose name lives in
    /// `namespace` into the local frame of `ctx`.
    pub fn import_module_context(
        &mut self,
        ctx: StaticContextId,
        module_ctx: StaticContextId,
        namespace: &str,
    ) -> Result<()> {
        let mut imported = BTreeMap::new();
        let mut current = Some(module_ctx);
        while let Some(id) = current {
            let frame = self.frames.get(id.0).ok_or_else(|| unknown_context(id))?;
            for (name, binding) in &frame.variables {
                if name.is_in_namespace(namespace) {
                    // inner frames shadow outer ones
                    imported.entry(name.clone()).or_insert(*binding);
                }
            }
            current = frame.parent;
        }
        let frame = self.frames.get_mut(ctx.0).ok_or_else(|| unknown_context(ctx))?;
        frame.variables.extend(imported);
        Ok(())
    }

    /// Names visible from `ctx`, innermost first.
    pub fn variable_names(&self, ctx: StaticContextId) -> Vec<Name> {
        let mut names = Vec::new();
        let mut current = Some(ctx);
        while let Some(id) = current {
            let Some(frame) = self.frames.get(id.0) else { break };
            for name in frame.variables.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            current = frame.parent;
        }
        names
    }
}

fn unbound(name: &Name) -> Error {
    Error::internal(format!("Variable ${name} not found in the static context"))
}

fn unknown_context(ctx: StaticContextId) -> Error {
    Error::internal(format!("Static context {} does not exist", ctx.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn bind(contexts: &mut StaticContexts, ctx: StaticContextId, name: &str, mode: ExecutionMode) {
        contexts.add_variable(ctx, Name::local(name), SequenceType::ITEM_STAR, SourceLocation::unknown(), mode).unwrap();
    }

    #[test]
    fn lookups_walk_the_parent_chain() {
        let mut contexts = StaticContexts::new();
        let root = contexts.new_root();
        bind(&mut contexts, root, "x", ExecutionMode::Rdd);
        let child = contexts.new_child(root);
        bind(&mut contexts, child, "y", ExecutionMode::Local);

        assert!(contexts.is_in_scope(child, &Name::local("x")));
        assert!(!contexts.has_variable(child, &Name::local("x")));
        assert!(!contexts.is_in_scope(root, &Name::local("y")));
        assert_eq!(contexts.variable_storage_mode(child, &Name::local("x")).unwrap(), ExecutionMode::Rdd);
    }

    #[test]
    fn child_bindings_shadow_without_touching_parent() {
        let mut contexts = StaticContexts::new();
        let root = contexts.new_root();
        bind(&mut contexts, root, "x", ExecutionMode::Rdd);
        let child = contexts.new_child(root);
        bind(&mut contexts, child, "x", ExecutionMode::Local);
        assert_eq!(contexts.variable_storage_mode(child, &Name::local("x")).unwrap(), ExecutionMode::Local);
        assert_eq!(contexts.variable_storage_mode(root, &Name::local("x")).unwrap(), ExecutionMode::Rdd);
    }

    #[test]
    fn missing_binding_is_an_internal_error() {
        let mut contexts = StaticContexts::new();
        let root = contexts.new_root();
        let err = contexts.variable_sequence_type(root, &Name::local("nope")).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::JNRT0003);
    }

    #[test]
    fn import_copies_only_the_module_namespace() {
        let mut contexts = StaticContexts::new();
        let library = contexts.new_root();
        let ns = "urn:lib";
        contexts
            .add_variable(library, Name::new(Some(ns), "v"), SequenceType::INTEGER, SourceLocation::unknown(), ExecutionMode::Local)
            .unwrap();
        bind(&mut contexts, library, "private", ExecutionMode::Local);

        let main = contexts.new_root();
        contexts.import_module_context(main, library, ns).unwrap();
        assert!(contexts.has_variable(main, &Name::new(Some(ns), "v")));
        assert!(!contexts.is_in_scope(main, &Name::local("private")));
        assert_eq!(contexts.variable_names(main), vec![Name::new(Some(ns), "v")]);
    }
}

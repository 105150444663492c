//! Per-evaluation runtime state threaded through every iterator call.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{Expr, Param};
use crate::config::RuntimeConfiguration;
use crate::engine::context::{DynamicContextId, DynamicContexts};
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::io::FileReader;
use crate::mode::ExecutionMode;
use crate::name::FunctionIdentifier;
use crate::types::SequenceType;

/// A declared (named) function after static analysis.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub identifier: FunctionIdentifier,
    pub params: Vec<Param>,
    pub return_type: SequenceType,
    pub body: Arc<Expr>,
    pub location: SourceLocation,
}

impl FunctionDefinition {
    pub fn body_mode(&self) -> ExecutionMode {
        self.body.mode
    }
}

/// Declared functions of a compiled query, including imported libraries.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<FunctionIdentifier, Arc<FunctionDefinition>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: FunctionDefinition) {
        tracing::debug!(function = %definition.identifier, "registered function");
        self.functions.insert(definition.identifier.clone(), Arc::new(definition));
    }

    pub fn get(&self, identifier: &FunctionIdentifier) -> Option<&Arc<FunctionDefinition>> {
        self.functions.get(identifier)
    }

    pub fn contains(&self, identifier: &FunctionIdentifier) -> bool {
        self.functions.contains_key(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.functions.values().map(|def| &**def)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

pub struct Runtime {
    pub(crate) contexts: DynamicContexts,
    pub(crate) functions: Arc<FunctionRegistry>,
    config: Arc<RuntimeConfiguration>,
    reader: Arc<dyn FileReader>,
    globals: DynamicContextId,
    parallelism: usize,
}

impl Runtime {
    pub fn new(
        config: Arc<RuntimeConfiguration>,
        functions: Arc<FunctionRegistry>,
        reader: Arc<dyn FileReader>,
    ) -> Result<Self> {
        let parallelism = config.parallelism()?;
        let mut contexts = DynamicContexts::new();
        let globals = contexts.new_root();
        Ok(Self { contexts, functions, config, reader, globals, parallelism })
    }

    pub fn config(&self) -> &RuntimeConfiguration {
        &self.config
    }

    pub fn reader(&self) -> &dyn FileReader {
        self.reader.as_ref()
    }

    pub fn contexts(&self) -> &DynamicContexts {
        &self.contexts
    }

    pub fn contexts_mut(&mut self) -> &mut DynamicContexts {
        &mut self.contexts
    }

    /// Frame holding the prolog variables; function bodies run in children of it.
    pub fn globals(&self) -> DynamicContextId {
        self.globals
    }

    /// Number of partitions for collections created during this evaluation.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn function(&self, identifier: &FunctionIdentifier, location: SourceLocation) -> Result<Arc<FunctionDefinition>> {
        self.functions
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::from_code(ErrorCode::XPST0017, format!("Undefined function {identifier}")).at(location))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("functions", &self.functions.len())
            .field("live_frames", &self.contexts.live_frames())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

//! From parsed modules to an analysed query ready for iterator building.

pub mod catalogue;
pub mod dependencies;
pub mod static_context;
pub mod visitor;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use catalogue::{DeclaredFunction, FunctionCatalogue};
pub use static_context::{StaticContextId, StaticContexts, VariableBinding};
pub use visitor::{StaticContextVisitor, VisitorConfig};

use crate::ast::{Module, VariableDecl};
use crate::engine::runtime::{FunctionDefinition, FunctionRegistry};
use crate::error::{Error, ErrorCode, Result};
use crate::name::FunctionIdentifier;
use crate::parser::parse_module;

/// Library modules available for import, keyed by namespace.
#[derive(Debug, Clone, Default)]
pub struct LibraryModules {
    modules: BTreeMap<String, Module>,
}

impl LibraryModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: Module) -> Result<()> {
        let Some(namespace) = module.namespace.clone() else {
            return Err(Error::from_code(ErrorCode::XPST0003, "Only library modules can be imported"));
        };
        tracing::debug!(%namespace, "added library module");
        self.modules.insert(namespace, module);
        Ok(())
    }

    /// Parse `text` as a library module and add it.
    pub fn add_source(&mut self, text: &str) -> Result<()> {
        self.add(parse_module(text)?)
    }

    pub fn get(&self, namespace: &str) -> Option<&Module> {
        self.modules.get(namespace)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Libraries transitively imported by `module`, each after its own imports.
    fn resolve_imports(&self, module: &Module) -> Result<Vec<Module>> {
        let mut ordered = Vec::new();
        let mut done = BTreeSet::new();
        let mut active = BTreeSet::new();
        self.visit_imports(module, &mut ordered, &mut done, &mut active)?;
        Ok(ordered)
    }

    fn visit_imports(
        &self,
        module: &Module,
        ordered: &mut Vec<Module>,
        done: &mut BTreeSet<String>,
        active: &mut BTreeSet<String>,
    ) -> Result<()> {
        for import in &module.imports {
            if done.contains(&import.namespace) {
                continue;
            }
            if !active.insert(import.namespace.clone()) {
                return Err(Error::resource(format!("Cyclic import of module {}", import.namespace)).at(import.location));
            }
            let Some(library) = self.modules.get(&import.namespace) else {
                return Err(Error::resource(format!("Module {} cannot be found", import.namespace)).at(import.location));
            };
            self.visit_imports(library, ordered, done, active)?;
            active.remove(&import.namespace);
            done.insert(import.namespace.clone());
            ordered.push(library.clone());
        }
        Ok(())
    }
}

/// A main module after static analysis, with the libraries it imports and
/// the registry of every declared function.
#[derive(Debug)]
pub struct CompiledQuery {
    pub module: Module,
    pub libraries: Vec<Module>,
    pub functions: Arc<FunctionRegistry>,
    pub contexts: StaticContexts,
    pub root_context: StaticContextId,
}

impl CompiledQuery {
    /// Prolog variables in initialisation order: imported libraries first.
    pub fn global_variables(&self) -> impl Iterator<Item = &VariableDecl> {
        self.libraries.iter().chain(std::iter::once(&self.module)).flat_map(|m| m.variables.iter())
    }

    pub fn external_variables(&self) -> impl Iterator<Item = &VariableDecl> {
        self.global_variables().filter(|v| v.external)
    }
}

/// Parse and analyse a main module.
pub fn compile(text: &str, libraries: &LibraryModules) -> Result<CompiledQuery> {
    compile_module(parse_module(text)?, libraries)
}

/// Analyse an already parsed main module.
pub fn compile_module(mut module: Module, libraries: &LibraryModules) -> Result<CompiledQuery> {
    if module.is_library() {
        return Err(Error::from_code(ErrorCode::XPST0003, "A library module cannot be executed"));
    }
    let mut imported = libraries.resolve_imports(&module)?;
    let mut contexts = StaticContexts::new();
    let mut catalogue = FunctionCatalogue::new();
    let root_context = StaticContextVisitor::analyze(&mut contexts, &mut catalogue, &mut module, &mut imported)?;

    let mut functions = FunctionRegistry::new();
    for declaration in imported.iter().chain(std::iter::once(&module)).flat_map(|m| m.functions.iter()) {
        functions.register(FunctionDefinition {
            identifier: FunctionIdentifier::new(declaration.name.clone(), declaration.params.len()),
            params: declaration.params.clone(),
            return_type: declaration.return_type,
            body: Arc::new(declaration.body.clone()),
            location: declaration.location,
        });
    }
    tracing::debug!(functions = functions.len(), libraries = imported.len(), "compiled query");
    Ok(CompiledQuery { module, libraries: imported, functions: Arc::new(functions), contexts, root_context })
}

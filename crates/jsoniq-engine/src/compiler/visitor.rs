//! Static context resolution.
//!
//! The visitor walks a module twice with the same [`FunctionCatalogue`]:
//! the hoisting pass records function signatures, call-site argument modes
//! and body modes without resolving unset modes; the resolution pass reads
//! those facts back, pins every remaining unset mode to local and reports
//! signature problems. Every expression and clause ends up annotated with
//! the static context it was visited in and its execution mode.

use std::collections::BTreeMap;

use crate::ast::{Clause, ClauseKind, Expr, ExprKind, FunctionDecl, Module, VariableDecl};
use crate::compiler::catalogue::{DeclaredFunction, FunctionCatalogue};
use crate::compiler::static_context::{StaticContextId, StaticContexts};
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::functions::{BuiltinFunction, BuiltinKind, is_builtin_name, lookup_builtin};
use crate::mode::{
    ExecutionMode, conditional_mode, flwor_mode, for_clause_mode, inherited_clause_mode, sequence_mode, switch_mode,
};
use crate::name::{FunctionIdentifier, Name};
use crate::types::{Arity, ItemType, SequenceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitorConfig {
    pub set_unset_to_local: bool,
    pub suppress_signature_collisions: bool,
}

impl VisitorConfig {
    pub const HOISTING: VisitorConfig = VisitorConfig { set_unset_to_local: false, suppress_signature_collisions: true };
    pub const RESOLUTION: VisitorConfig =
        VisitorConfig { set_unset_to_local: true, suppress_signature_collisions: false };
}

const SINGLE_ITEM: SequenceType = SequenceType::new(ItemType::Item, Arity::One);
const OPTIONAL_ITEM: SequenceType = SequenceType::new(ItemType::Item, Arity::OneOrZero);

pub struct StaticContextVisitor<'a> {
    contexts: &'a mut StaticContexts,
    catalogue: &'a mut FunctionCatalogue,
    config: VisitorConfig,
}

impl<'a> StaticContextVisitor<'a> {
    pub fn new(contexts: &'a mut StaticContexts, catalogue: &'a mut FunctionCatalogue, config: VisitorConfig) -> Self {
        Self { contexts, catalogue, config }
    }

    /// Run both passes over `main` and the library modules it imports.
    /// `libraries` must be ordered so that every module comes after the
    /// modules it imports.
    pub fn analyze(
        contexts: &mut StaticContexts,
        catalogue: &mut FunctionCatalogue,
        main: &mut Module,
        libraries: &mut [Module],
    ) -> Result<StaticContextId> {
        let mut root = None;
        for (pass, config) in [("hoisting", VisitorConfig::HOISTING), ("resolution", VisitorConfig::RESOLUTION)] {
            tracing::debug!(pass, libraries = libraries.len(), "static analysis pass");
            catalogue.begin_pass();
            let mut visitor = StaticContextVisitor::new(contexts, catalogue, config);
            root = Some(visitor.visit_program(main, libraries)?);
        }
        root.ok_or_else(|| Error::internal("static analysis ran no pass"))
    }

    /// One pass over a main module and its libraries, each starting from a
    /// fresh root context. Returns the main module's context.
    pub fn visit_program(&mut self, main: &mut Module, libraries: &mut [Module]) -> Result<StaticContextId> {
        let mut library_contexts: BTreeMap<String, StaticContextId> = BTreeMap::new();
        for library in libraries.iter_mut() {
            let root = self.contexts.new_root();
            self.import_libraries(root, library, &library_contexts)?;
            let module_ctx = self.visit_module(library, root)?;
            if let Some(namespace) = &library.namespace {
                library_contexts.insert(namespace.clone(), module_ctx);
            }
        }
        let root = self.contexts.new_root();
        self.import_libraries(root, main, &library_contexts)?;
        self.visit_module(main, root)
    }

    fn import_libraries(
        &mut self,
        root: StaticContextId,
        module: &Module,
        library_contexts: &BTreeMap<String, StaticContextId>,
    ) -> Result<()> {
        for import in &module.imports {
            let Some(module_ctx) = library_contexts.get(&import.namespace) else {
                return Err(Error::resource(format!("Module {} cannot be found", import.namespace)).at(import.location));
            };
            self.contexts.import_module_context(root, *module_ctx, &import.namespace)?;
        }
        Ok(())
    }

    /// Prolog then body. Function signatures are registered before any
    /// variable initializer is visited; functions see every prolog variable.
    pub fn visit_module(&mut self, module: &mut Module, ctx: StaticContextId) -> Result<StaticContextId> {
        let module_ctx = self.contexts.new_child(ctx);
        module.static_context = Some(module_ctx);
        for function in &module.functions {
            let identifier = FunctionIdentifier::new(function.name.clone(), function.params.len());
            let declaration = DeclaredFunction {
                params: function.params.clone(),
                return_type: function.return_type,
                location: function.location,
            };
            self.catalogue.declare(identifier, declaration, self.config.suppress_signature_collisions)?;
        }
        for variable in &mut module.variables {
            self.visit_variable_declaration(variable, module_ctx)?;
        }
        for function in &mut module.functions {
            self.visit_function_declaration(function, module_ctx)?;
        }
        if let Some(body) = &mut module.body {
            self.visit_expr(body, module_ctx)?;
        }
        Ok(module_ctx)
    }

    fn resolve(&self, mode: ExecutionMode) -> ExecutionMode {
        mode.resolve_unset(self.config.set_unset_to_local)
    }

    fn visit_variable_declaration(&mut self, variable: &mut VariableDecl, module_ctx: StaticContextId) -> Result<()> {
        if let Some(expr) = &mut variable.expr {
            self.visit_expr(expr, module_ctx)?;
        }
        if self.contexts.has_variable(module_ctx, &variable.name) {
            return Err(Error::variable_already_exists(&variable.name, variable.location));
        }
        let mode = match &variable.expr {
            Some(expr) if !variable.external => self.resolve(expr.mode),
            _ => ExecutionMode::Local,
        };
        let seq_type = variable.seq_type.unwrap_or_default();
        self.contexts.add_variable(module_ctx, variable.name.clone(), seq_type, variable.location, mode)
    }

    fn visit_function_declaration(&mut self, function: &mut FunctionDecl, module_ctx: StaticContextId) -> Result<()> {
        let identifier = FunctionIdentifier::new(function.name.clone(), function.params.len());
        let modes = self.catalogue.parameter_modes(&identifier);
        let function_ctx = self.contexts.new_child(module_ctx);
        for (param, mode) in function.params.iter().zip(modes) {
            self.contexts.add_variable(function_ctx, param.name.clone(), param.seq_type, function.location, mode)?;
        }
        self.visit_expr(&mut function.body, function_ctx)?;
        let body_mode = self.resolve(function.body.mode);
        self.catalogue.register_body_mode(&identifier, body_mode);
        Ok(())
    }

    fn unknown_function(name: &Name, arity: usize, location: SourceLocation) -> Error {
        let message = if is_builtin_name(name) {
            format!("Function {name} does not accept {arity} argument(s)")
        } else {
            format!("Undefined function {name}#{arity}")
        };
        Error::from_code(ErrorCode::XPST0017, message).at(location)
    }

    /// Mode of a call to `name` and bookkeeping of its argument modes.
    fn function_call_mode(
        &mut self,
        name: &Name,
        arg_modes: Vec<ExecutionMode>,
        location: SourceLocation,
    ) -> Result<ExecutionMode> {
        let identifier = FunctionIdentifier::new(name.clone(), arg_modes.len());
        if self.catalogue.contains(&identifier) {
            self.catalogue.record_call(&identifier, arg_modes);
            return Ok(self.catalogue.body_mode(&identifier));
        }
        match lookup_builtin(name, arg_modes.len()) {
            Some(BuiltinFunction { kind: BuiltinKind::ItemMap(_), .. }) => {
                Ok(distributed_if(arg_modes.first().copied().unwrap_or(ExecutionMode::Local)))
            }
            Some(builtin) => Ok(builtin.mode),
            None => Err(Self::unknown_function(name, arg_modes.len(), location)),
        }
    }

    pub fn visit_expr(&mut self, expr: &mut Expr, ctx: StaticContextId) -> Result<()> {
        expr.static_context = Some(ctx);
        let location = expr.location;
        if let ExprKind::VarRef(name) = &expr.kind {
            let Some(binding) = self.contexts.lookup(ctx, name).copied() else {
                return Err(Error::undeclared_variable(name, location));
            };
            expr.sequence_type = Some(binding.seq_type);
            expr.mode = self.resolve(binding.mode);
            return Ok(());
        }
        let mode = self.visit_kind(&mut expr.kind, ctx, location)?;
        expr.mode = self.resolve(mode);
        Ok(())
    }

    fn visit_all(&mut self, exprs: &mut [Expr], ctx: StaticContextId) -> Result<Vec<ExecutionMode>> {
        exprs
            .iter_mut()
            .map(|e| {
                self.visit_expr(e, ctx)?;
                Ok(e.mode)
            })
            .collect()
    }

    fn visit_kind(&mut self, kind: &mut ExprKind, ctx: StaticContextId, location: SourceLocation) -> Result<ExecutionMode> {
        Ok(match kind {
            ExprKind::Literal(_) => ExecutionMode::Local,
            ExprKind::VarRef(name) => return Err(Error::internal(format!("variable ${name} visited as an expression"))),
            ExprKind::ContextItem => {
                if !self.contexts.is_in_scope(ctx, &Name::context_item()) {
                    return Err(Error::undeclared_variable(&Name::context_item(), location));
                }
                ExecutionMode::Local
            }
            ExprKind::Sequence(items) => sequence_mode(self.visit_all(items, ctx)?),
            ExprKind::Arithmetic { left, right, .. }
            | ExprKind::Comparison { left, right, .. }
            | ExprKind::And(left, right)
            | ExprKind::Or(left, right)
            | ExprKind::StringConcat(left, right)
            | ExprKind::Range(left, right) => {
                self.visit_expr(left, ctx)?;
                self.visit_expr(right, ctx)?;
                ExecutionMode::Local
            }
            ExprKind::Negate(operand) | ExprKind::Not(operand) | ExprKind::InstanceOf { operand, .. } => {
                self.visit_expr(operand, ctx)?;
                ExecutionMode::Local
            }
            ExprKind::ObjectConstructor(pairs) => {
                for (key, value) in pairs {
                    self.visit_expr(key, ctx)?;
                    self.visit_expr(value, ctx)?;
                }
                ExecutionMode::Local
            }
            ExprKind::ArrayConstructor(content) => {
                if let Some(content) = content {
                    self.visit_expr(content, ctx)?;
                }
                ExecutionMode::Local
            }
            ExprKind::If { condition, then_branch, else_branch } => {
                self.visit_expr(condition, ctx)?;
                self.visit_expr(then_branch, ctx)?;
                self.visit_expr(else_branch, ctx)?;
                conditional_mode(then_branch.mode, else_branch.mode)
            }
            ExprKind::Switch { test, cases, default } => {
                self.visit_expr(test, ctx)?;
                let mut results = Vec::with_capacity(cases.len());
                for case in cases.iter_mut() {
                    self.visit_all(&mut case.tests, ctx)?;
                    self.visit_expr(&mut case.result, ctx)?;
                    results.push(case.result.mode);
                }
                self.visit_expr(default, ctx)?;
                switch_mode(default.mode, results)
            }
            ExprKind::Typeswitch { operand, cases, default_var, default } => {
                self.visit_expr(operand, ctx)?;
                let mut results = Vec::with_capacity(cases.len());
                for case in cases.iter_mut() {
                    let case_ctx = self.contexts.new_child(ctx);
                    if let Some(var) = &case.var {
                        let seq_type = match case.types.as_slice() {
                            [single] => *single,
                            _ => SequenceType::ITEM_STAR,
                        };
                        self.contexts.add_variable(case_ctx, var.clone(), seq_type, location, ExecutionMode::Local)?;
                    }
                    self.visit_expr(&mut case.result, case_ctx)?;
                    results.push(case.result.mode);
                }
                let default_ctx = self.contexts.new_child(ctx);
                if let Some(var) = default_var {
                    self.contexts.add_variable(
                        default_ctx,
                        var.clone(),
                        SequenceType::ITEM_STAR,
                        location,
                        ExecutionMode::Local,
                    )?;
                }
                self.visit_expr(default, default_ctx)?;
                switch_mode(default.mode, results)
            }
            ExprKind::Quantified { bindings, satisfies, .. } => {
                let mut scope = ctx;
                for binding in bindings.iter_mut() {
                    self.visit_expr(&mut binding.expr, scope)?;
                    let child = self.contexts.new_child(scope);
                    let seq_type = binding.seq_type.unwrap_or(SINGLE_ITEM);
                    self.contexts.add_variable(child, binding.var.clone(), seq_type, location, ExecutionMode::Local)?;
                    scope = child;
                }
                self.visit_expr(satisfies, scope)?;
                ExecutionMode::Local
            }
            ExprKind::FunctionCall { name, args } => {
                let mut arg_modes = Vec::with_capacity(args.len());
                let partial = args.iter().any(Option::is_none);
                for arg in args.iter_mut() {
                    match arg {
                        Some(arg) => {
                            self.visit_expr(arg, ctx)?;
                            arg_modes.push(if partial { ExecutionMode::Local } else { arg.mode });
                        }
                        None => arg_modes.push(ExecutionMode::Local),
                    }
                }
                let mode = self.function_call_mode(name, arg_modes, location)?;
                if partial { ExecutionMode::Local } else { mode }
            }
            ExprKind::NamedFunctionRef { name, arity } => {
                self.function_call_mode(name, vec![ExecutionMode::Local; *arity], location)?;
                ExecutionMode::Local
            }
            ExprKind::InlineFunction(inline) => {
                let function_ctx = self.contexts.new_child(ctx);
                for param in &inline.params {
                    self.contexts.add_variable(
                        function_ctx,
                        param.name.clone(),
                        param.seq_type,
                        location,
                        ExecutionMode::Local,
                    )?;
                }
                self.visit_expr(&mut inline.body, function_ctx)?;
                ExecutionMode::Local
            }
            ExprKind::DynamicCall { function, args } => {
                self.visit_expr(function, ctx)?;
                self.visit_all(args, ctx)?;
                ExecutionMode::Local
            }
            ExprKind::Predicate { sequence, predicate } | ExprKind::SimpleMap { sequence, mapping: predicate } => {
                self.visit_expr(sequence, ctx)?;
                let predicate_ctx = self.contexts.new_child(ctx);
                for (name, seq_type) in [
                    (Name::context_item(), SINGLE_ITEM),
                    (Name::context_position(), SequenceType::INTEGER),
                    (Name::context_count(), SequenceType::INTEGER),
                ] {
                    self.contexts.add_variable(predicate_ctx, name, seq_type, location, ExecutionMode::Local)?;
                }
                self.visit_expr(predicate, predicate_ctx)?;
                distributed_if(sequence.mode)
            }
            ExprKind::ObjectLookup { object: operand, key: selector }
            | ExprKind::ArrayLookup { array: operand, index: selector } => {
                self.visit_expr(operand, ctx)?;
                self.visit_expr(selector, ctx)?;
                distributed_if(operand.mode)
            }
            ExprKind::ArrayUnbox(operand) => {
                self.visit_expr(operand, ctx)?;
                distributed_if(operand.mode)
            }
            ExprKind::Flwor(flwor) => {
                let mut scope = ctx;
                let mut previous = None;
                for clause in &mut flwor.clauses {
                    scope = self.visit_clause(clause, scope, previous)?;
                    previous = Some(clause.mode);
                }
                self.visit_expr(&mut flwor.return_expr, scope)?;
                previous.map_or(ExecutionMode::Local, flwor_mode)
            }
        })
    }

    /// Visit `clause` in `ctx` and return the context the next clause sees.
    fn visit_clause(
        &mut self,
        clause: &mut Clause,
        ctx: StaticContextId,
        previous: Option<ExecutionMode>,
    ) -> Result<StaticContextId> {
        clause.static_context = Some(ctx);
        let location = clause.location;
        let next = self.contexts.new_child(ctx);
        clause.mode = match &mut clause.kind {
            ClauseKind::For(for_clause) => {
                self.visit_expr(&mut for_clause.expr, ctx)?;
                let default_type = if for_clause.allowing_empty { OPTIONAL_ITEM } else { SINGLE_ITEM };
                let seq_type = for_clause.seq_type.unwrap_or(default_type);
                self.contexts.add_variable(next, for_clause.var.clone(), seq_type, location, ExecutionMode::Local)?;
                if let Some(positional) = &for_clause.positional {
                    self.contexts.add_variable(
                        next,
                        positional.clone(),
                        SequenceType::INTEGER,
                        location,
                        ExecutionMode::Local,
                    )?;
                }
                for_clause_mode(previous, self.resolve(for_clause.expr.mode))
            }
            ClauseKind::Let(let_clause) => {
                self.visit_expr(&mut let_clause.expr, ctx)?;
                let mode = inherited_clause_mode(previous);
                // tabular rows hold materialised values
                let storage = if mode.is_dataframe() { ExecutionMode::Local } else { self.resolve(let_clause.expr.mode) };
                let seq_type = let_clause.seq_type.unwrap_or_default();
                self.contexts.add_variable(next, let_clause.var.clone(), seq_type, location, storage)?;
                mode
            }
            ClauseKind::Where(condition) => {
                self.visit_expr(condition, ctx)?;
                inherited_clause_mode(previous)
            }
            ClauseKind::GroupBy(specs) => {
                for spec in specs.iter_mut() {
                    match &mut spec.expr {
                        Some(expr) => self.visit_expr(expr, ctx)?,
                        None if !self.contexts.is_in_scope(ctx, &spec.var) => {
                            return Err(Error::undeclared_variable(&spec.var, location));
                        }
                        None => {}
                    }
                    let seq_type = spec.seq_type.unwrap_or(OPTIONAL_ITEM);
                    self.contexts.add_variable(next, spec.var.clone(), seq_type, location, ExecutionMode::Local)?;
                }
                inherited_clause_mode(previous)
            }
            ClauseKind::OrderBy { specs, .. } => {
                for spec in specs.iter_mut() {
                    self.visit_expr(&mut spec.expr, ctx)?;
                }
                inherited_clause_mode(previous)
            }
            ClauseKind::Count(var) => {
                self.contexts.add_variable(next, var.clone(), SequenceType::INTEGER, location, ExecutionMode::Local)?;
                inherited_clause_mode(previous)
            }
        };
        Ok(next)
    }
}

fn distributed_if(operand: ExecutionMode) -> ExecutionMode {
    if operand.is_distributed() { ExecutionMode::Rdd } else { ExecutionMode::Local }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::ast::build::*;
    use crate::mode::ExecutionMode::{DataFrame, Local, Rdd};

    fn analyze(mut module: Module) -> Result<Module> {
        let mut contexts = StaticContexts::new();
        let mut catalogue = FunctionCatalogue::new();
        StaticContextVisitor::analyze(&mut contexts, &mut catalogue, &mut module, &mut [])?;
        Ok(module)
    }

    fn body(module: &Module) -> &Expr {
        module.body.as_ref().unwrap()
    }

    #[rstest]
    fn undeclared_variables_are_static_errors() {
        let err = analyze(Module::main(add(var("y"), int(1)))).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }

    #[rstest]
    fn flwor_variables_are_scoped_to_later_clauses() {
        let query = flwor(vec![for_in("x", seq(vec![int(1), int(2)])), let_bind("y", var("x"))], var("y"));
        let module = analyze(Module::main(query)).unwrap();
        assert_eq!(body(&module).mode, Local);
    }

    #[rstest]
    fn distributed_sources_make_tabular_clauses() {
        let query = flwor(vec![for_in("x", call("parallelize", vec![range(int(1), int(10))])), where_(gt(var("x"), int(3)))], var("x"));
        let module = analyze(Module::main(query)).unwrap();
        let ExprKind::Flwor(flwor) = &body(&module).kind else { unreachable!() };
        assert!(flwor.clauses.iter().all(|c| c.mode == DataFrame));
        assert_eq!(body(&module).mode, Rdd);
    }

    #[rstest]
    fn predicates_and_lookups_follow_their_operand() {
        let query = predicate(call("parallelize", vec![seq(vec![int(1), int(2)])]), gt(context_item(), int(1)));
        assert_eq!(body(&analyze(Module::main(query)).unwrap()).mode, Rdd);
        let query = lookup(object(vec![("a", int(1))]), "a");
        assert_eq!(body(&analyze(Module::main(query)).unwrap()).mode, Local);
    }

    #[rstest]
    fn context_item_outside_a_predicate_is_undeclared() {
        let err = analyze(Module::main(context_item())).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }

    #[rstest]
    fn quantified_variables_do_not_leak() {
        let query = seq(vec![some(vec![("x", seq(vec![int(1)]))], var("x")), var("x")]);
        let err = analyze(Module::main(query)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }

    #[rstest]
    fn unknown_functions_are_reported() {
        let err = analyze(Module::main(call("frobnicate", vec![]))).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0017);
        let err = analyze(Module::main(call("substring", vec![string("a")]))).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0017);
    }

    #[rstest]
    fn resolution_is_idempotent() {
        let query = flwor(vec![for_in("x", call("parallelize", vec![range(int(1), int(4))])), count("c")], var("c"));
        let first = analyze(Module::main(query)).unwrap();
        let second = analyze(first.clone()).unwrap();
        assert_eq!(first, second);
    }

    #[rstest]
    fn grouping_without_initializer_needs_a_bound_variable() {
        let query = flwor(vec![for_in("x", seq(vec![int(1)])), group_by(&["y"])], var("x"));
        let err = analyze(Module::main(query)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }
}

//! Function calls: built-in, user-defined and dynamic calls, plus the
//! expressions that create function items (inline functions, named
//! references, partial application).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::ast::{Expr, Param};
use crate::engine::builder::build_iterator;
use crate::engine::context::DynamicContextId;
use crate::engine::distributed::Collection;
use crate::engine::function_item::{Closure, FunctionItem, FunctionSignature};
use crate::engine::iterator::{
    BoxedIterator, Compute, ItemSource, RuntimeIterator, materialize, materialize_first_or_none,
};
use crate::engine::runtime::{FunctionDefinition, Runtime};
use crate::error::{Error, Result, SourceLocation};
use crate::functions::{BuiltinFunction, BuiltinKind, CallCtx, ItemMapFn};
use crate::item::{Item, Sequence};
use crate::name::{FunctionIdentifier, Name};
use crate::types::SequenceType;

fn new_function_frame(rt: &mut Runtime) -> DynamicContextId {
    let globals = rt.globals();
    rt.contexts.new_child(globals)
}

/// Bind one argument into `frame`. Distributed arguments for parameters that
/// may hold many items stay distributed; everything else is materialised and
/// checked against the declared type.
#[allow(clippy::too_many_arguments)]
fn bind_argument(
    rt: &mut Runtime,
    ctx: DynamicContextId,
    frame: DynamicContextId,
    name: &Name,
    seq_type: &SequenceType,
    arg: &mut dyn RuntimeIterator,
    function: &FunctionIdentifier,
    location: SourceLocation,
) -> Result<()> {
    let mode = arg.execution_mode();
    if mode.is_distributed() && !seq_type.prefers_local() {
        if mode.is_dataframe() {
            let table = arg.get_table(rt, ctx)?;
            rt.contexts.bind_table(frame, name.clone(), table);
        } else {
            let collection = arg.get_collection(rt, ctx)?;
            rt.contexts.bind_collection(frame, name.clone(), collection);
        }
        return Ok(());
    }
    let items = materialize(arg, rt, ctx)?;
    if !seq_type.matches(&items) {
        return Err(Error::unexpected_type(
            format!("Invalid argument ${name} for function {function}: expected {seq_type}, got {} item(s)", items.len()),
            location,
        ));
    }
    rt.contexts.bind_items(frame, name.clone(), items);
    Ok(())
}

/// The running body of a user-defined or dynamic call, with the return type
/// checked as items are pulled.
#[derive(Debug)]
struct CallBody {
    identifier: FunctionIdentifier,
    return_type: SequenceType,
    body: Option<BoxedIterator>,
    frame: Option<DynamicContextId>,
    produced: usize,
    location: SourceLocation,
}

impl CallBody {
    fn new(identifier: FunctionIdentifier, location: SourceLocation) -> Self {
        Self { identifier, return_type: SequenceType::ITEM_STAR, body: None, frame: None, produced: 0, location }
    }

    fn open(&mut self, rt: &mut Runtime) -> Result<()> {
        self.produced = 0;
        match (&mut self.body, self.frame) {
            (Some(body), Some(frame)) => body.open(rt, frame),
            _ => Err(Error::internal(format!("body of {} was not prepared", self.identifier)).at(self.location)),
        }
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        let Some(body) = &mut self.body else { return Ok(None) };
        if !body.is_open() {
            return Ok(None);
        }
        if body.has_next() {
            let item = body.next(rt)?;
            let allowed = match self.return_type {
                SequenceType::Empty => false,
                SequenceType::Of(item_type, _) => item_type.matches(&item),
            };
            if !allowed {
                return Err(Error::unexpected_type(
                    format!("Function {} returned {}, expected {}", self.identifier, item.dynamic_type(), self.return_type),
                    self.location,
                ));
            }
            self.produced += 1;
            return Ok(Some(item));
        }
        let arity_ok = match self.return_type {
            SequenceType::Empty => self.produced == 0,
            SequenceType::Of(_, arity) => arity.allows(self.produced),
        };
        if !arity_ok {
            return Err(Error::unexpected_type(
                format!(
                    "Function {} returned {} item(s), expected {}",
                    self.identifier, self.produced, self.return_type
                ),
                self.location,
            ));
        }
        Ok(None)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        if let Some(body) = &mut self.body {
            if body.is_open() {
                body.close(rt);
            }
        }
        if let Some(frame) = self.frame.take() {
            rt.contexts.release(frame);
        }
    }
}

/// Call of a function declared in the prolog. The body plan is built the
/// first time the call is opened, so recursive functions terminate.
#[derive(Debug)]
pub(crate) struct UserCallSource {
    identifier: FunctionIdentifier,
    args: Vec<BoxedIterator>,
    call: CallBody,
    location: SourceLocation,
}

impl UserCallSource {
    pub(crate) fn new(identifier: FunctionIdentifier, args: Vec<BoxedIterator>, location: SourceLocation) -> Self {
        let call = CallBody::new(identifier.clone(), location);
        Self { identifier, args, call, location }
    }

    fn bind_arguments(
        &mut self,
        rt: &mut Runtime,
        ctx: DynamicContextId,
        frame: DynamicContextId,
        definition: &FunctionDefinition,
    ) -> Result<()> {
        for (param, arg) in definition.params.iter().zip(self.args.iter_mut()) {
            bind_argument(rt, ctx, frame, &param.name, &param.seq_type, arg.as_mut(), &self.identifier, self.location)?;
        }
        Ok(())
    }

    fn body_plan(&mut self, rt: &Runtime, definition: &FunctionDefinition) -> Result<()> {
        if self.call.body.is_none() {
            let functions = Arc::clone(&rt.functions);
            self.call.body = Some(build_iterator(&definition.body, &functions)?);
        }
        Ok(())
    }
}

impl ItemSource for UserCallSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let definition = rt.function(&self.identifier, self.location)?;
        let frame = new_function_frame(rt);
        self.call.frame = Some(frame);
        self.bind_arguments(rt, ctx, frame, &definition)?;
        self.body_plan(rt, &definition)?;
        self.call.return_type = definition.return_type;
        self.call.open(rt)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        self.call.pull(rt)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.call.stop(rt);
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        let definition = rt.function(&self.identifier, self.location)?;
        if !definition.body_mode().is_distributed() {
            return Ok(None);
        }
        let frame = new_function_frame(rt);
        let result: Result<Collection> = (|| {
            self.bind_arguments(rt, ctx, frame, &definition)?;
            self.body_plan(rt, &definition)?;
            match &mut self.call.body {
                Some(body) => body.get_collection(rt, frame),
                None => Err(Error::internal("missing function body")),
            }
        })();
        rt.contexts.release(frame);
        result.map(Some)
    }
}

/// `$f(args)`: the callee is evaluated on every open.
#[derive(Debug)]
pub(crate) struct DynamicCallSource {
    function: BoxedIterator,
    args: Vec<BoxedIterator>,
    call: CallBody,
    location: SourceLocation,
}

impl DynamicCallSource {
    pub(crate) fn new(function: BoxedIterator, args: Vec<BoxedIterator>, location: SourceLocation) -> Self {
        let call = CallBody::new(FunctionIdentifier::new(Name::generated("dynamic-call"), args.len()), location);
        Self { function, args, call, location }
    }

    fn callee(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Arc<FunctionItem>> {
        let mut items = materialize(self.function.as_mut(), rt, ctx)?;
        let function = match (items.pop(), items.is_empty()) {
            (Some(Item::Function(f)), true) => f,
            (Some(other), true) => {
                return Err(Error::unexpected_type(
                    format!("Dynamic function call expects a function item, got {}", other.dynamic_type()),
                    self.location,
                ));
            }
            _ => {
                return Err(Error::unexpected_type(
                    "Dynamic function call expects exactly one function item",
                    self.location,
                ));
            }
        };
        if function.arity() != self.args.len() {
            return Err(Error::unexpected_type(
                format!(
                    "Function {} expects {} argument(s), got {}",
                    function.identifier(),
                    function.arity(),
                    self.args.len()
                ),
                self.location,
            ));
        }
        Ok(function)
    }
}

impl ItemSource for DynamicCallSource {
    fn start(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<()> {
        let function = self.callee(rt, ctx)?.deep_copy();
        let frame = new_function_frame(rt);
        self.call.frame = Some(frame);
        rt.contexts.bind_closure(frame, function.closure());
        let params = function.params().iter().zip(function.signature().params.iter());
        for ((name, seq_type), arg) in params.zip(self.args.iter_mut()) {
            bind_argument(rt, ctx, frame, name, seq_type, arg.as_mut(), function.identifier(), self.location)?;
        }
        let functions = Arc::clone(&rt.functions);
        self.call.body = Some(build_iterator(function.body(), &functions)?);
        self.call.identifier = function.identifier().clone();
        self.call.return_type = function.signature().return_type;
        self.call.open(rt)
    }

    fn pull(&mut self, rt: &mut Runtime) -> Result<Option<Item>> {
        self.call.pull(rt)
    }

    fn stop(&mut self, rt: &mut Runtime) {
        self.call.stop(rt);
        self.call.body = None;
    }
}

#[derive(Debug)]
pub(crate) struct BuiltinCall {
    pub(crate) builtin: &'static BuiltinFunction,
    pub(crate) args: Vec<BoxedIterator>,
    pub(crate) location: SourceLocation,
}

impl BuiltinCall {
    fn arguments(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Sequence>> {
        self.args.iter_mut().map(|arg| materialize(arg.as_mut(), rt, ctx)).collect()
    }

    fn first_argument(&mut self) -> Result<&mut BoxedIterator> {
        self.args
            .first_mut()
            .ok_or_else(|| Error::internal(format!("{} called without arguments", self.builtin.name)).at(self.location))
    }

    fn missing_arguments(&self) -> Error {
        Error::internal(format!("{} called without arguments", self.builtin.name)).at(self.location)
    }
}

fn map_items(f: ItemMapFn, call: &CallCtx<'_>, items: &[Item], rest: &[Sequence]) -> Result<Vec<Item>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.extend(f(call, item, rest)?);
    }
    Ok(out)
}

impl Compute for BuiltinCall {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let location = self.location;
        match self.builtin.kind {
            BuiltinKind::Eager(f) => {
                let args = self.arguments(rt, ctx)?;
                f(&CallCtx { runtime: rt, location }, &args)
            }
            BuiltinKind::Distributed(f) => {
                let args = self.arguments(rt, ctx)?;
                Ok(f(&CallCtx { runtime: rt, location }, &args)?.collect())
            }
            BuiltinKind::ItemMap(f) => {
                let args = self.arguments(rt, ctx)?;
                let (input, rest) = args.split_first().ok_or_else(|| self.missing_arguments())?;
                map_items(f, &CallCtx { runtime: rt, location }, input, rest)
            }
            BuiltinKind::Exists => {
                let arg = self.first_argument()?;
                let exists = if arg.execution_mode().is_distributed() {
                    !arg.get_collection(rt, ctx)?.take(1).is_empty()
                } else {
                    materialize_first_or_none(arg.as_mut(), rt, ctx)?.is_some()
                };
                Ok(vec![Item::Boolean(exists)])
            }
            BuiltinKind::Count => {
                let arg = self.first_argument()?;
                let count = if arg.execution_mode().is_distributed() {
                    arg.get_collection(rt, ctx)?.count()
                } else {
                    materialize(arg.as_mut(), rt, ctx)?.len()
                };
                let count = i64::try_from(count).map_err(|_| Error::internal("count exceeds integer range"))?;
                Ok(vec![Item::Integer(count)])
            }
        }
    }

    fn collection(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Option<Collection>> {
        match self.builtin.kind {
            BuiltinKind::Distributed(f) => {
                let args = self.arguments(rt, ctx)?;
                f(&CallCtx { runtime: rt, location: self.location }, &args).map(Some)
            }
            BuiltinKind::ItemMap(f) => {
                let location = self.location;
                let missing = || Error::internal(format!("{} called without arguments", self.builtin.name)).at(location);
                let Some((first, rest)) = self.args.split_first_mut() else { return Err(missing()) };
                if !first.execution_mode().is_distributed() {
                    return Ok(None);
                }
                let input = first.get_collection(rt, ctx)?;
                let rest = rest.iter_mut().map(|arg| materialize(arg.as_mut(), rt, ctx)).collect::<Result<Vec<_>>>()?;
                let call = CallCtx { runtime: rt, location };
                input.map_partitions(|_, items| map_items(f, &call, items, &rest)).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// `function ($x, $y) { ... }`: captures the free variables of the body.
#[derive(Debug)]
pub(crate) struct InlineFunctionSource {
    identifier: FunctionIdentifier,
    params: Vec<Name>,
    signature: FunctionSignature,
    body: Arc<Expr>,
    free: BTreeSet<Name>,
}

impl InlineFunctionSource {
    pub(crate) fn new(params: &[Param], return_type: SequenceType, body: &Expr, free: BTreeSet<Name>) -> Self {
        Self {
            identifier: FunctionIdentifier::new(Name::generated("anonymous-function"), params.len()),
            params: params.iter().map(|p| p.name.clone()).collect(),
            signature: FunctionSignature { params: params.iter().map(|p| p.seq_type).collect(), return_type },
            body: Arc::new(body.clone()),
            free,
        }
    }
}

impl Compute for InlineFunctionSource {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let closure = rt.contexts.capture(ctx, &self.free);
        tracing::trace!(function = %self.identifier, captured = closure.len(), "created function item");
        Ok(vec![Item::Function(Arc::new(FunctionItem::new(
            self.identifier.clone(),
            self.params.clone(),
            self.signature.clone(),
            Arc::clone(&self.body),
            closure,
        )))])
    }
}

/// `name#arity` and other function items fixed at build time.
#[derive(Debug)]
pub(crate) struct ConstantFunction {
    pub(crate) item: Arc<FunctionItem>,
}

impl Compute for ConstantFunction {
    fn compute(&mut self, _rt: &mut Runtime, _ctx: DynamicContextId) -> Result<Vec<Item>> {
        Ok(vec![Item::Function(Arc::clone(&self.item))])
    }
}

/// Function item for `name#arity`. User functions reuse their declared body;
/// builtins get a body that forwards generated parameters to the builtin.
pub(crate) fn named_function_item(
    name: &Name,
    arity: usize,
    definition: Option<&FunctionDefinition>,
    location: SourceLocation,
) -> FunctionItem {
    let identifier = FunctionIdentifier::new(name.clone(), arity);
    if let Some(definition) = definition {
        return FunctionItem::new(
            identifier,
            definition.params.iter().map(|p| p.name.clone()).collect(),
            FunctionSignature {
                params: definition.params.iter().map(|p| p.seq_type).collect(),
                return_type: definition.return_type,
            },
            Arc::clone(&definition.body),
            Closure::default(),
        );
    }
    let params: Vec<Name> = (1..=arity).map(|i| Name::generated(&format!("arg{i}"))).collect();
    let args = params.iter().map(|p| Some(Expr::new(crate::ast::ExprKind::VarRef(p.clone()), location))).collect();
    let body = Expr::new(crate::ast::ExprKind::FunctionCall { name: name.clone(), args }, location);
    FunctionItem::new(identifier, params, FunctionSignature::untyped(arity), Arc::new(body), Closure::default())
}

/// `f(?, 1)`: fixed arguments are evaluated when the item is created and
/// kept in its closure; placeholders become the parameters of the new item.
#[derive(Debug)]
pub(crate) struct PartialApplicationSource {
    identifier: FunctionIdentifier,
    params: Vec<Name>,
    signature: FunctionSignature,
    body: Arc<Expr>,
    bound: Vec<(Name, BoxedIterator)>,
}

impl PartialApplicationSource {
    /// `args` pairs every argument position with its built iterator, `None`
    /// for placeholders; `declared` holds the target's parameter types if known.
    pub(crate) fn new(
        name: &Name,
        args: Vec<Option<BoxedIterator>>,
        declared: Option<Vec<SequenceType>>,
        location: SourceLocation,
    ) -> Self {
        let mut params = Vec::new();
        let mut param_types = Vec::new();
        let mut bound = Vec::new();
        let mut call_args = Vec::with_capacity(args.len());
        for (position, arg) in args.into_iter().enumerate() {
            let var = match arg {
                Some(iter) => {
                    let var = Name::generated(&format!("bound{}", bound.len() + 1));
                    bound.push((var.clone(), iter));
                    var
                }
                None => {
                    let var = Name::generated(&format!("arg{}", params.len() + 1));
                    params.push(var.clone());
                    let declared_type = declared.as_ref().and_then(|types| types.get(position)).copied();
                    param_types.push(declared_type.unwrap_or_default());
                    var
                }
            };
            call_args.push(Some(Expr::new(crate::ast::ExprKind::VarRef(var), location)));
        }
        let body = Expr::new(crate::ast::ExprKind::FunctionCall { name: name.clone(), args: call_args }, location);
        Self {
            identifier: FunctionIdentifier::new(name.clone(), params.len()),
            params,
            signature: FunctionSignature { params: param_types, return_type: SequenceType::ITEM_STAR },
            body: Arc::new(body),
            bound,
        }
    }
}

impl Compute for PartialApplicationSource {
    fn compute(&mut self, rt: &mut Runtime, ctx: DynamicContextId) -> Result<Vec<Item>> {
        let mut locals = BTreeMap::new();
        for (name, arg) in &mut self.bound {
            locals.insert(name.clone(), materialize(arg.as_mut(), rt, ctx)?);
        }
        let closure = Closure { locals, ..Closure::default() };
        Ok(vec![Item::Function(Arc::new(FunctionItem::new(
            self.identifier.clone(),
            self.params.clone(),
            self.signature.clone(),
            Arc::clone(&self.body),
            closure,
        )))])
    }
}

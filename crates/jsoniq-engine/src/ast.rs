//! Expression and clause tree produced by the parser and annotated by the
//! static pass. Every expression and clause carries a source location, an
//! execution-mode slot and a static-context slot.

use serde::{Deserialize, Serialize};

use crate::compiler::static_context::StaticContextId;
use crate::error::SourceLocation;
use crate::mode::ExecutionMode;
use crate::name::Name;
use crate::types::SequenceType;

pub mod build;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(#[serde(with = "crate::item::canonical_float")] f64),
    Double(#[serde(with = "crate::item::canonical_float")] f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantifierKind {
    Some,
    Every,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: Name,
    pub seq_type: SequenceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub tests: Vec<Expr>,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeswitchCase {
    pub var: Option<Name>,
    pub types: Vec<SequenceType>,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantifiedBinding {
    pub var: Name,
    pub seq_type: Option<SequenceType>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFunction {
    pub params: Vec<Param>,
    pub return_type: SequenceType,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    VarRef(Name),
    /// `$$`
    ContextItem,
    /// Comma expression; an empty list is the empty sequence.
    Sequence(Vec<Expr>),
    Arithmetic { op: ArithmeticOp, left: Box<Expr>, right: Box<Expr> },
    Negate(Box<Expr>),
    /// `general` selects existential comparison (`=`, `<`, ...) over value comparison (`eq`, `lt`, ...).
    Comparison { op: ComparisonOp, general: bool, left: Box<Expr>, right: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    StringConcat(Box<Expr>, Box<Expr>),
    Range(Box<Expr>, Box<Expr>),
    If { condition: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
    Switch { test: Box<Expr>, cases: Vec<SwitchCase>, default: Box<Expr> },
    Typeswitch { operand: Box<Expr>, cases: Vec<TypeswitchCase>, default_var: Option<Name>, default: Box<Expr> },
    Quantified { kind: QuantifierKind, bindings: Vec<QuantifiedBinding>, satisfies: Box<Expr> },
    InstanceOf { operand: Box<Expr>, seq_type: SequenceType },
    /// `None` arguments are `?` placeholders (partial application).
    FunctionCall { name: Name, args: Vec<Option<Expr>> },
    NamedFunctionRef { name: Name, arity: usize },
    InlineFunction(InlineFunction),
    DynamicCall { function: Box<Expr>, args: Vec<Expr> },
    /// `sequence[predicate]`
    Predicate { sequence: Box<Expr>, predicate: Box<Expr> },
    /// `sequence ! mapping`
    SimpleMap { sequence: Box<Expr>, mapping: Box<Expr> },
    ObjectLookup { object: Box<Expr>, key: Box<Expr> },
    ArrayLookup { array: Box<Expr>, index: Box<Expr> },
    /// `array[]`
    ArrayUnbox(Box<Expr>),
    ObjectConstructor(Vec<(Expr, Expr)>),
    ArrayConstructor(Option<Box<Expr>>),
    Flwor(Flwor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: SourceLocation,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Declared type of the binding a variable reference resolved to.
    #[serde(default)]
    pub sequence_type: Option<SequenceType>,
    #[serde(skip)]
    pub static_context: Option<StaticContextId>,
}

impl Expr {
    pub fn new(kind: ExprKind, location: SourceLocation) -> Self {
        Self { kind, location, mode: ExecutionMode::Unset, sequence_type: None, static_context: None }
    }

    /// Direct sub-expressions, in evaluation order. Clause expressions of a
    /// FLWOR are included, followed by its return expression.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::VarRef(_)
            | ExprKind::ContextItem
            | ExprKind::NamedFunctionRef { .. }
            | ExprKind::ArrayConstructor(None) => Vec::new(),
            ExprKind::Sequence(items) => items.iter().collect(),
            ExprKind::Arithmetic { left, right, .. }
            | ExprKind::Comparison { left, right, .. }
            | ExprKind::And(left, right)
            | ExprKind::Or(left, right)
            | ExprKind::StringConcat(left, right)
            | ExprKind::Range(left, right)
            | ExprKind::Predicate { sequence: left, predicate: right }
            | ExprKind::SimpleMap { sequence: left, mapping: right }
            | ExprKind::ObjectLookup { object: left, key: right }
            | ExprKind::ArrayLookup { array: left, index: right } => vec![&**left, &**right],
            ExprKind::Negate(e)
            | ExprKind::Not(e)
            | ExprKind::ArrayUnbox(e)
            | ExprKind::ArrayConstructor(Some(e))
            | ExprKind::InstanceOf { operand: e, .. } => vec![&**e],
            ExprKind::If { condition, then_branch, else_branch } => vec![&**condition, &**then_branch, &**else_branch],
            ExprKind::Switch { test, cases, default } => {
                let mut out: Vec<&Expr> = vec![&**test];
                for case in cases {
                    out.extend(case.tests.iter());
                    out.push(&case.result);
                }
                out.push(default);
                out
            }
            ExprKind::Typeswitch { operand, cases, default, .. } => {
                let mut out: Vec<&Expr> = vec![&**operand];
                out.extend(cases.iter().map(|c| &c.result));
                out.push(default);
                out
            }
            ExprKind::Quantified { bindings, satisfies, .. } => {
                let mut out: Vec<&Expr> = bindings.iter().map(|b| &b.expr).collect();
                out.push(satisfies);
                out
            }
            ExprKind::FunctionCall { args, .. } => args.iter().flatten().collect(),
            ExprKind::InlineFunction(f) => vec![&*f.body],
            ExprKind::DynamicCall { function, args } => {
                let mut out: Vec<&Expr> = vec![&**function];
                out.extend(args.iter());
                out
            }
            ExprKind::ObjectConstructor(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            ExprKind::Flwor(flwor) => {
                let mut out: Vec<&Expr> = flwor.clauses.iter().flat_map(Clause::expressions).collect();
                out.push(&flwor.return_expr);
                out
            }
        }
    }

    /// Short label used in diagnostics and iterator-flow errors.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ExprKind::Literal(_) => "literal",
            ExprKind::VarRef(_) => "variable reference",
            ExprKind::ContextItem => "context item",
            ExprKind::Sequence(_) => "comma expression",
            ExprKind::Arithmetic { .. } | ExprKind::Negate(_) => "arithmetic expression",
            ExprKind::Comparison { .. } => "comparison",
            ExprKind::And(..) => "and expression",
            ExprKind::Or(..) => "or expression",
            ExprKind::Not(_) => "not expression",
            ExprKind::StringConcat(..) => "string concatenation",
            ExprKind::Range(..) => "range expression",
            ExprKind::If { .. } => "conditional expression",
            ExprKind::Switch { .. } => "switch expression",
            ExprKind::Typeswitch { .. } => "typeswitch expression",
            ExprKind::Quantified { .. } => "quantified expression",
            ExprKind::InstanceOf { .. } => "instance of expression",
            ExprKind::FunctionCall { .. } => "function call",
            ExprKind::NamedFunctionRef { .. } => "named function reference",
            ExprKind::InlineFunction(_) => "inline function",
            ExprKind::DynamicCall { .. } => "dynamic function call",
            ExprKind::Predicate { .. } => "predicate",
            ExprKind::SimpleMap { .. } => "simple map expression",
            ExprKind::ObjectLookup { .. } => "object lookup",
            ExprKind::ArrayLookup { .. } => "array lookup",
            ExprKind::ArrayUnbox(_) => "array unboxing",
            ExprKind::ObjectConstructor(_) => "object constructor",
            ExprKind::ArrayConstructor(_) => "array constructor",
            ExprKind::Flwor(_) => "FLWOR expression",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flwor {
    pub clauses: Vec<Clause>,
    pub return_expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForClause {
    pub var: Name,
    pub seq_type: Option<SequenceType>,
    pub allowing_empty: bool,
    pub positional: Option<Name>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetClause {
    pub var: Name,
    pub seq_type: Option<SequenceType>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingSpec {
    pub var: Name,
    pub seq_type: Option<SequenceType>,
    /// Without an initializer the variable must already be bound upstream.
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub expr: Expr,
    pub descending: bool,
    pub empty_greatest: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClauseKind {
    For(ForClause),
    Let(LetClause),
    Where(Expr),
    GroupBy(Vec<GroupingSpec>),
    OrderBy { specs: Vec<OrderSpec>, stable: bool },
    Count(Name),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub kind: ClauseKind,
    pub location: SourceLocation,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(skip)]
    pub static_context: Option<StaticContextId>,
}

impl Clause {
    pub fn new(kind: ClauseKind, location: SourceLocation) -> Self {
        Self { kind, location, mode: ExecutionMode::Unset, static_context: None }
    }

    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            ClauseKind::For(f) => vec![&f.expr],
            ClauseKind::Let(l) => vec![&l.expr],
            ClauseKind::Where(e) => vec![e],
            ClauseKind::GroupBy(specs) => specs.iter().filter_map(|s| s.expr.as_ref()).collect(),
            ClauseKind::OrderBy { specs, .. } => specs.iter().map(|s| &s.expr).collect(),
            ClauseKind::Count(_) => Vec::new(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ClauseKind::For(_) => "for clause",
            ClauseKind::Let(_) => "let clause",
            ClauseKind::Where(_) => "where clause",
            ClauseKind::GroupBy(_) => "group by clause",
            ClauseKind::OrderBy { .. } => "order by clause",
            ClauseKind::Count(_) => "count clause",
        }
    }

    /// Variables this clause binds into the tuple stream.
    pub fn bound_variables(&self) -> Vec<&Name> {
        match &self.kind {
            ClauseKind::For(f) => std::iter::once(&f.var).chain(f.positional.as_ref()).collect(),
            ClauseKind::Let(l) => vec![&l.var],
            ClauseKind::GroupBy(specs) => specs.iter().map(|s| &s.var).collect(),
            ClauseKind::Count(v) => vec![v],
            ClauseKind::Where(_) | ClauseKind::OrderBy { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: Name,
    pub seq_type: Option<SequenceType>,
    pub external: bool,
    pub expr: Option<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Name,
    pub params: Vec<Param>,
    pub return_type: SequenceType,
    pub body: Expr,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleImport {
    pub prefix: String,
    pub namespace: String,
    pub location: SourceLocation,
}

/// A main module (with a body) or a library module (with a namespace).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    pub namespace: Option<String>,
    pub imports: Vec<ModuleImport>,
    pub variables: Vec<VariableDecl>,
    pub functions: Vec<FunctionDecl>,
    pub body: Option<Expr>,
    #[serde(skip)]
    pub static_context: Option<StaticContextId>,
}

impl Module {
    pub fn main(body: Expr) -> Self {
        Self { body: Some(body), ..Self::default() }
    }

    pub fn is_library(&self) -> bool {
        self.namespace.is_some()
    }
}

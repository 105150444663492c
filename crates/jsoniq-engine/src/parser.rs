//! Query text to [`Module`] trees.
//!
//! Prefixed names are resolved while the tree is built: `fn:` and `jn:` map
//! to the builtin namespace, `local:` and unprefixed names to no namespace,
//! and module prefixes to the namespace they were declared or imported
//! with. Unknown prefixes are syntax errors.

use std::collections::BTreeMap;

use pest::Parser;
use pest::iterators::Pair;

use crate::ast::{
    ArithmeticOp, Clause, ClauseKind, ComparisonOp, Expr, ExprKind, Flwor, ForClause, FunctionDecl, GroupingSpec,
    InlineFunction, LetClause, Literal, Module, ModuleImport, OrderSpec, Param, QuantifiedBinding, QuantifierKind,
    SwitchCase, TypeswitchCase, VariableDecl,
};
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::name::{FN_NS, Name};
use crate::types::{Arity, ItemType, SequenceType};

#[derive(pest_derive::Parser)]
#[grammar = "jsoniq.pest"]
pub struct JsoniqParser;

/// Parse a main or library module.
pub fn parse_module(text: &str) -> Result<Module> {
    let mut pairs = JsoniqParser::parse(Rule::module, text).map_err(syntax_error)?;
    let Some(root) = pairs.next() else {
        return Err(Error::from_code(ErrorCode::XPST0003, "Empty parse result"));
    };
    ModuleBuilder::default().build(root)
}

/// Parse a main module without prolog and return its body.
pub fn parse_expression(text: &str) -> Result<Expr> {
    let module = parse_module(text)?;
    if module.is_library() || !module.variables.is_empty() || !module.functions.is_empty() {
        return Err(Error::from_code(ErrorCode::XPST0003, "Expected a single expression without prolog"));
    }
    module.body.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Expected an expression"))
}

fn syntax_error(e: pest::error::Error<Rule>) -> Error {
    let (line, column) = match e.line_col {
        pest::error::LineColLocation::Pos(pos) | pest::error::LineColLocation::Span(pos, _) => pos,
    };
    let message = match &e.variant {
        pest::error::ErrorVariant::CustomError { message } => message.clone(),
        pest::error::ErrorVariant::ParsingError { .. } => format!("Parser failed near: {}", e.line().trim()),
    };
    Error::from_code(ErrorCode::XPST0003, message).at(SourceLocation::new(line, column))
}

fn location(pair: &Pair<Rule>) -> SourceLocation {
    let (line, column) = pair.line_col();
    SourceLocation::new(line, column)
}

fn invalid(pair: &Pair<Rule>, message: impl Into<String>) -> Error {
    Error::from_code(ErrorCode::XPST0003, message).at(location(pair))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::K_ALLOWING
            | Rule::K_AND
            | Rule::K_AS
            | Rule::K_ASCENDING
            | Rule::K_AT
            | Rule::K_BY
            | Rule::K_CASE
            | Rule::K_COUNT
            | Rule::K_DECLARE
            | Rule::K_DEFAULT
            | Rule::K_DESCENDING
            | Rule::K_DIV
            | Rule::K_ELSE
            | Rule::K_EMPTY
            | Rule::K_EQ
            | Rule::K_EVERY
            | Rule::K_EXTERNAL
            | Rule::K_FOR
            | Rule::K_FUNCTION
            | Rule::K_GE
            | Rule::K_GREATEST
            | Rule::K_GROUP
            | Rule::K_GT
            | Rule::K_IDIV
            | Rule::K_IF
            | Rule::K_IMPORT
            | Rule::K_IN
            | Rule::K_INSTANCE
            | Rule::K_JSONIQ
            | Rule::K_LE
            | Rule::K_LEAST
            | Rule::K_LET
            | Rule::K_LT
            | Rule::K_MOD
            | Rule::K_MODULE
            | Rule::K_NAMESPACE
            | Rule::K_NE
            | Rule::K_NOT
            | Rule::K_OF
            | Rule::K_OR
            | Rule::K_ORDER
            | Rule::K_RETURN
            | Rule::K_SATISFIES
            | Rule::K_SOME
            | Rule::K_STABLE
            | Rule::K_SWITCH
            | Rule::K_THEN
            | Rule::K_TO
            | Rule::K_TYPESWITCH
            | Rule::K_VARIABLE
            | Rule::K_VERSION
            | Rule::K_WHERE
    )
}

/// Children of `pair` without keyword tokens.
fn children<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn next_child<'i>(iter: &mut impl Iterator<Item = Pair<'i, Rule>>, parent: &Pair<'i, Rule>) -> Result<Pair<'i, Rule>> {
    iter.next().ok_or_else(|| invalid(parent, format!("Incomplete {:?}", parent.as_rule())))
}

fn boxed(expr: Expr) -> Box<Expr> {
    Box::new(expr)
}

#[derive(Debug)]
struct ModuleBuilder {
    prefixes: BTreeMap<String, Option<String>>,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        let prefixes = BTreeMap::from([
            ("fn".to_string(), Some(FN_NS.to_string())),
            ("jn".to_string(), Some(FN_NS.to_string())),
            ("local".to_string(), None),
        ]);
        Self { prefixes }
    }
}

impl ModuleBuilder {
    fn build(mut self, root: Pair<Rule>) -> Result<Module> {
        let mut module = Module::default();
        for pair in root.into_inner() {
            match pair.as_rule() {
                Rule::version_decl | Rule::EOI => {}
                Rule::module_decl => {
                    let (prefix, namespace) = self.namespace_binding(pair)?;
                    self.prefixes.insert(prefix, Some(namespace.clone()));
                    module.namespace = Some(namespace);
                }
                Rule::prolog => self.prolog(pair, &mut module)?,
                Rule::expr => module.body = Some(self.expr(pair)?),
                rule => return Err(invalid(&pair, format!("Unexpected {rule:?} in module"))),
            }
        }
        if module.is_library() && module.body.is_some() {
            return Err(Error::from_code(ErrorCode::XPST0003, "A library module cannot have a body"));
        }
        if !module.is_library() && module.body.is_none() {
            return Err(Error::from_code(ErrorCode::XPST0003, "A main module needs a body expression"));
        }
        Ok(module)
    }

    fn namespace_binding(&self, pair: Pair<Rule>) -> Result<(String, String)> {
        let mut inner = children(pair.clone());
        let prefix = next_child(&mut inner, &pair)?.as_str().to_string();
        let namespace = string_value(next_child(&mut inner, &pair)?)?;
        Ok((prefix, namespace))
    }

    fn prolog(&mut self, pair: Pair<Rule>, module: &mut Module) -> Result<()> {
        for decl in pair.into_inner() {
            let loc = location(&decl);
            match decl.as_rule() {
                Rule::module_import => {
                    let (prefix, namespace) = self.namespace_binding(decl)?;
                    self.prefixes.insert(prefix.clone(), Some(namespace.clone()));
                    module.imports.push(ModuleImport { prefix, namespace, location: loc });
                }
                Rule::var_decl => module.variables.push(self.var_decl(decl)?),
                Rule::function_decl => module.functions.push(self.function_decl(decl)?),
                rule => return Err(invalid(&decl, format!("Unexpected {rule:?} in prolog"))),
            }
        }
        Ok(())
    }

    fn var_decl(&self, pair: Pair<Rule>) -> Result<VariableDecl> {
        let loc = location(&pair);
        let mut decl =
            VariableDecl { name: Name::local(""), seq_type: None, external: false, expr: None, location: loc };
        for part in children(pair) {
            match part.as_rule() {
                Rule::var_name => decl.name = self.var_name(&part)?,
                Rule::type_decl => decl.seq_type = Some(self.type_decl(part)?),
                Rule::initializer => decl.expr = Some(self.initializer(part)?),
                Rule::external_decl => {
                    decl.external = true;
                    if let Some(init) = children(part).next() {
                        decl.expr = Some(self.initializer(init)?);
                    }
                }
                rule => return Err(invalid(&part, format!("Unexpected {rule:?} in variable declaration"))),
            }
        }
        Ok(decl)
    }

    fn initializer(&self, pair: Pair<Rule>) -> Result<Expr> {
        let mut inner = children(pair.clone());
        self.expr(next_child(&mut inner, &pair)?)
    }

    fn function_decl(&self, pair: Pair<Rule>) -> Result<FunctionDecl> {
        let loc = location(&pair);
        let mut inner = children(pair.clone());
        let name = self.qname(&next_child(&mut inner, &pair)?)?;
        let mut params = Vec::new();
        let mut return_type = SequenceType::ITEM_STAR;
        let mut body = None;
        for part in inner {
            match part.as_rule() {
                Rule::param_list => params = self.params(part)?,
                Rule::return_type => return_type = self.type_decl(part)?,
                Rule::enclosed_expr => body = Some(self.enclosed(part)?),
                rule => return Err(invalid(&part, format!("Unexpected {rule:?} in function declaration"))),
            }
        }
        let body = body.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Missing function body").at(loc))?;
        Ok(FunctionDecl { name, params, return_type, body, location: loc })
    }

    fn params(&self, pair: Pair<Rule>) -> Result<Vec<Param>> {
        children(pair)
            .map(|param| {
                let mut inner = children(param.clone());
                let name = self.var_name(&next_child(&mut inner, &param)?)?;
                let seq_type = match inner.next() {
                    Some(t) => self.type_decl(t)?,
                    None => SequenceType::ITEM_STAR,
                };
                Ok(Param { name, seq_type })
            })
            .collect()
    }

    fn enclosed(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        match children(pair).next() {
            Some(expr) => self.expr(expr),
            None => Ok(Expr::new(ExprKind::Sequence(Vec::new()), loc)),
        }
    }

    fn qname(&self, pair: &Pair<Rule>) -> Result<Name> {
        let text = pair.as_str();
        match text.split_once(':') {
            None => Ok(Name::local(text)),
            Some((prefix, local)) => match self.prefixes.get(prefix) {
                Some(namespace) => Ok(Name::new(namespace.as_deref(), local)),
                None => Err(invalid(pair, format!("Undeclared namespace prefix '{prefix}'"))),
            },
        }
    }

    fn var_name(&self, pair: &Pair<Rule>) -> Result<Name> {
        let mut inner = pair.clone().into_inner();
        let qname = next_child(&mut inner, pair)?;
        self.qname(&qname)
    }

    fn type_decl(&self, pair: Pair<Rule>) -> Result<SequenceType> {
        let mut inner = children(pair.clone());
        sequence_type(next_child(&mut inner, &pair)?)
    }

    fn expr(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        match pair.as_rule() {
            Rule::expr | Rule::parenthesized_expr => {
                let mut items = children(pair).map(|p| self.expr(p)).collect::<Result<Vec<_>>>()?;
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(Expr::new(ExprKind::Sequence(items), loc))
                }
            }
            Rule::flwor_expr => self.flwor(pair),
            Rule::quantified_expr => self.quantified(pair),
            Rule::switch_expr => self.switch(pair),
            Rule::typeswitch_expr => self.typeswitch(pair),
            Rule::if_expr => {
                let mut inner = children(pair.clone());
                let condition = self.expr(next_child(&mut inner, &pair)?)?;
                let then_branch = self.expr(next_child(&mut inner, &pair)?)?;
                let else_branch = self.expr(next_child(&mut inner, &pair)?)?;
                Ok(Expr::new(
                    ExprKind::If {
                        condition: boxed(condition),
                        then_branch: boxed(then_branch),
                        else_branch: boxed(else_branch),
                    },
                    loc,
                ))
            }
            Rule::or_expr => self.fold(pair, |l, r| ExprKind::Or(boxed(l), boxed(r))),
            Rule::and_expr => self.fold(pair, |l, r| ExprKind::And(boxed(l), boxed(r))),
            Rule::string_concat_expr => self.fold(pair, |l, r| ExprKind::StringConcat(boxed(l), boxed(r))),
            Rule::not_expr => {
                let mut inner = pair.clone().into_inner();
                let first = next_child(&mut inner, &pair)?;
                if first.as_rule() == Rule::K_NOT {
                    let operand = self.expr(next_child(&mut inner, &pair)?)?;
                    Ok(Expr::new(ExprKind::Not(boxed(operand)), loc))
                } else {
                    self.expr(first)
                }
            }
            Rule::comparison_expr => self.comparison(pair),
            Rule::range_expr => {
                let mut inner = children(pair.clone());
                let from = self.expr(next_child(&mut inner, &pair)?)?;
                match inner.next() {
                    Some(to) => Ok(Expr::new(ExprKind::Range(boxed(from), boxed(self.expr(to)?)), loc)),
                    None => Ok(from),
                }
            }
            Rule::additive_expr | Rule::multiplicative_expr => self.arithmetic(pair),
            Rule::instance_of_expr => {
                let mut inner = children(pair.clone());
                let operand = self.expr(next_child(&mut inner, &pair)?)?;
                match inner.next() {
                    Some(t) => Ok(Expr::new(
                        ExprKind::InstanceOf { operand: boxed(operand), seq_type: sequence_type(t)? },
                        loc,
                    )),
                    None => Ok(operand),
                }
            }
            Rule::unary_expr => {
                let mut negations = 0usize;
                let mut operand = None;
                for part in pair.clone().into_inner() {
                    match part.as_rule() {
                        Rule::unary_op if part.as_str() == "-" => negations += 1,
                        Rule::unary_op => {}
                        _ => operand = Some(self.expr(part)?),
                    }
                }
                let operand = operand.ok_or_else(|| invalid(&pair, "Missing operand"))?;
                if negations % 2 == 1 { Ok(Expr::new(ExprKind::Negate(boxed(operand)), loc)) } else { Ok(operand) }
            }
            Rule::simple_map_expr => {
                self.fold(pair, |l, r| ExprKind::SimpleMap { sequence: boxed(l), mapping: boxed(r) })
            }
            Rule::postfix_expr => self.postfix(pair),
            Rule::integer_literal => match pair.as_str().parse::<i64>() {
                Ok(value) => Ok(Expr::new(ExprKind::Literal(Literal::Integer(value)), loc)),
                Err(_) => Err(Error::from_code(ErrorCode::FOAR0002, format!("Integer literal {} is too large", pair.as_str()))
                    .at(loc)),
            },
            Rule::decimal_literal | Rule::double_literal => {
                let value = pair.as_str().parse::<f64>().map_err(|e| invalid(&pair, e.to_string()))?;
                let literal = if pair.as_rule() == Rule::double_literal {
                    Literal::Double(value)
                } else {
                    Literal::Decimal(value)
                };
                Ok(Expr::new(ExprKind::Literal(literal), loc))
            }
            Rule::string_literal => Ok(Expr::new(ExprKind::Literal(Literal::String(string_value(pair)?)), loc)),
            Rule::boolean_literal => {
                Ok(Expr::new(ExprKind::Literal(Literal::Boolean(pair.as_str() == "true")), loc))
            }
            Rule::null_literal => Ok(Expr::new(ExprKind::Literal(Literal::Null), loc)),
            Rule::context_item => Ok(Expr::new(ExprKind::ContextItem, loc)),
            Rule::var_ref => Ok(Expr::new(ExprKind::VarRef(self.var_name(&pair)?), loc)),
            Rule::function_call => {
                let mut inner = children(pair.clone());
                let name = self.qname(&next_child(&mut inner, &pair)?)?;
                let args = self.arguments(next_child(&mut inner, &pair)?)?;
                Ok(Expr::new(ExprKind::FunctionCall { name, args }, loc))
            }
            Rule::named_function_ref => {
                let mut inner = pair.clone().into_inner();
                let name = self.qname(&next_child(&mut inner, &pair)?)?;
                let arity_pair = next_child(&mut inner, &pair)?;
                let arity = arity_pair.as_str().parse::<usize>().map_err(|e| invalid(&arity_pair, e.to_string()))?;
                Ok(Expr::new(ExprKind::NamedFunctionRef { name, arity }, loc))
            }
            Rule::inline_function => {
                let mut function = InlineFunction {
                    params: Vec::new(),
                    return_type: SequenceType::ITEM_STAR,
                    body: boxed(Expr::new(ExprKind::Sequence(Vec::new()), loc)),
                };
                for part in children(pair) {
                    match part.as_rule() {
                        Rule::param_list => function.params = self.params(part)?,
                        Rule::return_type => function.return_type = self.type_decl(part)?,
                        Rule::enclosed_expr => function.body = boxed(self.enclosed(part)?),
                        rule => return Err(invalid(&part, format!("Unexpected {rule:?} in inline function"))),
                    }
                }
                Ok(Expr::new(ExprKind::InlineFunction(function), loc))
            }
            Rule::object_constructor => {
                let pairs = children(pair)
                    .map(|entry| {
                        let mut inner = children(entry.clone());
                        let key = next_child(&mut inner, &entry)?;
                        let key = if key.as_rule() == Rule::bare_key {
                            let key_loc = location(&key);
                            Expr::new(ExprKind::Literal(Literal::String(key.as_str().trim().to_string())), key_loc)
                        } else {
                            self.expr(key)?
                        };
                        let value = self.expr(next_child(&mut inner, &entry)?)?;
                        Ok((key, value))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::new(ExprKind::ObjectConstructor(pairs), loc))
            }
            Rule::array_constructor => {
                let content = children(pair).next().map(|p| self.expr(p)).transpose()?;
                Ok(Expr::new(ExprKind::ArrayConstructor(content.map(boxed)), loc))
            }
            rule => Err(invalid(&pair, format!("Unsupported construct {rule:?}"))),
        }
    }

    /// Left-associative chain of one operator.
    fn fold(&self, pair: Pair<Rule>, combine: impl Fn(Expr, Expr) -> ExprKind) -> Result<Expr> {
        let loc = location(&pair);
        let mut inner = children(pair.clone());
        let mut acc = self.expr(next_child(&mut inner, &pair)?)?;
        for operand in inner {
            acc = Expr::new(combine(acc, self.expr(operand)?), loc);
        }
        Ok(acc)
    }

    fn arithmetic(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        let mut inner = pair.clone().into_inner();
        let mut acc = self.expr(next_child(&mut inner, &pair)?)?;
        while let Some(op) = inner.next() {
            let op = match op.as_str().trim() {
                "+" => ArithmeticOp::Add,
                "-" => ArithmeticOp::Sub,
                "*" => ArithmeticOp::Mul,
                "div" => ArithmeticOp::Div,
                "idiv" => ArithmeticOp::IDiv,
                "mod" => ArithmeticOp::Mod,
                other => return Err(invalid(&op, format!("Unknown operator {other}"))),
            };
            let right = self.expr(next_child(&mut inner, &pair)?)?;
            acc = Expr::new(ExprKind::Arithmetic { op, left: boxed(acc), right: boxed(right) }, loc);
        }
        Ok(acc)
    }

    fn comparison(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        let mut inner = pair.clone().into_inner();
        let left = self.expr(next_child(&mut inner, &pair)?)?;
        let Some(op_pair) = inner.next() else { return Ok(left) };
        let right = self.expr(next_child(&mut inner, &pair)?)?;
        let (op, general) = match op_pair.as_str().trim() {
            "=" => (ComparisonOp::Eq, true),
            "!=" => (ComparisonOp::Ne, true),
            "<" => (ComparisonOp::Lt, true),
            "<=" => (ComparisonOp::Le, true),
            ">" => (ComparisonOp::Gt, true),
            ">=" => (ComparisonOp::Ge, true),
            "eq" => (ComparisonOp::Eq, false),
            "ne" => (ComparisonOp::Ne, false),
            "lt" => (ComparisonOp::Lt, false),
            "le" => (ComparisonOp::Le, false),
            "gt" => (ComparisonOp::Gt, false),
            "ge" => (ComparisonOp::Ge, false),
            other => return Err(invalid(&op_pair, format!("Unknown comparison {other}"))),
        };
        Ok(Expr::new(ExprKind::Comparison { op, general, left: boxed(left), right: boxed(right) }, loc))
    }

    fn arguments(&self, pair: Pair<Rule>) -> Result<Vec<Option<Expr>>> {
        children(pair)
            .map(|arg| if arg.as_rule() == Rule::placeholder { Ok(None) } else { self.expr(arg).map(Some) })
            .collect()
    }

    fn postfix(&self, pair: Pair<Rule>) -> Result<Expr> {
        let mut inner = pair.clone().into_inner();
        let mut acc = self.expr(next_child(&mut inner, &pair)?)?;
        for step in inner {
            let loc = location(&step);
            let kind = match step.as_rule() {
                Rule::array_unbox => ExprKind::ArrayUnbox(boxed(acc)),
                Rule::array_lookup | Rule::predicate => {
                    let mut parts = children(step.clone());
                    let selector = self.expr(next_child(&mut parts, &step)?)?;
                    if step.as_rule() == Rule::array_lookup {
                        ExprKind::ArrayLookup { array: boxed(acc), index: boxed(selector) }
                    } else {
                        ExprKind::Predicate { sequence: boxed(acc), predicate: boxed(selector) }
                    }
                }
                Rule::object_lookup => {
                    let mut parts = children(step.clone());
                    let key = next_child(&mut parts, &step)?;
                    let key = if key.as_rule() == Rule::ncname {
                        Expr::new(ExprKind::Literal(Literal::String(key.as_str().to_string())), location(&key))
                    } else {
                        self.expr(key)?
                    };
                    ExprKind::ObjectLookup { object: boxed(acc), key: boxed(key) }
                }
                Rule::argument_list => {
                    let args = self
                        .arguments(step.clone())?
                        .into_iter()
                        .map(|arg| arg.ok_or_else(|| invalid(&step, "Placeholders require a named function")))
                        .collect::<Result<Vec<_>>>()?;
                    ExprKind::DynamicCall { function: boxed(acc), args }
                }
                rule => return Err(invalid(&step, format!("Unexpected {rule:?} after expression"))),
            };
            acc = Expr::new(kind, loc);
        }
        Ok(acc)
    }

    fn flwor(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        let mut clauses = Vec::new();
        let mut return_expr = None;
        for part in pair.into_inner() {
            let clause_loc = location(&part);
            match part.as_rule() {
                Rule::for_clause => {
                    for binding in children(part) {
                        let binding_loc = location(&binding);
                        clauses.push(Clause::new(ClauseKind::For(self.for_binding(binding)?), binding_loc));
                    }
                }
                Rule::let_clause => {
                    for binding in children(part) {
                        let binding_loc = location(&binding);
                        let mut inner = children(binding.clone());
                        let var = self.var_name(&next_child(&mut inner, &binding)?)?;
                        let mut seq_type = None;
                        let mut value = next_child(&mut inner, &binding)?;
                        if value.as_rule() == Rule::type_decl {
                            seq_type = Some(self.type_decl(value)?);
                            value = next_child(&mut inner, &binding)?;
                        }
                        let expr = self.expr(value)?;
                        clauses.push(Clause::new(ClauseKind::Let(LetClause { var, seq_type, expr }), binding_loc));
                    }
                }
                Rule::where_clause => {
                    let mut inner = children(part.clone());
                    let condition = self.expr(next_child(&mut inner, &part)?)?;
                    clauses.push(Clause::new(ClauseKind::Where(condition), clause_loc));
                }
                Rule::group_by_clause => {
                    let specs = children(part).map(|spec| self.grouping_spec(spec)).collect::<Result<Vec<_>>>()?;
                    clauses.push(Clause::new(ClauseKind::GroupBy(specs), clause_loc));
                }
                Rule::order_by_clause => {
                    let mut stable = false;
                    let mut specs = Vec::new();
                    for spec in children(part) {
                        match spec.as_rule() {
                            Rule::stable_order => stable = true,
                            _ => specs.push(self.order_spec(spec)?),
                        }
                    }
                    clauses.push(Clause::new(ClauseKind::OrderBy { specs, stable }, clause_loc));
                }
                Rule::count_clause => {
                    let mut inner = children(part.clone());
                    let var = self.var_name(&next_child(&mut inner, &part)?)?;
                    clauses.push(Clause::new(ClauseKind::Count(var), clause_loc));
                }
                Rule::return_clause => {
                    let mut inner = children(part.clone());
                    return_expr = Some(self.expr(next_child(&mut inner, &part)?)?);
                }
                rule => return Err(invalid(&part, format!("Unexpected {rule:?} in FLWOR expression"))),
            }
        }
        let return_expr = return_expr.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Missing return").at(loc))?;
        Ok(Expr::new(ExprKind::Flwor(Flwor { clauses, return_expr: boxed(return_expr) }), loc))
    }

    fn for_binding(&self, pair: Pair<Rule>) -> Result<ForClause> {
        let mut clause = ForClause {
            var: Name::local(""),
            seq_type: None,
            allowing_empty: false,
            positional: None,
            expr: Expr::new(ExprKind::Sequence(Vec::new()), location(&pair)),
        };
        for part in children(pair) {
            match part.as_rule() {
                Rule::var_name => clause.var = self.var_name(&part)?,
                Rule::type_decl => clause.seq_type = Some(self.type_decl(part)?),
                Rule::allowing_empty => clause.allowing_empty = true,
                Rule::positional_var => {
                    let mut inner = children(part.clone());
                    clause.positional = Some(self.var_name(&next_child(&mut inner, &part)?)?);
                }
                _ => clause.expr = self.expr(part)?,
            }
        }
        Ok(clause)
    }

    fn grouping_spec(&self, pair: Pair<Rule>) -> Result<GroupingSpec> {
        let mut spec = GroupingSpec { var: Name::local(""), seq_type: None, expr: None };
        for part in children(pair) {
            match part.as_rule() {
                Rule::var_name => spec.var = self.var_name(&part)?,
                Rule::type_decl => spec.seq_type = Some(self.type_decl(part)?),
                _ => spec.expr = Some(self.expr(part)?),
            }
        }
        Ok(spec)
    }

    fn order_spec(&self, pair: Pair<Rule>) -> Result<OrderSpec> {
        let mut inner = children(pair.clone());
        let expr = self.expr(next_child(&mut inner, &pair)?)?;
        let mut spec = OrderSpec { expr, descending: false, empty_greatest: false };
        for modifier in inner {
            match modifier.as_rule() {
                Rule::order_direction => spec.descending = modifier.as_str().trim() == "descending",
                Rule::empty_order => spec.empty_greatest = modifier.as_str().trim_end().ends_with("greatest"),
                rule => return Err(invalid(&modifier, format!("Unexpected {rule:?} in order by"))),
            }
        }
        Ok(spec)
    }

    fn quantified(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        let kind = if pair.as_str().starts_with("every") { QuantifierKind::Every } else { QuantifierKind::Some };
        let mut bindings = Vec::new();
        let mut satisfies = None;
        for part in children(pair) {
            if part.as_rule() == Rule::quantified_binding {
                let mut inner = children(part.clone());
                let var = self.var_name(&next_child(&mut inner, &part)?)?;
                let mut seq_type = None;
                let mut source = next_child(&mut inner, &part)?;
                if source.as_rule() == Rule::type_decl {
                    seq_type = Some(self.type_decl(source)?);
                    source = next_child(&mut inner, &part)?;
                }
                bindings.push(QuantifiedBinding { var, seq_type, expr: self.expr(source)? });
            } else {
                satisfies = Some(self.expr(part)?);
            }
        }
        let satisfies = satisfies.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Missing satisfies").at(loc))?;
        Ok(Expr::new(ExprKind::Quantified { kind, bindings, satisfies: boxed(satisfies) }, loc))
    }

    fn switch(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        let mut inner = children(pair.clone());
        let test = self.expr(next_child(&mut inner, &pair)?)?;
        let mut cases = Vec::new();
        let mut default = None;
        for part in inner {
            if part.as_rule() == Rule::switch_case {
                let mut exprs = children(part).map(|p| self.expr(p)).collect::<Result<Vec<_>>>()?;
                let result = exprs.pop().ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Empty case").at(loc))?;
                cases.push(SwitchCase { tests: exprs, result });
            } else {
                default = Some(self.expr(part)?);
            }
        }
        let default = default.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Missing default").at(loc))?;
        Ok(Expr::new(ExprKind::Switch { test: boxed(test), cases, default: boxed(default) }, loc))
    }

    fn typeswitch(&self, pair: Pair<Rule>) -> Result<Expr> {
        let loc = location(&pair);
        let mut inner = children(pair.clone());
        let operand = self.expr(next_child(&mut inner, &pair)?)?;
        let mut cases = Vec::new();
        let mut default_var = None;
        let mut default = None;
        for part in inner {
            let is_case = part.as_rule() == Rule::typeswitch_case;
            let mut var = None;
            let mut types = Vec::new();
            let mut result = None;
            for piece in children(part) {
                match piece.as_rule() {
                    Rule::var_name => var = Some(self.var_name(&piece)?),
                    Rule::sequence_type => types.push(sequence_type(piece)?),
                    _ => result = Some(self.expr(piece)?),
                }
            }
            let result = result.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Missing return").at(loc))?;
            if is_case {
                cases.push(TypeswitchCase { var, types, result });
            } else {
                default_var = var;
                default = Some(result);
            }
        }
        let default = default.ok_or_else(|| Error::from_code(ErrorCode::XPST0003, "Missing default").at(loc))?;
        Ok(Expr::new(ExprKind::Typeswitch { operand: boxed(operand), cases, default_var, default: boxed(default) }, loc))
    }
}

fn sequence_type(pair: Pair<Rule>) -> Result<SequenceType> {
    let mut inner = pair.clone().into_inner();
    let first = next_child(&mut inner, &pair)?;
    if first.as_rule() == Rule::empty_sequence_type {
        return Ok(SequenceType::Empty);
    }
    let name = first.as_str().trim_end_matches("()");
    let item_type = ItemType::from_name(name).ok_or_else(|| invalid(&first, format!("Unknown item type {name}")))?;
    let arity = match inner.next().map(|p| p.as_str()) {
        Some("?") => Arity::OneOrZero,
        Some("*") => Arity::ZeroOrMore,
        Some("+") => Arity::OneOrMore,
        _ => Arity::One,
    };
    Ok(SequenceType::new(item_type, arity))
}

/// Decoded content of a string literal, JSON escapes included.
fn string_value(pair: Pair<Rule>) -> Result<String> {
    let raw = pair.clone().into_inner().next().map(|p| p.as_str()).unwrap_or_default();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some(c @ ('"' | '\\' | '/')) => c,
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| invalid(&pair, format!("Invalid escape \\u{hex}")))?
            }
            other => return Err(invalid(&pair, format!("Invalid escape \\{}", other.unwrap_or(' ')))),
        };
        out.push(escaped);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn body(text: &str) -> ExprKind {
        parse_expression(text).unwrap().kind
    }

    #[rstest]
    #[case("1", ExprKind::Literal(Literal::Integer(1)))]
    #[case("2.5", ExprKind::Literal(Literal::Decimal(2.5)))]
    #[case("1e2", ExprKind::Literal(Literal::Double(100.0)))]
    #[case("\"a\\\"b\"", ExprKind::Literal(Literal::String("a\"b".to_string())))]
    #[case("null", ExprKind::Literal(Literal::Null))]
    #[case("true", ExprKind::Literal(Literal::Boolean(true)))]
    fn literals(#[case] text: &str, #[case] expected: ExprKind) {
        assert_eq!(body(text), expected);
    }

    #[rstest]
    fn multiplication_binds_tighter_than_addition() {
        let ExprKind::Arithmetic { op: ArithmeticOp::Add, right, .. } = body("1 + 2 * 3") else {
            panic!("expected an addition");
        };
        assert!(matches!(right.kind, ExprKind::Arithmetic { op: ArithmeticOp::Mul, .. }));
    }

    #[rstest]
    fn flwor_clauses_keep_their_order() {
        let ExprKind::Flwor(flwor) =
            body("for $x at $i in (1, 2), $y in $x let $z := $y where $z gt 1 order by $z descending count $c return $c")
        else {
            panic!("expected a FLWOR expression");
        };
        let kinds: Vec<&str> = flwor
            .clauses
            .iter()
            .map(|c| match &c.kind {
                ClauseKind::For(_) => "for",
                ClauseKind::Let(_) => "let",
                ClauseKind::Where(_) => "where",
                ClauseKind::GroupBy(_) => "group",
                ClauseKind::OrderBy { .. } => "order",
                ClauseKind::Count(_) => "count",
            })
            .collect();
        assert_eq!(kinds, ["for", "for", "let", "where", "order", "count"]);
        let ClauseKind::For(first) = &flwor.clauses[0].kind else { unreachable!() };
        assert_eq!(first.positional, Some(Name::local("i")));
    }

    #[rstest]
    fn postfix_operators_chain() {
        let ExprKind::ArrayUnbox(inner) = body("$o.items[]") else { panic!("expected unbox") };
        assert!(matches!(inner.kind, ExprKind::ObjectLookup { .. }));
        assert!(matches!(body("$a[[1]]"), ExprKind::ArrayLookup { .. }));
        assert!(matches!(body("(1, 2)[$$ gt 1]"), ExprKind::Predicate { .. }));
        assert!(matches!(body("$f(1, 2)"), ExprKind::DynamicCall { .. }));
    }

    #[rstest]
    fn simple_map_binds_tighter_than_arithmetic() {
        let ExprKind::Arithmetic { left, .. } = body("$a ! $$.x + 1") else { panic!("expected arithmetic") };
        assert!(matches!(left.kind, ExprKind::SimpleMap { .. }));
        let ExprKind::SimpleMap { sequence, .. } = body("$a ! $$ ! $$") else { panic!("expected a simple map") };
        assert!(matches!(sequence.kind, ExprKind::SimpleMap { .. }), "left-associative");
        assert!(matches!(body("$a != 1"), ExprKind::Comparison { general: true, .. }));
    }

    #[rstest]
    fn function_items() {
        assert!(matches!(body("concat#2"), ExprKind::NamedFunctionRef { arity: 2, .. }));
        let ExprKind::FunctionCall { args, .. } = body("substring(?, 2)") else { panic!("expected a call") };
        assert!(args[0].is_none());
        assert!(matches!(body("function ($x as integer) as integer { $x + 1 }"), ExprKind::InlineFunction(_)));
    }

    #[rstest]
    fn object_keys_may_be_bare_names() {
        let ExprKind::ObjectConstructor(pairs) = body("{ a : 1, \"b\" : 2 }") else { panic!("expected an object") };
        assert_eq!(pairs[0].0.kind, ExprKind::Literal(Literal::String("a".to_string())));
    }

    #[rstest]
    fn prolog_declarations() {
        let module = parse_module(
            "declare variable $x as integer := 1; \
             declare variable $input external; \
             declare function local:twice($v) { $v * 2 }; \
             local:twice($x)",
        )
        .unwrap();
        assert_eq!(module.variables.len(), 2);
        assert!(module.variables[1].external);
        assert_eq!(module.functions[0].name, Name::local("twice"));
    }

    #[rstest]
    fn library_modules_resolve_their_prefix() {
        let module =
            parse_module("module namespace m = \"urn:math\"; declare function m:sq($v) { $v * $v };").unwrap();
        assert_eq!(module.namespace.as_deref(), Some("urn:math"));
        assert_eq!(module.functions[0].name, Name::new(Some("urn:math"), "sq"));
    }

    #[rstest]
    #[case("for $x in (1, 2)")]
    #[case("1 +")]
    #[case("foo:bar()")]
    #[case("")]
    fn syntax_errors(#[case] text: &str) {
        let err = parse_module(text).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0003);
    }

    #[rstest]
    fn errors_carry_a_location() {
        let err = parse_module("1 +\n  )").unwrap_err();
        assert_eq!(err.location.map(|l| l.line), Some(2));
    }

    #[rstest]
    fn comments_are_ignored() {
        assert_eq!(body("(: note (: nested :) :) 42"), ExprKind::Literal(Literal::Integer(42)));
    }
}

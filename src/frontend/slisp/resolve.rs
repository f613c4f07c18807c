/// Name binding and kind inference
///
/// Turns validated statements into a resolved tree where every name is a
/// local slot or a field index and every operand kind has been checked.
/// Operands whose kind is only known at run time (`Any`) are left to the
/// runtime checks of the generated code.
use super::context::{Place, ResolveContext};
use crate::ast::{Node, Primitive, Span};
use crate::fragment::Field;
use crate::frontend::FrontEndError;
use crate::runtime::Value;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Number,
    Boolean,
    String,
    Nil,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Int(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Str(_) => ValueKind::String,
            Value::Nil | Value::Unit => ValueKind::Nil,
        }
    }

    /// Kind of a value that may come from either branch
    pub fn join(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            ValueKind::Any
        }
    }

    fn accepts(self, expected: ValueKind) -> bool {
        self == expected || self == ValueKind::Any
    }

    fn describe(self) -> &'static str {
        match self {
            ValueKind::Any => "any value",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::Nil => "nil",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Nil,
    Str(String),
    Local(u16),
    Field(u16),
    Arith { op: ArithOp, operands: Vec<Expr> },
    Neg(Box<Expr>),
    Compare { op: CompareOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    If { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Let { bindings: Vec<(u16, Expr)>, body: Vec<Expr> },
    Concat(Vec<Expr>),
    Count(Box<Expr>),
    Print { args: Vec<Expr>, newline: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Def { slot: u16, value: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBody {
    pub statements: Vec<Stmt>,
    pub locals: u16,
    /// Kind of the produced value, `None` when the body ends in a statement
    pub result: Option<ValueKind>,
}

pub fn resolve_fragment(statements: &[Node], fields: &[Field]) -> Result<ResolvedBody, FrontEndError> {
    let mut context = ResolveContext::new(fields).map_err(FrontEndError::Internal)?;
    let mut resolved = Vec::with_capacity(statements.len());
    let mut result = Some(ValueKind::Nil);

    for node in statements {
        if node.head_symbol() == Some("def") {
            let (name, value_node) = def_parts(node)?;
            let (value, kind) = resolve_expr(value_node, &mut context)?;
            let slot = context.declare_local(name, kind).map_err(|message| FrontEndError::diagnostic(message, node.span()))?;
            resolved.push(Stmt::Def { slot, value });
            result = None;
        } else {
            let (expr, kind) = resolve_expr(node, &mut context)?;
            resolved.push(Stmt::Expr(expr));
            result = Some(kind);
        }
    }

    let locals = u16::try_from(context.local_count()).map_err(|_| FrontEndError::Internal("too many local variables".to_string()))?;
    Ok(ResolvedBody {
        statements: resolved,
        locals,
        result,
    })
}

fn def_parts(node: &Node) -> Result<(&str, &Node), FrontEndError> {
    if let Node::List { root, .. } = node {
        if let [_, name, value] = root.as_slice() {
            if let Some(name) = name.as_symbol() {
                return Ok((name, value));
            }
        }
    }
    Err(FrontEndError::diagnostic("malformed def", node.span()))
}

fn resolve_expr(node: &Node, context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    match node {
        Node::Primitive { value: Primitive::Number(n), .. } => Ok((Expr::Int(*n), ValueKind::Number)),
        Node::Primitive { value: Primitive::String(s), .. } => Ok((Expr::Str(s.clone()), ValueKind::String)),
        Node::Symbol { value, span } => resolve_symbol(value, *span, context),
        Node::Vector { span, .. } => Err(FrontEndError::diagnostic("Vectors not supported in fragments", *span)),
        Node::List { root, span } => resolve_list(root, *span, context),
    }
}

fn resolve_symbol(name: &str, span: Span, context: &ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    match name {
        "true" => Ok((Expr::Bool(true), ValueKind::Boolean)),
        "false" => Ok((Expr::Bool(false), ValueKind::Boolean)),
        "nil" => Ok((Expr::Nil, ValueKind::Nil)),
        _ => match context.lookup(name) {
            Some(binding) => {
                let expr = match binding.place {
                    Place::Local(slot) => Expr::Local(slot),
                    Place::Field(index) => Expr::Field(index),
                };
                Ok((expr, binding.kind))
            }
            None => Err(FrontEndError::diagnostic(format!("Undefined variable: {}", name), span)),
        },
    }
}

fn resolve_list(root: &[Node], span: Span, context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    let Some((head, args)) = root.split_first() else {
        return Ok((Expr::Nil, ValueKind::Nil));
    };
    let operator = head
        .as_symbol()
        .ok_or_else(|| FrontEndError::diagnostic("First element must be a symbol", head.span()))?;

    match operator {
        "+" => resolve_arith(operator, ArithOp::Add, args, context),
        "*" => resolve_arith(operator, ArithOp::Mul, args, context),
        "/" => resolve_arith(operator, ArithOp::Div, args, context),
        "mod" => resolve_arith(operator, ArithOp::Rem, args, context),
        "-" if args.len() == 1 => {
            let operand = resolve_operand(operator, &args[0], ValueKind::Number, context)?;
            Ok((Expr::Neg(Box::new(operand)), ValueKind::Number))
        }
        "-" => resolve_arith(operator, ArithOp::Sub, args, context),
        "=" => resolve_compare(operator, CompareOp::Equal, args, context),
        "<" => resolve_compare(operator, CompareOp::Less, args, context),
        ">" => resolve_compare(operator, CompareOp::Greater, args, context),
        "<=" => resolve_compare(operator, CompareOp::LessEqual, args, context),
        ">=" => resolve_compare(operator, CompareOp::GreaterEqual, args, context),
        "not" => {
            let (operand, _) = resolve_expr(single(operator, args, span)?, context)?;
            Ok((Expr::Not(Box::new(operand)), ValueKind::Boolean))
        }
        "and" => Ok((Expr::And(resolve_all(args, context)?), ValueKind::Boolean)),
        "or" => Ok((Expr::Or(resolve_all(args, context)?), ValueKind::Boolean)),
        "if" => resolve_if(args, span, context),
        "let" => resolve_let(args, span, context),
        "str" => Ok((Expr::Concat(resolve_all(args, context)?), ValueKind::String)),
        "count" => {
            let operand = resolve_operand(operator, single(operator, args, span)?, ValueKind::String, context)?;
            Ok((Expr::Count(Box::new(operand)), ValueKind::Number))
        }
        "print" | "println" => Ok((
            Expr::Print {
                args: resolve_all(args, context)?,
                newline: operator == "println",
            },
            ValueKind::Nil,
        )),
        other => Err(FrontEndError::diagnostic(format!("Unsupported operation: {}", other), head.span())),
    }
}

fn single<'n>(operator: &str, args: &'n [Node], span: Span) -> Result<&'n Node, FrontEndError> {
    match args {
        [only] => Ok(only),
        _ => Err(FrontEndError::diagnostic(
            format!("Arity error in '{}': expected 1 arguments, got {}", operator, args.len()),
            span,
        )),
    }
}

fn resolve_all(args: &[Node], context: &mut ResolveContext) -> Result<Vec<Expr>, FrontEndError> {
    args.iter().map(|arg| resolve_expr(arg, context).map(|(expr, _)| expr)).collect()
}

/// Resolve an operand and check it can be `expected` at run time
fn resolve_operand(operator: &str, node: &Node, expected: ValueKind, context: &mut ResolveContext) -> Result<Expr, FrontEndError> {
    let (expr, kind) = resolve_expr(node, context)?;
    if !kind.accepts(expected) {
        return Err(FrontEndError::diagnostic(
            format!("Type error: '{}' expects a {}, found {}", operator, expected.describe(), kind.describe()),
            node.span(),
        ));
    }
    Ok(expr)
}

fn resolve_arith(operator: &str, op: ArithOp, args: &[Node], context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    let operands = args
        .iter()
        .map(|arg| resolve_operand(operator, arg, ValueKind::Number, context))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((Expr::Arith { op, operands }, ValueKind::Number))
}

fn resolve_compare(operator: &str, op: CompareOp, args: &[Node], context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    let [lhs, rhs] = args else {
        return Err(FrontEndError::Internal(format!("'{}' reached resolution with {} operands", operator, args.len())));
    };

    let (lhs, rhs) = if op == CompareOp::Equal {
        (resolve_expr(lhs, context)?.0, resolve_expr(rhs, context)?.0)
    } else {
        (
            resolve_operand(operator, lhs, ValueKind::Number, context)?,
            resolve_operand(operator, rhs, ValueKind::Number, context)?,
        )
    };

    Ok((
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ValueKind::Boolean,
    ))
}

fn resolve_if(args: &[Node], span: Span, context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    let [cond, then, otherwise] = args else {
        return Err(FrontEndError::diagnostic(
            format!("Arity error in 'if': expected 3 arguments, got {}", args.len()),
            span,
        ));
    };

    let (cond, _) = resolve_expr(cond, context)?;
    let (then, then_kind) = resolve_expr(then, context)?;
    let (otherwise, otherwise_kind) = resolve_expr(otherwise, context)?;

    Ok((
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        then_kind.join(otherwise_kind),
    ))
}

fn resolve_let(args: &[Node], span: Span, context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    let Some((Node::Vector { root: pairs, .. }, body)) = args.split_first() else {
        return Err(FrontEndError::diagnostic("let requires a vector of bindings", span));
    };

    context.push_scope();
    let resolved = resolve_let_scope(pairs, body, span, context);
    context.pop_scope();
    resolved
}

fn resolve_let_scope(pairs: &[Node], body: &[Node], span: Span, context: &mut ResolveContext) -> Result<(Expr, ValueKind), FrontEndError> {
    let mut bindings = Vec::with_capacity(pairs.len() / 2);
    for chunk in pairs.chunks(2) {
        let [name, value] = chunk else {
            return Err(FrontEndError::diagnostic("let bindings must have even number of elements", span));
        };
        let name = name
            .as_symbol()
            .ok_or_else(|| FrontEndError::diagnostic("let binding variables must be symbols", name.span()))?;

        // Later bindings see earlier ones, the value does not see its own name
        let (value, kind) = resolve_expr(value, context)?;
        let slot = context.declare_local(name, kind).map_err(|message| FrontEndError::diagnostic(message, span))?;
        bindings.push((slot, value));
    }

    let mut exprs = Vec::with_capacity(body.len());
    let mut kind = ValueKind::Nil;
    for node in body {
        let (expr, expr_kind) = resolve_expr(node, context)?;
        exprs.push(expr);
        kind = expr_kind;
    }

    Ok((Expr::Let { bindings, body: exprs }, kind))
}

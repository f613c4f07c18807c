/// Structural validation of a fragment body
use super::RESERVED_NAMES;
use crate::ast::{Node, Span};
use crate::frontend::FrontEndError;

pub fn validate_fragment(statements: &[Node]) -> Result<(), FrontEndError> {
    for statement in statements {
        validate_statement(statement)?;
    }
    Ok(())
}

fn validate_statement(node: &Node) -> Result<(), FrontEndError> {
    match node {
        Node::List { root, span } if node.head_symbol() == Some("def") => validate_def(&root[1..], *span),
        _ => validate_expression(node),
    }
}

fn validate_expression(node: &Node) -> Result<(), FrontEndError> {
    match node {
        Node::Primitive { .. } | Node::Symbol { .. } => Ok(()),
        Node::Vector { span, .. } => Err(FrontEndError::diagnostic("Vectors not supported in fragments", *span)),
        Node::List { root, span } => validate_list(root, *span),
    }
}

fn validate_list(root: &[Node], span: Span) -> Result<(), FrontEndError> {
    let Some((head, args)) = root.split_first() else {
        // () is nil
        return Ok(());
    };

    let operator = match head {
        Node::Symbol { value, .. } => value.as_str(),
        other => return Err(FrontEndError::diagnostic("First element must be a symbol", other.span())),
    };

    match operator {
        "+" | "*" | "/" | "mod" => expect_at_least(operator, args, 2, span)?,
        "-" => expect_at_least(operator, args, 1, span)?,
        "=" | "<" | ">" | "<=" | ">=" => expect_exactly(operator, args, 2, span)?,
        "not" | "count" => expect_exactly(operator, args, 1, span)?,
        "if" => expect_exactly(operator, args, 3, span)?,
        "and" | "or" | "str" | "print" | "println" => {}
        "let" => return validate_let(args, span),
        "def" => return Err(FrontEndError::diagnostic("def is only allowed as a statement", span)),
        "do" => return Err(FrontEndError::diagnostic("do blocks are only allowed at the top of a fragment", span)),
        "defn" | "fn" => return Err(FrontEndError::diagnostic("Function definitions are not supported in fragments", span)),
        other => return Err(FrontEndError::diagnostic(format!("Unsupported operation: {}", other), head.span())),
    }

    for arg in args {
        validate_expression(arg)?;
    }
    Ok(())
}

fn validate_let(args: &[Node], span: Span) -> Result<(), FrontEndError> {
    expect_at_least("let", args, 2, span)?;

    let (bindings, binding_span) = match &args[0] {
        Node::Vector { root, span } => (root, *span),
        other => return Err(FrontEndError::diagnostic("let requires a vector of bindings", other.span())),
    };

    if bindings.len() % 2 != 0 {
        return Err(FrontEndError::diagnostic("let bindings must have even number of elements", binding_span));
    }

    for chunk in bindings.chunks(2) {
        validate_binding_name(&chunk[0], "let binding variables must be symbols")?;
        validate_expression(&chunk[1])?;
    }

    for expression in &args[1..] {
        validate_expression(expression)?;
    }
    Ok(())
}

fn validate_def(args: &[Node], span: Span) -> Result<(), FrontEndError> {
    expect_exactly("def", args, 2, span)?;
    validate_binding_name(&args[0], "def name must be a symbol")?;
    validate_expression(&args[1])
}

fn validate_binding_name(node: &Node, message: &str) -> Result<(), FrontEndError> {
    match node {
        Node::Symbol { value, span } if RESERVED_NAMES.contains(&value.as_str()) => {
            Err(FrontEndError::diagnostic(format!("Cannot rebind reserved name '{}'", value), *span))
        }
        Node::Symbol { .. } => Ok(()),
        other => Err(FrontEndError::diagnostic(message, other.span())),
    }
}

fn expect_exactly(operator: &str, args: &[Node], expected: usize, span: Span) -> Result<(), FrontEndError> {
    if args.len() != expected {
        return Err(FrontEndError::diagnostic(
            format!("Arity error in '{}': expected {} arguments, got {}", operator, expected, args.len()),
            span,
        ));
    }
    Ok(())
}

fn expect_at_least(operator: &str, args: &[Node], expected: usize, span: Span) -> Result<(), FrontEndError> {
    if args.len() < expected {
        return Err(FrontEndError::diagnostic(
            format!("Arity error in '{}': expected at least {} arguments, got {}", operator, expected, args.len()),
            span,
        ));
    }
    Ok(())
}

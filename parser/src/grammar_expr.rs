//! Expression grammar
//!
//! Precedence, loosest first: `||`, `&&`, comparisons, `+`/`-`, unary
//! `!`/`-`, then postfix field access, calls and indexing.

use nom::{
    branch::alt,
    bytes::complete::is_not,
    character::complete::{char, digit1},
    combinator::{map, map_res, value},
    multi::many0,
    sequence::{delimited, preceded},
    Parser,
};

use crate::ast::*;
use crate::grammar::{expect, fail, identifier, keyword, make_span, peek_word, position, symbol, ws, PResult};
use crate::grammar_stmt::block;
use crate::grammar_types::{params, return_types};

type Level<'a> = fn(&'a str, &'a str) -> PResult<'a, Expr>;

pub fn expression<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    binary_level(full, input, &[("||", BinaryOp::Or)], and_expr)
}

/// Comma separated expressions (at least one)
pub fn expression_list<'a>(full: &'a str, input: &'a str) -> PResult<'a, Vec<Expr>> {
    let (mut input, first) = expression(full, input)?;
    let mut exprs = vec![first];
    while let Ok((rest, _)) = symbol(",")(input) {
        let (rest, expr) = expect(expression(full, rest), "an expression")?;
        exprs.push(expr);
        input = rest;
    }
    Ok((input, exprs))
}

fn and_expr<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    binary_level(full, input, &[("&&", BinaryOp::And)], comparison)
}

fn comparison<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    binary_level(
        full,
        input,
        &[
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::NotEq),
            ("<=", BinaryOp::LessEq),
            (">=", BinaryOp::GreaterEq),
            ("<", BinaryOp::Less),
            (">", BinaryOp::Greater),
        ],
        additive,
    )
}

fn additive<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    binary_level(
        full,
        input,
        &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
        unary,
    )
}

/// Left-associative chain of `operand (op operand)*`
fn binary_level<'a>(
    full: &'a str,
    input: &'a str,
    operators: &[(&'static str, BinaryOp)],
    operand: Level<'a>,
) -> PResult<'a, Expr> {
    let (mut input, mut left) = operand(full, input)?;
    'chain: loop {
        for &(text, op) in operators {
            if let Ok((rest, _)) = symbol(text)(input) {
                let (rest, right) = expect(operand(full, rest), "an expression")?;
                let span = left.span.to(right.span);
                left = Expr {
                    kind: ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                };
                input = rest;
                continue 'chain;
            }
        }
        return Ok((input, left));
    }
}

fn unary<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let op = if input.starts_with('!') {
        Some(UnaryOp::Not)
    } else if input.starts_with('-') {
        Some(UnaryOp::Neg)
    } else {
        None
    };
    match op {
        Some(op) => {
            let rest = &input[1..];
            let (rest, operand) = expect(unary(full, rest), "an expression")?;
            Ok((
                rest,
                Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span: make_span(full, start, rest),
                },
            ))
        }
        None => postfix(full, input),
    }
}

fn postfix<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    let (mut input, mut expr) = primary(full, input)?;
    let start = expr.span.start;
    loop {
        if let Ok((rest, _)) = symbol(".")(input) {
            let (rest, name) = expect(identifier(rest), "a field or method name")?;
            expr = Expr {
                kind: ExprKind::Field {
                    object: Box::new(expr),
                    name,
                },
                span: make_span(full, start, rest),
            };
            input = rest;
        } else if let Ok((rest, _)) = symbol("(")(input) {
            let (rest, args) = call_arguments(full, rest)?;
            expr = Expr {
                kind: ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                },
                span: make_span(full, start, rest),
            };
            input = rest;
        } else if let Ok((rest, _)) = symbol("[")(input) {
            let (rest, index) = expect(expression(full, rest), "an index expression")?;
            let (rest, _) = expect(symbol("]")(rest), "']'")?;
            expr = Expr {
                kind: ExprKind::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                },
                span: make_span(full, start, rest),
            };
            input = rest;
        } else {
            return Ok((input, expr));
        }
    }
}

/// Arguments after the opening `(` up to and including `)`
fn call_arguments<'a>(full: &'a str, input: &'a str) -> PResult<'a, Vec<Expr>> {
    if let Ok((rest, _)) = symbol(")")(input) {
        return Ok((rest, Vec::new()));
    }
    let (rest, args) = expression_list(full, input)?;
    let (rest, _) = expect(symbol(")")(rest), "',' or ')'")?;
    Ok((rest, args))
}

fn primary<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let literal = |rest: &'a str, kind: ExprKind| -> PResult<'a, Expr> {
        Ok((
            rest,
            Expr {
                kind,
                span: make_span(full, start, rest),
            },
        ))
    };

    if input.starts_with('"') {
        let (rest, text) = string_literal(input)?;
        return literal(rest, ExprKind::Str(text));
    }
    if input.starts_with(|c: char| c.is_ascii_digit()) {
        let (rest, number) = integer(input)?;
        return literal(rest, ExprKind::Int(number));
    }
    if let Ok((rest, _)) = symbol("(")(input) {
        let (rest, inner) = expect(expression(full, rest), "an expression")?;
        let (rest, _) = expect(symbol(")")(rest), "')'")?;
        return Ok((
            rest,
            Expr {
                kind: inner.kind,
                span: make_span(full, start, rest),
            },
        ));
    }

    match peek_word(input) {
        Some("true") => {
            let (rest, _) = keyword("true")(input)?;
            literal(rest, ExprKind::Bool(true))
        }
        Some("false") => {
            let (rest, _) = keyword("false")(input)?;
            literal(rest, ExprKind::Bool(false))
        }
        Some("nil") => {
            let (rest, _) = keyword("nil")(input)?;
            literal(rest, ExprKind::Nil)
        }
        Some("fn") => function_literal(full, input),
        Some("new") => composite(full, input),
        Some(_) => {
            let (rest, name) = expect(identifier(input), "an expression")?;
            literal(rest, ExprKind::Ident(name))
        }
        None => fail(input, "an expression"),
    }
}

/// `fn(params) -> R { body }`
fn function_literal<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    let start = position(full, input);
    let (input, _) = keyword("fn")(input)?;
    let (input, params) = params(full, input)?;
    let (input, returns) = return_types(full, input)?;
    let (input, body) = expect(block(full, input), "a function body")?;
    Ok((
        input,
        Expr {
            kind: ExprKind::FunctionLiteral {
                params,
                returns,
                body,
            },
            span: make_span(full, start, input),
        },
    ))
}

/// `new Name { field: value, .. }`
fn composite<'a>(full: &'a str, input: &'a str) -> PResult<'a, Expr> {
    let start = position(full, input);
    let (input, _) = keyword("new")(input)?;
    let (input, type_name) = expect(identifier(input), "a type name")?;
    let (mut input, _) = expect(symbol("{")(input), "'{'")?;
    let mut fields = Vec::new();
    loop {
        if let Ok((rest, _)) = symbol("}")(input) {
            input = rest;
            break;
        }
        let (rest, name) = expect(identifier(input), "a field name or '}'")?;
        let (rest, _) = expect(symbol(":")(rest), "':'")?;
        let (rest, value) = expect(expression(full, rest), "a field value")?;
        fields.push((name, value));
        match symbol(",")(rest) {
            Ok((rest, _)) => input = rest,
            Err(_) => {
                let (rest, _) = expect(symbol("}")(rest), "',' or '}'")?;
                input = rest;
                break;
            }
        }
    }
    Ok((
        input,
        Expr {
            kind: ExprKind::Composite { type_name, fields },
            span: make_span(full, start, input),
        },
    ))
}

fn integer(input: &str) -> PResult<i64> {
    map_res(digit1, str::parse::<i64>).parse(input)
}

/// Double-quoted string with `\n`, `\t`, `\\` and `\"` escapes
pub fn string_literal(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    let escape = preceded(
        char('\\'),
        alt((
            value("\n", char('n')),
            value("\t", char('t')),
            value("\\", char('\\')),
            value("\"", char('"')),
        )),
    );
    let fragment = alt((is_not("\"\\"), escape));
    let body = map(many0(fragment), |parts: Vec<&str>| parts.concat());
    delimited(char('"'), body, char('"')).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Expr {
        let (rest, expr) = expression(text, text).unwrap();
        assert!(rest.trim().is_empty(), "unparsed input: {:?}", rest);
        expr
    }

    #[test]
    fn test_method_call_chain() {
        let expr = parse("otel.tracer.start(ctx, \"name\")");
        match expr.kind {
            ExprKind::Call { callee, args } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(callee.kind, ExprKind::Field { ref name, .. } if name == "start"));
            }
            other => panic!("expected call, got {:?}", other),
        }
        assert_eq!(expr.span, Span::new(0, 30));
    }

    #[test]
    fn test_precedence() {
        match parse("a || b && c == d").kind {
            ExprKind::Binary { op: BinaryOp::Or, right, .. } => {
                assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("expected ||, got {:?}", other),
        }
        match parse("!ok").kind {
            ExprKind::Unary { op: UnaryOp::Not, .. } => {}
            other => panic!("expected unary, got {:?}", other),
        }
    }

    #[test]
    fn test_less_equal_not_split() {
        match parse("a <= b").kind {
            ExprKind::Binary { op, .. } => assert_eq!(op, BinaryOp::LessEq),
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_string_escapes() {
        let (_, text) = string_literal(r#""a\"b\n""#).unwrap();
        assert_eq!(text, "a\"b\n");
        let (_, empty) = string_literal(r#""""#).unwrap();
        assert_eq!(empty, "");
    }

    #[test]
    fn test_function_literal_and_composite() {
        assert!(matches!(
            parse("fn() -> Span { return s; }").kind,
            ExprKind::FunctionLiteral { ref returns, .. } if returns.len() == 1
        ));
        match parse("new Holder { span: s, n: 1 }").kind {
            ExprKind::Composite { type_name, fields } => {
                assert_eq!(type_name, "Holder");
                assert_eq!(fields.len(), 2);
            }
            other => panic!("expected composite, got {:?}", other),
        }
    }

    #[test]
    fn test_index_and_literals() {
        assert!(matches!(parse("spans[0]").kind, ExprKind::Index { .. }));
        assert!(matches!(parse("nil").kind, ExprKind::Nil));
        assert!(matches!(parse("42").kind, ExprKind::Int(42)));
        assert!(expression("", "").is_err());
    }
}

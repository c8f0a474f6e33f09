//! Statement grammar

use crate::ast::*;
use crate::grammar::{expect, fail, identifier, keyword, make_span, peek_word, position, symbol, ws, PResult};
use crate::grammar_expr::{expression, expression_list};
use crate::grammar_types::type_expr;

/// `{ statement* }`
pub fn block<'a>(full: &'a str, input: &'a str) -> PResult<'a, Block> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (mut input, _) = expect(symbol("{")(input), "'{'")?;
    let mut statements = Vec::new();
    loop {
        let (rest, _) = ws(input)?;
        if rest.is_empty() {
            return fail(rest, "'}'");
        }
        if let Ok((rest, _)) = symbol("}")(rest) {
            return Ok((
                rest,
                Block {
                    statements,
                    span: make_span(full, start, rest),
                },
            ));
        }
        let (rest, stmt) = statement(full, rest)?;
        statements.push(stmt);
        input = rest;
    }
}

pub fn statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, Stmt> {
    let (input, _) = ws(input)?;
    let start = position(full, input);

    let (rest, kind) = match peek_word(input) {
        Some("if") => return if_statement(full, input),
        Some("let") => let_statement(full, input)?,
        Some("var") => var_statement(full, input)?,
        Some("while") => {
            let (rest, _) = keyword("while")(input)?;
            let (rest, condition) = expect(expression(full, rest), "a condition")?;
            let (rest, body) = block(full, rest)?;
            (rest, StmtKind::While { condition, body })
        }
        Some("loop") => {
            let (rest, _) = keyword("loop")(input)?;
            let (rest, body) = block(full, rest)?;
            (rest, StmtKind::Loop { body })
        }
        Some("for") => for_statement(full, input)?,
        Some("switch") => switch_statement(full, input)?,
        Some("return") => {
            let (rest, _) = keyword("return")(input)?;
            match symbol(";")(rest) {
                Ok((rest, _)) => (rest, StmtKind::Return(Vec::new())),
                Err(_) => {
                    let (rest, values) = expression_list(full, rest)?;
                    let (rest, _) = expect(symbol(";")(rest), "';'")?;
                    (rest, StmtKind::Return(values))
                }
            }
        }
        Some("defer") => {
            let (rest, _) = keyword("defer")(input)?;
            let (rest, call) = expect(expression(full, rest), "a deferred call")?;
            let (rest, _) = expect(symbol(";")(rest), "';'")?;
            (rest, StmtKind::Defer(call))
        }
        Some("panic") => {
            let (rest, _) = keyword("panic")(input)?;
            let (rest, _) = expect(symbol("(")(rest), "'('")?;
            let (rest, value) = match symbol(")")(rest) {
                Ok((rest, _)) => (rest, None),
                Err(_) => {
                    let (rest, value) = expression(full, rest)?;
                    let (rest, _) = expect(symbol(")")(rest), "')'")?;
                    (rest, Some(value))
                }
            };
            let (rest, _) = expect(symbol(";")(rest), "';'")?;
            (rest, StmtKind::Panic(value))
        }
        Some("break") => {
            let (rest, _) = keyword("break")(input)?;
            let (rest, _) = expect(symbol(";")(rest), "';'")?;
            (rest, StmtKind::Break)
        }
        Some("continue") => {
            let (rest, _) = keyword("continue")(input)?;
            let (rest, _) = expect(symbol(";")(rest), "';'")?;
            (rest, StmtKind::Continue)
        }
        Some("goto") => {
            let (rest, _) = keyword("goto")(input)?;
            let (rest, label) = expect(identifier(rest), "a label")?;
            let (rest, _) = expect(symbol(";")(rest), "';'")?;
            (rest, StmtKind::Goto(label))
        }
        _ if input.starts_with('{') => {
            let (rest, body) = block(full, input)?;
            (rest, StmtKind::Block(body))
        }
        _ => simple_statement(full, input)?,
    };

    Ok((
        rest,
        Stmt {
            kind,
            span: make_span(full, start, rest),
        },
    ))
}

/// `let a, _: T = value;`
fn let_statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, StmtKind> {
    let (mut input, _) = keyword("let")(input)?;
    let mut patterns = Vec::new();
    loop {
        let (rest, _) = ws(input)?;
        let start = position(full, rest);
        let (rest, name) = expect(identifier(rest), "a binding name")?;
        let pattern = if name == "_" {
            Pattern::Wildcard
        } else {
            Pattern::Ident(name)
        };
        patterns.push((pattern, make_span(full, start, rest)));
        match symbol(",")(rest) {
            Ok((rest, _)) => input = rest,
            Err(_) => {
                input = rest;
                break;
            }
        }
    }
    let (input, ty) = match symbol(":")(input) {
        Ok((rest, _)) => {
            let (rest, ty) = type_expr(full, rest)?;
            (rest, Some(ty))
        }
        Err(_) => (input, None),
    };
    let (input, _) = expect(symbol("=")(input), "'='")?;
    let (input, value) = expect(expression(full, input), "an expression")?;
    let (input, _) = expect(symbol(";")(input), "';'")?;
    Ok((input, StmtKind::Let { patterns, ty, value }))
}

/// `var x: T;` declares a zero value; `var x: T = value;` is a typed `let`
fn var_statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, StmtKind> {
    let (input, _) = keyword("var")(input)?;
    let (input, _) = ws(input)?;
    let name_start = position(full, input);
    let (input, name) = expect(identifier(input), "a variable name")?;
    let name_span = make_span(full, name_start, input);
    let (input, _) = expect(symbol(":")(input), "':'")?;
    let (input, ty) = type_expr(full, input)?;
    if let Ok((rest, _)) = symbol(";")(input) {
        return Ok((rest, StmtKind::Var { name, ty }));
    }
    let (input, _) = expect(symbol("=")(input), "'=' or ';'")?;
    let (input, value) = expect(expression(full, input), "an expression")?;
    let (input, _) = expect(symbol(";")(input), "';'")?;
    Ok((
        input,
        StmtKind::Let {
            patterns: vec![(Pattern::Ident(name), name_span)],
            ty: Some(ty),
            value,
        },
    ))
}

fn if_statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, Stmt> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = keyword("if")(input)?;
    let (input, condition) = expect(expression(full, input), "a condition")?;
    let (input, then_block) = block(full, input)?;

    let (input, else_branch) = match keyword("else")(input) {
        Ok((rest, _)) => {
            if peek_word(rest) == Some("if") {
                let (rest, nested) = if_statement(full, rest)?;
                (rest, Some(Box::new(nested)))
            } else {
                let (rest, body) = block(full, rest)?;
                let span = body.span;
                (
                    rest,
                    Some(Box::new(Stmt {
                        kind: StmtKind::Block(body),
                        span,
                    })),
                )
            }
        }
        Err(_) => (input, None),
    };

    Ok((
        input,
        Stmt {
            kind: StmtKind::If {
                condition,
                then_block,
                else_branch,
            },
            span: make_span(full, start, input),
        },
    ))
}

/// `for x in items { .. }`
fn for_statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, StmtKind> {
    let (input, _) = keyword("for")(input)?;
    let (input, name) = expect(identifier(input), "a loop variable")?;
    let pattern = if name == "_" {
        Pattern::Wildcard
    } else {
        Pattern::Ident(name)
    };
    let (input, _) = expect(keyword("in")(input), "'in'")?;
    let (input, iterable) = expect(expression(full, input), "an expression")?;
    let (input, body) = block(full, input)?;
    Ok((
        input,
        StmtKind::For {
            pattern,
            iterable,
            body,
        },
    ))
}

/// `switch value { case a, b { .. } default { .. } }`
fn switch_statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, StmtKind> {
    let (input, _) = keyword("switch")(input)?;
    let (input, discriminant) = expect(expression(full, input), "an expression")?;
    let (mut input, _) = expect(symbol("{")(input), "'{'")?;
    let mut cases = Vec::new();
    let mut default = None;

    loop {
        if let Ok((rest, _)) = symbol("}")(input) {
            input = rest;
            break;
        }
        let (rest, _) = ws(input)?;
        let start = position(full, rest);
        match peek_word(rest) {
            Some("case") => {
                let (rest, _) = keyword("case")(rest)?;
                let (rest, values) = expression_list(full, rest)?;
                let (rest, body) = block(full, rest)?;
                cases.push(SwitchCase {
                    values,
                    body,
                    span: make_span(full, start, rest),
                });
                input = rest;
            }
            Some("default") if default.is_none() => {
                let (rest, _) = keyword("default")(rest)?;
                let (rest, body) = block(full, rest)?;
                default = Some(body);
                input = rest;
            }
            _ => return fail(rest, "'case', 'default' or '}'"),
        }
    }

    Ok((
        input,
        StmtKind::Switch {
            discriminant,
            cases,
            default,
        },
    ))
}

/// Expression statement or assignment `a, b = value;`
fn simple_statement<'a>(full: &'a str, input: &'a str) -> PResult<'a, StmtKind> {
    let (input, targets) = expect(expression_list(full, input), "a statement")?;
    if let Ok((rest, _)) = symbol("=")(input) {
        let (rest, value) = expect(expression(full, rest), "an expression")?;
        let (rest, _) = expect(symbol(";")(rest), "';'")?;
        return Ok((rest, StmtKind::Assign { targets, value }));
    }
    if targets.len() > 1 {
        return fail(input, "'='");
    }
    let (input, _) = expect(symbol(";")(input), "';'")?;
    let expr = targets.into_iter().next();
    match expr {
        Some(expr) => Ok((input, StmtKind::Expr(expr))),
        None => fail(input, "a statement"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Stmt {
        let (rest, stmt) = statement(text, text).unwrap();
        assert!(rest.trim().is_empty(), "unparsed input: {:?}", rest);
        stmt
    }

    #[test]
    fn test_let_with_wildcard() {
        match parse("let ctx, span = tracer.start(ctx, \"op\");").kind {
            StmtKind::Let { patterns, ty, .. } => {
                assert_eq!(patterns.len(), 2);
                assert_eq!(patterns[0].0, Pattern::Ident("ctx".into()));
                assert_eq!(patterns[1].1, Span::new(9, 13));
                assert!(ty.is_none());
            }
            other => panic!("expected let, got {:?}", other),
        }
        match parse("let _, s = f();").kind {
            StmtKind::Let { patterns, .. } => assert_eq!(patterns[0].0, Pattern::Wildcard),
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_var_forms() {
        assert!(matches!(parse("var s: Span;").kind, StmtKind::Var { .. }));
        assert!(matches!(
            parse("var s: Span = make();").kind,
            StmtKind::Let { ty: Some(_), .. }
        ));
    }

    #[test]
    fn test_assignment_and_expression() {
        assert!(matches!(
            parse("_, span = tracer.start(ctx);").kind,
            StmtKind::Assign { ref targets, .. } if targets.len() == 2
        ));
        assert!(matches!(parse("span.end();").kind, StmtKind::Expr(_)));
        let bad = "a, b;";
        assert!(statement(bad, bad).is_err());
    }

    #[test]
    fn test_else_if_chain() {
        match parse("if a { } else if b { return; } else { panic(\"x\"); }").kind {
            StmtKind::If { else_branch: Some(nested), .. } => match nested.kind {
                StmtKind::If { else_branch: Some(last), .. } => {
                    assert!(matches!(last.kind, StmtKind::Block(_)))
                }
                other => panic!("expected nested if, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_switch() {
        match parse("switch x { case 1, 2 { f(); } default { g(); } }").kind {
            StmtKind::Switch { cases, default, .. } => {
                assert_eq!(cases.len(), 1);
                assert_eq!(cases[0].values.len(), 2);
                assert!(default.is_some());
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn test_control_statements() {
        assert!(matches!(parse("defer span.end();").kind, StmtKind::Defer(_)));
        assert!(matches!(parse("panic();").kind, StmtKind::Panic(None)));
        assert!(matches!(parse("goto done;").kind, StmtKind::Goto(ref l) if l == "done"));
        assert!(matches!(parse("return a, b;").kind, StmtKind::Return(ref v) if v.len() == 2));
        assert!(matches!(parse("for s in spans { s.end(); }").kind, StmtKind::For { .. }));
        assert!(matches!(parse("loop { break; }").kind, StmtKind::Loop { .. }));
    }

    #[test]
    fn test_unclosed_block_fails() {
        let text = "{ f();";
        assert!(block(text, text).is_err());
    }
}

//! Type expressions and parameter lists

use crate::ast::*;
use crate::grammar::{expect, fail, identifier, keyword, make_span, position, symbol, ws, PResult};

/// `Name`, `pkg.Name`, `[]T`, `(A, B)` or `fn(A, B) -> R`
pub fn type_expr<'a>(full: &'a str, input: &'a str) -> PResult<'a, TypeExpr> {
    let (input, _) = ws(input)?;
    let start = position(full, input);

    if let Ok((rest, _)) = symbol("[")(input) {
        let (rest, _) = expect(symbol("]")(rest), "']'")?;
        let (rest, element) = type_expr(full, rest)?;
        return Ok((
            rest,
            TypeExpr {
                kind: TypeExprKind::Slice(Box::new(element)),
                span: make_span(full, start, rest),
            },
        ));
    }

    if let Ok((rest, _)) = symbol("(")(input) {
        let (rest, mut elements) = type_list(full, rest)?;
        if elements.len() == 1 {
            let mut inner = elements.remove(0);
            inner.span = make_span(full, start, rest);
            return Ok((rest, inner));
        }
        return Ok((
            rest,
            TypeExpr {
                kind: TypeExprKind::Tuple(elements),
                span: make_span(full, start, rest),
            },
        ));
    }

    if let Ok((rest, _)) = keyword("fn")(input) {
        let (rest, _) = expect(symbol("(")(rest), "'('")?;
        let (rest, params) = type_list(full, rest)?;
        let (rest, returns) = return_types(full, rest)?;
        return Ok((
            rest,
            TypeExpr {
                kind: TypeExprKind::Function { params, returns },
                span: make_span(full, start, rest),
            },
        ));
    }

    let (mut rest, mut name) = expect(identifier(input), "a type")?;
    while let Ok((after_dot, _)) = symbol(".")(rest) {
        let (after, part) = expect(identifier(after_dot), "a type name")?;
        name.push('.');
        name.push_str(&part);
        rest = after;
    }
    Ok((
        rest,
        TypeExpr {
            kind: TypeExprKind::Named(name),
            span: make_span(full, start, rest),
        },
    ))
}

/// Comma separated types up to and including the closing `)`
fn type_list<'a>(full: &'a str, input: &'a str) -> PResult<'a, Vec<TypeExpr>> {
    let mut types = Vec::new();
    if let Ok((rest, _)) = symbol(")")(input) {
        return Ok((rest, types));
    }
    let mut input = input;
    loop {
        let (rest, ty) = type_expr(full, input)?;
        types.push(ty);
        if let Ok((rest, _)) = symbol(",")(rest) {
            input = rest;
            continue;
        }
        let (rest, _) = expect(symbol(")")(rest), "',' or ')'")?;
        return Ok((rest, types));
    }
}

/// Optional `-> R`; a tuple result yields one entry per element
pub fn return_types<'a>(full: &'a str, input: &'a str) -> PResult<'a, Vec<TypeExpr>> {
    match symbol("->")(input) {
        Ok((rest, _)) => {
            let (rest, ty) = type_expr(full, rest)?;
            match ty.kind {
                TypeExprKind::Tuple(elements) => Ok((rest, elements)),
                kind => Ok((rest, vec![TypeExpr { kind, span: ty.span }])),
            }
        }
        Err(_) => Ok((input, Vec::new())),
    }
}

/// `(name: T, rest: ...U)`
pub fn params<'a>(full: &'a str, input: &'a str) -> PResult<'a, Vec<Param>> {
    let (input, _) = expect(symbol("(")(input), "'('")?;
    let mut params = Vec::new();
    if let Ok((rest, _)) = symbol(")")(input) {
        return Ok((rest, params));
    }
    let mut input = input;
    loop {
        let (rest, param) = param(full, input)?;
        let variadic = param.variadic;
        params.push(param);
        if let Ok((rest, _)) = symbol(",")(rest) {
            if variadic {
                return fail(rest, "')' after a variadic parameter");
            }
            input = rest;
            continue;
        }
        let (rest, _) = expect(symbol(")")(rest), "',' or ')'")?;
        return Ok((rest, params));
    }
}

fn param<'a>(full: &'a str, input: &'a str) -> PResult<'a, Param> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, name) = expect(identifier(input), "a parameter name")?;
    let (input, _) = expect(symbol(":")(input), "':'")?;
    let (input, variadic) = match symbol("...")(input) {
        Ok((rest, _)) => (rest, true),
        Err(_) => (input, false),
    };
    let (input, ty) = type_expr(full, input)?;
    Ok((
        input,
        Param {
            name,
            ty,
            variadic,
            span: make_span(full, start, input),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> TypeExpr {
        type_expr(text, text).unwrap().1
    }

    #[test]
    fn test_named_and_qualified() {
        assert!(matches!(parse("Span").kind, TypeExprKind::Named(ref n) if n == "Span"));
        assert!(matches!(parse("trace.Span").kind, TypeExprKind::Named(ref n) if n == "trace.Span"));
    }

    #[test]
    fn test_composite_types() {
        assert!(matches!(parse("[]Span").kind, TypeExprKind::Slice(_)));
        match parse("(Context, Span)").kind {
            TypeExprKind::Tuple(elements) => assert_eq!(elements.len(), 2),
            other => panic!("expected tuple, got {:?}", other),
        }
        match parse("fn(Span) -> (int, bool)").kind {
            TypeExprKind::Function { params, returns } => {
                assert_eq!(params.len(), 1);
                assert_eq!(returns.len(), 2);
            }
            other => panic!("expected function type, got {:?}", other),
        }
    }

    #[test]
    fn test_variadic_params() {
        let text = "(name: string, opts: ...Option)";
        let (_, parsed) = params(text, text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(!parsed[0].variadic);
        assert!(parsed[1].variadic);

        let bad = "(opts: ...Option, more: int)";
        assert!(params(bad, bad).is_err());
    }
}

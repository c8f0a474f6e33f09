//! Lexical helpers and file-level declarations
//!
//! Parsers take the full file text next to the current remainder so spans can
//! be expressed as byte offsets from the start of the file.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    character::complete::{multispace1, satisfy},
    combinator::{not, recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::{delimited, pair, terminated},
    IResult, Parser,
};

use crate::ast::*;
use crate::error::SyntaxError;
use crate::grammar_expr::{expression, string_literal};
use crate::grammar_stmt::block;
use crate::grammar_types::{params, return_types, type_expr};

pub type PResult<'a, T> = IResult<&'a str, T, SyntaxError<&'a str>>;

const KEYWORDS: &[&str] = &[
    "as", "break", "case", "continue", "default", "defer", "else", "false", "fn", "for", "goto",
    "if", "import", "in", "let", "loop", "module", "new", "nil", "panic", "return", "switch",
    "true", "type", "var", "while",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte offset of `current` within `full`
pub fn position(full: &str, current: &str) -> usize {
    full.len() - current.len()
}

pub fn make_span(full: &str, start: usize, current: &str) -> Span {
    Span::new(start, position(full, current))
}

/// Skip whitespace and comments
pub fn ws(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), line_comment),
            value((), block_comment),
        ))),
    )
    .parse(input)
}

fn line_comment(input: &str) -> PResult<&str> {
    recognize(pair(tag("//"), take_while(|c: char| c != '\n'))).parse(input)
}

fn block_comment(input: &str) -> PResult<&str> {
    recognize(delimited(tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

/// Attach a description of what was wanted to a failing parse
pub fn expect<'a, T>(result: PResult<'a, T>, what: &'static str) -> PResult<'a, T> {
    result.map_err(|err| err.map(|e| e.expecting(what)))
}

/// Fail at `input` expecting `what`
pub fn fail<'a, T>(input: &'a str, what: &'static str) -> PResult<'a, T> {
    Err(nom::Err::Error(
        SyntaxError::new(input, ErrorKind::Tag).expecting(what),
    ))
}

/// A reserved word that is not the prefix of a longer identifier
pub fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        terminated(tag(kw), not(satisfy(is_ident_char))).parse(input)
    }
}

pub fn symbol<'a>(sym: &'static str) -> impl Fn(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        tag(sym)(input)
    }
}

/// Identifier that is not a reserved word; `_` is accepted
pub fn identifier(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    let word: PResult<&str> =
        recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))).parse(input);
    let (rest, word) = word?;
    if is_keyword(word) {
        return Err(nom::Err::Error(SyntaxError::new(input, ErrorKind::Tag)));
    }
    Ok((rest, word.to_string()))
}

/// Leading word of the input after whitespace, used to dispatch on keywords
pub fn peek_word(input: &str) -> Option<&str> {
    let trimmed = ws(input).map(|(rest, _)| rest).unwrap_or(input);
    let end = trimmed
        .find(|c: char| !is_ident_char(c))
        .unwrap_or(trimmed.len());
    if end == 0 {
        None
    } else {
        Some(&trimmed[..end])
    }
}

// =============================================================================
// File level
// =============================================================================

/// Parse a complete file
pub fn source_file(full: &str) -> PResult<SourceFile> {
    let mut input = full;
    let mut module = None;
    let mut imports = Vec::new();
    let mut items = Vec::new();

    loop {
        let (rest, _) = ws(input)?;
        if rest.is_empty() {
            input = rest;
            break;
        }
        input = match peek_word(rest) {
            Some("module") => {
                let (rest, decl) = module_decl(full, rest)?;
                module = Some(decl);
                rest
            }
            Some("import") => {
                let (rest, import) = import_decl(full, rest)?;
                imports.push(import);
                rest
            }
            Some("type") => {
                let (rest, decl) = type_decl(full, rest)?;
                items.push(Item::Type(decl));
                rest
            }
            Some("fn") => {
                let (rest, decl) = function_decl(full, rest)?;
                items.push(Item::Function(decl));
                rest
            }
            Some("var") => {
                let (rest, decl) = global_decl(full, rest)?;
                items.push(Item::Global(decl));
                rest
            }
            _ => return fail(rest, "a declaration"),
        };
    }

    Ok((
        input,
        SourceFile {
            module,
            imports,
            items,
            span: Span::new(0, full.len()),
        },
    ))
}

/// `module "path";`
fn module_decl<'a>(full: &'a str, input: &'a str) -> PResult<'a, ModuleDecl> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = keyword("module")(input)?;
    let (input, path) = expect(string_literal(input), "a module path")?;
    let (input, _) = expect(symbol(";")(input), "';'")?;
    Ok((
        input,
        ModuleDecl {
            path,
            span: make_span(full, start, input),
        },
    ))
}

/// `import "path";` or `import "path" as alias;`
fn import_decl<'a>(full: &'a str, input: &'a str) -> PResult<'a, Import> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = keyword("import")(input)?;
    let (input, path) = expect(string_literal(input), "an import path")?;
    let (input, alias) = match keyword("as")(input) {
        Ok((rest, _)) => {
            let (rest, alias) = identifier(rest)?;
            (rest, Some(alias))
        }
        Err(_) => (input, None),
    };
    let (input, _) = expect(symbol(";")(input), "';'")?;
    Ok((
        input,
        Import {
            path,
            alias,
            span: make_span(full, start, input),
        },
    ))
}

/// `type Name = Other;` or `type Name { fn m(..) -> R; }`
fn type_decl<'a>(full: &'a str, input: &'a str) -> PResult<'a, TypeDecl> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = keyword("type")(input)?;
    let (input, name) = expect(identifier(input), "a type name")?;

    if let Ok((input, _)) = symbol("=")(input) {
        let (input, target) = type_expr(full, input)?;
        let (input, _) = expect(symbol(";")(input), "';'")?;
        return Ok((
            input,
            TypeDecl {
                name,
                kind: TypeDeclKind::Alias(target),
                span: make_span(full, start, input),
            },
        ));
    }

    let (mut input, _) = expect(symbol("{")(input), "'=' or '{'")?;
    let mut methods = Vec::new();
    loop {
        if let Ok((rest, _)) = symbol("}")(input) {
            input = rest;
            break;
        }
        let (rest, method) = method_decl(full, input)?;
        methods.push(method);
        input = rest;
    }
    Ok((
        input,
        TypeDecl {
            name,
            kind: TypeDeclKind::Methods(methods),
            span: make_span(full, start, input),
        },
    ))
}

fn method_decl<'a>(full: &'a str, input: &'a str) -> PResult<'a, MethodDecl> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = expect(keyword("fn")(input), "a method signature or '}'")?;
    let (input, name) = expect(identifier(input), "a method name")?;
    let (input, params) = params(full, input)?;
    let (input, returns) = return_types(full, input)?;
    let (input, _) = expect(symbol(";")(input), "';'")?;
    Ok((
        input,
        MethodDecl {
            name,
            params,
            returns,
            span: make_span(full, start, input),
        },
    ))
}

/// `fn name(params) -> R { .. }` or a bodiless `fn name(params) -> R;`
fn function_decl<'a>(full: &'a str, input: &'a str) -> PResult<'a, FunctionDecl> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = keyword("fn")(input)?;
    let (input, name) = expect(identifier(input), "a function name")?;
    let (input, params) = params(full, input)?;
    let (input, returns) = return_types(full, input)?;
    let (input, body) = match symbol(";")(input) {
        Ok((rest, _)) => (rest, None),
        Err(_) => {
            let (rest, body) = expect(block(full, input), "a function body or ';'")?;
            (rest, Some(body))
        }
    };
    Ok((
        input,
        FunctionDecl {
            name,
            params,
            returns,
            body,
            span: make_span(full, start, input),
        },
    ))
}

/// `var name: T = value;` at file level
fn global_decl<'a>(full: &'a str, input: &'a str) -> PResult<'a, GlobalDecl> {
    let (input, _) = ws(input)?;
    let start = position(full, input);
    let (input, _) = keyword("var")(input)?;
    let (input, name) = expect(identifier(input), "a variable name")?;
    let (input, ty) = match symbol(":")(input) {
        Ok((rest, _)) => {
            let (rest, ty) = type_expr(full, rest)?;
            (rest, Some(ty))
        }
        Err(_) => (input, None),
    };
    let (input, value) = match symbol("=")(input) {
        Ok((rest, _)) => {
            let (rest, value) = expression(full, rest)?;
            (rest, Some(value))
        }
        Err(_) => (input, None),
    };
    let (input, _) = expect(symbol(";")(input), "';'")?;
    Ok((
        input,
        GlobalDecl {
            name,
            ty,
            value,
            span: make_span(full, start, input),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_skips_comments() {
        let (rest, _) = ws("  // line\n /* block */ fn").unwrap();
        assert_eq!(rest, "fn");
    }

    #[test]
    fn test_keyword_requires_word_boundary() {
        assert!(keyword("fn")("fn main").is_ok());
        assert!(keyword("fn")("fnord").is_err());
    }

    #[test]
    fn test_identifier_rejects_keywords() {
        assert_eq!(identifier("  span1 =").unwrap().1, "span1");
        assert_eq!(identifier("_").unwrap().1, "_");
        assert!(identifier("defer").is_err());
        assert!(identifier("1abc").is_err());
    }

    #[test]
    fn test_peek_word() {
        assert_eq!(peek_word("  let x"), Some("let"));
        assert_eq!(peek_word("{ }"), None);
    }
}

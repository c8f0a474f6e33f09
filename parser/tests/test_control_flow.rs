//! Control-flow statements of the reference language

use parser::ast::{ExprKind, Item, Pattern, StmtKind};
use parser::parse_file;

fn body(source: &str) -> Vec<StmtKind> {
    let file = parse_file(source).unwrap_or_else(|e| panic!("should parse: {:?}", e));
    let function = file
        .items
        .into_iter()
        .find_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
        .expect("a function");
    function
        .body
        .expect("a body")
        .statements
        .into_iter()
        .map(|stmt| stmt.kind)
        .collect()
}

#[test]
fn test_every_statement_kind() {
    let statements = body(
        r#"
        fn f(n: int, items: []int, c: bool) -> int {
            var total: int;
            let a, _ = g();
            total = a;
            if c && n > 1 { return 1; } else if !c { panic(); } else { }
            while c { break; }
            loop { continue; }
            for item in items { defer h(item); }
            switch n {
                case 1, 2 { }
                default { panic("other"); }
            }
            { goto done; }
            return total;
        }
        "#,
    );
    let names: Vec<&str> = statements
        .iter()
        .map(|kind| match kind {
            StmtKind::Let { .. } => "let",
            StmtKind::Var { .. } => "var",
            StmtKind::Assign { .. } => "assign",
            StmtKind::Expr(_) => "expr",
            StmtKind::If { .. } => "if",
            StmtKind::While { .. } => "while",
            StmtKind::Loop { .. } => "loop",
            StmtKind::For { .. } => "for",
            StmtKind::Switch { .. } => "switch",
            StmtKind::Return(_) => "return",
            StmtKind::Defer(_) => "defer",
            StmtKind::Panic(_) => "panic",
            StmtKind::Break => "break",
            StmtKind::Continue => "continue",
            StmtKind::Goto(_) => "goto",
            StmtKind::Block(_) => "block",
        })
        .collect();
    assert_eq!(
        names,
        vec!["var", "let", "assign", "if", "while", "loop", "for", "switch", "block", "return"]
    );

    match &statements[1] {
        StmtKind::Let { patterns, .. } => {
            assert_eq!(patterns[0].0, Pattern::Ident("a".to_string()));
            assert_eq!(patterns[1].0, Pattern::Wildcard);
        }
        other => panic!("expected let, got {:?}", other),
    }
    match &statements[7] {
        StmtKind::Switch { cases, default, .. } => {
            assert_eq!(cases.len(), 1);
            assert_eq!(cases[0].values.len(), 2);
            assert!(default.is_some());
        }
        other => panic!("expected switch, got {:?}", other),
    }
}

#[test]
fn test_deferred_function_literal() {
    let statements = body(
        r#"
        fn f() {
            defer fn() { cleanup(); }();
        }
        "#,
    );
    let StmtKind::Defer(call) = &statements[0] else {
        panic!("expected defer, got {:?}", statements[0]);
    };
    let ExprKind::Call { callee, args } = &call.kind else {
        panic!("expected call, got {:?}", call.kind);
    };
    assert!(args.is_empty());
    assert!(matches!(callee.kind, ExprKind::FunctionLiteral { .. }));
}

#[test]
fn test_missing_semicolon_is_reported() {
    let failure = parse_file("fn f() {\n    break\n}\n").unwrap_err();
    assert_eq!(failure.expected, "';'");
}

/// End-to-end checks driven by in-memory sources: configuration, front-end
/// failures and rendering.
use checker::report::{to_diagnostics, to_json};
use checker::tast::TypedProgram;
use checker::{
    AnalysisEngine, CommentSuppressions, CompilationUnit, ConfigurationError, Finding, FindingKind, LeakGuardConfig,
    Reporter,
};

const LOCKS: &str = r#"
module "sync";

type Guard { fn unlock(); }
type Mutex { fn lock() -> Guard; }
type Locker = Mutex;

fn early(m: Mutex, c: bool) {
    let g = m.lock();
    if c { return; }
    defer g.unlock();
}

fn aliased(m: Locker) {
    let g = m.lock();
}

fn balanced(m: Mutex) {
    let g = m.lock();
    defer g.unlock();
}
"#;

const LOCK_CONFIG: &str = r#"
[checker]
name = "lockcheck"

[capability]
acquire = "Mutex.lock"
handle-type = "Guard"
release = "unlock"
"#;

struct Checked {
    program: TypedProgram,
    findings: Vec<Finding>,
    frontend_failed: bool,
}

fn check(sources: &[(&str, &str)], config: &LeakGuardConfig) -> Result<Checked, ConfigurationError> {
    let mut unit = CompilationUnit::new();
    for (name, source) in sources {
        // A file that does not parse is reported and left out
        let _ = unit.add_source(name, source);
    }
    let output = unit.lower();
    let frontend_failed = output.has_errors();
    let program = output.program;

    let findings = {
        let engine = AnalysisEngine::new(config.capability.clone(), &program, config.analysis.clone())?;
        let results = engine.run();
        let suppressions = CommentSuppressions::from_source_map(&program.source_map);
        Reporter::new(config.checker_name.as_str(), &suppressions).finalize(results.findings)
    };
    Ok(Checked {
        program,
        findings,
        frontend_failed,
    })
}

fn kinds_and_functions(findings: &[Finding]) -> Vec<(FindingKind, &str)> {
    findings.iter().map(|f| (f.kind, f.function.as_str())).collect()
}

#[test]
fn configured_capability_replaces_tracing_defaults() {
    let config = LeakGuardConfig::parse(LOCK_CONFIG).expect("valid config");
    let checked = check(&[("locks.lg", LOCKS)], &config).expect("capability resolves");
    assert!(!checked.frontend_failed);
    assert_eq!(
        kinds_and_functions(&checked.findings),
        vec![
            (FindingKind::MissingRelease, "early"),
            (FindingKind::MissingRelease, "aliased"),
        ]
    );
    assert_eq!(checked.findings[0].line(), 9);
    assert!(checked.findings[0].message.contains("`g.unlock()`"));
}

#[test]
fn suppression_uses_configured_checker_name() {
    let source = LOCKS.replace("fn aliased(m: Locker) {\n    let g = m.lock();", "fn aliased(m: Locker) {\n    let g = m.lock(); //nolint:lockcheck");
    let config = LeakGuardConfig::parse(LOCK_CONFIG).expect("valid config");
    let checked = check(&[("locks.lg", source.as_str())], &config).expect("capability resolves");
    assert_eq!(
        kinds_and_functions(&checked.findings),
        vec![(FindingKind::MissingRelease, "early")]
    );

    // The default name does not match the directive
    let renamed = LOCK_CONFIG.replace("lockcheck", "leakguard");
    let config = LeakGuardConfig::parse(&renamed).expect("valid config");
    let checked = check(&[("locks.lg", source.as_str())], &config).expect("capability resolves");
    assert_eq!(checked.findings.len(), 2);
}

#[test]
fn bare_name_acquire_pattern() {
    let config = LeakGuardConfig::parse(
        r#"
        [capability]
        acquire = "open"
        handle-type = "File"
        release = "close"
        "#,
    )
    .expect("valid config");
    let checked = check(
        &[(
            "files.lg",
            r#"
            type File { fn close(); fn read() -> string; }
            fn open(path: string) -> File;

            fn read_all(path: string) -> string {
                let f = open(path);
                defer f.close();
                return f.read();
            }

            fn forgot(path: string) -> string {
                let f = open(path);
                return f.read();
            }
            "#,
        )],
        &config,
    )
    .expect("capability resolves");
    assert_eq!(
        kinds_and_functions(&checked.findings),
        vec![(FindingKind::MissingRelease, "forgot")]
    );
}

#[test]
fn unparsable_file_is_skipped_and_others_are_checked() {
    let config = LeakGuardConfig::parse(LOCK_CONFIG).expect("valid config");
    let checked = check(
        &[("broken.lg", "fn broken( {\n"), ("locks.lg", LOCKS)],
        &config,
    )
    .expect("capability resolves");
    assert!(checked.frontend_failed);
    assert_eq!(checked.findings.len(), 2);
    assert_eq!(checked.program.files.len(), 1);
}

#[test]
fn undeclared_handle_type_is_a_configuration_error() {
    let config = LeakGuardConfig::default();
    let error = match check(&[("locks.lg", LOCKS)], &config) {
        Ok(_) => panic!("the tracing handle is not declared here"),
        Err(error) => error,
    };
    assert!(matches!(error, ConfigurationError::UndeclaredHandleType { .. }));
    assert_eq!(error.code(), 5001);
}

#[test]
fn rendering_as_text_and_json() {
    let config = LeakGuardConfig::parse(LOCK_CONFIG).expect("valid config");
    let checked = check(&[("locks.lg", LOCKS)], &config).expect("capability resolves");

    let diagnostics = to_diagnostics(&checked.findings);
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.has_errors());
    let text = diagnostics::ErrorFormatter::new().format_diagnostics(&diagnostics, &checked.program.source_map);
    assert!(text.contains("E3001"));
    assert!(text.contains("locks.lg"));

    let json = to_json(&checked.findings, &checked.program.source_map).expect("serializes");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    let entries = value.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["file"], "locks.lg");
    assert_eq!(entries[0]["kind"], "missing-release");
    assert_eq!(entries[0]["function"], "early");
    assert_eq!(entries[0]["line"], 9);
}

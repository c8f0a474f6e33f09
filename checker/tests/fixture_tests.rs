/// Runs the whole checker over the programs under `tests/fixtures` and
/// compares the findings with the `// want: <kind>` annotations on each line.
///
/// All fixtures are checked as one program so they share the tracing module
/// in `fixtures/otel/trace.lg`.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use checker::{
    AnalysisEngine, AnalysisOptions, CommentSuppressions, CompilationUnit, Finding, LeakGuardConfig, Reporter,
};
use walkdir::WalkDir;

type Expectation = (String, usize, String);

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn fixture_files() -> Vec<PathBuf> {
    WalkDir::new(fixture_dir())
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("lg"))
        .map(|entry| entry.into_path())
        .collect()
}

/// `(file, line, kind)` for every `// want: a, b` annotation
fn expectations(unit: &CompilationUnit) -> BTreeSet<Expectation> {
    let mut expected = BTreeSet::new();
    for (_, file) in unit.source_map().files() {
        for (index, line) in file.content.lines().enumerate() {
            let Some((_, kinds)) = line.split_once("// want:") else {
                continue;
            };
            for kind in kinds.split(',').map(str::trim).filter(|k| !k.is_empty()) {
                expected.insert((file.name.clone(), index + 1, kind.to_string()));
            }
        }
    }
    expected
}

fn run_fixtures(options: AnalysisOptions) -> (BTreeSet<Expectation>, BTreeSet<Expectation>, Vec<Finding>) {
    let files = fixture_files();
    assert!(files.len() >= 5, "fixtures not found under {}", fixture_dir().display());

    let mut unit = CompilationUnit::new();
    for file in &files {
        unit.add_file_from_path(file)
            .unwrap_or_else(|e| panic!("fixture should load: {}", e));
    }
    let expected = expectations(&unit);
    let output = unit.lower();
    assert!(!output.has_errors(), "{:?}", output.diagnostics);
    let program = output.program;

    let config = LeakGuardConfig::default();
    let engine = AnalysisEngine::new(config.capability.clone(), &program, options).expect("capability resolves");
    let results = engine.run();
    let suppressions = CommentSuppressions::from_source_map(&program.source_map);
    let findings = Reporter::new(config.checker_name.as_str(), &suppressions).finalize(results.findings);

    let actual = findings
        .iter()
        .map(|finding| {
            (
                program.source_map.file_name(finding.file()).to_string(),
                finding.line(),
                finding.kind.as_str().to_string(),
            )
        })
        .collect();
    (expected, actual, findings)
}

#[test]
fn fixtures_match_annotations() {
    let (expected, actual, _) = run_fixtures(AnalysisOptions::default());
    let missing: Vec<_> = expected.difference(&actual).collect();
    let unexpected: Vec<_> = actual.difference(&expected).collect();
    assert!(
        missing.is_empty() && unexpected.is_empty(),
        "missing findings: {:#?}\nunexpected findings: {:#?}",
        missing,
        unexpected
    );
}

#[test]
fn findings_are_ordered_and_unique() {
    let (_, actual, findings) = run_fixtures(AnalysisOptions::default());
    assert_eq!(actual.len(), findings.len());
    let keys: Vec<_> = findings
        .iter()
        .map(|f| (f.file(), f.line(), f.column(), f.kind))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn file_skipping_and_worker_count_do_not_change_results() {
    let (_, baseline, _) = run_fixtures(AnalysisOptions::default());
    let (_, thorough, _) = run_fixtures(AnalysisOptions {
        jobs: 2,
        skip_unrelated_files: false,
    });
    assert_eq!(baseline, thorough);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::capability::{CapabilityDescriptor, ConfigurationError};
    use crate::report::{FindingKind, Reporter};
    use crate::semantic_graph::analysis::analysis_engine::{AnalysisEngine, AnalysisOptions};
    use crate::semantic_graph::test_support::{program, program_with_files};
    use crate::suppression::NoSuppressions;

    const LEAKY: &str = r#"
        import "otel/trace";
        fn leak(ctx: trace.Context) {
            let c, span = trace.tracer().start(ctx, "leak");
        }
        fn fine(ctx: trace.Context) {
            let c, span = trace.tracer().start(ctx, "fine");
            defer span.end();
        }
        fn jump(c: bool) {
            if c { goto done; }
        }
        "#;

    const UNRELATED: &str = r#"
        fn add(a: int, b: int) -> int { return a + b; }
        fn sub(a: int, b: int) -> int { return a - b; }
        "#;

    #[test]
    fn test_engine_reports_leaks_and_notices() {
        let program = program(LEAKY);
        let engine = AnalysisEngine::new(CapabilityDescriptor::tracing(), &program, AnalysisOptions::default())
            .expect("capability resolves");
        let results = engine.run();

        let mut kinds: Vec<(FindingKind, String)> = results
            .findings
            .iter()
            .map(|f| (f.kind, f.function.clone()))
            .collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                (FindingKind::MissingRelease, "leak".to_string()),
                (FindingKind::UnsupportedConstruct, "jump".to_string()),
            ]
        );
        assert_eq!(results.metrics.functions_analyzed, 2);
        assert_eq!(results.metrics.functions_failed, 1);
        assert!(!results.metrics.cancelled);

        let notice = results
            .findings
            .iter()
            .find(|f| f.kind == FindingKind::UnsupportedConstruct)
            .expect("goto notice");
        assert!(notice.message.contains("goto done"));
        assert_eq!(notice.line(), 11);
    }

    #[test]
    fn test_unrelated_files_are_skipped() {
        let program = program_with_files(&[("leaky.lg", LEAKY), ("math.lg", UNRELATED)]);

        let skipping = AnalysisEngine::new(CapabilityDescriptor::tracing(), &program, AnalysisOptions::default())
            .expect("capability resolves");
        let skipped = skipping.run();
        assert_eq!(skipped.metrics.files_skipped, 1);
        assert_eq!(skipped.metrics.functions_analyzed, 2);

        let options = AnalysisOptions {
            skip_unrelated_files: false,
            ..AnalysisOptions::default()
        };
        let thorough = AnalysisEngine::new(CapabilityDescriptor::tracing(), &program, options)
            .expect("capability resolves");
        let all = thorough.run();
        assert_eq!(all.metrics.files_skipped, 0);
        assert_eq!(all.metrics.functions_analyzed, 4);
        // Skipping never changes the findings
        assert_eq!(all.findings.len(), skipped.findings.len());
    }

    #[test]
    fn test_job_count_does_not_change_findings() {
        let program = program_with_files(&[("a.lg", LEAKY), ("b.lg", LEAKY), ("c.lg", UNRELATED)]);
        let reporter = Reporter::new("leakguard", &NoSuppressions);

        let run = |jobs: usize| {
            let options = AnalysisOptions {
                jobs,
                ..AnalysisOptions::default()
            };
            let engine = AnalysisEngine::new(CapabilityDescriptor::tracing(), &program, options)
                .expect("capability resolves");
            reporter.finalize(engine.run().findings)
        };

        let sequential = run(1);
        assert_eq!(sequential.len(), 4);
        assert_eq!(run(4), sequential);
        assert_eq!(run(0), sequential);
    }

    #[test]
    fn test_cancellation_stops_before_the_next_function() {
        let program = program(LEAKY);
        let engine = AnalysisEngine::new(CapabilityDescriptor::tracing(), &program, AnalysisOptions::default())
            .expect("capability resolves");
        engine.cancellation_flag().store(true, Ordering::Relaxed);

        let results = engine.run();
        assert!(results.metrics.cancelled);
        assert!(results.findings.is_empty());
        assert_eq!(results.metrics.functions_analyzed, 0);
    }

    #[test]
    fn test_invalid_capability_is_a_configuration_error() {
        let program = program(LEAKY);

        let undeclared = CapabilityDescriptor::new("Tracer.start", "Lock", "end").expect("valid descriptor");
        assert!(matches!(
            AnalysisEngine::new(undeclared, &program, AnalysisOptions::default()),
            Err(ConfigurationError::UndeclaredHandleType { .. })
        ));

        let no_release = CapabilityDescriptor::new("Tracer.start", "Context", "end").expect("valid descriptor");
        assert!(matches!(
            AnalysisEngine::new(no_release, &program, AnalysisOptions::default()),
            Err(ConfigurationError::MissingReleaseMethod { .. })
        ));
    }

    #[test]
    fn test_engine_exposes_preliminary_pass() {
        let program = program(
            r#"
            import "otel/trace";
            fn open(ctx: trace.Context) -> trace.Span {
                let c, span = trace.tracer().start(ctx, "open");
                return span;
            }
            "#,
        );
        let engine = AnalysisEngine::new(CapabilityDescriptor::tracing(), &program, AnalysisOptions::default())
            .expect("capability resolves");
        assert_eq!(engine.capability().release_method(), "end");
        assert_eq!(engine.capability().handle_module(), Some("otel/trace"));
        assert_eq!(engine.classifier().handle_returning().len(), 1);
        assert!(engine.run().findings.is_empty());
    }
}

//! Tests for the escape classifier

#[cfg(test)]
mod tests {
    use crate::semantic_graph::analysis::escape_analyzer::{EscapeClassifier, UseSite};
    use crate::semantic_graph::test_support::{capability, function, program};
    use crate::tast::TypedProgram;

    fn classify(source: &str) -> (TypedProgram, EscapeClassifier) {
        let program = program(source);
        let capability = capability(&program);
        let classifier = EscapeClassifier::build(&program, &capability);
        (program, classifier)
    }

    /// Use sites recorded for `symbol` inside `function`
    fn uses_of(program: &TypedProgram, classifier: &EscapeClassifier, function_name: &str, symbol: &str) -> Vec<UseSite> {
        let flow = classifier
            .flow(function(program, function_name).id)
            .expect("function should have a flow");
        flow.uses
            .iter()
            .filter(|(id, _)| program.symbols.name(**id) == symbol)
            .flat_map(|(_, sites)| sites.iter().copied())
            .collect()
    }

    #[test]
    fn test_sink_parameters() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn finish(s: trace.Span) { s.end(); }
            fn forward(s: trace.Span) { finish(s); }
            fn inspect(s: trace.Span) { s.set_name("x"); }
            "#,
        );
        assert!(classifier.param_escapes(function(&program, "finish").id, 0));
        assert!(classifier.param_escapes(function(&program, "forward").id, 0));
        assert!(!classifier.param_escapes(function(&program, "inspect").id, 0));
        // Out-of-range index of a non-variadic function
        assert!(!classifier.param_escapes(function(&program, "finish").id, 3));
        assert_eq!(classifier.stats().sink_parameters, 2);
    }

    #[test]
    fn test_mutually_recursive_forwarders_terminate() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn ping(s: trace.Span, c: bool) { if c { pong(s, c); } }
            fn pong(s: trace.Span, c: bool) { ping(s, c); }
            "#,
        );
        assert!(!classifier.param_escapes(function(&program, "ping").id, 0));
        assert!(!classifier.param_escapes(function(&program, "pong").id, 0));

        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn ping(s: trace.Span, c: bool) { if c { pong(s, c); } else { s.end(); } }
            fn pong(s: trace.Span, c: bool) { ping(s, c); s.end(); }
            "#,
        );
        assert!(classifier.param_escapes(function(&program, "ping").id, 0));
        assert!(classifier.param_escapes(function(&program, "pong").id, 0));
    }

    #[test]
    fn test_sink_must_cover_every_path() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn maybe(s: trace.Span, b: bool) { if b { s.end(); } }
            fn either(s: trace.Span, b: bool) { if b { s.end(); return; } panic("no"); }
            fn deferred(s: trace.Span, b: bool) { defer s.end(); if b { return; } }
            fn reassigned(s: trace.Span, other: trace.Span) { s = other; s.end(); }
            "#,
        );
        assert!(!classifier.param_escapes(function(&program, "maybe").id, 0));
        // The unwind exit is an exit too
        assert!(!classifier.param_escapes(function(&program, "either").id, 0));
        assert!(classifier.param_escapes(function(&program, "deferred").id, 0));
        // The original argument is dropped before anything releases it
        assert!(!classifier.param_escapes(function(&program, "reassigned").id, 0));
        assert!(!classifier.param_escapes(function(&program, "reassigned").id, 1));
    }

    #[test]
    fn test_release_inside_uncalled_literal_is_not_a_sink() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn stash(s: trace.Span) { let g = fn() { s.end(); }; }
            fn run(s: trace.Span) { fn() { s.end(); }(); }
            "#,
        );
        assert!(!classifier.param_escapes(function(&program, "stash").id, 0));
        assert!(classifier.param_escapes(function(&program, "run").id, 0));
    }

    #[test]
    fn test_outward_stores() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            type Holder { }
            var current: trace.Span;
            fn keep(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "keep");
                current = span;
            }
            fn stash(ctx: trace.Context, holder: Holder) {
                let c, span = trace.tracer().start(ctx, "stash");
                holder.span = span;
            }
            "#,
        );
        assert_eq!(uses_of(&program, &classifier, "keep", "span"), vec![UseSite::OutwardStore]);
        assert_eq!(uses_of(&program, &classifier, "stash", "span"), vec![UseSite::OutwardStore]);
        assert!(classifier.is_escaping(&UseSite::OutwardStore));
        assert!(classifier.is_escaping(&UseSite::Return));
    }

    #[test]
    fn test_container_store_escapes_only_with_its_container() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            type Holder { }
            var saved: Holder;
            fn keep(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "keep");
                let h = new Holder { span: span };
                saved = h;
            }
            fn drop_it(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "drop");
                let h = new Holder { span: span };
            }
            fn field(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "field");
                let h = new Holder { };
                h.span = span;
            }
            "#,
        );
        let kept = uses_of(&program, &classifier, "keep", "span");
        assert_eq!(kept.len(), 1);
        assert!(matches!(kept[0], UseSite::ContainerStore { .. }));
        assert!(classifier.is_escaping(&kept[0]));

        let dropped = uses_of(&program, &classifier, "drop_it", "span");
        assert_eq!(dropped.len(), 1);
        assert!(!classifier.is_escaping(&dropped[0]));

        let field = uses_of(&program, &classifier, "field", "span");
        assert!(matches!(field.as_slice(), [UseSite::ContainerStore { .. }]));
        assert!(!classifier.is_escaping(&field[0]));
    }

    #[test]
    fn test_unknown_calls_do_not_escape() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn record(s: trace.Span);
            fn work(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "work");
                record(span);
                span.set_name("renamed");
            }
            "#,
        );
        let record = function(&program, "record").id;
        let uses = uses_of(&program, &classifier, "work", "span");
        // The method call produces no use site at all
        assert_eq!(uses, vec![UseSite::Argument { callee: record, index: 0 }]);
        assert!(!classifier.is_escaping(&uses[0]));
    }

    #[test]
    fn test_handle_returning_functions() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn open(ctx: trace.Context) -> trace.Span {
                let c, span = trace.tracer().start(ctx, "open");
                return span;
            }
            fn pair(ctx: trace.Context) -> (trace.Context, trace.Span);
            fn name() -> string { return "x"; }
            "#,
        );
        let open = function(&program, "open").id;
        let pair = function(&program, "pair").id;
        assert!(classifier.is_handle_returning(open));
        assert!(classifier.is_handle_returning(pair));
        assert!(!classifier.is_handle_returning(function(&program, "name").id));
        assert!(!classifier.is_handle_returning(function(&program, "tracer").id));
        assert_eq!(classifier.handle_returning().len(), 2);
        assert_eq!(uses_of(&program, &classifier, "open", "span"), vec![UseSite::Return]);
    }

    #[test]
    fn test_literal_releases_count_for_the_enclosing_function() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn work(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "work");
                defer fn() { span.end(); }();
            }
            "#,
        );
        let literal = classifier
            .released_in(function(&program, "work.func1").id)
            .expect("literal flow");
        let outer = classifier
            .released_in(function(&program, "work").id)
            .expect("outer flow");
        assert_eq!(literal.len(), 1);
        assert_eq!(literal, outer);
    }

    #[test]
    fn test_uncalled_nested_literal_releases_nothing_for_its_caller() {
        let (program, classifier) = classify(
            r#"
            import "otel/trace";
            fn work(ctx: trace.Context) {
                let c, span = trace.tracer().start(ctx, "work");
                fn() { let g = fn() { span.end(); }; }();
                fn() { fn() { span.end(); }(); }();
            }
            "#,
        );
        let released = |name: &str| {
            classifier
                .released_in(function(&program, name).id)
                .map_or(0, |symbols| symbols.len())
        };
        assert_eq!(released("work.func1"), 0);
        assert_eq!(released("work.func1.func1"), 1);
        assert_eq!(released("work.func2"), 1);
        assert_eq!(released("work.func2.func1"), 1);
        // Only the chain of direct invocations reaches `work`
        assert_eq!(released("work"), 1);
        let own = classifier.flow(function(&program, "work").id).expect("outer flow");
        assert!(own.released.is_empty());
    }
}

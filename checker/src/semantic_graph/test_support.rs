//! Helpers shared by the semantic graph tests: lower small programs written
//! against a tracing prelude

use source_map::SourceMap;

use crate::capability::{CapabilityDescriptor, ResolvedCapability};
use crate::tast::{lower_program, TypedFunction, TypedProgram};

/// Declares the handle type `Span`, an acquirer and a few sinks
pub const TRACE_PRELUDE: &str = r#"
module "otel/trace";

type Context { }
type Span {
    fn end();
    fn set_name(name: string);
}
type Tracer {
    fn start(ctx: Context, name: string) -> (Context, Span);
}

fn tracer() -> Tracer;
fn background() -> Context;
"#;

/// Lower `source` (importing the prelude as `trace`) together with the prelude
pub fn program(source: &str) -> TypedProgram {
    program_with_files(&[("test.lg", source)])
}

/// Lower the prelude followed by every named file
pub fn program_with_files(sources: &[(&str, &str)]) -> TypedProgram {
    let mut source_map = SourceMap::new();
    let mut files = Vec::new();
    let prelude_id = source_map.add_file("trace.lg", TRACE_PRELUDE);
    files.push((prelude_id, parser::parse_file(TRACE_PRELUDE).expect("prelude should parse")));
    for &(name, source) in sources {
        let file_id = source_map.add_file(name, source);
        let file = parser::parse_file(source)
            .unwrap_or_else(|e| panic!("{} should parse: {:?}", name, e));
        files.push((file_id, file));
    }
    let output = lower_program(source_map, &files);
    assert!(
        !output.diagnostics.has_errors(),
        "lowering failed: {:?}",
        output.diagnostics
    );
    output.program
}

pub fn capability(program: &TypedProgram) -> ResolvedCapability {
    ResolvedCapability::resolve(CapabilityDescriptor::tracing(), &program.types)
        .expect("tracing capability should resolve")
}

pub fn function<'p>(program: &'p TypedProgram, name: &str) -> &'p TypedFunction {
    program
        .functions
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no function named {}", name))
}

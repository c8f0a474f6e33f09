pub mod ast_lowering;
pub mod id_types;
pub mod node;
pub mod symbols;
pub mod types;

pub use ast_lowering::{lower_program, LoweringOutput};
pub use id_types::*;
pub use node::*;
pub use symbols::*;
pub use types::*;

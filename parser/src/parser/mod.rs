pub use check_ast::*;
pub use duration::*;
pub use parse_error::*;
pub use parser::*;

mod check_ast;
mod duration;
mod parse_error;
#[allow(clippy::module_inception)]
mod parser;
pub mod tokens;

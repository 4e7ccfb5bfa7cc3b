pub use engine::*;
pub use preprocess::preprocess_expr;
pub use query::{Query, QueryResult, TestHandler};
pub use stats::*;

mod binary;
mod engine;
pub(crate) mod evaluator;
pub(crate) mod hints;
mod preprocess;
mod query;
mod stats;

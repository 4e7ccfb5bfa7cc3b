#[macro_use(defer)]
extern crate scopeguard;

pub mod active_queries;
mod common;
pub mod context;
pub mod execution;
mod functions;
pub mod provider;
pub mod query_logger;
pub mod runtime_error;
pub mod types;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::active_queries::ActiveQueryTracker;
    pub use crate::context::*;
    pub use crate::execution::*;
    pub use crate::provider::*;
    pub use crate::query_logger::*;
    pub use crate::runtime_error::*;
    pub use crate::types::*;
}

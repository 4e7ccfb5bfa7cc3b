pub use annotations::*;
pub use query_value::*;
pub use timeseries::*;

mod annotations;
mod query_value;
mod timeseries;

pub use promql_common::label::{Label, Labels};

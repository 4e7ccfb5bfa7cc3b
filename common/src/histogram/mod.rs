//! Native (sparse, exponential bucket) histograms and the arithmetic the engine
//! performs on them.
mod error;
mod float_histogram;
mod histogram;
mod span;

pub use error::*;
pub use float_histogram::*;
pub use histogram::*;
pub use span::*;

/// Smallest supported exponential schema.
pub const MIN_SCHEMA: i32 = -4;
/// Largest supported exponential schema.
pub const MAX_SCHEMA: i32 = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CounterResetHint {
    /// No information about counter resets.
    #[default]
    Unknown,
    /// The histogram is the first after a counter reset.
    CounterReset,
    /// Known not to follow a counter reset.
    NotCounterReset,
    /// The histogram is a gauge, counter resets do not apply.
    Gauge,
}

pub(crate) fn validate_schema(schema: i32) -> HistogramResult<()> {
    snafu::ensure!(
        (MIN_SCHEMA..=MAX_SCHEMA).contains(&schema),
        InvalidSchemaSnafu {
            schema,
            min: MIN_SCHEMA,
            max: MAX_SCHEMA
        }
    );
    Ok(())
}

/// Upper bound of the bucket with the given index. Bucket `i` covers
/// `(bound(i - 1), bound(i)]` where `bound(i) = 2^(i * 2^-schema)`.
pub fn bucket_upper_bound(index: i32, schema: i32) -> f64 {
    (index as f64 * 2f64.powi(-schema)).exp2()
}

pub fn bucket_lower_bound(index: i32, schema: i32) -> f64 {
    bucket_upper_bound(index - 1, schema)
}

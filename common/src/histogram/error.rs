use snafu::Snafu;

pub type HistogramResult<T> = Result<T, HistogramError>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum HistogramError {
    #[snafu(display("histogram schema {schema} is outside the supported range [{min}, {max}]"))]
    InvalidSchema { schema: i32, min: i32, max: i32 },
    #[snafu(display("histogram spans describe {expected} buckets but {actual} are present"))]
    BucketCountMismatch { expected: usize, actual: usize },
}

use std::fmt;
use std::fmt::Display;

use serde::Serialize;

use promql_parser::label::Matcher;

use crate::context::QueryContext;
use crate::runtime_error::{RuntimeResult, StorageError};
use crate::types::{Annotations, Series};

/// Pushdown descriptor passed with every select. Storage may use it to narrow
/// what it materializes; evaluation does not depend on it being honored.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectHints {
    /// Start of the time range in milliseconds.
    pub start: i64,
    /// End of the time range in milliseconds.
    pub end: i64,
    /// Evaluation step in milliseconds, 0 for instant evaluation.
    pub step: i64,
    /// Range of the matrix selector, 0 otherwise.
    pub range: i64,
    /// Name of the function or aggregation consuming the selector.
    pub func: String,
    /// `by` when true, `without` otherwise. Only meaningful with `grouping`.
    pub by: bool,
    pub grouping: Vec<String>,
}

impl Display for SelectHints {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "start={}, end={}, step={}, range={}",
            self.start, self.end, self.step, self.range
        )?;
        if !self.func.is_empty() {
            write!(f, ", func={}", self.func)?;
        }
        if !self.grouping.is_empty() {
            let modifier = if self.by { "by" } else { "without" };
            write!(f, ", {modifier}({})", self.grouping.join(","))?;
        }
        Ok(())
    }
}

/// Pull-based iterator over the series matched by a select.
pub trait SeriesSet: Iterator<Item = Series> {
    /// The error that ended the iteration early, if any.
    fn err(&self) -> Option<StorageError>;

    fn warnings(&self) -> Annotations {
        Annotations::default()
    }
}

/// Read access to a time range of the store.
pub trait Querier: Send {
    fn select(
        &self,
        ctx: &QueryContext,
        sort_series: bool,
        hints: &SelectHints,
        matchers: &[Matcher],
    ) -> Box<dyn SeriesSet>;

    fn label_values(&self, name: &str, matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)>;

    fn label_names(&self, matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)>;

    fn close(&self) -> RuntimeResult<()> {
        Ok(())
    }
}

/// A store that can hand out queriers for a time range.
pub trait Queryable: Send + Sync {
    fn querier(&self, mint: i64, maxt: i64) -> RuntimeResult<Box<dyn Querier>>;
}

/// Series set backed by already materialized series.
#[derive(Default, Debug)]
pub struct VecSeriesSet {
    series: std::vec::IntoIter<Series>,
    warnings: Annotations,
}

impl VecSeriesSet {
    pub fn new(series: Vec<Series>) -> Self {
        Self {
            series: series.into_iter(),
            warnings: Annotations::default(),
        }
    }

    pub fn with_warnings(series: Vec<Series>, warnings: Annotations) -> Self {
        Self {
            series: series.into_iter(),
            warnings,
        }
    }
}

impl Iterator for VecSeriesSet {
    type Item = Series;

    fn next(&mut self) -> Option<Self::Item> {
        self.series.next()
    }
}

impl SeriesSet for VecSeriesSet {
    fn err(&self) -> Option<StorageError> {
        None
    }

    fn warnings(&self) -> Annotations {
        self.warnings.clone()
    }
}

/// Series set that yields nothing and reports an error.
pub struct ErrorSeriesSet(StorageError);

impl ErrorSeriesSet {
    pub fn new(err: StorageError) -> Self {
        Self(err)
    }
}

impl Iterator for ErrorSeriesSet {
    type Item = Series;

    fn next(&mut self) -> Option<Self::Item> {
        None
    }
}

impl SeriesSet for ErrorSeriesSet {
    fn err(&self) -> Option<StorageError> {
        Some(self.0.clone())
    }
}

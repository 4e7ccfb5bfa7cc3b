use std::sync::Arc;

use promql_common::label::Labels;

use crate::context::QueryContext;
use crate::execution::{Engine, QueryOpts, QueryResult};
use crate::provider::{MemoryStorage, Queryable};
use crate::types::{FPoint, QueryValue, Series};

pub(crate) fn labels(pairs: &[(&str, &str)]) -> Labels {
    Labels::from_pairs(pairs)
}

/// `points` are `(seconds, value)` pairs.
pub(crate) fn series(metric: &[(&str, &str)], points: &[(i64, f64)]) -> Series {
    let floats = points.iter().map(|(t, f)| FPoint::new(t * 1000, *f)).collect();
    Series::with_floats(labels(metric), floats)
}

pub(crate) fn queryable(storage: &Arc<MemoryStorage>) -> Arc<dyn Queryable> {
    storage.clone()
}

/// Runs an instant query at `ts` milliseconds.
pub(crate) fn exec_instant(engine: &Engine, storage: &Arc<MemoryStorage>, opts: Option<QueryOpts>, q: &str, ts: i64) -> QueryResult {
    let query = engine
        .new_instant_query(queryable(storage), opts, q, ts)
        .unwrap_or_else(|e| panic!("cannot create query {q}: {e}"));
    query.exec(&QueryContext::background())
}

/// Runs a range query. Times are in milliseconds.
pub(crate) fn exec_range(engine: &Engine, storage: &Arc<MemoryStorage>, q: &str, start: i64, end: i64, interval: i64) -> QueryResult {
    let query = engine
        .new_range_query(queryable(storage), None, q, start, end, interval)
        .unwrap_or_else(|e| panic!("cannot create query {q}: {e}"));
    query.exec(&QueryContext::background())
}

pub(crate) fn value(res: QueryResult) -> QueryValue {
    match res.into_value() {
        Ok(Some(value)) => value,
        Ok(None) => panic!("query produced no value"),
        Err(e) => panic!("query failed: {e}"),
    }
}

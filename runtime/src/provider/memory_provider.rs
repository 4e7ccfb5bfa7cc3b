use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use promql_common::hash::Signature;
use promql_common::histogram::FloatHistogram;
use promql_common::label::Labels;
use promql_parser::label::{matches_labels, Matcher};

use crate::context::QueryContext;
use crate::provider::{Querier, Queryable, SelectHints, SeriesSet, VecSeriesSet};
use crate::runtime_error::RuntimeResult;
use crate::types::{Annotations, SampleValue, Series};

#[derive(Debug, Clone)]
struct Point {
    t: i64,
    value: SampleValue,
}

#[derive(Default, Debug, Clone)]
struct Storage {
    labels_hash: BTreeMap<Signature, Labels>,
    sample_values: BTreeMap<Signature, Vec<Point>>,
}

impl Storage {
    fn append(&mut self, labels: Labels, t: i64, value: SampleValue) {
        let h = labels.signature();
        match self.labels_hash.entry(h) {
            Entry::Vacant(e) => {
                e.insert(labels);
                self.sample_values.insert(h, vec![Point { t, value }]);
            }
            Entry::Occupied(_) => {
                let values = self.sample_values.entry(h).or_default();
                insert_point(values, Point { t, value });
            }
        }
    }

    fn select(&self, mint: i64, maxt: i64, matchers: &[Matcher]) -> Vec<Series> {
        let mut result = Vec::new();
        for (k, labels) in &self.labels_hash {
            if !matches_labels(matchers, labels) {
                continue;
            }
            if let Some(series) = self.get_range(*k, labels, mint, maxt) {
                result.push(series);
            }
        }
        result
    }

    fn get_range(&self, metric_id: Signature, labels: &Labels, start: i64, end: i64) -> Option<Series> {
        let values = self.sample_values.get(&metric_id)?;
        let first = find_first_index(values, start);
        let mut series = Series::new(labels.clone());
        for point in values[first..].iter().take_while(|p| p.t <= end) {
            series.push(point.t, point.value.clone());
        }
        if series.is_empty() {
            return None;
        }
        Some(series)
    }

    fn clear(&mut self) {
        self.labels_hash.clear();
        self.sample_values.clear();
    }
}

/// Keeps points ordered by timestamp; a point at an existing timestamp
/// replaces the old one.
fn insert_point(values: &mut Vec<Point>, point: Point) {
    match values.last().map(|p| p.t) {
        Some(last) if last >= point.t => match values.binary_search_by_key(&point.t, |p| p.t) {
            Ok(idx) => values[idx] = point,
            Err(idx) => values.insert(idx, point),
        },
        _ => values.push(point),
    }
}

/// Index of the first point with `t >= ts`.
fn find_first_index(values: &[Point], ts: i64) -> usize {
    values.partition_point(|p| p.t < ts)
}

/// In-memory store, primarily for testing.
#[derive(Default, Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Storage>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, labels: Labels, t: i64, v: f64) {
        let mut inner = self.inner.write().unwrap();
        inner.append(labels, t, SampleValue::Float(v))
    }

    pub fn append_histogram(&self, labels: Labels, t: i64, h: FloatHistogram) {
        let mut inner = self.inner.write().unwrap();
        inner.append(labels, t, SampleValue::Histogram(h))
    }

    pub fn append_sample(&self, labels: &Labels, t: i64, value: SampleValue) {
        let mut inner = self.inner.write().unwrap();
        inner.append(labels.clone(), t, value)
    }

    pub fn series_count(&self) -> usize {
        self.inner.read().unwrap().labels_hash.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.clear();
    }
}

impl Queryable for MemoryStorage {
    fn querier(&self, mint: i64, maxt: i64) -> RuntimeResult<Box<dyn Querier>> {
        Ok(Box::new(MemoryQuerier {
            storage: Arc::clone(&self.inner),
            mint,
            maxt,
        }))
    }
}

struct MemoryQuerier {
    storage: Arc<RwLock<Storage>>,
    mint: i64,
    maxt: i64,
}

impl MemoryQuerier {
    fn matching_labels(&self, matchers: &[Matcher]) -> Vec<Labels> {
        let storage = self.storage.read().unwrap();
        storage
            .select(self.mint, self.maxt, matchers)
            .into_iter()
            .map(|s| s.metric)
            .collect()
    }
}

impl Querier for MemoryQuerier {
    fn select(
        &self,
        _ctx: &QueryContext,
        _sort_series: bool,
        hints: &SelectHints,
        matchers: &[Matcher],
    ) -> Box<dyn SeriesSet> {
        let start = hints.start.max(self.mint);
        let end = hints.end.min(self.maxt);
        let mut series = {
            let storage = self.storage.read().unwrap();
            storage.select(start, end, matchers)
        };
        // the map is keyed by signature, which does not follow label order
        series.sort_by(|a, b| a.metric.cmp(&b.metric));
        Box::new(VecSeriesSet::new(series))
    }

    fn label_values(&self, name: &str, matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)> {
        let values: BTreeSet<String> = self
            .matching_labels(matchers)
            .iter()
            .filter_map(|l| l.get(name).map(String::from))
            .collect();
        Ok((values.into_iter().collect(), Annotations::default()))
    }

    fn label_names(&self, matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)> {
        let names: BTreeSet<String> = self
            .matching_labels(matchers)
            .iter()
            .flat_map(|l| l.iter().map(|label| label.name.clone()).collect::<Vec<_>>())
            .collect();
        Ok((names.into_iter().collect(), Annotations::default()))
    }
}

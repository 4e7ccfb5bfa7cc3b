use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Sample counts gathered while evaluating a query.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct QuerySamples {
    /// Samples read from storage, counted again each time a step reuses them.
    pub total_samples: i64,
    /// Samples read per evaluation step, as `(timestamp, count)` in step
    /// order. Only filled when per step stats are enabled.
    pub total_samples_per_step: Vec<(i64, i64)>,
    /// Largest number of samples held in memory at once.
    pub peak_samples: usize,
    #[serde(skip)]
    per_step_enabled: bool,
}

impl QuerySamples {
    pub fn new(enable_per_step_stats: bool) -> Self {
        Self {
            per_step_enabled: enable_per_step_stats,
            ..Default::default()
        }
    }

    pub fn per_step_enabled(&self) -> bool {
        self.per_step_enabled
    }

    pub(crate) fn record_step(&mut self, ts: i64, samples: i64) {
        if self.per_step_enabled {
            self.total_samples_per_step.push((ts, samples));
        }
    }

    /// Per step totals keyed by step timestamp. Empty unless per step stats
    /// are enabled.
    pub fn total_samples_per_step_map(&self) -> BTreeMap<i64, i64> {
        self.total_samples_per_step.iter().copied().collect()
    }
}

/// Wall clock time spent in the phases of a query.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryTimings {
    /// Time spent waiting for a slot in the concurrency gate.
    pub exec_queue_time: Duration,
    /// Time spent in `exec`, queueing included.
    pub exec_total_time: Duration,
    /// Time spent evaluating the statement, storage reads included.
    pub eval_total_time: Duration,
    /// Time spent selecting series from storage.
    pub query_preparation_time: Duration,
    /// Time spent in the evaluator proper.
    pub inner_eval_time: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    pub samples: QuerySamples,
    pub timings: QueryTimings,
}

impl QueryStats {
    pub fn new(enable_per_step_stats: bool) -> Self {
        Self {
            samples: QuerySamples::new(enable_per_step_stats),
            timings: QueryTimings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn per_step_totals_are_only_kept_when_enabled() {
        let mut disabled = QuerySamples::new(false);
        disabled.record_step(1000, 3);
        assert!(disabled.total_samples_per_step_map().is_empty());

        let mut enabled = QuerySamples::new(true);
        enabled.record_step(2000, 4);
        enabled.record_step(1000, 3);
        let map = enabled.total_samples_per_step_map();
        assert_eq!(map.into_iter().collect::<Vec<_>>(), vec![(1000, 3), (2000, 4)]);
    }

    #[test]
    fn stats_serialize_without_internal_flags() {
        let stats = QueryStats::new(true);
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["samples"].get("per_step_enabled").is_none());
        assert_eq!(json["samples"]["peak_samples"], 0);
    }
}

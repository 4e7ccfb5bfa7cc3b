//! Functions over range vectors (`rate`, `*_over_time`, ...). Each one folds the
//! points of a single series inside the window into at most one value.

use promql_common::histogram::{CounterResetHint, FloatHistogram};
use promql_parser::functions::BuiltinFunction;

use crate::common::math::{kahan_sum, mean, quantile, stddev, stdvar};
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{invalid_quantile, mixed_floats_histograms_in_range, Annotations, FPoint, HPoint, SampleValue};

/// The points of one series that fall into an evaluation window.
pub(crate) struct RollupFuncArg<'a> {
    pub floats: &'a [FPoint],
    pub histograms: &'a [HPoint],
    /// Window bounds in milliseconds, both inclusive.
    pub window_start: i64,
    pub window_end: i64,
}

impl RollupFuncArg<'_> {
    fn is_mixed(&self) -> bool {
        !self.floats.is_empty() && !self.histograms.is_empty()
    }

    fn values(&self) -> Vec<f64> {
        self.floats.iter().map(|p| p.f).collect()
    }

    fn range_secs(&self) -> f64 {
        (self.window_end - self.window_start) as f64 / 1e3
    }
}

/// Applies a range function to one series. `params` holds the scalar
/// arguments preceding the range vector. Returns `None` when the function
/// produces no value for the series.
pub(crate) fn eval_rollup(
    func: BuiltinFunction,
    params: &[f64],
    rfa: &RollupFuncArg,
    warnings: &mut Annotations,
) -> RuntimeResult<Option<SampleValue>> {
    use BuiltinFunction::*;

    let res = match func {
        Rate => extrapolated_rate(rfa, true, true, warnings)?,
        Increase => extrapolated_rate(rfa, true, false, warnings)?,
        Delta => extrapolated_rate(rfa, false, false, warnings)?,
        Irate => instant_value(rfa, true),
        Idelta => instant_value(rfa, false),
        AvgOverTime => rollup_avg(rfa, warnings)?,
        SumOverTime => rollup_sum(rfa, warnings)?,
        CountOverTime => non_empty(rfa).then(|| SampleValue::Float(rfa.floats.len() as f64 + rfa.histograms.len() as f64)),
        PresentOverTime => non_empty(rfa).then_some(SampleValue::Float(1.0)),
        LastOverTime => rollup_last(rfa),
        MinOverTime => float_rollup(rfa, rollup_min),
        MaxOverTime => float_rollup(rfa, rollup_max),
        StddevOverTime => float_rollup(rfa, stddev),
        StdvarOverTime => float_rollup(rfa, stdvar),
        QuantileOverTime => {
            let phi = params.first().copied().unwrap_or(f64::NAN);
            if !(0.0..=1.0).contains(&phi) {
                warnings.add(invalid_quantile(phi));
            }
            float_rollup(rfa, |values| quantile(phi, values))
        }
        Changes => float_rollup(rfa, rollup_changes),
        Resets => float_rollup(rfa, rollup_resets),
        // absent_over_time looks at all series at once
        AbsentOverTime => None,
        _ => {
            return Err(RuntimeError::General(format!(
                "{} is not a range function",
                func.name()
            )))
        }
    };
    Ok(res)
}

fn non_empty(rfa: &RollupFuncArg) -> bool {
    !rfa.floats.is_empty() || !rfa.histograms.is_empty()
}

/// Runs `f` over the float values, histograms are ignored.
fn float_rollup(rfa: &RollupFuncArg, f: impl Fn(&[f64]) -> f64) -> Option<SampleValue> {
    if rfa.floats.is_empty() {
        return None;
    }
    Some(SampleValue::Float(f(&rfa.values())))
}

fn rollup_min(values: &[f64]) -> f64 {
    let mut min = values[0];
    for v in &values[1..] {
        if *v < min || min.is_nan() {
            min = *v;
        }
    }
    min
}

fn rollup_max(values: &[f64]) -> f64 {
    let mut max = values[0];
    for v in &values[1..] {
        if *v > max || max.is_nan() {
            max = *v;
        }
    }
    max
}

fn rollup_changes(values: &[f64]) -> f64 {
    let mut changes = 0;
    for w in values.windows(2) {
        let (prev, cur) = (w[0], w[1]);
        if cur != prev && !(cur.is_nan() && prev.is_nan()) {
            changes += 1;
        }
    }
    changes as f64
}

fn rollup_resets(values: &[f64]) -> f64 {
    values.windows(2).filter(|w| w[1] < w[0]).count() as f64
}

fn rollup_last(rfa: &RollupFuncArg) -> Option<SampleValue> {
    let last_float = rfa.floats.last();
    let last_hist = rfa.histograms.last();
    match (last_float, last_hist) {
        (Some(f), Some(h)) if h.t > f.t => Some(SampleValue::Histogram(h.h.clone())),
        (Some(f), _) => Some(SampleValue::Float(f.f)),
        (None, Some(h)) => Some(SampleValue::Histogram(h.h.clone())),
        (None, None) => None,
    }
}

fn rollup_sum(rfa: &RollupFuncArg, warnings: &mut Annotations) -> RuntimeResult<Option<SampleValue>> {
    if rfa.is_mixed() {
        warnings.add(mixed_floats_histograms_in_range("sum_over_time"));
        return Ok(None);
    }
    if !rfa.histograms.is_empty() {
        let sum = sum_histograms(rfa.histograms)?;
        return Ok(sum.map(SampleValue::Histogram));
    }
    Ok(float_rollup(rfa, |values| kahan_sum(values.iter().copied())))
}

fn rollup_avg(rfa: &RollupFuncArg, warnings: &mut Annotations) -> RuntimeResult<Option<SampleValue>> {
    if rfa.is_mixed() {
        warnings.add(mixed_floats_histograms_in_range("avg_over_time"));
        return Ok(None);
    }
    if !rfa.histograms.is_empty() {
        let avg = FloatHistogram::average(rfa.histograms.iter().map(|p| &p.h))?;
        return Ok(avg.map(SampleValue::Histogram));
    }
    Ok(float_rollup(rfa, mean))
}

fn sum_histograms(points: &[HPoint]) -> RuntimeResult<Option<FloatHistogram>> {
    let mut acc: Option<FloatHistogram> = None;
    for p in points {
        acc = Some(match acc {
            None => p.h.clone(),
            Some(sum) => sum.add(&p.h)?,
        });
    }
    Ok(acc)
}

/// `irate` and `idelta`: the change between the last two float samples.
fn instant_value(rfa: &RollupFuncArg, is_rate: bool) -> Option<SampleValue> {
    let n = rfa.floats.len();
    if n < 2 {
        return None;
    }
    let last = rfa.floats[n - 1];
    let prev = rfa.floats[n - 2];
    let mut value = if is_rate && last.f < prev.f {
        // counter reset
        last.f
    } else {
        last.f - prev.f
    };
    let sampled_interval = last.t - prev.t;
    if sampled_interval == 0 {
        return None;
    }
    if is_rate {
        value /= sampled_interval as f64 / 1e3;
    }
    Some(SampleValue::Float(value))
}

/// Shared implementation of `rate`, `increase` and `delta`. The raw change
/// over the sampled interval is extrapolated towards the window bounds, but
/// by no more than half an average sample interval past the first and last
/// sample.
fn extrapolated_rate(
    rfa: &RollupFuncArg,
    is_counter: bool,
    is_rate: bool,
    warnings: &mut Annotations,
) -> RuntimeResult<Option<SampleValue>> {
    let func = match (is_counter, is_rate) {
        (true, true) => "rate",
        (true, false) => "increase",
        _ => "delta",
    };
    if rfa.is_mixed() {
        warnings.add(mixed_floats_histograms_in_range(func));
        return Ok(None);
    }

    let (first_t, last_t, count, result) = if !rfa.histograms.is_empty() {
        let points = rfa.histograms;
        if points.len() < 2 {
            return Ok(None);
        }
        let h = histogram_change(points, is_counter)?;
        (points[0].t, points[points.len() - 1].t, points.len(), Change::Histogram(h))
    } else {
        let points = rfa.floats;
        if points.len() < 2 {
            return Ok(None);
        }
        let mut value = points[points.len() - 1].f - points[0].f;
        if is_counter {
            for w in points.windows(2) {
                if w[1].f < w[0].f {
                    value += w[0].f;
                }
            }
        }
        (points[0].t, points[points.len() - 1].t, points.len(), Change::Float(value))
    };

    let mut duration_to_start = (first_t - rfa.window_start) as f64 / 1e3;
    let duration_to_end = (rfa.window_end - last_t) as f64 / 1e3;
    let sampled_interval = (last_t - first_t) as f64 / 1e3;
    let average_between_samples = sampled_interval / (count - 1) as f64;

    if let Change::Float(value) = result {
        let first = rfa.floats[0].f;
        // counters cannot go below zero, so do not extrapolate past the point
        // where the series would have started at zero
        if is_counter && value > 0.0 && first >= 0.0 {
            let duration_to_zero = sampled_interval * (first / value);
            if duration_to_zero < duration_to_start {
                duration_to_start = duration_to_zero;
            }
        }
    }

    let threshold = average_between_samples * 1.1;
    let mut extrapolate_to = sampled_interval;
    extrapolate_to += if duration_to_start < threshold {
        duration_to_start
    } else {
        average_between_samples / 2.0
    };
    extrapolate_to += if duration_to_end < threshold {
        duration_to_end
    } else {
        average_between_samples / 2.0
    };

    let mut factor = extrapolate_to / sampled_interval;
    if is_rate {
        factor /= rfa.range_secs();
    }
    let value = match result {
        Change::Float(v) => SampleValue::Float(v * factor),
        Change::Histogram(h) => SampleValue::Histogram(h.mul(factor)),
    };
    Ok(Some(value))
}

enum Change {
    Float(f64),
    Histogram(FloatHistogram),
}

/// Difference between the last and the first histogram. For counters every
/// detected reset adds back the histogram preceding it.
fn histogram_change(points: &[HPoint], is_counter: bool) -> RuntimeResult<FloatHistogram> {
    let first = &points[0].h;
    let last = &points[points.len() - 1].h;
    let mut res = last.sub(first)?;
    if is_counter {
        let mut prev = first;
        for p in &points[1..] {
            if p.h.detect_reset(prev) {
                res = res.add(prev)?;
            }
            prev = &p.h;
        }
    }
    res.counter_reset_hint = CounterResetHint::Gauge;
    Ok(res)
}

#[cfg(test)]
mod tests {
    use promql_common::histogram::Span;
    use test_case::test_case;

    use super::*;

    fn floats(points: &[(i64, f64)]) -> Vec<FPoint> {
        points.iter().map(|(t, f)| FPoint::new(*t, *f)).collect()
    }

    fn eval_floats(func: BuiltinFunction, params: &[f64], points: &[(i64, f64)], start: i64, end: i64) -> Option<f64> {
        let floats = floats(points);
        let rfa = RollupFuncArg {
            floats: &floats,
            histograms: &[],
            window_start: start,
            window_end: end,
        };
        let mut warnings = Annotations::default();
        match eval_rollup(func, params, &rfa, &mut warnings).unwrap() {
            Some(SampleValue::Float(f)) => Some(f),
            Some(SampleValue::Histogram(_)) => panic!("unexpected histogram"),
            None => None,
        }
    }

    const COUNTER: &[(i64, f64)] = &[(0, 0.0), (10_000, 10.0), (20_000, 20.0), (30_000, 30.0), (40_000, 40.0), (50_000, 50.0), (60_000, 60.0)];

    #[test_case(BuiltinFunction::Increase, 60.0)]
    #[test_case(BuiltinFunction::Rate, 1.0)]
    #[test_case(BuiltinFunction::Delta, 60.0)]
    #[test_case(BuiltinFunction::Irate, 1.0)]
    #[test_case(BuiltinFunction::Idelta, 10.0)]
    #[test_case(BuiltinFunction::Changes, 6.0)]
    #[test_case(BuiltinFunction::Resets, 0.0)]
    #[test_case(BuiltinFunction::CountOverTime, 7.0)]
    #[test_case(BuiltinFunction::SumOverTime, 210.0)]
    #[test_case(BuiltinFunction::AvgOverTime, 30.0)]
    #[test_case(BuiltinFunction::MinOverTime, 0.0)]
    #[test_case(BuiltinFunction::MaxOverTime, 60.0)]
    #[test_case(BuiltinFunction::LastOverTime, 60.0)]
    #[test_case(BuiltinFunction::PresentOverTime, 1.0)]
    fn counter_over_full_window(func: BuiltinFunction, expected: f64) {
        assert_eq!(eval_floats(func, &[], COUNTER, 0, 60_000), Some(expected));
    }

    #[test]
    fn counter_reset_adds_previous_value() {
        let points = &[(0, 5.0), (10_000, 10.0), (20_000, 2.0), (30_000, 7.0)];
        // 7 - 5 + 10, no extrapolation needed as the samples cover the window
        assert_eq!(eval_floats(BuiltinFunction::Increase, &[], points, 0, 30_000), Some(12.0));
        assert_eq!(eval_floats(BuiltinFunction::Resets, &[], points, 0, 30_000), Some(1.0));
        assert_eq!(eval_floats(BuiltinFunction::Irate, &[], &points[1..3], 0, 30_000), Some(0.2));
    }

    #[test]
    fn extrapolation_is_capped_at_half_an_interval() {
        // samples at 20s and 30s in a 0s..60s window: 10s of data, extended
        // by 5s on each side
        let points = &[(20_000, 1.0), (30_000, 2.0)];
        assert_eq!(eval_floats(BuiltinFunction::Delta, &[], points, 0, 60_000), Some(2.0));
    }

    #[test]
    fn counter_extrapolation_stops_at_zero() {
        // extrapolating to the window start at 0s would need a negative
        // counter, the series is assumed to have started at 5s
        let points = &[(10_000, 5.0), (20_000, 15.0), (30_000, 25.0)];
        let increase = eval_floats(BuiltinFunction::Increase, &[], points, 0, 30_000).unwrap();
        assert_eq!(increase, 25.0);
    }

    #[test]
    fn single_sample_has_no_rate() {
        assert_eq!(eval_floats(BuiltinFunction::Rate, &[], &[(0, 1.0)], 0, 60_000), None);
        assert_eq!(eval_floats(BuiltinFunction::Irate, &[], &[(0, 1.0)], 0, 60_000), None);
    }

    #[test]
    fn quantile_and_deviation() {
        let points = &[(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)];
        assert_eq!(eval_floats(BuiltinFunction::QuantileOverTime, &[0.5], points, 0, 3), Some(2.5));
        assert_eq!(eval_floats(BuiltinFunction::StdvarOverTime, &[], points, 0, 3), Some(1.25));
    }

    #[test]
    fn invalid_quantile_warns() {
        let floats = floats(&[(0, 1.0)]);
        let rfa = RollupFuncArg {
            floats: &floats,
            histograms: &[],
            window_start: 0,
            window_end: 0,
        };
        let mut warnings = Annotations::default();
        let res = eval_rollup(BuiltinFunction::QuantileOverTime, &[1.5], &rfa, &mut warnings).unwrap();
        assert_eq!(res, Some(SampleValue::Float(f64::INFINITY)));
        assert!(warnings.contains("quantile value should be between 0 and 1"));
    }

    fn histogram(count: f64, buckets: Vec<f64>) -> FloatHistogram {
        FloatHistogram {
            count,
            sum: count,
            positive_spans: vec![Span::new(0, buckets.len() as u32)],
            positive_buckets: buckets,
            ..Default::default()
        }
    }

    #[test]
    fn histogram_increase() {
        let hists = vec![
            HPoint::new(0, histogram(2.0, vec![1.0, 1.0])),
            HPoint::new(30_000, histogram(6.0, vec![3.0, 3.0])),
        ];
        let rfa = RollupFuncArg {
            floats: &[],
            histograms: &hists,
            window_start: 0,
            window_end: 30_000,
        };
        let mut warnings = Annotations::default();
        let res = eval_rollup(BuiltinFunction::Increase, &[], &rfa, &mut warnings).unwrap();
        let Some(SampleValue::Histogram(h)) = res else {
            panic!("expected a histogram, got {res:?}");
        };
        assert_eq!(h.count, 4.0);
        assert_eq!(h.positive_buckets, vec![2.0, 2.0]);
        assert_eq!(h.counter_reset_hint, CounterResetHint::Gauge);
    }

    #[test]
    fn mixed_samples_warn() {
        let floats = floats(&[(0, 1.0)]);
        let hists = vec![HPoint::new(10, histogram(1.0, vec![1.0]))];
        let rfa = RollupFuncArg {
            floats: &floats,
            histograms: &hists,
            window_start: 0,
            window_end: 10,
        };
        let mut warnings = Annotations::default();
        assert_eq!(eval_rollup(BuiltinFunction::SumOverTime, &[], &rfa, &mut warnings).unwrap(), None);
        assert!(warnings.contains("mix of histograms and floats"));
        let last = eval_rollup(BuiltinFunction::LastOverTime, &[], &rfa, &mut warnings).unwrap();
        assert!(matches!(last, Some(SampleValue::Histogram(_))));
    }
}

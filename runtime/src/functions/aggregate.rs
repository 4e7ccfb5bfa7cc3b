//! Aggregation operators (`sum by (job) (...)`, `topk(3, ...)`, ...).

use std::cmp::Ordering;

use promql_common::hash::{FastHashMap, Signature};
use promql_common::histogram::FloatHistogram;
use promql_common::label::{is_valid_label_name, Labels, LabelsBuilder};
use promql_parser::ast::AggregateExpr;
use promql_parser::functions::AggregateFunction;

use crate::common::math::{kahan_sum, mean, quantile, stddev, stdvar};
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{
    histogram_ignored, invalid_quantile, invalid_ratio, mixed_floats_histograms, Annotations, QueryValue, Sample,
    SampleValue, Vector,
};

/// Converts the `k` of `topk`, `bottomk` and `limitk` to an integer.
pub(crate) fn k_param(k: f64) -> RuntimeResult<i64> {
    if k.is_nan() {
        return Err(RuntimeError::ArgumentError("parameter value is NaN".to_string()));
    }
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if k >= i64::MAX as f64 || k < i64::MIN as f64 {
        return Err(RuntimeError::ArgumentError(format!("scalar value {k} overflows int64")));
    }
    Ok(k as i64)
}

/// Samples of one output group, in input order.
struct AggrGroup {
    labels: Labels,
    members: Vec<Sample>,
}

/// Evaluates an aggregation over `input`. `param` is the evaluated parameter
/// for the operators that take one.
pub(crate) fn eval_aggregate(
    agg: &AggregateExpr,
    param: Option<QueryValue>,
    input: Vector,
    ts: i64,
    warnings: &mut Annotations,
) -> RuntimeResult<Vector> {
    use AggregateFunction::*;

    let op = agg.op;
    let mut grouping = agg.grouping.clone();
    let mut input = input;

    let mut k = 0_i64;
    let mut phi = f64::NAN;
    let mut ratio = 0.0;
    match op {
        Topk | Bottomk | Limitk => {
            k = k_param(scalar_param(param, op)?)?;
            if k < 1 {
                return Ok(vec![]);
            }
        }
        LimitRatio => {
            ratio = ratio_param(scalar_param(param, op)?, warnings)?;
        }
        Quantile => {
            phi = scalar_param(param, op)?;
            if !(0.0..=1.0).contains(&phi) {
                warnings.add(invalid_quantile(phi));
            }
        }
        CountValues => {
            let label = match param {
                Some(QueryValue::String(s)) => s.v,
                _ => return Err(RuntimeError::ArgumentError("count_values: expected a string parameter".to_string())),
            };
            if !is_valid_label_name(&label) {
                return Err(RuntimeError::ArgumentError(format!("invalid label name {label:?}")));
            }
            input = input
                .into_iter()
                .map(|mut s| {
                    let value = format_value(&s.value);
                    s.metric = LabelsBuilder::new(&s.metric).set(&label, &value).labels();
                    s
                })
                .collect();
            if agg.without {
                grouping.retain(|name| name != &label);
            } else {
                grouping.push(label);
            }
        }
        _ => {}
    }

    let groups = group_samples(input, &grouping, agg.without);
    let mut res = Vec::with_capacity(groups.len());
    for group in groups {
        let labels = group.labels;
        let value = match op {
            Sum => sum_group(group.members, warnings)?.map(|v| v.into_value()),
            Avg => avg_group(group.members, warnings)?,
            Count => Some(SampleValue::Float(group.members.len() as f64)),
            Group => Some(SampleValue::Float(1.0)),
            CountValues => Some(SampleValue::Float(group.members.len() as f64)),
            Min => float_values(&group.members, op, warnings).map(|values| {
                values.into_iter().fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
            }).map(SampleValue::Float),
            Max => float_values(&group.members, op, warnings).map(|values| {
                values.into_iter().fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
            }).map(SampleValue::Float),
            Stddev => float_values(&group.members, op, warnings).map(|v| SampleValue::Float(stddev(&v))),
            Stdvar => float_values(&group.members, op, warnings).map(|v| SampleValue::Float(stdvar(&v))),
            Quantile => float_values(&group.members, op, warnings).map(|v| SampleValue::Float(quantile(phi, &v))),
            Topk | Bottomk => {
                res.extend(top_k(group.members, k, op == Bottomk, op, ts, warnings));
                continue;
            }
            Limitk => {
                res.extend(group.members.into_iter().take(k as usize).map(|s| restamp(s, ts)));
                continue;
            }
            LimitRatio => {
                res.extend(
                    group
                        .members
                        .into_iter()
                        .filter(|s| ratio_includes(&s.metric, ratio))
                        .map(|s| restamp(s, ts)),
                );
                continue;
            }
        };
        if let Some(value) = value {
            res.push(Sample { metric: labels, t: ts, value });
        }
    }
    Ok(res)
}

fn scalar_param(param: Option<QueryValue>, op: AggregateFunction) -> RuntimeResult<f64> {
    match param {
        Some(QueryValue::Scalar(s)) => Ok(s.v),
        _ => Err(RuntimeError::ArgumentError(format!(
            "{}: expected a scalar parameter",
            op.name()
        ))),
    }
}

fn ratio_param(ratio: f64, warnings: &mut Annotations) -> RuntimeResult<f64> {
    if ratio.is_nan() {
        return Err(RuntimeError::ArgumentError("ratio value is NaN".to_string()));
    }
    if !(-1.0..=1.0).contains(&ratio) {
        warnings.add(invalid_ratio(ratio));
        return Ok(ratio.clamp(-1.0, 1.0));
    }
    Ok(ratio)
}

/// Maps the label set onto `[0, 1]`. A positive ratio keeps the series
/// hashing below it, a negative one those at or above `1 + ratio`, so
/// `r` and `r - 1` split a vector into two disjoint halves.
pub(crate) fn ratio_includes(metric: &Labels, ratio: f64) -> bool {
    let h = metric.stable_hash() as f64 / u64::MAX as f64;
    if ratio >= 0.0 {
        h < ratio
    } else {
        h >= 1.0 + ratio
    }
}

fn group_samples(input: Vector, grouping: &[String], without: bool) -> Vec<AggrGroup> {
    let mut groups: Vec<AggrGroup> = vec![];
    let mut index: FastHashMap<Signature, usize> = FastHashMap::default();
    for sample in input {
        let key = if without {
            sample.metric.signature_without(grouping)
        } else {
            sample.metric.signature_with(grouping)
        };
        match index.get(&key) {
            Some(&idx) => groups[idx].members.push(sample),
            None => {
                let labels = if without {
                    sample.metric.drop_with_name(grouping)
                } else {
                    sample.metric.keep(grouping)
                };
                index.insert(key, groups.len());
                groups.push(AggrGroup {
                    labels,
                    members: vec![sample],
                });
            }
        }
    }
    groups
}

fn restamp(mut sample: Sample, ts: i64) -> Sample {
    sample.t = ts;
    sample
}

enum Kind {
    Floats(Vec<f64>),
    Histograms(Vec<FloatHistogram>),
}

impl Kind {
    fn into_value(self) -> SampleValue {
        match self {
            Kind::Floats(values) => SampleValue::Float(kahan_sum(values)),
            Kind::Histograms(mut hs) => SampleValue::Histogram(hs.swap_remove(0)),
        }
    }
}

/// Splits the group by the kind of its first sample. Samples of the other
/// kind are dropped with a warning.
fn split_by_kind(members: Vec<Sample>, op: &str, warnings: &mut Annotations) -> Option<Kind> {
    let first_is_float = members.first()?.as_float().is_some();
    let mut floats = vec![];
    let mut hists = vec![];
    let mut mixed = false;
    for s in members {
        match s.value {
            SampleValue::Float(f) if first_is_float => floats.push(f),
            SampleValue::Histogram(h) if !first_is_float => hists.push(h),
            _ => mixed = true,
        }
    }
    if mixed {
        warnings.add(mixed_floats_histograms(op));
    }
    if first_is_float {
        Some(Kind::Floats(floats))
    } else {
        Some(Kind::Histograms(hists))
    }
}

fn sum_group(members: Vec<Sample>, warnings: &mut Annotations) -> RuntimeResult<Option<Kind>> {
    let kind = match split_by_kind(members, "sum", warnings) {
        Some(Kind::Histograms(hists)) => {
            let mut iter = hists.into_iter();
            let Some(mut acc) = iter.next() else {
                return Ok(None);
            };
            for h in iter {
                acc = acc.add(&h)?;
            }
            Some(Kind::Histograms(vec![acc]))
        }
        other => other,
    };
    Ok(kind)
}

fn avg_group(members: Vec<Sample>, warnings: &mut Annotations) -> RuntimeResult<Option<SampleValue>> {
    match split_by_kind(members, "avg", warnings) {
        Some(Kind::Floats(values)) => Ok(Some(SampleValue::Float(mean(&values)))),
        Some(Kind::Histograms(hists)) => {
            let avg = FloatHistogram::average(hists.iter())?;
            Ok(avg.map(SampleValue::Histogram))
        }
        None => Ok(None),
    }
}

/// Float values of the group. Histograms are ignored with a warning; a group
/// without floats produces nothing.
fn float_values(members: &[Sample], op: AggregateFunction, warnings: &mut Annotations) -> Option<Vec<f64>> {
    let mut values = Vec::with_capacity(members.len());
    for s in members {
        match s.as_float() {
            Some(f) => values.push(f),
            None => warnings.add(histogram_ignored(op.name())),
        }
    }
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// The `k` largest (or smallest) float samples, best first. NaN ranks below
/// every number in both directions.
fn top_k(
    members: Vec<Sample>,
    k: i64,
    bottom: bool,
    op: AggregateFunction,
    ts: i64,
    warnings: &mut Annotations,
) -> Vec<Sample> {
    let mut floats: Vec<(f64, Sample)> = Vec::with_capacity(members.len());
    for s in members {
        match s.as_float() {
            Some(f) => floats.push((f, s)),
            None => warnings.add(histogram_ignored(op.name())),
        }
    }
    floats.sort_by(|(a, _), (b, _)| match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ if bottom => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        _ => b.partial_cmp(a).unwrap_or(Ordering::Equal),
    });
    let k = usize::try_from(k).unwrap_or(usize::MAX);
    floats.into_iter().take(k).map(|(_, s)| restamp(s, ts)).collect()
}

/// Label value written by `count_values`.
fn format_value(value: &SampleValue) -> String {
    match value {
        SampleValue::Float(f) if f.is_nan() => "NaN".to_string(),
        SampleValue::Float(f) if f.is_infinite() => {
            if *f > 0.0 {
                "+Inf".to_string()
            } else {
                "-Inf".to_string()
            }
        }
        SampleValue::Float(f) => f.to_string(),
        SampleValue::Histogram(h) => h.to_string(),
    }
}

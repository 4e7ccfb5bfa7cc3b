//! Binary operators over scalars and instant vectors.
//!
//! Ex:
//!   2 * http_requests_total{}
//!   foo / on(instance) group_left(job) bar
//!   up == bool 1
use std::collections::hash_map::Entry;

use promql_common::hash::{FastHashMap, FastHashSet, Signature};
use promql_common::label::{Labels, LabelsBuilder, METRIC_NAME_LABEL};
use promql_parser::ast::{BinaryExpr, VectorMatchCardinality, VectorMatching};
use promql_parser::binaryop::{scalar_binary_operation, Operator};

use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{incompatible_binop, Annotations, QueryValue, Sample, SampleValue, Scalar, Vector};

pub(crate) fn eval_binary(
    be: &BinaryExpr,
    lhs: QueryValue,
    rhs: QueryValue,
    ts: i64,
    warnings: &mut Annotations,
) -> RuntimeResult<QueryValue> {
    let value = match (lhs, rhs) {
        (QueryValue::Scalar(l), QueryValue::Scalar(r)) => {
            let (v, _) = scalar_binary_operation(be.op, l.v, r.v, be.return_bool)?;
            QueryValue::Scalar(Scalar { t: ts, v })
        }
        (QueryValue::Vector(l), QueryValue::Scalar(r)) => {
            QueryValue::Vector(vector_scalar_binop(be, l, r.v, false, ts, warnings)?)
        }
        (QueryValue::Scalar(l), QueryValue::Vector(r)) => {
            QueryValue::Vector(vector_scalar_binop(be, r, l.v, true, ts, warnings)?)
        }
        (QueryValue::Vector(l), QueryValue::Vector(r)) => {
            let default_matching;
            let matching = match &be.matching {
                Some(m) => m,
                None => {
                    default_matching = VectorMatching::new(if be.op.is_set_operator() {
                        VectorMatchCardinality::ManyToMany
                    } else {
                        VectorMatchCardinality::OneToOne
                    });
                    &default_matching
                }
            };
            let res = match be.op {
                Operator::And => vector_and(l, r, matching, ts),
                Operator::Or => vector_or(l, r, matching, ts),
                Operator::Unless => vector_unless(l, r, matching, ts),
                _ => vector_binop(be, l, r, matching, ts, warnings)?,
            };
            QueryValue::Vector(res)
        }
        (l, r) => {
            return Err(RuntimeError::General(format!(
                "binary operator {} is not defined between {} and {}",
                be.op,
                l.value_type(),
                r.value_type()
            )))
        }
    };
    Ok(value)
}

/// Arithmetic operators produce a new quantity, so the metric name goes.
fn drops_metric_name(op: Operator) -> bool {
    !op.is_comparison() && !op.is_set_operator()
}

fn kind_name(v: &SampleValue) -> &'static str {
    match v {
        SampleValue::Float(_) => "float",
        SampleValue::Histogram(_) => "histogram",
    }
}

/// Applies `op` to one pair of values. Returns `None` when the element is
/// filtered out by a comparison or the value kinds do not combine.
fn elem_binop(
    op: Operator,
    lhs: &SampleValue,
    rhs: &SampleValue,
    return_bool: bool,
    warnings: &mut Annotations,
) -> RuntimeResult<Option<SampleValue>> {
    use SampleValue::{Float, Histogram};

    let res = match (lhs, rhs) {
        (Float(l), Float(r)) => {
            let (v, keep) = scalar_binary_operation(op, *l, *r, return_bool)?;
            keep.then_some(Float(v))
        }
        (Histogram(l), Histogram(r)) if op == Operator::Add => Some(Histogram(l.add(r)?)),
        (Histogram(l), Histogram(r)) if op == Operator::Sub => Some(Histogram(l.sub(r)?)),
        (Histogram(h), Float(f)) if op == Operator::Mul => Some(Histogram(h.mul(*f))),
        (Histogram(h), Float(f)) if op == Operator::Div => Some(Histogram(h.div(*f))),
        (Float(f), Histogram(h)) if op == Operator::Mul => Some(Histogram(h.mul(*f))),
        _ => {
            warnings.add(incompatible_binop(kind_name(lhs), op.as_str(), kind_name(rhs)));
            None
        }
    };
    Ok(res)
}

fn vector_scalar_binop(
    be: &BinaryExpr,
    vector: Vector,
    scalar: f64,
    scalar_on_left: bool,
    ts: i64,
    warnings: &mut Annotations,
) -> RuntimeResult<Vector> {
    let op = be.op;
    let scalar = SampleValue::Float(scalar);
    let mut res = Vec::with_capacity(vector.len());
    for sample in vector {
        let value = if scalar_on_left {
            elem_binop(op, &scalar, &sample.value, be.return_bool, warnings)?
        } else {
            elem_binop(op, &sample.value, &scalar, be.return_bool, warnings)?
        };
        let Some(mut value) = value else {
            continue;
        };
        // a filtering comparison keeps the vector element, whichever side
        // it is on
        if op.is_comparison() && !be.return_bool && scalar_on_left {
            value = sample.value;
        }
        let metric = if drops_metric_name(op) || be.return_bool {
            sample.metric.without_metric_name()
        } else {
            sample.metric
        };
        res.push(Sample { metric, t: ts, value });
    }
    Ok(res)
}

fn matching_signature(metric: &Labels, matching: &VectorMatching) -> Signature {
    if matching.on {
        metric.signature_with(&matching.matching_labels)
    } else {
        metric.signature_without(&matching.matching_labels)
    }
}

fn vector_and(lhs: Vector, rhs: Vector, matching: &VectorMatching, ts: i64) -> Vector {
    let right: FastHashSet<Signature> = rhs.iter().map(|s| matching_signature(&s.metric, matching)).collect();
    lhs.into_iter()
        .filter(|s| right.contains(&matching_signature(&s.metric, matching)))
        .map(|s| Sample { t: ts, ..s })
        .collect()
}

fn vector_or(lhs: Vector, rhs: Vector, matching: &VectorMatching, ts: i64) -> Vector {
    let left: FastHashSet<Signature> = lhs.iter().map(|s| matching_signature(&s.metric, matching)).collect();
    let mut res: Vector = lhs.into_iter().map(|s| Sample { t: ts, ..s }).collect();
    res.extend(
        rhs.into_iter()
            .filter(|s| !left.contains(&matching_signature(&s.metric, matching)))
            .map(|s| Sample { t: ts, ..s }),
    );
    res
}

fn vector_unless(lhs: Vector, rhs: Vector, matching: &VectorMatching, ts: i64) -> Vector {
    let right: FastHashSet<Signature> = rhs.iter().map(|s| matching_signature(&s.metric, matching)).collect();
    lhs.into_iter()
        .filter(|s| !right.contains(&matching_signature(&s.metric, matching)))
        .map(|s| Sample { t: ts, ..s })
        .collect()
}

/// Arithmetic and comparison between two vectors.
fn vector_binop(
    be: &BinaryExpr,
    lhs: Vector,
    rhs: Vector,
    matching: &VectorMatching,
    ts: i64,
    warnings: &mut Annotations,
) -> RuntimeResult<Vector> {
    use VectorMatchCardinality::*;

    if matching.card == ManyToMany {
        return Err(RuntimeError::General(
            "many-to-many only allowed for set operators".to_string(),
        ));
    }
    let op = be.op;
    // the "one" side is indexed, the "many" side is iterated
    let swapped = matching.card == OneToMany;
    let (many, one) = if swapped { (rhs, lhs) } else { (lhs, rhs) };

    let mut one_side: FastHashMap<Signature, Sample> = FastHashMap::default();
    for sample in one {
        match one_side.entry(matching_signature(&sample.metric, matching)) {
            Entry::Occupied(e) => {
                return Err(RuntimeError::General(format!(
                    "found duplicate series for the match group {} on the {} hand-side of the operation: [{}, {}];\
                     many-to-many matching not allowed: matching labels must be unique on one side",
                    match_group_labels(&sample.metric, matching),
                    if swapped { "left" } else { "right" },
                    e.get().metric,
                    sample.metric
                )))
            }
            Entry::Vacant(e) => {
                e.insert(sample);
            }
        }
    }

    // one-to-one: signatures already matched; many-to-one: result label sets
    // seen per signature
    let mut matched: FastHashMap<Signature, FastHashSet<Signature>> = FastHashMap::default();
    let mut res = Vec::with_capacity(many.len());
    for sample in many {
        let sig = matching_signature(&sample.metric, matching);
        let Some(other) = one_side.get(&sig) else {
            continue;
        };
        let (l, r) = if swapped { (other, &sample) } else { (&sample, other) };
        let Some(value) = elem_binop(op, &l.value, &r.value, be.return_bool, warnings)? else {
            continue;
        };
        let metric = result_metric(&l.metric, &r.metric, op, be.return_bool, matching);

        if matching.card == OneToOne {
            if matched.contains_key(&sig) {
                return Err(RuntimeError::General(format!(
                    "multiple matches for labels: many-to-one matching must be explicit (group_left/group_right), \
                     match group {}",
                    match_group_labels(&sample.metric, matching)
                )));
            }
            matched.insert(sig, FastHashSet::default());
        } else if !matched.entry(sig).or_default().insert(metric.signature()) {
            return Err(RuntimeError::General(
                "multiple matches for labels: grouping labels must ensure unique matches".to_string(),
            ));
        }
        res.push(Sample { metric, t: ts, value });
    }
    Ok(res)
}

fn match_group_labels(metric: &Labels, matching: &VectorMatching) -> Labels {
    if matching.on {
        metric.keep(&matching.matching_labels)
    } else {
        metric.drop_with_name(&matching.matching_labels)
    }
}

/// Labels of an element produced by a vector/vector operation. `lhs` is the
/// left operand, `rhs` the right one, regardless of which side is "many".
fn result_metric(lhs: &Labels, rhs: &Labels, op: Operator, return_bool: bool, matching: &VectorMatching) -> Labels {
    let (many, one) = if matching.card == VectorMatchCardinality::OneToMany {
        (rhs, lhs)
    } else {
        (lhs, rhs)
    };
    let mut builder = LabelsBuilder::new(many);
    if drops_metric_name(op) || return_bool {
        builder.del(METRIC_NAME_LABEL);
    }
    if matching.card == VectorMatchCardinality::OneToOne {
        if matching.on {
            for label in many.iter() {
                if !matching.matching_labels.contains(&label.name) {
                    builder.del(&label.name);
                }
            }
        } else {
            for name in &matching.matching_labels {
                builder.del(name);
            }
        }
    }
    for name in &matching.include {
        match one.get(name) {
            Some(value) if !value.is_empty() => {
                builder.set(name, value);
            }
            _ => {
                builder.del(name);
            }
        }
    }
    builder.labels()
}

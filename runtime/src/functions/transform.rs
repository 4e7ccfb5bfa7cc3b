//! Functions over instant vectors and scalars.

use std::cmp::Ordering;

use itertools::Itertools;
use regex::Regex;

use promql_common::label::{is_valid_label_name, Labels, LabelsBuilder, METRIC_NAME_LABEL};
use promql_parser::ast::{Call, Expr};
use promql_parser::functions::{BuiltinFunction, BuiltinFunction as F};
use promql_parser::label::MatchOp;

use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{QueryValue, Sample, Scalar, Vector};

/// Evaluates a function whose arguments are all instant values. `args` holds
/// the evaluated arguments in call order.
pub(crate) fn eval_transform(call: &Call, args: Vec<QueryValue>, ts: i64) -> RuntimeResult<QueryValue> {
    let mut args = args.into_iter();
    let func = call.func;
    let value = match func {
        F::Time => QueryValue::Scalar(Scalar {
            t: ts,
            v: ts as f64 / 1e3,
        }),
        F::Vector => {
            let v = scalar_arg(args.next(), func)?;
            QueryValue::Vector(vec![Sample::float(Labels::empty(), ts, v)])
        }
        F::Scalar => {
            let vector = vector_arg(args.next(), func)?;
            let v = match vector.as_slice() {
                [sample] => sample.as_float().unwrap_or(f64::NAN),
                _ => f64::NAN,
            };
            QueryValue::Scalar(Scalar { t: ts, v })
        }
        F::Absent => {
            let vector = vector_arg(args.next(), func)?;
            if vector.is_empty() {
                let labels = absent_labels(&call.args[0]);
                QueryValue::Vector(vec![Sample::float(labels, ts, 1.0)])
            } else {
                QueryValue::Vector(vec![])
            }
        }
        F::Sort | F::SortDesc => {
            let vector = vector_arg(args.next(), func)?;
            QueryValue::Vector(sort_by_value(vector, func == F::SortDesc))
        }
        F::LabelReplace => {
            let vector = vector_arg(args.next(), func)?;
            let dst = string_arg(args.next(), func)?;
            let replacement = string_arg(args.next(), func)?;
            let src = string_arg(args.next(), func)?;
            let regex = string_arg(args.next(), func)?;
            QueryValue::Vector(label_replace(vector, &dst, &replacement, &src, &regex)?)
        }
        F::LabelJoin => {
            let vector = vector_arg(args.next(), func)?;
            let dst = string_arg(args.next(), func)?;
            let separator = string_arg(args.next(), func)?;
            let mut src_labels = vec![];
            for arg in args.by_ref() {
                src_labels.push(string_arg(Some(arg), func)?);
            }
            QueryValue::Vector(label_join(vector, &dst, &separator, &src_labels)?)
        }
        F::Timestamp => {
            let vector = vector_arg(args.next(), func)?;
            let res = vector
                .into_iter()
                .map(|s| Sample::float(s.metric.without_metric_name(), ts, s.t as f64 / 1e3))
                .collect();
            QueryValue::Vector(res)
        }
        F::Round => {
            let vector = vector_arg(args.next(), func)?;
            let to_nearest = match args.next() {
                Some(arg) => scalar_arg(Some(arg), func)?,
                None => 1.0,
            };
            let inverse = 1.0 / to_nearest;
            QueryValue::Vector(map_floats(vector, ts, |v| (v * inverse + 0.5).floor() / inverse))
        }
        F::Clamp => {
            let vector = vector_arg(args.next(), func)?;
            let min = scalar_arg(args.next(), func)?;
            let max = scalar_arg(args.next(), func)?;
            if max < min {
                return Ok(QueryValue::Vector(vec![]));
            }
            QueryValue::Vector(map_floats(vector, ts, |v| max.min(v).max(min)))
        }
        F::ClampMin => {
            let vector = vector_arg(args.next(), func)?;
            let min = scalar_arg(args.next(), func)?;
            QueryValue::Vector(map_floats(vector, ts, |v| v.max(min)))
        }
        F::ClampMax => {
            let vector = vector_arg(args.next(), func)?;
            let max = scalar_arg(args.next(), func)?;
            QueryValue::Vector(map_floats(vector, ts, |v| v.min(max)))
        }
        F::Abs | F::Ceil | F::Floor | F::Exp | F::Ln | F::Log2 | F::Log10 | F::Sqrt | F::Sgn => {
            let vector = vector_arg(args.next(), func)?;
            let f = math_func(func);
            QueryValue::Vector(map_floats(vector, ts, f))
        }
        _ => {
            return Err(RuntimeError::General(format!(
                "{} cannot be evaluated over instant values",
                func.name()
            )))
        }
    };
    Ok(value)
}

fn math_func(func: BuiltinFunction) -> fn(f64) -> f64 {
    match func {
        F::Abs => f64::abs,
        F::Ceil => f64::ceil,
        F::Floor => f64::floor,
        F::Exp => f64::exp,
        F::Ln => f64::ln,
        F::Log2 => f64::log2,
        F::Log10 => f64::log10,
        F::Sqrt => f64::sqrt,
        _ => sgn,
    }
}

fn sgn(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        // keeps 0 and NaN
        v
    }
}

/// Applies `f` to every float sample and drops the metric name. Histogram
/// samples are skipped.
fn map_floats(vector: Vector, ts: i64, f: impl Fn(f64) -> f64) -> Vector {
    vector
        .into_iter()
        .filter_map(|s| {
            let v = s.as_float()?;
            Some(Sample::float(s.metric.without_metric_name(), ts, f(v)))
        })
        .collect()
}

fn vector_arg(arg: Option<QueryValue>, func: BuiltinFunction) -> RuntimeResult<Vector> {
    match arg {
        Some(QueryValue::Vector(v)) => Ok(v),
        other => Err(unexpected_arg(func, "instant vector", other)),
    }
}

fn scalar_arg(arg: Option<QueryValue>, func: BuiltinFunction) -> RuntimeResult<f64> {
    match arg {
        Some(QueryValue::Scalar(s)) => Ok(s.v),
        other => Err(unexpected_arg(func, "scalar", other)),
    }
}

fn string_arg(arg: Option<QueryValue>, func: BuiltinFunction) -> RuntimeResult<String> {
    match arg {
        Some(QueryValue::String(s)) => Ok(s.v),
        other => Err(unexpected_arg(func, "string", other)),
    }
}

fn unexpected_arg(func: BuiltinFunction, expected: &str, got: Option<QueryValue>) -> RuntimeError {
    let got = got.map_or("nothing", |v| v.value_type().as_str());
    RuntimeError::ArgumentError(format!("{}: expected {expected} argument, got {got}", func.name()))
}

/// Labels of the sample returned by `absent` when its argument selects
/// nothing: every label the selector pins with a single equality matcher.
pub(crate) fn absent_labels(arg: &Expr) -> Labels {
    let matchers = match arg.unwrap_parens() {
        Expr::VectorSelector(vs) => &vs.matchers,
        Expr::MatrixSelector(ms) => &ms.vector_selector.matchers,
        _ => return Labels::empty(),
    };
    let mut builder = LabelsBuilder::new(&Labels::empty());
    let mut seen = std::collections::BTreeSet::new();
    let mut ambiguous = std::collections::BTreeSet::new();
    for m in matchers {
        if m.name == METRIC_NAME_LABEL {
            continue;
        }
        if m.op == MatchOp::Equal && !seen.insert(m.name.as_str()) {
            ambiguous.insert(m.name.as_str());
        }
    }
    for m in matchers {
        if m.op == MatchOp::Equal && m.name != METRIC_NAME_LABEL && !ambiguous.contains(m.name.as_str()) {
            builder.set(&m.name, &m.value);
        }
    }
    builder.labels()
}

/// Stable sort by float value. NaN sorts first in both directions and
/// histogram samples are dropped.
fn sort_by_value(vector: Vector, descending: bool) -> Vector {
    let mut res: Vector = vector.into_iter().filter(|s| s.as_float().is_some()).collect();
    res.sort_by(|a, b| {
        let a = a.as_float().unwrap_or(f64::NAN);
        let b = b.as_float().unwrap_or(f64::NAN);
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ if descending => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
            _ => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        }
    });
    res
}

fn label_replace(vector: Vector, dst: &str, replacement: &str, src: &str, regex: &str) -> RuntimeResult<Vector> {
    let re = Regex::new(&format!("^(?:{regex})$")).map_err(|e| {
        RuntimeError::ArgumentError(format!(
            "invalid regular expression in label_replace(): {regex}: {e}"
        ))
    })?;
    if !is_valid_label_name(dst) {
        return Err(RuntimeError::ArgumentError(format!(
            "invalid destination label name in label_replace(): {dst}"
        )));
    }
    let res = vector
        .into_iter()
        .map(|mut s| {
            let src_value = s.metric.get_or_empty(src).to_string();
            if let Some(caps) = re.captures(&src_value) {
                let mut value = String::new();
                caps.expand(replacement, &mut value);
                s.metric = LabelsBuilder::new(&s.metric).set(dst, &value).labels();
            }
            s
        })
        .collect();
    Ok(res)
}

fn label_join(vector: Vector, dst: &str, separator: &str, src_labels: &[String]) -> RuntimeResult<Vector> {
    if !is_valid_label_name(dst) {
        return Err(RuntimeError::ArgumentError(format!(
            "invalid destination label name in label_join(): {dst}"
        )));
    }
    for name in src_labels {
        if !is_valid_label_name(name) {
            return Err(RuntimeError::ArgumentError(format!(
                "invalid source label name in label_join(): {name}"
            )));
        }
    }
    let res = vector
        .into_iter()
        .map(|mut s| {
            let value = src_labels
                .iter()
                .map(|name| s.metric.get_or_empty(name))
                .join(separator);
            s.metric = LabelsBuilder::new(&s.metric).set(dst, &value).labels();
            s
        })
        .collect();
    Ok(res)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use promql_parser::parser::parse;

    use crate::types::StringValue;

    use super::*;

    fn call(q: &str) -> Call {
        match parse(q).unwrap() {
            Expr::Call(call) => call,
            other => panic!("expected a call, got {other:?}"),
        }
    }

    fn sample(pairs: &[(&str, &str)], v: f64) -> Sample {
        Sample::float(Labels::from_pairs(pairs), 0, v)
    }

    fn string(v: &str) -> QueryValue {
        QueryValue::String(StringValue { t: 0, v: v.to_string() })
    }

    fn scalar(v: f64) -> QueryValue {
        QueryValue::Scalar(Scalar { t: 0, v })
    }

    fn floats(value: QueryValue) -> Vec<f64> {
        value
            .into_vector()
            .unwrap()
            .iter()
            .map(|s| s.as_float().unwrap())
            .collect()
    }

    #[test_case("abs(x)", -2.5, 2.5)]
    #[test_case("ceil(x)", 1.2, 2.0)]
    #[test_case("floor(x)", 1.8, 1.0)]
    #[test_case("sqrt(x)", 16.0, 4.0)]
    #[test_case("sgn(x)", -3.0, -1.0)]
    #[test_case("log2(x)", 8.0, 3.0)]
    #[test_case("round(x)", 2.5, 3.0)]
    #[test_case("round(x)", -2.5, -2.0)]
    fn math_functions(q: &str, input: f64, expected: f64) {
        let input = QueryValue::Vector(vec![sample(&[("__name__", "x")], input)]);
        let res = eval_transform(&call(q), vec![input], 1000).unwrap();
        let vector = res.into_vector().unwrap();
        assert_eq!(vector[0].as_float(), Some(expected));
        assert_eq!(vector[0].metric.metric_name(), None);
        assert_eq!(vector[0].t, 1000);
    }

    #[test]
    fn round_to_nearest() {
        let input = QueryValue::Vector(vec![sample(&[], 12.0)]);
        let res = eval_transform(&call("round(x, 5)"), vec![input, scalar(5.0)], 0).unwrap();
        assert_eq!(floats(res), vec![10.0]);
    }

    #[test]
    fn clamp_with_inverted_bounds_is_empty() {
        let input = || QueryValue::Vector(vec![sample(&[], -1.0), sample(&[("a", "1")], 7.0)]);
        let res = eval_transform(&call("clamp(x, 0, 5)"), vec![input(), scalar(0.0), scalar(5.0)], 0).unwrap();
        assert_eq!(floats(res), vec![0.0, 5.0]);
        let res = eval_transform(&call("clamp(x, 5, 0)"), vec![input(), scalar(5.0), scalar(0.0)], 0).unwrap();
        assert_eq!(res, QueryValue::Vector(vec![]));
    }

    #[test]
    fn absent_uses_equality_matchers() {
        let c = call(r#"absent(nonexistent{job="a", instance=~"x.*", env="1", env="2"})"#);
        let res = eval_transform(&c, vec![QueryValue::Vector(vec![])], 10).unwrap();
        let vector = res.into_vector().unwrap();
        assert_eq!(vector.len(), 1);
        assert_eq!(vector[0].metric, Labels::from_pairs(&[("job", "a")]));
        assert_eq!(vector[0].as_float(), Some(1.0));
    }

    #[test]
    fn sort_puts_nan_first() {
        let input = || {
            QueryValue::Vector(vec![
                sample(&[("a", "1")], 2.0),
                sample(&[("a", "2")], f64::NAN),
                sample(&[("a", "3")], 1.0),
            ])
        };
        let asc = eval_transform(&call("sort(x)"), vec![input()], 0).unwrap();
        let names: Vec<String> = asc.into_vector().unwrap().iter().map(|s| s.metric.get_or_empty("a").to_string()).collect();
        assert_eq!(names, vec!["2", "3", "1"]);
        let desc = eval_transform(&call("sort_desc(x)"), vec![input()], 0).unwrap();
        let names: Vec<String> = desc.into_vector().unwrap().iter().map(|s| s.metric.get_or_empty("a").to_string()).collect();
        assert_eq!(names, vec!["2", "1", "3"]);
    }

    #[test]
    fn label_replace_expands_captures() {
        let c = call(r#"label_replace(up, "host", "$1", "instance", "(.*):.*")"#);
        let input = QueryValue::Vector(vec![sample(&[("__name__", "up"), ("instance", "web:9090")], 1.0)]);
        let args = vec![input, string("host"), string("$1"), string("instance"), string("(.*):.*")];
        let vector = eval_transform(&c, args, 0).unwrap().into_vector().unwrap();
        assert_eq!(vector[0].metric.get("host"), Some("web"));
        assert_eq!(vector[0].metric.metric_name(), Some("up"));
    }

    #[test]
    fn label_replace_rejects_bad_arguments() {
        let c = call(r#"label_replace(up, "host", "$1", "instance", "(.*")"#);
        let args = vec![QueryValue::Vector(vec![]), string("host"), string("$1"), string("instance"), string("(.*")];
        assert!(eval_transform(&c, args, 0).is_err());
        let args = vec![QueryValue::Vector(vec![]), string("1host"), string("$1"), string("instance"), string(".*")];
        assert!(eval_transform(&c, args, 0).is_err());
    }

    #[test]
    fn label_join_concatenates() {
        let c = call(r#"label_join(up, "dst", "-", "a", "b")"#);
        let input = QueryValue::Vector(vec![sample(&[("a", "x"), ("b", "y")], 1.0)]);
        let args = vec![input, string("dst"), string("-"), string("a"), string("b")];
        let vector = eval_transform(&c, args, 0).unwrap().into_vector().unwrap();
        assert_eq!(vector[0].metric.get("dst"), Some("x-y"));
    }

    #[test]
    fn scalar_of_multiple_samples_is_nan() {
        let input = QueryValue::Vector(vec![sample(&[("a", "1")], 1.0), sample(&[("a", "2")], 2.0)]);
        let res = eval_transform(&call("scalar(x)"), vec![input], 0).unwrap();
        assert!(res.as_scalar().unwrap().v.is_nan());
    }
}

use std::collections::BTreeMap;

use tracing::trace;

use promql_common::hash::{FastHashMap, FastHashSet};
use promql_common::label::Labels;
use promql_parser::ast::{AggregateExpr, AtModifier, Call, Expr, MatrixSelector, SubqueryExpr, ValueType, VectorSelector};
use promql_parser::functions::BuiltinFunction;

use crate::context::QueryContext;
use crate::execution::binary::eval_binary;
use crate::execution::stats::QuerySamples;
use crate::functions::aggregate::eval_aggregate;
use crate::functions::rollup::{eval_rollup, RollupFuncArg};
use crate::functions::transform::{absent_labels, eval_transform};
use crate::runtime_error::{context_done, RuntimeError, RuntimeResult};
use crate::types::{
    is_stale_nan, Annotations, FPoint, HPoint, Matrix, QueryValue, Sample, SampleValue, Scalar, Series, StringValue,
    Vector,
};

/// Series selected for every selector of a statement, keyed by the address
/// of the selector node.
pub(crate) type SelectedSeries = FastHashMap<usize, Vec<Series>>;

pub(crate) fn selector_key(vs: &VectorSelector) -> usize {
    vs as *const VectorSelector as usize
}

/// Parameters of one evaluation. Times are in milliseconds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EvalParams {
    pub start: i64,
    pub end: i64,
    /// 0 for instant queries.
    pub interval: i64,
    pub lookback_delta: i64,
    pub no_step_subquery_interval: i64,
    pub max_samples: usize,
    pub enable_per_step_stats: bool,
}

struct CachedValue {
    value: QueryValue,
    /// Samples read from storage when the value was computed.
    scanned: i64,
}

/// Tree-walking interpreter. Every value returned by [`Evaluator::eval`] is
/// counted as held in memory; the consumer releases it once its own output
/// has been accounted for.
pub(crate) struct Evaluator<'a> {
    ctx: &'a QueryContext,
    series: &'a SelectedSeries,
    params: EvalParams,
    current_samples: usize,
    step_samples: i64,
    samples: QuerySamples,
    warnings: Annotations,
    step_invariant_cache: FastHashMap<usize, CachedValue>,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a QueryContext, series: &'a SelectedSeries, params: EvalParams) -> Self {
        Self {
            ctx,
            series,
            params,
            current_samples: 0,
            step_samples: 0,
            samples: QuerySamples::new(params.enable_per_step_stats),
            warnings: Annotations::default(),
            step_invariant_cache: FastHashMap::default(),
        }
    }

    /// Sample statistics and warnings gathered so far.
    pub fn finish(self) -> (QuerySamples, Annotations) {
        (self.samples, self.warnings)
    }

    /// Evaluates the statement once, at the start time.
    pub fn eval_instant(&mut self, expr: &Expr) -> RuntimeResult<QueryValue> {
        let ts = self.params.start;
        self.step_samples = 0;
        let value = self.eval(expr, ts)?;
        self.samples.record_step(ts, self.samples.total_samples);
        if let QueryValue::Vector(v) = &value {
            check_unique_labelsets(v)?;
        }
        Ok(value)
    }

    /// Evaluates the statement at every step and stitches the per step
    /// results into series.
    pub fn eval_range(&mut self, expr: &Expr) -> RuntimeResult<Matrix> {
        let EvalParams {
            start, end, interval, ..
        } = self.params;
        if interval <= 0 {
            return Err(RuntimeError::General("zero or negative query resolution step widths are not accepted".to_string()));
        }
        let mut result: BTreeMap<Labels, Series> = BTreeMap::new();
        let mut ts = start;
        while ts <= end {
            context_done(self.ctx, "expression evaluation")?;
            self.step_samples = 0;
            let value = self.eval(expr, ts)?;
            self.samples.record_step(ts, self.step_samples);
            match value {
                QueryValue::Scalar(s) => {
                    result
                        .entry(Labels::empty())
                        .or_insert_with(|| Series::new(Labels::empty()))
                        .push(ts, SampleValue::Float(s.v));
                }
                QueryValue::Vector(v) => {
                    check_unique_labelsets(&v)?;
                    for sample in v {
                        result
                            .entry(sample.metric.clone())
                            .or_insert_with(|| Series::new(sample.metric))
                            .push(ts, sample.value);
                    }
                }
                other => {
                    return Err(RuntimeError::General(format!(
                        "invalid expression type {} for range query, must be scalar or instant vector",
                        other.value_type()
                    )))
                }
            }
            ts += interval;
        }
        Ok(result.into_values().collect())
    }

    fn add_samples(&mut self, n: usize) -> RuntimeResult<()> {
        self.current_samples += n;
        if self.current_samples > self.params.max_samples {
            return Err(RuntimeError::TooManySamples("query execution".to_string()));
        }
        if self.current_samples > self.samples.peak_samples {
            self.samples.peak_samples = self.current_samples;
        }
        Ok(())
    }

    fn release(&mut self, n: usize) {
        self.current_samples = self.current_samples.saturating_sub(n);
    }

    fn count_scanned(&mut self, n: usize) {
        self.step_samples += n as i64;
        self.samples.total_samples += n as i64;
    }

    fn at_timestamp(&self, at: &Option<AtModifier>, ts: i64) -> i64 {
        match at {
            Some(AtModifier::Timestamp(t)) => *t,
            Some(AtModifier::Start) => self.params.start,
            Some(AtModifier::End) => self.params.end,
            None => ts,
        }
    }

    fn selected(&self, vs: &VectorSelector) -> &'a [Series] {
        let series: &'a SelectedSeries = self.series;
        series.get(&selector_key(vs)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn eval(&mut self, expr: &Expr, ts: i64) -> RuntimeResult<QueryValue> {
        match expr {
            Expr::NumberLiteral(v) => {
                self.add_samples(1)?;
                Ok(QueryValue::Scalar(Scalar { t: ts, v: *v }))
            }
            Expr::StringLiteral(s) => Ok(QueryValue::String(StringValue { t: ts, v: s.clone() })),
            Expr::Paren(inner) => self.eval(inner, ts),
            Expr::StepInvariant(inner) => self.eval_step_invariant(expr, inner, ts),
            Expr::VectorSelector(vs) => Ok(QueryValue::Vector(self.eval_vector_selector(vs, ts, false)?)),
            Expr::MatrixSelector(ms) => Ok(QueryValue::Matrix(self.eval_matrix_selector(ms, ts)?)),
            Expr::Subquery(sq) => Ok(QueryValue::Matrix(self.eval_subquery(sq, ts)?)),
            Expr::Call(call) if call.func.is_range_function() => self.eval_range_function(call, ts),
            Expr::Call(call) => self.eval_call(call, ts),
            Expr::Aggregate(agg) => self.eval_aggregate(agg, ts),
            Expr::Unary(inner) => self.eval_unary(inner, ts),
            Expr::Binary(be) => {
                let lhs = self.eval(&be.lhs, ts)?;
                let rhs = self.eval(&be.rhs, ts)?;
                let input_size = lhs.size() + rhs.size();
                let res = eval_binary(be, lhs, rhs, ts, &mut self.warnings)?;
                if let QueryValue::Vector(v) = &res {
                    check_unique_labelsets(v)?;
                }
                self.add_samples(res.size())?;
                self.release(input_size);
                Ok(res)
            }
        }
    }

    /// The wrapped expression yields the same value at every step. It is
    /// computed once and replayed, the replay counting the samples the first
    /// evaluation read.
    fn eval_step_invariant(&mut self, node: &Expr, inner: &Expr, ts: i64) -> RuntimeResult<QueryValue> {
        let key = node as *const Expr as usize;
        if let Some(cached) = self.step_invariant_cache.get(&key) {
            let scanned = cached.scanned;
            let value = restamp(cached.value.clone(), ts);
            self.add_samples(value.size())?;
            self.step_samples += scanned;
            self.samples.total_samples += scanned;
            return Ok(value);
        }
        let before = self.samples.total_samples;
        let value = self.eval(inner, ts)?;
        let scanned = self.samples.total_samples - before;
        self.step_invariant_cache.insert(
            key,
            CachedValue {
                value: value.clone(),
                scanned,
            },
        );
        Ok(value)
    }

    /// Latest sample of every selected series inside the lookback window.
    /// Samples are stamped with `ts` unless `keep_sample_time` is set.
    fn eval_vector_selector(&mut self, vs: &VectorSelector, ts: i64, keep_sample_time: bool) -> RuntimeResult<Vector> {
        let ref_ts = self.at_timestamp(&vs.at, ts) - vs.offset;
        let mint = ref_ts - self.params.lookback_delta;
        let mut res = vec![];
        for series in self.selected(vs) {
            if let Some((t, value)) = latest_point(series, mint, ref_ts) {
                let t = if keep_sample_time { t } else { ts };
                res.push(Sample {
                    metric: series.metric.clone(),
                    t,
                    value,
                });
            }
        }
        let size: usize = res.iter().map(Sample::size).sum();
        self.add_samples(size)?;
        self.count_scanned(size);
        Ok(res)
    }

    fn matrix_window(&self, ms: &MatrixSelector, ts: i64) -> (i64, i64) {
        let vs = &ms.vector_selector;
        let ref_ts = self.at_timestamp(&vs.at, ts) - vs.offset;
        (ref_ts - ms.range, ref_ts)
    }

    fn eval_matrix_selector(&mut self, ms: &MatrixSelector, ts: i64) -> RuntimeResult<Matrix> {
        let (mint, maxt) = self.matrix_window(ms, ts);
        let mut res = vec![];
        for series in self.selected(&ms.vector_selector) {
            let (floats, histograms) = window_points(series, mint, maxt);
            if floats.is_empty() && histograms.is_empty() {
                continue;
            }
            res.push(Series {
                metric: series.metric.clone(),
                floats,
                histograms,
            });
        }
        let size: usize = res.iter().map(Series::size).sum();
        self.add_samples(size)?;
        self.count_scanned(size);
        Ok(res)
    }

    /// Evaluates the inner expression at every subquery step inside the
    /// window. Steps are aligned to multiples of the step width.
    fn eval_subquery(&mut self, sq: &SubqueryExpr, ts: i64) -> RuntimeResult<Matrix> {
        let ref_ts = self.at_timestamp(&sq.at, ts) - sq.offset;
        let step = sq.step.unwrap_or(self.params.no_step_subquery_interval);
        if step <= 0 {
            return Err(RuntimeError::General("subquery step must be positive".to_string()));
        }
        let bound = ref_ts - sq.range;
        let mut start = step * (bound / step);
        if start < bound {
            start += step;
        }
        trace!(start, end = ref_ts, step, "subquery");

        let mut series: BTreeMap<Labels, Series> = BTreeMap::new();
        let mut t = start;
        while t <= ref_ts {
            context_done(self.ctx, "expression evaluation")?;
            match self.eval(&sq.expr, t)? {
                QueryValue::Scalar(s) => {
                    series
                        .entry(Labels::empty())
                        .or_insert_with(|| Series::new(Labels::empty()))
                        .push(t, SampleValue::Float(s.v));
                }
                QueryValue::Vector(v) => {
                    check_unique_labelsets(&v)?;
                    for sample in v {
                        series
                            .entry(sample.metric.clone())
                            .or_insert_with(|| Series::new(sample.metric))
                            .push(t, sample.value);
                    }
                }
                other => {
                    return Err(RuntimeError::General(format!(
                        "subquery is only allowed on instant vector or scalar, got {}",
                        other.value_type()
                    )))
                }
            }
            t += step;
        }
        Ok(series.into_values().collect())
    }

    fn subquery_window(&self, sq: &SubqueryExpr, ts: i64) -> (i64, i64) {
        let ref_ts = self.at_timestamp(&sq.at, ts) - sq.offset;
        (ref_ts - sq.range, ref_ts)
    }

    fn eval_range_function(&mut self, call: &Call, ts: i64) -> RuntimeResult<QueryValue> {
        let func = call.func;
        let matrix_idx = call
            .args
            .iter()
            .position(|arg| arg.value_type() == ValueType::RangeVector)
            .ok_or_else(|| RuntimeError::ArgumentError(format!("{}: expected a range vector argument", func.name())))?;

        let mut params = Vec::with_capacity(call.args.len());
        let mut params_size = 0;
        for (i, arg) in call.args.iter().enumerate() {
            if i == matrix_idx {
                continue;
            }
            let value = self.eval(arg, ts)?;
            params_size += value.size();
            params.push(value.as_scalar().map_or(f64::NAN, |s| s.v));
        }

        let keep_name = func.keeps_metric_name();
        let mut res = vec![];
        let mut has_points = false;
        match call.args[matrix_idx].unwrap_parens() {
            // selected series are streamed one at a time
            Expr::MatrixSelector(ms) => {
                let (mint, maxt) = self.matrix_window(ms, ts);
                for series in self.selected(&ms.vector_selector) {
                    let (floats, histograms) = window_points(series, mint, maxt);
                    if floats.is_empty() && histograms.is_empty() {
                        continue;
                    }
                    has_points = true;
                    let size = floats.len() + histograms.iter().map(HPoint::size).sum::<usize>();
                    self.add_samples(size)?;
                    self.count_scanned(size);
                    let rfa = RollupFuncArg {
                        floats: &floats,
                        histograms: &histograms,
                        window_start: mint,
                        window_end: maxt,
                    };
                    if let Some(value) = eval_rollup(func, &params, &rfa, &mut self.warnings)? {
                        self.add_samples(value.size())?;
                        res.push(Sample {
                            metric: output_labels(&series.metric, keep_name),
                            t: ts,
                            value,
                        });
                    }
                    self.release(size);
                }
            }
            Expr::Subquery(sq) => {
                let (mint, maxt) = self.subquery_window(sq, ts);
                let matrix = self.eval(&call.args[matrix_idx], ts)?.into_matrix().ok_or_else(|| {
                    RuntimeError::General(format!("{}: subquery did not produce a range vector", func.name()))
                })?;
                let matrix_size: usize = matrix.iter().map(Series::size).sum();
                for series in &matrix {
                    if series.is_empty() {
                        continue;
                    }
                    has_points = true;
                    // each series is copied into the function's window buffer
                    let size = series.size();
                    self.add_samples(size)?;
                    let rfa = RollupFuncArg {
                        floats: &series.floats,
                        histograms: &series.histograms,
                        window_start: mint,
                        window_end: maxt,
                    };
                    if let Some(value) = eval_rollup(func, &params, &rfa, &mut self.warnings)? {
                        self.add_samples(value.size())?;
                        res.push(Sample {
                            metric: output_labels(&series.metric, keep_name),
                            t: ts,
                            value,
                        });
                    }
                    self.release(size);
                }
                self.release(matrix_size);
            }
            other => {
                return Err(RuntimeError::ArgumentError(format!(
                    "{}: unexpected range vector argument {other}",
                    func.name()
                )))
            }
        }
        self.release(params_size);

        if func == BuiltinFunction::AbsentOverTime {
            res.clear();
            if !has_points {
                self.add_samples(1)?;
                res.push(Sample::float(absent_labels(&call.args[matrix_idx]), ts, 1.0));
            }
        }
        check_unique_labelsets(&res)?;
        Ok(QueryValue::Vector(res))
    }

    fn eval_call(&mut self, call: &Call, ts: i64) -> RuntimeResult<QueryValue> {
        let mut args = Vec::with_capacity(call.args.len());
        let mut input_size = 0;
        for arg in &call.args {
            let value = match (call.func, arg.unwrap_parens()) {
                // timestamp() reports when the sample was written, not the
                // evaluation time
                (BuiltinFunction::Timestamp, Expr::VectorSelector(vs)) => {
                    QueryValue::Vector(self.eval_vector_selector(vs, ts, true)?)
                }
                _ => self.eval(arg, ts)?,
            };
            input_size += value.size();
            args.push(value);
        }
        let res = eval_transform(call, args, ts)?;
        if let QueryValue::Vector(v) = &res {
            check_unique_labelsets(v)?;
        }
        self.add_samples(res.size())?;
        self.release(input_size);
        Ok(res)
    }

    fn eval_aggregate(&mut self, agg: &AggregateExpr, ts: i64) -> RuntimeResult<QueryValue> {
        let param = match &agg.param {
            Some(param) => Some(self.eval(param, ts)?),
            None => None,
        };
        let param_size = param.as_ref().map_or(0, QueryValue::size);
        let input = self.eval(&agg.expr, ts)?;
        let input_size = input.size();
        let input = input.into_vector().ok_or_else(|| {
            RuntimeError::General(format!("{}: expected an instant vector argument", agg.op.name()))
        })?;
        let res = eval_aggregate(agg, param, input, ts, &mut self.warnings)?;
        let res = QueryValue::Vector(res);
        self.add_samples(res.size())?;
        self.release(input_size + param_size);
        Ok(res)
    }

    fn eval_unary(&mut self, inner: &Expr, ts: i64) -> RuntimeResult<QueryValue> {
        match self.eval(inner, ts)? {
            QueryValue::Scalar(s) => Ok(QueryValue::Scalar(Scalar { t: s.t, v: -s.v })),
            QueryValue::Vector(v) => {
                let res: Vector = v
                    .into_iter()
                    .map(|s| {
                        let value = match s.value {
                            SampleValue::Float(f) => SampleValue::Float(-f),
                            SampleValue::Histogram(h) => SampleValue::Histogram(h.mul(-1.0)),
                        };
                        Sample {
                            metric: s.metric.without_metric_name(),
                            t: s.t,
                            value,
                        }
                    })
                    .collect();
                check_unique_labelsets(&res)?;
                Ok(QueryValue::Vector(res))
            }
            other => Err(RuntimeError::General(format!(
                "unary negation is not defined for {}",
                other.value_type()
            ))),
        }
    }
}

fn output_labels(metric: &Labels, keep_name: bool) -> Labels {
    if keep_name {
        metric.clone()
    } else {
        metric.without_metric_name()
    }
}

/// Moves instant values to `ts`. Range vectors keep their point times.
fn restamp(value: QueryValue, ts: i64) -> QueryValue {
    match value {
        QueryValue::Scalar(s) => QueryValue::Scalar(Scalar { t: ts, v: s.v }),
        QueryValue::String(s) => QueryValue::String(StringValue { t: ts, v: s.v }),
        QueryValue::Vector(v) => QueryValue::Vector(v.into_iter().map(|s| Sample { t: ts, ..s }).collect()),
        m @ QueryValue::Matrix(_) => m,
    }
}

pub(crate) fn check_unique_labelsets(vector: &[Sample]) -> RuntimeResult<()> {
    if vector.len() < 2 {
        return Ok(());
    }
    let mut seen = FastHashSet::default();
    for sample in vector {
        if !seen.insert(sample.metric.signature()) {
            return Err(RuntimeError::General(
                "vector cannot contain metrics with the same labelset".to_string(),
            ));
        }
    }
    Ok(())
}

/// Newest point with `mint <= t <= maxt`. A stale marker hides the series.
fn latest_point(series: &Series, mint: i64, maxt: i64) -> Option<(i64, SampleValue)> {
    let float = series.floats[..series.floats.partition_point(|p| p.t <= maxt)]
        .last()
        .filter(|p| p.t >= mint);
    let hist = series.histograms[..series.histograms.partition_point(|p| p.t <= maxt)]
        .last()
        .filter(|p| p.t >= mint);
    let (t, value) = match (float, hist) {
        (Some(f), Some(h)) if h.t > f.t => (h.t, SampleValue::Histogram(h.h.clone())),
        (Some(f), _) => (f.t, SampleValue::Float(f.f)),
        (None, Some(h)) => (h.t, SampleValue::Histogram(h.h.clone())),
        (None, None) => return None,
    };
    let stale = match &value {
        SampleValue::Float(f) => is_stale_nan(*f),
        SampleValue::Histogram(h) => is_stale_nan(h.sum),
    };
    if stale {
        None
    } else {
        Some((t, value))
    }
}

/// Points with `mint <= t <= maxt`, stale markers dropped.
fn window_points(series: &Series, mint: i64, maxt: i64) -> (Vec<FPoint>, Vec<HPoint>) {
    let floats = &series.floats;
    let lo = floats.partition_point(|p| p.t < mint);
    let hi = floats.partition_point(|p| p.t <= maxt);
    let floats = floats[lo..hi.max(lo)]
        .iter()
        .filter(|p| !is_stale_nan(p.f))
        .copied()
        .collect();

    let hists = &series.histograms;
    let lo = hists.partition_point(|p| p.t < mint);
    let hi = hists.partition_point(|p| p.t <= maxt);
    let histograms = hists[lo..hi.max(lo)]
        .iter()
        .filter(|p| !is_stale_nan(p.h.sum))
        .cloned()
        .collect();
    (floats, histograms)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use promql_parser::parser::parse;

    use crate::execution::preprocess::preprocess_expr;
    use crate::types::stale_nan;

    use super::*;

    fn series(name: &str, instance: &str, points: &[(i64, f64)]) -> Series {
        let floats = points.iter().map(|(t, f)| FPoint::new(*t, *f)).collect();
        Series::with_floats(Labels::from_pairs(&[("__name__", name), ("instance", instance)]), floats)
    }

    /// Registers `data` as the selection result of every selector in `expr`
    /// whose metric name matches.
    fn select_all(expr: &Expr, data: &[Series]) -> SelectedSeries {
        let mut selected = SelectedSeries::default();
        promql_parser::ast::walk(expr, &mut |node, _| {
            let vs = match node {
                Expr::VectorSelector(vs) => vs,
                Expr::MatrixSelector(ms) => &ms.vector_selector,
                _ => return,
            };
            let matching = data
                .iter()
                .filter(|s| promql_parser::label::matches_labels(&vs.matchers, &s.metric))
                .cloned()
                .collect();
            selected.insert(selector_key(vs), matching);
        });
        selected
    }

    fn params(start: i64, end: i64, interval: i64) -> EvalParams {
        EvalParams {
            start,
            end,
            interval,
            lookback_delta: 300_000,
            no_step_subquery_interval: 60_000,
            max_samples: 1000,
            enable_per_step_stats: true,
        }
    }

    fn data() -> Vec<Series> {
        vec![
            series("foo", "a", &[(0, 1.0), (10_000, 2.0), (20_000, 3.0)]),
            series("foo", "b", &[(0, 10.0), (10_000, stale_nan())]),
        ]
    }

    #[test]
    fn instant_selector_honors_staleness() {
        let expr = parse("foo").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(15_000, 15_000, 0));
        let res = ev.eval_instant(&expr).unwrap().into_vector().unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].as_float(), Some(2.0));
        assert_eq!(res[0].t, 15_000);
        let (samples, _) = ev.finish();
        assert_eq!(samples.total_samples, 1);
        assert_eq!(samples.peak_samples, 1);
    }

    #[test]
    fn lookback_window_is_closed() {
        let expr = parse("foo").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut p = params(25_000, 25_000, 0);
        p.lookback_delta = 5_000;
        let mut ev = Evaluator::new(&ctx, &selected, p);
        let res = ev.eval_instant(&expr).unwrap().into_vector().unwrap();
        assert_eq!(res[0].as_float(), Some(3.0));
    }

    #[test]
    fn range_query_stitches_series() {
        let expr = parse("foo").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(0, 20_000, 10_000));
        let res = ev.eval_range(&expr).unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(
            res[0].floats,
            vec![FPoint::new(0, 1.0), FPoint::new(10_000, 2.0), FPoint::new(20_000, 3.0)]
        );
        assert_eq!(res[1].floats, vec![FPoint::new(0, 10.0)]);
        let (samples, _) = ev.finish();
        assert_eq!(samples.total_samples, 4);
        assert_eq!(
            samples.total_samples_per_step,
            vec![(0, 2), (10_000, 1), (20_000, 1)]
        );
    }

    #[test]
    fn rate_over_matrix_selector() {
        let expr = parse("rate(foo[20s])").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(20_000, 20_000, 0));
        let res = ev.eval_instant(&expr).unwrap().into_vector().unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].metric, Labels::from_pairs(&[("instance", "a")]));
        assert_eq!(res[0].as_float(), Some(0.1));
        let (samples, _) = ev.finish();
        // 3 points of a, 1 of b
        assert_eq!(samples.total_samples, 4);
        assert_eq!(samples.peak_samples, 4);
    }

    #[test]
    fn subquery_steps_are_aligned() {
        let expr = parse("foo[20s:10s]").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(25_000, 25_000, 0));
        let res = ev.eval_instant(&expr).unwrap().into_matrix().unwrap();
        // instance b is stale at both steps
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].floats, vec![FPoint::new(10_000, 2.0), FPoint::new(20_000, 3.0)]);
    }

    #[test]
    fn step_invariant_is_evaluated_once() {
        let expr = preprocess_expr(parse("foo @ 20").unwrap(), 0, 20_000);
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(0, 20_000, 10_000));
        let res = ev.eval_range(&expr).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(
            res[0].floats,
            vec![FPoint::new(0, 3.0), FPoint::new(10_000, 3.0), FPoint::new(20_000, 3.0)]
        );
        let (samples, _) = ev.finish();
        assert_eq!(samples.total_samples, 3);
    }

    #[test]
    fn too_many_samples() {
        let expr = parse("foo[1m]").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut p = params(20_000, 20_000, 0);
        p.max_samples = 3;
        let mut ev = Evaluator::new(&ctx, &selected, p);
        let err = ev.eval_instant(&expr).unwrap_err();
        assert_eq!(err, RuntimeError::TooManySamples("query execution".to_string()));
    }

    #[test]
    fn duplicate_labelsets_are_rejected() {
        let data = vec![series("foo", "a", &[(0, 1.0)]), series("bar", "a", &[(0, 2.0)])];
        let expr = parse(r#"-{__name__=~"foo|bar"}"#).unwrap();
        let selected = select_all(&expr, &data);
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(0, 0, 0));
        let err = ev.eval_instant(&expr).unwrap_err();
        assert!(err.to_string().contains("same labelset"));
    }

    #[test]
    fn timestamp_reports_sample_time() {
        let expr = parse("timestamp(foo)").unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(25_000, 25_000, 0));
        let res = ev.eval_instant(&expr).unwrap().into_vector().unwrap();
        assert_eq!(res[0].as_float(), Some(20.0));
        assert_eq!(res[0].t, 25_000);
    }

    #[test]
    fn absent_over_time_without_points() {
        let expr = parse(r#"absent_over_time(nonexistent{job="x"}[1m])"#).unwrap();
        let selected = select_all(&expr, &data());
        let ctx = QueryContext::background();
        let mut ev = Evaluator::new(&ctx, &selected, params(0, 0, 0));
        let res = ev.eval_instant(&expr).unwrap().into_vector().unwrap();
        assert_eq!(res, vec![Sample::float(Labels::from_pairs(&[("job", "x")]), 0, 1.0)]);
    }
}

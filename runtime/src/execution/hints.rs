use promql_parser::ast::{walk, AtModifier, Expr, VectorSelector};

use crate::provider::SelectHints;

/// Statement parameters the hints of a selector depend on. All values are in
/// milliseconds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HintParams {
    pub start: i64,
    pub end: i64,
    /// 0 for instant queries.
    pub interval: i64,
    pub lookback_delta: i64,
    pub no_step_subquery_interval: i64,
}

impl HintParams {
    fn at_timestamp(&self, at: &AtModifier) -> i64 {
        match at {
            AtModifier::Timestamp(ts) => *ts,
            AtModifier::Start => self.start,
            AtModifier::End => self.end,
        }
    }
}

/// Computes the hints of every selector of the tree, in walk order.
pub(crate) fn collect_select_hints<'a>(
    expr: &'a Expr,
    params: &HintParams,
) -> Vec<(&'a VectorSelector, SelectHints)> {
    let mut res = vec![];
    walk(expr, &mut |node, path| match node {
        Expr::VectorSelector(vs) => {
            res.push((vs, selector_hints(params, vs, path, 0)));
        }
        Expr::MatrixSelector(ms) => {
            let mut full_path = path.to_vec();
            full_path.push(node);
            let hints = selector_hints(params, &ms.vector_selector, &full_path, ms.range);
            res.push((&ms.vector_selector, hints));
        }
        _ => {}
    });
    res
}

fn selector_hints(params: &HintParams, vs: &VectorSelector, path: &[&Expr], eval_range: i64) -> SelectHints {
    let (start, end) = time_range_for_selector(params, vs, path, eval_range);
    let mut step = last_subquery_interval(path, params.no_step_subquery_interval);
    if step == 0 {
        step = params.interval;
    }
    let (by, grouping) = extract_groups_from_path(path);
    SelectHints {
        start,
        end,
        step,
        range: eval_range,
        func: extract_func_from_path(path),
        by,
        grouping,
    }
}

/// Accumulated offset and range of the enclosing subqueries. A pinned subquery
/// discards what its ancestors contributed and supplies the evaluation time.
fn subquery_times(params: &HintParams, path: &[&Expr]) -> (i64, i64, Option<i64>) {
    let mut offset = 0;
    let mut range = 0;
    let mut ts = None;
    for node in path {
        if let Expr::Subquery(sq) = node {
            offset += sq.offset;
            range += sq.range;
            if let Some(at) = &sq.at {
                offset = sq.offset;
                range = sq.range;
                ts = Some(params.at_timestamp(at));
            }
        }
    }
    (offset, range, ts)
}

fn time_range_for_selector(
    params: &HintParams,
    vs: &VectorSelector,
    path: &[&Expr],
    eval_range: i64,
) -> (i64, i64) {
    let (mut start, mut end) = (params.start, params.end);
    let (subq_offset, subq_range, subq_ts) = subquery_times(params, path);
    if let Some(ts) = subq_ts {
        start = ts;
        end = ts;
    }
    match &vs.at {
        Some(at) => {
            let ts = params.at_timestamp(at);
            start = ts;
            end = ts;
        }
        None => {
            start = start - subq_offset - subq_range;
            end -= subq_offset;
        }
    }
    if eval_range == 0 {
        start -= params.lookback_delta;
    } else {
        start -= eval_range;
    }
    start -= vs.offset;
    end -= vs.offset;
    (start, end)
}

fn last_subquery_interval(path: &[&Expr], no_step_interval: i64) -> i64 {
    let mut interval = 0;
    for node in path {
        if let Expr::Subquery(sq) = node {
            interval = sq.step.unwrap_or(no_step_interval);
        }
    }
    interval
}

/// Name of the nearest enclosing function or aggregation, unless a binary
/// operator comes first.
fn extract_func_from_path(path: &[&Expr]) -> String {
    for node in path.iter().rev() {
        match node {
            Expr::Aggregate(agg) => return agg.op.name().to_string(),
            Expr::Call(call) => return call.func.name().to_string(),
            Expr::Binary(_) => return String::new(),
            _ => {}
        }
    }
    String::new()
}

fn extract_groups_from_path(path: &[&Expr]) -> (bool, Vec<String>) {
    match path.last() {
        Some(Expr::Aggregate(agg)) => (!agg.without, agg.grouping.clone()),
        _ => (false, vec![]),
    }
}

/// Smallest start and largest end over all hints.
pub(crate) fn min_max_time(hints: &[(&VectorSelector, SelectHints)]) -> Option<(i64, i64)> {
    let mint = hints.iter().map(|(_, h)| h.start).min()?;
    let maxt = hints.iter().map(|(_, h)| h.end).max()?;
    Some((mint, maxt))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use promql_parser::label::Matcher;
    use promql_parser::parser::parse;

    use crate::context::QueryContext;
    use crate::execution::{Engine, EngineOpts};
    use crate::provider::{Querier, Queryable, SeriesSet, VecSeriesSet};
    use crate::runtime_error::RuntimeResult;
    use crate::types::Annotations;

    use super::*;

    fn params(start: i64, end: i64, interval: i64) -> HintParams {
        HintParams {
            start,
            end,
            interval,
            lookback_delta: 5_000,
            no_step_subquery_interval: 60_000,
        }
    }

    #[test]
    fn func_stops_at_binary_operator() {
        let expr = parse("sum(foo + rate(bar[1m]))").unwrap();
        let hints = collect_select_hints(&expr, &params(10_000, 10_000, 0));
        assert_eq!(hints[0].1.func, "");
        assert_eq!(hints[1].1.func, "rate");
        assert!(hints[1].1.grouping.is_empty());
    }

    #[test]
    fn missing_subquery_step_uses_default_interval() {
        let expr = parse("max_over_time(foo[5m:])").unwrap();
        let hints = collect_select_hints(&expr, &params(600_000, 600_000, 0));
        assert_eq!(
            hints[0].1,
            SelectHints {
                start: 295_000,
                end: 600_000,
                step: 60_000,
                func: "max_over_time".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn unresolved_start_and_end_use_statement_bounds() {
        let expr = parse("foo @ end()").unwrap();
        let hints = collect_select_hints(&expr, &params(10_000, 20_000, 1_000));
        assert_eq!((hints[0].1.start, hints[0].1.end), (15_000, 20_000));
    }

    #[test]
    fn min_max_covers_all_selectors() {
        let expr = parse("foo @ 50 + bar @ 250").unwrap();
        let hints = collect_select_hints(&expr, &params(100_000, 100_000, 0));
        assert_eq!(min_max_time(&hints), Some((45_000, 250_000)));
        assert_eq!(min_max_time(&[]), None);
    }

    /// Storage without data that keeps every request it receives.
    #[derive(Clone, Default)]
    struct HintRecorder {
        querier_range: Arc<Mutex<Option<(i64, i64)>>>,
        hints: Arc<Mutex<Vec<SelectHints>>>,
    }

    impl Queryable for HintRecorder {
        fn querier(&self, mint: i64, maxt: i64) -> RuntimeResult<Box<dyn Querier>> {
            *self.querier_range.lock().unwrap() = Some((mint, maxt));
            Ok(Box::new(self.clone()))
        }
    }

    impl Querier for HintRecorder {
        fn select(
            &self,
            _ctx: &QueryContext,
            _sort_series: bool,
            hints: &SelectHints,
            _matchers: &[Matcher],
        ) -> Box<dyn SeriesSet> {
            self.hints.lock().unwrap().push(hints.clone());
            Box::new(VecSeriesSet::new(vec![]))
        }

        fn label_values(&self, _name: &str, _matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)> {
            Ok((vec![], Annotations::default()))
        }

        fn label_names(&self, _matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)> {
            Ok((vec![], Annotations::default()))
        }
    }

    fn hint(start: i64, end: i64, step: i64) -> SelectHints {
        SelectHints {
            start,
            end,
            step,
            ..Default::default()
        }
    }

    fn func_hint(start: i64, end: i64, step: i64, range: i64, func: &str) -> SelectHints {
        SelectHints {
            start,
            end,
            step,
            range,
            func: func.to_string(),
            ..Default::default()
        }
    }

    fn grouped_hint(start: i64, end: i64, step: i64, func: &str, by: bool, grouping: &[&str]) -> SelectHints {
        SelectHints {
            start,
            end,
            step,
            func: func.to_string(),
            by,
            grouping: grouping.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }

    // instant queries
    #[test_case("foo", 10_000, None, vec![hint(5_000, 10_000, 0)]; "instant selector")]
    #[test_case("foo @ 15", 10_000, None, vec![hint(10_000, 15_000, 0)]; "instant selector pinned later")]
    #[test_case("foo @ 1", 10_000, None, vec![hint(-4_000, 1_000, 0)]; "instant selector pinned earlier")]
    #[test_case("foo[2m]", 200_000, None, vec![func_hint(80_000, 200_000, 0, 120_000, "")]; "matrix selector")]
    #[test_case("foo[2m] @ 180", 200_000, None, vec![func_hint(60_000, 180_000, 0, 120_000, "")]; "matrix selector pinned at 180")]
    #[test_case("foo[2m] @ 300", 200_000, None, vec![func_hint(180_000, 300_000, 0, 120_000, "")]; "matrix selector pinned at 300")]
    #[test_case("foo[2m] @ 60", 200_000, None, vec![func_hint(-60_000, 60_000, 0, 120_000, "")]; "matrix selector pinned at 60")]
    #[test_case("foo[2m] offset 2m", 300_000, None, vec![func_hint(60_000, 180_000, 0, 120_000, "")]; "matrix selector with offset")]
    #[test_case("foo[2m] @ 200 offset 2m", 300_000, None, vec![func_hint(-40_000, 80_000, 0, 120_000, "")]; "matrix selector pinned with offset")]
    #[test_case("foo[2m:1s]", 300_000, None, vec![hint(175_000, 300_000, 1_000)]; "subquery")]
    #[test_case("count_over_time(foo[2m:1s])", 300_000, None, vec![func_hint(175_000, 300_000, 1_000, 0, "count_over_time")]; "function over subquery")]
    #[test_case("count_over_time(foo[2m:1s] @ 300)", 200_000, None, vec![func_hint(175_000, 300_000, 1_000, 0, "count_over_time")]; "subquery pinned at 300")]
    #[test_case("count_over_time(foo[2m:1s] @ 200)", 200_000, None, vec![func_hint(75_000, 200_000, 1_000, 0, "count_over_time")]; "subquery pinned at 200")]
    #[test_case("count_over_time(foo[2m:1s] @ 100)", 200_000, None, vec![func_hint(-25_000, 100_000, 1_000, 0, "count_over_time")]; "subquery pinned at 100")]
    #[test_case("count_over_time(foo[2m:1s] offset 10s)", 300_000, None, vec![func_hint(165_000, 290_000, 1_000, 0, "count_over_time")]; "subquery with offset")]
    #[test_case("count_over_time((foo offset 10s)[2m:1s] offset 10s)", 300_000, None, vec![func_hint(155_000, 280_000, 1_000, 0, "count_over_time")]; "offsets add up")]
    #[test_case("count_over_time((foo @ 200 offset 10s)[2m:1s] offset 10s)", 300_000, None, vec![func_hint(185_000, 190_000, 1_000, 0, "count_over_time")]; "pinned selector ignores subquery offset")]
    #[test_case("count_over_time((foo @ 200 offset 10s)[2m:1s] @ 100 offset 10s)", 300_000, None, vec![func_hint(185_000, 190_000, 1_000, 0, "count_over_time")]; "pinned selector ignores pinned subquery")]
    #[test_case("count_over_time((foo offset 10s)[2m:1s] @ 100 offset 10s)", 300_000, None, vec![func_hint(-45_000, 80_000, 1_000, 0, "count_over_time")]; "pinned subquery with offsets")]
    // range queries
    #[test_case("foo", 10_000, Some(20_000), vec![hint(5_000, 20_000, 1_000)]; "range selector")]
    #[test_case("foo @ 15", 10_000, Some(20_000), vec![hint(10_000, 15_000, 1_000)]; "range selector pinned later")]
    #[test_case("foo @ 1", 10_000, Some(20_000), vec![hint(-4_000, 1_000, 1_000)]; "range selector pinned earlier")]
    #[test_case("rate(foo[2m] @ 180)", 200_000, Some(500_000), vec![func_hint(60_000, 180_000, 1_000, 120_000, "rate")]; "range rate pinned at 180")]
    #[test_case("rate(foo[2m] @ 300)", 200_000, Some(500_000), vec![func_hint(180_000, 300_000, 1_000, 120_000, "rate")]; "range rate pinned at 300")]
    #[test_case("rate(foo[2m] @ 60)", 200_000, Some(500_000), vec![func_hint(-60_000, 60_000, 1_000, 120_000, "rate")]; "range rate pinned at 60")]
    #[test_case("rate(foo[2m])", 200_000, Some(500_000), vec![func_hint(80_000, 500_000, 1_000, 120_000, "rate")]; "range rate")]
    #[test_case("rate(foo[2m] offset 2m)", 300_000, Some(500_000), vec![func_hint(60_000, 380_000, 1_000, 120_000, "rate")]; "range rate with offset")]
    #[test_case("rate(foo[2m:1s])", 300_000, Some(500_000), vec![func_hint(175_000, 500_000, 1_000, 0, "rate")]; "range rate over subquery")]
    #[test_case("count_over_time(foo[2m:1s])", 300_000, Some(500_000), vec![func_hint(175_000, 500_000, 1_000, 0, "count_over_time")]; "range function over subquery")]
    #[test_case("count_over_time(foo[2m:1s] offset 10s)", 300_000, Some(500_000), vec![func_hint(165_000, 490_000, 1_000, 0, "count_over_time")]; "range subquery with offset")]
    #[test_case("count_over_time(foo[2m:1s] @ 300)", 200_000, Some(500_000), vec![func_hint(175_000, 300_000, 1_000, 0, "count_over_time")]; "range subquery pinned at 300")]
    #[test_case("count_over_time(foo[2m:1s] @ 200)", 200_000, Some(500_000), vec![func_hint(75_000, 200_000, 1_000, 0, "count_over_time")]; "range subquery pinned at 200")]
    #[test_case("count_over_time(foo[2m:1s] @ 100)", 200_000, Some(500_000), vec![func_hint(-25_000, 100_000, 1_000, 0, "count_over_time")]; "range subquery pinned at 100")]
    #[test_case("count_over_time((foo offset 10s)[2m:1s] offset 10s)", 300_000, Some(500_000), vec![func_hint(155_000, 480_000, 1_000, 0, "count_over_time")]; "range offsets add up")]
    #[test_case("count_over_time((foo @ 200 offset 10s)[2m:1s] offset 10s)", 300_000, Some(500_000), vec![func_hint(185_000, 190_000, 1_000, 0, "count_over_time")]; "range pinned selector ignores subquery offset")]
    #[test_case("count_over_time((foo @ 200 offset 10s)[2m:1s] @ 100 offset 10s)", 300_000, Some(500_000), vec![func_hint(185_000, 190_000, 1_000, 0, "count_over_time")]; "range pinned selector ignores pinned subquery")]
    #[test_case("count_over_time((foo offset 10s)[2m:1s] @ 100 offset 10s)", 300_000, Some(500_000), vec![func_hint(-45_000, 80_000, 1_000, 0, "count_over_time")]; "range pinned subquery with offsets")]
    // grouping
    #[test_case("sum by (dim1) (foo)", 10_000, None, vec![grouped_hint(5_000, 10_000, 0, "sum", true, &["dim1"])]; "sum by")]
    #[test_case("sum without (dim1) (foo)", 10_000, None, vec![grouped_hint(5_000, 10_000, 0, "sum", false, &["dim1"])]; "sum without")]
    #[test_case("sum by (dim1) (avg_over_time(foo[1s]))", 10_000, None, vec![func_hint(9_000, 10_000, 0, 1_000, "avg_over_time")]; "grouping stops at function")]
    #[test_case("sum by (dim1) (max by (dim2) (foo))", 10_000, None, vec![grouped_hint(5_000, 10_000, 0, "max", true, &["dim2"])]; "innermost grouping wins")]
    #[test_case("(max by (dim1) (foo))[5s:1s]", 10_000, None, vec![grouped_hint(0, 10_000, 1_000, "max", true, &["dim1"])]; "grouping inside subquery")]
    #[test_case(
        r#"(sum(http_requests{group=~"p.*"})+max(http_requests{group=~"c.*"}))[20s:5s]"#, 120_000, None,
        vec![grouped_hint(95_000, 120_000, 5_000, "sum", true, &[]), grouped_hint(95_000, 120_000, 5_000, "max", true, &[])];
        "aggregations inside subquery"
    )]
    // several selectors
    #[test_case("foo @ 50 + bar @ 250 + baz @ 900", 100_000, Some(500_000), vec![
        hint(45_000, 50_000, 1_000),
        hint(245_000, 250_000, 1_000),
        hint(895_000, 900_000, 1_000),
    ]; "every selector pinned")]
    #[test_case("foo @ 50 + bar + baz @ 900", 100_000, Some(500_000), vec![
        hint(45_000, 50_000, 1_000),
        hint(95_000, 500_000, 1_000),
        hint(895_000, 900_000, 1_000),
    ]; "some selectors pinned")]
    #[test_case("rate(foo[2s] @ 50) + bar @ 250 + baz @ 900", 100_000, Some(500_000), vec![
        func_hint(48_000, 50_000, 1_000, 2_000, "rate"),
        hint(245_000, 250_000, 1_000),
        hint(895_000, 900_000, 1_000),
    ]; "pinned rate next to pinned selectors")]
    #[test_case("rate(foo[2s:1s] @ 50) + bar + baz", 100_000, Some(500_000), vec![
        func_hint(43_000, 50_000, 1_000, 0, "rate"),
        hint(95_000, 500_000, 1_000),
        hint(95_000, 500_000, 1_000),
    ]; "pinned subquery next to selectors")]
    #[test_case("rate(foo[2s:1s] @ 50) + bar + rate(baz[2m:1s] @ 900 offset 2m) ", 100_000, Some(500_000), vec![
        func_hint(43_000, 50_000, 1_000, 0, "rate"),
        hint(95_000, 500_000, 1_000),
        func_hint(655_000, 780_000, 1_000, 0, "rate"),
    ]; "two pinned subqueries")]
    // nested subqueries
    #[test_case(
        r#"sum_over_time(sum_over_time(metric{job="1"}[100s])[100s:25s] @ 50)[3s:1s] @ 3000"#, 100_000, None,
        vec![func_hint(-150_000, 50_000, 25_000, 100_000, "sum_over_time")];
        "inner pin overrides outer pin"
    )]
    #[test_case(
        r#"sum_over_time(sum_over_time(metric{job="1"}[100s])[100s:25s] @ 3000)[3s:1s] @ 50"#, 0, None,
        vec![func_hint(2_800_000, 3_000_000, 25_000, 100_000, "sum_over_time")];
        "inner pin after outer pin"
    )]
    fn engine_passes_hints_to_storage(q: &str, start: i64, end: Option<i64>, expected: Vec<SelectHints>) {
        let engine = Engine::new(EngineOpts::default().with_lookback_delta(chrono::Duration::seconds(5)));
        let recorder = HintRecorder::default();
        let queryable: Arc<dyn Queryable> = Arc::new(recorder.clone());
        let query = match end {
            Some(end) => engine.new_range_query(queryable, None, q, start, end, 1_000),
            None => engine.new_instant_query(queryable, None, q, start),
        }
        .unwrap();
        let res = query.exec(&QueryContext::background());
        assert!(res.is_ok(), "{:?}", res.err);

        assert_eq!(*recorder.hints.lock().unwrap(), expected);
        let mint = expected.iter().map(|h| h.start).min().unwrap();
        let maxt = expected.iter().map(|h| h.end).max().unwrap();
        assert_eq!(*recorder.querier_range.lock().unwrap(), Some((mint, maxt)));
    }
}

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, trace_span, warn};

use promql_parser::ast::{Expr, VectorSelector};

use crate::context::QueryContext;
use crate::execution::engine::EngineInner;
use crate::execution::evaluator::{selector_key, EvalParams, Evaluator, SelectedSeries};
use crate::execution::hints::{collect_select_hints, min_max_time, HintParams};
use crate::execution::stats::QueryStats;
use crate::provider::{Querier, Queryable, SelectHints};
use crate::query_logger::{QueryLogEntry, QueryLogParams};
use crate::runtime_error::{context_done, RuntimeError, RuntimeResult};
use crate::types::{Annotations, QueryValue, Series};

pub type TestHandler = Box<dyn Fn(&QueryContext) -> RuntimeResult<()> + Send + Sync>;

pub(crate) struct EvalStatement {
    /// Preprocessed expression.
    pub expr: Expr,
    pub query: String,
    /// Milliseconds, `start == end` and `interval == 0` for instant queries.
    pub start: i64,
    pub end: i64,
    pub interval: i64,
    pub lookback_delta: i64,
    pub enable_per_step_stats: bool,
}

pub(crate) enum Statement {
    Eval(EvalStatement),
    Test(TestHandler),
}

/// Outcome of [`Query::exec`]. Warnings are kept when the execution failed
/// part way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub value: Option<QueryValue>,
    pub err: Option<RuntimeError>,
    pub warnings: Annotations,
}

impl QueryResult {
    fn new(res: RuntimeResult<Option<QueryValue>>, warnings: Annotations) -> Self {
        match res {
            Ok(value) => Self {
                value,
                err: None,
                warnings,
            },
            Err(err) => Self {
                value: None,
                err: Some(err),
                warnings,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }

    /// The value, or the error the execution failed with. Test statements
    /// produce no value.
    pub fn into_value(self) -> RuntimeResult<Option<QueryValue>> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }
}

/// A prepared statement. It is executed at most once.
pub struct Query {
    engine: Arc<EngineInner>,
    queryable: Option<Arc<dyn Queryable>>,
    statement: Statement,
    stats: Mutex<QueryStats>,
    /// Context of the running execution, the one `cancel` acts on.
    running: Mutex<Option<QueryContext>>,
    executed: AtomicBool,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("query", &self.query_string()).finish()
    }
}

impl Query {
    pub(crate) fn new(engine: Arc<EngineInner>, queryable: Option<Arc<dyn Queryable>>, statement: Statement) -> Self {
        let per_step = match &statement {
            Statement::Eval(s) => s.enable_per_step_stats,
            Statement::Test(_) => engine.enable_per_step_stats,
        };
        Self {
            engine,
            queryable,
            statement,
            stats: Mutex::new(QueryStats::new(per_step)),
            running: Mutex::new(None),
            executed: AtomicBool::new(false),
        }
    }

    pub fn query_string(&self) -> &str {
        match &self.statement {
            Statement::Eval(s) => &s.query,
            Statement::Test(_) => "test statement",
        }
    }

    /// The statement after preprocessing, `None` for test statements.
    pub fn statement(&self) -> Option<&Expr> {
        match &self.statement {
            Statement::Eval(s) => Some(&s.expr),
            Statement::Test(_) => None,
        }
    }

    pub fn stats(&self) -> QueryStats {
        self.stats.lock().unwrap().clone()
    }

    /// Aborts the running execution. Does nothing before `exec` started or
    /// after it returned.
    pub fn cancel(&self) {
        if let Some(ctx) = self.running.lock().unwrap().as_ref() {
            ctx.cancel();
        }
    }

    /// Releases the query. A running execution is canceled.
    pub fn close(&self) {
        if let Some(ctx) = self.running.lock().unwrap().take() {
            ctx.cancel();
        }
    }

    /// Runs the statement. The execution is bounded by the engine timeout and
    /// ends early when `ctx`, the query or the engine is canceled.
    pub fn exec(&self, ctx: &QueryContext) -> QueryResult {
        if self.executed.swap(true, Ordering::SeqCst) {
            return QueryResult::new(
                Err(RuntimeError::General("query has already been executed".to_string())),
                Annotations::default(),
            );
        }
        let span = trace_span!("query_exec", query = self.query_string());
        let _guard = span.enter();

        let started = Instant::now();
        let query_ctx = ctx.with_timeout(self.engine.timeout).link(&self.engine.base_ctx);
        *self.running.lock().unwrap() = Some(query_ctx.clone());

        let mut warnings = Annotations::default();
        let res = self.exec_with_slot(&query_ctx, &mut warnings);

        self.running.lock().unwrap().take();
        self.stats.lock().unwrap().timings.exec_total_time = started.elapsed();
        if let Err(err) = &res {
            debug!(error = %err, "query failed");
        }
        self.log(ctx, res.as_ref().err());
        QueryResult::new(res, warnings)
    }

    fn exec_with_slot(&self, ctx: &QueryContext, warnings: &mut Annotations) -> RuntimeResult<Option<QueryValue>> {
        let tracker = self.engine.active_query_tracker.as_deref();
        let slot = match tracker {
            Some(tracker) => {
                let queued = Instant::now();
                let idx = tracker.insert(ctx, self.query_string());
                self.stats.lock().unwrap().timings.exec_queue_time = queued.elapsed();
                Some(idx?)
            }
            None => None,
        };
        defer! {
            if let (Some(tracker), Some(idx)) = (tracker, slot) {
                tracker.delete(idx);
            }
        }
        context_done(ctx, "query execution")?;

        let started = Instant::now();
        let res = match &self.statement {
            Statement::Eval(stmt) => self.exec_eval(ctx, stmt, warnings).map(Some),
            Statement::Test(handler) => handler(ctx).map(|_| None),
        };
        self.stats.lock().unwrap().timings.eval_total_time = started.elapsed();
        res
    }

    fn exec_eval(
        &self,
        ctx: &QueryContext,
        stmt: &EvalStatement,
        warnings: &mut Annotations,
    ) -> RuntimeResult<QueryValue> {
        let prepare_started = Instant::now();
        let hint_params = HintParams {
            start: stmt.start,
            end: stmt.end,
            interval: stmt.interval,
            lookback_delta: stmt.lookback_delta,
            no_step_subquery_interval: self.engine.no_step_subquery_interval,
        };
        let hints = collect_select_hints(&stmt.expr, &hint_params);
        let mut selected = SelectedSeries::default();
        if let Some((mint, maxt)) = min_max_time(&hints) {
            let queryable = self
                .queryable
                .as_ref()
                .ok_or_else(|| RuntimeError::General("query has no storage to select from".to_string()))?;
            let querier = queryable.querier(mint, maxt)?;
            let res = select_all(ctx, querier.as_ref(), &hints, &mut selected, warnings);
            let closed = querier.close();
            res?;
            closed?;
        }
        self.stats.lock().unwrap().timings.query_preparation_time = prepare_started.elapsed();

        let params = EvalParams {
            start: stmt.start,
            end: stmt.end,
            interval: stmt.interval,
            lookback_delta: stmt.lookback_delta,
            no_step_subquery_interval: self.engine.no_step_subquery_interval,
            max_samples: self.engine.max_samples,
            enable_per_step_stats: stmt.enable_per_step_stats,
        };
        let eval_started = Instant::now();
        let mut evaluator = Evaluator::new(ctx, &selected, params);
        let value = if stmt.interval == 0 {
            evaluator.eval_instant(&stmt.expr)
        } else {
            evaluator.eval_range(&stmt.expr).map(QueryValue::Matrix)
        };
        let (samples, eval_warnings) = evaluator.finish();
        warnings.merge(eval_warnings);

        let mut stats = self.stats.lock().unwrap();
        stats.samples = samples;
        stats.timings.inner_eval_time = eval_started.elapsed();
        value
    }

    fn log(&self, ctx: &QueryContext, err: Option<&RuntimeError>) {
        let logger = self.engine.query_logger.lock().unwrap();
        let Some(logger) = logger.as_ref() else {
            return;
        };
        let params = match &self.statement {
            Statement::Eval(s) => QueryLogParams::eval(&s.query, s.start, s.end, s.interval),
            Statement::Test(_) => QueryLogParams::test_statement(),
        };
        let entry = QueryLogEntry {
            params,
            error: err.map(|e| e.to_string()),
            stats: self.stats(),
            origin: ctx.origin().to_vec(),
        };
        if let Err(err) = logger.log(&entry) {
            warn!(error = %err, "cannot log query");
        }
    }
}

fn select_all(
    ctx: &QueryContext,
    querier: &dyn Querier,
    hints: &[(&VectorSelector, SelectHints)],
    selected: &mut SelectedSeries,
    warnings: &mut Annotations,
) -> RuntimeResult<()> {
    for (vs, hints) in hints {
        context_done(ctx, "query preparation")?;
        debug!(hints = %hints, matchers = vs.matchers.len(), "select");
        let mut set = querier.select(ctx, false, hints, &vs.matchers);
        let series: Vec<Series> = set.by_ref().collect();
        if let Some(err) = set.err() {
            return Err(RuntimeError::Storage(err));
        }
        warnings.merge(set.warnings());
        selected.insert(selector_key(vs), series);
    }
    Ok(())
}

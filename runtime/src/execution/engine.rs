use std::sync::{Arc, Mutex};

use chrono::Duration;
use tracing::{debug, warn};

use promql_parser::ast::{walk, Expr, ValueType};
use promql_parser::functions::AggregateFunction;
use promql_parser::parser::parse;

use crate::active_queries::ActiveQueryTracker;
use crate::context::QueryContext;
use crate::execution::preprocess::preprocess_expr;
use crate::execution::query::{EvalStatement, Query, Statement};
use crate::functions::aggregate::k_param;
use crate::provider::Queryable;
use crate::query_logger::QueryLogger;
use crate::runtime_error::{RuntimeError, RuntimeResult};

pub const DEFAULT_MAX_SAMPLES: usize = 50_000_000;

pub fn default_timeout() -> Duration {
    Duration::minutes(2)
}

pub fn default_lookback_delta() -> Duration {
    Duration::minutes(5)
}

pub fn default_no_step_subquery_interval() -> Duration {
    Duration::minutes(1)
}

/// Engine wide configuration.
pub struct EngineOpts {
    /// Most samples a single query may hold in memory at once.
    pub max_samples: usize,
    pub timeout: Duration,
    /// Zero or negative values fall back to the default.
    pub lookback_delta: Duration,
    /// Step of subqueries written without one, e.g. `foo[5m:]`.
    pub no_step_subquery_interval: Duration,
    pub enable_at_modifier: bool,
    pub enable_negative_offset: bool,
    pub enable_per_step_stats: bool,
    pub active_query_tracker: Option<Arc<ActiveQueryTracker>>,
    pub query_logger: Option<Box<dyn QueryLogger>>,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_MAX_SAMPLES,
            timeout: default_timeout(),
            lookback_delta: default_lookback_delta(),
            no_step_subquery_interval: default_no_step_subquery_interval(),
            enable_at_modifier: true,
            enable_negative_offset: true,
            enable_per_step_stats: false,
            active_query_tracker: None,
            query_logger: None,
        }
    }
}

impl EngineOpts {
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_lookback_delta(mut self, lookback_delta: Duration) -> Self {
        self.lookback_delta = lookback_delta;
        self
    }

    pub fn with_no_step_subquery_interval(mut self, interval: Duration) -> Self {
        self.no_step_subquery_interval = interval;
        self
    }

    pub fn with_at_modifier(mut self, enabled: bool) -> Self {
        self.enable_at_modifier = enabled;
        self
    }

    pub fn with_negative_offset(mut self, enabled: bool) -> Self {
        self.enable_negative_offset = enabled;
        self
    }

    pub fn with_per_step_stats(mut self, enabled: bool) -> Self {
        self.enable_per_step_stats = enabled;
        self
    }

    pub fn with_active_query_tracker(mut self, tracker: Arc<ActiveQueryTracker>) -> Self {
        self.active_query_tracker = Some(tracker);
        self
    }

    pub fn with_query_logger(mut self, logger: Box<dyn QueryLogger>) -> Self {
        self.query_logger = Some(logger);
        self
    }
}

/// Per query overrides of the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    /// Zero or negative values use the engine's lookback delta.
    pub lookback_delta: Duration,
    pub enable_per_step_stats: bool,
}

impl QueryOpts {
    pub fn new(enable_per_step_stats: bool, lookback_delta: Duration) -> Self {
        Self {
            lookback_delta,
            enable_per_step_stats,
        }
    }
}

pub(crate) struct EngineInner {
    pub max_samples: usize,
    pub timeout: std::time::Duration,
    /// Milliseconds.
    pub lookback_delta: i64,
    /// Milliseconds.
    pub no_step_subquery_interval: i64,
    pub enable_at_modifier: bool,
    pub enable_negative_offset: bool,
    pub enable_per_step_stats: bool,
    pub active_query_tracker: Option<Arc<ActiveQueryTracker>>,
    pub query_logger: Mutex<Option<Box<dyn QueryLogger>>>,
    /// Canceled on shutdown, parent of every per query context.
    pub base_ctx: QueryContext,
}

/// Builds queries and holds what they share: limits, the concurrency gate and
/// the query logger. Clones refer to the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOpts::default())
    }
}

impl Engine {
    pub fn new(opts: EngineOpts) -> Self {
        let mut lookback_delta = opts.lookback_delta.num_milliseconds();
        if lookback_delta <= 0 {
            lookback_delta = default_lookback_delta().num_milliseconds();
            debug!(lookback_delta, "lookback delta is not positive, using the default");
        }
        let mut no_step_subquery_interval = opts.no_step_subquery_interval.num_milliseconds();
        if no_step_subquery_interval <= 0 {
            no_step_subquery_interval = default_no_step_subquery_interval().num_milliseconds();
        }
        let inner = EngineInner {
            max_samples: opts.max_samples,
            timeout: opts.timeout.to_std().unwrap_or(std::time::Duration::ZERO),
            lookback_delta,
            no_step_subquery_interval,
            enable_at_modifier: opts.enable_at_modifier,
            enable_negative_offset: opts.enable_negative_offset,
            enable_per_step_stats: opts.enable_per_step_stats,
            active_query_tracker: opts.active_query_tracker,
            query_logger: Mutex::new(opts.query_logger),
            base_ctx: QueryContext::background(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Replaces the query logger. The previous one, if any, is closed first.
    pub fn set_query_logger(&self, logger: Option<Box<dyn QueryLogger>>) {
        let mut current = self.inner.query_logger.lock().unwrap();
        if let Some(previous) = current.take() {
            if let Err(err) = previous.close() {
                warn!(error = %err, "cannot close query logger");
            }
        }
        *current = logger;
    }

    /// Cancels every running query. Queries executed afterwards fail
    /// immediately.
    pub fn shutdown(&self) {
        self.inner.base_ctx.cancel();
    }

    /// A query evaluated at the single timestamp `ts`, in milliseconds.
    pub fn new_instant_query(
        &self,
        queryable: Arc<dyn Queryable>,
        opts: Option<QueryOpts>,
        qs: &str,
        ts: i64,
    ) -> RuntimeResult<Query> {
        let expr = parse(qs)?;
        self.new_query(queryable, opts, qs, expr, ts, ts, 0)
    }

    /// A query evaluated at every `interval` from `start` through `end`. All
    /// values are in milliseconds.
    pub fn new_range_query(
        &self,
        queryable: Arc<dyn Queryable>,
        opts: Option<QueryOpts>,
        qs: &str,
        start: i64,
        end: i64,
        interval: i64,
    ) -> RuntimeResult<Query> {
        let expr = parse(qs)?;
        if interval <= 0 {
            return Err(RuntimeError::General(
                "zero or negative query resolution step widths are not accepted".to_string(),
            ));
        }
        let value_type = expr.value_type();
        if value_type != ValueType::Scalar && value_type != ValueType::InstantVector {
            return Err(RuntimeError::General(format!(
                "invalid expression type {value_type} for range query, must be scalar or instant vector"
            )));
        }
        self.new_query(queryable, opts, qs, expr, start, end, interval)
    }

    /// A query running `handler` in place of an evaluation. It goes through
    /// the same gate, timeout and logging as any other query.
    pub fn new_test_query<F>(&self, handler: F) -> Query
    where
        F: Fn(&QueryContext) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        Query::new(Arc::clone(&self.inner), None, Statement::Test(Box::new(handler)))
    }

    #[allow(clippy::too_many_arguments)]
    fn new_query(
        &self,
        queryable: Arc<dyn Queryable>,
        opts: Option<QueryOpts>,
        qs: &str,
        expr: Expr,
        start: i64,
        end: i64,
        interval: i64,
    ) -> RuntimeResult<Query> {
        self.validate(&expr)?;
        let opts = opts.unwrap_or_default();
        let mut lookback_delta = opts.lookback_delta.num_milliseconds();
        if lookback_delta <= 0 {
            lookback_delta = self.inner.lookback_delta;
        }
        let statement = EvalStatement {
            expr: preprocess_expr(expr, start, end),
            query: qs.to_string(),
            start,
            end,
            interval,
            lookback_delta,
            enable_per_step_stats: self.inner.enable_per_step_stats || opts.enable_per_step_stats,
        };
        Ok(Query::new(
            Arc::clone(&self.inner),
            Some(queryable),
            Statement::Eval(statement),
        ))
    }

    /// Rejects disabled modifiers and literal `k` parameters outside the
    /// integer range before any data is read.
    fn validate(&self, expr: &Expr) -> RuntimeResult<()> {
        let mut res = Ok(());
        walk(expr, &mut |node, _| {
            if res.is_err() {
                return;
            }
            res = self.validate_node(node);
        });
        res
    }

    fn validate_node(&self, node: &Expr) -> RuntimeResult<()> {
        let (at, offset) = match node {
            Expr::VectorSelector(vs) => (vs.at.is_some(), vs.offset),
            Expr::MatrixSelector(ms) => (ms.vector_selector.at.is_some(), ms.vector_selector.offset),
            Expr::Subquery(sq) => (sq.at.is_some(), sq.offset),
            Expr::Aggregate(agg) => {
                if matches!(
                    agg.op,
                    AggregateFunction::Topk | AggregateFunction::Bottomk | AggregateFunction::Limitk
                ) {
                    if let Some(Expr::NumberLiteral(k)) = agg.param.as_deref().map(Expr::unwrap_parens) {
                        k_param(*k)?;
                    }
                }
                return Ok(());
            }
            _ => return Ok(()),
        };
        if at && !self.inner.enable_at_modifier {
            return Err(RuntimeError::ValidationAtModifierDisabled);
        }
        if offset < 0 && !self.inner.enable_negative_offset {
            return Err(RuntimeError::ValidationNegativeOffsetDisabled);
        }
        Ok(())
    }
}

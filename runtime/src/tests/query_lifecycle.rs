use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use promql_parser::label::Matcher;

use crate::active_queries::ActiveQueryTracker;
use crate::context::QueryContext;
use crate::execution::{Engine, EngineOpts, Query};
use crate::provider::{ErrorSeriesSet, Querier, Queryable, SelectHints, SeriesSet};
use crate::runtime_error::{context_done, RuntimeError, RuntimeResult, StorageError};
use crate::types::Annotations;

/// Handler that reports when it starts and then blocks until released or
/// until its context ends.
fn blocking_handler(
    started: Sender<()>,
    release: Arc<AtomicBool>,
) -> impl Fn(&QueryContext) -> RuntimeResult<()> + Send + Sync + 'static {
    let started = Mutex::new(started);
    move |ctx: &QueryContext| {
        let _ = started.lock().unwrap().send(());
        while !release.load(Ordering::SeqCst) {
            if ctx.wait(Duration::from_millis(1)).is_some() {
                return context_done(ctx, "test statement execution");
            }
        }
        Ok(())
    }
}

#[test]
fn concurrency_is_bounded_by_the_tracker() {
    let dir = tempfile::tempdir().unwrap();
    let max_concurrent = 2;
    let tracker = Arc::new(ActiveQueryTracker::new(dir.path(), max_concurrent).unwrap());
    let engine = Engine::new(EngineOpts::default().with_active_query_tracker(Arc::clone(&tracker)));

    let (started_tx, started_rx) = mpsc::channel();
    let release = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = (0..max_concurrent + 1)
        .map(|_| {
            let query = engine.new_test_query(blocking_handler(started_tx.clone(), Arc::clone(&release)));
            thread::spawn(move || query.exec(&QueryContext::background()))
        })
        .collect();

    for _ in 0..max_concurrent {
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("query did not start");
    }
    // the gate is full, the last query waits for a slot
    assert!(started_rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(tracker.active_queries().unwrap().len(), max_concurrent);

    release.store(true, Ordering::SeqCst);
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("queued query did not start");
    for handle in handles {
        let res = handle.join().unwrap();
        assert!(res.is_ok(), "{:?}", res.err);
    }
    assert!(tracker.active_queries().unwrap().is_empty());
}

#[test]
fn query_times_out() {
    let engine = Engine::new(EngineOpts::default().with_timeout(chrono::Duration::milliseconds(5)));
    let query = engine.new_test_query(|ctx| {
        thread::sleep(Duration::from_millis(20));
        context_done(ctx, "test statement execution")
    });
    let res = query.exec(&QueryContext::background());
    assert_eq!(
        res.err,
        Some(RuntimeError::QueryTimeout("test statement execution".to_string()))
    );
    assert!(res.value.is_none());
}

fn spawn_blocking_query(engine: &Engine) -> (Arc<Query>, thread::JoinHandle<crate::execution::QueryResult>) {
    let (started_tx, started_rx) = mpsc::channel();
    let query = Arc::new(engine.new_test_query(blocking_handler(started_tx, Arc::new(AtomicBool::new(false)))));
    let handle = {
        let query = Arc::clone(&query);
        thread::spawn(move || query.exec(&QueryContext::background()))
    };
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("query did not start");
    (query, handle)
}

#[test]
fn cancel_stops_a_running_query() {
    let engine = Engine::default();
    let (query, handle) = spawn_blocking_query(&engine);
    query.cancel();
    let res = handle.join().unwrap();
    assert_eq!(
        res.err,
        Some(RuntimeError::QueryCanceled("test statement execution".to_string()))
    );
}

#[test]
fn close_stops_a_running_query() {
    let engine = Engine::default();
    let (query, handle) = spawn_blocking_query(&engine);
    query.close();
    let res = handle.join().unwrap();
    assert_eq!(
        res.err,
        Some(RuntimeError::QueryCanceled("test statement execution".to_string()))
    );
}

#[test]
fn cancel_before_exec_has_no_effect() {
    let engine = Engine::default();
    let query = engine.new_test_query(|ctx| context_done(ctx, "test statement execution"));
    query.cancel();
    assert!(query.exec(&QueryContext::background()).is_ok());
}

#[test]
fn caller_context_cancels_the_query() {
    let engine = Engine::default();
    let ctx = QueryContext::background().with_cancel();
    ctx.cancel();
    let query = engine.new_test_query(|_| Ok(()));
    let res = query.exec(&ctx);
    assert_eq!(res.err, Some(RuntimeError::QueryCanceled("query execution".to_string())));
}

#[test]
fn queries_run_at_most_once() {
    let engine = Engine::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = {
        let calls = Arc::clone(&calls);
        engine.new_test_query(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    assert!(query.exec(&QueryContext::background()).is_ok());
    let res = query.exec(&QueryContext::background());
    assert_eq!(
        res.err,
        Some(RuntimeError::General("query has already been executed".to_string()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_cancels_pending_and_later_queries() {
    let engine = Engine::default();
    let (running, handle) = spawn_blocking_query(&engine);
    engine.shutdown();
    let res = handle.join().unwrap();
    assert_eq!(
        res.err,
        Some(RuntimeError::QueryCanceled("test statement execution".to_string()))
    );
    drop(running);

    let ran = Arc::new(AtomicBool::new(false));
    let query = {
        let ran = Arc::clone(&ran);
        engine.new_test_query(move |_| {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
    };
    let res = query.exec(&QueryContext::background());
    assert_eq!(res.err, Some(RuntimeError::QueryCanceled("query execution".to_string())));
    assert!(!ran.load(Ordering::SeqCst));
}

struct FailingQueryable(StorageError);

struct FailingQuerier(StorageError);

impl Queryable for FailingQueryable {
    fn querier(&self, _mint: i64, _maxt: i64) -> RuntimeResult<Box<dyn Querier>> {
        Ok(Box::new(FailingQuerier(self.0.clone())))
    }
}

impl Querier for FailingQuerier {
    fn select(
        &self,
        _ctx: &QueryContext,
        _sort_series: bool,
        _hints: &SelectHints,
        _matchers: &[Matcher],
    ) -> Box<dyn SeriesSet> {
        Box::new(ErrorSeriesSet::new(self.0.clone()))
    }

    fn label_values(&self, _name: &str, _matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)> {
        Ok((vec![], Annotations::default()))
    }

    fn label_names(&self, _matchers: &[Matcher]) -> RuntimeResult<(Vec<String>, Annotations)> {
        Ok((vec![], Annotations::default()))
    }
}

#[test]
fn storage_errors_are_returned() {
    let err = StorageError::msg("storage unavailable");
    let engine = Engine::default();
    let queryable: Arc<dyn Queryable> = Arc::new(FailingQueryable(err.clone()));

    let query = engine.new_instant_query(Arc::clone(&queryable), None, "metric", 10_000).unwrap();
    let res = query.exec(&QueryContext::background());
    assert_eq!(res.err, Some(RuntimeError::Storage(err.clone())));

    let query = engine
        .new_range_query(queryable, None, "sum(rate(metric[1m]))", 0, 60_000, 10_000)
        .unwrap();
    let res = query.exec(&QueryContext::background());
    assert_eq!(res.err.map(|e| e.to_string()), Some("storage unavailable".to_string()));
}

#[test]
fn literal_queries_do_not_touch_storage() {
    let engine = Engine::default();
    let queryable: Arc<dyn Queryable> = Arc::new(FailingQueryable(StorageError::msg("unused")));
    let query = engine.new_instant_query(queryable, None, "1 + 2", 0).unwrap();
    let res = query.exec(&QueryContext::background());
    assert!(res.is_ok());
}

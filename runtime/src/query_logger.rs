use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use tracing::info;

use crate::execution::QueryStats;
use crate::runtime_error::{RuntimeError, RuntimeResult};

/// Statement parameters as they appear in the log. Test statements only carry
/// the query text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogParams {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Step in seconds, only set for range queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
}

impl QueryLogParams {
    pub fn test_statement() -> Self {
        Self {
            query: "test statement".to_string(),
            start: None,
            end: None,
            step: None,
        }
    }

    /// Parameters of an evaluation statement. Times are in milliseconds.
    pub fn eval(query: &str, start: i64, end: i64, interval: i64) -> Self {
        Self {
            query: query.to_string(),
            start: Some(format_timestamp(start)),
            end: Some(format_timestamp(end)),
            step: (interval > 0).then_some(interval / 1000),
        }
    }
}

fn format_timestamp(ts: i64) -> String {
    match DateTime::from_timestamp_millis(ts) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ts.to_string(),
    }
}

/// One record per executed query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    pub params: QueryLogParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: QueryStats,
    /// Key/value pairs describing where the query came from, in the order they
    /// were attached to the context.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub origin: Vec<(String, String)>,
}

/// Sink for executed queries. The engine owns at most one logger at a time
/// and closes it when it is replaced.
pub trait QueryLogger: Send + Sync {
    fn log(&self, entry: &QueryLogEntry) -> RuntimeResult<()>;

    fn close(&self) -> RuntimeResult<()>;
}

/// Emits every query as a `tracing` event.
#[derive(Debug, Default)]
pub struct TracingQueryLogger;

impl QueryLogger for TracingQueryLogger {
    fn log(&self, entry: &QueryLogEntry) -> RuntimeResult<()> {
        let stats = serde_json::to_string(&entry.stats).unwrap_or_default();
        info!(
            query = entry.params.query.as_str(),
            start = entry.params.start.as_deref(),
            end = entry.params.end.as_deref(),
            step = entry.params.step,
            error = entry.error.as_deref(),
            origin = ?entry.origin,
            stats = stats.as_str(),
            "query executed"
        );
        Ok(())
    }

    fn close(&self) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonFileQueryLogger {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonFileQueryLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> RuntimeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RuntimeError::General(format!("cannot open query log {}: {e}", path.display())))?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueryLogger for JsonFileQueryLogger {
    fn log(&self, entry: &QueryLogEntry) -> RuntimeResult<()> {
        let mut writer = self.writer.lock().unwrap();
        let Some(w) = writer.as_mut() else {
            return Err(RuntimeError::General("query logger is closed".to_string()));
        };
        let line = serde_json::to_string(entry)
            .map_err(|e| RuntimeError::General(format!("cannot encode query log entry: {e}")))?;
        writeln!(w, "{line}")
            .and_then(|_| w.flush())
            .map_err(|e| RuntimeError::General(format!("cannot write query log: {e}")))
    }

    fn close(&self) -> RuntimeResult<()> {
        let Some(mut w) = self.writer.lock().unwrap().take() else {
            return Ok(());
        };
        w.flush()
            .map_err(|e| RuntimeError::General(format!("cannot flush query log: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(params: QueryLogParams) -> QueryLogEntry {
        QueryLogEntry {
            params,
            error: None,
            stats: QueryStats::default(),
            origin: vec![],
        }
    }

    #[test]
    fn eval_params_are_rfc3339() {
        let params = QueryLogParams::eval("up", 0, 10_000, 5_000);
        assert_eq!(params.start.as_deref(), Some("1970-01-01T00:00:00.000Z"));
        assert_eq!(params.end.as_deref(), Some("1970-01-01T00:00:10.000Z"));
        assert_eq!(params.step, Some(5));
        assert_eq!(QueryLogParams::eval("up", 0, 0, 0).step, None);
    }

    #[test]
    fn test_statement_only_has_query() {
        let json = serde_json::to_value(entry(QueryLogParams::test_statement())).unwrap();
        assert_eq!(json["params"], serde_json::json!({"query": "test statement"}));
        assert!(json.get("error").is_none());
        assert!(json.get("origin").is_none());
    }

    #[test]
    fn file_logger_writes_lines_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.log");
        let logger = JsonFileQueryLogger::new(&path).unwrap();

        let mut e = entry(QueryLogParams::test_statement());
        e.error = Some("boom".to_string());
        e.origin = vec![("user".to_string(), "alice".to_string())];
        logger.log(&e).unwrap();
        logger.log(&e).unwrap();
        logger.close().unwrap();
        assert!(logger.log(&e).is_err());
        assert!(logger.close().is_ok());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["error"], "boom");
        assert_eq!(json["origin"], serde_json::json!([["user", "alice"]]));
    }
}

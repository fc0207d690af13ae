use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DB_FILENAME: &str = "bias_metrics.sqlite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Analyze,
    Rank,
    Compare,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Rank => "rank",
            Self::Compare => "compare",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "analyze" => Some(Self::Analyze),
            "rank" => Some(Self::Rank),
            "compare" => Some(Self::Compare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub kind: RunKind,
    pub generated_at: String,
    pub input_sha256: String,
    pub report_count: usize,
    pub payload_json: String,
}

pub trait ReportStore {
    fn record_run(&self, record: &RunRecord) -> Result<()>;
    fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;
}

pub struct SqliteStore {
    connection: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::util::ensure_directory(parent)?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open report database: {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count_runs(&self) -> Result<i64> {
        let count = self
            .connection
            .query_row("SELECT COUNT(*) FROM analysis_runs", [], |row| row.get(0))
            .context("failed to count analysis runs")?;
        Ok(count)
    }
}

impl ReportStore for SqliteStore {
    fn record_run(&self, record: &RunRecord) -> Result<()> {
        self.connection
            .execute(
                "INSERT OR REPLACE INTO analysis_runs
                   (run_id, kind, generated_at, input_sha256, report_count, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.run_id,
                    record.kind.as_str(),
                    record.generated_at,
                    record.input_sha256,
                    record.report_count as i64,
                    record.payload_json,
                ],
            )
            .with_context(|| format!("failed to record analysis run {}", record.run_id))?;
        Ok(())
    }

    fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT run_id, kind, generated_at, input_sha256, report_count, payload_json
                 FROM analysis_runs
                 ORDER BY generated_at DESC, run_id DESC
                 LIMIT ?1",
            )
            .context("failed to prepare analysis run listing")?;

        let rows = statement
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("failed to query analysis runs")?;

        let mut records = Vec::new();
        for row in rows {
            let (run_id, kind, generated_at, input_sha256, report_count, payload_json) =
                row.context("failed to decode analysis run row")?;
            let Some(kind) = RunKind::parse(&kind) else {
                tracing::warn!(run_id = %run_id, kind = %kind, "skipping run with unknown kind");
                continue;
            };
            records.push(RunRecord {
                run_id,
                kind,
                generated_at,
                input_sha256,
                report_count: report_count.max(0) as usize,
                payload_json,
            });
        }
        Ok(records)
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS analysis_runs (
              run_id TEXT PRIMARY KEY,
              kind TEXT NOT NULL,
              generated_at TEXT NOT NULL,
              input_sha256 TEXT NOT NULL,
              report_count INTEGER NOT NULL DEFAULT 0,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_runs_generated_at
              ON analysis_runs(generated_at);
            ",
        )
        .context("failed to create analysis_runs schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run_id: &str, generated_at: &str, kind: RunKind) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            kind,
            generated_at: generated_at.to_string(),
            input_sha256: "ab".repeat(32),
            report_count: 2,
            payload_json: "{}".to_string(),
        }
    }

    #[test]
    fn records_and_lists_runs_newest_first() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = SqliteStore::open(&dir.path().join("nested").join(DEFAULT_DB_FILENAME))
            .expect("store should open");

        store
            .record_run(&record("run-1", "2026-10-15T08:00:00Z", RunKind::Analyze))
            .expect("first run should be recorded");
        store
            .record_run(&record("run-2", "2026-10-16T08:00:00Z", RunKind::Rank))
            .expect("second run should be recorded");

        let runs = store.list_runs(10).expect("runs should be listed");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "run-2");
        assert_eq!(runs[0].kind, RunKind::Rank);
        assert_eq!(runs[1].report_count, 2);
        assert_eq!(store.count_runs().expect("count"), 2);

        let limited = store.list_runs(1).expect("runs should be listed");
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn rerecording_a_run_replaces_it() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join(DEFAULT_DB_FILENAME);
        let store = SqliteStore::open(&path).expect("store should open");

        let mut first = record("run-1", "2026-10-16T08:00:00Z", RunKind::Compare);
        store.record_run(&first).expect("run should be recorded");
        first.report_count = 5;
        store.record_run(&first).expect("run should be replaced");
        drop(store);

        let reopened = SqliteStore::open(&path).expect("store should reopen");
        let runs = reopened.list_runs(10).expect("runs should be listed");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].report_count, 5);
    }
}

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::metrics::error::MetricsStoreError;
use crate::metrics::sample::Sample;

/// The four fields `fetch` can be queried on; any other name is rejected at
/// compile time rather than via a runtime assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsField {
    Cpu,
    RamUsedMb,
    GpuUtil,
    GpuMemUsedMb,
}

impl MetricsField {
    fn column(self) -> &'static str {
        match self {
            MetricsField::Cpu => "cpu",
            MetricsField::RamUsedMb => "ram_used_mb",
            MetricsField::GpuUtil => "gpu_util",
            MetricsField::GpuMemUsedMb => "gpu_mem_used_mb",
        }
    }
}

/// SQLite-backed time series of per-host [`Sample`]s. Writes are serialized
/// through an internal mutex; the underlying connection allows concurrent
/// reads under WAL.
pub struct MetricsStore {
    conn: Mutex<Connection>,
}

impl MetricsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetricsStoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server TEXT NOT NULL,
                ts INTEGER NOT NULL,
                cpu REAL,
                ram_used_mb REAL,
                ram_total_mb REAL,
                gpu_util REAL,
                gpu_mem_used_mb REAL,
                gpu_mem_total_mb REAL
            )",
            (),
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_server_ts ON metrics(server, ts)",
            (),
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, sample: &Sample) -> Result<(), MetricsStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metrics (server, ts, cpu, ram_used_mb, ram_total_mb, gpu_util, gpu_mem_used_mb, gpu_mem_total_mb)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                sample.host_name,
                sample.timestamp_s,
                sample.cpu_pct,
                sample.ram_used_mb,
                sample.ram_total_mb,
                sample.gpu_util_pct,
                sample.gpu_mem_used_mb,
                sample.gpu_mem_total_mb,
            ],
        )?;
        Ok(())
    }

    /// Returns `(ts, value)` pairs for `host` over the last `seconds`,
    /// restricted to rows where `field` is non-null, ascending by time.
    pub fn fetch(
        &self,
        host: &str,
        field: MetricsField,
        seconds: i64,
        now_s: i64,
    ) -> Result<Vec<(i64, f64)>, MetricsStoreError> {
        let conn = self.conn.lock().unwrap();
        let column = field.column();
        let since = now_s - seconds;
        let sql = format!(
            "SELECT ts, {column} FROM metrics
             WHERE server = ?1 AND ts >= ?2 AND {column} IS NOT NULL
             ORDER BY ts ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![host, since], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(host: &str, ts: i64, cpu: Option<f64>) -> Sample {
        let mut s = Sample::empty(host, ts);
        s.cpu_pct = cpu;
        s
    }

    #[test]
    fn insert_then_fetch_recent_sample() {
        let store = MetricsStore::open(":memory:").unwrap();
        store.insert(&sample("h1", 1000, Some(42.0))).unwrap();
        let rows = store
            .fetch("h1", MetricsField::Cpu, 3600, 1100)
            .unwrap();
        assert_eq!(rows, vec![(1000, 42.0)]);
    }

    #[test]
    fn fetch_excludes_null_field_rows() {
        let store = MetricsStore::open(":memory:").unwrap();
        store.insert(&sample("h1", 1000, None)).unwrap();
        let rows = store.fetch("h1", MetricsField::Cpu, 3600, 1100).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn fetch_excludes_rows_outside_window() {
        let store = MetricsStore::open(":memory:").unwrap();
        store.insert(&sample("h1", 0, Some(10.0))).unwrap();
        store.insert(&sample("h1", 5000, Some(20.0))).unwrap();
        let rows = store.fetch("h1", MetricsField::Cpu, 100, 5000).unwrap();
        assert_eq!(rows, vec![(5000, 20.0)]);
    }

    #[test]
    fn fetch_is_scoped_to_host() {
        let store = MetricsStore::open(":memory:").unwrap();
        store.insert(&sample("h1", 1000, Some(1.0))).unwrap();
        store.insert(&sample("h2", 1000, Some(2.0))).unwrap();
        let rows = store.fetch("h1", MetricsField::Cpu, 3600, 1100).unwrap();
        assert_eq!(rows, vec![(1000, 1.0)]);
    }
}

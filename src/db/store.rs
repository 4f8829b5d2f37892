//! Durable, append-only history of weather and sensor readings.
//!
//! Appends are grouped into one SQLite transaction that stays open until
//! [`ReadingStore::commit`] is called, so a polling tick becomes visible to a
//! later reader as a whole or not at all.

use crate::db::models::{NewSensorRow, NewWeatherRow, SensorRow, WeatherRow};
use crate::schema;
use core::fmt;
use diesel::connection::{AnsiTransactionManager, SimpleConnection, TransactionManager};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::SqliteConnection;
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE weather (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    date TEXT NOT NULL,
    temperature REAL NOT NULL
);

CREATE TABLE readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    date TEXT NOT NULL,
    temperature REAL NOT NULL,
    token TEXT NOT NULL
);
";

#[derive(Debug)]
pub enum StoreError {
    /// The store file could not be created or opened.
    Open { path: PathBuf, message: String },
    /// A fresh store file was created but the tables could not be.
    Schema(DieselError),
    /// Reading history back failed.
    Query(DieselError),
    /// A single row could not be appended.
    Write(DieselError),
    /// The pending transaction could not be committed; its rows are lost.
    Commit(DieselError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Open { path, message } => {
                write!(f, "cannot open history store {}: {}", path.display(), message)
            }
            StoreError::Schema(e) => write!(f, "creating history schema failed: {}", e),
            StoreError::Query(e) => write!(f, "reading history failed: {}", e),
            StoreError::Write(e) => write!(f, "storing reading failed: {}", e),
            StoreError::Commit(e) => write!(f, "committing readings failed: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Open { .. } => None,
            StoreError::Schema(e) | StoreError::Query(e) | StoreError::Write(e) | StoreError::Commit(e) => Some(e),
        }
    }
}

/// Complete stored history, each list in insertion order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct History {
    pub weather: Vec<WeatherRow>,
    pub readings: Vec<SensorRow>,
}

impl History {
    pub fn len(&self) -> usize {
        self.weather.len() + self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ReadingStore {
    conn: SqliteConnection,
    path: PathBuf,
    /// Rows appended since the last commit.
    pending: usize,
    in_transaction: bool,
}

impl ReadingStore {
    /// Open the store at `path`, creating the file and both tables if it does
    /// not exist. Returns the store and the number of weather rows already
    /// recorded (0 for a fresh store).
    pub fn open(path: &Path) -> Result<(Self, i64), StoreError> {
        let open_err = |message: String| StoreError::Open {
            path: path.to_path_buf(),
            message,
        };

        let make_schema = !path.exists();
        if make_schema
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
        }

        let url = path.to_str().ok_or_else(|| open_err("path is not valid UTF-8".to_string()))?;
        let mut conn = SqliteConnection::establish(url).map_err(|e| open_err(e.to_string()))?;

        let history_points = if make_schema {
            info!("Creating history database {}", path.display());
            conn.batch_execute(SCHEMA).map_err(StoreError::Schema)?;
            0
        } else {
            info!("Loading history from {}", path.display());
            let count = count_weather(&mut conn).map_err(|e| open_err(e.to_string()))?;
            info!("Found {} history points", count);
            count
        };

        Ok((
            ReadingStore {
                conn,
                path: path.to_path_buf(),
                pending: 0,
                in_transaction: false,
            },
            history_points,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    #[cfg(test)]
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        self.conn.batch_execute(sql).map_err(StoreError::Write)
    }

    fn ensure_transaction(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            AnsiTransactionManager::begin_transaction(&mut self.conn).map_err(StoreError::Write)?;
            self.in_transaction = true;
        }
        Ok(())
    }

    pub fn append_weather(&mut self, date: &str, temperature: f64) -> Result<(), StoreError> {
        use schema::weather::dsl as W;

        self.ensure_transaction()?;
        diesel::insert_into(W::weather)
            .values(&NewWeatherRow { date, temperature })
            .execute(&mut self.conn)
            .map_err(StoreError::Write)?;
        self.pending += 1;
        Ok(())
    }

    pub fn append_sensor_reading(&mut self, date: &str, temperature: f64, token: &str) -> Result<(), StoreError> {
        use schema::readings::dsl as R;

        self.ensure_transaction()?;
        diesel::insert_into(R::readings)
            .values(&NewSensorRow {
                date,
                temperature,
                token,
            })
            .execute(&mut self.conn)
            .map_err(StoreError::Write)?;
        self.pending += 1;
        Ok(())
    }

    /// Durably write every row appended since the last commit. Returns the
    /// number of rows committed.
    pub fn commit(&mut self) -> Result<usize, StoreError> {
        if !self.in_transaction {
            return Ok(0);
        }
        self.in_transaction = false;
        let rows = std::mem::take(&mut self.pending);
        match AnsiTransactionManager::commit_transaction(&mut self.conn) {
            Ok(()) => {
                debug!("Committed {} row(s) to {}", rows, self.path.display());
                Ok(rows)
            }
            Err(e) => {
                // errors with "not in transaction" when diesel already rolled back
                if let Err(rb) = AnsiTransactionManager::rollback_transaction(&mut self.conn) {
                    debug!("rollback after failed commit: {}", rb);
                }
                Err(StoreError::Commit(e))
            }
        }
    }

    /// Full history for replay. Not paginated; the store never evicts rows.
    pub fn read_all(&mut self) -> Result<History, StoreError> {
        use schema::readings::dsl as R;
        use schema::weather::dsl as W;

        let weather = W::weather
            .order(W::id.asc())
            .select(WeatherRow::as_select())
            .load(&mut self.conn)
            .map_err(StoreError::Query)?;
        let readings = R::readings
            .order(R::id.asc())
            .select(SensorRow::as_select())
            .load(&mut self.conn)
            .map_err(StoreError::Query)?;
        Ok(History { weather, readings })
    }
}

fn count_weather(conn: &mut SqliteConnection) -> QueryResult<i64> {
    use schema::weather::dsl as W;
    W::weather.count().get_result(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        (dir, path)
    }

    #[test]
    fn fresh_store_creates_schema_and_is_empty() {
        let (_dir, path) = fresh();
        assert!(!path.exists());

        let (mut store, count) = ReadingStore::open(&path).expect("open");
        assert_eq!(count, 0);
        assert!(path.exists());

        let history = store.read_all().expect("read");
        assert!(history.weather.is_empty());
        assert!(history.readings.is_empty());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("history.db");
        let (_store, count) = ReadingStore::open(&path).expect("open");
        assert_eq!(count, 0);
        assert!(path.exists());
    }

    #[test]
    fn reopen_reports_weather_count_without_recreating_schema() {
        let (_dir, path) = fresh();
        {
            let (mut store, _) = ReadingStore::open(&path).expect("open");
            for i in 0..3 {
                let ts = format!("2024-01-01 00:0{}:00.000000", i);
                store.append_weather(&ts, 40.0 + i as f64).expect("weather");
                store.append_sensor_reading(&ts, 70.0, "tok-a").expect("sensor");
            }
            assert_eq!(store.commit().expect("commit"), 6);
        }

        let (first, count) = ReadingStore::open(&path).expect("reopen");
        assert_eq!(count, 3);
        drop(first);
        let (mut second, count) = ReadingStore::open(&path).expect("reopen again");
        assert_eq!(count, 3);
        assert_eq!(second.read_all().expect("read").len(), 6);
    }

    #[test]
    fn read_all_preserves_insertion_order() {
        let (_dir, path) = fresh();
        let (mut store, _) = ReadingStore::open(&path).expect("open");
        store.append_sensor_reading("2024-01-01 00:00:00.000000", 71.5, "b").expect("b");
        store.append_sensor_reading("2024-01-01 00:00:00.000000", 68.25, "a").expect("a");
        store.append_weather("2024-01-01 00:00:00.000000", 30.0).expect("w");
        store.commit().expect("commit");

        let history = store.read_all().expect("read");
        let tokens: Vec<_> = history.readings.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec!["b", "a"]);
        assert!(history.readings[0].id < history.readings[1].id);
        assert_eq!(history.weather[0].temperature, 30.0);
    }

    #[test]
    fn uncommitted_rows_are_not_visible_after_reopen() {
        let (_dir, path) = fresh();
        {
            let (mut store, _) = ReadingStore::open(&path).expect("open");
            store.append_weather("2024-01-01 00:00:00.000000", 50.0).expect("w1");
            store.commit().expect("commit");
            store.append_weather("2024-01-01 00:05:00.000000", 51.0).expect("w2");
        }

        let (mut store, count) = ReadingStore::open(&path).expect("reopen");
        assert_eq!(count, 1);
        assert_eq!(store.read_all().expect("read").weather.len(), 1);
    }

    #[test]
    fn commit_without_appends_is_a_no_op() {
        let (_dir, path) = fresh();
        let (mut store, _) = ReadingStore::open(&path).expect("open");
        assert_eq!(store.commit().expect("commit"), 0);
        assert_eq!(store.commit().expect("commit"), 0);
    }

    #[test]
    fn failed_append_leaves_transaction_for_commit_to_close() {
        let (_dir, path) = fresh();
        let (mut store, _) = ReadingStore::open(&path).expect("open");
        store
            .execute_batch(
                "CREATE TRIGGER reject_weather BEFORE INSERT ON weather BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .expect("trigger");

        assert!(matches!(
            store.append_weather("2024-01-01 00:00:00.000000", 50.0),
            Err(StoreError::Write(_))
        ));
        assert!(store.in_transaction());
        assert_eq!(store.commit().expect("commit"), 0);
        assert!(!store.in_transaction());
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let (_dir, path) = fresh();
        std::fs::write(&path, vec![b'x'; 4096]).expect("write");
        assert!(matches!(ReadingStore::open(&path), Err(StoreError::Open { .. })));
    }
}

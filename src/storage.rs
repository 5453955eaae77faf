use anyhow::{anyhow, Context, Result};
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::ViolationCategory;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Record handed to the store; the store assigns the id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewViolation {
    pub category: ViolationCategory,
    /// RFC 3339.
    pub timestamp: String,
    pub image_path: Option<String>,
    pub video: Option<String>,
}

impl NewViolation {
    fn record_type(&self) -> &'static str {
        self.category.record_type()
    }
}

/// Durable violation record. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViolationEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub record_type: String,
    pub timestamp: String,
    pub image_path: Option<String>,
    pub video: Option<String>,
}

/// Query over stored events. Every field narrows the result; `None` means no constraint.
///
/// `since`/`until` compare RFC 3339 strings lexically, which orders correctly
/// for timestamps written with the same UTC offset.
#[derive(Clone, Debug, Default)]
pub struct ViolationFilter {
    pub record_type: Option<String>,
    pub video: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
}

impl ViolationFilter {
    pub fn for_category(category: ViolationCategory) -> Self {
        Self {
            record_type: Some(category.record_type().to_string()),
            ..Self::default()
        }
    }

    fn matches(&self, event: &ViolationEvent) -> bool {
        if let Some(kind) = &self.record_type {
            if &event.record_type != kind {
                return false;
            }
        }
        if let Some(video) = &self.video {
            if event.video.as_ref() != Some(video) {
                return false;
            }
        }
        if let Some(since) = &self.since {
            if event.timestamp.as_str() < since.as_str() {
                return false;
            }
        }
        if let Some(until) = &self.until {
            if event.timestamp.as_str() > until.as_str() {
                return false;
            }
        }
        true
    }
}

/// Append-only violation record store.
///
/// Shared between concurrent runs, so both methods take `&self` and
/// implementations serialize appends internally. Ids are unique and
/// increase with append order.
pub trait ViolationStore: Send + Sync {
    fn append(&self, violation: &NewViolation) -> Result<ViolationEvent>;

    /// Matching events ordered by id ascending.
    fn query(&self, filter: &ViolationFilter) -> Result<Vec<ViolationEvent>>;
}

pub struct SqliteViolationStore {
    conn: Mutex<Connection>,
}

impl SqliteViolationStore {
    /// Open (or create) the database, creating its parent directory if needed.
    pub fn open(db_path: &str) -> Result<Self> {
        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create database directory {}", parent.display())
                    })?;
                }
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open violation store {}", db_path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("violation store lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              type TEXT,
              timestamp TEXT,
              image_path TEXT,
              video TEXT
            );
            "#,
        )?;
        // Older databases predate the evidence and source columns.
        ensure_column(&conn, "violations", "image_path", "TEXT")?;
        ensure_column(&conn, "violations", "video", "TEXT")?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_violations_type ON violations(type);",
        )?;
        Ok(())
    }
}

fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !names.iter().any(|name| name == column) {
        log::info!("upgrading {} table: adding column {}", table, column);
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            table, column, decl
        ))?;
    }
    Ok(())
}

impl ViolationStore for SqliteViolationStore {
    fn append(&self, violation: &NewViolation) -> Result<ViolationEvent> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO violations (type, timestamp, image_path, video) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                violation.record_type(),
                violation.timestamp,
                violation.image_path,
                violation.video
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ViolationEvent {
            id,
            record_type: violation.record_type().to_string(),
            timestamp: violation.timestamp.clone(),
            image_path: violation.image_path.clone(),
            video: violation.video.clone(),
        })
    }

    fn query(&self, filter: &ViolationFilter) -> Result<Vec<ViolationEvent>> {
        let mut sql = String::from(
            "SELECT id, type, timestamp, image_path, video FROM violations WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(kind) = &filter.record_type {
            args.push(kind.clone());
            sql.push_str(&format!(" AND type = ?{}", args.len()));
        }
        if let Some(video) = &filter.video {
            args.push(video.clone());
            sql.push_str(&format!(" AND video = ?{}", args.len()));
        }
        if let Some(since) = &filter.since {
            args.push(since.clone());
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(until) = &filter.until {
            args.push(until.clone());
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(ViolationEvent {
                id: row.get(0)?,
                record_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                timestamp: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                image_path: row.get(3)?,
                video: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryViolationStore {
    events: Mutex<Vec<ViolationEvent>>,
}

impl InMemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn append(&self, violation: &NewViolation) -> Result<ViolationEvent> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow!("violation store lock poisoned"))?;
        let id = events.last().map(|event| event.id + 1).unwrap_or(1);
        let event = ViolationEvent {
            id,
            record_type: violation.record_type().to_string(),
            timestamp: violation.timestamp.clone(),
            image_path: violation.image_path.clone(),
            video: violation.video.clone(),
        };
        events.push(event.clone());
        Ok(event)
    }

    fn query(&self, filter: &ViolationFilter) -> Result<Vec<ViolationEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| anyhow!("violation store lock poisoned"))?;
        Ok(events
            .iter()
            .filter(|event| filter.matches(event))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helmet_at(ts: &str, video: &str) -> NewViolation {
        NewViolation {
            category: ViolationCategory::Helmet,
            timestamp: ts.to_string(),
            image_path: Some(format!("snapshots/helmet/{}.jpg", ts)),
            video: Some(video.to_string()),
        }
    }

    fn exercise(store: &dyn ViolationStore) {
        let a = store
            .append(&helmet_at("2026-01-01T10:00:00+00:00", "a.mp4"))
            .unwrap();
        let b = store
            .append(&helmet_at("2026-01-01T11:00:00+00:00", "b.mp4"))
            .unwrap();
        let c = store
            .append(&NewViolation {
                category: ViolationCategory::Lane,
                timestamp: "2026-01-01T12:00:00+00:00".to_string(),
                image_path: None,
                video: Some("a.mp4".to_string()),
            })
            .unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(a.record_type, "Helmet Violation");

        let all = store.query(&ViolationFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].image_path, None);

        let helmets = store
            .query(&ViolationFilter::for_category(ViolationCategory::Helmet))
            .unwrap();
        assert_eq!(helmets.len(), 2);

        let from_a = store
            .query(&ViolationFilter {
                video: Some("a.mp4".to_string()),
                ..ViolationFilter::default()
            })
            .unwrap();
        assert_eq!(from_a.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id, c.id]);

        let window = store
            .query(&ViolationFilter {
                since: Some("2026-01-01T10:30:00+00:00".to_string()),
                until: Some("2026-01-01T11:30:00+00:00".to_string()),
                ..ViolationFilter::default()
            })
            .unwrap();
        assert_eq!(window, vec![b.clone()]);

        let limited = store
            .query(&ViolationFilter {
                limit: Some(1),
                ..ViolationFilter::default()
            })
            .unwrap();
        assert_eq!(limited, vec![a]);
    }

    #[test]
    fn sqlite_store_appends_and_filters() {
        let store = SqliteViolationStore::open(":memory:").unwrap();
        exercise(&store);
    }

    #[test]
    fn memory_store_appends_and_filters() {
        let store = InMemoryViolationStore::new();
        exercise(&store);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn legacy_table_is_upgraded_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("violations.db");
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE violations (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  type TEXT,
                  timestamp TEXT
                );
                INSERT INTO violations (type, timestamp)
                  VALUES ('Helmet Violation', '2025-06-01T08:00:00+05:30');
                "#,
            )
            .unwrap();
        }

        let store = SqliteViolationStore::open(db.to_str().unwrap()).unwrap();
        let old = store.query(&ViolationFilter::default()).unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].image_path, None);
        assert_eq!(old[0].video, None);

        let new = store
            .append(&helmet_at("2026-01-01T10:00:00+00:00", "a.mp4"))
            .unwrap();
        assert!(new.id > old[0].id);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data").join("violations.db");
        SqliteViolationStore::open(db.to_str().unwrap()).unwrap();
        assert!(db.exists());
    }
}

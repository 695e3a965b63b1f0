pub mod migrations;
pub mod models;

use chrono::{SecondsFormat, TimeDelta, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::ChatError;

/// Type alias for the shared database connection.
/// rusqlite is synchronous: we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, ChatError> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| ChatError::Internal(format!("create data dir {}: {}", data_dir, e)))?;

    let db_path = Path::new(data_dir).join("mindbridge.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Cascading message deletion relies on this
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Timestamp format used in every TEXT time column. Fixed width and UTC, so
/// lexicographic order equals chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Same format as [`now_timestamp`], shifted into the past. Cutoffs beyond the
/// representable range are rejected instead of wrapping.
pub fn timestamp_days_ago(days: u32) -> Result<String, ChatError> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| Utc::now().checked_sub_signed(delta))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| ChatError::InvalidRequest(format!("olderThanDays {} is out of range", days)))
}

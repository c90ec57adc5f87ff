use crate::config::get_data_dir;
use crate::error::HistoryError;
use crate::types::HistoryEntry;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn history_db_path() -> PathBuf {
    get_data_dir().join("history.db")
}

pub fn init_db(conn: &Connection) -> Result<(), HistoryError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task TEXT NOT NULL,
            plan TEXT NOT NULL,
            executed INTEGER NOT NULL,
            succeeded INTEGER NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Opens (creating if needed) the history database at `path`.
pub fn open_history(path: &Path) -> Result<Connection, HistoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

pub fn save_history(
    conn: &Connection,
    task: &str,
    commands: &[String],
    executed: bool,
    succeeded: bool,
) -> Result<(), HistoryError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let plan_json = serde_json::to_string(commands)?;

    conn.execute(
        "INSERT INTO history (task, plan, executed, succeeded, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![task, plan_json, executed as i32, succeeded as i32, now],
    )?;
    Ok(())
}

pub fn recent_history(conn: &Connection, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
    let mut stmt = conn.prepare(
        "SELECT task, plan, executed, succeeded, timestamp FROM history
         ORDER BY timestamp DESC, id DESC LIMIT ?1",
    )?;

    let entries = stmt
        .query_map(params![limit as i64], |row| {
            let plan_json: String = row.get(1)?;
            let commands: Vec<String> = serde_json::from_str(&plan_json).unwrap_or_default();
            Ok(HistoryEntry {
                task: row.get(0)?,
                commands,
                executed: row.get::<_, i32>(2)? != 0,
                succeeded: row.get::<_, i32>(3)? != 0,
                timestamp: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn newest_entries_come_first() {
        let conn = memory_db();
        save_history(&conn, "first", &["ls".into()], true, true).unwrap();
        save_history(&conn, "second", &["df -h".into(), "du -sh .".into()], true, false).unwrap();
        save_history(&conn, "third", &[], false, false).unwrap();

        let entries = recent_history(&conn, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].task, "third");
        assert_eq!(entries[1].task, "second");
        assert_eq!(entries[1].commands, vec!["df -h", "du -sh ."]);
        assert!(entries[1].executed);
        assert!(!entries[1].succeeded);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let conn = open_history(&path).unwrap();
        save_history(&conn, "task", &["pwd".into()], false, false).unwrap();
        assert!(path.exists());
        assert_eq!(recent_history(&conn, 10).unwrap().len(), 1);
    }
}

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::BoardResult;

pub type DBConnection = Arc<Mutex<Connection>>;
pub type UserID = i64;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS kanban_columns (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    column_id TEXT NOT NULL,
    title TEXT NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, column_id)
);

CREATE TABLE IF NOT EXISTS kanban_tasks (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    task_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    priority TEXT NOT NULL DEFAULT 'medium',
    status TEXT NOT NULL DEFAULT '',
    labels TEXT NOT NULL DEFAULT '[]',
    epic TEXT,
    parent_id TEXT,
    due_date TEXT,
    created_at_date TEXT,
    subtasks_expanded INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    task_type TEXT NOT NULL DEFAULT 'task',
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, task_id)
);
CREATE INDEX IF NOT EXISTS kanban_tasks_parent ON kanban_tasks (user_id, parent_id);

CREATE TABLE IF NOT EXISTS kanban_labels (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    color TEXT NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, name)
);

CREATE TABLE IF NOT EXISTS kanban_epics (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    color TEXT NOT NULL DEFAULT '#3498db',
    order_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, name)
);

CREATE TABLE IF NOT EXISTS kanban_task_assignments (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    column_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS kanban_board_meta (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    revision INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
";

/// Every table is created if missing; existing data is left alone.
pub fn init_schema(db_connection: &Connection) -> BoardResult<()> {
    db_connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    db_connection.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn open_database(path: impl AsRef<Path>) -> BoardResult<Connection> {
    let connection = Connection::open(path)?;
    init_schema(&connection)?;
    Ok(connection)
}

pub fn open_in_memory() -> BoardResult<Connection> {
    let connection = Connection::open_in_memory()?;
    init_schema(&connection)?;
    Ok(connection)
}

pub fn shared(connection: Connection) -> DBConnection {
    Arc::new(Mutex::new(connection))
}

pub fn create_user(username: &str, db_connection: &Connection) -> BoardResult<UserID> {
    db_connection.execute("INSERT INTO users (username) VALUES (?1)", params![username])?;
    Ok(db_connection.last_insert_rowid())
}

/// Owned board rows go with the user.
pub fn delete_user(user_id: UserID, db_connection: &Connection) -> BoardResult<()> {
    db_connection.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creation_is_idempotent() {
        let connection = open_in_memory().unwrap();

        init_schema(&connection).unwrap();

        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'kanban_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn file_database_keeps_users_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");

        let user_id = {
            let connection = open_database(&path).unwrap();
            create_user("alice", &connection).unwrap()
        };

        let connection = open_database(&path).unwrap();
        let username: String = connection
            .query_row("SELECT username FROM users WHERE id = ?1", params![user_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(username, "alice");
    }

    #[test]
    fn usernames_are_unique() {
        let connection = open_in_memory().unwrap();
        create_user("alice", &connection).unwrap();

        assert!(create_user("alice", &connection).is_err());
    }
}

//! Loading and saving whole boards.
//!
//! Saving is a destructive replace: every kanban row of the user is deleted and the
//! new board inserted inside one transaction, so readers see either the old board
//! or the new one. Callers only depend on [`BoardSync`], so a diffing writer can
//! take the place of this one.

use chrono::offset::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use std::collections::{HashMap, HashSet};

use crate::data::UserID;
use crate::error::{BoardError, BoardResult};

use super::codec::{flatten, unflatten, TaskRow};
use super::data::*;

pub trait BoardSync {
    /// The user's board, or a board with the default columns if nothing was saved yet.
    fn load_board(&mut self, user_id: UserID) -> BoardResult<Snapshot>;

    /// Replaces the user's board and returns the new revision. With
    /// `expected_revision` set, the save only happens if the stored revision matches.
    fn save_board(
        &mut self,
        user_id: UserID,
        board: &Board,
        expected_revision: Option<Revision>,
    ) -> BoardResult<Revision>;
}

impl BoardSync for Connection {
    fn load_board(&mut self, user_id: UserID) -> BoardResult<Snapshot> {
        let transaction = self.transaction()?;
        let snapshot = read_snapshot(user_id, &transaction)?;
        transaction.commit()?;

        log::debug!(
            "Loaded board for user {}: {} columns, {} root tasks, revision {}",
            user_id,
            snapshot.board.columns.len(),
            snapshot.board.tasks.len(),
            snapshot.revision
        );

        Ok(snapshot)
    }

    fn save_board(
        &mut self,
        user_id: UserID,
        board: &Board,
        expected_revision: Option<Revision>,
    ) -> BoardResult<Revision> {
        board.check_integrity()?;
        let task_rows = flatten(&board.tasks);

        // Dropping the transaction on any early return rolls everything back.
        let transaction = self.transaction()?;

        let stored_revision = read_revision(user_id, &transaction)?;
        if let Some(expected) = expected_revision {
            if expected != stored_revision {
                return Err(BoardError::Conflict {
                    expected,
                    actual: stored_revision,
                });
            }
        }

        delete_board_rows(user_id, &transaction)?;
        insert_columns(user_id, &board.columns, &transaction)?;
        insert_task_rows(user_id, &task_rows, &transaction)?;
        insert_labels(user_id, &board.labels, &transaction)?;
        insert_epics(user_id, &board.epics, &transaction)?;

        let revision = stored_revision + 1;
        transaction.execute(
            "INSERT INTO kanban_board_meta (user_id, revision, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET revision = excluded.revision, updated_at = excluded.updated_at",
            params![user_id, revision, Utc::now().to_rfc3339()],
        )?;

        transaction.commit()?;

        log::info!(
            "Saved board for user {}: {} columns, {} task rows, revision {}",
            user_id,
            board.columns.len(),
            task_rows.len(),
            revision
        );

        Ok(revision)
    }
}

pub fn read_revision(user_id: UserID, db_connection: &Connection) -> BoardResult<Revision> {
    let revision = db_connection
        .query_row(
            "SELECT revision FROM kanban_board_meta WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<usize, Revision>(0),
        )
        .optional()?;

    Ok(revision.unwrap_or(0))
}

fn read_snapshot(user_id: UserID, db_connection: &Connection) -> BoardResult<Snapshot> {
    let tasks = unflatten(read_task_rows(user_id, db_connection)?);
    let columns = read_columns(user_id, &tasks, db_connection)?;

    let board = Board {
        columns,
        tasks,
        labels: read_labels(user_id, db_connection)?,
        epics: read_epics(user_id, db_connection)?,
    };

    Ok(Snapshot {
        board,
        revision: read_revision(user_id, db_connection)?,
    })
}

fn read_task_rows(user_id: UserID, db_connection: &Connection) -> BoardResult<Vec<TaskRow>> {
    let mut statement = db_connection.prepare(
        "SELECT task_id, parent_id, order_index, task_type, title, description, priority, status,
                labels, epic, due_date, created_at_date, subtasks_expanded, completed
         FROM kanban_tasks WHERE user_id = ?1 ORDER BY rowid",
    )?;

    let rows = statement.query_map(params![user_id], |row| {
        let parent_id: Option<String> = row.get(1)?;
        let parent_id = parent_id.filter(|id| !id.is_empty());
        let task_type = match row.get::<usize, Option<String>>(3)?.as_deref() {
            Some("subtask") => TaskType::Subtask,
            Some("task") => TaskType::Task,
            _ => TaskType::for_parent(parent_id.as_deref()),
        };

        Ok(TaskRow {
            id: row.get(0)?,
            parent_id,
            order_index: row.get::<usize, Option<i64>>(2)?.unwrap_or(0),
            task_type,
            title: row.get(4)?,
            description: row.get::<usize, Option<String>>(5)?.unwrap_or_default(),
            priority: Priority::from_stored(
                &row.get::<usize, Option<String>>(6)?.unwrap_or_default(),
            ),
            status: row.get::<usize, Option<String>>(7)?.unwrap_or_default(),
            labels: row.get::<usize, Option<String>>(8)?.unwrap_or_default(),
            epic: row.get(9)?,
            due_date: row.get(10)?,
            created_at: row.get(11)?,
            subtasks_expanded: row.get::<usize, Option<bool>>(12)?.unwrap_or(false),
            completed: row.get::<usize, Option<bool>>(13)?.unwrap_or(false),
        })
    })?;

    let mut task_rows = vec![];
    for row_result in rows {
        task_rows.push(row_result?);
    }

    Ok(task_rows)
}

/// Column assignments that do not name a root task of this board are skipped, and
/// a task listed by several columns stays in the leftmost of them.
fn read_columns(
    user_id: UserID,
    tasks: &[TaskNode],
    db_connection: &Connection,
) -> BoardResult<Vec<Column>> {
    let mut column_statement = db_connection.prepare(
        "SELECT column_id, title FROM kanban_columns WHERE user_id = ?1 ORDER BY order_index, rowid",
    )?;
    let column_rows = column_statement.query_map(params![user_id], |row| {
        Ok(Column {
            id: row.get(0)?,
            title: row.get(1)?,
            tasks: vec![],
        })
    })?;

    let mut columns = vec![];
    for row_result in column_rows {
        columns.push(row_result?);
    }

    if columns.is_empty() {
        return Ok(Board::with_default_columns().columns);
    }

    let column_positions: HashMap<String, usize> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| (column.id.clone(), index))
        .collect();
    let root_ids: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    let mut placed: HashSet<String> = HashSet::new();

    let mut assignment_statement = db_connection.prepare(
        "SELECT column_id, task_id FROM kanban_task_assignments WHERE user_id = ?1 ORDER BY order_index, rowid",
    )?;
    let assignment_rows = assignment_statement.query_map(params![user_id], |row| {
        Ok((row.get::<usize, String>(0)?, row.get::<usize, String>(1)?))
    })?;

    let mut assignments = vec![];
    for row_result in assignment_rows {
        assignments.push(row_result?);
    }
    // Stable, so each column keeps its stored order.
    assignments.sort_by_key(|(column_id, _)| {
        column_positions
            .get(column_id)
            .copied()
            .unwrap_or(usize::MAX)
    });

    let mut skipped = 0;
    for (column_id, task_id) in assignments {
        match column_positions.get(&column_id) {
            Some(&index) if root_ids.contains(task_id.as_str()) && !placed.contains(&task_id) => {
                placed.insert(task_id.clone());
                columns[index].tasks.push(task_id);
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!(
            "Skipped {} column assignments of user {} that do not resolve to a root task",
            skipped,
            user_id
        );
    }

    Ok(columns)
}

fn read_labels(user_id: UserID, db_connection: &Connection) -> BoardResult<Vec<Label>> {
    let mut statement = db_connection.prepare(
        "SELECT name, color FROM kanban_labels WHERE user_id = ?1 ORDER BY order_index, rowid",
    )?;
    let rows = statement.query_map(params![user_id], |row| {
        Ok(Label {
            name: row.get(0)?,
            color: row.get(1)?,
        })
    })?;

    let mut labels = vec![];
    for row_result in rows {
        labels.push(row_result?);
    }

    Ok(labels)
}

fn read_epics(user_id: UserID, db_connection: &Connection) -> BoardResult<Vec<Epic>> {
    let mut statement = db_connection.prepare(
        "SELECT name, color FROM kanban_epics WHERE user_id = ?1 ORDER BY order_index, rowid",
    )?;
    let rows = statement.query_map(params![user_id], |row| {
        Ok(Epic {
            name: row.get(0)?,
            color: row
                .get::<usize, Option<String>>(1)?
                .unwrap_or_else(|| DEFAULT_EPIC_COLOR.to_string()),
        })
    })?;

    let mut epics = vec![];
    for row_result in rows {
        epics.push(row_result?);
    }

    Ok(epics)
}

fn delete_board_rows(user_id: UserID, db_connection: &Connection) -> BoardResult<()> {
    for table in [
        "kanban_task_assignments",
        "kanban_tasks",
        "kanban_columns",
        "kanban_labels",
        "kanban_epics",
    ]
    .iter()
    {
        db_connection.execute(
            &format!("DELETE FROM {} WHERE user_id = ?1", table),
            params![user_id],
        )?;
    }

    Ok(())
}

fn insert_columns(
    user_id: UserID,
    columns: &[Column],
    db_connection: &Connection,
) -> BoardResult<()> {
    let mut column_statement = db_connection.prepare(
        "INSERT INTO kanban_columns (user_id, column_id, title, order_index) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut assignment_statement = db_connection.prepare(
        "INSERT INTO kanban_task_assignments (user_id, column_id, task_id, order_index) VALUES (?1, ?2, ?3, ?4)",
    )?;

    for (column_index, column) in columns.iter().enumerate() {
        column_statement.execute(params![user_id, column.id, column.title, column_index as i64])?;

        for (task_index, task_id) in column.tasks.iter().enumerate() {
            assignment_statement.execute(params![user_id, column.id, task_id, task_index as i64])?;
        }
    }

    Ok(())
}

fn insert_task_rows(
    user_id: UserID,
    task_rows: &[TaskRow],
    db_connection: &Connection,
) -> BoardResult<()> {
    let mut statement = db_connection.prepare(
        "INSERT INTO kanban_tasks (user_id, task_id, title, description, priority, status, labels, epic,
                                   parent_id, due_date, created_at_date, subtasks_expanded, completed,
                                   task_type, order_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )?;

    for task_row in task_rows.iter() {
        statement.execute(params![
            user_id,
            task_row.id,
            task_row.title,
            task_row.description,
            task_row.priority.as_str(),
            task_row.status,
            task_row.labels,
            task_row.epic,
            task_row.parent_id,
            task_row.due_date,
            task_row.created_at,
            task_row.subtasks_expanded,
            task_row.completed,
            task_row.task_type.as_str(),
            task_row.order_index,
        ])?;
    }

    Ok(())
}

fn insert_labels(user_id: UserID, labels: &[Label], db_connection: &Connection) -> BoardResult<()> {
    let mut statement = db_connection.prepare(
        "INSERT INTO kanban_labels (user_id, name, color, order_index) VALUES (?1, ?2, ?3, ?4)",
    )?;

    for (index, label) in labels.iter().enumerate() {
        statement.execute(params![user_id, label.name, label.color, index as i64])?;
    }

    Ok(())
}

fn insert_epics(user_id: UserID, epics: &[Epic], db_connection: &Connection) -> BoardResult<()> {
    let mut statement = db_connection.prepare(
        "INSERT INTO kanban_epics (user_id, name, color, order_index) VALUES (?1, ?2, ?3, ?4)",
    )?;

    for (index, epic) in epics.iter().enumerate() {
        statement.execute(params![user_id, epic.name, epic.color, index as i64])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{create_user, delete_user, open_in_memory};
    use crate::kanban::store::{TaskDraft, TaskPatch};

    fn connection_with_user() -> (Connection, UserID) {
        let connection = open_in_memory().unwrap();
        let user_id = create_user("alice", &connection).unwrap();
        (connection, user_id)
    }

    /// Three columns, a three-level tree with siblings at each level, labels and epics.
    fn rich_board() -> Board {
        let mut board = Board::with_default_columns();
        board.add_label("urgent", "#e74c3c").unwrap();
        board.add_label("home", "#9b59b6").unwrap();
        board.add_epic("Launch", "#2ecc71").unwrap();

        let mut draft = TaskDraft::titled("Release");
        draft.labels = vec!["urgent".to_string(), "home".to_string()];
        draft.epic = Some("Launch".to_string());
        draft.due_date = Some("2024-06-01".to_string());
        let release = board.create_task("todo", draft).unwrap();
        let docs = board.create_subtask(&release, TaskDraft::titled("Docs")).unwrap();
        board.create_subtask(&release, TaskDraft::titled("Binaries")).unwrap();
        board.create_subtask(&docs, TaskDraft::titled("API docs")).unwrap();
        let guide = board.create_subtask(&docs, TaskDraft::titled("Guide")).unwrap();
        board.create_subtask(&guide, TaskDraft::titled("Screenshots")).unwrap();
        board.toggle_subtask_collapse(&docs).unwrap();

        let chores = board.create_task("in-progress", TaskDraft::titled("Chores")).unwrap();
        board
            .update_task(
                &chores,
                TaskPatch {
                    priority: Some(Priority::Low),
                    description: Some("Weekly".to_string()),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        board.create_task("in-progress", TaskDraft::titled("Taxes")).unwrap();

        board
    }

    #[test]
    fn first_load_gives_default_columns_at_revision_zero() {
        let (mut connection, user_id) = connection_with_user();

        let snapshot = connection.load_board(user_id).unwrap();

        assert_eq!(snapshot.board, Board::with_default_columns());
        assert_eq!(snapshot.revision, 0);
    }

    #[test]
    fn save_then_load_returns_the_same_board() {
        let (mut connection, user_id) = connection_with_user();
        let board = rich_board();

        let revision = connection.save_board(user_id, &board, None).unwrap();
        let snapshot = connection.load_board(user_id).unwrap();

        assert_eq!(revision, 1);
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.board, board);
    }

    #[test]
    fn saving_replaces_everything_from_before() {
        let (mut connection, user_id) = connection_with_user();
        connection.save_board(user_id, &rich_board(), None).unwrap();

        let mut smaller = Board::with_default_columns();
        smaller.create_task("done", TaskDraft::titled("Only one")).unwrap();
        connection.save_board(user_id, &smaller, None).unwrap();

        let snapshot = connection.load_board(user_id).unwrap();
        assert_eq!(snapshot.board, smaller);
        assert_eq!(snapshot.revision, 2);

        let stored_rows: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM kanban_tasks WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored_rows, 1);
    }

    #[test]
    fn nested_scenario_survives_reload() {
        let (mut connection, user_id) = connection_with_user();
        let mut board = Board::with_default_columns();
        let t1 = board.create_task("todo", TaskDraft::titled("T1")).unwrap();
        let s1 = board.create_subtask(&t1, TaskDraft::titled("S1")).unwrap();
        let n1 = board.create_subtask(&s1, TaskDraft::titled("N1")).unwrap();

        connection.save_board(user_id, &board, None).unwrap();
        let loaded = connection.load_board(user_id).unwrap().board;

        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].id, t1);
        assert_eq!(loaded.tasks[0].children.len(), 1);
        assert_eq!(loaded.tasks[0].children[0].id, s1);
        assert_eq!(loaded.tasks[0].children[0].children.len(), 1);
        assert_eq!(loaded.tasks[0].children[0].children[0].id, n1);
        assert!(loaded.tasks[0].children[0].children[0].children.is_empty());
        assert_eq!(loaded.columns[0].id, "todo");
        assert_eq!(loaded.columns[0].tasks, vec![t1]);
    }

    #[test]
    fn identical_titles_remain_separate_tasks() {
        let (mut connection, user_id) = connection_with_user();
        let mut board = Board::with_default_columns();
        let first = board.create_task("todo", TaskDraft::titled("Groceries")).unwrap();
        let second = board.create_task("todo", TaskDraft::titled("Groceries")).unwrap();
        board.toggle_completed(&second).unwrap();

        connection.save_board(user_id, &board, None).unwrap();
        let loaded = connection.load_board(user_id).unwrap().board;

        assert_eq!(loaded.tasks.len(), 2);
        assert!(!loaded.find_task(&first).unwrap().completed);
        assert!(loaded.find_task(&second).unwrap().completed);
        assert_eq!(loaded.columns[0].tasks, vec![first, second]);
    }

    #[test]
    fn failed_save_leaves_the_previous_board_visible() {
        let (mut connection, user_id) = connection_with_user();
        let board = rich_board();
        connection.save_board(user_id, &board, None).unwrap();
        connection
            .execute_batch(
                "CREATE TRIGGER refuse_boom BEFORE INSERT ON kanban_tasks
                 WHEN NEW.title = 'boom' BEGIN SELECT RAISE(ABORT, 'refused'); END;",
            )
            .unwrap();

        let mut broken = Board::with_default_columns();
        broken.create_task("todo", TaskDraft::titled("fine")).unwrap();
        broken.create_task("todo", TaskDraft::titled("boom")).unwrap();
        let result = connection.save_board(user_id, &broken, None);

        assert!(matches!(result, Err(BoardError::Persistence(_))));
        let snapshot = connection.load_board(user_id).unwrap();
        assert_eq!(snapshot.board, board);
        assert_eq!(snapshot.revision, 1);
    }

    #[test]
    fn invalid_boards_are_rejected_before_touching_storage() {
        let (mut connection, user_id) = connection_with_user();
        connection.save_board(user_id, &rich_board(), None).unwrap();

        let mut untitled = rich_board();
        untitled.tasks[0].children[0].title = String::new();

        assert!(matches!(
            connection.save_board(user_id, &untitled, None),
            Err(BoardError::Validation { .. })
        ));
        assert_eq!(connection.load_board(user_id).unwrap().revision, 1);
    }

    #[test]
    fn stale_revision_is_a_conflict() {
        let (mut connection, user_id) = connection_with_user();
        let board = rich_board();
        let first = connection.save_board(user_id, &board, Some(0)).unwrap();
        connection.save_board(user_id, &board, Some(first)).unwrap();

        let result = connection.save_board(user_id, &Board::with_default_columns(), Some(first));

        assert!(matches!(
            result,
            Err(BoardError::Conflict {
                expected: 1,
                actual: 2
            })
        ));
        assert_eq!(connection.load_board(user_id).unwrap().board, board);
    }

    #[test]
    fn boards_are_scoped_per_user() {
        let (mut connection, alice) = connection_with_user();
        let bob = create_user("bob", &connection).unwrap();
        let board = rich_board();
        connection.save_board(alice, &board, None).unwrap();

        // Same task ids for another user do not collide.
        connection.save_board(bob, &board, None).unwrap();
        connection.save_board(bob, &Board::with_default_columns(), None).unwrap();

        assert_eq!(connection.load_board(alice).unwrap().board, board);
        assert!(connection.load_board(bob).unwrap().board.tasks.is_empty());
    }

    #[test]
    fn deleting_a_user_removes_their_board() {
        let (mut connection, user_id) = connection_with_user();
        connection.save_board(user_id, &rich_board(), None).unwrap();

        delete_user(user_id, &connection).unwrap();

        let tables = [
            "kanban_tasks",
            "kanban_columns",
            "kanban_task_assignments",
            "kanban_labels",
        ];
        for table in tables.iter() {
            let remaining: i64 = connection
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(remaining, 0, "{} still has rows", table);
        }
    }

    #[test]
    fn unknown_users_cannot_save() {
        let (mut connection, _) = connection_with_user();

        let result = connection.save_board(999, &rich_board(), None);

        assert!(matches!(result, Err(BoardError::Persistence(_))));
    }

    #[test]
    fn damaged_rows_are_tolerated_on_load() {
        let (mut connection, user_id) = connection_with_user();
        let mut board = Board::with_default_columns();
        let root = board.create_task("todo", TaskDraft::titled("Kept")).unwrap();
        connection.save_board(user_id, &board, None).unwrap();

        connection
            .execute_batch(&format!(
                "INSERT INTO kanban_tasks (user_id, task_id, title, parent_id, task_type, labels, priority)
                 VALUES ({user}, 'lost', 'Lost', 'gone', 'subtask', 'oops', 'urgent');
                 INSERT INTO kanban_tasks (user_id, task_id, title, parent_id, task_type, order_index)
                 VALUES ({user}, 'stray', 'Stray', NULL, 'subtask', 5);
                 INSERT INTO kanban_task_assignments (user_id, column_id, task_id, order_index)
                 VALUES ({user}, 'todo', 'lost', 1), ({user}, 'nowhere', '{root}', 0), ({user}, 'done', '{root}', 0);",
                user = user_id,
                root = root
            ))
            .unwrap();

        let loaded = connection.load_board(user_id).unwrap().board;

        let ids: Vec<&str> = loaded.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![root.as_str(), "stray"]);
        assert_eq!(loaded.tasks[1].task_type, TaskType::Task);
        assert_eq!(loaded.columns[0].tasks, vec![root.clone()]);
        assert!(loaded.columns[2].tasks.is_empty());
    }

    #[test]
    fn tasks_listed_twice_stay_in_the_leftmost_column() {
        let (mut connection, user_id) = connection_with_user();
        let mut board = Board::with_default_columns();
        let first = board.create_task("todo", TaskDraft::titled("First")).unwrap();
        let second = board.create_task("todo", TaskDraft::titled("Second")).unwrap();
        connection.save_board(user_id, &board, None).unwrap();

        connection
            .execute(
                "INSERT INTO kanban_task_assignments (user_id, column_id, task_id, order_index)
                 VALUES (?1, 'done', ?2, 0)",
                params![user_id, second],
            )
            .unwrap();

        let loaded = connection.load_board(user_id).unwrap().board;

        assert_eq!(loaded.columns[0].tasks, vec![first, second]);
        assert!(loaded.columns[2].tasks.is_empty());
    }
}

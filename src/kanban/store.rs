//! Structural edits on an owned [`Board`].
//!
//! Every operation validates before it touches the board, so an `Err` always
//! leaves the board exactly as it was.

use chrono::offset::Utc;
use uuid::Uuid;

use std::collections::HashSet;

use crate::error::{BoardError, BoardResult};

use super::data::*;

/// Attributes of a task about to be created.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: String,
    pub labels: Vec<String>,
    pub epic: Option<String>,
    pub due_date: Option<String>,
}

impl TaskDraft {
    pub fn titled(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            ..TaskDraft::default()
        }
    }
}

/// Attributes to overwrite on an existing task; `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<String>,
    pub labels: Option<Vec<String>>,
    pub epic: Option<Option<String>>,
    pub due_date: Option<Option<String>>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Maps a free-form task status to the column an imported root task lands in.
pub fn column_for_status(status: &str) -> &'static str {
    match status.trim() {
        "To Do" | "Pending" | "К исполнению" | "По плану" => "todo",
        "Done" | "Completed" | "Готово" => DONE_COLUMN_ID,
        _ => "in-progress",
    }
}

fn require_title(title: &str) -> BoardResult<()> {
    if title.trim().is_empty() {
        return Err(BoardError::validation("title", "must not be empty"));
    }
    Ok(())
}

fn require_name(field: &str, name: &str) -> BoardResult<()> {
    if name.trim().is_empty() {
        return Err(BoardError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Index path from the root sequence down to the node with `id`.
fn locate(roots: &[TaskNode], id: &str) -> Option<Vec<usize>> {
    let mut pending: Vec<(Vec<usize>, &TaskNode)> = roots
        .iter()
        .enumerate()
        .map(|(index, node)| (vec![index], node))
        .collect();

    while let Some((path, node)) = pending.pop() {
        if node.id == id {
            return Some(path);
        }

        for (index, child) in node.children.iter().enumerate() {
            let mut child_path = path.clone();
            child_path.push(index);
            pending.push((child_path, child));
        }
    }

    None
}

/// The sibling list that holds the node at `path`, and the node's index in it.
fn slot_mut<'a>(
    roots: &'a mut Vec<TaskNode>,
    path: &[usize],
) -> Option<(&'a mut Vec<TaskNode>, usize)> {
    let (&index, ancestors) = path.split_last()?;
    let mut siblings = roots;

    for &ancestor in ancestors {
        siblings = &mut siblings.get_mut(ancestor)?.children;
    }

    if index < siblings.len() {
        Some((siblings, index))
    } else {
        None
    }
}

fn complete_subtree(node: &mut TaskNode) {
    let mut pending: Vec<&mut TaskNode> = node.children.iter_mut().collect();

    while let Some(descendant) = pending.pop() {
        descendant.completed = true;
        pending.extend(descendant.children.iter_mut());
    }
}

impl Board {
    pub fn find_task(&self, id: &str) -> Option<&TaskNode> {
        let path = locate(&self.tasks, id)?;
        let (&last, ancestors) = path.split_last()?;
        let mut siblings = &self.tasks;

        for &ancestor in ancestors {
            siblings = &siblings.get(ancestor)?.children;
        }

        siblings.get(last)
    }

    /// Locates a task anywhere in the forest and returns its sibling list and index.
    pub fn locate_mut(&mut self, id: &str) -> Option<(&mut Vec<TaskNode>, usize)> {
        let path = locate(&self.tasks, id)?;
        slot_mut(&mut self.tasks, &path)
    }

    fn task_mut(&mut self, id: &str) -> BoardResult<&mut TaskNode> {
        match self.locate_mut(id) {
            Some((siblings, index)) => Ok(&mut siblings[index]),
            None => Err(BoardError::not_found("Task", id)),
        }
    }

    fn column_index(&self, id: &str) -> BoardResult<usize> {
        self.columns
            .iter()
            .position(|column| column.id == id)
            .ok_or_else(|| BoardError::not_found("Column", id))
    }

    pub fn column_of(&self, task_id: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|column| column.tasks.iter().any(|id| id == task_id))
    }

    fn fresh_id(&self, prefix: &str) -> TaskID {
        loop {
            let id = format!("{}-{}", prefix, Uuid::new_v4().simple());
            if locate(&self.tasks, &id).is_none() {
                return id;
            }
        }
    }

    fn node_from_draft(draft: TaskDraft, id: TaskID, parent_id: Option<&str>) -> TaskNode {
        TaskNode {
            id,
            title: draft.title.trim().to_string(),
            description: draft.description,
            priority: draft.priority,
            status: draft.status,
            labels: dedup_labels(draft.labels),
            epic: draft.epic.filter(|epic| !epic.is_empty()),
            parent_id: parent_id.map(str::to_string),
            due_date: draft.due_date.filter(|date| !date.is_empty()),
            created_at: Some(now()),
            children: vec![],
            subtasks_expanded: false,
            completed: false,
            task_type: TaskType::for_parent(parent_id),
        }
    }

    /// Adds a root task at the end of `column_id`.
    pub fn create_task(&mut self, column_id: &str, draft: TaskDraft) -> BoardResult<TaskID> {
        require_title(&draft.title)?;
        let column_index = self.column_index(column_id)?;

        let id = self.fresh_id("task");
        let task = Board::node_from_draft(draft, id.clone(), None);

        self.tasks.push(task);
        self.columns[column_index].tasks.push(id.clone());

        Ok(id)
    }

    /// Appends a subtask under `parent_id`, which may sit at any depth.
    pub fn create_subtask(&mut self, parent_id: &str, draft: TaskDraft) -> BoardResult<TaskID> {
        require_title(&draft.title)?;
        if locate(&self.tasks, parent_id).is_none() {
            return Err(BoardError::not_found("Task", parent_id));
        }

        let id = self.fresh_id("subtask");
        let subtask = Board::node_from_draft(draft, id.clone(), Some(parent_id));

        self.task_mut(parent_id)?.children.push(subtask);

        Ok(id)
    }

    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> BoardResult<()> {
        if let Some(title) = &patch.title {
            require_title(title)?;
        }

        let task = self.task_mut(id)?;

        if let Some(title) = patch.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(labels) = patch.labels {
            task.labels = dedup_labels(labels);
        }
        if let Some(epic) = patch.epic {
            task.epic = epic.filter(|epic| !epic.is_empty());
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date.filter(|date| !date.is_empty());
        }
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }

        Ok(())
    }

    /// Removes the task and its whole subtree.
    pub fn delete_task(&mut self, id: &str) -> BoardResult<TaskNode> {
        let path = locate(&self.tasks, id).ok_or_else(|| BoardError::not_found("Task", id))?;
        let (siblings, index) =
            slot_mut(&mut self.tasks, &path).ok_or_else(|| BoardError::not_found("Task", id))?;
        let removed = siblings.remove(index);

        if path.len() == 1 {
            for column in self.columns.iter_mut() {
                column.tasks.retain(|task_id| task_id != id);
            }
        }

        Ok(removed)
    }

    /// Moves a root task to the end of another column. Landing in the done column
    /// completes every descendant; leaving it changes nothing.
    pub fn move_task(&mut self, id: &str, target_column_id: &str) -> BoardResult<()> {
        let path = locate(&self.tasks, id).ok_or_else(|| BoardError::not_found("Task", id))?;
        if path.len() != 1 {
            return Err(BoardError::constraint(format!(
                "Only root tasks can be moved between columns, {} is a subtask",
                id
            )));
        }
        let target_index = self.column_index(target_column_id)?;

        for column in self.columns.iter_mut() {
            column.tasks.retain(|task_id| task_id != id);
        }
        self.columns[target_index].tasks.push(id.to_string());

        if target_column_id == DONE_COLUMN_ID {
            complete_subtree(&mut self.tasks[path[0]]);
        }

        Ok(())
    }

    pub fn move_column(&mut self, id: &str, direction: Direction) -> BoardResult<()> {
        let index = self.column_index(id)?;

        match direction {
            Direction::Left if index > 0 => self.columns.swap(index, index - 1),
            Direction::Right if index + 1 < self.columns.len() => {
                self.columns.swap(index, index + 1)
            }
            _ => {}
        }

        Ok(())
    }

    /// Removes a column. A column that still holds tasks needs a destination for them.
    pub fn delete_column(&mut self, id: &str, reassign_to: Option<&str>) -> BoardResult<()> {
        let index = self.column_index(id)?;
        if self.columns.len() <= 1 {
            return Err(BoardError::constraint(
                "Cannot delete the last column, a board needs at least one",
            ));
        }

        let destination = match reassign_to {
            Some(destination) if destination == id => {
                return Err(BoardError::constraint(
                    "Tasks cannot be reassigned to the column being deleted",
                ))
            }
            Some(destination) => Some(self.column_index(destination)?),
            None => None,
        };

        if !self.columns[index].tasks.is_empty() && destination.is_none() {
            return Err(BoardError::constraint(format!(
                "Column {} still holds {} tasks, choose a column to move them to",
                id,
                self.columns[index].tasks.len()
            )));
        }

        let removed = self.columns.remove(index);
        if let Some(destination) = destination {
            let destination = if destination > index {
                destination - 1
            } else {
                destination
            };
            self.columns[destination].tasks.extend(removed.tasks);
        }

        Ok(())
    }

    pub fn toggle_subtask_collapse(&mut self, id: &str) -> BoardResult<bool> {
        let task = self.task_mut(id)?;
        task.subtasks_expanded = !task.subtasks_expanded;
        Ok(task.subtasks_expanded)
    }

    pub fn toggle_completed(&mut self, id: &str) -> BoardResult<bool> {
        let task = self.task_mut(id)?;
        task.completed = !task.completed;
        Ok(task.completed)
    }

    pub fn collapse_all(&mut self) {
        let mut pending: Vec<&mut TaskNode> = self.tasks.iter_mut().collect();

        while let Some(task) = pending.pop() {
            task.subtasks_expanded = false;
            pending.extend(task.children.iter_mut());
        }
    }

    /// Deep copy of a root task with fresh ids, placed after the original's column entries.
    pub fn duplicate_task(&mut self, id: &str) -> BoardResult<TaskID> {
        let path = locate(&self.tasks, id).ok_or_else(|| BoardError::not_found("Task", id))?;
        if path.len() != 1 {
            return Err(BoardError::constraint(format!(
                "Only root tasks can be duplicated, {} is a subtask",
                id
            )));
        }

        let mut copy = self.tasks[path[0]].clone();
        copy.id = self.fresh_id("task");
        copy.title = format!("{} (Copy)", copy.title);
        copy.created_at = Some(now());

        let mut pending: Vec<&mut TaskNode> = vec![&mut copy];
        while let Some(node) = pending.pop() {
            let parent_id = node.id.clone();
            for child in node.children.iter_mut() {
                child.id = self.fresh_id("subtask");
                child.parent_id = Some(parent_id.clone());
                pending.push(child);
            }
        }

        let copy_id = copy.id.clone();
        let column_index = self
            .columns
            .iter()
            .position(|column| column.tasks.iter().any(|t| t == id));

        self.tasks.push(copy);
        if let Some(column_index) = column_index {
            self.columns[column_index].tasks.push(copy_id.clone());
        }

        Ok(copy_id)
    }

    pub fn add_column(&mut self, title: &str) -> BoardResult<ColumnID> {
        require_title(title)?;

        let id = format!("column-{}", Uuid::new_v4().simple());
        self.columns.push(Column::new(&id, title.trim()));

        Ok(id)
    }

    pub fn rename_column(&mut self, id: &str, title: &str) -> BoardResult<()> {
        require_title(title)?;
        let index = self.column_index(id)?;
        self.columns[index].title = title.trim().to_string();
        Ok(())
    }

    pub fn ensure_default_columns(&mut self) {
        for (id, title) in DEFAULT_COLUMNS.iter() {
            if !self.columns.iter().any(|column| column.id == *id) {
                log::debug!("Adding missing default column {}", id);
                self.columns.push(Column::new(id, title));
            }
        }
    }

    /// Puts every root task that no column references into the column its status maps to.
    pub fn place_unassigned_by_status(&mut self) -> usize {
        let unplaced: Vec<(TaskID, &'static str)> = self
            .tasks
            .iter()
            .filter(|task| self.column_of(&task.id).is_none())
            .map(|task| (task.id.clone(), column_for_status(&task.status)))
            .collect();

        for (task_id, column_id) in unplaced.iter() {
            let index = match self.columns.iter().position(|column| column.id == *column_id) {
                Some(index) => index,
                None => {
                    let title = DEFAULT_COLUMNS
                        .iter()
                        .find(|(id, _)| id == column_id)
                        .map(|(_, title)| *title)
                        .unwrap_or(*column_id);
                    self.columns.push(Column::new(column_id, title));
                    self.columns.len() - 1
                }
            };
            self.columns[index].tasks.push(task_id.clone());
        }

        unplaced.len()
    }

    pub fn add_label(&mut self, name: &str, color: &str) -> BoardResult<()> {
        require_name("label name", name)?;
        if self.labels.iter().any(|label| label.name == name) {
            return Err(BoardError::constraint(format!("Label {} already exists", name)));
        }

        self.labels.push(Label {
            name: name.to_string(),
            color: color.to_string(),
        });
        Ok(())
    }

    /// Tasks keep referring to the removed name; it just stops resolving to a color.
    pub fn remove_label(&mut self, name: &str) -> BoardResult<Label> {
        let index = self
            .labels
            .iter()
            .position(|label| label.name == name)
            .ok_or_else(|| BoardError::not_found("Label", name))?;
        Ok(self.labels.remove(index))
    }

    pub fn add_epic(&mut self, name: &str, color: &str) -> BoardResult<()> {
        require_name("epic name", name)?;
        if self.epics.iter().any(|epic| epic.name == name) {
            return Err(BoardError::constraint(format!("Epic {} already exists", name)));
        }

        self.epics.push(Epic {
            name: name.to_string(),
            color: color.to_string(),
        });
        Ok(())
    }

    pub fn remove_epic(&mut self, name: &str) -> BoardResult<Epic> {
        let index = self
            .epics
            .iter()
            .position(|epic| epic.name == name)
            .ok_or_else(|| BoardError::not_found("Epic", name))?;
        Ok(self.epics.remove(index))
    }

    /// Checks a board received from a client before it replaces the stored one.
    pub fn check_integrity(&self) -> BoardResult<()> {
        let mut task_ids = HashSet::new();
        let mut pending: Vec<&TaskNode> = self.tasks.iter().collect();

        while let Some(task) = pending.pop() {
            if task.id.trim().is_empty() {
                return Err(BoardError::validation("id", "task ids must not be empty"));
            }
            if !task_ids.insert(task.id.as_str()) {
                return Err(BoardError::validation(
                    "id",
                    format!("task id {} is used more than once", task.id),
                ));
            }
            if task.title.trim().is_empty() {
                return Err(BoardError::validation(
                    "title",
                    format!("task {} has an empty title", task.id),
                ));
            }
            pending.extend(task.children.iter());
        }

        if self.columns.is_empty() {
            return Err(BoardError::constraint("A board needs at least one column"));
        }

        let root_ids: HashSet<&str> = self.tasks.iter().map(|task| task.id.as_str()).collect();
        let mut column_ids = HashSet::new();
        let mut placed = HashSet::new();

        for column in self.columns.iter() {
            if column.id.trim().is_empty() {
                return Err(BoardError::validation("column id", "must not be empty"));
            }
            if !column_ids.insert(column.id.as_str()) {
                return Err(BoardError::constraint(format!(
                    "Column id {} is used more than once",
                    column.id
                )));
            }
            for task_id in column.tasks.iter() {
                if !root_ids.contains(task_id.as_str()) {
                    return Err(BoardError::constraint(format!(
                        "Column {} lists {}, which is not a root task",
                        column.id, task_id
                    )));
                }
                if !placed.insert(task_id.as_str()) {
                    return Err(BoardError::constraint(format!(
                        "Task {} is placed in more than one column",
                        task_id
                    )));
                }
            }
        }

        let mut label_names = HashSet::new();
        for label in self.labels.iter() {
            require_name("label name", &label.name)?;
            if !label_names.insert(label.name.as_str()) {
                return Err(BoardError::constraint(format!(
                    "Label {} is defined twice",
                    label.name
                )));
            }
        }

        let mut epic_names = HashSet::new();
        for epic in self.epics.iter() {
            require_name("epic name", &epic.name)?;
            if !epic_names.insert(epic.name.as_str()) {
                return Err(BoardError::constraint(format!("Epic {} is defined twice", epic.name)));
            }
        }

        Ok(())
    }
}

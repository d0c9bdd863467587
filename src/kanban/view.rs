use serde::Serialize;

use super::data::*;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Chip {
    pub name: String,
    /// `None` when the name no longer matches a defined label or epic.
    pub color: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SubtaskProgress {
    pub completed: usize,
    pub total: usize,
}

/// Everything needed to draw one task card and, when expanded, its nested subtasks.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCard {
    pub id: TaskID,
    pub title: String,
    pub priority: Priority,
    pub due_date: Option<String>,
    pub completed: bool,
    pub labels: Vec<Chip>,
    pub epic: Option<Chip>,
    pub depth: usize,
    pub progress: SubtaskProgress,
    pub expanded: bool,
    /// Only filled for expanded cards.
    pub subtasks: Vec<TaskCard>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    pub id: ColumnID,
    pub title: String,
    pub cards: Vec<TaskCard>,
    pub can_move_left: bool,
    pub can_move_right: bool,
    /// Columns holding tasks need a destination before they can go.
    pub can_delete: bool,
}

pub fn label_color<'a>(board: &'a Board, name: &str) -> Option<&'a str> {
    board
        .labels
        .iter()
        .find(|label| label.name == name)
        .map(|label| label.color.as_str())
}

pub fn epic_color<'a>(board: &'a Board, name: &str) -> Option<&'a str> {
    board
        .epics
        .iter()
        .find(|epic| epic.name == name)
        .map(|epic| epic.color.as_str())
}

/// Completed and total counts over every nested subtask, not just direct children.
pub fn subtask_progress(task: &TaskNode) -> SubtaskProgress {
    let mut progress = SubtaskProgress {
        completed: 0,
        total: 0,
    };
    let mut pending: Vec<&TaskNode> = task.children.iter().collect();

    while let Some(subtask) = pending.pop() {
        progress.total += 1;
        if subtask.completed {
            progress.completed += 1;
        }
        pending.extend(subtask.children.iter());
    }

    progress
}

pub fn task_card(board: &Board, task: &TaskNode, depth: usize) -> TaskCard {
    let subtasks = if task.subtasks_expanded {
        task.children
            .iter()
            .map(|child| task_card(board, child, depth + 1))
            .collect()
    } else {
        vec![]
    };

    TaskCard {
        id: task.id.clone(),
        title: task.title.clone(),
        priority: task.priority,
        due_date: task.due_date.clone(),
        completed: task.completed,
        labels: task
            .labels
            .iter()
            .map(|name| Chip {
                name: name.clone(),
                color: label_color(board, name).map(str::to_string),
            })
            .collect(),
        epic: task.epic.as_ref().map(|name| Chip {
            name: name.clone(),
            color: epic_color(board, name).map(str::to_string),
        }),
        depth,
        progress: subtask_progress(task),
        expanded: task.subtasks_expanded,
        subtasks,
    }
}

/// Cards in column order. Ids that no longer resolve to a root task are skipped.
pub fn board_view(board: &Board) -> Vec<ColumnView> {
    let last = board.columns.len().saturating_sub(1);

    board
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| ColumnView {
            id: column.id.clone(),
            title: column.title.clone(),
            cards: column
                .tasks
                .iter()
                .filter_map(|id| board.tasks.iter().find(|task| task.id == *id))
                .map(|task| task_card(board, task, 0))
                .collect(),
            can_move_left: index > 0,
            can_move_right: index < last,
            can_delete: column.tasks.is_empty() && board.columns.len() > 1,
        })
        .collect()
}

//! Conversion between the nested task forest and the flat rows stored in `kanban_tasks`.

use std::collections::{HashMap, HashSet};

use super::data::*;

/// One stored task, at any depth.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: TaskID,
    pub parent_id: Option<TaskID>,
    pub order_index: i64,
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: String,
    /// JSON array of label names.
    pub labels: String,
    pub epic: Option<String>,
    pub due_date: Option<String>,
    pub created_at: Option<String>,
    pub subtasks_expanded: bool,
    pub completed: bool,
}

impl TaskRow {
    fn from_node(node: &TaskNode, parent_id: Option<&str>, order_index: usize) -> TaskRow {
        TaskRow {
            id: node.id.clone(),
            parent_id: parent_id.map(str::to_string),
            order_index: order_index as i64,
            task_type: TaskType::for_parent(parent_id),
            title: node.title.clone(),
            description: node.description.clone(),
            priority: node.priority,
            status: node.status.clone(),
            labels: encode_labels(&node.labels),
            epic: node.epic.clone(),
            due_date: node.due_date.clone(),
            created_at: node.created_at.clone(),
            subtasks_expanded: node.subtasks_expanded,
            completed: node.completed,
        }
    }

    fn into_node(self) -> TaskNode {
        let labels = decode_labels(&self.id, &self.labels);

        TaskNode {
            task_type: TaskType::for_parent(self.parent_id.as_deref()),
            id: self.id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            status: self.status,
            labels,
            epic: self.epic.filter(|s| !s.is_empty()),
            parent_id: self.parent_id,
            due_date: self.due_date.filter(|s| !s.is_empty()),
            created_at: self.created_at.filter(|s| !s.is_empty()),
            children: vec![],
            subtasks_expanded: self.subtasks_expanded,
            completed: self.completed,
        }
    }
}

pub fn encode_labels(labels: &[String]) -> String {
    serde_json::Value::from(labels.to_vec()).to_string()
}

/// Absent or malformed label lists read as empty.
pub fn decode_labels(task_id: &str, encoded: &str) -> Vec<String> {
    if encoded.trim().is_empty() {
        return vec![];
    }

    match serde_json::from_str::<Vec<String>>(encoded) {
        Ok(labels) => labels,
        Err(e) => {
            log::warn!("Ignoring malformed labels on task {}: {}", task_id, e);
            vec![]
        }
    }
}

/// Pre-order, parent before children. `parent_id` comes from the node's position,
/// never from its own `parent_id` field.
pub fn flatten(roots: &[TaskNode]) -> Vec<TaskRow> {
    let mut rows = Vec::new();
    let mut pending: Vec<(&TaskNode, Option<&str>, usize)> = roots
        .iter()
        .enumerate()
        .rev()
        .map(|(index, node)| (node, None, index))
        .collect();

    while let Some((node, parent_id, order_index)) = pending.pop() {
        rows.push(TaskRow::from_node(node, parent_id, order_index));

        for (index, child) in node.children.iter().enumerate().rev() {
            pending.push((child, Some(node.id.as_str()), index));
        }
    }

    rows
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnflattenReport {
    /// Rows whose ancestry never reaches a root, subtrees included.
    pub unreachable: usize,
    /// Rows dropped because an earlier row already used their id.
    pub duplicates: usize,
}

pub fn unflatten(rows: Vec<TaskRow>) -> Vec<TaskNode> {
    unflatten_with_report(rows).0
}

/// Rebuilds the forest. The stored `parent_id` decides placement: a row typed
/// `subtask` without a parent becomes a root, a row typed `task` with a parent is
/// nested. Rows that cannot reach a root (missing parent, parent cycle) are dropped.
pub fn unflatten_with_report(rows: Vec<TaskRow>) -> (Vec<TaskNode>, UnflattenReport) {
    let mut report = UnflattenReport::default();
    let mut nodes: HashMap<TaskID, TaskNode> = HashMap::with_capacity(rows.len());
    let mut roots: Vec<(i64, usize, TaskID)> = vec![];
    let mut children_of: HashMap<TaskID, Vec<(i64, usize, TaskID)>> = HashMap::new();

    for (position, row) in rows.into_iter().enumerate() {
        if nodes.contains_key(&row.id) {
            log::warn!("Dropping duplicate task row {}", row.id);
            report.duplicates += 1;
            continue;
        }

        let slot = (row.order_index, position, row.id.clone());
        match &row.parent_id {
            Some(parent_id) => children_of.entry(parent_id.clone()).or_default().push(slot),
            None => roots.push(slot),
        }

        nodes.insert(row.id.clone(), row.into_node());
    }

    roots.sort();
    for siblings in children_of.values_mut() {
        siblings.sort();
    }

    let mut preorder: Vec<&TaskID> = vec![];
    let mut reached: HashSet<&TaskID> = HashSet::new();
    let mut pending: Vec<&TaskID> = roots.iter().rev().map(|(_, _, id)| id).collect();

    while let Some(id) = pending.pop() {
        if !reached.insert(id) {
            continue;
        }
        preorder.push(id);

        if let Some(siblings) = children_of.get(id) {
            pending.extend(siblings.iter().rev().map(|(_, _, child_id)| child_id));
        }
    }

    // Children come after their parent in pre-order, so walking it backwards
    // finishes every subtree before its parent collects it.
    for id in preorder.iter().rev() {
        let children: Vec<TaskNode> = match children_of.get(*id) {
            Some(siblings) => siblings
                .iter()
                .filter_map(|(_, _, child_id)| nodes.remove(child_id))
                .collect(),
            None => continue,
        };

        if let Some(node) = nodes.get_mut(*id) {
            node.children = children;
        }
    }

    let forest: Vec<TaskNode> = roots
        .iter()
        .filter_map(|(_, _, id)| nodes.remove(id))
        .collect();

    report.unreachable = nodes.len();
    if report.unreachable > 0 {
        log::warn!(
            "Dropped {} task rows that do not resolve to a root task",
            report.unreachable
        );
    }

    (forest, report)
}

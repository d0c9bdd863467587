use serde::{Deserialize, Deserializer, Serialize};

pub type TaskID = String;
pub type ColumnID = String;
pub type Revision = i64;

pub const DONE_COLUMN_ID: &str = "done";
pub const DEFAULT_EPIC_COLOR: &str = "#3498db";

/// Columns every board starts with, in on-screen order.
pub const DEFAULT_COLUMNS: [(&str, &str); 3] = [
    ("todo", "To Do"),
    ("in-progress", "In Progress"),
    (DONE_COLUMN_ID, "Done"),
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Priority {
        Priority::Medium
    }
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Stored values outside the known set degrade to `Medium`.
    pub fn from_stored(value: &str) -> Priority {
        match value {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Task,
    Subtask,
}

impl Default for TaskType {
    fn default() -> TaskType {
        TaskType::Task
    }
}

impl TaskType {
    pub fn for_parent(parent_id: Option<&str>) -> TaskType {
        match parent_id {
            Some(_) => TaskType::Subtask,
            None => TaskType::Task,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::Subtask => "subtask",
        }
    }
}

/// One task or subtask at any depth of the forest.
///
/// Every field except `id` and `title` may be missing from a payload and falls back
/// to the default documented on the field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub id: TaskID,
    pub title: String,
    /// Defaults to an empty string.
    #[serde(default)]
    pub description: String,
    /// Defaults to `medium`.
    #[serde(default)]
    pub priority: Priority,
    /// Free-form; only used to place imported root tasks. Defaults to empty.
    #[serde(default)]
    pub status: String,
    /// Label names, in display order. Defaults to none.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    /// Epic name; `""` and `null` both mean no epic.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub epic: Option<String>,
    /// Id of the owning node, `null` for roots. Recomputed from structure on save and load.
    #[serde(rename = "parentTask", default, deserialize_with = "empty_as_none")]
    pub parent_id: Option<TaskID>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub created_at: Option<String>,
    #[serde(rename = "subtasks", default, deserialize_with = "null_as_default")]
    pub children: Vec<TaskNode>,
    /// Display-only, persisted like everything else. Defaults to collapsed.
    #[serde(default)]
    pub subtasks_expanded: bool,
    #[serde(default)]
    pub completed: bool,
    /// Recomputed from structure on save and load.
    #[serde(default)]
    pub task_type: TaskType,
}

impl TaskNode {
    pub fn new(id: &str, title: &str) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            priority: Priority::default(),
            status: String::new(),
            labels: vec![],
            epic: None,
            parent_id: None,
            due_date: None,
            created_at: None,
            children: vec![],
            subtasks_expanded: false,
            completed: false,
            task_type: TaskType::Task,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of nodes below this one, at every depth.
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut pending: Vec<&TaskNode> = self.children.iter().collect();

        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(node.children.iter());
        }

        count
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Column {
    pub id: ColumnID,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<TaskID>,
}

impl Column {
    pub fn new(id: &str, title: &str) -> Column {
        Column {
            id: id.to_string(),
            title: title.to_string(),
            tasks: vec![],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    pub color: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Epic {
    pub name: String,
    pub color: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EpicRepr {
    Named(String),
    Full {
        name: String,
        #[serde(default)]
        color: Option<String>,
    },
}

/// Older boards stored epics as bare names.
impl<'de> Deserialize<'de> for Epic {
    fn deserialize<D>(deserializer: D) -> Result<Epic, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match EpicRepr::deserialize(deserializer)? {
            EpicRepr::Named(name) => Epic {
                name,
                color: DEFAULT_EPIC_COLOR.to_string(),
            },
            EpicRepr::Full { name, color } => Epic {
                name,
                color: color.unwrap_or_else(|| DEFAULT_EPIC_COLOR.to_string()),
            },
        })
    }
}

/// The per-user unit of load and save.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Board {
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<Column>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<TaskNode>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<Label>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub epics: Vec<Epic>,
}

impl Board {
    /// Empty board with the canonical columns.
    pub fn with_default_columns() -> Board {
        Board {
            columns: DEFAULT_COLUMNS
                .iter()
                .map(|(id, title)| Column::new(id, title))
                .collect(),
            ..Board::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub board: Board,
    pub revision: Revision,
}

#[derive(Serialize, Debug)]
pub struct SaveBoardResult {
    pub success: bool,
    pub revision: Revision,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

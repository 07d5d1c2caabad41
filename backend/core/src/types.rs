use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Stable identifier of a learner account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Curriculum day number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Day(pub u32);

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Day {
    fn from(d: u32) -> Self {
        Self(d)
    }
}

/// The signed-in learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: None,
        }
    }
}

/// Which stored field of a day a write targets.
///
/// Two writes with the same slot (and user/day) overwrite each other; writes
/// to different slots are independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldSlot {
    Code,
    Notes,
    Task(String),
    RecapAnswer,
    DayCompletion,
}

impl fmt::Display for FieldSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSlot::Code => f.write_str("code"),
            FieldSlot::Notes => f.write_str("notes"),
            FieldSlot::Task(id) => write!(f, "task:{id}"),
            FieldSlot::RecapAnswer => f.write_str("recap_answer"),
            FieldSlot::DayCompletion => f.write_str("day_completion"),
        }
    }
}

impl FromStr for FieldSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(FieldSlot::Code),
            "notes" => Ok(FieldSlot::Notes),
            "recap_answer" => Ok(FieldSlot::RecapAnswer),
            "day_completion" => Ok(FieldSlot::DayCompletion),
            other => match other.strip_prefix("task:") {
                Some(id) if !id.is_empty() => Ok(FieldSlot::Task(id.to_string())),
                _ => Err(format!("unknown progress field '{other}'")),
            },
        }
    }
}

/// A progress mutation together with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncField {
    Code { code: String },
    Notes { notes: String },
    #[serde(rename_all = "camelCase")]
    TaskCompletion { task_id: String, completed: bool },
    RecapAnswer { answer: String },
    DayCompletion,
}

impl SyncField {
    pub fn slot(&self) -> FieldSlot {
        match self {
            SyncField::Code { .. } => FieldSlot::Code,
            SyncField::Notes { .. } => FieldSlot::Notes,
            SyncField::TaskCompletion { task_id, .. } => FieldSlot::Task(task_id.clone()),
            SyncField::RecapAnswer { .. } => FieldSlot::RecapAnswer,
            SyncField::DayCompletion => FieldSlot::DayCompletion,
        }
    }
}

/// Logical issue order of a write.
///
/// Ordered by issue time first and the issuing manager's sequence number
/// second, so two writes issued within the same millisecond by one device
/// still compare in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteVersion {
    pub issued_at_ms: i64,
    pub seq: u64,
}

impl WriteVersion {
    pub fn new(issued_at_ms: i64, seq: u64) -> Self {
        Self { issued_at_ms, seq }
    }
}

/// Composite key a write is upserted under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub user_id: UserId,
    pub day: Day,
    pub slot: FieldSlot,
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/day-{}/{}", self.user_id, self.day, self.slot)
    }
}

/// One pending progress mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressWrite {
    pub user_id: UserId,
    pub day: Day,
    pub field: SyncField,
    pub version: WriteVersion,
}

impl ProgressWrite {
    pub fn key(&self) -> FieldKey {
        FieldKey {
            user_id: self.user_id.clone(),
            day: self.day,
            slot: self.field.slot(),
        }
    }
}

/// Store acknowledgment for an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteAck {
    /// The write is now the stored value.
    Applied,
    /// The store already held a newer (or, for day completion, any) value.
    Stale,
}

/// Everything stored for one learner and day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayProgress {
    pub day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recap_answer: Option<String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, bool>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DayProgress {
    pub fn empty(day: Day) -> Self {
        Self {
            day: day.0,
            ..Default::default()
        }
    }

    /// Fold one stored field into the read model.
    pub fn absorb(&mut self, field: &SyncField, stored_at: DateTime<Utc>) {
        match field {
            SyncField::Code { code } => self.code = Some(code.clone()),
            SyncField::Notes { notes } => self.notes = Some(notes.clone()),
            SyncField::TaskCompletion { task_id, completed } => {
                self.tasks.insert(task_id.clone(), *completed);
            }
            SyncField::RecapAnswer { answer } => self.recap_answer = Some(answer.clone()),
            SyncField::DayCompletion => {
                self.completed = true;
                self.completed_at = Some(stored_at);
            }
        }
        if self.updated_at.map_or(true, |t| stored_at > t) {
            self.updated_at = Some(stored_at);
        }
    }

    pub fn completed_task_count(&self) -> usize {
        self.tasks.values().filter(|done| **done).count()
    }
}

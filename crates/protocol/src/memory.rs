use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ApiError;

/// The category an agent-authored memory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Decision,
    Insight,
    Context,
    Todo,
    Conversation,
    Note,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Insight => "insight",
            MemoryType::Context => "context",
            MemoryType::Todo => "todo",
            MemoryType::Conversation => "conversation",
            MemoryType::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "decision" => Some(Self::Decision),
            "insight" => Some(Self::Insight),
            "context" => Some(Self::Context),
            "todo" => Some(Self::Todo),
            "conversation" => Some(Self::Conversation),
            "note" => Some(Self::Note),
            _ => None,
        }
    }
}

/// Lifecycle state of a todo memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Done => "done",
            TodoStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Legal transition graph:
    /// `pending → in_progress → done | cancelled` and `pending → cancelled`.
    /// Re-applying the current status is permitted (idempotent updates).
    pub fn can_transition_to(self, next: TodoStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (TodoStatus::Pending, TodoStatus::InProgress)
                | (TodoStatus::Pending, TodoStatus::Cancelled)
                | (TodoStatus::InProgress, TodoStatus::Done)
                | (TodoStatus::InProgress, TodoStatus::Cancelled)
        )
    }
}

/// One entry of a todo's status history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: TodoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// A first-class piece of free-text knowledge, embedded and scoped by project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub project: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
    /// Id of the memory that replaced this one. A memory is active iff unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Present only while `memory_type == Todo`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TodoStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_history: Vec<StatusChange>,
}

impl Memory {
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    pub fn is_validated(&self) -> bool {
        self.validated.unwrap_or(false)
    }

    /// The text that gets embedded: `"{type}: {content}"`.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.memory_type.as_str(), self.content)
    }

    /// Apply a todo status transition, recording it in the history.
    pub fn transition_todo(
        &mut self,
        next: TodoStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        if self.memory_type != MemoryType::Todo {
            return Err(ApiError::validation(format!(
                "memory {} is not a todo",
                self.id
            )));
        }
        let current = self.status.unwrap_or(TodoStatus::Pending);
        if !current.can_transition_to(next) {
            return Err(ApiError::validation(format!(
                "illegal todo transition {} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }
        self.status = Some(next);
        self.status_history.push(StatusChange {
            status: next,
            note,
            at,
        });
        self.updated_at = at;
        Ok(())
    }
}

/// Score multiplier for unvalidated memories past 30 days of age.
///
/// `max(0.5, 1 - 0.05 * floor((age_days - 30) / 30))`; validated memories are
/// exempt and always score at face value.
pub fn aging_decay(age_days: i64, validated: bool) -> f32 {
    if validated || age_days < 30 {
        return 1.0;
    }
    let periods = ((age_days - 30) / 30) as f32;
    (1.0 - 0.05 * periods).max(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn todo(project: &str) -> Memory {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Memory {
            id: "t-1".into(),
            project: project.into(),
            memory_type: MemoryType::Todo,
            content: "wire up the alias drain window".into(),
            tags: vec![],
            related_to: None,
            created_at: now,
            updated_at: now,
            validated: None,
            superseded_by: None,
            source: None,
            confidence: None,
            metadata: HashMap::new(),
            status: Some(TodoStatus::Pending),
            status_history: vec![StatusChange {
                status: TodoStatus::Pending,
                note: None,
                at: now,
            }],
        }
    }

    #[test]
    fn test_todo_legal_transitions() {
        let mut m = todo("demo");
        let at = m.created_at;
        m.transition_todo(TodoStatus::InProgress, None, at).unwrap();
        m.transition_todo(TodoStatus::Done, Some("merged".into()), at)
            .unwrap();
        assert_eq!(m.status, Some(TodoStatus::Done));
        assert_eq!(m.status_history.len(), 3);
    }

    #[test]
    fn test_todo_illegal_transitions_rejected() {
        let mut m = todo("demo");
        let at = m.created_at;
        assert!(m.transition_todo(TodoStatus::Done, None, at).is_err());
        m.transition_todo(TodoStatus::Cancelled, None, at).unwrap();
        assert!(m.transition_todo(TodoStatus::InProgress, None, at).is_err());
    }

    #[test]
    fn test_todo_idempotent_reapply() {
        let mut m = todo("demo");
        let at = m.created_at;
        m.transition_todo(TodoStatus::Pending, None, at).unwrap();
        assert_eq!(m.status, Some(TodoStatus::Pending));
    }

    #[test]
    fn test_aging_decay_schedule() {
        assert_eq!(aging_decay(0, false), 1.0);
        assert_eq!(aging_decay(29, false), 1.0);
        assert_eq!(aging_decay(30, false), 1.0); // zero full periods past day 30
        assert_eq!(aging_decay(60, false), 0.95);
        assert_eq!(aging_decay(90, false), 0.90);
        assert_eq!(aging_decay(10_000, false), 0.5); // floored
        assert_eq!(aging_decay(90, true), 1.0); // validated are exempt
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Participant name used for the loop driver.
pub const MANAGER_AGENT: &str = "manager";
/// Participant name used for the validator.
pub const VALIDATOR_AGENT: &str = "validator";
/// Participant name used for the human collaborator.
pub const HUMAN_AGENT: &str = "human";

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Kind of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Manager to worker: what to do.
    Instruction,
    /// Worker output.
    Response,
    /// Anyone asking for clarification.
    Question,
    /// Reply to a question, including human guidance.
    Answer,
    /// A worker error or a failed validation.
    Error,
    /// Hand-off to a human.
    Escalation,
    /// Validator feedback on a partial result.
    Feedback,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Instruction => "instruction",
            MessageType::Response => "response",
            MessageType::Question => "question",
            MessageType::Answer => "answer",
            MessageType::Error => "error",
            MessageType::Escalation => "escalation",
            MessageType::Feedback => "feedback",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ConversationEntry
// ---------------------------------------------------------------------------

/// One immutable message exchanged inside a retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Entry id.
    pub id: Uuid,
    /// Sender.
    pub from_agent: String,
    /// Recipient.
    pub to_agent: String,
    /// Kind of message.
    pub message_type: MessageType,
    /// Message body.
    pub content: String,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Extra structured data.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ConversationEntry {
    /// Entry stamped with a fresh id and the current time.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            message_type,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach one metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// ConversationLog
// ---------------------------------------------------------------------------

/// Append-only log of a retry loop. Entries can be read but never changed or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog {
    entries: Vec<ConversationEntry>,
}

impl ConversationLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry at the end.
    pub fn append(&mut self, entry: ConversationEntry) {
        tracing::debug!(
            from = %entry.from_agent,
            to = %entry.to_agent,
            kind = %entry.message_type,
            "conversation entry"
        );
        self.entries.push(entry);
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    /// Take the entries out of the log.
    pub fn into_entries(self) -> Vec<ConversationEntry> {
        self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of the given type.
    pub fn count(&self, message_type: MessageType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.message_type == message_type)
            .count()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }
}

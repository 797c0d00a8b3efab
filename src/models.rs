//! Data model for the indexing and retrieval engine
//!
//! Messages are identified by `(chat_id, msg_id)` and shared across tenants
//! through membership rows; chunks and embeddings travel with their message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Telegram conversation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
    Supergroup,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Channel => "channel",
            ChatKind::Supergroup => "supergroup",
        }
    }
}

/// A tenant's view of a Telegram conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Telegram chat ID (negative for groups/channels)
    pub chat_id: i64,
    /// Display title
    pub title: String,
    /// Conversation type
    pub kind: ChatKind,
    /// When this chat last completed an indexing pass
    #[serde(default)]
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl Chat {
    pub fn new(chat_id: i64, title: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            chat_id,
            title: title.into(),
            kind,
            last_indexed_at: None,
        }
    }
}

/// Raw ingested message, exactly as fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Chat the message belongs to
    pub chat_id: i64,
    /// Telegram message ID (sequence within chat)
    pub msg_id: i64,
    /// Sender user ID
    pub sender_id: i64,
    /// Sender display name
    pub sender_name: String,
    /// Sender @handle, when known
    #[serde(default)]
    pub sender_username: Option<String>,
    /// Message timestamp (UTC)
    pub date: DateTime<Utc>,
    /// Message text (empty for media-only messages)
    pub text: String,
    /// Message this one replies to, if any
    #[serde(default)]
    pub reply_to_msg_id: Option<i64>,
}

/// Reference to a preceding question a chunk likely answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelyAnswer {
    pub msg_id: i64,
    /// Question text, truncated for storage
    pub text: String,
    pub sender_name: String,
}

/// Structured metadata carried by every chunk.
///
/// Denormalized on purpose: citations and deep links must be buildable from
/// a search hit without another storage round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Timestamp of the primary (first) message in the group
    pub timestamp: DateTime<Utc>,
    /// Chat display title
    pub chat_title: String,
    pub chat_id: i64,
    /// Primary message ID, used for deep links
    pub msg_id: i64,
    pub sender_name: String,
    #[serde(default)]
    pub sender_username: Option<String>,
    /// Complete original text of the grouped message(s)
    pub full_text: String,
    /// Number of messages merged into this group
    pub message_count: usize,
    #[serde(default)]
    pub reply_to_msg_id: Option<i64>,
    #[serde(default)]
    pub reply_to_text: Option<String>,
    #[serde(default)]
    pub reply_to_sender: Option<String>,
    /// Inferred question this group answers (implicit Q/A)
    #[serde(default)]
    pub likely_answer_to: Option<LikelyAnswer>,
    pub is_question: bool,
    pub is_answer: bool,
    /// Index of this chunk within its group
    pub chunk_index: u32,
    /// Total chunks produced from the group
    pub chunk_total: u32,
}

/// Chunker output unit; the indexing and retrieval atom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chat_id: i64,
    /// Primary message ID of the group this chunk came from
    pub msg_id: i64,
    pub chunk_index: u32,
    /// Text payload sent to the embedding provider
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Storage identity of this chunk.
    pub fn key(&self) -> (i64, i64, u32) {
        (self.chat_id, self.msg_id, self.chunk_index)
    }

    /// Deep link to the primary message.
    pub fn deep_link(&self) -> String {
        deep_link(self.chat_id, self.msg_id)
    }
}

/// Normalize a chat ID for `t.me/c/` links.
///
/// Channels and supergroups carry a `-100` prefix on the wire that the URL
/// form drops; plain negative group IDs just lose the sign.
pub fn normalize_chat_id(chat_id: i64) -> i64 {
    if chat_id >= 0 {
        return chat_id;
    }
    let digits = chat_id.unsigned_abs().to_string();
    if let Some(stripped) = digits.strip_prefix("100") {
        if let Ok(id) = stripped.parse::<i64>() {
            return id;
        }
    }
    chat_id.unsigned_abs() as i64
}

/// Build the `https://t.me/c/<chat>/<seq>` deep link for a message.
pub fn deep_link(chat_id: i64, msg_id: i64) -> String {
    format!("https://t.me/c/{}/{}", normalize_chat_id(chat_id), msg_id)
}

/// Indexing job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Fetching,
    Chunking,
    Embedding,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Fetching => "fetching",
            JobStatus::Chunking => "chunking",
            JobStatus::Embedding => "embedding",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Tenant-owned progress record for one indexing pass.
///
/// Counters only ever increase; readers poll and may observe slightly stale
/// values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: Uuid,
    pub tenant_id: i64,
    pub chat_ids: Vec<i64>,
    pub status: JobStatus,
    /// Locked in once every chat has been paginated
    pub messages_total: Option<u64>,
    pub messages_processed: u64,
    pub chunks_produced: u64,
    pub embeddings_completed: u64,
    pub embeddings_failed: u64,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexingJob {
    pub fn new(tenant_id: i64, chat_ids: Vec<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            chat_ids,
            status: JobStatus::Pending,
            messages_total: None,
            messages_processed: 0,
            chunks_produced: 0,
            embeddings_completed: 0,
            embeddings_failed: 0,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One entry of a timeline response.
///
/// The `ts` wire format is externally stable: whole-second RFC 3339 UTC with
/// a `Z` suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    #[serde(with = "rfc3339_seconds")]
    pub ts: DateTime<Utc>,
    pub text: String,
    pub url: String,
}

/// Saved result of a timeline query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub id: Uuid,
    pub tenant_id: i64,
    pub title: Option<String>,
    /// Originating query text
    pub query: String,
    pub items: Vec<TimelineItem>,
    pub created_at: DateTime<Utc>,
}

/// Listing row for saved timelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub id: Uuid,
    pub title: Option<String>,
    pub query: String,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Timeline {
    pub fn summary(&self) -> TimelineSummary {
        TimelineSummary {
            id: self.id,
            title: self.title.clone(),
            query: self.query.clone(),
            item_count: self.items.len(),
            created_at: self.created_at,
        }
    }
}

/// Whole-second RFC 3339 UTC serialization (`2023-01-07T14:17:29Z`).
pub mod rfc3339_seconds {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a generation. The `*_lock` states exist solely to claim
/// exclusivity; everything else is a stage or a failure sink.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    ProcessingLock,
    GeneratingOutline,
    ContentGenerating,
    ContentReady,
    AudioProcessingLock,
    AudioGenerating,
    Completed,
    OutlineFailed,
    ContentFailed,
    AudioFailed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::ProcessingLock => "processing_lock",
            GenerationStatus::GeneratingOutline => "generating_outline",
            GenerationStatus::ContentGenerating => "content_generating",
            GenerationStatus::ContentReady => "content_ready",
            GenerationStatus::AudioProcessingLock => "audio_processing_lock",
            GenerationStatus::AudioGenerating => "audio_generating",
            GenerationStatus::Completed => "completed",
            GenerationStatus::OutlineFailed => "outline_failed",
            GenerationStatus::ContentFailed => "content_failed",
            GenerationStatus::AudioFailed => "audio_failed",
        }
    }

    /// Failure sinks. A topic with only terminal generations may be
    /// re-enqueued.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            GenerationStatus::OutlineFailed
                | GenerationStatus::ContentFailed
                | GenerationStatus::AudioFailed
        )
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskType {
    FromTopic,
    RewriteScript,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FromTopic => "from_topic",
            TaskType::RewriteScript => "rewrite_script",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "from_topic" => Ok(TaskType::FromTopic),
            "rewrite_script" => Ok(TaskType::RewriteScript),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TopicStatus {
    Suggested,
    GenerationRequested,
    GenerationPending,
    GenerationReset,
    Deleted,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Suggested => "suggested",
            TopicStatus::GenerationRequested => "generation_requested",
            TopicStatus::GenerationPending => "generation_pending",
            TopicStatus::GenerationReset => "generation_reset",
            TopicStatus::Deleted => "deleted",
        }
    }
}

/// What a script chunk narrates. Outline-derived kinds plus the synthetic
/// kinds appended by the length-enforcement loop and the rewrite splitter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ItemKind {
    Intro,
    Outro,
    SectionHeader,
    Quote,
    Story,
    Point,
    RewriteChunk,
    QuoteAdded,
    StoryAdded,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Intro => "intro",
            ItemKind::Outro => "outro",
            ItemKind::SectionHeader => "section_header",
            ItemKind::Quote => "quote",
            ItemKind::Story => "story",
            ItemKind::Point => "point",
            ItemKind::RewriteChunk => "rewrite_chunk",
            ItemKind::QuoteAdded => "quote_added",
            ItemKind::StoryAdded => "story_added",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible subject line, unique by `(title, language)`.
#[derive(Debug, Clone, FromRow)]
pub struct Topic {
    pub id: String,
    pub language: String,
    pub title: String,
    pub translated_title: Option<String>,
    pub seed_topic: Option<String>,
    /// First 200 chars of a rewrite source; upsert key for rewrite topics.
    pub snippet_key: Option<String>,
    pub status: TopicStatus,
    pub generation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pipeline execution for a topic.
#[derive(Debug, Clone, FromRow)]
pub struct Generation {
    pub id: String,
    pub topic_id: String,
    pub task_type: TaskType,
    pub language: String,
    pub title: String,
    pub translated_title: Option<String>,
    pub seo_title: Option<String>,
    pub model: String,
    pub priority: i64,
    pub target_duration_minutes: Option<i64>,
    pub source_script: Option<String>,
    pub outline: Option<String>,
    pub derived_outline: Option<String>,
    pub target_chars: Option<i64>,
    pub num_quotes: Option<i64>,
    pub num_stories: Option<i64>,
    /// Stable token naming the audio directory. Assigned on first claim.
    pub script_name: Option<String>,
    pub status: GenerationStatus,
    pub error_stage: Option<String>,
    pub error_message: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
    /// Set when the length-enforcement loop hit its iteration cap.
    pub length_capped: bool,
    pub final_audio_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stage-tagged error record embedded in a generation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Generation {
    pub fn error(&self) -> Option<ErrorDetails> {
        match (&self.error_stage, &self.error_message) {
            (Some(stage), Some(message)) => Some(ErrorDetails {
                stage: stage.clone(),
                message: message.clone(),
                timestamp: self.error_at.unwrap_or(self.updated_at),
            }),
            _ => None,
        }
    }
}

/// One atomic unit of narration, unique by `(generation_id, section_index)`.
#[derive(Debug, Clone, FromRow)]
pub struct ScriptChunk {
    pub id: String,
    pub generation_id: String,
    pub section_index: i64,
    pub section_title: String,
    pub item_type: ItemKind,
    pub level: i64,
    pub text_content: String,
    pub script_name: String,
    pub audio_path: Option<String>,
    pub audio_ready: bool,
    pub audio_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chunk audio progress for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCounts {
    pub total: i64,
    pub ready: i64,
    pub errored: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!(GenerationStatus::ProcessingLock.as_str(), "processing_lock");
        assert_eq!(GenerationStatus::ContentReady.to_string(), "content_ready");
        assert!(GenerationStatus::AudioFailed.is_terminal_failure());
        assert!(!GenerationStatus::Pending.is_terminal_failure());
    }

    #[test]
    fn test_claim_sort_puts_failures_before_pending() {
        // The content claim orders by raw status text; failed states must
        // sort ahead of pending so retries drain first.
        let mut statuses = [
            GenerationStatus::Pending.as_str(),
            GenerationStatus::OutlineFailed.as_str(),
            GenerationStatus::ContentFailed.as_str(),
        ];
        statuses.sort();
        assert_eq!(
            statuses,
            ["content_failed", "outline_failed", "pending"]
        );
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!(
            "rewrite_script".parse::<TaskType>().unwrap(),
            TaskType::RewriteScript
        );
        assert!("unknown".parse::<TaskType>().is_err());
    }
}

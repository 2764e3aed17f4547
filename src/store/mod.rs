//! Typed operations over the three document collections. The atomic
//! claim/conditional-update statements here are the only serialization
//! mechanism in the system.

pub mod chunks;
pub mod generations;
pub mod models;
pub mod topics;

pub use models::{
    AudioCounts, ErrorDetails, Generation, GenerationStatus, ItemKind, ScriptChunk, TaskType,
    Topic, TopicStatus,
};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Maximum stored length for error messages.
pub(crate) const ERROR_MESSAGE_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the database and run idempotent migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(20));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to store at {}", database_url);
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity probe, used by workers to wait out outages.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                language TEXT NOT NULL,
                title TEXT NOT NULL,
                translated_title TEXT,
                seed_topic TEXT,
                snippet_key TEXT,
                status TEXT NOT NULL,
                generation_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (title, language)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                id TEXT PRIMARY KEY,
                topic_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                language TEXT NOT NULL,
                title TEXT NOT NULL,
                translated_title TEXT,
                seo_title TEXT,
                model TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 2,
                target_duration_minutes INTEGER,
                source_script TEXT,
                outline TEXT,
                derived_outline TEXT,
                target_chars INTEGER,
                num_quotes INTEGER,
                num_stories INTEGER,
                script_name TEXT,
                status TEXT NOT NULL,
                error_stage TEXT,
                error_message TEXT,
                error_at TEXT,
                length_capped INTEGER NOT NULL DEFAULT 0,
                final_audio_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS script_chunks (
                id TEXT PRIMARY KEY,
                generation_id TEXT NOT NULL,
                section_index INTEGER NOT NULL,
                section_title TEXT NOT NULL,
                item_type TEXT NOT NULL,
                level INTEGER NOT NULL,
                text_content TEXT NOT NULL,
                script_name TEXT NOT NULL,
                audio_path TEXT,
                audio_ready INTEGER NOT NULL DEFAULT 0,
                audio_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (generation_id, section_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_topics_status ON topics (status)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_topics_snippet
                 ON topics (snippet_key, language) WHERE snippet_key IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_generations_topic ON generations (topic_id)",
            "CREATE INDEX IF NOT EXISTS idx_generations_claim
                 ON generations (status, priority, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_generation
                 ON script_chunks (generation_id, section_index)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

pub(crate) fn truncate_message(message: &str) -> String {
    if message.chars().count() <= ERROR_MESSAGE_LIMIT {
        message.to_string()
    } else {
        message.chars().take(ERROR_MESSAGE_LIMIT).collect()
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

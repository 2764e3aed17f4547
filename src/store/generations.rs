//! Generation queue operations: atomic claims, conditional status writes,
//! stuck-lock recovery.

use super::models::{Generation, GenerationStatus, TaskType};
use super::{new_id, truncate_message, Store};
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

/// Inputs for enqueueing a new generation.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub topic_id: String,
    pub task_type: TaskType,
    pub language: String,
    pub title: String,
    pub translated_title: Option<String>,
    pub model: String,
    pub priority: i64,
    pub target_duration_minutes: Option<i64>,
    pub source_script: Option<String>,
}

impl Store {
    pub async fn insert_generation(&self, new: NewGeneration) -> Result<Generation> {
        let now = Utc::now();
        let id = new_id();

        let generation = sqlx::query_as::<_, Generation>(
            r#"
            INSERT INTO generations
                (id, topic_id, task_type, language, title, translated_title, model,
                 priority, target_duration_minutes, source_script, status,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new.topic_id)
        .bind(new.task_type)
        .bind(&new.language)
        .bind(&new.title)
        .bind(&new.translated_title)
        .bind(&new.model)
        .bind(new.priority)
        .bind(new.target_duration_minutes)
        .bind(&new.source_script)
        .bind(GenerationStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(generation)
    }

    pub async fn generation(&self, id: &str) -> Result<Option<Generation>> {
        let generation =
            sqlx::query_as::<_, Generation>("SELECT * FROM generations WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(generation)
    }

    /// Whether the topic already has a non-terminal generation. Used for
    /// duplicate suppression at intake.
    pub async fn has_live_generation(&self, topic_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM generations
            WHERE topic_id = ?
              AND status NOT IN ('outline_failed', 'content_failed', 'audio_failed')
            "#,
        )
        .bind(topic_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    /// Atomically claim the next content task. Ordering: failed states
    /// before pending (status text ascending), then priority 1 -> 3, then
    /// oldest first. The returned row is already in `processing_lock`.
    pub async fn claim_next_content(&self) -> Result<Option<Generation>> {
        let generation = sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
            SET status = 'processing_lock', updated_at = ?
            WHERE id = (
                SELECT id FROM generations
                WHERE status IN ('pending', 'outline_failed', 'content_failed')
                ORDER BY status ASC, priority ASC, created_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?;

        if let Some(ref g) = generation {
            debug!("Claimed content task {} ({})", g.id, g.task_type);
        }
        Ok(generation)
    }

    /// Claimable audio task ids for a language scope, one batch per poll.
    /// Ordering preserves the source behavior: priority descending, then
    /// oldest.
    pub async fn audio_candidates(
        &self,
        primary_language: &str,
        primary: bool,
        limit: i64,
    ) -> Result<Vec<String>> {
        let language_clause = if primary {
            "language = ?"
        } else {
            "language <> ?"
        };
        let sql = format!(
            r#"
            SELECT id FROM generations
            WHERE status IN ('content_ready', 'audio_failed') AND {language_clause}
            ORDER BY priority DESC, created_at ASC
            LIMIT ?
            "#
        );

        let ids: Vec<String> = sqlx::query_scalar(&sql)
            .bind(primary_language)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }

    /// Atomically lock one audio candidate. A `None` means another worker
    /// won the race or the status changed since the candidate snapshot.
    pub async fn claim_audio_by_id(&self, id: &str) -> Result<Option<Generation>> {
        let generation = sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
            SET status = 'audio_processing_lock', updated_at = ?
            WHERE id = ? AND status IN ('content_ready', 'audio_failed')
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        if let Some(ref g) = generation {
            debug!("Claimed audio task {} ({})", g.id, g.language);
        }
        Ok(generation)
    }

    /// Conditional transition. Returns false when the predicate failed,
    /// which means another actor changed the status and this worker has
    /// lost ownership.
    pub async fn update_status_if(
        &self,
        id: &str,
        expected: &[GenerationStatus],
        next: GenerationStatus,
    ) -> Result<bool> {
        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "UPDATE generations SET status = ?, updated_at = ?
             WHERE id = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(next).bind(Utc::now()).bind(id);
        for status in expected {
            query = query.bind(*status);
        }

        let result = query.execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Conditional failure write with the stage-tagged error record.
    pub async fn mark_failed_if(
        &self,
        id: &str,
        expected: &[GenerationStatus],
        failed: GenerationStatus,
        stage: &str,
        message: &str,
    ) -> Result<bool> {
        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "UPDATE generations
             SET status = ?, error_stage = ?, error_message = ?, error_at = ?, updated_at = ?
             WHERE id = ? AND status IN ({placeholders})"
        );

        let now = Utc::now();
        let mut query = sqlx::query(&sql)
            .bind(failed)
            .bind(stage)
            .bind(truncate_message(message))
            .bind(now)
            .bind(now)
            .bind(id);
        for status in expected {
            query = query.bind(*status);
        }

        let result = query.execute(self.pool()).await?;
        if result.rows_affected() == 0 {
            warn!(
                "Failure write for {} skipped, status changed externally (stage {})",
                id, stage
            );
        }
        Ok(result.rows_affected() > 0)
    }

    /// Finalize a completed generation: set the combined audio path and
    /// clear the error record in the same status write so observers never
    /// see a partial `completed`.
    pub async fn complete_audio(&self, id: &str, final_audio_path: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generations
            SET status = 'completed', final_audio_path = ?,
                error_stage = NULL, error_message = NULL, error_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'audio_generating'
            "#,
        )
        .bind(final_audio_path)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset generations stuck in `processing_lock` longer than `max_age`
    /// back to `pending`. Returns how many were recovered.
    pub async fn reclaim_stuck_content(&self, max_age: std::time::Duration) -> Result<u64> {
        self.reclaim_stuck(
            GenerationStatus::ProcessingLock,
            GenerationStatus::Pending,
            max_age,
        )
        .await
    }

    /// Reset generations stuck in `audio_processing_lock` back to
    /// `content_ready`.
    pub async fn reclaim_stuck_audio(&self, max_age: std::time::Duration) -> Result<u64> {
        self.reclaim_stuck(
            GenerationStatus::AudioProcessingLock,
            GenerationStatus::ContentReady,
            max_age,
        )
        .await
    }

    async fn reclaim_stuck(
        &self,
        lock_status: GenerationStatus,
        reset_status: GenerationStatus,
        max_age: std::time::Duration,
    ) -> Result<u64> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::hours(1));
        let message = format!("reset from stuck {lock_status}");

        let result = sqlx::query(
            r#"
            UPDATE generations
            SET status = ?, updated_at = ?, error_stage = 'stuck_lock',
                error_message = ?, error_at = ?
            WHERE status = ? AND updated_at < ?
            "#,
        )
        .bind(reset_status)
        .bind(Utc::now())
        .bind(&message)
        .bind(Utc::now())
        .bind(lock_status)
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            warn!(
                "Reset {} tasks stuck in {}",
                result.rows_affected(),
                lock_status
            );
        }
        Ok(result.rows_affected())
    }

    /// Assign the stable audio-directory token once.
    pub async fn set_script_name_if_missing(&self, id: &str, script_name: &str) -> Result<()> {
        sqlx::query(
            "UPDATE generations SET script_name = ? WHERE id = ? AND script_name IS NULL",
        )
        .bind(script_name)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Persist sizing estimates without overwriting previously stored ones.
    pub async fn save_estimates(
        &self,
        id: &str,
        target_chars: i64,
        num_quotes: i64,
        num_stories: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE generations
            SET target_chars = COALESCE(target_chars, ?),
                num_quotes = COALESCE(num_quotes, ?),
                num_stories = COALESCE(num_stories, ?)
            WHERE id = ?
            "#,
        )
        .bind(target_chars)
        .bind(num_quotes)
        .bind(num_stories)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn store_outline(&self, id: &str, outline: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET outline = ?, updated_at = ? WHERE id = ?")
            .bind(outline)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn store_derived_outline(&self, id: &str, outline: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET derived_outline = ?, updated_at = ? WHERE id = ?")
            .bind(outline)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_seo_title(&self, id: &str, seo_title: &str) -> Result<()> {
        sqlx::query(
            "UPDATE generations SET seo_title = ?, title = ?, updated_at = ? WHERE id = ?",
        )
        .bind(seo_title)
        .bind(seo_title)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_generation_translated_title(&self, id: &str, title: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET translated_title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_length_capped(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET length_capped = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Operator reset: drop all chunks and return the generation to
    /// `pending` with outlines, error record and final audio cleared.
    pub async fn reset_generation(&self, id: &str) -> Result<Option<Generation>> {
        let Some(generation) = self.generation(id).await? else {
            return Ok(None);
        };

        self.delete_chunks(id).await?;

        sqlx::query(
            r#"
            UPDATE generations
            SET status = 'pending', outline = NULL, derived_outline = NULL,
                error_stage = NULL, error_message = NULL, error_at = NULL,
                length_capped = 0, final_audio_path = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(Some(generation))
    }

    /// Operator delete: chunks first, then the generation itself. Returns
    /// the deleted row so the caller can unlink the topic.
    pub async fn delete_generation(&self, id: &str) -> Result<Option<Generation>> {
        let Some(generation) = self.generation(id).await? else {
            return Ok(None);
        };

        self.delete_chunks(id).await?;
        sqlx::query("DELETE FROM generations WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(Some(generation))
    }

    /// Repair/testing helper: force a status and timestamp directly, the
    /// way the operator fix-up scripts do.
    pub async fn force_status_at(
        &self,
        id: &str,
        status: GenerationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE generations SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(updated_at)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

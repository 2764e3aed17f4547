//! Script chunk persistence. The upsert deliberately never touches the
//! audio columns on conflict; callers that must invalidate audio delete
//! the chunks first.

use super::models::{AudioCounts, ItemKind, ScriptChunk};
use super::{new_id, truncate_message, Store};
use crate::error::Result;
use chrono::Utc;

impl Store {
    /// Insert or update one chunk keyed by `(generation_id, section_index)`.
    ///
    /// On conflict only the textual fields and `updated_at` change:
    /// `audio_path` / `audio_ready` / `audio_error` survive content reruns.
    pub async fn upsert_chunk(
        &self,
        generation_id: &str,
        script_name: &str,
        section_index: i64,
        section_title: &str,
        text_content: &str,
        level: i64,
        item_type: ItemKind,
    ) -> Result<ScriptChunk> {
        let now = Utc::now();
        let chunk = sqlx::query_as::<_, ScriptChunk>(
            r#"
            INSERT INTO script_chunks
                (id, generation_id, section_index, section_title, item_type, level,
                 text_content, script_name, audio_path, audio_ready, audio_error,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, NULL, ?, ?)
            ON CONFLICT (generation_id, section_index) DO UPDATE SET
                section_title = excluded.section_title,
                text_content = excluded.text_content,
                level = excluded.level,
                item_type = excluded.item_type,
                script_name = excluded.script_name,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(generation_id)
        .bind(section_index)
        .bind(section_title)
        .bind(item_type)
        .bind(level)
        .bind(text_content)
        .bind(script_name)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(chunk)
    }

    pub async fn chunk(&self, id: &str) -> Result<Option<ScriptChunk>> {
        let chunk = sqlx::query_as::<_, ScriptChunk>("SELECT * FROM script_chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(chunk)
    }

    pub async fn chunks_for(&self, generation_id: &str) -> Result<Vec<ScriptChunk>> {
        let chunks = sqlx::query_as::<_, ScriptChunk>(
            "SELECT * FROM script_chunks WHERE generation_id = ? ORDER BY section_index ASC",
        )
        .bind(generation_id)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    /// Chunks still needing audio: never produced, or errored on a prior
    /// pass (errored chunks are retried).
    pub async fn pending_audio_chunks(&self, generation_id: &str) -> Result<Vec<ScriptChunk>> {
        let chunks = sqlx::query_as::<_, ScriptChunk>(
            r#"
            SELECT * FROM script_chunks
            WHERE generation_id = ? AND (audio_ready = 0 OR audio_error IS NOT NULL)
            ORDER BY section_index ASC
            "#,
        )
        .bind(generation_id)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    pub async fn audio_counts(&self, generation_id: &str) -> Result<AudioCounts> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(audio_ready = 1 AND audio_error IS NULL), 0),
                COALESCE(SUM(audio_error IS NOT NULL), 0)
            FROM script_chunks
            WHERE generation_id = ?
            "#,
        )
        .bind(generation_id)
        .fetch_one(self.pool())
        .await?;

        Ok(AudioCounts {
            total: row.0,
            ready: row.1,
            errored: row.2,
        })
    }

    /// Next free section index; generation resumes from here.
    pub async fn next_section_index(&self, generation_id: &str) -> Result<i64> {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(section_index) + 1, 0) FROM script_chunks
             WHERE generation_id = ?",
        )
        .bind(generation_id)
        .fetch_one(self.pool())
        .await?;
        Ok(next)
    }

    /// All chunk text joined by a blank line, in section order.
    pub async fn text_of(&self, generation_id: &str) -> Result<String> {
        let texts: Vec<String> = sqlx::query_scalar(
            "SELECT text_content FROM script_chunks
             WHERE generation_id = ? ORDER BY section_index ASC",
        )
        .bind(generation_id)
        .fetch_all(self.pool())
        .await?;
        Ok(texts.join("\n\n").trim().to_string())
    }

    /// Existing quote/story titles for the de-duplication preamble.
    pub async fn section_titles(&self, generation_id: &str, min_level: i64) -> Result<Vec<String>> {
        let titles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT section_title FROM script_chunks
            WHERE generation_id = ? AND level >= ?
            ORDER BY section_index ASC
            LIMIT 30
            "#,
        )
        .bind(generation_id)
        .bind(min_level)
        .fetch_all(self.pool())
        .await?;
        Ok(titles)
    }

    pub async fn count_chunks_of_kinds(
        &self,
        generation_id: &str,
        kinds: &[ItemKind],
    ) -> Result<i64> {
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM script_chunks
             WHERE generation_id = ? AND item_type IN ({placeholders})"
        );

        let mut query = sqlx::query_scalar(&sql).bind(generation_id);
        for kind in kinds {
            query = query.bind(*kind);
        }

        let count: i64 = query.fetch_one(self.pool()).await?;
        Ok(count)
    }

    /// Paths of successfully produced chunk audio, in narration order.
    pub async fn ready_audio_paths(&self, generation_id: &str) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT audio_path FROM script_chunks
            WHERE generation_id = ? AND audio_ready = 1 AND audio_error IS NULL
              AND audio_path IS NOT NULL
            ORDER BY section_index ASC
            "#,
        )
        .bind(generation_id)
        .fetch_all(self.pool())
        .await?;
        Ok(paths)
    }

    /// Record the outcome of one chunk's audio production. Success clears
    /// the error; failure clears readiness and truncates the message.
    pub async fn mark_chunk_audio(
        &self,
        chunk_id: &str,
        outcome: std::result::Result<&str, &str>,
    ) -> Result<()> {
        match outcome {
            Ok(path) => {
                sqlx::query(
                    r#"
                    UPDATE script_chunks
                    SET audio_path = ?, audio_ready = 1, audio_error = NULL, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(path)
                .bind(Utc::now())
                .bind(chunk_id)
                .execute(self.pool())
                .await?;
            }
            Err(message) => {
                sqlx::query(
                    r#"
                    UPDATE script_chunks
                    SET audio_ready = 0, audio_error = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(truncate_message(message))
                .bind(Utc::now())
                .bind(chunk_id)
                .execute(self.pool())
                .await?;
            }
        }
        Ok(())
    }

    pub async fn delete_chunks(&self, generation_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM script_chunks WHERE generation_id = ?")
            .bind(generation_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

//! Topic upserts and link management.

use super::models::{Topic, TopicStatus};
use super::{new_id, Store};
use crate::error::Result;
use chrono::Utc;

/// Result of a conditional topic delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicDelete {
    Deleted,
    /// Exists but is linked or no longer `suggested`.
    Conflict,
    NotFound,
}

impl Store {
    pub async fn topic(&self, id: &str) -> Result<Option<Topic>> {
        let topic = sqlx::query_as::<_, Topic>("SELECT * FROM topics WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(topic)
    }

    /// Upsert by the `(title, language)` identity. An existing row only
    /// gets its `updated_at` touched.
    pub async fn upsert_topic_by_title(
        &self,
        title: &str,
        language: &str,
        translated_title: Option<&str>,
        seed_topic: Option<&str>,
    ) -> Result<Topic> {
        let now = Utc::now();
        let topic = sqlx::query_as::<_, Topic>(
            r#"
            INSERT INTO topics
                (id, language, title, translated_title, seed_topic, status,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'suggested', ?, ?)
            ON CONFLICT (title, language) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(language)
        .bind(title)
        .bind(translated_title)
        .bind(seed_topic)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(topic)
    }

    /// Upsert keyed by the rewrite-source snippet. Looked up first because
    /// the generated placeholder title would collide on the title key.
    pub async fn upsert_topic_by_snippet(
        &self,
        snippet_key: &str,
        language: &str,
        title: &str,
        translated_title: Option<&str>,
    ) -> Result<Topic> {
        let existing = sqlx::query_as::<_, Topic>(
            "SELECT * FROM topics WHERE snippet_key = ? AND language = ?",
        )
        .bind(snippet_key)
        .bind(language)
        .fetch_optional(self.pool())
        .await?;

        if let Some(topic) = existing {
            sqlx::query("UPDATE topics SET updated_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(&topic.id)
                .execute(self.pool())
                .await?;
            return Ok(topic);
        }

        let now = Utc::now();
        let topic = sqlx::query_as::<_, Topic>(
            r#"
            INSERT INTO topics
                (id, language, title, translated_title, seed_topic, snippet_key,
                 status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'suggested', ?, ?)
            ON CONFLICT (title, language) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(language)
        .bind(title)
        .bind(translated_title)
        .bind(title)
        .bind(snippet_key)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(topic)
    }

    /// Attach a generation and mark the topic requested.
    pub async fn link_generation(&self, topic_id: &str, generation_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE topics
            SET generation_id = ?, status = 'generation_requested', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(generation_id)
        .bind(Utc::now())
        .bind(topic_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Detach a (possibly deleted) generation. Only clears the link when it
    /// still points at the expected generation.
    pub async fn unlink_generation(
        &self,
        topic_id: &str,
        generation_id: &str,
        status: TopicStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE topics
            SET generation_id = NULL, status = ?, updated_at = ?
            WHERE id = ? AND generation_id = ?
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(topic_id)
        .bind(generation_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_topic_status(&self, id: &str, status: TopicStatus) -> Result<()> {
        sqlx::query("UPDATE topics SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_topic_title(
        &self,
        id: &str,
        title: &str,
        translated_title: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE topics
            SET title = ?, translated_title = COALESCE(?, translated_title), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(translated_title)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Hard delete, permitted only for unlinked `suggested` topics.
    pub async fn delete_topic_if_unlinked(&self, id: &str) -> Result<TopicDelete> {
        let result = sqlx::query(
            "DELETE FROM topics
             WHERE id = ? AND status = 'suggested' AND generation_id IS NULL",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(TopicDelete::Deleted);
        }

        match self.topic(id).await? {
            Some(_) => Ok(TopicDelete::Conflict),
            None => Ok(TopicDelete::NotFound),
        }
    }
}

//! Intake operations behind the HTTP handlers: suggestion, enqueueing and
//! the operator actions.

use crate::content::generator;
use crate::error::Result;
use crate::llm::ChatModel;
use crate::store::generations::NewGeneration;
use crate::store::topics::TopicDelete;
use crate::store::{Store, TaskType, TopicStatus};
use futures::future::join_all;
use tracing::{info, warn};

/// Options shared by both submission forms.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub priority: i64,
    pub model: String,
    pub target_duration: Option<i64>,
}

/// `low`/`medium`/`high` map to 3/2/1 (1 is the highest priority).
pub fn parse_priority(value: &str) -> i64 {
    match value.to_lowercase().as_str() {
        "high" => 1,
        "low" => 3,
        _ => 2,
    }
}

/// Durations outside 1..=180 minutes are discarded.
pub fn clamp_duration(value: Option<&str>) -> Option<i64> {
    let minutes: i64 = value?.trim().parse().ok()?;
    (1..=180).contains(&minutes).then_some(minutes)
}

/// One candidate title offered back to the user.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub original: String,
    pub translation_vi: String,
}

/// Ask the LLM for candidate titles and translate them into the display
/// language when it differs. Nothing is persisted.
pub async fn suggest(
    chat: &dyn ChatModel,
    seed: &str,
    language: &str,
    display_language: &str,
    model: &str,
) -> Result<Vec<Suggestion>> {
    let titles = generator::suggest_titles(chat, seed, language, model).await?;

    if language == display_language {
        return Ok(titles
            .into_iter()
            .map(|t| Suggestion {
                translation_vi: t.clone(),
                original: t,
            })
            .collect());
    }

    let translations = join_all(titles.iter().map(|title| {
        generator::translate_text(chat, title, display_language, Some(language), model)
    }))
    .await;

    Ok(titles
        .into_iter()
        .zip(translations)
        .map(|(original, translation)| {
            let translation_vi = match translation {
                Ok(t) if !t.is_empty() => t,
                Ok(_) => original.clone(),
                Err(e) => {
                    warn!("Suggestion translation failed: {e}");
                    original.clone()
                }
            };
            Suggestion {
                original,
                translation_vi,
            }
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(String),
    /// A non-terminal generation already references this topic.
    SkippedDuplicate,
}

/// Upsert the topic and enqueue a `from_topic` generation unless a live
/// one already exists.
pub async fn enqueue_from_topic(
    store: &Store,
    title: &str,
    translated_title: &str,
    language: &str,
    options: &GenerationOptions,
) -> Result<EnqueueOutcome> {
    let topic = store
        .upsert_topic_by_title(title, language, Some(translated_title), Some(title))
        .await?;

    if store.has_live_generation(&topic.id).await? {
        info!("Topic '{title}' already has an active generation, skipping");
        return Ok(EnqueueOutcome::SkippedDuplicate);
    }

    let generation = store
        .insert_generation(NewGeneration {
            topic_id: topic.id.clone(),
            task_type: TaskType::FromTopic,
            language: language.to_string(),
            title: title.to_string(),
            translated_title: Some(translated_title.to_string()),
            model: options.model.clone(),
            priority: options.priority,
            target_duration_minutes: options.target_duration,
            source_script: None,
        })
        .await?;

    store.link_generation(&topic.id, &generation.id).await?;
    info!("Enqueued from_topic generation {} for '{title}'", generation.id);
    Ok(EnqueueOutcome::Created(generation.id))
}

/// Upsert a snippet-keyed topic and enqueue a rewrite generation with the
/// source script persisted verbatim.
pub async fn enqueue_rewrite(
    store: &Store,
    chat: &dyn ChatModel,
    source_script: &str,
    language: &str,
    display_language: &str,
    options: &GenerationOptions,
) -> Result<String> {
    let snippet: String = source_script.chars().take(200).collect();
    let preview: String = source_script.chars().take(40).collect();
    let title = format!("Rewrite Task ({language}) - {preview}...");

    let translated_title = if language == display_language {
        title.clone()
    } else {
        match generator::translate_text(chat, &title, display_language, Some(language), &options.model)
            .await
        {
            Ok(t) if !t.is_empty() => t,
            _ => title.clone(),
        }
    };

    let topic = store
        .upsert_topic_by_snippet(&snippet, language, &title, Some(&translated_title))
        .await?;

    let generation = store
        .insert_generation(NewGeneration {
            topic_id: topic.id.clone(),
            task_type: TaskType::RewriteScript,
            language: language.to_string(),
            title,
            translated_title: Some(translated_title),
            model: options.model.clone(),
            priority: options.priority,
            target_duration_minutes: options.target_duration,
            source_script: Some(source_script.to_string()),
        })
        .await?;

    store.link_generation(&topic.id, &generation.id).await?;
    info!("Enqueued rewrite generation {}", generation.id);
    Ok(generation.id)
}

pub async fn delete_topic(store: &Store, topic_id: &str) -> Result<TopicDelete> {
    store.delete_topic_if_unlinked(topic_id).await
}

/// Delete chunks, then the generation, then unlink the topic.
pub async fn delete_generation(store: &Store, generation_id: &str) -> Result<bool> {
    let Some(generation) = store.delete_generation(generation_id).await? else {
        return Ok(false);
    };

    store
        .unlink_generation(&generation.topic_id, generation_id, TopicStatus::GenerationReset)
        .await?;

    if let Some(script_name) = generation.script_name {
        // Audio files stay on disk; a separate cleanup job owns them.
        info!("Generation {generation_id} deleted; audio directory '{script_name}' left for cleanup");
    }
    Ok(true)
}

/// Drop chunks and return the generation to `pending`.
pub async fn reset_generation(store: &Store, generation_id: &str) -> Result<bool> {
    let Some(generation) = store.reset_generation(generation_id).await? else {
        return Ok(false);
    };

    store
        .set_topic_status(&generation.topic_id, TopicStatus::GenerationPending)
        .await?;
    info!("Reset generation {generation_id} to pending");
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicLinkReset {
    Unlinked,
    /// The linked generation still exists; nothing to repair.
    StillValid,
    NoLink,
    NotFound,
}

/// Unlink a topic whose generation no longer exists.
pub async fn reset_topic_link(store: &Store, topic_id: &str) -> Result<TopicLinkReset> {
    let Some(topic) = store.topic(topic_id).await? else {
        return Ok(TopicLinkReset::NotFound);
    };
    let Some(generation_id) = topic.generation_id else {
        return Ok(TopicLinkReset::NoLink);
    };

    if store.generation(&generation_id).await?.is_some() {
        return Ok(TopicLinkReset::StillValid);
    }

    store
        .unlink_generation(topic_id, &generation_id, TopicStatus::Suggested)
        .await?;
    info!("Unlinked missing generation {generation_id} from topic {topic_id}");
    Ok(TopicLinkReset::Unlinked)
}

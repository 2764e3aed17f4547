//! Content worker: drains claimable generations, produces outlines and
//! script chunks, and enforces the length target.
//!
//! Exclusivity is carried entirely by the store's conditional status
//! writes. Every terminal write names the status the worker last set; a
//! predicate miss means an operator intervened and the task is abandoned
//! without a terminal status.

use crate::config::Config;
use crate::content::generator;
use crate::content::outline::{self, FlatItem};
use crate::error::Result;
use crate::llm::ChatModel;
use crate::store::{Generation, GenerationStatus, ItemKind, Store, TaskType};
use crate::text;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Locks older than this are recovered to their entry state.
pub const STUCK_LOCK_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Minimum gap between retries when the store is unreachable.
const DB_RETRY_WAIT: Duration = Duration::from_secs(30);

/// Rewritten scripts are cut into pieces of at most this many characters.
const MAX_REWRITE_CHUNK_CHARS: usize = 3500;

/// Extra length-loop iterations allowed beyond the estimated item count.
const EXTRA_LENGTH_ITERATIONS: i64 = 20;

/// How one claimed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    /// Ran to a terminal status (`content_ready` or a failure sink).
    Finished,
    /// Lost ownership to an external status change; nothing written.
    Aborted,
}

#[derive(Clone)]
pub struct ContentWorker {
    store: Store,
    chat: Arc<dyn ChatModel>,
    config: Arc<Config>,
}

impl ContentWorker {
    pub fn new(store: Store, chat: Arc<dyn ChatModel>, config: Arc<Config>) -> Self {
        Self {
            store,
            chat,
            config,
        }
    }

    /// Polling loop. Claims up to `max_concurrent_tasks` generations and
    /// processes each in its own task slot.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            "Content worker started (max {} concurrent tasks, poll every {:?})",
            self.config.max_concurrent_tasks,
            self.config.content_poll_interval()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.store.reclaim_stuck_content(STUCK_LOCK_MAX_AGE).await {
                error!("Failed to reclaim stuck tasks: {e}");
            }

            loop {
                if semaphore.available_permits() == 0 {
                    break;
                }
                match self.store.claim_next_content().await {
                    Ok(Some(generation)) => {
                        info!(
                            "Picked up task {} (type {}, priority {})",
                            generation.id, generation.task_type, generation.priority
                        );
                        let permit = semaphore
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("Semaphore closed");
                        let worker = self.clone();
                        tokio::spawn(async move {
                            worker.process(generation).await;
                            drop(permit);
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Claim failed, waiting for store: {e}");
                        tokio::time::sleep(DB_RETRY_WAIT).await;
                        break;
                    }
                }
            }

            sleep_interruptible(self.config.content_poll_interval(), &shutdown).await;
        }

        info!("Content worker stopping");
    }

    /// Process one claimed generation (already in `processing_lock`).
    pub async fn process(&self, generation: Generation) {
        let id = generation.id.clone();
        let task_type = generation.task_type;

        match self.process_inner(generation).await {
            Ok(TaskOutcome::Finished) => {
                info!("Task {id} ({task_type}) finished");
            }
            Ok(TaskOutcome::Aborted) => {
                info!("Task {id} ({task_type}) abandoned after external status change");
            }
            Err(e) => {
                error!("Task {id} ({task_type}) failed: {e}");
                let written = self
                    .store
                    .mark_failed_if(
                        &id,
                        &[
                            GenerationStatus::ProcessingLock,
                            GenerationStatus::GeneratingOutline,
                            GenerationStatus::ContentGenerating,
                        ],
                        GenerationStatus::ContentFailed,
                        "task",
                        &e.to_string(),
                    )
                    .await;
                if let Err(db_err) = written {
                    error!("Failed to record failure for {id}: {db_err}");
                }
            }
        }
    }

    async fn process_inner(&self, generation: Generation) -> Result<TaskOutcome> {
        let id = generation.id.clone();

        let script_name = match generation.script_name.clone() {
            Some(name) => name,
            None => {
                let name = uuid::Uuid::new_v4().to_string();
                self.store.set_script_name_if_missing(&id, &name).await?;
                name
            }
        };

        let needs_outline = match generation.task_type {
            TaskType::FromTopic => generation.outline.is_none(),
            TaskType::RewriteScript => generation.derived_outline.is_none(),
        };
        let entry_status = if needs_outline {
            GenerationStatus::GeneratingOutline
        } else {
            GenerationStatus::ContentGenerating
        };
        if !self
            .store
            .update_status_if(&id, &[GenerationStatus::ProcessingLock], entry_status)
            .await?
        {
            return Ok(TaskOutcome::Aborted);
        }

        // Sizing: first computation is persisted; later runs prefer the
        // stored values so reruns stay consistent.
        let cpm = self.config.cpm_for(&generation.language);
        let estimate = text::estimate_targets(generation.target_duration_minutes, cpm);
        self.store
            .save_estimates(
                &id,
                estimate.target_chars,
                estimate.num_quotes,
                estimate.num_stories,
            )
            .await?;
        let target_chars = generation.target_chars.unwrap_or(estimate.target_chars);
        let num_quotes = generation.num_quotes.unwrap_or(estimate.num_quotes);
        let num_stories = generation.num_stories.unwrap_or(estimate.num_stories);
        let min_chars = text::min_chars(target_chars);

        info!(
            "Task {id}: target {target_chars} chars (min {min_chars}), \
             {num_quotes} quotes, {num_stories} stories, model {}",
            generation.model
        );

        self.metadata_pass(&generation).await;

        match generation.task_type {
            TaskType::FromTopic => {
                self.run_from_topic(
                    &generation,
                    &script_name,
                    entry_status,
                    num_quotes,
                    num_stories,
                    min_chars,
                )
                .await
            }
            TaskType::RewriteScript => {
                self.run_rewrite(&generation, &script_name, entry_status, target_chars)
                    .await
            }
        }
    }

    /// Idempotent metadata pass: SEO title plus display-language
    /// translation, mirrored onto the topic. Failures only log.
    async fn metadata_pass(&self, generation: &Generation) {
        if generation.seo_title.is_some() {
            return;
        }

        let snippet: String = match generation.task_type {
            TaskType::RewriteScript => generation
                .source_script
                .as_deref()
                .unwrap_or(&generation.title)
                .chars()
                .take(1000)
                .collect(),
            TaskType::FromTopic => generation.title.clone(),
        };

        let title = match generator::seo_title(
            self.chat.as_ref(),
            &snippet,
            &generation.language,
            &generation.model,
        )
        .await
        {
            Ok(title) => title,
            Err(e) => {
                warn!("SEO title generation failed for {}: {e}", generation.id);
                return;
            }
        };

        if let Err(e) = self.store.set_seo_title(&generation.id, &title).await {
            warn!("Failed to store SEO title for {}: {e}", generation.id);
            return;
        }

        let translated = if generation.language != self.config.display_language {
            match generator::translate_text(
                self.chat.as_ref(),
                &title,
                &self.config.display_language,
                Some(&generation.language),
                &generation.model,
            )
            .await
            {
                Ok(t) if !t.is_empty() => Some(t),
                Ok(_) => None,
                Err(e) => {
                    warn!("Title translation failed for {}: {e}", generation.id);
                    None
                }
            }
        } else {
            Some(title.clone())
        };

        if let Some(ref t) = translated {
            if let Err(e) = self
                .store
                .set_generation_translated_title(&generation.id, t)
                .await
            {
                warn!("Failed to store translated title: {e}");
            }
        }
        if let Err(e) = self
            .store
            .set_topic_title(&generation.topic_id, &title, translated.as_deref())
            .await
        {
            warn!("Failed to mirror title onto topic: {e}");
        }
    }

    async fn run_from_topic(
        &self,
        generation: &Generation,
        script_name: &str,
        entry_status: GenerationStatus,
        num_quotes: i64,
        num_stories: i64,
        min_chars: i64,
    ) -> Result<TaskOutcome> {
        let id = &generation.id;
        let topic = generation.title.clone();

        let outline_markdown = match &generation.outline {
            Some(existing) => {
                info!("Task {id}: using existing outline");
                existing.clone()
            }
            None => {
                match generator::outline_from_topic(
                    self.chat.as_ref(),
                    &topic,
                    &generation.language,
                    &generation.model,
                    num_quotes,
                    num_stories,
                )
                .await
                {
                    Ok(outline) => {
                        self.store.store_outline(id, &outline).await?;
                        outline
                    }
                    Err(e) => {
                        self.store
                            .mark_failed_if(
                                id,
                                &[GenerationStatus::GeneratingOutline],
                                GenerationStatus::OutlineFailed,
                                "outline",
                                &e.to_string(),
                            )
                            .await?;
                        return Ok(TaskOutcome::Finished);
                    }
                }
            }
        };

        if entry_status == GenerationStatus::GeneratingOutline
            && !self
                .store
                .update_status_if(
                    id,
                    &[GenerationStatus::GeneratingOutline],
                    GenerationStatus::ContentGenerating,
                )
                .await?
        {
            return Ok(TaskOutcome::Aborted);
        }

        let flat = outline::flatten_outline(&outline::parse_outline(&outline_markdown));
        if flat.is_empty() {
            self.store
                .mark_failed_if(
                    id,
                    &[GenerationStatus::ContentGenerating],
                    GenerationStatus::ContentFailed,
                    "outline_parse",
                    "flattened outline is empty",
                )
                .await?;
            return Ok(TaskOutcome::Finished);
        }

        // Resume after the last persisted chunk.
        let start_index = self.store.next_section_index(id).await?;
        let remaining: Vec<FlatItem> = flat
            .iter()
            .filter(|item| item.index >= start_index)
            .cloned()
            .collect();
        info!(
            "Task {id}: outline has {} items, generating {} (resume at {start_index})",
            flat.len(),
            remaining.len()
        );

        if !remaining.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.config.chunk_concurrency));
            let mut futures = FuturesUnordered::new();

            for item in remaining {
                let parent =
                    outline::parent_context(&flat, item.index as usize, &topic).to_string();
                let sem = semaphore.clone();
                let chat = self.chat.clone();
                let topic = topic.clone();
                let language = generation.language.clone();
                let model = generation.model.clone();

                futures.push(async move {
                    let _permit = sem.acquire().await.expect("Semaphore closed");
                    let result = generator::section_content(
                        chat.as_ref(),
                        &topic,
                        &item,
                        &parent,
                        &language,
                        &model,
                    )
                    .await;
                    (item, result)
                });
            }

            let mut any_failed = false;
            while let Some((item, result)) = futures.next().await {
                match result {
                    Ok(content) => {
                        if let Err(e) = self
                            .store
                            .upsert_chunk(
                                id,
                                script_name,
                                item.index,
                                &item.title,
                                &content,
                                item.level,
                                item.kind,
                            )
                            .await
                        {
                            error!("Failed to save chunk {} for {id}: {e}", item.index);
                            any_failed = true;
                        }
                    }
                    Err(e) => {
                        error!("Generation failed for item {} of {id}: {e}", item.index);
                        any_failed = true;
                    }
                }
            }

            if any_failed {
                self.store
                    .mark_failed_if(
                        id,
                        &[GenerationStatus::ContentGenerating],
                        GenerationStatus::ContentFailed,
                        "content",
                        "one or more outline items failed to generate",
                    )
                    .await?;
                return Ok(TaskOutcome::Finished);
            }
        }

        match self
            .enforce_length(generation, script_name, num_quotes, num_stories, min_chars)
            .await?
        {
            TaskOutcome::Aborted => return Ok(TaskOutcome::Aborted),
            TaskOutcome::Finished => {}
        }

        if self
            .store
            .update_status_if(
                id,
                &[GenerationStatus::ContentGenerating],
                GenerationStatus::ContentReady,
            )
            .await?
        {
            Ok(TaskOutcome::Finished)
        } else {
            Ok(TaskOutcome::Aborted)
        }
    }

    /// Append quote/story chunks until the minimum length or the iteration
    /// cap is reached. Re-reads the status before every iteration so
    /// operator resets and deletes are observed promptly.
    async fn enforce_length(
        &self,
        generation: &Generation,
        script_name: &str,
        num_quotes: i64,
        num_stories: i64,
        min_chars: i64,
    ) -> Result<TaskOutcome> {
        let id = &generation.id;
        let max_iterations = num_quotes + num_stories + EXTRA_LENGTH_ITERATIONS;
        let mut iterations: i64 = 0;

        loop {
            let Some(current) = self.store.generation(id).await? else {
                warn!("Task {id} disappeared during length check");
                return Ok(TaskOutcome::Aborted);
            };
            if current.status != GenerationStatus::ContentGenerating {
                warn!(
                    "Task {id} status changed to {} during length check, stopping",
                    current.status
                );
                return Ok(TaskOutcome::Aborted);
            }

            let current_chars = self.store.text_of(id).await?.chars().count() as i64;
            if current_chars >= min_chars {
                info!("Task {id}: length target reached ({current_chars}/{min_chars} chars)");
                return Ok(TaskOutcome::Finished);
            }
            if iterations >= max_iterations {
                warn!(
                    "Task {id}: stopped extending after {max_iterations} iterations \
                     ({current_chars}/{min_chars} chars)"
                );
                self.store.set_length_capped(id).await?;
                return Ok(TaskOutcome::Finished);
            }
            iterations += 1;

            let quotes_have = self
                .store
                .count_chunks_of_kinds(id, &[ItemKind::Quote, ItemKind::QuoteAdded])
                .await?;
            let stories_have = self
                .store
                .count_chunks_of_kinds(id, &[ItemKind::Story, ItemKind::StoryAdded])
                .await?;
            let kind = if quotes_have < num_quotes {
                ItemKind::QuoteAdded
            } else if stories_have < num_stories {
                ItemKind::StoryAdded
            } else if iterations % 2 == 0 {
                ItemKind::StoryAdded
            } else {
                ItemKind::QuoteAdded
            };

            info!(
                "Task {id}: {current_chars}/{min_chars} chars, appending {} \
                 (iteration {iterations}/{max_iterations})",
                kind
            );

            let existing = self.store.section_titles(id, 2).await?;
            let content = match generator::added_item(
                self.chat.as_ref(),
                &generation.title,
                &generation.language,
                &generation.model,
                &existing,
                kind,
            )
            .await
            {
                Ok(content) => content,
                Err(e) => {
                    self.store
                        .mark_failed_if(
                            id,
                            &[GenerationStatus::ContentGenerating],
                            GenerationStatus::ContentFailed,
                            "length_extension",
                            &e.to_string(),
                        )
                        .await?;
                    return Ok(TaskOutcome::Finished);
                }
            };

            let next_index = self.store.next_section_index(id).await?;
            let title = match kind {
                ItemKind::QuoteAdded => format!("Added Quote #{next_index}"),
                _ => format!("Added Story #{next_index}"),
            };
            self.store
                .upsert_chunk(id, script_name, next_index, &title, &content, 3, kind)
                .await?;
        }
    }

    async fn run_rewrite(
        &self,
        generation: &Generation,
        script_name: &str,
        entry_status: GenerationStatus,
        target_chars: i64,
    ) -> Result<TaskOutcome> {
        let id = &generation.id;

        let Some(source_script) = generation.source_script.as_deref() else {
            self.store
                .mark_failed_if(
                    id,
                    &[entry_status],
                    GenerationStatus::ContentFailed,
                    "rewrite_setup",
                    "source script missing",
                )
                .await?;
            return Ok(TaskOutcome::Finished);
        };

        let outline_markdown = match &generation.derived_outline {
            Some(existing) => {
                info!("Task {id}: using existing derived outline");
                existing.clone()
            }
            None => {
                match generator::outline_from_script(
                    self.chat.as_ref(),
                    source_script,
                    &generation.language,
                    &generation.model,
                )
                .await
                {
                    Ok(outline) => {
                        self.store.store_derived_outline(id, &outline).await?;
                        outline
                    }
                    Err(e) => {
                        self.store
                            .mark_failed_if(
                                id,
                                &[GenerationStatus::GeneratingOutline],
                                GenerationStatus::OutlineFailed,
                                "derived_outline",
                                &e.to_string(),
                            )
                            .await?;
                        return Ok(TaskOutcome::Finished);
                    }
                }
            }
        };

        if entry_status == GenerationStatus::GeneratingOutline
            && !self
                .store
                .update_status_if(
                    id,
                    &[GenerationStatus::GeneratingOutline],
                    GenerationStatus::ContentGenerating,
                )
                .await?
        {
            return Ok(TaskOutcome::Aborted);
        }

        let rewritten = match generator::rewrite_script(
            self.chat.as_ref(),
            source_script,
            &outline_markdown,
            &generation.language,
            &generation.model,
            target_chars,
        )
        .await
        {
            Ok(script) => script,
            Err(e) => {
                self.store
                    .mark_failed_if(
                        id,
                        &[GenerationStatus::ContentGenerating],
                        GenerationStatus::ContentFailed,
                        "rewrite",
                        &e.to_string(),
                    )
                    .await?;
                return Ok(TaskOutcome::Finished);
            }
        };

        // Rewrites always start from clean rows: stale audio must not
        // survive a re-run of different text.
        self.store.delete_chunks(id).await?;

        let pieces = text::split_into_tts_chunks(&rewritten, MAX_REWRITE_CHUNK_CHARS);
        if pieces.is_empty() {
            self.store
                .mark_failed_if(
                    id,
                    &[GenerationStatus::ContentGenerating],
                    GenerationStatus::ContentFailed,
                    "rewrite_split",
                    "rewritten script produced no chunks",
                )
                .await?;
            return Ok(TaskOutcome::Finished);
        }

        info!("Task {id}: saving {} rewritten chunks", pieces.len());
        for (index, piece) in pieces.iter().enumerate() {
            self.store
                .upsert_chunk(
                    id,
                    script_name,
                    index as i64,
                    &format!("Rewrite Pt.{}", index + 1),
                    piece,
                    1,
                    ItemKind::RewriteChunk,
                )
                .await?;
        }

        if self
            .store
            .update_status_if(
                id,
                &[GenerationStatus::ContentGenerating],
                GenerationStatus::ContentReady,
            )
            .await?
        {
            Ok(TaskOutcome::Finished)
        } else {
            Ok(TaskOutcome::Aborted)
        }
    }
}

/// Sleep in small steps so a shutdown request is honored quickly.
pub async fn sleep_interruptible(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(remaining.min(Duration::from_millis(500))).await;
    }
}

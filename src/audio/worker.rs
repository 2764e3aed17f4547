//! Audio workers: claim `content_ready` generations, produce per-chunk
//! audio, and finalize with a single concatenated MP3.
//!
//! The primary-language worker runs chunks strictly in sequence (the
//! provider used there is rate-limit sensitive); the worker for every other
//! language fans chunks out with bounded concurrency. Claim and completion
//! logic is identical.

use crate::audio::concat;
use crate::audio::synth::AudioSynth;
use crate::audio::tts::VoiceConfig;
use crate::content::worker::{sleep_interruptible, STUCK_LOCK_MAX_AGE};
use crate::error::Result;
use crate::store::{Generation, GenerationStatus, Store};
use crate::text;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Which slice of the queue this worker drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerScope {
    /// `language == primary`, chunks processed serially.
    Primary,
    /// `language != primary`, chunks processed with bounded concurrency.
    Other,
}

/// Tasks claimed per poll tick.
const CLAIM_BATCH_LIMIT: i64 = 10;

pub struct AudioWorker {
    store: Store,
    synth: Arc<AudioSynth>,
    voices: VoiceConfig,
    scope: WorkerScope,
    primary_language: String,
    chunk_concurrency: usize,
}

impl AudioWorker {
    pub fn new(
        store: Store,
        synth: Arc<AudioSynth>,
        voices: VoiceConfig,
        scope: WorkerScope,
        primary_language: String,
        chunk_concurrency: usize,
    ) -> Self {
        Self {
            store,
            synth,
            voices,
            scope,
            primary_language,
            chunk_concurrency,
        }
    }

    /// Polling loop: one tick per interval, claims up to a batch of tasks
    /// per tick.
    pub async fn run(&self, interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(
            "Audio worker started (scope {:?}, primary language '{}', every {:?})",
            self.scope, self.primary_language, interval
        );

        while !shutdown.load(Ordering::Relaxed) {
            match self.tick().await {
                Ok(processed) if processed > 0 => {
                    info!("Audio tick processed {processed} tasks");
                }
                Ok(_) => {}
                Err(e) => error!("Audio tick failed: {e}"),
            }
            sleep_interruptible(interval, &shutdown).await;
        }

        info!("Audio worker stopping");
    }

    /// One poll: recover stuck locks, snapshot a candidate batch, then
    /// lock and process each candidate.
    pub async fn tick(&self) -> Result<usize> {
        self.store.reclaim_stuck_audio(STUCK_LOCK_MAX_AGE).await?;

        let candidates = self
            .store
            .audio_candidates(
                &self.primary_language,
                self.scope == WorkerScope::Primary,
                CLAIM_BATCH_LIMIT,
            )
            .await?;

        let mut processed = 0;
        for candidate in candidates {
            let Some(generation) = self.store.claim_audio_by_id(&candidate).await? else {
                info!("Audio task {candidate} was taken by another worker, skipping");
                continue;
            };

            let id = generation.id.clone();
            if let Err(e) = self.process_task(generation).await {
                error!("Audio task {id} failed: {e}");
                self.store
                    .mark_failed_if(
                        &id,
                        &[
                            GenerationStatus::AudioProcessingLock,
                            GenerationStatus::AudioGenerating,
                        ],
                        GenerationStatus::AudioFailed,
                        "audio_worker",
                        &e.to_string(),
                    )
                    .await?;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Process one claimed generation (already in `audio_processing_lock`).
    pub async fn process_task(&self, generation: Generation) -> Result<()> {
        let id = generation.id.clone();

        if !self
            .store
            .update_status_if(
                &id,
                &[GenerationStatus::AudioProcessingLock],
                GenerationStatus::AudioGenerating,
            )
            .await?
        {
            info!("Audio task {id} lock lost before start, skipping");
            return Ok(());
        }

        let Some(script_name) = generation.script_name.clone() else {
            self.store
                .mark_failed_if(
                    &id,
                    &[GenerationStatus::AudioGenerating],
                    GenerationStatus::AudioFailed,
                    "audio_setup",
                    "script_name missing on generation",
                )
                .await?;
            return Ok(());
        };

        let voice = self.voices.resolve(&generation.language);
        let pending = self.store.pending_audio_chunks(&id).await?;
        info!(
            "Audio task {id} ({}): {} chunks need audio",
            generation.language,
            pending.len()
        );

        match self.scope {
            WorkerScope::Primary => {
                for chunk in &pending {
                    if let Err(e) = self
                        .synth
                        .produce_chunk(&self.store, &chunk.id, &script_name, &voice)
                        .await
                    {
                        // Store-level trouble; chunk-level failures are
                        // already recorded on the row.
                        error!("Chunk {} production errored: {e}", chunk.id);
                    }
                }
            }
            WorkerScope::Other => {
                let semaphore = Arc::new(Semaphore::new(self.chunk_concurrency));
                let mut futures = FuturesUnordered::new();

                for chunk in &pending {
                    let sem = semaphore.clone();
                    let synth = self.synth.clone();
                    let store = self.store.clone();
                    let chunk_id = chunk.id.clone();
                    let script_name = script_name.clone();
                    let voice = voice.clone();

                    futures.push(async move {
                        let _permit = sem.acquire().await.expect("Semaphore closed");
                        let result = synth
                            .produce_chunk(&store, &chunk_id, &script_name, &voice)
                            .await;
                        (chunk_id, result)
                    });
                }

                while let Some((chunk_id, result)) = futures.next().await {
                    if let Err(e) = result {
                        error!("Chunk {chunk_id} production errored: {e}");
                    }
                }
            }
        }

        self.finalize(&generation, &script_name).await
    }

    /// Count the chunk outcomes and write exactly one next status.
    async fn finalize(&self, generation: &Generation, script_name: &str) -> Result<()> {
        let id = &generation.id;
        let counts = self.store.audio_counts(id).await?;
        info!(
            "Audio check for {id}: total={}, ready={}, errors={}",
            counts.total, counts.ready, counts.errored
        );

        if counts.errored > 0 {
            self.store
                .mark_failed_if(
                    id,
                    &[GenerationStatus::AudioGenerating],
                    GenerationStatus::AudioFailed,
                    "audio_chunk",
                    &format!("{}/{} chunks failed", counts.errored, counts.total),
                )
                .await?;
            return Ok(());
        }

        if counts.total > 0 && counts.ready == counts.total {
            let paths: Vec<std::path::PathBuf> = self
                .store
                .ready_audio_paths(id)
                .await?
                .into_iter()
                .map(std::path::PathBuf::from)
                .collect();

            let safe_name = text::sanitize_script_name(script_name);
            let output = self
                .synth
                .script_dir(script_name)
                .join(format!("{safe_name}_combined_{id}.mp3"));

            match concat::concatenate_mp3(self.synth.ffmpeg(), &paths, &output).await {
                Ok(true) => {
                    if self
                        .store
                        .complete_audio(id, &output.display().to_string())
                        .await?
                    {
                        info!("Audio task {id} completed: {}", output.display());
                    } else {
                        warn!("Completion write for {id} skipped, status changed externally");
                    }
                }
                Ok(false) => {
                    self.store
                        .mark_failed_if(
                            id,
                            &[GenerationStatus::AudioGenerating],
                            GenerationStatus::AudioFailed,
                            "audio_combine",
                            "no valid chunk audio to combine",
                        )
                        .await?;
                }
                Err(e) => {
                    self.store
                        .mark_failed_if(
                            id,
                            &[GenerationStatus::AudioGenerating],
                            GenerationStatus::AudioFailed,
                            "audio_combine",
                            &e.to_string(),
                        )
                        .await?;
                }
            }
            return Ok(());
        }

        // Partial progress (or no chunks at all): hand the task back for
        // another pass.
        if counts.ready < counts.total {
            warn!(
                "Audio task {id}: only {}/{} chunks ready, requeueing",
                counts.ready, counts.total
            );
        } else {
            warn!("Audio task {id} has no chunks, requeueing");
        }
        self.store
            .update_status_if(
                id,
                &[GenerationStatus::AudioGenerating],
                GenerationStatus::ContentReady,
            )
            .await?;
        Ok(())
    }
}

//! Per-chunk audio production: provider calls, oversized-text splitting,
//! sub-chunk concatenation and the final chunk-row update.

use crate::audio::concat::{self, MIN_AUDIO_FILE_SIZE};
use crate::audio::tts::{TtsRegistry, VoiceSettings};
use crate::error::{Result, ScriptcastError};
use crate::retry::{retry, Backoff};
use crate::store::Store;
use crate::text;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const TTS_RETRY_ATTEMPTS: u32 = 3;
const TTS_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Produces chunk audio files under `audio_root/<script dir>/`.
pub struct AudioSynth {
    registry: TtsRegistry,
    audio_root: PathBuf,
    char_limit: usize,
    ffmpeg: String,
    retry_wait: Duration,
}

impl AudioSynth {
    pub fn new(registry: TtsRegistry, audio_root: PathBuf, char_limit: usize, ffmpeg: String) -> Self {
        Self {
            registry,
            audio_root,
            char_limit,
            ffmpeg,
            retry_wait: TTS_RETRY_WAIT,
        }
    }

    /// Shorten the between-attempt wait (tests).
    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    pub fn audio_root(&self) -> &Path {
        &self.audio_root
    }

    pub fn ffmpeg(&self) -> &str {
        &self.ffmpeg
    }

    /// Directory that holds all audio for one script.
    pub fn script_dir(&self, script_name: &str) -> PathBuf {
        self.audio_root.join(text::sanitize_script_name(script_name))
    }

    /// Produce audio for one chunk and record the outcome on the chunk
    /// row. The row update is always the last step. Returns whether the
    /// chunk ended up ready.
    pub async fn produce_chunk(
        &self,
        store: &Store,
        chunk_id: &str,
        script_name: &str,
        voice: &VoiceSettings,
    ) -> Result<bool> {
        let chunk = store
            .chunk(chunk_id)
            .await?
            .ok_or_else(|| ScriptcastError::NotFound(format!("chunk {chunk_id}")))?;

        let text_content = chunk.text_content.trim().to_string();
        if text_content.is_empty() {
            warn!(
                "Chunk {chunk_id} (index {}) has no text content, skipping TTS",
                chunk.section_index
            );
            store
                .mark_chunk_audio(chunk_id, Err("no text content"))
                .await?;
            return Ok(false);
        }

        let script_dir = self.script_dir(script_name);
        tokio::fs::create_dir_all(&script_dir).await?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let file_name = format!(
            "section_{}_{}_{}.mp3",
            chunk.section_index, timestamp, voice.language_code
        );
        let output_path = script_dir.join(file_name);

        info!(
            "Producing audio for chunk {chunk_id} (index {}, provider {}, voice {}) -> {}",
            chunk.section_index,
            voice.provider,
            voice.voice_name,
            output_path.display()
        );

        let attempt = retry(
            TTS_RETRY_ATTEMPTS,
            Backoff::Fixed(self.retry_wait),
            ScriptcastError::is_transient,
            || async {
                if text_content.chars().count() > self.char_limit {
                    self.synthesize_long(&text_content, voice, &output_path, &chunk.id)
                        .await
                } else {
                    self.synthesize_to_file(&text_content, voice, &output_path)
                        .await
                }
            },
        )
        .await;

        match attempt {
            Ok(()) => {
                store
                    .mark_chunk_audio(chunk_id, Ok(&output_path.display().to_string()))
                    .await?;
                Ok(true)
            }
            Err(e) => {
                if output_path.exists() {
                    if let Err(rm_err) = tokio::fs::remove_file(&output_path).await {
                        warn!(
                            "Could not remove failed output {}: {rm_err}",
                            output_path.display()
                        );
                    }
                }
                let message = e.to_string();
                warn!("Audio production failed for chunk {chunk_id}: {message}");
                store.mark_chunk_audio(chunk_id, Err(&message)).await?;
                Ok(false)
            }
        }
    }

    /// One provider call writing one file; undersized output is deleted
    /// and reported as a provider failure so it gets retried.
    async fn synthesize_to_file(
        &self,
        text_content: &str,
        voice: &VoiceSettings,
        output: &Path,
    ) -> Result<()> {
        let provider = self.registry.get(&voice.provider)?;
        let bytes = provider.synthesize(text_content, voice).await?;

        if bytes.len() as u64 <= MIN_AUDIO_FILE_SIZE {
            return Err(ScriptcastError::Provider(format!(
                "provider returned {} bytes, below the {} byte minimum",
                bytes.len(),
                MIN_AUDIO_FILE_SIZE
            )));
        }

        tokio::fs::write(output, &bytes).await?;
        debug!("Saved {} bytes to {}", bytes.len(), output.display());
        Ok(())
    }

    /// Oversized text: split at sentence boundaries, synthesize each piece
    /// into a per-chunk temp directory, concatenate into the final path.
    /// The temp directory is removed when this returns, success or not.
    async fn synthesize_long(
        &self,
        text_content: &str,
        voice: &VoiceSettings,
        output: &Path,
        chunk_id: &str,
    ) -> Result<()> {
        let pieces = text::split_into_tts_chunks(text_content, self.char_limit);
        if pieces.is_empty() {
            return Err(ScriptcastError::InvalidInput(
                "failed to split long text into sub-chunks".to_string(),
            ));
        }

        warn!(
            "Chunk {chunk_id} text ({} chars) over the {} char limit, split into {} sub-chunks",
            text_content.chars().count(),
            self.char_limit,
            pieces.len()
        );

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("tts_{chunk_id}_"))
            .tempdir()?;

        let mut part_paths = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            let part_path = temp_dir.path().join(format!("sub_{i}.mp3"));
            self.synthesize_to_file(piece, voice, &part_path).await?;
            part_paths.push(part_path);
        }

        let combined = concat::concatenate_mp3(&self.ffmpeg, &part_paths, output).await?;
        if !combined {
            return Err(ScriptcastError::Audio(
                "no valid sub-chunk audio to combine".to_string(),
            ));
        }
        Ok(())
    }
}

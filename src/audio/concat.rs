//! MP3 concatenation through the ffmpeg concat demuxer.

use crate::error::{Result, ScriptcastError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Files at or below this size are treated as failed output.
pub const MIN_AUDIO_FILE_SIZE: u64 = 100;

/// Check that ffmpeg is installed and runnable.
pub fn check_ffmpeg(ffmpeg: &str) -> Result<()> {
    let output = Command::new(ffmpeg)
        .arg("-version")
        .output()
        .map_err(|e| {
            ScriptcastError::Audio(format!(
                "ffmpeg not found at '{ffmpeg}'. Install FFmpeg or set FFMPEG_PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(ScriptcastError::Audio("ffmpeg check failed".to_string()));
    }

    debug!("ffmpeg is available at '{ffmpeg}'");
    Ok(())
}

fn is_valid_segment(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > MIN_AUDIO_FILE_SIZE,
        Err(_) => false,
    }
}

/// Concatenate MP3 segments in order into `output`.
///
/// Unreadable or undersized segments are skipped with a warning. Returns
/// `Ok(false)` when no valid segment remained; the ffmpeg export itself
/// failing is the only terminal error.
pub async fn concatenate_mp3(
    ffmpeg: &str,
    inputs: &[PathBuf],
    output: &Path,
) -> Result<bool> {
    if inputs.is_empty() {
        warn!("No audio files provided for concatenation");
        return Ok(false);
    }

    let valid: Vec<&PathBuf> = inputs
        .iter()
        .filter(|path| {
            if is_valid_segment(path) {
                true
            } else {
                warn!("Skipping invalid or undersized segment: {}", path.display());
                false
            }
        })
        .collect();

    if valid.is_empty() {
        warn!("No valid audio segments found to combine");
        return Ok(false);
    }

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // The concat demuxer takes a list file; single quotes in paths are
    // escaped per its quoting rules.
    let list_dir = tempfile::tempdir()?;
    let list_path = list_dir.path().join("segments.txt");
    let list_contents: String = valid
        .iter()
        .map(|path| format!("file '{}'\n", path.display().to_string().replace('\'', r"'\''")))
        .collect();
    tokio::fs::write(&list_path, list_contents).await?;

    info!(
        "Concatenating {} segments into {}",
        valid.len(),
        output.display()
    );

    let result = tokio::process::Command::new(ffmpeg)
        .args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .args(["-c", "copy"])
        .arg(output)
        .output()
        .await
        .map_err(|e| ScriptcastError::Audio(format!("failed to run ffmpeg: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(ScriptcastError::Audio(format!(
            "ffmpeg concat export failed: {}",
            stderr.chars().take(500).collect::<String>()
        )));
    }

    if !is_valid_segment(output) {
        return Err(ScriptcastError::Audio(format!(
            "combined output missing or too small: {}",
            output.display()
        )));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_concat_no_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let combined = concatenate_mp3("ffmpeg", &[], &dir.path().join("out.mp3"))
            .await
            .unwrap();
        assert!(!combined);
    }

    #[tokio::test]
    async fn test_concat_skips_invalid_and_returns_false_when_none_left() {
        let dir = tempfile::tempdir().unwrap();
        let tiny = dir.path().join("tiny.mp3");
        std::fs::write(&tiny, b"xx").unwrap();
        let missing = dir.path().join("missing.mp3");

        let combined = concatenate_mp3(
            "ffmpeg",
            &[tiny, missing],
            &dir.path().join("out.mp3"),
        )
        .await
        .unwrap();
        assert!(!combined);
    }

    #[tokio::test]
    async fn test_concat_real_segments() {
        if !ffmpeg_available() {
            eprintln!("Skipping test: ffmpeg not available");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let mut segments = Vec::new();
        for i in 0..2 {
            let path = dir.path().join(format!("seg_{i}.mp3"));
            let status = Command::new("ffmpeg")
                .args([
                    "-y", "-f", "lavfi", "-i", "anullsrc=r=24000:cl=mono", "-t", "0.2",
                    "-q:a", "9", "-acodec", "libmp3lame",
                ])
                .arg(&path)
                .output()
                .unwrap();
            assert!(status.status.success());
            segments.push(path);
        }

        let output = dir.path().join("combined.mp3");
        let combined = concatenate_mp3("ffmpeg", &segments, &output).await.unwrap();
        assert!(combined);
        assert!(output.metadata().unwrap().len() > MIN_AUDIO_FILE_SIZE);
    }

    #[test]
    fn test_check_ffmpeg_missing_binary() {
        let result = check_ffmpeg("/nonexistent/ffmpeg-binary");
        assert!(result.is_err());
    }
}

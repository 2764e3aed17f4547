//! Script sizing and text splitting shared by the content worker and the
//! TTS subsystem.

use tracing::{debug, warn};

/// Derived sizing for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    pub target_chars: i64,
    pub num_quotes: i64,
    pub num_stories: i64,
}

const MIN_TARGET_CHARS: i64 = 4000;
const MIN_CHARS_FLOOR: i64 = 3000;
const ITEMS_PER_HOUR: f64 = 30.0;
const DEFAULT_DURATION_MINUTES: i64 = 120;

/// Estimate target length and quote/story counts from a duration and the
/// language's characters-per-minute rate.
pub fn estimate_targets(duration_minutes: Option<i64>, cpm: u32) -> SizeEstimate {
    let duration = match duration_minutes {
        Some(d) if d > 0 => d,
        _ => {
            warn!(
                "Invalid target duration, defaulting to {} minutes",
                DEFAULT_DURATION_MINUTES
            );
            DEFAULT_DURATION_MINUTES
        }
    };

    let target_chars = (duration * cpm as i64).max(MIN_TARGET_CHARS);

    let num_items = ((ITEMS_PER_HOUR * duration as f64 / 60.0).round() as i64).max(4);
    let num_quotes = (num_items + 1) / 2;
    let num_stories = num_items - num_quotes;

    debug!(
        "Estimated {} target chars, {} quotes, {} stories for {} min (cpm {})",
        target_chars, num_quotes, num_stories, duration, cpm
    );

    SizeEstimate {
        target_chars,
        num_quotes,
        num_stories,
    }
}

/// Minimum acceptable total script length for a target.
pub fn min_chars(target_chars: i64) -> i64 {
    (target_chars * 9 / 10).max(MIN_CHARS_FLOOR)
}

/// Rough token estimate for output budgeting. CJK scripts run close to one
/// token per character; everything else around four characters per token.
pub fn approx_token_count(text: &str, language: &str) -> usize {
    let chars = text.chars().count();
    if is_cjk_language(language) {
        chars
    } else {
        chars / 4 + 1
    }
}

pub fn is_cjk_language(language: &str) -> bool {
    let lang = language.to_lowercase();
    ["chinese", "japanese", "korean"]
        .iter()
        .any(|k| lang.contains(k))
}

/// Replace every character outside `[A-Za-z0-9_-]` so the script name is a
/// safe directory component.
pub fn sanitize_script_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_sentence_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '…')
}

/// Split text into sentences at terminal punctuation. A plain punctuation
/// splitter; good enough for TTS chunk boundaries across the supported
/// languages.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if is_sentence_terminal(c) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

/// Hard-wrap a single oversized sentence at the last space inside each
/// window, falling back to a plain character cut when no space exists.
fn force_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let window_end = (start + max_chars).min(chars.len());
        let mut end = window_end;

        if window_end < chars.len() {
            if let Some(offset) = chars[start..window_end].iter().rposition(|c| *c == ' ') {
                if offset > 0 {
                    end = start + offset + 1;
                }
            }
        }

        let part: String = chars[start..end].iter().collect();
        let part = part.trim();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        start = end;
    }

    parts
}

/// Split a long script into pieces of at most `max_chars`, preferring
/// paragraph then sentence boundaries.
pub fn split_into_tts_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    debug!(
        "Splitting text ({} chars) at sentence boundaries (max {} chars)",
        text.chars().count(),
        max_chars
    );

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if current.is_empty() && paragraph.chars().count() <= max_chars {
            current = paragraph.to_string();
            continue;
        }

        for sentence in split_sentences(paragraph) {
            let sentence_len = sentence.chars().count();
            if sentence_len < 2 {
                continue;
            }

            if sentence_len > max_chars {
                warn!("Single sentence exceeds {} chars, force splitting", max_chars);
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(force_split(&sentence, max_chars));
            } else if current.chars().count() + sentence_len + 1 <= max_chars {
                if current.is_empty() {
                    current = sentence;
                } else {
                    current.push(' ');
                    current.push_str(&sentence);
                }
            } else {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current = sentence;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_applies_floor() {
        // 3 min English: 2400 raw, floored to the 4000-char minimum.
        let est = estimate_targets(Some(3), 800);
        assert_eq!(est.target_chars, 4000);
        assert_eq!(est.num_quotes + est.num_stories, 4);
        assert_eq!(est.num_quotes, 2);
    }

    #[test]
    fn test_estimate_long_duration() {
        let est = estimate_targets(Some(60), 1500);
        assert_eq!(est.target_chars, 90_000);
        assert_eq!(est.num_quotes, 15);
        assert_eq!(est.num_stories, 15);
    }

    #[test]
    fn test_estimate_invalid_duration_defaults() {
        let est = estimate_targets(None, 800);
        assert_eq!(est.target_chars, 120 * 800);
        let est = estimate_targets(Some(0), 800);
        assert_eq!(est.target_chars, 120 * 800);
    }

    #[test]
    fn test_min_chars() {
        assert_eq!(min_chars(10_000), 9000);
        assert_eq!(min_chars(2000), 3000);
    }

    #[test]
    fn test_sanitize_script_name() {
        assert_eq!(sanitize_script_name("abc-DEF_123"), "abc-DEF_123");
        assert_eq!(sanitize_script_name("a b/c:d"), "a_b_c_d");
        assert_eq!(sanitize_script_name("tiếng việt"), "ti_ng_vi_t");
    }

    #[test]
    fn test_split_sentences_latin_and_cjk() {
        let sentences = split_sentences("One. Two! Three? 四。");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "四。"]);
    }

    #[test]
    fn test_split_into_tts_chunks_respects_limit() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let chunks = split_into_tts_chunks(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30, "chunk too long: {chunk}");
        }
    }

    #[test]
    fn test_split_keeps_short_paragraph_whole() {
        let chunks = split_into_tts_chunks("Short paragraph.", 100);
        assert_eq!(chunks, vec!["Short paragraph."]);
    }

    #[test]
    fn test_force_split_oversized_sentence() {
        let sentence = "word ".repeat(40); // 200 chars, no terminal punctuation
        let chunks = split_into_tts_chunks(&sentence, 50);
        assert!(chunks.len() >= 4);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50);
        }
    }

    #[test]
    fn test_token_estimate() {
        assert!(approx_token_count("hello world, a plain sentence", "English") < 10);
        assert_eq!(approx_token_count("你好世界", "Chinese"), 4);
    }
}

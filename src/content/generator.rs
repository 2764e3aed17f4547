//! LLM operations for the content pipeline: title suggestion, translation,
//! outline generation, per-item script generation and full rewrites.

use crate::content::outline::FlatItem;
use crate::error::{Result, ScriptcastError};
use crate::llm::{ChatModel, ChatRequest};
use crate::store::ItemKind;
use crate::text;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Words aimed at per outline item; converted to a token budget per call.
pub const CHUNK_WORDS: u32 = 300;

const SUGGESTION_COUNT: usize = 5;

/// Source scripts are truncated to roughly this many tokens before being
/// embedded in an outline prompt.
const MAX_SOURCE_TOKENS_FOR_OUTLINE: usize = 30_000;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^```(?:markdown)?\s*|\s*```$").expect("static regex"))
}

fn strip_fences(text: &str) -> String {
    fence_re().replace_all(text, "").trim().to_string()
}

fn clean_title_line(line: &str) -> String {
    line.trim()
        .trim_matches(|c: char| "\"'()[]{}.-* \t".contains(c))
        .to_string()
}

/// Ask for N video title candidates for a seed topic. No persistence.
pub async fn suggest_titles(
    chat: &dyn ChatModel,
    seed: &str,
    language: &str,
    model: &str,
) -> Result<Vec<String>> {
    let user = format!(
        "Suggest {SUGGESTION_COUNT} YouTube video titles for the topic \"{seed}\".\n\
         Requirements: SEO friendly, concise, include main keywords.\n\
         Language: {language}. Output ONLY the titles, one per line."
    );

    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!("You are an expert YouTube title writer working in {language}."),
            user,
            max_tokens: 500,
            temperature: 0.75,
        })
        .await?;

    let titles: Vec<String> = response
        .lines()
        .map(clean_title_line)
        .filter(|t| t.chars().count() > 3)
        .take(SUGGESTION_COUNT)
        .collect();

    if titles.is_empty() {
        return Err(ScriptcastError::Provider(
            "no usable title suggestions returned".to_string(),
        ));
    }
    Ok(titles)
}

/// Translate text, returning only the cleaned translation.
pub async fn translate_text(
    chat: &dyn ChatModel,
    input: &str,
    target_language: &str,
    source_language: Option<&str>,
    model: &str,
) -> Result<String> {
    if input.trim().is_empty() {
        return Ok(String::new());
    }

    let user = match source_language {
        Some(source) => format!(
            "Translate the following text strictly from {source} to {target_language}. \
             Output ONLY the translated text, without any extra explanation, formatting, \
             or quotation marks:\n\n{input}"
        ),
        None => format!(
            "Translate the following text strictly to {target_language}. Output ONLY the \
             translated text, without any extra explanation, formatting, or quotation \
             marks:\n\n{input}"
        ),
    };

    let max_tokens = (input.split_whitespace().count() * 4 + 100) as u32;
    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!(
                "You are a highly precise translation engine. Respond ONLY with the \
                 translation to {target_language}."
            ),
            user,
            max_tokens,
            temperature: 0.1,
        })
        .await?;

    let cleaned = response
        .trim()
        .trim_matches(|c: char| "\"'\u{201c}\u{201d}\u{2018}\u{2019}()[]{}*-\t ".contains(c))
        .to_string();

    if cleaned.chars().count() < 2 && input.chars().count() > 5 {
        warn!("Translation suspiciously short: '{cleaned}'");
    }
    Ok(cleaned)
}

/// One compelling SEO title from a script snippet or topic.
pub async fn seo_title(
    chat: &dyn ChatModel,
    snippet: &str,
    language: &str,
    model: &str,
) -> Result<String> {
    let user = format!(
        "Analyze the following script snippet and generate ONE compelling, SEO-friendly \
         YouTube video title that accurately reflects the main topic and encourages clicks.\n\
         Language for the title: {language}\n\
         Requirements: concise (under 70 characters if possible), include main keywords, \
         evoke curiosity. Output ONLY the title itself.\n\n\
         Script snippet:\n{snippet}"
    );

    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!(
                "You are an SEO expert creating YouTube titles from script content. \
                 Output language is {language}."
            ),
            user,
            max_tokens: 100,
            temperature: 0.7,
        })
        .await?;

    let title = response.trim().replace('"', "");
    if title.chars().count() < 5 {
        return Err(ScriptcastError::Provider(format!(
            "generated SEO title too short: '{title}'"
        )));
    }
    Ok(title)
}

/// Structured Markdown outline for a seed topic.
pub async fn outline_from_topic(
    chat: &dyn ChatModel,
    topic: &str,
    language: &str,
    model: &str,
    num_quotes: i64,
    num_stories: i64,
) -> Result<String> {
    info!("Generating outline for topic '{topic}' ({language})");

    let user = format!(
        "Create a detailed, structured outline for a YouTube video about \"{topic}\" \
         in {language}.\n\n\
         Format requirements:\n\
         - Output MUST be valid Markdown.\n\
         - Use `#` for the introduction and the conclusion.\n\
         - Use `##` for the main body sections.\n\
         - Use `###` for each individual quote or story.\n\
         - Use `####` or list items (`*`, `-`) for supporting details.\n\
         - One entry per line.\n\n\
         Content requirements:\n\
         1. `# Introduction`: a hook that pulls the viewer into the topic, no greetings.\n\
         2. `## Body - Part 1: Quote Analysis` with {num_quotes} quote entries, each with \
         context/author, meaning analysis and the lesson to apply.\n\
         3. `## Body - Part 2: Stories` with {num_stories} story entries, each told in \
         detail with its meaning and lesson.\n\
         4. `# Conclusion`: summary, emphasis, call to action.\n\n\
         IMPORTANT: write the entire outline in {language}. Return ONLY the Markdown."
    );

    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!("You create detailed Markdown outlines in {language}."),
            user,
            max_tokens: 3500,
            temperature: 0.5,
        })
        .await?;

    Ok(strip_fences(&response))
}

/// Derive a Markdown outline summarizing an existing script.
pub async fn outline_from_script(
    chat: &dyn ChatModel,
    source_script: &str,
    language: &str,
    model: &str,
) -> Result<String> {
    let source_tokens = text::approx_token_count(source_script, language);
    let truncated;
    let source = if source_tokens > MAX_SOURCE_TOKENS_FOR_OUTLINE {
        let ratio = MAX_SOURCE_TOKENS_FOR_OUTLINE as f64 / source_tokens as f64 * 0.9;
        let cutoff = (source_script.chars().count() as f64 * ratio) as usize;
        warn!("Source script truncated for outline derivation ({source_tokens} tokens)");
        truncated = format!(
            "{}\n...[SCRIPT TRUNCATED]...",
            source_script.chars().take(cutoff).collect::<String>()
        );
        &truncated
    } else {
        source_script
    };

    let user = format!(
        "Analyze the script below and generate a detailed outline in MARKDOWN format. \
         Capture the main sections (intro, body, conclusion), key points, quotes and \
         stories. Use #, ##, ###, #### for hierarchy and lists (* or -) for details. \
         The outline MUST be in {language}.\n\nSCRIPT:\n{source}\n\n\
         Output ONLY the Markdown outline."
    );

    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!("You are an expert script analyzer creating Markdown outlines in {language}."),
            user,
            max_tokens: 3000,
            temperature: 0.4,
        })
        .await?;

    Ok(strip_fences(&response))
}

/// Rewrite a whole source script following the derived outline, aiming for
/// `target_chars` characters.
pub async fn rewrite_script(
    chat: &dyn ChatModel,
    source_script: &str,
    derived_outline: &str,
    language: &str,
    model: &str,
    target_chars: i64,
) -> Result<String> {
    info!("Rewriting full script ({language}), target ~{target_chars} chars");

    let user = format!(
        "Rewrite the 'Original Script' below into a new, engaging video script, strictly \
         following the 'Guiding Outline'.\n\n\
         Instructions:\n\
         1. Language: the final script MUST be entirely in {language}.\n\
         2. Length: aim for approximately {target_chars} characters in total; adjust \
         detail per section to meet this target.\n\
         3. Style: fresh, natural, conversational, suitable for audio narration.\n\
         4. Content: keep the core ideas, essential quotes and stories, but rephrase and \
         re-express them following the outline's flow.\n\
         5. Output: ONLY the rewritten script text. No meta commentary, no section \
         labels. Start directly with the introduction content.\n\n\
         Guiding Outline:\n--- OUTLINE START ---\n{derived_outline}\n--- OUTLINE END ---\n\n\
         Original Script (reference):\n--- SCRIPT START ---\n{source_script}\n--- SCRIPT END ---"
    );

    // Output token budget proportional to the character target; CJK scripts
    // run near one token per character.
    let ratio = if text::is_cjk_language(language) { 1.3 } else { 0.8 };
    let estimated = (target_chars as f64 * ratio) as u32;
    let max_tokens = estimated.saturating_add(500).clamp(3000, 16_000);

    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!(
                "You are a professional scriptwriter rewriting video content in {language}, \
                 following provided outlines and length targets."
            ),
            user,
            max_tokens,
            temperature: 0.7,
        })
        .await?;

    let rewritten = response.trim().to_string();
    let generated = rewritten.chars().count() as i64;
    if target_chars > 0 && (generated - target_chars).abs() * 10 > target_chars * 3 {
        warn!("Rewritten script length ({generated}) differs >30% from target ({target_chars})");
    }
    Ok(rewritten)
}

const STYLE_INSTRUCTION: &str = "Write naturally and coherently, like spoken narration for \
an audio program. Start directly with the content.";
const NEGATIVE_CONSTRAINT: &str = "IMPORTANT: no lead-in phrases, do not repeat the section \
title, no greetings or closing remarks.";

/// Narration text for one flattened outline item.
pub async fn section_content(
    chat: &dyn ChatModel,
    topic: &str,
    item: &FlatItem,
    parent: &str,
    language: &str,
    model: &str,
) -> Result<String> {
    let subject = &item.content;
    let user = match item.kind {
        ItemKind::Intro => format!(
            "Write the CONTENT of an engaging opening for a video about \"{topic}\". \
             Guidance: \"{subject}\". {STYLE_INSTRUCTION} Language: {language}. \
             {NEGATIVE_CONSTRAINT}"
        ),
        ItemKind::Outro => format!(
            "Write the CONTENT of the conclusion and call to action for a video about \
             \"{topic}\". Guidance: \"{subject}\". {STYLE_INSTRUCTION} Language: {language}. \
             {NEGATIVE_CONSTRAINT}"
        ),
        ItemKind::SectionHeader => format!(
            "Write a SHORT transition (1-2 sentences) introducing the section \
             \"{subject}\" in a video about \"{topic}\". {STYLE_INSTRUCTION} \
             Language: {language}. {NEGATIVE_CONSTRAINT}"
        ),
        ItemKind::Quote | ItemKind::QuoteAdded => format!(
            "Topic: \"{topic}\". Context: \"{parent}\". Quote or idea: \"{subject}\". \
             Analyze it in depth: meaning, connections, lessons to apply. \
             {STYLE_INSTRUCTION} Language: {language}. {NEGATIVE_CONSTRAINT}"
        ),
        ItemKind::Story | ItemKind::StoryAdded => format!(
            "Topic: \"{topic}\". Context: \"{parent}\". Story or example: \"{subject}\". \
             Tell it in detail, analyze its meaning and the lesson it teaches. \
             {STYLE_INSTRUCTION} Language: {language}. {NEGATIVE_CONSTRAINT}"
        ),
        ItemKind::Point | ItemKind::RewriteChunk => format!(
            "Topic: \"{topic}\". Context: \"{parent}\". Point: \"{subject}\" (depth {}). \
             Write detailed content with examples. {STYLE_INSTRUCTION} Language: {language}. \
             {NEGATIVE_CONSTRAINT}",
            item.level
        ),
    };

    let max_tokens = ((CHUNK_WORDS as f64 * 1.6) as u32).max(200);
    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!(
                "You write video narration scripts with a storytelling voice in {language}. \
                 Write only the main content."
            ),
            user,
            max_tokens,
            temperature: 0.7,
        })
        .await?;

    Ok(response.trim().to_string())
}

/// A fresh quote or story appended by the length-enforcement loop, with a
/// de-duplication preamble listing what already exists.
pub async fn added_item(
    chat: &dyn ChatModel,
    topic: &str,
    language: &str,
    model: &str,
    existing_titles: &[String],
    kind: ItemKind,
) -> Result<String> {
    let existing: String = existing_titles
        .iter()
        .map(|t| t.chars().take(70).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n - ");

    let user = match kind {
        ItemKind::QuoteAdded => format!(
            "Topic: {topic}\nQuotes already covered:\n - {existing}\n\
             Create a NEW and DIFFERENT quote related to the topic, with analysis.\n\
             Required parts: 1. The quote. 2. Analysis. 3. Connections. 4. Lesson.\n\
             {STYLE_INSTRUCTION} Language: {language}. {NEGATIVE_CONSTRAINT} \
             Return only the content."
        ),
        ItemKind::StoryAdded => format!(
            "Topic: {topic}\nStories already covered:\n - {existing}\n\
             Create a NEW and DIFFERENT story related to the topic, with its lesson.\n\
             Required parts: 1. The story. 2. The lesson.\n\
             {STYLE_INSTRUCTION} Language: {language}. {NEGATIVE_CONSTRAINT} \
             Return only the content."
        ),
        other => {
            return Err(ScriptcastError::InvalidInput(format!(
                "cannot append item of kind {other}"
            )))
        }
    };

    let max_tokens = ((CHUNK_WORDS as f64 * 1.6) as u32).max(400);
    let response = chat
        .complete(ChatRequest {
            model: model.to_string(),
            system: format!("You write video narration scripts in {language}. Return only the content."),
            user,
            max_tokens,
            temperature: 0.75,
        })
        .await?;

    Ok(response.trim().to_string())
}

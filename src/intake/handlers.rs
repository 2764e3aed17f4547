//! HTTP handlers: form-encoded submissions in, HTML fragments and JSON out.

use crate::intake::actions::{self, EnqueueOutcome, GenerationOptions, TopicLinkReset};
use crate::intake::AppState;
use crate::store::topics::TopicDelete;
use axum::extract::{Path, RawForm, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info};

/// Decoded form body: last value per key plus every repeated pair.
struct Form {
    fields: HashMap<String, String>,
    pairs: Vec<(String, String)>,
}

impl Form {
    fn parse(bytes: &[u8]) -> Self {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(bytes)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut fields = HashMap::new();
        for (k, v) in &pairs {
            fields.insert(k.clone(), v.clone());
        }
        Self { fields, pairs }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str()).filter(|s| !s.trim().is_empty())
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn flash(status: StatusCode, level: &str, message: &str) -> Response {
    (
        status,
        Html(format!(
            "<p class=\"flash flash-{level}\">{}</p>",
            escape_html(message)
        )),
    )
        .into_response()
}

fn options_from(form: &Form, suffix: &str) -> GenerationOptions {
    GenerationOptions {
        priority: actions::parse_priority(form.get(&format!("priority{suffix}")).unwrap_or("medium")),
        model: form
            .get(&format!("model{suffix}"))
            .unwrap_or("gpt-4o")
            .to_string(),
        target_duration: actions::clamp_duration(form.get(&format!("target_duration{suffix}"))),
    }
}

/// `POST /handle_initial_submission` — suggest titles for a seed topic, or
/// enqueue a rewrite directly.
pub async fn handle_initial_submission(
    State(state): State<AppState>,
    RawForm(body): RawForm,
) -> Response {
    let form = Form::parse(&body);

    let task_type = form.get("task_type").unwrap_or("from_topic");
    let Some(language) = form.get("language") else {
        return flash(StatusCode::BAD_REQUEST, "error", "Please choose a language.");
    };
    let options = options_from(&form, "");

    info!(
        "Initial submission: type={task_type}, language={language}, priority={}",
        options.priority
    );

    match task_type {
        "rewrite_script" => {
            let Some(source_script) = form.get("source_script") else {
                return flash(
                    StatusCode::BAD_REQUEST,
                    "error",
                    "Please provide the source script.",
                );
            };

            match actions::enqueue_rewrite(
                &state.store,
                state.chat.as_ref(),
                source_script,
                language,
                &state.config.display_language,
                &options,
            )
            .await
            {
                Ok(id) => flash(
                    StatusCode::OK,
                    "success",
                    &format!("Queued rewrite task {id}."),
                ),
                Err(e) => {
                    error!("Rewrite enqueue failed: {e}");
                    flash(StatusCode::INTERNAL_SERVER_ERROR, "error", "Server error.")
                }
            }
        }
        "from_topic" => {
            let Some(seed_topic) = form.get("seed_topic") else {
                return flash(StatusCode::BAD_REQUEST, "error", "Please enter a seed topic.");
            };

            match actions::suggest(
                state.chat.as_ref(),
                seed_topic,
                language,
                &state.config.display_language,
                &options.model,
            )
            .await
            {
                Ok(suggestions) if suggestions.is_empty() => flash(
                    StatusCode::OK,
                    "info",
                    "The model returned no suggestions.",
                ),
                Ok(suggestions) => {
                    Html(render_suggestions(&suggestions, language, &form)).into_response()
                }
                Err(e) => {
                    error!("Suggestion generation failed: {e}");
                    flash(StatusCode::INTERNAL_SERVER_ERROR, "error", "Server error.")
                }
            }
        }
        _ => flash(StatusCode::BAD_REQUEST, "error", "Invalid task type."),
    }
}

fn render_suggestions(
    suggestions: &[actions::Suggestion],
    language: &str,
    form: &Form,
) -> String {
    let mut html = String::from(
        "<div id=\"suggestions-display\">\
         <form hx-post=\"/submit_selected_for_generation\">\n",
    );

    for suggestion in suggestions {
        let value = format!("{}||{}", suggestion.original, suggestion.translation_vi);
        html.push_str(&format!(
            "  <label><input type=\"checkbox\" name=\"selected_suggestion\" value=\"{}\"> \
             {} <em>({})</em></label><br>\n",
            escape_html(&value),
            escape_html(&suggestion.original),
            escape_html(&suggestion.translation_vi),
        ));
    }

    html.push_str(&format!(
        "  <input type=\"hidden\" name=\"language_for_generation\" value=\"{}\">\n",
        escape_html(language)
    ));
    for (field, suffix) in [
        ("target_duration", "target_duration_submit"),
        ("priority", "priority_submit"),
        ("model", "model_submit"),
    ] {
        if let Some(value) = form.get(field) {
            html.push_str(&format!(
                "  <input type=\"hidden\" name=\"{suffix}\" value=\"{}\">\n",
                escape_html(value)
            ));
        }
    }
    html.push_str("  <button type=\"submit\">Generate selected</button>\n</form></div>");
    html
}

/// `POST /submit_selected_for_generation` — enqueue every selected
/// suggestion, suppressing duplicates.
pub async fn submit_selected_for_generation(
    State(state): State<AppState>,
    RawForm(body): RawForm,
) -> Response {
    let form = Form::parse(&body);

    let Some(language) = form.get("language_for_generation") else {
        return flash(StatusCode::BAD_REQUEST, "error", "Missing language.");
    };
    let selected = form.get_all("selected_suggestion");
    if selected.is_empty() {
        return flash(StatusCode::OK, "warning", "Please select at least one suggestion.");
    }

    let options = options_from(&form, "_submit");
    info!(
        "Submitting {} selected topics (language '{language}', priority {})",
        selected.len(),
        options.priority
    );

    let mut created = 0;
    let mut skipped = 0;
    let mut errors = 0;

    for combined in selected {
        let (original, translation) = match combined.split_once("||") {
            Some((o, t)) => (o.trim(), t.trim()),
            None => (combined.trim(), combined.trim()),
        };
        if original.is_empty() {
            continue;
        }

        match actions::enqueue_from_topic(&state.store, original, translation, language, &options)
            .await
        {
            Ok(EnqueueOutcome::Created(_)) => created += 1,
            Ok(EnqueueOutcome::SkippedDuplicate) => skipped += 1,
            Err(e) => {
                error!("Failed to enqueue '{original}': {e}");
                errors += 1;
            }
        }
    }

    let mut message = String::new();
    let mut level = "info";
    if created > 0 {
        message.push_str(&format!("Queued {created} new generations. "));
        level = "success";
    }
    if skipped > 0 {
        message.push_str(&format!("Skipped {skipped} topics with active generations. "));
    }
    if errors > 0 {
        message.push_str(&format!("Failed on {errors} topics. "));
        level = if created > 0 { "warning" } else { "error" };
    }
    if message.is_empty() {
        message.push_str("Nothing to do.");
    }

    flash(StatusCode::OK, level, message.trim())
}

/// `DELETE /delete_topic/:id` — only unlinked `suggested` topics.
pub async fn delete_topic(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match actions::delete_topic(&state.store, &id).await {
        Ok(TopicDelete::Deleted) => StatusCode::OK.into_response(),
        Ok(TopicDelete::Conflict) => flash(
            StatusCode::CONFLICT,
            "warning",
            "Topic cannot be deleted (already processed?).",
        ),
        Ok(TopicDelete::NotFound) => flash(StatusCode::NOT_FOUND, "error", "Topic not found."),
        Err(e) => {
            error!("Topic delete failed: {e}");
            flash(StatusCode::INTERNAL_SERVER_ERROR, "error", "Server error.")
        }
    }
}

/// `DELETE /delete_generation/:id` — chunks, generation, then the link.
pub async fn delete_generation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match actions::delete_generation(&state.store, &id).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => flash(StatusCode::NOT_FOUND, "error", "Generation not found."),
        Err(e) => {
            error!("Generation delete failed: {e}");
            flash(StatusCode::INTERNAL_SERVER_ERROR, "error", "Server error.")
        }
    }
}

/// `POST /reset_generation/:id` — back to `pending` with chunks dropped.
pub async fn reset_generation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match actions::reset_generation(&state.store, &id).await {
        Ok(true) => flash(StatusCode::OK, "success", &format!("Reset generation {id}.")),
        Ok(false) => flash(StatusCode::NOT_FOUND, "error", "Generation not found."),
        Err(e) => {
            error!("Generation reset failed: {e}");
            flash(StatusCode::INTERNAL_SERVER_ERROR, "error", "Server error.")
        }
    }
}

/// `POST /reset_topic_link/:id` — repair a dangling topic link.
pub async fn reset_topic_link(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match actions::reset_topic_link(&state.store, &id).await {
        Ok(TopicLinkReset::Unlinked) => flash(StatusCode::OK, "success", "Removed broken link."),
        Ok(TopicLinkReset::StillValid) => {
            flash(StatusCode::OK, "warning", "Generation link is still valid.")
        }
        Ok(TopicLinkReset::NoLink) => flash(StatusCode::OK, "info", "Topic has no link."),
        Ok(TopicLinkReset::NotFound) => flash(StatusCode::NOT_FOUND, "error", "Topic not found."),
        Err(e) => {
            error!("Topic link reset failed: {e}");
            flash(StatusCode::INTERNAL_SERVER_ERROR, "error", "Server error.")
        }
    }
}

/// `GET /api/generation_status/:id` — status, error record and timestamp.
pub async fn generation_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.generation(&id).await {
        Ok(Some(generation)) => {
            let error = generation.error().map(|e| {
                json!({
                    "stage": e.stage,
                    "message": e.message,
                    "timestamp": e.timestamp.to_rfc3339(),
                })
            });
            Json(json!({
                "status": generation.status,
                "error": error,
                "updated_at": generation.updated_at.to_rfc3339(),
            }))
            .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Generation not found"})),
        )
            .into_response(),
        Err(e) => {
            error!("Status lookup failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "store unavailable"})),
            )
                .into_response()
        }
    }
}

/// `GET /api/generation/:id/chunks` — ordered chunk listing.
pub async fn generation_chunks(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.chunks_for(&id).await {
        Ok(chunks) => {
            let items: Vec<_> = chunks
                .iter()
                .map(|c| {
                    json!({
                        "section_index": c.section_index,
                        "section_title": c.section_title,
                        "item_type": c.item_type,
                        "level": c.level,
                        "text_content": c.text_content,
                        "audio_ready": c.audio_ready,
                        "audio_error": c.audio_error,
                        "audio_path": c.audio_path,
                    })
                })
                .collect();
            Json(json!({ "chunks": items })).into_response()
        }
        Err(e) => {
            error!("Chunk listing failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "store unavailable"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_multi_value() {
        let body = b"selected_suggestion=a%7C%7CA&selected_suggestion=b%7C%7CB&language_for_generation=English";
        let form = Form::parse(body);
        assert_eq!(form.get_all("selected_suggestion"), vec!["a||A", "b||B"]);
        assert_eq!(form.get("language_for_generation"), Some("English"));
        assert_eq!(form.get("missing"), None);
    }

    #[test]
    fn test_form_blank_is_missing() {
        let form = Form::parse(b"seed_topic=++&language=English");
        assert_eq!(form.get("seed_topic"), None);
        assert_eq!(form.get("language"), Some("English"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c\"'d'"), "a&lt;b&gt;&amp;&quot;c&quot;&#39;d&#39;");
    }
}

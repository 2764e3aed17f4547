//! Store-level tests for the claim contract, conditional status writes,
//! stuck-lock recovery and the chunk upsert semantics.

use chrono::{Duration as ChronoDuration, Utc};
use scriptcast::store::generations::NewGeneration;
use scriptcast::store::{GenerationStatus, ItemKind, Store, TaskType};
use std::time::Duration;
use tempfile::TempDir;

async fn test_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let store = Store::connect(&url).await.expect("store connects");
    (store, dir)
}

async fn enqueue(store: &Store, title: &str, language: &str, priority: i64) -> String {
    let topic = store
        .upsert_topic_by_title(title, language, None, Some(title))
        .await
        .unwrap();
    let generation = store
        .insert_generation(NewGeneration {
            topic_id: topic.id.clone(),
            task_type: TaskType::FromTopic,
            language: language.to_string(),
            title: title.to_string(),
            translated_title: None,
            model: "gpt-4o".to_string(),
            priority,
            target_duration_minutes: Some(3),
            source_script: None,
        })
        .await
        .unwrap();
    store
        .link_generation(&topic.id, &generation.id)
        .await
        .unwrap();
    generation.id
}

// ============================================================================
// Claim contract
// ============================================================================

#[tokio::test]
async fn test_claim_is_exclusive() {
    let (store, _dir) = test_store().await;
    enqueue(&store, "Solo Topic", "English", 2).await;

    let (a, b) = tokio::join!(store.claim_next_content(), store.claim_next_content());
    let a = a.unwrap();
    let b = b.unwrap();

    // Exactly one claimant wins; the loser sees an empty queue.
    assert!(a.is_some() ^ b.is_some());
    let winner = a.or(b).unwrap();
    assert_eq!(winner.status, GenerationStatus::ProcessingLock);
}

#[tokio::test]
async fn test_claim_prefers_high_priority() {
    let (store, _dir) = test_store().await;
    enqueue(&store, "Old Low Priority", "English", 3).await;
    let newer_high = enqueue(&store, "New High Priority", "English", 1).await;

    let claimed = store.claim_next_content().await.unwrap().unwrap();
    assert_eq!(claimed.id, newer_high);
}

#[tokio::test]
async fn test_claim_drains_failures_first() {
    let (store, _dir) = test_store().await;
    enqueue(&store, "Pending Topic", "English", 1).await;
    let failed = enqueue(&store, "Failed Topic", "English", 3).await;
    store
        .force_status_at(&failed, GenerationStatus::ContentFailed, Utc::now())
        .await
        .unwrap();

    let claimed = store.claim_next_content().await.unwrap().unwrap();
    assert_eq!(claimed.id, failed);
}

#[tokio::test]
async fn test_claim_audio_filters_language_and_orders_by_priority() {
    let (store, _dir) = test_store().await;
    let vi = enqueue(&store, "Vietnamese Topic", "Vietnamese", 2).await;
    let en_low = enqueue(&store, "English Low", "English", 1).await;
    let en_high_num = enqueue(&store, "English High Number", "English", 3).await;
    for id in [&vi, &en_low, &en_high_num] {
        store
            .force_status_at(id, GenerationStatus::ContentReady, Utc::now())
            .await
            .unwrap();
    }

    // Primary worker only sees the primary language.
    let candidates = store.audio_candidates("Vietnamese", true, 10).await.unwrap();
    assert_eq!(candidates, vec![vi.clone()]);

    let claimed = store.claim_audio_by_id(&vi).await.unwrap().unwrap();
    assert_eq!(claimed.status, GenerationStatus::AudioProcessingLock);
    // The lock is exclusive: a second claim of the same id is a no-op.
    assert!(store.claim_audio_by_id(&vi).await.unwrap().is_none());
    assert!(store
        .audio_candidates("Vietnamese", true, 10)
        .await
        .unwrap()
        .is_empty());

    // The other worker orders by priority descending (source behavior).
    let candidates = store
        .audio_candidates("Vietnamese", false, 10)
        .await
        .unwrap();
    assert_eq!(candidates, vec![en_high_num, en_low]);
}

#[tokio::test]
async fn test_conditional_update_is_a_noop_on_mismatch() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Guarded Topic", "English", 2).await;

    let moved = store
        .update_status_if(
            &id,
            &[GenerationStatus::ProcessingLock],
            GenerationStatus::ContentGenerating,
        )
        .await
        .unwrap();
    assert!(!moved);

    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.status, GenerationStatus::Pending);
}

#[tokio::test]
async fn test_updated_at_increases_on_transitions() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Timestamped Topic", "English", 2).await;

    let before = store.generation(&id).await.unwrap().unwrap().updated_at;
    tokio::time::sleep(Duration::from_millis(20)).await;

    store.claim_next_content().await.unwrap().unwrap();
    let after_claim = store.generation(&id).await.unwrap().unwrap().updated_at;
    assert!(after_claim > before);

    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .update_status_if(
            &id,
            &[GenerationStatus::ProcessingLock],
            GenerationStatus::ContentGenerating,
        )
        .await
        .unwrap();
    let after_advance = store.generation(&id).await.unwrap().unwrap().updated_at;
    assert!(after_advance > after_claim);
}

// ============================================================================
// Stuck-lock recovery
// ============================================================================

#[tokio::test]
async fn test_stuck_processing_lock_is_reset_to_pending() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Stuck Topic", "English", 2).await;
    store
        .force_status_at(
            &id,
            GenerationStatus::ProcessingLock,
            Utc::now() - ChronoDuration::hours(2),
        )
        .await
        .unwrap();

    let recovered = store
        .reclaim_stuck_content(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(recovered, 1);

    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.status, GenerationStatus::Pending);
    assert!(generation
        .error_message
        .unwrap()
        .contains("reset from stuck"));
}

#[tokio::test]
async fn test_fresh_lock_is_not_reclaimed() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Fresh Lock Topic", "English", 2).await;
    store
        .force_status_at(&id, GenerationStatus::ProcessingLock, Utc::now())
        .await
        .unwrap();

    let recovered = store
        .reclaim_stuck_content(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(recovered, 0);

    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.status, GenerationStatus::ProcessingLock);
}

#[tokio::test]
async fn test_stuck_audio_lock_returns_to_content_ready() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Stuck Audio Topic", "English", 2).await;
    store
        .force_status_at(
            &id,
            GenerationStatus::AudioProcessingLock,
            Utc::now() - ChronoDuration::hours(2),
        )
        .await
        .unwrap();

    store
        .reclaim_stuck_audio(Duration::from_secs(3600))
        .await
        .unwrap();
    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.status, GenerationStatus::ContentReady);
}

// ============================================================================
// Chunk upsert contract
// ============================================================================

#[tokio::test]
async fn test_upsert_preserves_audio_fields_on_conflict() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Chunked Topic", "English", 2).await;

    let chunk = store
        .upsert_chunk(&id, "script-a", 0, "Intro", "first text", 1, ItemKind::Intro)
        .await
        .unwrap();
    assert!(!chunk.audio_ready);
    assert!(chunk.audio_error.is_none());

    store
        .mark_chunk_audio(&chunk.id, Ok("/audio/section_0.mp3"))
        .await
        .unwrap();

    let updated = store
        .upsert_chunk(&id, "script-a", 0, "Intro", "reworded text", 1, ItemKind::Intro)
        .await
        .unwrap();

    assert_eq!(updated.id, chunk.id);
    assert_eq!(updated.text_content, "reworded text");
    assert!(updated.audio_ready, "audio fields must survive a content rerun");
    assert_eq!(updated.audio_path.as_deref(), Some("/audio/section_0.mp3"));
    assert!(updated.audio_error.is_none());
}

#[tokio::test]
async fn test_chunk_indices_are_unique_and_ordered() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Ordered Topic", "English", 2).await;

    for index in [2_i64, 0, 1] {
        store
            .upsert_chunk(
                &id,
                "script-b",
                index,
                &format!("Part {index}"),
                &format!("text {index}"),
                2,
                ItemKind::Point,
            )
            .await
            .unwrap();
    }

    let chunks = store.chunks_for(&id).await.unwrap();
    let indices: Vec<i64> = chunks.iter().map(|c| c.section_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(store.next_section_index(&id).await.unwrap(), 3);
    assert_eq!(store.text_of(&id).await.unwrap(), "text 0\n\ntext 1\n\ntext 2");
}

#[tokio::test]
async fn test_mark_chunk_audio_error_truncates_and_clears_ready() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Error Topic", "English", 2).await;
    let chunk = store
        .upsert_chunk(&id, "script-c", 0, "Part", "text", 2, ItemKind::Point)
        .await
        .unwrap();

    store
        .mark_chunk_audio(&chunk.id, Ok("/audio/ok.mp3"))
        .await
        .unwrap();
    let long_message = "x".repeat(900);
    store
        .mark_chunk_audio(&chunk.id, Err(&long_message))
        .await
        .unwrap();

    let chunk = store.chunk(&chunk.id).await.unwrap().unwrap();
    assert!(!chunk.audio_ready);
    assert_eq!(chunk.audio_error.unwrap().chars().count(), 500);

    let counts = store.audio_counts(&id).await.unwrap();
    assert_eq!((counts.total, counts.ready, counts.errored), (1, 0, 1));
}

// ============================================================================
// Operator actions at the store level
// ============================================================================

#[tokio::test]
async fn test_reset_generation_clears_progress() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Reset Topic", "English", 2).await;

    store.store_outline(&id, "# Outline").await.unwrap();
    store
        .upsert_chunk(&id, "script-d", 0, "Part", "text", 2, ItemKind::Point)
        .await
        .unwrap();
    store
        .force_status_at(&id, GenerationStatus::ContentGenerating, Utc::now())
        .await
        .unwrap();

    let reset = store.reset_generation(&id).await.unwrap();
    assert!(reset.is_some());

    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.status, GenerationStatus::Pending);
    assert!(generation.outline.is_none());
    assert!(generation.final_audio_path.is_none());
    assert!(generation.error_message.is_none());
    assert!(store.chunks_for(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_generation_removes_chunks_and_row() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Delete Topic", "English", 2).await;
    store
        .upsert_chunk(&id, "script-e", 0, "Part", "text", 2, ItemKind::Point)
        .await
        .unwrap();

    let deleted = store.delete_generation(&id).await.unwrap();
    assert!(deleted.is_some());
    assert!(store.generation(&id).await.unwrap().is_none());
    assert!(store.chunks_for(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_estimates_persist_only_once() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Estimated Topic", "English", 2).await;

    store.save_estimates(&id, 4000, 2, 2).await.unwrap();
    store.save_estimates(&id, 9999, 9, 9).await.unwrap();

    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.target_chars, Some(4000));
    assert_eq!(generation.num_quotes, Some(2));
    assert_eq!(generation.num_stories, Some(2));
}

#[tokio::test]
async fn test_complete_audio_requires_audio_generating() {
    let (store, _dir) = test_store().await;
    let id = enqueue(&store, "Complete Topic", "English", 2).await;

    assert!(!store.complete_audio(&id, "/audio/final.mp3").await.unwrap());

    store
        .force_status_at(&id, GenerationStatus::AudioGenerating, Utc::now())
        .await
        .unwrap();
    store
        .mark_failed_if(
            &id,
            &[GenerationStatus::AudioGenerating],
            GenerationStatus::AudioGenerating,
            "audio_chunk",
            "stale error to be cleared",
        )
        .await
        .unwrap();
    assert!(store.complete_audio(&id, "/audio/final.mp3").await.unwrap());

    let generation = store.generation(&id).await.unwrap().unwrap();
    assert_eq!(generation.status, GenerationStatus::Completed);
    assert_eq!(generation.final_audio_path.as_deref(), Some("/audio/final.mp3"));
    assert!(generation.error_message.is_none(), "completion clears the error record");
}

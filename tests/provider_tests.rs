//! Provider client tests against mock HTTP endpoints.

use scriptcast::audio::{OpenAiTts, PollinationsTts, TtsProvider, VoiceSettings};
use scriptcast::llm::{ChatModel, ChatRequest, OpenAiChat};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: "gpt-4o-mini".to_string(),
        system: "You are a test assistant.".to_string(),
        user: "Say hello.".to_string(),
        max_tokens: 50,
        temperature: 0.2,
    }
}

fn chat_success_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [
            {"message": {"role": "assistant", "content": content}}
        ]
    })
}

// ============================================================================
// Chat client
// ============================================================================

#[tokio::test]
async fn test_chat_completion_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success_body("Hello there")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiChat::new("test-key".to_string(), Some(server.uri())).unwrap();
    let response = client.complete(chat_request()).await.unwrap();
    assert_eq!(response, "Hello there");
}

#[tokio::test]
async fn test_chat_retries_on_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success_body("Recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiChat::new("test-key".to_string(), Some(server.uri())).unwrap();
    let response = client.complete(chat_request()).await.unwrap();
    assert_eq!(response, "Recovered");
}

#[tokio::test]
async fn test_chat_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "bad request", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiChat::new("test-key".to_string(), Some(server.uri())).unwrap();
    let result = client.complete(chat_request()).await;
    assert!(result.is_err());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("bad request"), "got: {message}");
}

// ============================================================================
// OpenAI-compatible TTS
// ============================================================================

#[tokio::test]
async fn test_openai_tts_returns_audio_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(header("Authorization", "Bearer tts-key"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 2048]))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiTts::new("tts-key".to_string(), Some(server.uri())).unwrap();
    let voice = VoiceSettings::default();
    let bytes = provider.synthesize("hello world", &voice).await.unwrap();
    assert_eq!(bytes.len(), 2048);
}

#[tokio::test]
async fn test_openai_tts_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let provider = OpenAiTts::new("tts-key".to_string(), Some(server.uri())).unwrap();
    let voice = VoiceSettings::default();
    let result = provider.synthesize("hello", &voice).await;
    assert!(result.unwrap_err().is_transient());
}

// ============================================================================
// Pollinations TTS
// ============================================================================

#[tokio::test]
async fn test_pollinations_returns_audio_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .set_body_bytes(vec![7u8; 4096]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = PollinationsTts::new().unwrap().with_base_url(server.uri());
    let voice = VoiceSettings::default();
    let bytes = provider.synthesize("xin chào thế giới", &voice).await.unwrap();
    assert_eq!(bytes.len(), 4096);
}

#[tokio::test]
async fn test_pollinations_rejects_non_audio_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string("<html>rate limited</html>"),
        )
        .mount(&server)
        .await;

    let provider = PollinationsTts::new().unwrap().with_base_url(server.uri());
    let voice = VoiceSettings::default();
    let result = provider.synthesize("hello", &voice).await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("audio/mpeg"));
}

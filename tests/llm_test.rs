use browserflow::agent::llm::{AnthropicModel, OpenAiCompatibleModel};
use browserflow::agent::{ChatMessage, LanguageModel, LlmError, build_model};
use browserflow::config::{LlmProvider, ProviderConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn conversation() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a browser agent."),
        ChatMessage::user("Plan: open example.com"),
    ]
}

#[tokio::test]
async fn test_openai_compatible_completion() {
    // 1. Mock server speaking the chat completions protocol
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You are a browser agent."},
                {"role": "user", "content": "Plan: open example.com"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "1. Navigate to example.com"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    // 2. Call
    let model = OpenAiCompatibleModel::new("sk-test", "gpt-4o-mini").with_url(&format!("{}/v1", server.uri()));
    let reply = model.generate(&conversation()).await.expect("completion");

    // 3. Verify
    assert_eq!(reply, "1. Navigate to example.com");
    assert_eq!(model.model(), "gpt-4o-mini");
}

#[tokio::test]
async fn test_openai_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let model = OpenAiCompatibleModel::new("sk-test", "gpt-4o-mini").with_url(&server.uri());
    let err = model.generate(&conversation()).await.expect_err("429");
    assert_eq!(
        err,
        LlmError::Api {
            status: 429,
            message: "rate limited".to_string()
        }
    );
}

#[tokio::test]
async fn test_openai_empty_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let model = OpenAiCompatibleModel::new("", "local").with_url(&server.uri());
    let err = model.generate(&conversation()).await.expect_err("no choices");
    assert!(matches!(err, LlmError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_anthropic_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-sonnet-20240229",
            "system": "You are a browser agent.",
            "messages": [{"role": "user", "content": "Plan: open example.com"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "content": [
                {"type": "text", "text": "1. Navigate "},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": "to example.com"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = AnthropicModel::new("ak-test", "claude-3-sonnet-20240229").with_url(&format!("{}/v1", server.uri()));
    let reply = model.generate(&conversation()).await.expect("message");
    assert_eq!(reply, "1. Navigate to example.com");
}

#[tokio::test]
async fn test_build_model_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "local-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .mount(&server)
        .await;

    // 1. Custom endpoint without a key
    let config = ProviderConfig {
        provider: LlmProvider::Custom,
        model: Some("local-model".to_string()),
        endpoint: Some(format!("{}/v1", server.uri())),
        ..ProviderConfig::default()
    };
    let model = build_model(&config).expect("custom model");
    assert_eq!(model.model(), "local-model");
    assert_eq!(model.generate(&conversation()).await.expect("reply"), "ok");

    // 2. Hosted provider without a key
    let config = ProviderConfig {
        provider: LlmProvider::Anthropic,
        ..ProviderConfig::default()
    };
    assert!(matches!(build_model(&config), Err(LlmError::Config(_))));

    // 3. Default model per provider
    let config = ProviderConfig {
        provider: LlmProvider::Gemini,
        api_key: Some("g-key".to_string()),
        ..ProviderConfig::default()
    };
    let model = build_model(&config).expect("gemini model");
    assert_eq!(model.model(), "gemini-pro");
}

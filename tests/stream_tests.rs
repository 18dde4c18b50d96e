//! End-to-end streaming against a local scripted server.

mod common;

use common::{Canned, serve};
use futures::StreamExt;
use polychat::ai::{ChatClient, ChatError, ChatEvent, ChatRequest};
use polychat::config::{AccessConfig, ModelConfig, ServiceProvider};
use polychat::tools::ToolRegistry;
use polychat::types::{RequestMessage, Role};
use std::sync::Arc;
use std::time::Duration;

fn request(provider: ServiceProvider, model: &str, stream: bool) -> ChatRequest {
    ChatRequest {
        messages: vec![RequestMessage::new(Role::User, "hi")],
        config: ModelConfig {
            model: model.to_string(),
            provider_name: provider,
            ..ModelConfig::default()
        },
        stream,
        tools: Vec::new(),
    }
}

fn client_for(provider: ServiceProvider, base_url: &str) -> ChatClient {
    ChatClient::new(
        AccessConfig::default()
            .with_base_url(provider, base_url)
            .with_api_key(provider, "test-key"),
    )
}

async fn collect(client: &ChatClient, request: ChatRequest) -> Vec<ChatEvent> {
    client.chat(request).collect().await
}

fn text_of(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chunked_stream_yields_deltas_then_done() {
    let mut server = serve(vec![Canned::sse(&[
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        "[DONE]",
    ])])
    .await;
    let client = client_for(ServiceProvider::OpenAI, &server.base_url);

    let events = collect(&client, request(ServiceProvider::OpenAI, "gpt-4o-mini", true)).await;
    assert_eq!(text_of(&events), "Hello");
    let Some(ChatEvent::Done(completion)) = events.last() else {
        panic!("expected Done, got {:?}", events.last());
    };
    assert_eq!(completion.content, "Hello");
    assert_eq!(completion.status, Some(200));
    assert!(!completion.aborted);

    let body = server.requests.recv().await.unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn crlf_frames_and_multi_line_data_are_decoded() {
    let body = concat!(
        ": keep-alive\r\n\r\n",
        "data: {\"choices\":[{\"delta\":\r\n",
        "data: {\"content\":\"Hel\"}}]}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\r\n\r\n",
        "data: [DONE]\r\n\r\n",
    );
    let server = serve(vec![Canned {
        content_type: "text/event-stream",
        body: body.to_string(),
    }])
    .await;
    let client = client_for(ServiceProvider::OpenAI, &server.base_url);

    let events = collect(&client, request(ServiceProvider::OpenAI, "gpt-4o-mini", true)).await;
    assert_eq!(text_of(&events), "Hello");
    assert!(matches!(events.last(), Some(ChatEvent::Done(_))));
}

#[tokio::test]
async fn tool_calls_are_executed_and_sent_back() {
    let mut server = serve(vec![
        Canned::sse(&[
            r#"{"choices":[{"delta":{"content":"Let me compute."}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"calculate","arguments":"{\"expression\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"6 * 7\"}"}}]}}]}"#,
            "[DONE]",
        ]),
        Canned::sse(&[r#"{"choices":[{"delta":{"content":"It is 42."}}]}"#, "[DONE]"]),
    ])
    .await;
    let registry = Arc::new(ToolRegistry::with_builtins());
    let client =
        client_for(ServiceProvider::OpenAI, &server.base_url).with_tools(registry.clone());
    let mut req = request(ServiceProvider::OpenAI, "gpt-4o-mini", true);
    req.tools = registry.specs().await.unwrap();

    let events = collect(&client, req).await;
    let finished = events
        .iter()
        .find_map(|event| match event {
            ChatEvent::ToolFinished(tool) => Some(tool.clone()),
            _ => None,
        })
        .expect("tool finished");
    assert_eq!(finished.id, "call_1");
    assert_eq!(finished.content.as_deref(), Some("42"));
    assert!(!finished.is_error);
    assert_eq!(text_of(&events), "Let me compute.It is 42.");
    assert!(matches!(events.last(), Some(ChatEvent::Done(_))));

    let first = server.requests.recv().await.unwrap();
    assert_eq!(first["tools"][0]["function"]["name"], "calculate");
    let second = server.requests.recv().await.unwrap();
    let messages = second["messages"].as_array().unwrap();
    let call = &messages[messages.len() - 2];
    assert_eq!(call["role"], "assistant");
    assert_eq!(call["tool_calls"][0]["id"], "call_1");
    assert_eq!(call["content"], "Let me compute.");
    let result = &messages[messages.len() - 1];
    assert_eq!(result["role"], "tool");
    assert_eq!(result["tool_call_id"], "call_1");
    assert_eq!(result["content"], "42");
}

#[tokio::test]
async fn in_band_errors_fail_the_stream() {
    let server = serve(vec![Canned::sse(&[
        r#"{"choices":[{"delta":{"content":"partial"}}]}"#,
        r#"{"error":{"message":"quota exceeded"}}"#,
    ])])
    .await;
    let client = client_for(ServiceProvider::DeepSeek, &server.base_url);

    let events = collect(&client, request(ServiceProvider::DeepSeek, "deepseek-chat", true)).await;
    match events.last() {
        Some(ChatEvent::Failed(ChatError::Provider(message))) => {
            assert_eq!(message, "quota exceeded")
        }
        other => panic!("expected provider failure, got {other:?}"),
    }
}

#[tokio::test]
async fn event_source_providers_release_the_whole_answer() {
    let mut server = serve(vec![Canned::sse(&[
        r#"{"Choices":[{"Delta":{"Role":"assistant","Content":"你好，"}}]}"#,
        r#"{"Choices":[{"Delta":{"Content":"很高兴见到你。"}}]}"#,
    ])])
    .await;
    let client = client_for(ServiceProvider::Tencent, &server.base_url);

    let completion = client
        .chat(request(ServiceProvider::Tencent, "hunyuan-lite", true))
        .collect_completion()
        .await
        .unwrap();
    assert_eq!(completion.content, "你好，很高兴见到你。");

    let body = server.requests.recv().await.unwrap();
    assert_eq!(body["Model"], "hunyuan-lite");
    assert_eq!(body["Stream"], true);
    assert_eq!(body["Messages"][0]["Role"], "user");
}

#[tokio::test]
async fn non_streaming_requests_return_the_message() {
    let server = serve(vec![Canned::json(
        r#"{"choices":[{"message":{"role":"assistant","content":"Rust Ownership"}}]}"#,
    )])
    .await;
    let client = client_for(ServiceProvider::Moonshot, &server.base_url);

    let text = client
        .complete(request(ServiceProvider::Moonshot, "moonshot-v1-8k", false))
        .await
        .unwrap();
    assert_eq!(text, "Rust Ownership");
}

#[tokio::test]
async fn cancelling_finishes_with_an_aborted_completion() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        // Accept and never answer.
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    let client = client_for(ServiceProvider::OpenAI, &base_url);

    let stream = client.chat(request(ServiceProvider::OpenAI, "gpt-4o-mini", true));
    let token = stream.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let completion = tokio::time::timeout(Duration::from_secs(5), stream.collect_completion())
        .await
        .expect("cancel is honoured promptly")
        .unwrap();
    assert!(completion.aborted);
    assert!(completion.content.is_empty());
}

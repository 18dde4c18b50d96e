//! Session store driven end to end: persistence, replies and summarization.

mod common;

use common::{Canned, serve};
use polychat::ai::ChatClient;
use polychat::chat::{Mask, SessionStore, UserInput};
use polychat::config::{AccessConfig, AppConfig, DEFAULT_TOPIC, ServiceProvider};
use polychat::storage::{JsonFileStorage, SessionStorage};
use polychat::types::Role;
use std::sync::Arc;

fn app() -> AppConfig {
    let mut app = AppConfig::default();
    app.enable_auto_generate_title = false;
    app
}

fn openai_client(base_url: &str) -> ChatClient {
    ChatClient::new(AccessConfig::default().with_base_url(ServiceProvider::OpenAI, base_url))
}

#[tokio::test]
async fn replies_are_streamed_into_the_session_and_saved() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn SessionStorage> = Arc::new(JsonFileStorage::new(dir.path()));
    let server = serve(vec![Canned::sse(&[
        r#"{"choices":[{"delta":{"content":"Hi "}}]}"#,
        r#"{"choices":[{"delta":{"content":"there"}}]}"#,
        "[DONE]",
    ])])
    .await;
    let client = openai_client(&server.base_url);

    let mut store = SessionStore::with_storage(app(), storage.clone()).unwrap();
    let reply = store.on_user_input(UserInput::text("hello"), None).unwrap();
    let session_id = reply.session_id.clone();
    let mut seen = 0;
    let completion = store
        .drive_reply(&client, reply, |_| seen += 1)
        .await
        .unwrap();
    assert_eq!(completion.content, "Hi there");
    assert!(seen >= 3);

    let session = store.session(&session_id).unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].content.text(), "Hi there");
    assert!(!session.messages[1].streaming);
    assert!(session.stat.token_count > 0);

    let reloaded = SessionStore::with_storage(app(), storage).unwrap();
    let saved = reloaded.session(&session_id).expect("session was saved");
    assert_eq!(saved.messages[1].content.text(), "Hi there");
    assert_eq!(saved.messages[0].role, Role::User);
}

#[tokio::test]
async fn failed_replies_mark_the_exchange_as_errors() {
    // Nothing listens on this port once the listener is dropped.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let client = openai_client(&base_url);

    let mut store = SessionStore::new(app());
    let reply = store.on_user_input(UserInput::text("hello"), None).unwrap();
    assert!(store.drive_reply(&client, reply, |_| {}).await.is_err());

    let session = store.current_session();
    assert!(session.messages.iter().all(|m| m.is_error));
    assert!(session.messages[1].content.text().contains("\"error\": true"));
}

#[tokio::test]
async fn long_conversations_are_compressed_into_memory() {
    let server = serve(vec![
        Canned::sse(&[r#"{"choices":[{"delta":{"content":"Sure."}}]}"#, "[DONE]"]),
        Canned::sse(&[
            r#"{"choices":[{"delta":{"content":"User greeted the assistant."}}]}"#,
            "[DONE]",
        ]),
    ])
    .await;
    let client = openai_client(&server.base_url);

    let mut store = SessionStore::new(app());
    {
        let config = &mut store.current_session_mut().mask.model_config;
        config.compress_message_length_threshold = 1;
        config.send_memory = true;
    }
    let reply = store
        .on_user_input(UserInput::text("hello there, remember me"), None)
        .unwrap();
    store.drive_reply(&client, reply, |_| {}).await.unwrap();

    let session = store.current_session();
    assert_eq!(session.memory_prompt, "User greeted the assistant.");
    assert_eq!(session.last_summarize_index, 2);
}

#[tokio::test]
async fn titles_are_generated_on_request() {
    let mut server = serve(vec![Canned::json(
        r#"{"choices":[{"message":{"content":"\"Greeting Exchange.\""}}]}"#,
    )])
    .await;
    let client = openai_client(&server.base_url);

    let mut store = SessionStore::new(app());
    store.new_session(Some(Mask::default()));
    let id = store.current_session().id.clone();
    assert_eq!(store.current_session().topic, DEFAULT_TOPIC);

    let outcome = store.summarize(&id, &client, true).await;
    assert!(outcome.topic_updated);
    assert!(!outcome.memory_updated);
    assert_eq!(store.current_session().topic, "Greeting Exchange");

    let body = server.requests.recv().await.unwrap();
    assert_eq!(body["stream"], false);
    assert_eq!(body["model"], "gpt-4o-mini");
}

#[test]
fn deleting_sessions_removes_their_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn SessionStorage> = Arc::new(JsonFileStorage::new(dir.path()));
    let mut store = SessionStore::with_storage(app(), storage.clone()).unwrap();
    store.new_session(None);
    store.new_session(None);
    assert_eq!(storage.load_all().unwrap().len(), 2);

    store.delete_session(0);
    assert_eq!(storage.load_all().unwrap().len(), 1);
    store.clear_sessions();
    // The replacement session is saved as soon as it exists.
    assert_eq!(storage.load_all().unwrap().len(), 1);
}

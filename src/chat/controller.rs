//! Process-wide registry of in-flight replies so any of them can be stopped.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

static CONTROLLERS: Lazy<Mutex<HashMap<String, CancellationToken>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn controllers() -> MutexGuard<'static, HashMap<String, CancellationToken>> {
    CONTROLLERS.lock().unwrap_or_else(|e| e.into_inner())
}

fn key(session_id: &str, message_id: &str) -> String {
    format!("{session_id},{message_id}")
}

pub fn add(session_id: &str, message_id: &str, token: CancellationToken) {
    controllers().insert(key(session_id, message_id), token);
}

pub fn remove(session_id: &str, message_id: &str) {
    controllers().remove(&key(session_id, message_id));
}

/// Cancel one reply. Returns false if it was not running.
pub fn stop(session_id: &str, message_id: &str) -> bool {
    match controllers().remove(&key(session_id, message_id)) {
        Some(token) => {
            debug!(session = session_id, message = message_id, "stopping reply");
            token.cancel();
            true
        }
        None => false,
    }
}

pub fn stop_all() {
    for (_, token) in controllers().drain() {
        token.cancel();
    }
}

pub fn has_pending() -> bool {
    !controllers().is_empty()
}

pub fn is_running(session_id: &str, message_id: &str) -> bool {
    controllers().contains_key(&key(session_id, message_id))
}

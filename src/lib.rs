//! Multi-provider LLM chat core.
//!
//! [`chat::SessionStore`] keeps conversations and turns user input into a
//! [`ai::ChatRequest`]; [`ai::ChatClient`] streams the reply from whichever
//! provider the session's model config names.
pub mod ai;
pub mod chat;
pub mod config;
pub mod storage;
pub mod tools;
pub mod types;

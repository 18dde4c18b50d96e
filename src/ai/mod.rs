//! Provider access: request building, streaming and the client that drives them.
//!
//! - `client` - [`ChatClient`], the worker loop and [`ChatError`]
//! - `providers` - one [`LlmApi`](providers::LlmApi) adapter per service provider
//! - `stream` - events, SSE decoding, tool-call accumulation and pacing
pub mod client;
pub mod providers;
pub mod stream;

pub use client::{ChatClient, ChatError, ChatResult};
pub use providers::{ChatRequest, LlmApi, create_api};
pub use stream::{ChatCompletion, ChatEvent, ChatStream};

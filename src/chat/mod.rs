//! Conversation state: history assembly, token accounting and sessions.
pub mod capability;
pub mod controller;
pub mod history;
pub mod normalize;
pub mod session;
pub mod token;

pub use session::{ChatStat, Mask, PendingReply, Session, SessionStore, UserInput};

//! Streaming primitives shared by every provider.
//!
//! A chat request runs on a spawned worker that pushes [`ChatEvent`]s through an
//! unbounded channel. The consumer drives a [`ChatStream`] until the terminal
//! `Done` or `Failed` event, and may cancel at any time.

pub mod smoothing;
pub mod tool_calls;

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ai::client::ChatError;
use crate::types::ChatMessageTool;

pub use smoothing::RateLimiter;
pub use tool_calls::{ToolCallAccumulator, ToolCallDelta};

/// Final outcome of a chat that did not fail.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub reasoning: String,
    pub status: Option<u16>,
    /// Stopped by the caller before the provider finished.
    pub aborted: bool,
}

#[derive(Debug)]
pub enum ChatEvent {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCallDelta(ToolCallDelta),
    ToolStarted(ChatMessageTool),
    ToolFinished(ChatMessageTool),
    Done(ChatCompletion),
    Failed(ChatError),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done(_) | ChatEvent::Failed(_))
    }
}

/// Sending half used by workers. Drops everything after the first terminal event.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
    finished: bool,
}

impl EventSink {
    pub fn send(&mut self, event: ChatEvent) {
        if self.finished {
            return;
        }
        self.finished = event.is_terminal();
        let _ = self.tx.send(event);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<ChatEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx,
            finished: false,
        },
        rx,
    )
}

/// A running chat. Yields events in order and ends after the terminal event.
pub struct ChatStream {
    events: mpsc::UnboundedReceiver<ChatEvent>,
    cancel: CancellationToken,
    _worker: Option<JoinHandle<()>>,
    done: bool,
}

impl ChatStream {
    pub fn new(
        events: mpsc::UnboundedReceiver<ChatEvent>,
        cancel: CancellationToken,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            cancel,
            _worker: Some(worker),
            done: false,
        }
    }

    /// A stream that has already finished with `event`.
    pub fn ready(event: ChatEvent) -> Self {
        let (mut sink, events) = channel();
        sink.send(event);
        Self {
            events,
            cancel: CancellationToken::new(),
            _worker: None,
            done: false,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream and return the terminal outcome.
    pub async fn collect_completion(mut self) -> Result<ChatCompletion, ChatError> {
        use futures::StreamExt;
        while let Some(event) = self.next().await {
            match event {
                ChatEvent::Done(completion) => return Ok(completion),
                ChatEvent::Failed(err) => return Err(err),
                _ => {}
            }
        }
        Err(ChatError::EmptyResponse)
    }
}

impl Stream for ChatStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if !self.done {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn sink_emits_a_single_terminal_event() {
        let (mut sink, rx) = channel();
        sink.send(ChatEvent::TextDelta("a".into()));
        sink.send(ChatEvent::Done(ChatCompletion::default()));
        sink.send(ChatEvent::Failed(ChatError::EmptyResponse));
        sink.send(ChatEvent::TextDelta("late".into()));
        drop(sink);

        let worker = tokio::spawn(async {});
        let stream = ChatStream::new(rx, CancellationToken::new(), worker);
        let events: Vec<ChatEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ChatEvent::Done(_)));
    }

    #[tokio::test]
    async fn ready_stream_collects_its_outcome() {
        let stream = ChatStream::ready(ChatEvent::Failed(ChatError::EmptyResponse));
        assert!(matches!(
            stream.collect_completion().await,
            Err(ChatError::EmptyResponse)
        ));
    }
}

use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

pub const DEFAULT_DIVISOR: usize = 60;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Releases buffered text at a steady pace, independent of arrival rate.
///
/// Each tick hands out `max(1, round(len / divisor))` characters.
#[derive(Debug)]
pub struct RateLimiter {
    buffer: String,
    divisor: usize,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_DIVISOR)
    }
}

impl RateLimiter {
    pub fn new(divisor: usize) -> Self {
        Self {
            buffer: String::new(),
            divisor: divisor.max(1),
        }
    }

    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Text to release on this tick, if any is buffered.
    pub fn tick(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let len = self.buffer.chars().count();
        let count = ((len as f64 / self.divisor as f64).round() as usize).max(1);
        let split = self
            .buffer
            .char_indices()
            .nth(count)
            .map(|(pos, _)| pos)
            .unwrap_or(self.buffer.len());
        let rest = self.buffer.split_off(split);
        Some(std::mem::replace(&mut self.buffer, rest))
    }

    /// Everything still buffered, released at once.
    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

/// Timer tick source for [`RateLimiter`].
pub fn frame_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tokio::time::sleep;

/// Sliding-window budget on outgoing RPC requests. At most `max_requests`
/// requests are admitted per `window`; older timestamps fall out of the
/// window as time passes.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    requests: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window,
            max_requests,
            requests: VecDeque::with_capacity(max_requests),
        }
    }

    /// Records a request if the window has room, otherwise declines.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        while let Some(oldest) = self.requests.front() {
            if now.duration_since(*oldest) > self.window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        if self.requests.len() < self.max_requests {
            self.requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest recorded request leaves the window.
    fn next_slot_in(&self) -> Duration {
        match self.requests.front() {
            Some(oldest) => self.window.saturating_sub(oldest.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Waits for a free slot, then records the request.
    pub async fn acquire(&mut self) {
        while !self.try_acquire() {
            sleep(self.next_slot_in().max(Duration::from_millis(1))).await;
        }
    }
}

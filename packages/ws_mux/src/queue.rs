use std::collections::VecDeque;

use crate::request::Request;

/// Requests waiting to be promoted by the drain loop, in send-priority order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<Request>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: Request) {
        self.items.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Move every queued request out, leaving the queue empty.
    pub fn take_snapshot(&mut self) -> Vec<Request> {
        self.items.drain(..).collect()
    }

    /// Put deferred requests back ahead of anything queued since the snapshot.
    pub fn restore(&mut self, deferred: Vec<Request>) {
        if deferred.is_empty() {
            return;
        }
        let newer = std::mem::take(&mut self.items);
        self.items = deferred.into_iter().chain(newer).collect();
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|r| r.tag.as_str())
    }
}

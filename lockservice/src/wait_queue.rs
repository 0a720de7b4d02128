//! Per-resource FIFO wait queues. Volatile and leader-local: only the leader's view of who is
//! waiting matters, since only the leader grants locks (§4.5) and only the leader runs deadlock
//! detection (§4.5 "Detection runs on the leader only").

use std::collections::{HashMap, VecDeque};

use crate::command::LockMode;

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub client_id: String,
    pub desired_mode: LockMode,
    pub enqueued_at: u64,
    /// TTL the caller asked the eventual grant to carry, threaded through so a queued request
    /// granted later still gets the TTL it was originally asked for.
    pub ttl_ms: Option<u64>,
}

#[derive(Default)]
pub struct WaitQueues {
    queues: HashMap<String, VecDeque<LockRequest>>,
    /// A client may wait on at most one resource at a time (§3 Wait queue).
    waiting_on: HashMap<String, String>,
}

impl WaitQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, resource: &str, request: LockRequest) {
        self.waiting_on
            .insert(request.client_id.clone(), resource.to_string());
        self.queues
            .entry(resource.to_string())
            .or_default()
            .push_back(request);
    }

    pub fn queue_len(&self, resource: &str) -> usize {
        self.queues.get(resource).map(VecDeque::len).unwrap_or(0)
    }

    pub fn resource_for(&self, client_id: &str) -> Option<&str> {
        self.waiting_on.get(client_id).map(String::as_str)
    }

    pub fn enqueued_at(&self, client_id: &str) -> Option<u64> {
        let resource = self.resource_for(client_id)?;
        self.queues
            .get(resource)?
            .iter()
            .find(|req| req.client_id == client_id)
            .map(|req| req.enqueued_at)
    }

    pub fn waiters(&self, resource: &str) -> impl Iterator<Item = &LockRequest> {
        self.queues.get(resource).into_iter().flatten()
    }

    pub fn all_resources(&self) -> impl Iterator<Item = &String> {
        self.queues.keys()
    }

    /// Removes a client from whichever queue it's in (used for grants, timeouts, and
    /// `abort_client`). Returns the resource it was removed from, if any.
    pub fn remove_client(&mut self, client_id: &str) -> Option<String> {
        let resource = self.waiting_on.remove(client_id)?;
        if let Some(queue) = self.queues.get_mut(&resource) {
            queue.retain(|req| req.client_id != client_id);
            if queue.is_empty() {
                self.queues.remove(&resource);
            }
        }
        Some(resource)
    }

    /// Pops the head of `resource`'s queue if present, for a greedy FIFO grant attempt.
    pub fn front(&self, resource: &str) -> Option<&LockRequest> {
        self.queues.get(resource).and_then(VecDeque::front)
    }

    pub fn pop_front(&mut self, resource: &str) -> Option<LockRequest> {
        let req = self.queues.get_mut(resource)?.pop_front()?;
        self.waiting_on.remove(&req.client_id);
        if self.queues.get(resource).map_or(false, VecDeque::is_empty) {
            self.queues.remove(resource);
        }
        Some(req)
    }
}

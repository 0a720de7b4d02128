//! In-memory queue state (§3 "Queue state"): per-queue ready FIFO plus a cross-queue in-flight
//! table. `apply` folds one [`WalRecord`] into this state; it's used both for live operations
//! (after the record has already been fsync'd) and for WAL replay on startup, so the two paths can
//! never diverge (§8 "WAL replay: ... yields identical in-memory state").

use std::collections::{HashMap, VecDeque};

use crate::message::{QueueMessage, WalRecord};

#[derive(Debug, Clone)]
pub struct InFlight {
    pub message: QueueMessage,
    pub delivered_at: u64,
    pub visibility_deadline: u64,
}

#[derive(Default)]
pub struct QueueState {
    ready: HashMap<String, VecDeque<QueueMessage>>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, record: &WalRecord) {
        match record {
            WalRecord::Enqueue(msg) => {
                self.ready
                    .entry(msg.queue_name.clone())
                    .or_default()
                    .push_back(msg.clone());
            }
            WalRecord::Dequeue(msg_id) => {
                if let Some(in_flight) = self.remove_in_flight_by_prior_dequeue(msg_id) {
                    self.in_flight.insert(msg_id.clone(), in_flight);
                }
            }
            WalRecord::Ack(msg_id) => {
                self.in_flight.remove(msg_id);
            }
            WalRecord::Redeliver(msg_id) => {
                if let Some(mut in_flight) = self.in_flight.remove(msg_id) {
                    in_flight.message.attempt_count += 1;
                    self.ready
                        .entry(in_flight.message.queue_name.clone())
                        .or_default()
                        .push_front(in_flight.message);
                }
            }
        }
    }

    /// Pops the head of `queue_name`'s ready list and moves it to `in_flight`, as a single
    /// operation (the WAL replay path applies `Dequeue` against whatever was already popped live,
    /// so this helper is only used by live dequeues; replay reconstructs `in_flight` directly from
    /// the `Dequeue` record's referenced message via [`apply`](Self::apply) seeing the prior
    /// `Enqueue` still sitting in `ready`).
    pub fn pop_ready(&mut self, queue_name: &str) -> Option<QueueMessage> {
        let queue = self.ready.get_mut(queue_name)?;
        let message = queue.pop_front();
        if queue.is_empty() {
            self.ready.remove(queue_name);
        }
        message
    }

    fn remove_in_flight_by_prior_dequeue(&mut self, msg_id: &str) -> Option<InFlight> {
        for (queue_name, queue) in self.ready.iter_mut() {
            if let Some(pos) = queue.iter().position(|m| m.msg_id == msg_id) {
                let message = queue.remove(pos)?;
                let _ = queue_name;
                return Some(InFlight {
                    message,
                    delivered_at: 0,
                    visibility_deadline: 0,
                });
            }
        }
        None
    }

    pub fn insert_in_flight(&mut self, msg_id: String, in_flight: InFlight) {
        self.in_flight.insert(msg_id, in_flight);
    }

    pub fn in_flight(&self, msg_id: &str) -> Option<&InFlight> {
        self.in_flight.get(msg_id)
    }

    pub fn remove_in_flight(&mut self, msg_id: &str) -> Option<InFlight> {
        self.in_flight.remove(msg_id)
    }

    pub fn expired_in_flight(&self, now: u64) -> Vec<String> {
        self.in_flight
            .iter()
            .filter(|(_, entry)| entry.visibility_deadline < now)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn requeue_front(&mut self, mut message: QueueMessage) {
        message.attempt_count += 1;
        self.ready
            .entry(message.queue_name.clone())
            .or_default()
            .push_front(message);
    }

    pub fn queue_len(&self, queue_name: &str) -> usize {
        self.ready.get(queue_name).map(VecDeque::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_then_pop_ready_round_trips() {
        let mut state = QueueState::new();
        let msg = QueueMessage {
            msg_id: "n1-1".into(),
            queue_name: "q".into(),
            payload: vec![9],
            enqueued_at: 1,
            attempt_count: 1,
        };
        state.apply(&WalRecord::Enqueue(msg.clone()));
        assert_eq!(state.pop_ready("q"), Some(msg));
        assert_eq!(state.pop_ready("q"), None);
    }

    #[test]
    fn ack_drops_in_flight() {
        let mut state = QueueState::new();
        state.insert_in_flight(
            "n1-1".into(),
            InFlight {
                message: QueueMessage {
                    msg_id: "n1-1".into(),
                    queue_name: "q".into(),
                    payload: vec![],
                    enqueued_at: 1,
                    attempt_count: 1,
                },
                delivered_at: 1,
                visibility_deadline: 100,
            },
        );
        state.apply(&WalRecord::Ack("n1-1".into()));
        assert!(state.in_flight("n1-1").is_none());
    }
}

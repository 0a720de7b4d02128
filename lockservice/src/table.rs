//! The lock table: the Raft state machine proper. Every node's table reaches the same state after
//! applying the same committed command sequence (state-machine safety); everything that depends on
//! what a *particular* client is waiting for (the wait queue, the deadlock detector) lives on the
//! engine instead, since only the leader's view of it matters.

use std::collections::{HashMap, HashSet};

use crate::command::{LockCommand, LockMode};

#[derive(Debug, Clone)]
pub struct LockEntry {
    pub mode: LockMode,
    pub holders: HashSet<String>,
    pub acquired_at: u64,
    /// §3 "Lock entry" `ttl`, in milliseconds; `None` if this lock has no expiry.
    pub ttl_ms: Option<u64>,
}

/// What changed as a result of applying one committed [`LockCommand`], so the engine's post-apply
/// hook (wait-queue draining, deadlock graph update) knows which resources to look at without
/// re-deriving them from the raw command. `vacated` lists every resource that lost its last holder,
/// which may be more than one for `AbortClient`.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub vacated: Vec<String>,
}

#[derive(Default)]
pub struct LockTable {
    locks: HashMap<String, LockEntry>,
    held_by: HashMap<String, HashSet<String>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, resource: &str) -> Option<&LockEntry> {
        self.locks.get(resource)
    }

    /// Resources whose `acquired_at + ttl_ms < now`, paired with their current holders, for the
    /// expiry sweeper (§4.5 `expire`) to propose `Expire` against.
    pub fn expired(&self, now: u64) -> Vec<(String, Vec<String>)> {
        self.locks
            .iter()
            .filter_map(|(resource, entry)| {
                let ttl_ms = entry.ttl_ms?;
                if entry.acquired_at.saturating_add(ttl_ms) < now {
                    Some((resource.clone(), entry.holders.iter().cloned().collect()))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn resources_held_by(&self, client_id: &str) -> Vec<String> {
        self.held_by
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `client_id` already holds `mode` or a mode at least as strong on `resource`
    /// (§4.5 idempotence: EXCLUSIVE is strictly stronger than SHARED).
    pub fn already_satisfies(&self, resource: &str, client_id: &str, mode: LockMode) -> bool {
        match self.locks.get(resource) {
            Some(entry) if entry.holders.contains(client_id) => match (mode, entry.mode) {
                (LockMode::Shared, _) => true,
                (LockMode::Exclusive, LockMode::Exclusive) => true,
                (LockMode::Exclusive, LockMode::Shared) => false,
            },
            _ => false,
        }
    }

    /// Whether an immediate grant of `mode` on `resource` is possible right now, per §4.5's grant
    /// rule: the resource is absent, or the request is SHARED against an existing SHARED holder set.
    pub fn can_grant(&self, resource: &str, mode: LockMode) -> bool {
        match self.locks.get(resource) {
            None => true,
            Some(entry) => mode.compatible_with(entry.mode),
        }
    }

    pub fn apply(&mut self, command: &LockCommand) -> Applied {
        match command {
            LockCommand::Acquire {
                resource,
                client_id,
                mode,
                acquired_at,
                ttl_ms,
            } => {
                let entry = self
                    .locks
                    .entry(resource.clone())
                    .or_insert_with(|| LockEntry {
                        mode: *mode,
                        holders: HashSet::new(),
                        acquired_at: *acquired_at,
                        ttl_ms: *ttl_ms,
                    });
                entry.mode = *mode;
                entry.holders.insert(client_id.clone());
                entry.acquired_at = *acquired_at;
                entry.ttl_ms = *ttl_ms;
                self.held_by
                    .entry(client_id.clone())
                    .or_default()
                    .insert(resource.clone());
                Applied::default()
            }
            LockCommand::Release {
                resource,
                client_id,
            }
            | LockCommand::Expire {
                resource,
                client_id,
            } => {
                let vacated = self.release_one(resource, client_id);
                Applied {
                    vacated: if vacated { vec![resource.clone()] } else { Vec::new() },
                }
            }
            LockCommand::AbortClient { client_id } => {
                let resources = self.resources_held_by(client_id);
                let mut vacated = Vec::new();
                for resource in &resources {
                    if self.release_one(resource, client_id) {
                        vacated.push(resource.clone());
                    }
                }
                Applied { vacated }
            }
        }
    }

    fn release_one(&mut self, resource: &str, client_id: &str) -> bool {
        let vacated = match self.locks.get_mut(resource) {
            Some(entry) => {
                entry.holders.remove(client_id);
                entry.holders.is_empty()
            }
            None => return true,
        };
        if vacated {
            self.locks.remove(resource);
        }
        if let Some(set) = self.held_by.get_mut(client_id) {
            set.remove(resource);
            if set.is_empty() {
                self.held_by.remove(client_id);
            }
        }
        vacated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_acquire_is_idempotent() {
        let mut table = LockTable::new();
        assert!(table.already_satisfies("r", "c1", LockMode::Shared) == false);
        table.apply(&LockCommand::Acquire {
            resource: "r".into(),
            client_id: "c1".into(),
            mode: LockMode::Exclusive,
            acquired_at: 1,
            ttl_ms: None,
        });
        assert!(table.already_satisfies("r", "c1", LockMode::Shared));
        assert!(table.already_satisfies("r", "c1", LockMode::Exclusive));
    }

    #[test]
    fn release_not_held_is_noop() {
        let mut table = LockTable::new();
        let applied = table.apply(&LockCommand::Release {
            resource: "r".into(),
            client_id: "c1".into(),
        });
        assert!(!applied.vacated.is_empty());
        assert!(table.entry("r").is_none());
    }

    #[test]
    fn release_drops_entry_when_last_holder_leaves() {
        let mut table = LockTable::new();
        table.apply(&LockCommand::Acquire {
            resource: "r".into(),
            client_id: "c1".into(),
            mode: LockMode::Shared,
            acquired_at: 1,
            ttl_ms: None,
        });
        table.apply(&LockCommand::Acquire {
            resource: "r".into(),
            client_id: "c2".into(),
            mode: LockMode::Shared,
            acquired_at: 2,
            ttl_ms: None,
        });
        assert!(table
            .apply(&LockCommand::Release {
                resource: "r".into(),
                client_id: "c1".into(),
            })
            .vacated
            .is_empty());
        assert!(!table
            .apply(&LockCommand::Release {
                resource: "r".into(),
                client_id: "c2".into(),
            })
            .vacated
            .is_empty());
        assert!(table.entry("r").is_none());
    }
}

//! Wait-for graph construction and cycle detection (§4.5 "Deadlock detection", §9 "Cyclic
//! wait-for graph" re-architecture note: adjacency list keyed by client id, DFS with a recursion
//! stack set, victim selection by max `enqueued_at`).

use std::collections::{HashMap, HashSet};

use crate::table::LockTable;
use crate::wait_queue::WaitQueues;

/// Builds the wait-for graph: an edge `A -> B` for every client `A` waiting on a resource
/// currently held (at least in part) by client `B`.
pub fn build_graph(table: &LockTable, waiters: &WaitQueues) -> HashMap<String, Vec<String>> {
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for resource in waiters.all_resources() {
        let holders = match table.entry(resource) {
            Some(entry) => &entry.holders,
            None => continue,
        };
        for waiter in waiters.waiters(resource) {
            let edges = graph.entry(waiter.client_id.clone()).or_default();
            for holder in holders {
                if holder != &waiter.client_id {
                    edges.push(holder.clone());
                }
            }
        }
    }
    graph
}

/// Finds one cycle in `graph` via DFS with an explicit recursion stack, or `None` if acyclic.
/// Linear in `|V|+|E|` per §4.5.
pub fn find_cycle(graph: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: Vec<&str> = Vec::new();

    for start in graph.keys() {
        if visited.contains(start.as_str()) {
            continue;
        }
        if let Some(cycle) = dfs(start, graph, &mut visited, &mut on_stack) {
            return Some(cycle.into_iter().map(str::to_string).collect());
        }
    }
    None
}

fn dfs<'a>(
    node: &'a str,
    graph: &'a HashMap<String, Vec<String>>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    if let Some(pos) = on_stack.iter().position(|n| *n == node) {
        return Some(on_stack[pos..].to_vec());
    }
    if visited.contains(node) {
        return None;
    }

    on_stack.push(node);
    if let Some(edges) = graph.get(node) {
        for next in edges {
            if let Some(cycle) = dfs(next.as_str(), graph, visited, on_stack) {
                return Some(cycle);
            }
        }
    }
    on_stack.pop();
    visited.insert(node);
    None
}

/// Selects the youngest (largest `enqueued_at`) participant in `cycle` as the abort victim.
/// Every node in a detected cycle is, by construction, a waiter (it has an outgoing edge), so it
/// always has an `enqueued_at` to compare.
pub fn select_victim(cycle: &[String], waiters: &WaitQueues) -> Option<String> {
    cycle
        .iter()
        .filter_map(|client_id| {
            waiters
                .enqueued_at(client_id)
                .map(|at| (at, client_id.clone()))
        })
        .max_by_key(|(at, _)| *at)
        .map(|(_, client_id)| client_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{LockCommand, LockMode};
    use crate::wait_queue::LockRequest;

    #[test]
    fn detects_two_client_cycle() {
        let mut table = LockTable::new();
        table.apply(&LockCommand::Acquire {
            resource: "a".into(),
            client_id: "c1".into(),
            mode: LockMode::Exclusive,
            acquired_at: 0,
            ttl_ms: None,
        });
        table.apply(&LockCommand::Acquire {
            resource: "b".into(),
            client_id: "c2".into(),
            mode: LockMode::Exclusive,
            acquired_at: 0,
            ttl_ms: None,
        });

        let mut waiters = WaitQueues::new();
        waiters.enqueue(
            "b",
            LockRequest {
                client_id: "c1".into(),
                desired_mode: LockMode::Exclusive,
                enqueued_at: 10,
                ttl_ms: None,
            },
        );
        waiters.enqueue(
            "a",
            LockRequest {
                client_id: "c2".into(),
                desired_mode: LockMode::Exclusive,
                enqueued_at: 20,
                ttl_ms: None,
            },
        );

        let graph = build_graph(&table, &waiters);
        let cycle = find_cycle(&graph).expect("cycle detected");
        let victim = select_victim(&cycle, &waiters).expect("victim found");
        assert_eq!(victim, "c2");
    }

    #[test]
    fn no_cycle_when_acyclic() {
        let mut table = LockTable::new();
        table.apply(&LockCommand::Acquire {
            resource: "a".into(),
            client_id: "c1".into(),
            mode: LockMode::Exclusive,
            acquired_at: 0,
            ttl_ms: None,
        });
        let mut waiters = WaitQueues::new();
        waiters.enqueue(
            "a",
            LockRequest {
                client_id: "c2".into(),
                desired_mode: LockMode::Exclusive,
                enqueued_at: 10,
                ttl_ms: None,
            },
        );
        let graph = build_graph(&table, &waiters);
        assert!(find_cycle(&graph).is_none());
    }
}

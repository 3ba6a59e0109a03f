//! Latest out-of-band facts, one per kind

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use weaver_core::{ContextFact, ContextKind, ContextSnapshot};

/// Concurrent last-write-wins store of context facts.
///
/// Writers never block each other for long and never fail. Every update is
/// stamped with an arrival sequence number; within one kind only the fact
/// with the highest sequence survives, whatever order the writers finish in.
#[derive(Debug, Default)]
pub struct ContextStore {
    facts: DashMap<ContextKind, ContextFact>,
    arrivals: AtomicU64,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a fact. Returns the arrival sequence assigned to it.
    pub fn update(&self, mut fact: ContextFact) -> u64 {
        let seq = self.arrivals.fetch_add(1, Ordering::SeqCst) + 1;
        fact.seq = seq;

        self.facts
            .entry(fact.kind.clone())
            .and_modify(|current| {
                if seq > current.seq {
                    *current = fact.clone();
                }
            })
            .or_insert(fact);

        seq
    }

    /// Copy of every current fact
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot::from_facts(self.facts.iter().map(|entry| entry.value().clone()))
    }

    pub fn get(&self, kind: &ContextKind) -> Option<ContextFact> {
        self.facts.get(kind).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn clear(&self) {
        self.facts.clear();
    }
}

use crate::{
    common::{data::RuleSet, rule::Rule},
    server::matcher::{self, StubRequest},
};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Storage for the rules a stub server answers with.
pub trait RuleStore {
    /// Merges a batch of rules and returns the resulting snapshot. A rule replaces any rule
    /// with the same pattern key but keeps that rule's registration order. All other rules
    /// are left untouched.
    fn apply(&self, batch: Vec<Rule>) -> RuleSet;

    /// Like [`RuleStore::apply`], but starts from the wire representation. Entries that do
    /// not describe a valid rule are logged and skipped.
    fn apply_rule_set(&self, rules: RuleSet) -> RuleSet {
        let batch = rules
            .urls
            .into_iter()
            .filter_map(|(url, definition)| match Rule::from_definition(&url, definition) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    tracing::warn!("skipping rule: {}", err);
                    None
                }
            })
            .collect();

        self.apply(batch)
    }

    fn find(&self, req: &StubRequest) -> Option<Rule>;

    fn snapshot(&self) -> RuleSet;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RegisteredRule {
    rule: Rule,
    sequence: u64,
}

#[derive(Default)]
struct RegistryState {
    rules: HashMap<String, RegisteredRule>,
    by_path: HashMap<String, Vec<String>>,
    next_sequence: u64,
}

impl RegistryState {
    fn rebuild_path_index(&mut self) {
        self.by_path.clear();
        for (key, registered) in &self.rules {
            self.by_path
                .entry(registered.rule.pattern().path().to_string())
                .or_default()
                .push(key.clone());
        }
    }

    fn snapshot(&self) -> RuleSet {
        let mut registered: Vec<(&String, &RegisteredRule)> = self.rules.iter().collect();
        registered.sort_by_key(|(_, r)| r.sequence);

        let mut snapshot = RuleSet::new();
        for (key, r) in registered {
            snapshot.insert(key.clone(), r.rule.to_definition());
        }
        snapshot
    }
}

/// The default [`RuleStore`]: rules keyed by their canonical pattern key, with an index
/// from request path to candidate keys. Merging and matching are serialized by one mutex.
#[derive(Default)]
pub struct RuleRegistry {
    state: Mutex<RegistryState>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RuleStore for RuleRegistry {
    fn apply(&self, batch: Vec<Rule>) -> RuleSet {
        let mut state = self.lock();

        for rule in batch {
            let key = rule.key();

            // A replaced rule keeps the position it was first registered at.
            let sequence = match state.rules.get(&key) {
                Some(existing) => existing.sequence,
                None => {
                    let sequence = state.next_sequence;
                    state.next_sequence += 1;
                    sequence
                }
            };

            tracing::debug!("registering rule {} (sequence {})", key, sequence);
            state.rules.insert(key, RegisteredRule { rule, sequence });
        }

        state.rebuild_path_index();
        state.snapshot()
    }

    fn find(&self, req: &StubRequest) -> Option<Rule> {
        let state = self.lock();

        let keys = state.by_path.get(&req.path)?;
        let candidates = keys
            .iter()
            .filter_map(|key| state.rules.get(key))
            .map(|r| (&r.rule, r.sequence));

        matcher::select(candidates, req).cloned()
    }

    fn snapshot(&self) -> RuleSet {
        self.lock().snapshot()
    }

    fn len(&self) -> usize {
        self.lock().rules.len()
    }
}

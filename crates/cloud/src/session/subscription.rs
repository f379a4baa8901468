// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session subscription sets, one per TPA.
//!
//! All operations run inside the session's serialized event flow; the
//! manager itself is plain data. Permission filtering happens before
//! `update`, so stored sets only ever contain admitted descriptors.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::protocol::epoch_ms;
use crate::protocol::stream::StreamDescriptor;

/// Diagnostic record of one subscription change.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub at_ms: u64,
    pub snapshot: Vec<String>,
    pub action: HistoryAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Add,
    Update,
    Remove,
}

/// Subscription state for every TPA in a session.
pub struct SubscriptionManager {
    subs: HashMap<String, HashSet<StreamDescriptor>>,
    history: HashMap<String, VecDeque<HistoryEntry>>,
    history_limit: usize,
}

impl SubscriptionManager {
    pub fn new(history_limit: usize) -> Self {
        Self { subs: HashMap::new(), history: HashMap::new(), history_limit }
    }

    /// Replace a TPA's subscription set atomically.
    pub fn update(&mut self, package_name: &str, descriptors: HashSet<StreamDescriptor>) {
        let action = match self.subs.get(package_name) {
            Some(prev) if !prev.is_empty() => HistoryAction::Update,
            _ => HistoryAction::Add,
        };
        self.push_history(package_name, &descriptors, action);
        self.subs.insert(package_name.to_owned(), descriptors);
    }

    /// Drop a TPA's subscriptions and history, logging the prior set.
    pub fn remove(&mut self, package_name: &str) {
        if let Some(prev) = self.subs.remove(package_name) {
            self.push_history(package_name, &prev, HistoryAction::Remove);
            tracing::debug!(
                package_name,
                subscriptions = ?prev.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "removed subscriptions"
            );
        }
        self.history.remove(package_name);
    }

    /// Package names whose stored set matches the broadcast descriptor.
    pub fn subscribers_of(&self, broadcast: &StreamDescriptor) -> Vec<String> {
        self.subs
            .iter()
            .filter(|(_, set)| set.iter().any(|stored| stored.matches(broadcast)))
            .map(|(package, _)| package.clone())
            .collect()
    }

    /// The stored set for one package.
    pub fn subscriptions(&self, package_name: &str) -> Option<&HashSet<StreamDescriptor>> {
        self.subs.get(package_name)
    }

    /// Whether any TPA holds a microphone-implying subscription.
    pub fn has_media_subs(&self) -> bool {
        self.subs.values().flatten().any(StreamDescriptor::is_media)
    }

    /// Union of language-parameterized descriptors across all TPAs —
    /// the stream set handed to the transcription engine.
    pub fn minimal_language_subs(&self) -> Vec<StreamDescriptor> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for descriptor in self.subs.values().flatten() {
            if descriptor.is_language_specific() && seen.insert(descriptor.clone()) {
                out.push(descriptor.clone());
            }
        }
        out
    }

    /// Diagnostic history for one package, oldest first.
    pub fn history(&self, package_name: &str) -> Option<&VecDeque<HistoryEntry>> {
        self.history.get(package_name)
    }

    fn push_history(
        &mut self,
        package_name: &str,
        set: &HashSet<StreamDescriptor>,
        action: HistoryAction,
    ) {
        let entries = self.history.entry(package_name.to_owned()).or_default();
        if entries.len() == self.history_limit {
            entries.pop_front();
        }
        let mut snapshot: Vec<String> = set.iter().map(ToString::to_string).collect();
        snapshot.sort();
        entries.push_back(HistoryEntry { at_ms: epoch_ms(), snapshot, action });
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session audio sequencing.
//!
//! Frames arrive tagged with a monotonically increasing sequence
//! number. In-order frames pass straight through; out-of-order frames
//! wait in a bounded pending list for the reordering window, after
//! which the gap is abandoned and playback resumes at the next held
//! frame. A rolling wall-clock ring of recent raw frames is kept for
//! diagnostics.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

struct PendingFrame {
    data: Bytes,
    arrived_ms: u64,
}

/// Sequenced, bounded reordering buffer with a diagnostics ring.
pub struct AudioBuffer {
    pending: BTreeMap<u64, PendingFrame>,
    last_processed_sequence: u64,
    expected_next_sequence: u64,
    pending_limit: usize,
    reorder_window_ms: u64,
    recent: VecDeque<(u64, Bytes)>,
    recent_window_ms: u64,
}

impl AudioBuffer {
    pub fn new(pending_limit: usize, reorder_window_ms: u64, recent_window_ms: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_processed_sequence: 0,
            expected_next_sequence: 0,
            pending_limit,
            reorder_window_ms,
            recent: VecDeque::new(),
            recent_window_ms,
        }
    }

    pub fn last_processed_sequence(&self) -> u64 {
        self.last_processed_sequence
    }

    pub fn expected_next_sequence(&self) -> u64 {
        self.expected_next_sequence
    }

    /// Accept a frame; returns the frames now deliverable in order.
    pub fn push(&mut self, sequence: u64, data: Bytes, now_ms: u64) -> Vec<Bytes> {
        self.record_recent(data.clone(), now_ms);

        // Adopt the first observed sequence as the starting point.
        if self.expected_next_sequence == 0 {
            self.expected_next_sequence = sequence;
        }

        if sequence < self.expected_next_sequence {
            tracing::debug!(sequence, expected = self.expected_next_sequence, "late audio frame dropped");
            return Vec::new();
        }

        if sequence == self.expected_next_sequence {
            let mut ready = vec![data];
            self.advance(sequence);
            self.drain_consecutive(&mut ready);
            return ready;
        }

        // Gap: hold the frame for the reordering window.
        self.pending.insert(sequence, PendingFrame { data, arrived_ms: now_ms });
        if self.pending.len() > self.pending_limit {
            return self.abandon_gap();
        }
        Vec::new()
    }

    /// Release pending frames older than the reordering window,
    /// abandoning the gaps in front of them.
    pub fn flush_stale(&mut self, now_ms: u64) -> Vec<Bytes> {
        let mut ready = Vec::new();
        while let Some((&sequence, frame)) = self.pending.iter().next() {
            if now_ms.saturating_sub(frame.arrived_ms) < self.reorder_window_ms {
                break;
            }
            if let Some(frame) = self.pending.remove(&sequence) {
                ready.push(frame.data);
                self.advance(sequence);
            }
        }
        self.drain_consecutive(&mut ready);
        self.prune_recent(now_ms);
        ready
    }

    /// Recent raw frames inside the diagnostics window, oldest first.
    pub fn recent_frames(&self) -> impl Iterator<Item = &Bytes> {
        self.recent.iter().map(|(_, data)| data)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn advance(&mut self, processed: u64) {
        self.last_processed_sequence = processed;
        self.expected_next_sequence = processed + 1;
    }

    fn drain_consecutive(&mut self, ready: &mut Vec<Bytes>) {
        while let Some(frame) = self.pending.remove(&self.expected_next_sequence) {
            let sequence = self.expected_next_sequence;
            ready.push(frame.data);
            self.advance(sequence);
        }
    }

    /// Pending list overflowed: skip to the earliest held frame.
    fn abandon_gap(&mut self) -> Vec<Bytes> {
        let mut ready = Vec::new();
        if let Some((&sequence, _)) = self.pending.iter().next() {
            if let Some(frame) = self.pending.remove(&sequence) {
                tracing::debug!(
                    from = self.expected_next_sequence,
                    to = sequence,
                    "audio reorder overflow; abandoning gap"
                );
                ready.push(frame.data);
                self.advance(sequence);
                self.drain_consecutive(&mut ready);
            }
        }
        ready
    }

    fn record_recent(&mut self, data: Bytes, now_ms: u64) {
        self.recent.push_back((now_ms, data));
        self.prune_recent(now_ms);
    }

    fn prune_recent(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.recent_window_ms);
        while self.recent.front().is_some_and(|(at, _)| *at < cutoff) {
            self.recent.pop_front();
        }
    }
}

#[cfg(test)]
#[path = "audio_tests.rs"]
mod tests;

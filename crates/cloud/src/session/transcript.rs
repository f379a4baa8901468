// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session transcript history, one time-ordered sequence per
//! language tag. Segments age out after thirty minutes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::epoch_ms;

/// Retention window for transcript segments.
const SEGMENT_TTL_MS: u64 = 30 * 60 * 1000;

/// Language tag the legacy flat accessor aliases.
const LEGACY_LANGUAGE: &str = "en-US";

/// One recognized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub text: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub is_final: bool,
}

/// Map from language tag to its ordered segment history.
#[derive(Default)]
pub struct TranscriptStore {
    segments: HashMap<String, Vec<TranscriptSegment>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment and prune everything older than the retention
    /// window, across all languages.
    pub fn insert(&mut self, language: &str, segment: TranscriptSegment) {
        self.insert_at(language, segment, epoch_ms());
    }

    pub fn insert_at(&mut self, language: &str, segment: TranscriptSegment, now_ms: u64) {
        self.segments.entry(language.to_owned()).or_default().push(segment);

        let cutoff = now_ms.saturating_sub(SEGMENT_TTL_MS);
        for history in self.segments.values_mut() {
            history.retain(|s| s.timestamp_ms >= cutoff);
        }
    }

    /// Segment history for a language, oldest first.
    pub fn segments(&self, language: &str) -> &[TranscriptSegment] {
        self.segments.get(language).map(Vec::as_slice).unwrap_or_default()
    }

    /// Legacy alias for the `en-US` sequence.
    pub fn legacy_segments(&self) -> &[TranscriptSegment] {
        self.segments(LEGACY_LANGUAGE)
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

#[cfg(test)]
#[path = "transcript_tests.rs"]
mod tests;

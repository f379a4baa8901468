// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream descriptor grammar and matching.
//!
//! A descriptor names a kind of event a TPA can subscribe to: a plain
//! type (`transcription`), a language-parameterized form
//! (`transcription:fr-FR`), a translation pair
//! (`translation:es-ES-to-en-US`), or a wildcard (`*` / `all`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerated stream types carried between glasses and TPAs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    AudioChunk,
    Transcription,
    Translation,
    LocationUpdate,
    CalendarEvent,
    HeadPosition,
    ButtonPress,
    PhoneNotification,
    NotificationDismissed,
    Vad,
    OpenDashboard,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioChunk => "audio_chunk",
            Self::Transcription => "transcription",
            Self::Translation => "translation",
            Self::LocationUpdate => "location_update",
            Self::CalendarEvent => "calendar_event",
            Self::HeadPosition => "head_position",
            Self::ButtonPress => "button_press",
            Self::PhoneNotification => "phone_notification",
            Self::NotificationDismissed => "notification_dismissed",
            Self::Vad => "vad",
            Self::OpenDashboard => "open_dashboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "audio_chunk" => Self::AudioChunk,
            "transcription" => Self::Transcription,
            "translation" => Self::Translation,
            "location_update" => Self::LocationUpdate,
            "calendar_event" => Self::CalendarEvent,
            "head_position" => Self::HeadPosition,
            "button_press" => Self::ButtonPress,
            "phone_notification" => Self::PhoneNotification,
            "notification_dismissed" => Self::NotificationDismissed,
            "vad" => Self::Vad,
            "open_dashboard" => Self::OpenDashboard,
            _ => return None,
        })
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed stream descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamDescriptor {
    /// `*` or `all` — matches every broadcast.
    Wildcard,
    /// A bare enumerated type.
    Plain(StreamType),
    /// `<type>:<lang>`, e.g. `transcription:fr-FR`.
    Language(StreamType, String),
    /// `translation:<src>-to-<dst>`, e.g. `translation:es-ES-to-en-US`.
    Translation { source: String, target: String },
}

impl StreamDescriptor {
    /// Parse a raw descriptor string. Returns `None` for anything outside
    /// the grammar, including empty language tags.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == "*" || raw == "all" {
            return Some(Self::Wildcard);
        }

        let Some((base, param)) = raw.split_once(':') else {
            return StreamType::parse(raw).map(Self::Plain);
        };

        let base = StreamType::parse(base)?;
        if param.is_empty() {
            return None;
        }

        if let Some((source, target)) = param.split_once("-to-") {
            if base != StreamType::Translation || source.is_empty() || target.is_empty() {
                return None;
            }
            return Some(Self::Translation {
                source: source.to_owned(),
                target: target.to_owned(),
            });
        }

        // Translation is parameterized by a language pair; a single
        // tag could never match a produced translation stream.
        if base == StreamType::Translation {
            return None;
        }

        Some(Self::Language(base, param.to_owned()))
    }

    /// Parse a subscription entry, normalizing bare `transcription` to
    /// `transcription:en-US`.
    pub fn parse_subscription(raw: &str) -> Option<Self> {
        match Self::parse(raw)? {
            Self::Plain(StreamType::Transcription) => {
                Some(Self::Language(StreamType::Transcription, "en-US".to_owned()))
            }
            other => Some(other),
        }
    }

    /// The underlying stream type, if the descriptor has one.
    pub fn base(&self) -> Option<StreamType> {
        match self {
            Self::Wildcard => None,
            Self::Plain(t) | Self::Language(t, _) => Some(*t),
            Self::Translation { .. } => Some(StreamType::Translation),
        }
    }

    /// Whether this descriptor carries a language parameterization.
    pub fn is_language_specific(&self) -> bool {
        matches!(self, Self::Language(..) | Self::Translation { .. })
    }

    /// Whether a stored subscription matches a broadcast descriptor.
    ///
    /// Rules, in order: exact match; stored wildcard; stored base type
    /// matches a parameterized broadcast of that type; stored
    /// parameterization matches a bare broadcast of its base type.
    pub fn matches(&self, broadcast: &StreamDescriptor) -> bool {
        if self == broadcast {
            return true;
        }
        if matches!(self, Self::Wildcard) {
            return true;
        }
        if broadcast.is_language_specific() {
            if let Self::Plain(t) = self {
                return broadcast.base() == Some(*t);
            }
        }
        if let Self::Plain(t) = broadcast {
            return self.is_language_specific() && self.base() == Some(*t);
        }
        false
    }

    /// Whether this descriptor implies microphone capture: `audio_chunk`,
    /// `transcription`, `translation`, or a language-parameterization of
    /// the latter two.
    pub fn is_media(&self) -> bool {
        matches!(
            self.base(),
            Some(StreamType::AudioChunk | StreamType::Transcription | StreamType::Translation)
        ) && !matches!(self, Self::Language(StreamType::AudioChunk, _))
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*"),
            Self::Plain(t) => f.write_str(t.as_str()),
            Self::Language(t, lang) => write!(f, "{t}:{lang}"),
            Self::Translation { source, target } => {
                write!(f, "translation:{source}-to-{target}")
            }
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;

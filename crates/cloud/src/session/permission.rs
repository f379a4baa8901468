// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static stream → permission mapping and subscription admission.
//!
//! Runs once per `subscription_update`; broadcasts never re-check.

use crate::protocol::stream::{StreamDescriptor, StreamType};
use crate::protocol::PermissionErrorDetail;
use crate::services::Permission;

/// Permission required to receive a descriptor, if any. Parameterized
/// descriptors inherit their base type's mapping.
pub fn required_permission(descriptor: &StreamDescriptor) -> Option<Permission> {
    match descriptor.base()? {
        StreamType::AudioChunk
        | StreamType::Transcription
        | StreamType::Translation
        | StreamType::Vad => Some(Permission::Microphone),
        StreamType::LocationUpdate => Some(Permission::Location),
        StreamType::CalendarEvent => Some(Permission::Calendar),
        StreamType::PhoneNotification | StreamType::NotificationDismissed => {
            Some(Permission::Notifications)
        }
        _ => None,
    }
}

/// Split requested descriptors into admitted and rejected against an
/// app's declared permissions. `ALL` admits everything.
pub fn filter(
    declared: &[Permission],
    requested: Vec<StreamDescriptor>,
) -> (Vec<StreamDescriptor>, Vec<PermissionErrorDetail>) {
    let mut allowed = Vec::new();
    let mut rejected = Vec::new();

    for descriptor in requested {
        match required_permission(&descriptor) {
            Some(required)
                if !declared.contains(&required) && !declared.contains(&Permission::All) =>
            {
                rejected.push(PermissionErrorDetail {
                    stream: descriptor.to_string(),
                    required_permission: format!("{required:?}").to_lowercase(),
                });
            }
            _ => allowed.push(descriptor),
        }
    }

    (allowed, rejected)
}

#[cfg(test)]
#[path = "permission_tests.rs"]
mod tests;

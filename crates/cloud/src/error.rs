// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{CLOSE_AUTH_FAILURE, CLOSE_HEALTH_MONITOR};

/// Error taxonomy for the connection core.
///
/// Only `AuthFailure` and `PeerTimeout` close the offending channel;
/// everything else is reported in-band and leaves the session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudError {
    AuthFailure,
    PermissionDenied,
    InvalidFrame,
    WebhookFailure,
    PeerTimeout,
    Internal,
}

impl CloudError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "AUTH_FAILURE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidFrame => "INVALID_FRAME",
            Self::WebhookFailure => "WEBHOOK_FAILURE",
            Self::PeerTimeout => "PEER_TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Close code to apply, for the variants that terminate the channel.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::AuthFailure => Some(CLOSE_AUTH_FAILURE),
            Self::PeerTimeout => Some(CLOSE_HEALTH_MONITOR),
            _ => None,
        }
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for CloudError {}

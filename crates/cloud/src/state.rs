// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CloudConfig;
use crate::lifecycle::webhook::WebhookClient;
use crate::services::Services;
use crate::session::registry::SessionRegistry;

/// Shared cloud state: the session registry plus everything injected
/// at construction. The registry is the only cross-session structure.
pub struct CloudState {
    pub config: CloudConfig,
    pub services: Services,
    pub registry: SessionRegistry,
    pub webhooks: WebhookClient,
    pub shutdown: CancellationToken,
    /// Tags audio frames; never used to coordinate state.
    audio_sequence: AtomicU64,
}

impl CloudState {
    pub fn new(config: CloudConfig, services: Services, shutdown: CancellationToken) -> Arc<Self> {
        let webhooks = WebhookClient::new(&config);
        Arc::new(Self {
            config,
            services,
            registry: SessionRegistry::new(),
            webhooks,
            shutdown,
            audio_sequence: AtomicU64::new(1),
        })
    }

    /// Next monotonic audio sequence number.
    pub fn next_audio_sequence(&self) -> u64 {
        self.audio_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event sink for standalone deployments: sequences go to the log.
//!
//! Production deployments put a durable bus behind [`EventSink`]; this sink
//! keeps a single-process setup observable without one.

use async_trait::async_trait;
use fm_adapters::{BusError, EventSink};
use fm_core::EventSequence;
use tracing::info;

#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, sequences: &[EventSequence]) -> Result<(), BusError> {
        for sequence in sequences {
            let payload = serde_json::to_string(&sequence.events)
                .map_err(|e| BusError::Publish(e.to_string()))?;
            info!(
                queue = %sequence.queue,
                jobset = %sequence.jobset,
                dedup_id = sequence.dedup_id,
                events = %payload,
                "published"
            );
        }
        Ok(())
    }
}

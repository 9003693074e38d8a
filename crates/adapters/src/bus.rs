// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable event bus contract.
//!
//! The bus itself (ordering per `(queue, jobset)`, durability, consumer
//! offsets) lives elsewhere; the scheduler only needs an at-least-once sink.

use async_trait::async_trait;
use fm_core::EventSequence;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus publish failed: {0}")]
    Publish(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit the sequences in order. An error means nothing may be assumed
    /// delivered; callers retry the whole batch.
    async fn publish(&self, sequences: &[EventSequence]) -> Result<(), BusError>;
}

/// Sink that records published sequences in memory. Standalone deployments
/// and tests read them back; failures can be injected to exercise rollback.
#[derive(Default)]
pub struct InMemorySink {
    published: Mutex<Vec<EventSequence>>,
    fail_publishes: Mutex<u32>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sequence published so far, in publish order.
    pub fn published(&self) -> Vec<EventSequence> {
        self.published.lock().clone()
    }

    /// Drain the record, returning what was published since the last take.
    pub fn take(&self) -> Vec<EventSequence> {
        std::mem::take(&mut *self.published.lock())
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        *self.fail_publishes.lock() = n;
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn publish(&self, sequences: &[EventSequence]) -> Result<(), BusError> {
        {
            let mut remaining = self.fail_publishes.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BusError::Publish("injected publish failure".to_string()));
            }
        }
        self.published.lock().extend_from_slice(sequences);
        Ok(())
    }
}

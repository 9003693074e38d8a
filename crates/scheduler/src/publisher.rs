// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! At-least-once event emission with deduplication markers.
//!
//! The publisher stamps every sequence with a monotone marker, re-checks the
//! leadership fence immediately before handing the batch to the bus, and
//! propagates failure so the cycle driver can roll its transaction back.
//! Partition markers are emitted by a background worker so downstream
//! consumers can detect that this publisher has flushed up to a point.

use crate::leader::LeaderController;
use fm_adapters::{BusError, EventSink};
use fm_core::{Event, EventSequence};
use smol_str::SmolStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("leadership lost before publish")]
    LeadershipLost,

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Collects events into per-`(queue, jobset)` sequences, preserving the
/// order scopes first appear and the order of events within a scope.
#[derive(Debug, Default)]
pub struct SequenceAccumulator {
    sequences: Vec<EventSequence>,
}

impl SequenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, queue: &SmolStr, jobset: &SmolStr, event: Event) {
        let scope = self
            .sequences
            .iter()
            .position(|s| s.queue == *queue && s.jobset == *jobset);
        match scope {
            Some(idx) => self.sequences[idx].push(event),
            None => {
                let mut sequence = EventSequence::new(queue.clone(), jobset.clone());
                sequence.push(event);
                self.sequences.push(sequence);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn into_sequences(self) -> Vec<EventSequence> {
        self.sequences
    }
}

pub struct Publisher {
    sink: Arc<dyn EventSink>,
    next_marker: AtomicU64,
}

impl Publisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, next_marker: AtomicU64::new(1) }
    }

    /// Stamp, fence, and emit. The fence is evaluated after stamping and
    /// immediately before the sink call; a stale fence aborts the publish.
    pub async fn publish(
        &self,
        mut sequences: Vec<EventSequence>,
        fence: impl Fn() -> bool,
    ) -> Result<(), PublishError> {
        if sequences.is_empty() {
            return Ok(());
        }
        for sequence in &mut sequences {
            sequence.dedup_id = Some(self.next_marker.fetch_add(1, Ordering::Relaxed));
        }
        if !fence() {
            return Err(PublishError::LeadershipLost);
        }
        self.sink.publish(&sequences).await?;
        debug!(sequences = sequences.len(), "published event sequences");
        Ok(())
    }

    /// Emit one partition-marker sequence per partition.
    pub async fn emit_partition_markers(
        &self,
        partitions: u32,
        fence: impl Fn() -> bool,
    ) -> Result<(), PublishError> {
        let markers = (0..partitions).map(EventSequence::marker).collect();
        self.publish(markers, fence).await
    }

    /// Background worker: periodically flush partition markers while leader.
    pub async fn run_markers(
        self: Arc<Self>,
        leader: Arc<dyn LeaderController>,
        partitions: u32,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let Some(token) = leader.current_token() else {
                        continue;
                    };
                    if let Err(e) = self
                        .emit_partition_markers(partitions, || leader.is_valid(token))
                        .await
                    {
                        warn!(error = %e, "partition marker flush failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

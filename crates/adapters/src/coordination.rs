// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader-lease coordination contract for the cluster-coordinated mode.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Coordination: Send + Sync {
    /// Try to acquire (or retain, if already held) the leadership lease for
    /// `holder`. Returns whether `holder` owns the lease afterwards.
    async fn try_acquire(&self, holder: &str) -> Result<bool, CoordinationError>;
}

/// Single-process lease: first holder wins until seized or released.
/// Tests use `seize` to simulate asynchronous leadership loss.
#[derive(Default)]
pub struct InMemoryCoordination {
    holder: Mutex<Option<String>>,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forcibly hand the lease to someone else.
    pub fn seize(&self, new_holder: impl Into<String>) {
        *self.holder.lock() = Some(new_holder.into());
    }

    pub fn release(&self) {
        *self.holder.lock() = None;
    }

    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }
}

#[async_trait]
impl Coordination for InMemoryCoordination {
    async fn try_acquire(&self, holder: &str) -> Result<bool, CoordinationError> {
        let mut current = self.holder.lock();
        if current.is_none() {
            *current = Some(holder.to_string());
            return Ok(true);
        }
        Ok(current.as_deref() == Some(holder))
    }
}

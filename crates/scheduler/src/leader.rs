// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fenced-token leadership.
//!
//! A cycle captures a token at its start and must re-check `is_valid`
//! immediately before any effect escapes the process (publishing, commit).
//! Leadership can be lost at any suspension point, so validity is never
//! assumed to persist.

use fm_adapters::Coordination;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Opaque handle for one acquisition of leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderToken(u64);

pub trait LeaderController: Send + Sync {
    /// Token for the current leadership term, if this process leads.
    fn current_token(&self) -> Option<LeaderToken>;

    /// Whether `token` still fences the current term.
    fn is_valid(&self, token: LeaderToken) -> bool;
}

/// Single-process mode: always leader, one sentinel token forever.
pub struct StandaloneLeader {
    token: LeaderToken,
}

impl StandaloneLeader {
    pub fn new() -> Self {
        Self { token: LeaderToken(1) }
    }
}

impl Default for StandaloneLeader {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderController for StandaloneLeader {
    fn current_token(&self) -> Option<LeaderToken> {
        Some(self.token)
    }

    fn is_valid(&self, token: LeaderToken) -> bool {
        token == self.token
    }
}

#[derive(Default)]
struct LeaderState {
    epoch: u64,
    leading: bool,
}

/// Cluster-coordinated mode: a lease is held against an external coordination
/// service and refreshed by [`CoordinatedLeader::run`]. Each acquisition gets
/// a fresh epoch, so tokens from a lost term never validate again.
pub struct CoordinatedLeader {
    holder: String,
    state: Mutex<LeaderState>,
}

impl CoordinatedLeader {
    pub fn new(holder: impl Into<String>) -> Self {
        Self { holder: holder.into(), state: Mutex::new(LeaderState::default()) }
    }

    /// One acquire-or-renew step against the coordination service.
    pub async fn refresh(&self, coordination: &dyn Coordination) {
        let held = match coordination.try_acquire(&self.holder).await {
            Ok(held) => held,
            Err(e) => {
                // Unreachable service counts as lost: we cannot prove the
                // lease is still ours.
                warn!(error = %e, "leader lease refresh failed");
                false
            }
        };

        let mut state = self.state.lock();
        match (state.leading, held) {
            (false, true) => {
                state.epoch += 1;
                state.leading = true;
                info!(epoch = state.epoch, "acquired leadership");
            }
            (true, false) => {
                state.leading = false;
                warn!(epoch = state.epoch, "lost leadership");
            }
            _ => {}
        }
    }

    /// Refresh the lease until shutdown.
    pub async fn run(
        self: Arc<Self>,
        coordination: Arc<dyn Coordination>,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.refresh(coordination.as_ref()).await,
            }
        }
    }
}

impl LeaderController for CoordinatedLeader {
    fn current_token(&self) -> Option<LeaderToken> {
        let state = self.state.lock();
        state.leading.then_some(LeaderToken(state.epoch))
    }

    fn is_valid(&self, token: LeaderToken) -> bool {
        let state = self.state.lock();
        state.leading && token == LeaderToken(state.epoch)
    }
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod tests;

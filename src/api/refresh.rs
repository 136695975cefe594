//! Single-flight token refresh.
//!
//! The first caller that hits a 401 while the gate is idle becomes the
//! leader and performs the refresh. Every caller arriving while the leader
//! is in flight is parked in a FIFO queue and woken with the leader's
//! outcome. The queue only exists inside the `Refreshing` state, so an idle
//! gate can never hold stranded waiters.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::oneshot;

use super::error::SessionEndReason;

/// New access token, or the reason the session ended.
pub(crate) type RefreshOutcome = Result<String, SessionEndReason>;

/// Observable refresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Refreshing,
}

enum GateState {
    Idle,
    Refreshing {
        queue: VecDeque<oneshot::Sender<RefreshOutcome>>,
    },
}

/// Result of entering the gate.
pub(crate) enum Ticket<'a> {
    /// Caller must perform the refresh and resolve the leader.
    Leader(RefreshLeader<'a>),
    /// Caller waits for the leader's outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
}

pub(crate) struct RefreshGate {
    state: Mutex<GateState>,
}

impl RefreshGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    /// Enter the gate. Never suspends; the check and the transition to
    /// `Refreshing` happen under one lock.
    pub(crate) fn enter(&self) -> Ticket<'_> {
        let mut state = self.lock();
        if let GateState::Refreshing { queue } = &mut *state {
            let (tx, rx) = oneshot::channel();
            queue.push_back(tx);
            return Ticket::Follower(rx);
        }
        *state = GateState::Refreshing {
            queue: VecDeque::new(),
        };
        Ticket::Leader(RefreshLeader {
            gate: self,
            resolved: false,
        })
    }

    pub(crate) fn state(&self) -> RefreshState {
        match &*self.lock() {
            GateState::Idle => RefreshState::Idle,
            GateState::Refreshing { .. } => RefreshState::Refreshing,
        }
    }

    /// Number of callers parked behind the current refresh.
    pub(crate) fn queued(&self) -> usize {
        match &*self.lock() {
            GateState::Idle => 0,
            GateState::Refreshing { queue } => queue.len(),
        }
    }

    /// Return to `Idle`, then wake waiters in arrival order.
    fn finish(&self, outcome: RefreshOutcome) -> usize {
        let previous = std::mem::replace(&mut *self.lock(), GateState::Idle);
        let queue = match previous {
            GateState::Refreshing { queue } => queue,
            GateState::Idle => VecDeque::new(),
        };
        let woken = queue.len();
        for waiter in queue {
            // A dropped receiver means that caller gave up; nothing to do.
            let _ = waiter.send(outcome.clone());
        }
        woken
    }

    // Mutations are single statements, so a poisoned lock still holds a
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ═══════════════════════════════════════════════════════════
// RefreshLeader: RAII resolution
// ═══════════════════════════════════════════════════════════

/// Held by the caller performing the refresh. Dropping it unresolved
/// rejects all waiters with [`SessionEndReason::RefreshAbandoned`].
pub(crate) struct RefreshLeader<'a> {
    gate: &'a RefreshGate,
    resolved: bool,
}

impl RefreshLeader<'_> {
    /// Publish the outcome. Returns how many queued callers were woken.
    pub(crate) fn resolve(mut self, outcome: RefreshOutcome) -> usize {
        self.resolved = true;
        self.gate.finish(outcome)
    }
}

impl Drop for RefreshLeader<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            let woken = self.gate.finish(Err(SessionEndReason::RefreshAbandoned));
            tracing::warn!(woken, "Token refresh abandoned before completion");
        }
    }
}

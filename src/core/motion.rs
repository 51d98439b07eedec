//! Idle/moving signaling for a map
//!
//! The map is always in exactly one [`MotionState`]. Waiters ask for "the next time
//! the map is idle" or "the next time the map is moving"; if it already is, they
//! resolve straight away. Every transition bumps a per-state counter, so a waiter
//! registered before a transition observes it even when the state flips back before
//! the waiter gets polled.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::watch;

/// The two motion states of a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotionState {
    #[default]
    Idle,
    Moving,
}

#[derive(Debug, Clone, Copy, Default)]
struct MotionSnapshot {
    state: MotionState,
    /// Number of transitions into `Idle`
    idle_epoch: u64,
    /// Number of transitions into `Moving`
    moving_epoch: u64,
}

impl MotionSnapshot {
    fn epoch(&self, state: MotionState) -> u64 {
        match state {
            MotionState::Idle => self.idle_epoch,
            MotionState::Moving => self.moving_epoch,
        }
    }
}

/// Broadcast of a map's motion state, starting out idle
#[derive(Debug)]
pub struct MotionSignal {
    tx: watch::Sender<MotionSnapshot>,
}

impl MotionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MotionSnapshot::default());
        Self { tx }
    }

    pub fn state(&self) -> MotionState {
        self.tx.borrow().state
    }

    /// Moves to `state`. Returns false if the map was already there.
    pub fn transition(&self, state: MotionState) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state == state {
                return false;
            }
            snapshot.state = state;
            match state {
                MotionState::Idle => snapshot.idle_epoch += 1,
                MotionState::Moving => snapshot.moving_epoch += 1,
            }
            true
        })
    }

    /// Resolves once the map is in `state`, immediately if it already is.
    ///
    /// The starting point is captured when this is called, not when the returned
    /// future is first polled.
    pub fn wait_for(&self, state: MotionState) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        let registered = *rx.borrow_and_update();

        async move {
            if registered.state == state {
                return;
            }
            let since = registered.epoch(state);
            loop {
                let reached = rx.borrow_and_update().epoch(state) > since;
                if reached {
                    return;
                }
                // The sender lives as long as the map; once it is gone nothing will move again
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Default for MotionSignal {
    fn default() -> Self {
        Self::new()
    }
}

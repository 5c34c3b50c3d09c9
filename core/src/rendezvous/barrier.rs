//! Barrier state and per-cycle signalling

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};

/// Why a barrier released its current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Enough users arrived.
    Quorum,
    /// No arrival was observed for the whole quiescence window.
    Timeout,
    /// The coordinator was stopped mid-cycle.
    Cancelled,
}

impl ReleaseReason {
    /// Stable lowercase label used in release logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseReason::Quorum => "quorum",
            ReleaseReason::Timeout => "timeout",
            ReleaseReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal endpoints for one barrier cycle.
///
/// Rebuilt wholesale on reset so a waiter left over from cycle N can never
/// be satisfied by a signal emitted in cycle N+1.
pub(crate) struct CycleSignals {
    /// First arrival of the cycle; wakes the supervisor out of its idle wait.
    pub(crate) activate: Notify,
    /// An arrival counted toward the quorum; coalesced wake for the quiescence timer.
    pub(crate) progress: Notify,
    release_tx: watch::Sender<bool>,
    release_rx: watch::Receiver<bool>,
    pending_tx: watch::Sender<u64>,
    pending_rx: watch::Receiver<u64>,
}

impl CycleSignals {
    fn new(required: u64) -> Self {
        let (release_tx, release_rx) = watch::channel(false);
        let (pending_tx, pending_rx) = watch::channel(required);
        Self {
            activate: Notify::new(),
            progress: Notify::new(),
            release_tx,
            release_rx,
            pending_tx,
            pending_rx,
        }
    }

    /// Countdown of arrivals still needed to reach the quorum.
    pub(crate) fn pending(&self) -> watch::Receiver<u64> {
        self.pending_rx.clone()
    }

    fn release(&self) -> watch::Receiver<bool> {
        self.release_rx.clone()
    }
}

struct CycleState {
    arrived: u64,
    activated: bool,
    released: Option<ReleaseReason>,
    signals: Arc<CycleSignals>,
}

/// One rendezvous point within a scenario.
///
/// The barrier's quota configuration is fixed at plan time; the runtime
/// state resets between cycles while the instance identity stays the same,
/// so routes resolved by name remain valid for the whole test.
pub struct Barrier {
    name: String,
    required: u64,
    fraction: f32,
    quiescence: Duration,
    state: Mutex<CycleState>,
}

impl Barrier {
    pub(crate) fn new(name: &str, required: u64, fraction: f32, quiescence: Duration) -> Self {
        Self {
            name: name.to_string(),
            required,
            fraction,
            quiescence,
            state: Mutex::new(CycleState {
                arrived: 0,
                activated: false,
                released: None,
                signals: Arc::new(CycleSignals::new(required)),
            }),
        }
    }

    /// Barrier name, unique within its group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute number of arrivals that satisfies the quorum.
    pub fn required(&self) -> u64 {
        self.required
    }

    /// Required fraction of the planned user population.
    pub fn fraction(&self) -> f32 {
        self.fraction
    }

    /// Quiescence window restarted by every arrival counted toward the quorum.
    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    /// Arrivals recorded in the current cycle.
    pub fn arrived(&self) -> u64 {
        self.lock_state().arrived
    }

    /// Release reason for the current cycle, if it has released.
    pub fn released(&self) -> Option<ReleaseReason> {
        self.lock_state().released
    }

    /// Arrive at this barrier and wait for the current cycle to release.
    ///
    /// Returns immediately when the cycle has already released. Called once
    /// per virtual user per cycle, in scenario order.
    pub async fn arrive(&self) {
        let mut release = {
            let mut state = self.lock_state();
            state.arrived += 1;
            if !state.activated {
                state.activated = true;
                state.signals.activate.notify_one();
            }
            // Arrivals beyond the quorum (or after release) neither drain the
            // countdown nor restart the quiescence timer.
            if state.released.is_none() && state.arrived <= self.required {
                state
                    .signals
                    .pending_tx
                    .send_modify(|left| *left = left.saturating_sub(1));
                state.signals.progress.notify_one();
            }
            state.signals.release()
        };

        // A dropped sender means the cycle was reset, which only happens once
        // it released; either way the user proceeds.
        let _ = release.wait_for(|released| *released).await;
    }

    /// Commit a release for the current cycle.
    ///
    /// The first caller wins and wakes every current and future arriver of
    /// the cycle; racing callers observe `false` and treat the loss as a
    /// no-op.
    pub(crate) fn try_release(&self, reason: ReleaseReason) -> bool {
        let mut state = self.lock_state();
        if state.released.is_some() {
            return false;
        }
        state.released = Some(reason);
        state.signals.release_tx.send_replace(true);
        tracing::info!(
            name = %self.name,
            number = self.required,
            percent = self.fraction,
            timeout_ms = self.quiescence.as_millis() as u64,
            arrived = state.arrived,
            reason = %reason,
            "rendezvous released"
        );
        true
    }

    /// Start a fresh cycle: zeroed counters and a brand-new signal set with
    /// the pending countdown preloaded to the required count.
    pub(crate) fn reset(&self) {
        let mut state = self.lock_state();
        state.arrived = 0;
        state.activated = false;
        state.released = None;
        state.signals = Arc::new(CycleSignals::new(self.required));
    }

    /// Signal set of the current cycle.
    pub(crate) fn signals(&self) -> Arc<CycleSignals> {
        Arc::clone(&self.lock_state().signals)
    }

    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Barrier")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("fraction", &self.fraction)
            .field("quiescence", &self.quiescence)
            .field("arrived", &state.arrived)
            .field("released", &state.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn barrier(required: u64) -> Barrier {
        Barrier::new("gate", required, 1.0, Duration::from_millis(5000))
    }

    #[test]
    fn test_release_first_caller_wins() {
        let b = barrier(2);
        assert!(b.try_release(ReleaseReason::Quorum));
        assert!(!b.try_release(ReleaseReason::Timeout));
        assert_eq!(b.released(), Some(ReleaseReason::Quorum));
    }

    #[test]
    fn test_reset_clears_cycle_state() {
        let b = barrier(2);
        b.try_release(ReleaseReason::Timeout);
        b.reset();

        assert_eq!(b.released(), None);
        assert_eq!(b.arrived(), 0);
        assert_eq!(*b.signals().pending().borrow(), 2);
    }

    #[tokio::test]
    async fn test_arrive_after_release_returns_immediately() {
        let b = barrier(2);
        b.try_release(ReleaseReason::Timeout);

        b.arrive().await;
        assert_eq!(b.arrived(), 1);
    }

    #[tokio::test]
    async fn test_pending_countdown_stops_at_zero() {
        let b = Arc::new(barrier(1));

        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.arrive().await })
        };
        let pending = b.signals().pending();
        pending
            .clone()
            .wait_for(|left| *left == 0)
            .await
            .expect("countdown sender dropped");

        b.try_release(ReleaseReason::Quorum);
        waiter.await.unwrap();

        // Extra arrivals pass through and leave the countdown untouched.
        b.arrive().await;
        b.arrive().await;
        assert_eq!(*pending.borrow(), 0);
        assert_eq!(b.arrived(), 3);
    }

    #[tokio::test]
    async fn test_stale_waiter_cannot_cross_cycles() {
        let b = Arc::new(barrier(2));
        b.try_release(ReleaseReason::Quorum);
        b.reset();

        // The new cycle gates arrivals even though the old one released.
        let blocked = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.arrive().await })
        };
        assert!(
            timeout(Duration::from_millis(50), blocked).await.is_err(),
            "arrival passed through a reset barrier"
        );

        b.try_release(ReleaseReason::Cancelled);
    }
}

//! User population lifecycle tracking

use std::fmt;

use tokio::sync::watch;

/// Snapshot of the user population lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulationState {
    /// Users the runner has spawned so far.
    pub spawned: u64,
    /// Users that finished the scenario or were torn down.
    pub finished: u64,
    /// True once every planned user has been spawned.
    pub spawn_complete: bool,
}

impl PopulationState {
    /// Users still executing the scenario.
    pub fn active(&self) -> u64 {
        self.spawned.saturating_sub(self.finished)
    }
}

/// Tracks runner-supplied spawn/finish hints for a planned user total.
///
/// Arrival counts stay authoritative for the quorum; this tracker only lets
/// a supervisor conclude that no further arrivals can come and release a
/// cycle without waiting out the quiescence window.
pub struct Population {
    total: u64,
    state_tx: watch::Sender<PopulationState>,
}

impl Population {
    pub(crate) fn new(total: u64) -> Self {
        let (state_tx, _) = watch::channel(PopulationState::default());
        Self { total, state_tx }
    }

    /// Record one spawned user.
    pub(crate) fn user_spawned(&self) {
        let total = self.total;
        self.state_tx.send_modify(|state| {
            state.spawned += 1;
            if state.spawned >= total {
                state.spawn_complete = true;
            }
        });
    }

    /// Record one finished user.
    pub(crate) fn user_finished(&self) {
        self.state_tx.send_modify(|state| state.finished += 1);
    }

    /// Current lifecycle snapshot.
    pub fn snapshot(&self) -> PopulationState {
        *self.state_tx.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<PopulationState> {
        self.state_tx.subscribe()
    }

    /// True when the whole population has spawned and every user still
    /// active has already arrived, so the cycle can see no further arrivals.
    pub(crate) fn fully_arrived(&self, arrived: u64) -> bool {
        let state = self.snapshot();
        state.spawn_complete && arrived >= state.active()
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("total", &self.total)
            .field("state", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_complete_latches_at_total() {
        let population = Population::new(3);
        population.user_spawned();
        population.user_spawned();
        assert!(!population.snapshot().spawn_complete);

        population.user_spawned();
        assert!(population.snapshot().spawn_complete);
    }

    #[test]
    fn test_fully_arrived_requires_spawn_complete() {
        let population = Population::new(2);
        population.user_spawned();
        assert!(!population.fully_arrived(1));

        population.user_spawned();
        assert!(population.fully_arrived(2));
        assert!(!population.fully_arrived(1));
    }

    #[test]
    fn test_finished_users_shrink_the_active_set() {
        let population = Population::new(5);
        for _ in 0..5 {
            population.user_spawned();
        }
        population.user_finished();
        population.user_finished();

        assert_eq!(population.snapshot().active(), 3);
        assert!(population.fully_arrived(3));
    }
}

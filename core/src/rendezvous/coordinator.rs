//! Coordinator lifecycle and barrier supervisors

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Rendezvous;
use crate::error::Result;

use super::barrier::{Barrier, CycleSignals, ReleaseReason};
use super::group::BarrierGroup;
use super::population::Population;

/// Coordinates a scenario's rendezvous barriers across a user population.
///
/// Owns one supervisor task per barrier. Virtual users call
/// [`Coordinator::arrive`] at each rendezvous step; supervisors decide when
/// each barrier releases and drive the group-wide reset once the terminal
/// barrier has released.
pub struct Coordinator {
    group: Arc<BarrierGroup>,
    population: Arc<Population>,
    shutdown_tx: broadcast::Sender<()>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    fn new(group: BarrierGroup, total_users: u64) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            group: Arc::new(group),
            population: Arc::new(Population::new(total_users)),
            shutdown_tx,
            supervisors: Mutex::new(Vec::new()),
        }
    }

    /// Launch one supervisor task per barrier.
    ///
    /// Calling `start` again on a running coordinator is a no-op, as is
    /// starting a coordinator for a scenario without rendezvous points.
    pub fn start(&self) {
        let mut supervisors = self
            .supervisors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !supervisors.is_empty() || self.group.is_empty() {
            return;
        }

        let last = self.group.len() - 1;
        for (idx, barrier) in self.group.barriers().iter().enumerate() {
            supervisors.push(tokio::spawn(supervise(
                Arc::clone(barrier),
                Arc::clone(&self.group),
                Arc::clone(&self.population),
                idx == last,
                self.shutdown_tx.subscribe(),
            )));
        }
        tracing::debug!(barriers = self.group.len(), "rendezvous coordinator started");
    }

    /// Signal cancellation and wait for all supervisors to exit.
    ///
    /// Users still blocked in [`Coordinator::arrive`] are released with
    /// reason `cancelled`; no group reset is performed for a cancelled
    /// cycle.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = {
            let mut supervisors = self
                .supervisors
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            supervisors.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "rendezvous supervisor task panicked");
            }
        }
        // A supervisor parked on the cycle wait exits without touching its
        // barrier; cover whatever is still unreleased.
        for barrier in self.group.barriers() {
            barrier.try_release(ReleaseReason::Cancelled);
        }
        tracing::debug!("rendezvous coordinator stopped");
    }

    /// Arrive at the named rendezvous point and wait for its release.
    ///
    /// Unknown names are logged and ignored; the caller is never blocked on
    /// a barrier that is not part of the group.
    pub async fn arrive(&self, name: &str) {
        match self.group.get(name) {
            Some(barrier) => barrier.arrive().await,
            None => {
                tracing::warn!(name, "arrival at undeclared rendezvous point ignored");
            }
        }
    }

    /// Record that the runner spawned one more virtual user.
    pub fn on_user_spawned(&self) {
        self.population.user_spawned();
    }

    /// Record that a virtual user finished the scenario or was torn down.
    pub fn on_user_finished(&self) {
        self.population.user_finished();
    }

    /// The barrier group driven by this coordinator.
    pub fn group(&self) -> &BarrierGroup {
        &self.group
    }

    /// The population tracker fed by the runner lifecycle hooks.
    pub fn population(&self) -> &Population {
        &self.population
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("group", &self.group)
            .field("population", &self.population)
            .finish()
    }
}

/// Builder for creating a [`Coordinator`] from plan declarations.
///
/// # Example
///
/// ```ignore
/// let coordinator = CoordinatorBuilder::new()
///     .total_users(10)
///     .declaration(Rendezvous::new("checkout").with_user_number(5))
///     .build()?;
///
/// coordinator.start();
/// ```
pub struct CoordinatorBuilder {
    declarations: Vec<Rendezvous>,
    total_users: u64,
}

impl CoordinatorBuilder {
    /// Create a builder with no declarations and an unset user total.
    pub fn new() -> Self {
        Self {
            declarations: Vec::new(),
            total_users: 0,
        }
    }

    /// Set the planned number of concurrent virtual users.
    pub fn total_users(mut self, total: u64) -> Self {
        self.total_users = total;
        self
    }

    /// Replace the rendezvous declarations (in scenario order).
    pub fn declarations(mut self, decls: Vec<Rendezvous>) -> Self {
        self.declarations = decls;
        self
    }

    /// Append one rendezvous declaration.
    pub fn declaration(mut self, decl: Rendezvous) -> Self {
        self.declarations.push(decl);
        self
    }

    /// Normalize the declarations and build the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::InvalidConfig`] when the user total is
    /// below one. Malformed declarations are repaired, not rejected.
    pub fn build(self) -> Result<Coordinator> {
        let group = BarrierGroup::plan(&self.declarations, self.total_users)?;
        Ok(Coordinator::new(group, self.total_users))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one barrier through activate -> release cycles until shutdown.
async fn supervise(
    barrier: Arc<Barrier>,
    group: Arc<BarrierGroup>,
    population: Arc<Population>,
    is_last: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(name = %barrier.name(), "rendezvous supervisor started");
    loop {
        let signals = barrier.signals();
        let cycle = group.cycle();

        tokio::select! {
            _ = shutdown.recv() => {
                barrier.try_release(ReleaseReason::Cancelled);
                break;
            }
            _ = signals.activate.notified() => {}
        }

        let reason = run_cycle(&barrier, &signals, &population, &mut shutdown).await;
        barrier.try_release(reason);
        if reason == ReleaseReason::Cancelled {
            break;
        }

        if is_last {
            // Only the terminal supervisor resets, so a cohort member slow at
            // a later barrier can never lap a freshly reset earlier one.
            group.reset_cycle();
        } else {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = group.cycle_after(cycle) => {}
            }
        }
    }
    tracing::debug!(name = %barrier.name(), "rendezvous supervisor finished");
}

/// Watch one activated cycle until a release condition commits.
async fn run_cycle(
    barrier: &Barrier,
    signals: &CycleSignals,
    population: &Population,
    shutdown: &mut broadcast::Receiver<()>,
) -> ReleaseReason {
    let quiescence = barrier.quiescence();
    let timer = tokio::time::sleep(quiescence);
    tokio::pin!(timer);
    let mut pending = signals.pending();
    let mut population_rx = population.subscribe();

    loop {
        // No further arrivals can come once the whole population is spawned
        // and every still-active user is already here.
        if population.fully_arrived(barrier.arrived()) {
            return ReleaseReason::Quorum;
        }

        tokio::select! {
            biased;

            _ = shutdown.recv() => return ReleaseReason::Cancelled,

            _ = pending.wait_for(|left| *left == 0) => return ReleaseReason::Quorum,

            _ = signals.progress.notified() => {
                timer.as_mut().reset(Instant::now() + quiescence);
            }

            _ = population_rx.changed() => {}

            _ = &mut timer => return ReleaseReason::Timeout,
        }
    }
}

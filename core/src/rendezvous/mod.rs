//! Multi-barrier rendezvous coordination for virtual users
//!
//! A scenario may declare rendezvous points: steps where concurrently
//! running virtual users hold until a quorum of the population has arrived
//! (or arrivals go quiet for the declared window), then proceed together.
//! The pieces fit together like this:
//!
//! 1. The planner extracts [`crate::config::Rendezvous`] declarations from
//!    the scenario and hands them to [`CoordinatorBuilder`], which
//!    normalizes quotas against the planned user total and builds a
//!    [`BarrierGroup`].
//! 2. [`Coordinator::start`] launches one supervisor task per [`Barrier`].
//!    A supervisor sleeps until the barrier's first arrival, then watches a
//!    quiescence timer that restarts on every arrival counted toward the
//!    quorum.
//! 3. Virtual users call [`Coordinator::arrive`] and block until the
//!    barrier releases. A cycle releases once for one of three reasons:
//!    the quorum arrived, arrivals went quiet, or the coordinator was
//!    stopped.
//! 4. When the group's terminal barrier releases, its supervisor resets
//!    every barrier for the next cycle; earlier supervisors wait for that
//!    reset so nobody can lap the cohort.
//!
//! # Example
//!
//! ```ignore
//! use stampede_core::config::Rendezvous;
//! use stampede_core::rendezvous::CoordinatorBuilder;
//!
//! let coordinator = CoordinatorBuilder::new()
//!     .total_users(10)
//!     .declaration(Rendezvous::new("checkout").with_user_number(5))
//!     .build()?;
//! coordinator.start();
//!
//! // in each virtual user, at the rendezvous step:
//! coordinator.arrive("checkout").await;
//!
//! // when the scenario finishes or aborts:
//! coordinator.stop().await;
//! ```

mod barrier;
mod coordinator;
mod group;
mod population;

pub use barrier::{Barrier, ReleaseReason};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use group::BarrierGroup;
pub use population::{Population, PopulationState};

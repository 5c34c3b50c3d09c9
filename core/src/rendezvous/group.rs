//! Barrier groups: planning, lookup, and the cycle reset pipeline

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::{Rendezvous, DEFAULT_RENDEZVOUS_PERCENT, DEFAULT_RENDEZVOUS_TIMEOUT_MS};
use crate::error::{Error, Result};

use super::barrier::Barrier;

/// Ordered sequence of barriers belonging to one scenario.
///
/// The terminal barrier drives the group-wide reset: every barrier is reset
/// together once the last one releases, and the cycle generation advances so
/// the other supervisors can restart in lockstep.
pub struct BarrierGroup {
    barriers: Vec<Arc<Barrier>>,
    index: HashMap<String, usize>,
    cycle_tx: watch::Sender<u64>,
}

impl BarrierGroup {
    /// Normalize declarations against the planned user total and build the
    /// group.
    ///
    /// Malformed declarations are repaired in place with a warning; the only
    /// hard failure is a user total below one.
    pub fn plan(decls: &[Rendezvous], total: u64) -> Result<Self> {
        if total < 1 {
            return Err(Error::InvalidConfig(format!(
                "planned user total must be at least 1, got {total}"
            )));
        }

        let mut barriers = Vec::with_capacity(decls.len());
        let mut index = HashMap::with_capacity(decls.len());
        for decl in decls {
            let (required, fraction) = normalize_quota(decl, total);
            let timeout = if decl.timeout > 0 {
                decl.timeout
            } else {
                DEFAULT_RENDEZVOUS_TIMEOUT_MS
            };

            if index.contains_key(decl.name.as_str()) {
                tracing::warn!(
                    name = %decl.name,
                    "duplicate rendezvous name, first declaration keeps the route"
                );
            } else {
                index.insert(decl.name.clone(), barriers.len());
            }
            barriers.push(Arc::new(Barrier::new(
                &decl.name,
                required,
                fraction,
                Duration::from_millis(timeout as u64),
            )));
        }

        let (cycle_tx, _) = watch::channel(0);
        Ok(Self {
            barriers,
            index,
            cycle_tx,
        })
    }

    /// Look up a barrier by name.
    ///
    /// The same instance is returned across cycles; only its state resets.
    pub fn get(&self, name: &str) -> Option<&Arc<Barrier>> {
        self.index.get(name).map(|&i| &self.barriers[i])
    }

    /// Barriers in scenario order.
    pub fn barriers(&self) -> &[Arc<Barrier>] {
        &self.barriers
    }

    /// Number of rendezvous points in the group.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Whether the scenario declared no rendezvous points.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Verify at setup time that every referenced name resolves to a
    /// declared barrier.
    pub fn ensure_known<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if !self.index.contains_key(name) {
                return Err(Error::UnknownBarrier(name.to_string()));
            }
        }
        Ok(())
    }

    /// Cycle generation observed by supervisors; advances after each
    /// group-wide reset.
    pub(crate) fn cycle(&self) -> u64 {
        *self.cycle_tx.borrow()
    }

    /// Reset every barrier for the next cycle, then publish the new
    /// generation.
    pub(crate) fn reset_cycle(&self) {
        for barrier in &self.barriers {
            barrier.reset();
        }
        self.cycle_tx.send_modify(|cycle| *cycle += 1);
    }

    /// Wait until the generation advances past the one observed at cycle
    /// start.
    pub(crate) async fn cycle_after(&self, seen: u64) {
        let mut rx = self.cycle_tx.subscribe();
        let _ = rx.wait_for(|cycle| *cycle > seen).await;
    }
}

impl fmt::Debug for BarrierGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierGroup")
            .field("barriers", &self.barriers)
            .field("cycle", &self.cycle())
            .finish()
    }
}

/// Derive the absolute and fractional quorum from a declaration.
///
/// Either `number` or `percent` must be set and in range; anything else is
/// repaired to the defaults (everyone, 100%) with a warning.
fn normalize_quota(decl: &Rendezvous, total: u64) -> (u64, f32) {
    if decl.number == 0 && decl.percent > 0.0 && decl.percent <= DEFAULT_RENDEZVOUS_PERCENT {
        let required = ((decl.percent * total as f32) as u64).clamp(1, total);
        (required, decl.percent)
    } else if decl.number > 0 && (decl.number as u64) <= total && decl.percent == 0.0 {
        (decl.number as u64, decl.number as f32 / total as f32)
    } else {
        tracing::warn!(
            name = %decl.name,
            default_number = total,
            default_percent = DEFAULT_RENDEZVOUS_PERCENT,
            "rendezvous quota missing or out of range, using defaults"
        );
        (total, DEFAULT_RENDEZVOUS_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_rejects_zero_total() {
        let result = BarrierGroup::plan(&[Rendezvous::new("gate")], 0);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_plan_derives_number_from_percent() {
        let decls = [Rendezvous::new("gate").with_user_percent(0.3)];
        let group = BarrierGroup::plan(&decls, 20).unwrap();

        let barrier = group.get("gate").unwrap();
        assert_eq!(barrier.required(), 6);
        assert_eq!(barrier.fraction(), 0.3);
        assert_eq!(barrier.quiescence(), Duration::from_millis(5000));
    }

    #[test]
    fn test_plan_derives_percent_from_number() {
        let decls = [Rendezvous::new("gate").with_user_number(5)];
        let group = BarrierGroup::plan(&decls, 20).unwrap();

        let barrier = group.get("gate").unwrap();
        assert_eq!(barrier.required(), 5);
        assert_eq!(barrier.fraction(), 0.25);
    }

    #[test]
    fn test_plan_repairs_out_of_range_quota() {
        let decls = [Rendezvous::new("gate").with_user_number(999).with_timeout(-1)];
        let group = BarrierGroup::plan(&decls, 10).unwrap();

        let barrier = group.get("gate").unwrap();
        assert_eq!(barrier.required(), 10);
        assert_eq!(barrier.fraction(), 1.0);
        assert_eq!(barrier.quiescence(), Duration::from_millis(5000));
    }

    #[test]
    fn test_plan_repairs_unset_quota() {
        let decls = [Rendezvous::new("gate").with_timeout(250)];
        let group = BarrierGroup::plan(&decls, 8).unwrap();

        let barrier = group.get("gate").unwrap();
        assert_eq!(barrier.required(), 8);
        assert_eq!(barrier.fraction(), 1.0);
        assert_eq!(barrier.quiescence(), Duration::from_millis(250));
    }

    #[test]
    fn test_plan_clamps_tiny_percent_to_one_user() {
        let decls = [Rendezvous::new("gate").with_user_percent(0.001)];
        let group = BarrierGroup::plan(&decls, 10).unwrap();

        assert_eq!(group.get("gate").unwrap().required(), 1);
    }

    #[test]
    fn test_duplicate_name_keeps_first_route() {
        let decls = [
            Rendezvous::new("gate").with_user_number(3),
            Rendezvous::new("gate").with_user_number(7),
        ];
        let group = BarrierGroup::plan(&decls, 10).unwrap();

        assert_eq!(group.len(), 2);
        assert_eq!(group.get("gate").unwrap().required(), 3);
    }

    #[test]
    fn test_lookup_identity_survives_reset() {
        let decls = [Rendezvous::new("gate").with_user_number(3)];
        let group = BarrierGroup::plan(&decls, 10).unwrap();

        let before = Arc::clone(group.get("gate").unwrap());
        group.reset_cycle();
        assert!(Arc::ptr_eq(&before, group.get("gate").unwrap()));
        assert_eq!(group.cycle(), 1);
    }

    #[test]
    fn test_ensure_known() {
        let decls = [Rendezvous::new("gate")];
        let group = BarrierGroup::plan(&decls, 10).unwrap();

        assert!(group.ensure_known(["gate"]).is_ok());
        assert!(matches!(
            group.ensure_known(["gate", "missing"]),
            Err(Error::UnknownBarrier(name)) if name == "missing"
        ));
    }

    proptest! {
        #[test]
        fn normalized_quota_stays_in_bounds(
            number in 0i64..2000,
            percent in 0.0f32..=1.0,
            timeout in -10_000i64..10_000,
            total in 1u64..500,
        ) {
            let decls = [Rendezvous::new("gate")
                .with_user_number(number)
                .with_user_percent(percent)
                .with_timeout(timeout)];
            let group = BarrierGroup::plan(&decls, total).unwrap();

            let barrier = group.get("gate").unwrap();
            prop_assert!(barrier.required() >= 1);
            prop_assert!(barrier.required() <= total);
            prop_assert!(barrier.fraction() > 0.0);
            prop_assert!(barrier.fraction() <= 1.0);
            prop_assert!(barrier.quiescence() > Duration::ZERO);
        }
    }
}

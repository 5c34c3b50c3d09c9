//! Rendezvous declaration types
//!
//! Declarations are extracted from a test plan by the scenario planner and
//! handed to [`crate::rendezvous::BarrierGroup::plan`] together with the
//! planned user total. Quota fields left at zero are derived from the other
//! quota field (or fall back to defaults) during planning.

use serde::{Deserialize, Serialize};

/// Default quiescence window when a declaration omits (or zeroes) its timeout.
pub const DEFAULT_RENDEZVOUS_TIMEOUT_MS: i64 = 5000;

/// Default required fraction of the user population.
pub const DEFAULT_RENDEZVOUS_PERCENT: f32 = 1.0;

/// A rendezvous point declaration as written in a test plan.
///
/// Either `number` or `percent` expresses the release quorum; the planner
/// derives the other. A declaration that sets both (or neither, or values
/// out of range) is repaired to the defaults with a warning rather than
/// failing the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rendezvous {
    /// Identifier, unique within the scenario.
    pub name: String,

    /// Absolute number of users required to release (0 = derive from percent).
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub number: i64,

    /// Fraction of the user population required to release (0 = derive from number).
    #[serde(default, skip_serializing_if = "is_zero_f32")]
    pub percent: f32,

    /// Quiescence timeout in milliseconds between arrivals (<= 0 selects the default).
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timeout: i64,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

impl Rendezvous {
    /// Create a declaration with the given name and all quota fields unset.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: 0,
            percent: 0.0,
            timeout: 0,
        }
    }

    /// Set the user number needed to release this rendezvous.
    pub fn with_user_number(mut self, number: i64) -> Self {
        self.number = number;
        self
    }

    /// Set the user percent needed to release this rendezvous.
    pub fn with_user_percent(mut self, percent: f32) -> Self {
        self.percent = percent;
        self
    }

    /// Set the timeout (milliseconds) between users arriving at this rendezvous.
    pub fn with_timeout(mut self, millis: i64) -> Self {
        self.timeout = millis;
        self
    }
}

//! Desired-state calculation: turns the current valve activity into a
//! per-pump "should run" flag.
//!
//! Each pump carries three valve lists that are evaluated as a gate:
//!
//! ```text
//! need_valves     ── OR ──┐
//! need_valves_on  ── AND ─┼─▶ desired
//! need_valves_off ── NOR ─┘
//! ```
//!
//! The OR stage is the only one that can produce `true`; the two gates
//! after it can only clear it.

use serde::{Deserialize, Serialize};

/// Valve rules for a single pump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpRules {
    /// Any of these valves being active requests the pump.
    pub need_valves: Vec<i64>,
    /// All of these valves must be active, otherwise the pump stays off.
    pub need_valves_on: Vec<i64>,
    /// All of these valves must be inactive, otherwise the pump stays off.
    pub need_valves_off: Vec<i64>,
}

/// Look up a valve, `None` when the id is negative or past the end.
fn valve(active: &[bool], id: i64) -> Option<bool> {
    usize::try_from(id).ok().and_then(|i| active.get(i).copied())
}

/// Compute whether a pump should run for the given valve activity.
pub fn compute(active: &[bool], rules: &PumpRules) -> bool {
    let requested = rules
        .need_valves
        .iter()
        .any(|&v| valve(active, v).unwrap_or(false));

    // Unknown valves fail both gates.
    let all_on = rules
        .need_valves_on
        .iter()
        .all(|&v| valve(active, v) == Some(true));
    let all_off = rules
        .need_valves_off
        .iter()
        .all(|&v| valve(active, v) == Some(false));

    requested && all_on && all_off
}

/// Compute the full desired vector, index-aligned with `rules`.
pub fn compute_all<'a, I>(active: &[bool], rules: I) -> Vec<bool>
where
    I: IntoIterator<Item = &'a PumpRules>,
{
    rules.into_iter().map(|r| compute(active, r)).collect()
}

// ===========================================================================
// Tests
// ===========================================================================

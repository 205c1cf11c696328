//! Valve activity input. The hub only sees valves through [`ValveSource`]:
//! a snapshot of which valves are open plus change notifications.
//! [`ValveBoard`] is the in-process implementation fed by MQTT and the API.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

/// Highest valve count the board tracks. Ids at or above this are ignored.
pub const MAX_VALVES: usize = 256;

pub type ValveListener = Box<dyn Fn() + Send + Sync>;

pub trait ValveSource: Send + Sync {
    /// Current activity, indexed by valve id.
    fn snapshot(&self) -> Vec<bool>;

    /// Register a callback fired after every change.
    fn subscribe(&self, listener: ValveListener);
}

#[derive(Default)]
pub struct ValveBoard {
    active: Mutex<Vec<bool>>,
    listeners: Mutex<Vec<ValveListener>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ValveBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one valve, growing the vector with inactive valves as needed.
    /// Returns false if `valve` is out of range and was ignored.
    pub fn set(&self, valve: usize, on: bool) -> bool {
        if valve >= MAX_VALVES {
            warn!(valve, max = MAX_VALVES, "valve id out of range, ignored");
            return false;
        }
        let changed = {
            let mut active = lock(&self.active);
            if active.len() <= valve {
                if !on {
                    return true;
                }
                active.resize(valve + 1, false);
            }
            let changed = active[valve] != on;
            active[valve] = on;
            changed
        };
        if changed {
            self.notify();
        }
        true
    }

    /// Replace the whole activity vector. Returns false, leaving the board
    /// untouched, if it is longer than [`MAX_VALVES`].
    pub fn replace(&self, next: Vec<bool>) -> bool {
        if next.len() > MAX_VALVES {
            warn!(valves = next.len(), max = MAX_VALVES, "valve vector too long, ignored");
            return false;
        }
        let changed = {
            let mut active = lock(&self.active);
            let changed = *active != next;
            *active = next;
            changed
        };
        if changed {
            self.notify();
        }
        true
    }

    /// Mark every valve inactive.
    pub fn clear(&self) {
        let changed = {
            let mut active = lock(&self.active);
            let changed = active.iter().any(|&v| v);
            active.iter_mut().for_each(|v| *v = false);
            changed
        };
        if changed {
            self.notify();
        }
    }

    fn notify(&self) {
        for listener in lock(&self.listeners).iter() {
            listener();
        }
    }
}

impl ValveSource for ValveBoard {
    fn snapshot(&self) -> Vec<bool> {
        lock(&self.active).clone()
    }

    fn subscribe(&self, listener: ValveListener) {
        lock(&self.listeners).push(listener);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

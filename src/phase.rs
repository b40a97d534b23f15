//! Connection lifecycle phases and the state machine that tracks them
//!
//! The machine holds exactly one active [`Phase`] and fires subscriber
//! callbacks on every genuine transition. Setting the phase to its current
//! value is a no-op and fires nothing, so drivers can set phases
//! unconditionally without double-notifying observers.
//!
//! No transition validity table is enforced here; sequencing is the
//! responsibility of the connection driver in [`crate::socket`].

use std::fmt;
use std::sync::{Arc, Mutex};

/// Lifecycle phase of a reliable socket connection.
///
/// `Closed` is both the initial phase and the only terminal phase reachable
/// by explicit user action. `TimedOut` is reserved for a future
/// connect-attempt-timeout policy; no transition currently produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Closed,
    Connecting,
    Open,
    Reconnecting,
    TimedOut,
    Flushing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Closed => "closed",
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::Reconnecting => "reconnecting",
            Phase::TimedOut => "timedout",
            Phase::Flushing => "flushing",
        };
        f.write_str(name)
    }
}

type AnyHandler = Arc<dyn Fn(Phase) + Send + Sync>;
type PhaseHandler = Arc<dyn Fn() + Send + Sync>;

struct Registry {
    phase: Phase,
    any: Vec<AnyHandler>,
    per_phase: Vec<(Phase, PhaseHandler)>,
}

/// Tracks the active [`Phase`] and notifies subscribers on transition.
///
/// Callbacks run synchronously on the thread calling [`set`](Self::set),
/// in registration order: any-phase subscribers first, then the subscribers
/// registered for the phase being entered.
pub struct StateMachine {
    registry: Mutex<Registry>,
}

impl StateMachine {
    /// Create a machine starting in `Closed`.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                phase: Phase::Closed,
                any: Vec::new(),
                per_phase: Vec::new(),
            }),
        }
    }

    /// The currently active phase.
    pub fn current(&self) -> Phase {
        self.registry.lock().unwrap().phase
    }

    /// Check the active phase against `phase`.
    pub fn is(&self, phase: Phase) -> bool {
        self.current() == phase
    }

    /// Move to `next`, firing subscribers. No-op when already in `next`.
    pub fn set(&self, next: Phase) {
        let (any, entered) = {
            let mut registry = self.registry.lock().unwrap();
            if registry.phase == next {
                return;
            }
            registry.phase = next;
            let any = registry.any.clone();
            let entered: Vec<PhaseHandler> = registry
                .per_phase
                .iter()
                .filter(|(p, _)| *p == next)
                .map(|(_, h)| Arc::clone(h))
                .collect();
            (any, entered)
        };

        // The lock is released before callbacks run so handlers may query
        // the machine without deadlocking.
        for handler in any {
            handler(next);
        }
        for handler in entered {
            handler();
        }
    }

    /// Register a callback fired whenever the machine enters `phase`.
    pub fn subscribe<F>(&self, phase: Phase, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry
            .lock()
            .unwrap()
            .per_phase
            .push((phase, Arc::new(handler)));
    }

    /// Register a callback fired on every phase change with the new phase.
    pub fn subscribe_any<F>(&self, handler: F)
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        self.registry.lock().unwrap().any.push(Arc::new(handler));
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

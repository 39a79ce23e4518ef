//! Table-driven finite state machine engine.
//!
//! Classic transition-table FSM, shared by both gateway machines:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Machine<S, E, C>                                    │
//! │  ┌──────────────┬──────────┬──────────┬──────────┐   │
//! │  │ state \ event│  E0      │  E1      │  ...     │   │
//! │  ├──────────────┼──────────┼──────────┼──────────┤   │
//! │  │ S0           │ fn(&mut C)->S │ -   │  -       │   │
//! │  │ S1           │  -       │ fn(&mut C)->S │ -   │   │
//! │  │ ...          │          │          │          │   │
//! │  └──────────────┴──────────┴──────────┴──────────┘   │
//! │  current: Mutex<S>                                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! [`Machine::call`] takes the machine lock, looks up the handler for
//! `(current, event)`, runs it and stores the state it returns.  The lock is
//! held for the whole handler, blocking I/O included, so at most one
//! transition per machine is ever in flight.  An empty cell makes `call` a
//! no-op.
//!
//! Handlers receive a typed per-machine context (`C`) holding the hardware
//! ports, configuration and telemetry sink.  They cannot fail: faults are
//! logged inside the handler, which still returns a state.

pub mod cellular;
pub mod power;

use core::fmt;
use core::marker::PhantomData;

use log::{info, warn};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A closed set of states or events, indexable into the transition table.
///
/// Implemented by plain fieldless enums; `ALL` lists every variant in
/// ordinal order so `index()` can be `self as usize`.
pub trait Label: Copy + Eq + fmt::Debug + Send + 'static {
    const ALL: &'static [Self];

    fn index(self) -> usize;

    fn name(self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Handler type
// ---------------------------------------------------------------------------

/// Transition handler: performs side effects on the context, returns the
/// next state.
pub type Handler<S, C> = fn(&mut C) -> S;

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Generic FSM over state set `S`, event set `E` and context `C`.
pub struct Machine<S: Label, E: Label, C> {
    /// Tag used in transition logs.
    name: &'static str,
    /// Dense `S::ALL.len() * E::ALL.len()` table.
    table: Vec<Option<Handler<S, C>>>,
    current: Mutex<S>,
    _event: PhantomData<fn(E)>,
}

impl<S: Label, E: Label, C> Machine<S, E, C> {
    /// Create an empty machine starting in `initial`.
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            table: vec![None; S::ALL.len() * E::ALL.len()],
            current: Mutex::new(initial),
            _event: PhantomData,
        }
    }

    /// Register `handler` for `(state, event)`.
    ///
    /// Registering a pair twice replaces the earlier handler and logs a
    /// configuration warning.  Returns `true` when a handler was replaced.
    pub fn add_handler(&mut self, state: S, event: E, handler: Handler<S, C>) -> bool {
        let slot = &mut self.table[Self::slot(state, event)];
        let replaced = slot.is_some();
        if replaced {
            warn!(
                target: "fsm",
                "{}: handler for state {} / event {} registered twice, replacing",
                self.name,
                state.name(),
                event.name()
            );
        }
        *slot = Some(handler);
        replaced
    }

    /// Whether a handler exists for `(state, event)`.
    pub fn has_handler(&self, state: S, event: E) -> bool {
        self.table[Self::slot(state, event)].is_some()
    }

    /// Dispatch `event` against the current state.
    ///
    /// Returns the state after the call; unchanged when no handler is
    /// registered for the pair.
    pub fn call(&self, event: E, ctx: &mut C) -> S {
        let mut current = self.current.lock();
        let old = *current;
        let Some(handler) = self.table[Self::slot(old, event)] else {
            return old;
        };

        let new = handler(ctx);
        *current = new;
        info!(
            target: "fsm",
            "{}: state [{}] -> [{}]",
            self.name,
            old.name(),
            new.name()
        );
        new
    }

    /// The current state.  Blocks while a transition is in flight.
    pub fn current_state(&self) -> S {
        *self.current.lock()
    }

    /// Drive loop: repeatedly dispatch the event `event_for` picks for the
    /// current state until `keep_going` returns `false`.
    pub fn run(&self, ctx: &mut C, event_for: fn(S) -> E, mut keep_going: impl FnMut(&C) -> bool) {
        info!(target: "fsm", "{}: starting in [{}]", self.name, self.current_state().name());
        while keep_going(ctx) {
            let event = event_for(self.current_state());
            self.call(event, ctx);
        }
        info!(target: "fsm", "{}: stopped in [{}]", self.name, self.current_state().name());
    }

    fn slot(state: S, event: E) -> usize {
        state.index() * E::ALL.len() + event.index()
    }
}

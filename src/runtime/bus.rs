//! Synchronous mutation-event dispatch.
//!
//! Publishing appends to one FIFO queue. The outermost `publish` drains it,
//! handing each event to every listener in registration order; events
//! published while draining (listeners writing through the engine) land at
//! the back of the same queue and are dispatched in turn. Each handler runs
//! in its own savepoint, so a failing handler leaves no writes behind.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::query::{MutationEvent, QueryEngine};

/// Subscriber to mutation events.
pub trait MutationListener {
    fn name(&self) -> &str;

    /// Handle one event. Returned events are queued behind the current batch.
    fn on_event(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<Vec<MutationEvent>>;
}

/// A closure listener.
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&QueryEngine, &MutationEvent) -> Result<Vec<MutationEvent>>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> MutationListener for FnListener<F>
where
    F: Fn(&QueryEngine, &MutationEvent) -> Result<Vec<MutationEvent>>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<Vec<MutationEvent>> {
        (self.f)(engine, event)
    }
}

/// A listener error, kept with the event that caused it.
#[derive(Debug)]
pub struct ComputationFailure {
    pub computation: String,
    pub event: MutationEvent,
    pub error: Error,
}

impl fmt::Display for ComputationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.computation, self.event, self.error)
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<Vec<Rc<dyn MutationListener>>>,
    queue: RefCell<VecDeque<MutationEvent>>,
    dispatching: Cell<bool>,
    failures: RefCell<Vec<ComputationFailure>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .listeners
            .borrow()
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        f.debug_struct("EventBus")
            .field("listeners", &names)
            .field("queued", &self.queue.borrow().len())
            .field("failures", &self.failures.borrow().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Rc<dyn MutationListener>) {
        log::debug!("subscribing listener '{}'", listener.name());
        self.listeners.borrow_mut().push(listener);
    }

    pub fn listener_names(&self) -> Vec<String> {
        self.listeners
            .borrow()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    /// Queue `events` and, unless a dispatch is already running, drain the queue.
    pub fn publish(&self, engine: &QueryEngine, events: Vec<MutationEvent>) {
        if events.is_empty() {
            return;
        }
        self.queue.borrow_mut().extend(events);
        if self.dispatching.replace(true) {
            return;
        }

        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            log::debug!("dispatching {}", event);
            let listeners = self.listeners.borrow().clone();
            for listener in listeners {
                let mark = self.queue.borrow().len();
                let handled = engine.transaction("listener", |engine| listener.on_event(engine, &event));
                match handled {
                    Ok(extra) => self.queue.borrow_mut().extend(extra),
                    Err(error) => {
                        // Writes of the failed handler were rolled back with its savepoint.
                        self.queue.borrow_mut().truncate(mark);
                        log::error!("listener '{}' failed on {}: {}", listener.name(), event, error);
                        self.failures.borrow_mut().push(ComputationFailure {
                            computation: listener.name().to_string(),
                            event: event.clone(),
                            error,
                        });
                    }
                }
            }
        }

        self.dispatching.set(false);
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.get()
    }

    /// Failures recorded since the last call.
    pub fn take_failures(&self) -> Vec<ComputationFailure> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}

//! Runtime host and mutation-event dispatch.

mod bus;
mod controller;

pub use bus::{ComputationFailure, EventBus, FnListener, MutationListener};
pub use controller::Controller;

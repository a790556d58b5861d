// src/dispatch/mod.rs

//! Hands the readiness found by one wait to whoever consumes it.
//!
//! - `display`: drains the display connection and routes events to windows.
//! - `bus`: feeds ready watches back to the bus, then routes incoming calls
//!   through the [`DispatchTable`](crate::bus::objects::DispatchTable).

pub mod bus;
pub mod display;

pub use bus::{BusEventDispatcher, ObjectRouter};
pub use display::{DisplayEventDispatcher, DrainStats};

//! winbus library crate.
//!
//! A single-threaded event core that waits on an X display connection and
//! a changing set of D-Bus watch descriptors at once, then routes display
//! events and bus calls to the window objects they target.

pub mod bus;
pub mod color;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod event_loop;
pub mod os;
pub mod watch;
pub mod window;

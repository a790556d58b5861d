// src/os/mod.rs

//! Thin wrappers over the OS readiness primitives.

pub mod poll;

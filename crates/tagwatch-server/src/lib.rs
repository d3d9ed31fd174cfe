//! # tagwatch-server
//!
//! Daemon library for the tagwatch contactless tag presence monitor.
//!
//! This library provides the event consumer, console formatting, the status
//! API handlers and shared state used by the `tagwatch` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod daemon;
pub mod display;
pub mod logging;
pub mod state;

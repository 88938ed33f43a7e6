//! Core domain types
//!
//! These types mirror the documents kept in the shared document store.
//! They are shared between the controller (which mutates them) and the
//! CLI (which creates and inspects them).

pub mod heartbeat;
pub mod job;
pub mod volume;

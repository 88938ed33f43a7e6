//! Persistent Disk Core
//!
//! Core types for the persistent-disk controller.
//!
//! This crate contains:
//! - Domain types: the Job, Volume and Heartbeat documents and their state machines
//! - Keys: document id conventions shared by the controller and the CLI

pub mod domain;
pub mod keys;

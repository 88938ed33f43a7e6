//! Scheduler layer for the controller
//!
//! This layer handles polling the document store for queued jobs and
//! coordinating their execution, from claiming to the terminal state.

pub mod poller;

pub use poller::JobPoller;

//! Shared domain types for flowdrive.
//!
//! Everything an engine client and the test driver exchange lives here:
//! deployment results, instance handles and statuses, activated jobs,
//! variable scopes, engine events, and the engine-facing error taxonomy.
//! This crate is pure data -- no IO, no runtime.

pub mod command;
pub mod deployment;
pub mod error;
pub mod event;
pub mod instance;
pub mod job;
pub mod variables;

//! Workflow test driver for flowdrive.
//!
//! This crate defines the "ports" an engine implementation provides
//! (deployment, instance lifecycle, work items, messages, clock control,
//! queries) and the driver built on top of them: deploy a process, start
//! instances, activate and resolve work items, advance virtual time, and
//! assert on settled instance state. It depends only on `flowdrive-types` --
//! never on a concrete engine.

pub mod assert;
pub mod client;
pub mod config;
pub mod driver;
pub mod handler;
pub mod settle;

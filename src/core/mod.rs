//! Core modules for the ledger's storage and control plane.
//!
//! Record encoding, the flat-file store, the broker lock, commit
//! scheduling and the shared primitives live here.

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod external_action;
pub mod logging;
pub mod output;
pub mod repr;
pub mod scheduler;
pub mod schemas;
pub mod store;

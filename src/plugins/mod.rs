//! Operations built on the core: directory roster sync and the ledger.

pub mod directory;
pub mod ledger;

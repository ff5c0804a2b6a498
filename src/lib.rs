//! Trunkline: per-repository branch lifecycle controllers and a sequential
//! merge queue.
//!
//! Provider events enter through the repository controller, which routes them
//! to one long-lived control process per branch. Those processes warn about
//! oversized and stale branches, rebase feature branches onto every new trunk
//! commit, and feed opened pull requests into the merge queue of their base
//! branch. The [`runtime`] keeps the processes alive across restarts by
//! checkpointing their state.

pub mod activities;
pub mod config;
pub mod control;
pub mod events;
pub mod queue;
pub mod runtime;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

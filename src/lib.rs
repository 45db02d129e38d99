//! # vaultgraph-core
//!
//! A filesystem-synchronized document graph. A directory of markdown
//! documents ("the vault") is the single source of truth; this crate keeps
//! an in-memory directed graph continuously consistent with it and streams
//! incremental updates to subscribers.
//!
//! The crate is organized around one loop:
//!
//! - [`watch`] observes the vault (debounced filesystem notifications,
//!   batched startup scan) and normalizes raw notifications,
//! - [`graph`] folds normalized change events through a pure reducer into
//!   the next graph snapshot,
//! - [`sync`] serializes all mutation through one orchestrator and fans
//!   deltas out to subscribers,
//! - [`effects`] turns user-initiated mutations into filesystem writes,
//!   which re-enter the loop through the watcher.
//!
//! [`paths`] and [`parse`] are the pure leaves: path-to-identity mapping
//! and document outline extraction. [`config`] holds the small amount of
//! persisted state outside the vault itself.

pub mod config;
pub mod effects;
pub mod error;
pub mod event;
pub mod graph;
pub mod parse;
pub mod paths;
pub mod sync;
#[cfg(feature = "service")]
pub mod watch;

pub use error::*;

#[cfg(test)]
mod tests;

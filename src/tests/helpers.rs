//! Shared test utilities for reducer and parser testing

use crate::{
    event::ChangeEvent,
    graph::{reduce, Environment, Graph},
};
use std::path::PathBuf;

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn test_env() -> Environment {
    Environment {
        root_path: PathBuf::from("/vault"),
    }
}

pub fn doc_path(relative: &str) -> PathBuf {
    PathBuf::from("/vault").join(relative)
}

/// Fold a sequence of change events into a graph from scratch.
pub fn build_graph(events: &[ChangeEvent]) -> Graph {
    init_logging();
    let env = test_env();
    events
        .iter()
        .fold(Graph::default(), |graph, event| reduce(&graph, event, &env))
}

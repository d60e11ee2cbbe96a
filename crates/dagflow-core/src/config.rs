//! Per-graph configuration.
//!
//! Every [`Graph`](crate::graph::Graph) is built with its own [`GraphConfig`];
//! there is no process-wide switch. The config derives serde so hosts can
//! load it from JSON alongside the rest of their settings.

use serde::{Deserialize, Serialize};

/// How much a graph reports through `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Nothing is emitted.
    Quiet,
    /// Lifecycle transitions and failures.
    #[default]
    Info,
    /// Additionally, per-node negotiation results and evaluation steps.
    Debug,
}

/// Configuration for a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub verbosity: Verbosity,
    /// Reject connections that would close a cycle when they are made,
    /// instead of only when the graph is closed. Default: on.
    pub eager_checks: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            verbosity: Verbosity::Info,
            eager_checks: true,
        }
    }
}

impl GraphConfig {
    /// Default config with [`Verbosity::Debug`].
    pub fn debug() -> Self {
        GraphConfig {
            verbosity: Verbosity::Debug,
            ..Self::default()
        }
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_eager_checks(mut self, eager_checks: bool) -> Self {
        self.eager_checks = eager_checks;
        self
    }

    pub(crate) fn logs(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }
}

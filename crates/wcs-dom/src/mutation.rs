#![forbid(unsafe_code)]

//! Journal of mutations applied to the connected tree.
//!
//! The document records one [`Mutation`] per operation that changes what is
//! reachable from its root. Work done on detached nodes and fragments is not
//! recorded; inserting a fragment is recorded once, listing every node it
//! moved. The journal is how batching is observed: a list that renders `n`
//! rows through a fragment shows up as a single [`Mutation::Insert`].
//!
//! # Invariants
//!
//! 1. Entries are in application order.
//! 2. Recording is off by default; [`MutationLog::enable`] turns it on and
//!    [`MutationLog::take`] drains it.

use smallvec::SmallVec;

use crate::node::NodeId;

/// One recorded change to the connected tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// `nodes` were inserted under `parent`, contiguously and in order.
    Insert {
        parent: NodeId,
        nodes: SmallVec<[NodeId; 4]>,
    },
    /// `node` was detached from `parent`.
    Remove { parent: NodeId, node: NodeId },
    /// Every child of `parent` was detached in one step.
    ClearChildren { parent: NodeId, removed: usize },
    SetText { node: NodeId },
    SetAttribute { node: NodeId, name: String },
    SetProperty { node: NodeId, name: String },
}

impl Mutation {
    /// Whether this entry added or removed nodes.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Insert { .. } | Self::Remove { .. } | Self::ClearChildren { .. }
        )
    }
}

/// Recorder owned by a document.
#[derive(Debug, Default)]
pub struct MutationLog {
    enabled: bool,
    entries: Vec<Mutation>,
}

impl MutationLog {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.entries.clear();
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record(&mut self, mutation: Mutation) {
        if self.enabled {
            self.entries.push(mutation);
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[Mutation] {
        &self.entries
    }

    /// Drain everything recorded so far.
    pub fn take(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.entries)
    }
}

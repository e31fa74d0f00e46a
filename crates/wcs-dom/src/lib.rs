#![forbid(unsafe_code)]

//! Document tree used by the wcs state runtime.
//!
//! - [`Document`]: arena of nodes with O(1) sibling-linked insertion,
//!   movement and removal, plus deep clone for template instantiation.
//! - [`Mutation`]: journal of changes to the connected tree, used to observe
//!   how many structural operations a render took.
//!
//! The tree is a model, not a renderer: it has no layout or style. Hosts
//! that paint it replay the mutation journal.

pub mod document;
pub mod error;
pub mod mutation;
pub mod node;

pub use document::Document;
pub use error::{DomError, Result};
pub use mutation::{Mutation, MutationLog};
pub use node::{NodeId, NodeKind};

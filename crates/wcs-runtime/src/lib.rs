#![forbid(unsafe_code)]

//! Reactive state runtime for the wcs document model.
//!
//! A [`Runtime`] owns a [`Document`](wcs_dom::Document), named state scopes
//! and the bindings between them:
//!
//! - [`state`]: JSON-backed scopes with computed getters.
//! - [`binding`]: text, attribute, property, `for` and `if` bindings.
//! - [`template`]: fragments instantiated by structural bindings.
//! - [`resolve`]: binding to state address resolution through loop contexts.
//! - [`reconcile`]: list and conditional reconciliation with block pooling.
//! - [`config`]: runtime limits, optionally loaded from TOML or JSON.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use wcs_runtime::{BindingKind, Runtime, RuntimeConfig, StateScope};
//!
//! let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
//! rt.register_state(StateScope::new("default", json!({"title": "hello"})));
//! let text = rt.document_mut().create_text("");
//! rt.bind(text, BindingKind::Text, "title", None).unwrap();
//! assert_eq!(rt.document().text(text).unwrap(), "hello");
//!
//! rt.set("title", json!("bye")).unwrap();
//! assert_eq!(rt.document().text(text).unwrap(), "bye");
//! ```

pub mod binding;
pub mod config;
pub mod content;
pub mod error;
pub mod reconcile;
pub mod resolve;
pub mod runtime;
pub mod state;
pub mod template;
pub mod value;

pub use binding::{BindingDescriptor, BindingId, BindingKind};
pub use config::RuntimeConfig;
pub use content::{Content, ContentId};
pub use error::{Result, RuntimeError};
pub use runtime::{ApplyStats, Runtime};
pub use state::{GetterContext, ScopeState, StateScope};
pub use template::{NodeBindingSpec, TemplateId};

#![forbid(unsafe_code)]

//! Runtime errors.
//!
//! [`RuntimeError`] wraps the lower layers' errors and adds the failures that
//! only make sense once templates, scopes and bindings exist. All of them
//! point at an authoring or integration mistake; the runtime does not roll
//! back a partially applied pass when one surfaces.

use std::fmt;

use wcs_core::CoreError;
use wcs_dom::DomError;

use crate::binding::BindingId;
use crate::content::ContentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    Core(CoreError),
    Dom(DomError),
    /// A `for`/`if` binding names a template that was never registered.
    MissingTemplate { template: String },
    /// A template's root or binding node paths are malformed.
    InvalidTemplate { template: String, reason: String },
    /// A binding or address names a state scope that was never registered.
    MissingStateScope { name: String },
    /// The binding id is unknown or its binding was torn down.
    UnknownBinding(BindingId),
    /// The content block was destroyed or never existed.
    UnknownContent(ContentId),
    /// A write walked through a value that is not an object or array.
    InvalidPath { path: String },
    /// A write targeted a getter.
    NotWritable { path: String },
    /// Configuration failed to parse or validate.
    InvalidConfig { reason: String },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(e) => write!(f, "{e}"),
            Self::Dom(e) => write!(f, "{e}"),
            Self::MissingTemplate { template } => {
                write!(f, "template '{template}' is not registered")
            }
            Self::InvalidTemplate { template, reason } => {
                write!(f, "template '{template}' is invalid: {reason}")
            }
            Self::MissingStateScope { name } => {
                write!(f, "state scope '{name}' is not registered")
            }
            Self::UnknownBinding(id) => write!(f, "unknown binding {id:?}"),
            Self::UnknownContent(id) => write!(f, "unknown content block {id:?}"),
            Self::InvalidPath { path } => {
                write!(f, "cannot write '{path}': an intermediate value is not a container")
            }
            Self::NotWritable { path } => write!(f, "'{path}' is a getter and cannot be written"),
            Self::InvalidConfig { reason } => write!(f, "invalid runtime config: {reason}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Core(e) => Some(e),
            Self::Dom(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CoreError> for RuntimeError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

impl From<DomError> for RuntimeError {
    fn from(e: DomError) -> Self {
        Self::Dom(e)
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

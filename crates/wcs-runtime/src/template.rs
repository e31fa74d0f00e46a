#![forbid(unsafe_code)]

//! Template registry.
//!
//! A template is a detached fragment in the runtime's document plus the
//! bindings to create on each copy. Bindings locate their node by child
//! indices from the fragment root, so a copy made with
//! [`Document::deep_clone`] finds them at the same path.
//!
//! # Failure Modes
//!
//! - A binding whose `node_path` does not resolve in the fragment is
//!   rejected at registration with `RuntimeError::InvalidTemplate`.
//! - Looking up an unknown id yields `RuntimeError::MissingTemplate`.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use wcs_dom::{Document, NodeId, NodeKind};

use crate::binding::BindingKind;
use crate::error::{Result, RuntimeError};

/// Name of a registered template.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(Rc<str>);

impl TemplateId {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateId({})", self.0)
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One binding to create on every instance of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBindingSpec {
    /// Child indices from the fragment root to the bound node.
    pub node_path: Vec<usize>,
    pub kind: BindingKind,
    pub path: String,
    /// Scope to read from; the runtime's default scope when `None`.
    pub state_name: Option<String>,
}

impl NodeBindingSpec {
    pub fn new(
        node_path: impl Into<Vec<usize>>,
        kind: BindingKind,
        path: impl Into<String>,
    ) -> Self {
        Self {
            node_path: node_path.into(),
            kind,
            path: path.into(),
            state_name: None,
        }
    }

    #[must_use]
    pub fn in_state(mut self, state_name: impl Into<String>) -> Self {
        self.state_name = Some(state_name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub fragment: NodeId,
    pub bindings: Vec<NodeBindingSpec>,
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: AHashMap<TemplateId, Rc<Template>>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fragment` under `id`, replacing any previous template.
    ///
    /// The fragment must be a detached fragment node of `doc`.
    pub fn register(
        &mut self,
        doc: &Document,
        id: TemplateId,
        fragment: NodeId,
        bindings: Vec<NodeBindingSpec>,
    ) -> Result<Option<Rc<Template>>> {
        if *doc.kind(fragment)? != NodeKind::Fragment || doc.parent(fragment)?.is_some() {
            return Err(RuntimeError::InvalidTemplate {
                template: id.to_string(),
                reason: "root must be a detached fragment".into(),
            });
        }
        if doc.child_count(fragment)? == 0 {
            return Err(RuntimeError::InvalidTemplate {
                template: id.to_string(),
                reason: "fragment has no nodes".into(),
            });
        }
        for entry in &bindings {
            if entry.node_path.is_empty()
                || doc.child_at_path(fragment, &entry.node_path)?.is_none()
            {
                return Err(RuntimeError::InvalidTemplate {
                    template: id.to_string(),
                    reason: format!("no node at {:?} for '{}'", entry.node_path, entry.path),
                });
            }
        }
        Ok(self.templates.insert(
            id.clone(),
            Rc::new(Template {
                id,
                fragment,
                bindings,
            }),
        ))
    }

    pub fn get(&self, id: &TemplateId) -> Result<Rc<Template>> {
        self.templates
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingTemplate {
                template: id.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, id: &TemplateId) -> bool {
        self.templates.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_fragment(doc: &mut Document) -> NodeId {
        let frag = doc.create_fragment();
        let li = doc.create_element("li");
        let text = doc.create_text("");
        doc.append_child(li, text).unwrap();
        doc.append_child(frag, li).unwrap();
        frag
    }

    #[test]
    fn register_and_lookup() {
        let mut doc = Document::new();
        let frag = row_fragment(&mut doc);
        let mut reg = TemplateRegistry::new();
        reg.register(
            &doc,
            "row".into(),
            frag,
            vec![NodeBindingSpec::new([0, 0], BindingKind::Text, "items.*")],
        )
        .unwrap();
        assert!(reg.contains(&"row".into()));
        assert_eq!(reg.get(&"row".into()).unwrap().bindings.len(), 1);
        assert!(matches!(
            reg.get(&"missing".into()),
            Err(RuntimeError::MissingTemplate { .. })
        ));
    }

    #[test]
    fn bad_node_paths_are_rejected() {
        let mut doc = Document::new();
        let frag = row_fragment(&mut doc);
        let mut reg = TemplateRegistry::new();
        let err = reg
            .register(
                &doc,
                "row".into(),
                frag,
                vec![NodeBindingSpec::new([3], BindingKind::Text, "x")],
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidTemplate { .. }));

        let li = doc.create_element("li");
        assert!(reg.register(&doc, "li".into(), li, Vec::new()).is_err());
        let empty = doc.create_fragment();
        assert!(reg.register(&doc, "empty".into(), empty, Vec::new()).is_err());
    }
}

//! Selection state of the map editor.
//!
//! At most one thing is selected at a time: a node or a link. Orthogonal to
//! that, a link-creation gesture may hold a chosen source node until a
//! target is clicked.

use log::debug;

use crate::error::{MapError, MapResult};
use crate::graph::link_identifier;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Empty,
    Node(String),
    Link {
        id: String,
        source: String,
        target: String,
    },
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Empty)
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            Selection::Node(id) => Some(id),
            _ => None,
        }
    }

    pub fn link_id(&self) -> Option<&str> {
        match self {
            Selection::Link { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Requests the controller must carry out against the study service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEffect {
    CreateLink { source: String, target: String },
    DeleteNode { node_id: String },
    DeleteLink { source: String, target: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionController {
    selection: Selection,
    pending_source: Option<String>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn pending_link_source(&self) -> Option<&str> {
        self.pending_source.as_deref()
    }

    pub fn click_node(&mut self, node_id: &str) -> Option<SelectionEffect> {
        match self.pending_source.take() {
            Some(source) if source != node_id => {
                debug!("link gesture completed: {source} -> {node_id}");
                Some(SelectionEffect::CreateLink {
                    source,
                    target: node_id.to_string(),
                })
            }
            Some(_) => {
                debug!("link gesture on '{node_id}' cancelled");
                None
            }
            None => {
                self.selection = Selection::Node(node_id.to_string());
                None
            }
        }
    }

    pub fn start_link_gesture(&mut self, node_id: &str) {
        self.pending_source = Some(node_id.to_string());
    }

    pub fn click_link(&mut self, source: &str, target: &str) {
        self.selection = Selection::Link {
            id: link_identifier(source, target),
            source: source.to_string(),
            target: target.to_string(),
        };
        self.pending_source = None;
    }

    pub fn click_background(&mut self) {
        self.selection = Selection::Empty;
        self.pending_source = None;
    }

    /// The effect `delete` would emit, without changing state.
    pub fn pending_delete(&self) -> MapResult<SelectionEffect> {
        match &self.selection {
            Selection::Empty => Err(MapError::invalid_state(
                "nothing is selected, there is nothing to delete",
            )),
            Selection::Node(node_id) => Ok(SelectionEffect::DeleteNode {
                node_id: node_id.clone(),
            }),
            Selection::Link { source, target, .. } => Ok(SelectionEffect::DeleteLink {
                source: source.clone(),
                target: target.clone(),
            }),
        }
    }

    pub fn delete(&mut self) -> MapResult<SelectionEffect> {
        let effect = self.pending_delete()?;
        self.selection = Selection::Empty;
        Ok(effect)
    }

    /// Drops every reference to a node that no longer exists, including a
    /// selected link touching it.
    pub fn forget_node(&mut self, node_id: &str) {
        let stale = match &self.selection {
            Selection::Node(id) => id == node_id,
            Selection::Link { source, target, .. } => source == node_id || target == node_id,
            Selection::Empty => false,
        };
        if stale {
            self.selection = Selection::Empty;
        }
        if self.pending_source.as_deref() == Some(node_id) {
            self.pending_source = None;
        }
    }

    pub fn forget_link(&mut self, link_id: &str) {
        if self.selection.link_id() == Some(link_id) {
            self.selection = Selection::Empty;
        }
    }
}

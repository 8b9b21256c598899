//! File-backed study: the graph plus its non-default layers.
//!
//! This is the storage behind the bundled server and offline rendering.
//! Every mutation goes through [`LayerStore`] or [`Graph`] so the same
//! invariants hold as in the interactive controller.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::error::{EntityKind, MapError, MapResult};
use crate::graph::{Graph, Link, link_identifier};
use crate::layers::{LayerOverride, LayerRecord, LayerStore, OverridePatch};
use crate::render::RenderModel;
use crate::selection::SelectionController;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDocument {
    pub id: String,
    #[serde(flatten)]
    pub graph: Graph,
    #[serde(default)]
    pub layers: Vec<LayerRecord>,
    #[serde(default, skip_serializing_if = "is_unset")]
    pub next_layer_id: u64,
}

fn is_unset(value: &u64) -> bool {
    *value == 0
}

impl StudyDocument {
    pub fn new(id: impl Into<String>, graph: Graph) -> Self {
        Self {
            id: id.into(),
            graph,
            layers: Vec::new(),
            next_layer_id: 0,
        }
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let document: Self =
            serde_json::from_str(contents).context("failed to parse study document")?;
        // Surfaces duplicate layer names or ids before anything is served.
        document.layer_store()?;
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize study document")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("invalid study '{}'", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = self.to_json()?;
        fs::write(path, contents.as_bytes())
            .with_context(|| format!("failed to write '{}'", path.display()))
    }

    pub fn layer_store(&self) -> MapResult<LayerStore> {
        let mut store = LayerStore::from_records(self.layers.clone())?;
        store.reserve_ids_below(self.next_layer_id);
        Ok(store)
    }

    fn with_layers<T>(&mut self, f: impl FnOnce(&mut LayerStore) -> MapResult<T>) -> MapResult<T> {
        let mut store = self.layer_store()?;
        let value = f(&mut store)?;
        if store.is_dirty() {
            self.layers = store.to_records();
            self.next_layer_id = store.next_id();
        }
        Ok(value)
    }

    fn ensure_node(&self, node_id: &str) -> MapResult<()> {
        if self.graph.contains_node(node_id) {
            Ok(())
        } else {
            Err(MapError::not_found(EntityKind::Node, node_id))
        }
    }

    /// Adds a link between two existing nodes. Either orientation of an
    /// existing link yields the existing identifier.
    pub fn add_link(&mut self, source: &str, target: &str) -> MapResult<String> {
        if source == target {
            return Err(MapError::invalid_state(format!(
                "node '{source}' cannot be linked to itself"
            )));
        }
        self.ensure_node(source)?;
        self.ensure_node(target)?;
        Ok(self.graph.insert_link(Link::new(source, target)))
    }

    pub fn remove_link(&mut self, source: &str, target: &str) -> MapResult<()> {
        let id = link_identifier(source, target);
        if self.graph.remove_link(&id) {
            Ok(())
        } else {
            Err(MapError::not_found(EntityKind::Link, id))
        }
    }

    /// Removes a node, its links, memberships and overrides.
    pub fn remove_node(&mut self, node_id: &str) -> MapResult<()> {
        if !self.graph.remove_node(node_id) {
            return Err(MapError::not_found(EntityKind::Node, node_id));
        }
        self.with_layers(|store| {
            store.forget_node(node_id);
            Ok(())
        })
    }

    pub fn set_node_position(
        &mut self,
        node_id: &str,
        x: f64,
        y: f64,
        color: Option<Rgb>,
    ) -> MapResult<()> {
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| MapError::not_found(EntityKind::Node, node_id))?;
        node.x = x;
        node.y = y;
        if let Some(color) = color {
            node.color = color;
        }
        Ok(())
    }

    pub fn create_layer(&mut self, name: &str) -> MapResult<String> {
        self.with_layers(|store| store.create_layer(name))
    }

    pub fn rename_layer(&mut self, layer_id: &str, name: &str) -> MapResult<()> {
        self.with_layers(|store| store.rename_layer(layer_id, name))
    }

    pub fn delete_layer(&mut self, layer_id: &str) -> MapResult<()> {
        self.with_layers(|store| store.delete_layer(layer_id))
    }

    pub fn set_layer_membership(&mut self, layer_id: &str, node_ids: Vec<String>) -> MapResult<()> {
        for node_id in &node_ids {
            self.ensure_node(node_id)?;
        }
        self.with_layers(|store| store.set_layer_membership(layer_id, node_ids))
    }

    pub fn set_layer_override(
        &mut self,
        layer_id: &str,
        node_id: &str,
        patch: OverridePatch,
    ) -> MapResult<LayerOverride> {
        self.ensure_node(node_id)?;
        self.with_layers(|store| store.set_override(layer_id, node_id, patch))
    }

    /// Projects the study onto a layer given by id or name, the default
    /// layer when `None`.
    pub fn render_model(&self, layer: Option<&str>) -> MapResult<RenderModel> {
        let store = self.layer_store()?;
        let layer_id = match layer {
            Some(wanted) => store
                .resolve(wanted)
                .map(|layer| layer.id.clone())
                .ok_or_else(|| MapError::not_found(EntityKind::Layer, wanted))?,
            None => crate::layers::DEFAULT_LAYER_ID.to_string(),
        };
        Ok(RenderModel::build(
            &self.graph,
            &store,
            &layer_id,
            &SelectionController::new(),
        ))
    }
}

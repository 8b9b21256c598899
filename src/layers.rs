//! Named overlays of node position and color.
//!
//! The default layer always exists, holds every node implicitly and never
//! stores overrides. Every other layer has an explicit member set and a
//! sparse map of per-node overrides; absent override fields fall back to the
//! node's base attributes at projection time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::color::Rgb;
use crate::error::{EntityKind, MapError, MapResult};

pub const DEFAULT_LAYER_ID: &str = "0";
pub const DEFAULT_LAYER_NAME: &str = "All";

pub fn is_default_layer(layer_id: &str) -> bool {
    layer_id == DEFAULT_LAYER_ID
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    /// Always empty for the default layer, whose membership is implicit.
    #[serde(default)]
    pub members: BTreeSet<String>,
}

impl Layer {
    pub fn is_default(&self) -> bool {
        is_default_layer(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
}

impl LayerOverride {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.color.is_none()
    }
}

/// Partial update of a [`LayerOverride`]. `None` leaves a field untouched,
/// `Some(None)` clears it, `Some(Some(v))` sets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverridePatch {
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub x: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub y: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub color: Option<Option<Rgb>>,
}

// An explicit `null` must mean "clear", not "absent".
fn deserialize_present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl OverridePatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(Some(x)),
            y: Some(Some(y)),
            color: None,
        }
    }

    pub fn color(color: Rgb) -> Self {
        Self {
            color: Some(Some(color)),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, target: &mut LayerOverride) {
        if let Some(x) = self.x {
            target.x = x;
        }
        if let Some(y) = self.y {
            target.y = y;
        }
        if let Some(color) = self.color {
            target.color = color;
        }
    }
}

impl From<LayerOverride> for OverridePatch {
    fn from(value: LayerOverride) -> Self {
        Self {
            x: value.x.map(Some),
            y: value.y.map(Some),
            color: value.color.map(Some),
        }
    }
}

/// Persisted shape of a non-default layer, overrides included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, LayerOverride>,
}

#[derive(Debug, Clone)]
pub struct LayerStore {
    layers: Vec<Layer>,
    overrides: BTreeMap<String, BTreeMap<String, LayerOverride>>,
    next_id: u64,
    dirty: bool,
}

impl Default for LayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerStore {
    pub fn new() -> Self {
        Self {
            layers: vec![Layer {
                id: DEFAULT_LAYER_ID.to_string(),
                name: DEFAULT_LAYER_NAME.to_string(),
                members: BTreeSet::new(),
            }],
            overrides: BTreeMap::new(),
            next_id: 1,
            dirty: false,
        }
    }

    /// Rebuilds a store from persisted layers. Records claiming the default
    /// id are ignored; the default layer is always synthesized.
    pub fn from_records(records: Vec<LayerRecord>) -> MapResult<Self> {
        let mut store = Self::new();
        for record in records {
            if is_default_layer(&record.id) {
                continue;
            }
            store.insert_layer(&record.id, &record.name)?;
            store.replace_members(&record.id, record.members);
            let overrides: BTreeMap<String, LayerOverride> = record
                .overrides
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .collect();
            if !overrides.is_empty() {
                store.overrides.insert(record.id, overrides);
            }
        }
        store.dirty = false;
        Ok(store)
    }

    pub fn to_records(&self) -> Vec<LayerRecord> {
        self.layers
            .iter()
            .filter(|layer| !layer.is_default())
            .map(|layer| LayerRecord {
                id: layer.id.clone(),
                name: layer.name.clone(),
                members: layer.members.iter().cloned().collect(),
                overrides: self.overrides.get(&layer.id).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, layer_id: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == layer_id)
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.layer(layer_id).is_some()
    }

    /// Resolves a layer by id first, then by name.
    pub fn resolve(&self, id_or_name: &str) -> Option<&Layer> {
        self.layer(id_or_name)
            .or_else(|| self.layers.iter().find(|layer| layer.name == id_or_name))
    }

    pub fn is_member(&self, layer_id: &str, node_id: &str) -> bool {
        if is_default_layer(layer_id) {
            return true;
        }
        self.layer(layer_id)
            .is_some_and(|layer| layer.members.contains(node_id))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Id the next [`LayerStore::create_layer`] call hands out.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Raises the id counter to at least `next_id`. Persisted stores carry
    /// their counter so ids of deleted layers stay retired after a reload.
    pub fn reserve_ids_below(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn validate_new_name(&self, name: &str, except: Option<&str>) -> MapResult<()> {
        if name.trim().is_empty() {
            return Err(MapError::invalid_state("layer name cannot be empty"));
        }
        let taken = self.layers.iter().any(|layer| {
            !layer.is_default() && layer.name == name && Some(layer.id.as_str()) != except
        });
        if taken {
            return Err(MapError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Checks that `layer_id` names an existing non-default layer.
    /// `action` completes "the default layer cannot be ...".
    pub fn ensure_mutable(&self, layer_id: &str, action: &'static str) -> MapResult<()> {
        if is_default_layer(layer_id) {
            return Err(MapError::ProtectedLayer(action));
        }
        if !self.contains(layer_id) {
            return Err(MapError::not_found(EntityKind::Layer, layer_id));
        }
        Ok(())
    }

    pub fn create_layer(&mut self, name: &str) -> MapResult<String> {
        self.validate_new_name(name, None)?;
        let id = self.next_id.to_string();
        self.insert_layer(&id, name)?;
        Ok(id)
    }

    /// Adds a layer whose id was allocated elsewhere, e.g. by the study
    /// service.
    pub fn insert_layer(&mut self, layer_id: &str, name: &str) -> MapResult<()> {
        if is_default_layer(layer_id) {
            return Err(MapError::ProtectedLayer("recreated"));
        }
        if self.contains(layer_id) {
            return Err(MapError::invalid_state(format!(
                "layer id '{layer_id}' is already in use"
            )));
        }
        self.validate_new_name(name, None)?;

        if let Ok(numeric) = layer_id.parse::<u64>() {
            self.next_id = self.next_id.max(numeric.saturating_add(1));
        }
        self.layers.push(Layer {
            id: layer_id.to_string(),
            name: name.to_string(),
            members: BTreeSet::new(),
        });
        self.dirty = true;
        Ok(())
    }

    pub fn rename_layer(&mut self, layer_id: &str, name: &str) -> MapResult<()> {
        self.ensure_mutable(layer_id, "renamed")?;
        self.validate_new_name(name, Some(layer_id))?;
        if let Some(layer) = self.layers.iter_mut().find(|layer| layer.id == layer_id) {
            layer.name = name.to_string();
        }
        self.dirty = true;
        Ok(())
    }

    pub fn delete_layer(&mut self, layer_id: &str) -> MapResult<()> {
        self.ensure_mutable(layer_id, "deleted")?;
        self.layers.retain(|layer| layer.id != layer_id);
        self.overrides.remove(layer_id);
        self.dirty = true;
        Ok(())
    }

    pub fn set_layer_membership<I>(&mut self, layer_id: &str, node_ids: I) -> MapResult<()>
    where
        I: IntoIterator<Item = String>,
    {
        self.ensure_mutable(layer_id, "given explicit members")?;
        self.replace_members(layer_id, node_ids);
        self.dirty = true;
        Ok(())
    }

    fn replace_members<I>(&mut self, layer_id: &str, node_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        if let Some(layer) = self.layers.iter_mut().find(|layer| layer.id == layer_id) {
            layer.members = node_ids.into_iter().collect();
        }
    }

    /// Creates or merges the override for `node_id` on `layer_id` and
    /// returns the merged value.
    pub fn set_override(
        &mut self,
        layer_id: &str,
        node_id: &str,
        patch: OverridePatch,
    ) -> MapResult<LayerOverride> {
        self.ensure_mutable(layer_id, "given overrides")?;

        let per_layer = self.overrides.entry(layer_id.to_string()).or_default();
        let mut merged = per_layer.get(node_id).copied().unwrap_or_default();
        patch.apply_to(&mut merged);

        if merged.is_empty() {
            per_layer.remove(node_id);
        } else {
            per_layer.insert(node_id.to_string(), merged);
        }
        if per_layer.is_empty() {
            self.overrides.remove(layer_id);
        }
        self.dirty = true;
        Ok(merged)
    }

    pub fn get_override(&self, layer_id: &str, node_id: &str) -> Option<&LayerOverride> {
        self.overrides
            .get(layer_id)
            .and_then(|per_layer| per_layer.get(node_id))
    }

    pub fn clear_override(&mut self, layer_id: &str, node_id: &str) -> MapResult<bool> {
        self.ensure_mutable(layer_id, "given overrides")?;
        let Some(per_layer) = self.overrides.get_mut(layer_id) else {
            return Ok(false);
        };
        let removed = per_layer.remove(node_id).is_some();
        if per_layer.is_empty() {
            self.overrides.remove(layer_id);
        }
        if removed {
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Drops a deleted node from every member set and override map.
    pub fn forget_node(&mut self, node_id: &str) {
        let mut changed = false;
        for layer in &mut self.layers {
            changed |= layer.members.remove(node_id);
        }
        self.overrides.retain(|_, per_layer| {
            changed |= per_layer.remove(node_id).is_some();
            !per_layer.is_empty()
        });
        if changed {
            self.dirty = true;
        }
    }
}

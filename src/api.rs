//! Contract of the study service the map engine talks to.
//!
//! Implementations report failures as `anyhow` errors; the controller
//! surfaces them as [`crate::MapError::Network`] without retrying.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::graph::Graph;
use crate::layers::{LayerRecord, OverridePatch};

#[allow(async_fn_in_trait)]
pub trait StudyApi {
    async fn fetch_graph(&self, study_id: &str) -> Result<Graph>;

    async fn create_link(&self, study_id: &str, source: &str, target: &str) -> Result<String>;

    async fn delete_node(&self, study_id: &str, node_id: &str) -> Result<()>;

    async fn delete_link(&self, study_id: &str, source: &str, target: &str) -> Result<()>;

    /// Writes a node's base attributes. Only used for the default layer.
    async fn update_node_position(
        &self,
        study_id: &str,
        node_id: &str,
        x: f64,
        y: f64,
        color: Option<Rgb>,
    ) -> Result<()>;

    async fn fetch_layers(&self, study_id: &str) -> Result<Vec<LayerRecord>>;

    async fn create_layer(&self, study_id: &str, name: &str) -> Result<String>;

    async fn rename_layer(&self, study_id: &str, layer_id: &str, name: &str) -> Result<()>;

    async fn delete_layer(&self, study_id: &str, layer_id: &str) -> Result<()>;

    async fn set_layer_membership(
        &self,
        study_id: &str,
        layer_id: &str,
        node_ids: &[String],
    ) -> Result<()>;

    async fn set_layer_override(
        &self,
        study_id: &str,
        layer_id: &str,
        node_id: &str,
        patch: &OverridePatch,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRequest {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNameRequest {
    pub name: String,
}

use serde::{Deserialize, Serialize};

use crate::color::{LabelColor, Rgb, select_label_color};
use crate::graph::Node;
use crate::layers::{LayerOverride, LayerStore, is_default_layer};
use crate::sizing::estimate_width;

/// Render-ready attributes of a node under one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedNode {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub color: Rgb,
    pub label_color: LabelColor,
    pub width: f64,
    /// Whether the node belongs to the projected layer. Always true on the
    /// default layer.
    pub member: bool,
}

fn active_override<'a>(
    node: &Node,
    layers: &'a LayerStore,
    layer_id: &str,
) -> Option<&'a LayerOverride> {
    if is_default_layer(layer_id) {
        return None;
    }
    layers.get_override(layer_id, &node.id)
}

/// Position the node is drawn at on `layer_id`.
pub fn effective_position(node: &Node, layers: &LayerStore, layer_id: &str) -> (f64, f64) {
    match active_override(node, layers, layer_id) {
        Some(o) => (o.x.unwrap_or(node.x), o.y.unwrap_or(node.y)),
        None => (node.x, node.y),
    }
}

pub fn effective_color(node: &Node, layers: &LayerStore, layer_id: &str) -> Rgb {
    active_override(node, layers, layer_id)
        .and_then(|o| o.color)
        .unwrap_or(node.color)
}

pub fn project_node(node: &Node, layers: &LayerStore, active_layer_id: &str) -> ProjectedNode {
    let (x, y) = effective_position(node, layers, active_layer_id);
    let color = effective_color(node, layers, active_layer_id);

    ProjectedNode {
        id: node.id.clone(),
        name: node.name.clone(),
        x,
        y,
        color,
        label_color: select_label_color(color),
        width: estimate_width(&node.name),
        member: layers.is_member(active_layer_id, &node.id),
    }
}

/// Projects every node onto `active_layer_id`, in input order.
pub fn project(nodes: &[Node], layers: &LayerStore, active_layer_id: &str) -> Vec<ProjectedNode> {
    nodes
        .iter()
        .map(|node| project_node(node, layers, active_layer_id))
        .collect()
}

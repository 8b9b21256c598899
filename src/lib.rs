//! Layered area maps for power-system studies.
//!
//! A study is a graph of areas (nodes) and interconnections (links). Layers
//! overlay per-node positions and colors on top of the base attributes;
//! [`DiagramController`] keeps one study on screen, turns user gestures into
//! study-service requests and commits local state only once they succeed.

pub mod api;
#[cfg(not(target_arch = "wasm32"))]
pub mod client;
pub mod color;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod layers;
pub mod projection;
pub mod render;
pub mod selection;
#[cfg(feature = "server")]
pub mod serve;
pub mod sizing;
pub mod study;

pub use api::StudyApi;
#[cfg(not(target_arch = "wasm32"))]
pub use client::HttpStudyApi;
pub use color::{LabelColor, Rgb, contrast_ratio, select_label_color};
pub use config::{ApiConfig, ServeConfig};
pub use controller::{CommitOutcome, DiagramController};
pub use error::{EntityKind, MapError, MapResult};
pub use graph::{Graph, Link, Node, link_identifier};
pub use layers::{
    DEFAULT_LAYER_ID, DEFAULT_LAYER_NAME, Layer, LayerOverride, LayerRecord, LayerStore,
    OverridePatch,
};
pub use projection::{ProjectedNode, project, project_node};
pub use render::{Highlight, RenderModel, RenderSurface, SvgSurface, render_svg};
pub use selection::{Selection, SelectionController, SelectionEffect};
pub use sizing::estimate_width;
pub use study::StudyDocument;

use std::fmt::Write as FmtWrite;

use anyhow::Result;
use log::warn;
use serde::Serialize;

use crate::graph::Graph;
use crate::layers::LayerStore;
use crate::projection::{ProjectedNode, project};
use crate::selection::{Selection, SelectionController};

pub const NODE_HEIGHT: f64 = 30.0;
const CANVAS_MARGIN: f64 = 40.0;
const HIGHLIGHT_STROKE: &str = "#f5a623";
const LINK_STROKE: &str = "#4a5568";

/// What the rendering host should emphasize. Kept apart from
/// [`RenderModel`] because hosts track it through their own side channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Highlight {
    #[default]
    None,
    Node(String),
    Link(String),
}

impl From<&Selection> for Highlight {
    fn from(selection: &Selection) -> Self {
        match selection {
            Selection::Empty => Highlight::None,
            Selection::Node(id) => Highlight::Node(id.clone()),
            Selection::Link { id, .. } => Highlight::Link(id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderLink {
    pub id: String,
    pub source: String,
    pub target: String,
    pub from: (f64, f64),
    pub to: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderModel {
    pub layer_id: String,
    pub nodes: Vec<ProjectedNode>,
    pub links: Vec<RenderLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_link_source: Option<String>,
}

impl RenderModel {
    pub fn build(
        graph: &Graph,
        layers: &LayerStore,
        layer_id: &str,
        selection: &SelectionController,
    ) -> Self {
        let nodes = project(&graph.nodes, layers, layer_id);

        let position = |id: &str| {
            nodes
                .iter()
                .find(|node| node.id == id)
                .map(|node| (node.x, node.y))
        };

        let links = graph
            .links
            .iter()
            .filter_map(|link| {
                Some(RenderLink {
                    id: link.id(),
                    source: link.source.clone(),
                    target: link.target.clone(),
                    from: position(&link.source)?,
                    to: position(&link.target)?,
                })
            })
            .collect();

        Self {
            layer_id: layer_id.to_string(),
            nodes,
            links,
            pending_link_source: selection.pending_link_source().map(str::to_string),
        }
    }

    pub fn node(&self, id: &str) -> Option<&ProjectedNode> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

/// The rendering host. It paints projected nodes and links and keeps its
/// own notion of what is highlighted.
pub trait RenderSurface {
    fn draw(&mut self, model: &RenderModel);

    fn set_highlighted(&mut self, highlight: &Highlight);

    fn clear_highlight(&mut self) {
        self.set_highlighted(&Highlight::None);
    }
}

/// Paints into an SVG document kept in memory.
#[derive(Debug, Clone)]
pub struct SvgSurface {
    background: String,
    highlight: Highlight,
    model: Option<RenderModel>,
    svg: Option<String>,
}

impl SvgSurface {
    pub fn new(background: impl Into<String>) -> Self {
        Self {
            background: background.into(),
            highlight: Highlight::None,
            model: None,
            svg: None,
        }
    }

    pub fn svg(&self) -> Option<&str> {
        self.svg.as_deref()
    }

    pub fn highlight(&self) -> &Highlight {
        &self.highlight
    }

    fn repaint(&mut self) {
        let Some(model) = &self.model else {
            return;
        };
        match render_svg(model, &self.highlight, &self.background) {
            Ok(svg) => self.svg = Some(svg),
            Err(err) => warn!("failed to paint layer '{}': {err:#}", model.layer_id),
        }
    }
}

impl RenderSurface for SvgSurface {
    fn draw(&mut self, model: &RenderModel) {
        self.model = Some(model.clone());
        self.repaint();
    }

    fn set_highlighted(&mut self, highlight: &Highlight) {
        if &self.highlight == highlight {
            return;
        }
        self.highlight = highlight.clone();
        self.repaint();
    }
}

struct Bounds {
    min_x: f64,
    min_y: f64,
    width: f64,
    height: f64,
}

fn bounds(model: &RenderModel) -> Bounds {
    if model.nodes.is_empty() {
        return Bounds {
            min_x: 0.0,
            min_y: 0.0,
            width: CANVAS_MARGIN * 2.0,
            height: CANVAS_MARGIN * 2.0,
        };
    }

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for node in &model.nodes {
        let half_w = node.width.max(NODE_HEIGHT) / 2.0;
        let half_h = NODE_HEIGHT / 2.0;
        min_x = min_x.min(node.x - half_w);
        max_x = max_x.max(node.x + half_w);
        min_y = min_y.min(node.y - half_h);
        max_y = max_y.max(node.y + half_h);
    }

    Bounds {
        min_x: min_x - CANVAS_MARGIN,
        min_y: min_y - CANVAS_MARGIN,
        width: max_x - min_x + CANVAS_MARGIN * 2.0,
        height: max_y - min_y + CANVAS_MARGIN * 2.0,
    }
}

pub fn render_svg(model: &RenderModel, highlight: &Highlight, background: &str) -> Result<String> {
    let area = bounds(model);
    let shift = |(x, y): (f64, f64)| (x - area.min_x, y - area.min_y);

    let mut svg = String::new();
    write!(
        svg,
        r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}" font-family="Inter, system-ui, sans-serif" data-layer="{}">
  <rect width="100%" height="100%" fill="{}" />
"##,
        area.width,
        area.height,
        area.width,
        area.height,
        escape_xml(&model.layer_id),
        escape_xml(background)
    )?;

    for link in &model.links {
        let (x1, y1) = shift(link.from);
        let (x2, y2) = shift(link.to);
        let (stroke, stroke_width) = if matches!(highlight, Highlight::Link(id) if *id == link.id) {
            (HIGHLIGHT_STROKE, 4)
        } else {
            (LINK_STROKE, 2)
        };
        writeln!(
            svg,
            "  <line data-link=\"{}\" x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"{}\" stroke-width=\"{}\" />",
            escape_xml(&link.id),
            x1,
            y1,
            x2,
            y2,
            stroke,
            stroke_width
        )?;
    }

    for node in &model.nodes {
        let (cx, cy) = shift((node.x, node.y));
        let width = node.width.max(NODE_HEIGHT);
        let opacity = if node.member { 1.0 } else { 0.35 };

        let mut stroke_attr = String::new();
        if matches!(highlight, Highlight::Node(id) if *id == node.id) {
            write!(stroke_attr, " stroke=\"{HIGHLIGHT_STROKE}\" stroke-width=\"3\"")?;
        } else if model.pending_link_source.as_deref() == Some(node.id.as_str()) {
            write!(
                stroke_attr,
                " stroke=\"{HIGHLIGHT_STROKE}\" stroke-width=\"2\" stroke-dasharray=\"4 3\""
            )?;
        }

        writeln!(
            svg,
            "  <g data-node=\"{}\" opacity=\"{:.2}\">",
            escape_xml(&node.id),
            opacity
        )?;
        writeln!(
            svg,
            "    <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"{:.1}\" ry=\"{:.1}\" fill=\"{}\"{} />",
            cx - width / 2.0,
            cy - NODE_HEIGHT / 2.0,
            width,
            NODE_HEIGHT,
            NODE_HEIGHT / 2.0,
            NODE_HEIGHT / 2.0,
            node.color.to_hex(),
            stroke_attr
        )?;
        writeln!(
            svg,
            "    <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{}\" font-size=\"16\" text-anchor=\"middle\" dominant-baseline=\"middle\">{}</text>",
            cx,
            cy,
            node.label_color,
            escape_xml(&node.name)
        )?;
        svg.push_str("  </g>\n");
    }

    svg.push_str("</svg>\n");
    Ok(svg)
}

pub fn escape_xml(input: &str) -> String {
    let mut escaped = String::new();
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

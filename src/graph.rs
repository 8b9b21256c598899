use serde::{Deserialize, Serialize};

use crate::color::Rgb;

/// A study area as reported by the study service, with its base
/// (default layer) position and color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub color: Rgb,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, x: f64, y: f64, color: Rgb) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            x,
            y,
            color,
        }
    }
}

/// An interconnection between two areas. Orientation is whatever the
/// service reported; identity is orientation-free, see [`link_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub source: String,
    pub target: String,
}

impl Link {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn id(&self) -> String {
        link_identifier(&self.source, &self.target)
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Identifier of the link between `a` and `b`, identical for both
/// orientations. Backslashes and slashes inside node ids are escaped so the
/// ` / ` separator is the only bare slash and distinct pairs never collide.
pub fn link_identifier(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{} / {}", escape_endpoint(first), escape_endpoint(second))
}

fn escape_endpoint(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for ch in id.chars() {
        if matches!(ch, '\\' | '/') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn link(&self, id: &str) -> Option<&Link> {
        self.links.iter().find(|link| link.id() == id)
    }

    /// Adds the link unless one already joins the same pair. Returns its id.
    pub fn insert_link(&mut self, link: Link) -> String {
        let id = link.id();
        if self.link(&id).is_none() {
            self.links.push(link);
        }
        id
    }

    pub fn remove_link(&mut self, id: &str) -> bool {
        let before = self.links.len();
        self.links.retain(|link| link.id() != id);
        before != self.links.len()
    }

    /// Removes the node and every link touching it.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|node| node.id != node_id);
        let existed = before != self.nodes.len();
        if existed {
            self.links.retain(|link| !link.touches(node_id));
        }
        existed
    }
}

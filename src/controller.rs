//! Orchestrates one displayed study: owns the graph, the layer store and the
//! selection state, feeds projections to the rendering surface and turns
//! surface events into study-service requests.
//!
//! Everything runs on one logical thread. Requests to the study service are
//! the only suspension points; local state is committed only after the
//! service accepted the change, and only if the study is still the one that
//! issued the request. Node attribute writes are queued per node so a later
//! drag can never be overwritten by an earlier one.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::api::StudyApi;
use crate::color::Rgb;
use crate::error::{EntityKind, MapError, MapResult};
use crate::graph::{Graph, Link, Node, link_identifier};
use crate::layers::{
    DEFAULT_LAYER_ID, Layer, LayerOverride, LayerStore, OverridePatch, is_default_layer,
};
use crate::projection::{effective_color, effective_position};
use crate::render::{Highlight, RenderModel, RenderSurface};
use crate::selection::{Selection, SelectionController, SelectionEffect};

/// Result of a node attribute write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The service accepted the write and local state was updated.
    Committed,
    /// The value already matched; nothing was sent.
    Unchanged,
    /// The service accepted the write after the study was closed or
    /// reloaded, so local state was left alone.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeUpdate {
    Position { x: f64, y: f64 },
    Color(Rgb),
}

struct StudyState {
    study_id: String,
    graph: Graph,
    layers: LayerStore,
    selection: SelectionController,
    active_layer: String,
}

impl StudyState {
    fn node(&self, node_id: &str) -> MapResult<&Node> {
        self.graph
            .node(node_id)
            .ok_or_else(|| MapError::not_found(EntityKind::Node, node_id))
    }

    fn render_model(&self) -> RenderModel {
        RenderModel::build(&self.graph, &self.layers, &self.active_layer, &self.selection)
    }
}

pub struct DiagramController<A, S> {
    api: A,
    surface: RefCell<S>,
    state: RefCell<Option<StudyState>>,
    node_queues: RefCell<HashMap<String, Rc<Mutex<()>>>>,
    epoch: Cell<u64>,
}

fn network(err: anyhow::Error) -> MapError {
    warn!("study service request failed: {err:#}");
    MapError::Network(err)
}

impl<A: StudyApi, S: RenderSurface> DiagramController<A, S> {
    pub fn new(api: A, surface: S) -> Self {
        Self {
            api,
            surface: RefCell::new(surface),
            state: RefCell::new(None),
            node_queues: RefCell::new(HashMap::new()),
            epoch: Cell::new(0),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn surface(&self) -> Ref<'_, S> {
        self.surface.borrow()
    }

    fn with_state<T>(&self, f: impl FnOnce(&StudyState) -> MapResult<T>) -> MapResult<T> {
        let state = self.state.borrow();
        let state = state
            .as_ref()
            .ok_or_else(|| MapError::invalid_state("no study is loaded"))?;
        f(state)
    }

    fn with_state_mut<T>(&self, f: impl FnOnce(&mut StudyState) -> MapResult<T>) -> MapResult<T> {
        let mut state = self.state.borrow_mut();
        let state = state
            .as_mut()
            .ok_or_else(|| MapError::invalid_state("no study is loaded"))?;
        f(state)
    }

    /// Runs `f` only if the study that issued a request is still displayed.
    fn commit<T>(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut StudyState) -> MapResult<T>,
    ) -> MapResult<Option<T>> {
        if self.epoch.get() != epoch {
            return Ok(None);
        }
        self.with_state_mut(f).map(Some)
    }

    pub fn study_id(&self) -> Option<String> {
        self.state
            .borrow()
            .as_ref()
            .map(|state| state.study_id.clone())
    }

    pub fn active_layer(&self) -> Option<String> {
        self.state
            .borrow()
            .as_ref()
            .map(|state| state.active_layer.clone())
    }

    pub fn selection(&self) -> Selection {
        self.state
            .borrow()
            .as_ref()
            .map(|state| state.selection.selection().clone())
            .unwrap_or_default()
    }

    pub fn pending_link_source(&self) -> Option<String> {
        self.state
            .borrow()
            .as_ref()
            .and_then(|state| state.selection.pending_link_source().map(str::to_string))
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.state
            .borrow()
            .as_ref()
            .map(|state| state.layers.layers().to_vec())
            .unwrap_or_default()
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.state
            .borrow()
            .as_ref()
            .and_then(|state| state.graph.node(node_id).cloned())
    }

    pub fn links(&self) -> Vec<Link> {
        self.state
            .borrow()
            .as_ref()
            .map(|state| state.graph.links.clone())
            .unwrap_or_default()
    }

    pub fn layer_override(&self, layer_id: &str, node_id: &str) -> Option<LayerOverride> {
        self.state
            .borrow()
            .as_ref()
            .and_then(|state| state.layers.get_override(layer_id, node_id).copied())
    }

    pub fn render_model(&self) -> Option<RenderModel> {
        self.state.borrow().as_ref().map(StudyState::render_model)
    }

    fn highlight(&self) -> Highlight {
        self.state
            .borrow()
            .as_ref()
            .map(|state| Highlight::from(state.selection.selection()))
            .unwrap_or_default()
    }

    /// Repaints with the current projection and selection.
    fn refresh(&self) {
        let Some(model) = self.render_model() else {
            return;
        };
        let highlight = self.highlight();
        let mut surface = self.surface.borrow_mut();
        surface.draw(&model);
        surface.set_highlighted(&highlight);
    }

    /// Repaints after node coordinates changed wholesale. Highlights drawn
    /// at the old coordinates go first.
    fn redraw_layer(&self) {
        self.surface.borrow_mut().clear_highlight();
        self.refresh();
    }

    fn teardown(&self) -> u64 {
        let epoch = self.epoch.get() + 1;
        self.epoch.set(epoch);
        self.state.borrow_mut().take();
        self.node_queues.borrow_mut().clear();
        self.surface.borrow_mut().clear_highlight();
        epoch
    }

    /// Forgets the displayed study. Requests still in flight for it are
    /// ignored when they resolve.
    pub fn close_study(&self) {
        self.teardown();
        debug!("study closed");
    }

    pub async fn load_study(&self, study_id: &str) -> MapResult<()> {
        let epoch = self.teardown();

        let graph = self.api.fetch_graph(study_id).await.map_err(network)?;
        let records = self.api.fetch_layers(study_id).await.map_err(network)?;

        if self.epoch.get() != epoch {
            debug!("load of study '{study_id}' superseded");
            return Ok(());
        }

        let layers = LayerStore::from_records(records)?;
        info!(
            "loaded study '{study_id}': {} nodes, {} links, {} layers",
            graph.nodes.len(),
            graph.links.len(),
            layers.layers().len()
        );

        *self.state.borrow_mut() = Some(StudyState {
            study_id: study_id.to_string(),
            graph,
            layers,
            selection: SelectionController::new(),
            active_layer: DEFAULT_LAYER_ID.to_string(),
        });
        self.redraw_layer();
        Ok(())
    }

    pub fn set_active_layer(&self, layer_id: &str) -> MapResult<()> {
        self.with_state_mut(|state| {
            if !state.layers.contains(layer_id) {
                return Err(MapError::not_found(EntityKind::Layer, layer_id));
            }
            state.active_layer = layer_id.to_string();
            Ok(())
        })?;
        debug!("active layer is now '{layer_id}'");
        self.redraw_layer();
        Ok(())
    }

    pub fn start_link_gesture(&self, node_id: &str) -> MapResult<()> {
        self.with_state_mut(|state| {
            state.node(node_id)?;
            state.selection.start_link_gesture(node_id);
            Ok(())
        })?;
        self.refresh();
        Ok(())
    }

    /// Handles a click on a node. Completing a link gesture creates the
    /// link and returns its identifier.
    pub async fn on_node_click(&self, node_id: &str) -> MapResult<Option<String>> {
        let effect = self.with_state_mut(|state| {
            state.node(node_id)?;
            Ok(state.selection.click_node(node_id))
        })?;
        self.refresh();

        match effect {
            Some(SelectionEffect::CreateLink { source, target }) => {
                self.create_link(&source, &target).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn on_link_click(&self, source: &str, target: &str) -> MapResult<()> {
        self.with_state_mut(|state| {
            let id = link_identifier(source, target);
            if state.graph.link(&id).is_none() {
                return Err(MapError::not_found(EntityKind::Link, id));
            }
            state.selection.click_link(source, target);
            Ok(())
        })?;
        self.refresh();
        Ok(())
    }

    pub fn on_background_click(&self) {
        let handled = self
            .with_state_mut(|state| {
                state.selection.click_background();
                Ok(())
            })
            .is_ok();
        if handled {
            self.refresh();
        }
    }

    async fn create_link(&self, source: &str, target: &str) -> MapResult<String> {
        let epoch = self.epoch.get();
        let study_id = self.with_state(|state| Ok(state.study_id.clone()))?;

        let id = self
            .api
            .create_link(&study_id, source, target)
            .await
            .map_err(network)?;

        let committed = self.commit(epoch, |state| {
            state.graph.insert_link(Link::new(source, target));
            Ok(())
        })?;
        if committed.is_some() {
            info!("created link {id}");
            self.refresh();
        }
        Ok(id)
    }

    /// Deletes whatever is selected. Selection and graph change only once
    /// the service confirmed the deletion.
    pub async fn request_delete_selected(&self) -> MapResult<()> {
        let epoch = self.epoch.get();
        let (study_id, effect) = self.with_state(|state| {
            Ok((state.study_id.clone(), state.selection.pending_delete()?))
        })?;

        match effect {
            SelectionEffect::DeleteNode { node_id } => {
                self.api
                    .delete_node(&study_id, &node_id)
                    .await
                    .map_err(network)?;
                let committed = self.commit(epoch, |state| {
                    state.graph.remove_node(&node_id);
                    state.layers.forget_node(&node_id);
                    state.layers.mark_clean();
                    state.selection.forget_node(&node_id);
                    Ok(())
                })?;
                if committed.is_some() {
                    self.node_queues.borrow_mut().remove(&node_id);
                    info!("deleted node '{node_id}'");
                }
            }
            SelectionEffect::DeleteLink { source, target } => {
                self.api
                    .delete_link(&study_id, &source, &target)
                    .await
                    .map_err(network)?;
                let id = link_identifier(&source, &target);
                let committed = self.commit(epoch, |state| {
                    state.graph.remove_link(&id);
                    state.selection.forget_link(&id);
                    Ok(())
                })?;
                if committed.is_some() {
                    info!("deleted link {id}");
                }
            }
            SelectionEffect::CreateLink { .. } => {
                return Err(MapError::invalid_state("deletion produced a link request"));
            }
        }

        self.refresh();
        Ok(())
    }

    /// Persists a dragged node position on the layer active when the drag
    /// ended.
    pub async fn on_node_drag_end(&self, node_id: &str, x: f64, y: f64) -> MapResult<CommitOutcome> {
        self.update_node(node_id, NodeUpdate::Position { x, y })
            .await
    }

    /// Recolors a node on the active layer.
    pub async fn set_node_color(&self, node_id: &str, color: Rgb) -> MapResult<CommitOutcome> {
        self.update_node(node_id, NodeUpdate::Color(color)).await
    }

    fn node_queue(&self, node_id: &str) -> Rc<Mutex<()>> {
        self.node_queues
            .borrow_mut()
            .entry(node_id.to_string())
            .or_default()
            .clone()
    }

    async fn update_node(&self, node_id: &str, update: NodeUpdate) -> MapResult<CommitOutcome> {
        let epoch = self.epoch.get();
        let (study_id, layer_id) = self.with_state(|state| {
            state.node(node_id)?;
            Ok((state.study_id.clone(), state.active_layer.clone()))
        })?;

        let queue = self.node_queue(node_id);
        let _turn = queue.lock().await;

        if self.epoch.get() != epoch {
            return Ok(CommitOutcome::Discarded);
        }

        let (unchanged, base) = self.with_state(|state| {
            let node = state.node(node_id)?;
            if !state.layers.contains(&layer_id) {
                return Err(MapError::not_found(EntityKind::Layer, layer_id.as_str()));
            }
            let unchanged = match update {
                NodeUpdate::Position { x, y } => {
                    effective_position(node, &state.layers, &layer_id) == (x, y)
                }
                NodeUpdate::Color(color) => {
                    effective_color(node, &state.layers, &layer_id) == color
                }
            };
            Ok((unchanged, node.clone()))
        })?;
        if unchanged {
            debug!("node '{node_id}' already at {update:?} on layer '{layer_id}'");
            return Ok(CommitOutcome::Unchanged);
        }

        let patch = match update {
            NodeUpdate::Position { x, y } => OverridePatch::position(x, y),
            NodeUpdate::Color(color) => OverridePatch::color(color),
        };

        if is_default_layer(&layer_id) {
            let (x, y, color) = match update {
                NodeUpdate::Position { x, y } => (x, y, None),
                NodeUpdate::Color(color) => (base.x, base.y, Some(color)),
            };
            self.api
                .update_node_position(&study_id, node_id, x, y, color)
                .await
                .map_err(network)?;
        } else {
            self.api
                .set_layer_override(&study_id, &layer_id, node_id, &patch)
                .await
                .map_err(network)?;
        }

        let committed = self.commit(epoch, |state| {
            if is_default_layer(&layer_id) {
                let node = state
                    .graph
                    .node_mut(node_id)
                    .ok_or_else(|| MapError::not_found(EntityKind::Node, node_id))?;
                match update {
                    NodeUpdate::Position { x, y } => {
                        node.x = x;
                        node.y = y;
                    }
                    NodeUpdate::Color(color) => node.color = color,
                }
            } else {
                state.node(node_id)?;
                state.layers.set_override(&layer_id, node_id, patch)?;
                state.layers.mark_clean();
            }
            Ok(())
        })?;

        if committed.is_none() {
            debug!("discarding write for node '{node_id}' of a closed study");
            return Ok(CommitOutcome::Discarded);
        }

        info!("node '{node_id}' updated on layer '{layer_id}'");
        if self.active_layer().as_deref() == Some(layer_id.as_str()) {
            self.refresh();
        }
        Ok(CommitOutcome::Committed)
    }

    pub async fn create_layer(&self, name: &str) -> MapResult<String> {
        let epoch = self.epoch.get();
        let study_id = self.with_state(|state| {
            state.layers.validate_new_name(name, None)?;
            Ok(state.study_id.clone())
        })?;

        let layer_id = self
            .api
            .create_layer(&study_id, name)
            .await
            .map_err(network)?;

        self.commit(epoch, |state| {
            state.layers.insert_layer(&layer_id, name)?;
            state.layers.mark_clean();
            Ok(())
        })?;
        info!("created layer '{name}' ({layer_id})");
        Ok(layer_id)
    }

    pub async fn rename_layer(&self, layer_id: &str, name: &str) -> MapResult<()> {
        let epoch = self.epoch.get();
        let study_id = self.with_state(|state| {
            state.layers.ensure_mutable(layer_id, "renamed")?;
            state.layers.validate_new_name(name, Some(layer_id))?;
            Ok(state.study_id.clone())
        })?;

        self.api
            .rename_layer(&study_id, layer_id, name)
            .await
            .map_err(network)?;

        self.commit(epoch, |state| {
            state.layers.rename_layer(layer_id, name)?;
            state.layers.mark_clean();
            Ok(())
        })?;
        Ok(())
    }

    /// Deletes a layer. If it was active the default layer takes over.
    pub async fn delete_layer(&self, layer_id: &str) -> MapResult<()> {
        let epoch = self.epoch.get();
        let study_id = self.with_state(|state| {
            state.layers.ensure_mutable(layer_id, "deleted")?;
            Ok(state.study_id.clone())
        })?;

        self.api
            .delete_layer(&study_id, layer_id)
            .await
            .map_err(network)?;

        let was_active = self.commit(epoch, |state| {
            state.layers.delete_layer(layer_id)?;
            state.layers.mark_clean();
            let was_active = state.active_layer == layer_id;
            if was_active {
                state.active_layer = DEFAULT_LAYER_ID.to_string();
            }
            Ok(was_active)
        })?;

        if was_active == Some(true) {
            self.redraw_layer();
        }
        Ok(())
    }

    pub async fn set_layer_membership(&self, layer_id: &str, node_ids: Vec<String>) -> MapResult<()> {
        let epoch = self.epoch.get();
        let study_id = self.with_state(|state| {
            state.layers.ensure_mutable(layer_id, "given explicit members")?;
            for node_id in &node_ids {
                state.node(node_id)?;
            }
            Ok(state.study_id.clone())
        })?;

        self.api
            .set_layer_membership(&study_id, layer_id, &node_ids)
            .await
            .map_err(network)?;

        let committed = self.commit(epoch, |state| {
            state.layers.set_layer_membership(layer_id, node_ids)?;
            state.layers.mark_clean();
            Ok(state.active_layer == layer_id)
        })?;

        if committed == Some(true) {
            self.refresh();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::{Result, anyhow, bail};
    use tokio::sync::oneshot;

    use super::*;
    use crate::layers::LayerRecord;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CreateLink(String, String),
        DeleteNode(String),
        DeleteLink(String, String),
        Position(String, f64, f64, Option<Rgb>),
        CreateLayer(String),
        RenameLayer(String, String),
        DeleteLayer(String),
        Membership(String, Vec<String>),
        Override(String, String, OverridePatch),
    }

    /// Scripted study service. Mutating calls are recorded; when gated they
    /// park until the test resolves them in order.
    #[derive(Default)]
    struct MockApi {
        graph: RefCell<Graph>,
        layers: RefCell<Vec<LayerRecord>>,
        calls: RefCell<Vec<Call>>,
        gated: Cell<bool>,
        gates: RefCell<VecDeque<oneshot::Sender<Result<()>>>>,
        fail_next: RefCell<Option<String>>,
        next_layer_id: Cell<u32>,
    }

    impl MockApi {
        fn with_graph(graph: Graph, layers: Vec<LayerRecord>) -> Self {
            let api = Self::default();
            *api.graph.borrow_mut() = graph;
            *api.layers.borrow_mut() = layers;
            api.next_layer_id.set(10);
            api
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn gate(&self, gated: bool) {
            self.gated.set(gated);
        }

        fn fail_next(&self, message: &str) {
            *self.fail_next.borrow_mut() = Some(message.to_string());
        }

        fn resolve_next(&self, result: Result<()>) {
            let sender = self
                .gates
                .borrow_mut()
                .pop_front()
                .expect("no request is waiting");
            let _ = sender.send(result);
        }

        /// Resolves the most recently parked request ahead of older ones.
        fn resolve_last(&self, result: Result<()>) {
            let sender = self
                .gates
                .borrow_mut()
                .pop_back()
                .expect("no request is waiting");
            let _ = sender.send(result);
        }

        async fn record(&self, call: Call) -> Result<()> {
            self.calls.borrow_mut().push(call);
            if let Some(message) = self.fail_next.borrow_mut().take() {
                bail!(message);
            }
            if self.gated.get() {
                let (tx, rx) = oneshot::channel();
                self.gates.borrow_mut().push_back(tx);
                return rx.await.map_err(|_| anyhow!("request dropped"))?;
            }
            Ok(())
        }
    }

    impl StudyApi for MockApi {
        async fn fetch_graph(&self, _study_id: &str) -> Result<Graph> {
            Ok(self.graph.borrow().clone())
        }

        async fn create_link(&self, _study_id: &str, source: &str, target: &str) -> Result<String> {
            self.record(Call::CreateLink(source.into(), target.into()))
                .await?;
            Ok(link_identifier(source, target))
        }

        async fn delete_node(&self, _study_id: &str, node_id: &str) -> Result<()> {
            self.record(Call::DeleteNode(node_id.into())).await
        }

        async fn delete_link(&self, _study_id: &str, source: &str, target: &str) -> Result<()> {
            self.record(Call::DeleteLink(source.into(), target.into()))
                .await
        }

        async fn update_node_position(
            &self,
            _study_id: &str,
            node_id: &str,
            x: f64,
            y: f64,
            color: Option<Rgb>,
        ) -> Result<()> {
            self.record(Call::Position(node_id.into(), x, y, color))
                .await
        }

        async fn fetch_layers(&self, _study_id: &str) -> Result<Vec<LayerRecord>> {
            Ok(self.layers.borrow().clone())
        }

        async fn create_layer(&self, _study_id: &str, name: &str) -> Result<String> {
            self.record(Call::CreateLayer(name.into())).await?;
            let id = self.next_layer_id.get();
            self.next_layer_id.set(id + 1);
            Ok(id.to_string())
        }

        async fn rename_layer(&self, _study_id: &str, layer_id: &str, name: &str) -> Result<()> {
            self.record(Call::RenameLayer(layer_id.into(), name.into()))
                .await
        }

        async fn delete_layer(&self, _study_id: &str, layer_id: &str) -> Result<()> {
            self.record(Call::DeleteLayer(layer_id.into())).await
        }

        async fn set_layer_membership(
            &self,
            _study_id: &str,
            layer_id: &str,
            node_ids: &[String],
        ) -> Result<()> {
            self.record(Call::Membership(layer_id.into(), node_ids.to_vec()))
                .await
        }

        async fn set_layer_override(
            &self,
            _study_id: &str,
            layer_id: &str,
            node_id: &str,
            patch: &OverridePatch,
        ) -> Result<()> {
            self.record(Call::Override(layer_id.into(), node_id.into(), *patch))
                .await
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Paint {
        Clear,
        Draw { layer: String, n1: (f64, f64) },
        Highlight(Highlight),
    }

    #[derive(Default)]
    struct RecordingSurface {
        events: Vec<Paint>,
    }

    impl RenderSurface for RecordingSurface {
        fn draw(&mut self, model: &RenderModel) {
            let n1 = model
                .node("n1")
                .map(|node| (node.x, node.y))
                .unwrap_or_default();
            self.events.push(Paint::Draw {
                layer: model.layer_id.clone(),
                n1,
            });
        }

        fn set_highlighted(&mut self, highlight: &Highlight) {
            self.events.push(Paint::Highlight(highlight.clone()));
        }

        fn clear_highlight(&mut self) {
            self.events.push(Paint::Clear);
        }
    }

    type Controller = DiagramController<MockApi, RecordingSurface>;

    fn sample_graph() -> Graph {
        Graph {
            nodes: vec![
                Node::new("n1", "FR", 0.0, 0.0, Rgb::new(230, 108, 44)),
                Node::new("n2", "DE", 100.0, 0.0, Rgb::new(20, 20, 20)),
                Node::new("n3", "BE", 50.0, 50.0, Rgb::new(200, 200, 0)),
            ],
            links: vec![Link::new("n1", "n2")],
        }
    }

    fn winter() -> LayerRecord {
        LayerRecord {
            id: "1".to_string(),
            name: "Winter".to_string(),
            members: vec!["n1".to_string()],
            ..LayerRecord::default()
        }
    }

    async fn loaded() -> Controller {
        let api = MockApi::with_graph(sample_graph(), vec![winter()]);
        let controller = DiagramController::new(api, RecordingSurface::default());
        controller.load_study("s1").await.unwrap();
        controller
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn load_initializes_default_layer_and_paints() {
        let controller = loaded().await;
        assert_eq!(controller.study_id().as_deref(), Some("s1"));
        assert_eq!(controller.active_layer().as_deref(), Some(DEFAULT_LAYER_ID));
        assert_eq!(controller.layers().len(), 2);
        assert_eq!(controller.selection(), Selection::Empty);
        assert!(matches!(
            controller.surface().events.last(),
            Some(Paint::Highlight(Highlight::None))
        ));
    }

    #[tokio::test]
    async fn layer_switch_clears_highlight_before_drawing() {
        let controller = loaded().await;
        controller.on_node_click("n1").await.unwrap();
        controller.surface.borrow_mut().events.clear();

        controller.set_active_layer("1").unwrap();
        assert_eq!(
            controller.surface().events,
            vec![
                Paint::Clear,
                Paint::Draw {
                    layer: "1".to_string(),
                    n1: (0.0, 0.0)
                },
                Paint::Highlight(Highlight::Node("n1".to_string())),
            ]
        );

        assert!(matches!(
            controller.set_active_layer("99"),
            Err(MapError::NotFound { kind: EntityKind::Layer, .. })
        ));
        assert_eq!(controller.active_layer().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn drag_on_default_layer_updates_base_position() {
        let controller = loaded().await;
        let outcome = controller.on_node_drag_end("n1", 5.0, 6.0).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
        assert_eq!(
            controller.api().calls(),
            vec![Call::Position("n1".into(), 5.0, 6.0, None)]
        );
        let node = controller.node("n1").unwrap();
        assert_eq!((node.x, node.y), (5.0, 6.0));
    }

    #[tokio::test]
    async fn drag_to_the_same_position_sends_nothing() {
        let controller = loaded().await;
        let outcome = controller.on_node_drag_end("n1", 0.0, 0.0).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged);
        assert!(controller.api().calls().is_empty());
    }

    #[tokio::test]
    async fn drag_on_a_layer_writes_an_override() {
        let controller = loaded().await;
        controller.set_active_layer("1").unwrap();
        controller.on_node_drag_end("n1", 7.0, 8.0).await.unwrap();

        assert_eq!(
            controller.api().calls(),
            vec![Call::Override(
                "1".into(),
                "n1".into(),
                OverridePatch::position(7.0, 8.0)
            )]
        );
        let node = controller.node("n1").unwrap();
        assert_eq!((node.x, node.y), (0.0, 0.0));
        let stored = controller.layer_override("1", "n1").unwrap();
        assert_eq!((stored.x, stored.y), (Some(7.0), Some(8.0)));
    }

    #[tokio::test]
    async fn rapid_drags_of_one_node_are_serialized() {
        let controller = loaded().await;
        controller.api().gate(true);

        let first = controller.on_node_drag_end("n1", 1.0, 1.0);
        let second = controller.on_node_drag_end("n1", 2.0, 2.0);
        let driver = async {
            settle().await;
            assert_eq!(
                controller.api().calls(),
                vec![Call::Position("n1".into(), 1.0, 1.0, None)]
            );
            controller.api().resolve_next(Ok(()));
            settle().await;
            assert_eq!(controller.api().calls().len(), 2);
            controller.api().resolve_next(Ok(()));
        };

        let (first, second, ()) = tokio::join!(first, second, driver);
        assert_eq!(first.unwrap(), CommitOutcome::Committed);
        assert_eq!(second.unwrap(), CommitOutcome::Committed);
        assert_eq!(
            controller.api().calls(),
            vec![
                Call::Position("n1".into(), 1.0, 1.0, None),
                Call::Position("n1".into(), 2.0, 2.0, None),
            ]
        );
        let node = controller.node("n1").unwrap();
        assert_eq!((node.x, node.y), (2.0, 2.0));
    }

    #[tokio::test]
    async fn drags_of_different_nodes_are_not_queued_together() {
        let controller = loaded().await;
        controller.api().gate(true);

        let first = controller.on_node_drag_end("n1", 1.0, 1.0);
        let second = controller.on_node_drag_end("n2", 2.0, 2.0);
        let driver = async {
            settle().await;
            assert_eq!(controller.api().calls().len(), 2);
            controller.api().resolve_next(Ok(()));
            controller.api().resolve_next(Ok(()));
        };

        let (first, second, ()) = tokio::join!(first, second, driver);
        assert_eq!(first.unwrap(), CommitOutcome::Committed);
        assert_eq!(second.unwrap(), CommitOutcome::Committed);
    }

    #[tokio::test]
    async fn late_override_lands_on_the_layer_of_the_drag() {
        let controller = loaded().await;
        controller.set_active_layer("1").unwrap();
        controller.api().gate(true);

        let drag = controller.on_node_drag_end("n1", 9.0, 9.0);
        let driver = async {
            settle().await;
            controller.set_active_layer(DEFAULT_LAYER_ID).unwrap();
            controller.api().resolve_next(Ok(()));
        };

        let (outcome, ()) = tokio::join!(drag, driver);
        assert_eq!(outcome.unwrap(), CommitOutcome::Committed);
        assert_eq!(controller.active_layer().as_deref(), Some(DEFAULT_LAYER_ID));
        let stored = controller.layer_override("1", "n1").unwrap();
        assert_eq!((stored.x, stored.y), (Some(9.0), Some(9.0)));
        let node = controller.node("n1").unwrap();
        assert_eq!((node.x, node.y), (0.0, 0.0));
    }

    #[tokio::test]
    async fn resolution_after_reload_is_ignored() {
        let controller = loaded().await;
        controller.api().gate(true);

        let drag = controller.on_node_drag_end("n1", 4.0, 4.0);
        let driver = async {
            settle().await;
            controller.load_study("s1").await.unwrap();
            controller.api().resolve_next(Ok(()));
        };

        let (outcome, ()) = tokio::join!(drag, driver);
        assert_eq!(outcome.unwrap(), CommitOutcome::Discarded);
        let node = controller.node("n1").unwrap();
        assert_eq!((node.x, node.y), (0.0, 0.0));
    }

    #[tokio::test]
    async fn failed_drag_leaves_local_state_alone() {
        let controller = loaded().await;
        controller.api().fail_next("service unavailable");

        let err = controller.on_node_drag_end("n1", 3.0, 3.0).await.unwrap_err();
        assert!(matches!(err, MapError::Network(_)));
        assert!(err.to_string().contains("service unavailable"));
        let node = controller.node("n1").unwrap();
        assert_eq!((node.x, node.y), (0.0, 0.0));

        // The queue is released after a failure.
        let outcome = controller.on_node_drag_end("n1", 3.0, 3.0).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
    }

    #[tokio::test]
    async fn recolor_on_default_layer_keeps_position() {
        let controller = loaded().await;
        controller
            .set_node_color("n2", Rgb::new(1, 2, 3))
            .await
            .unwrap();
        assert_eq!(
            controller.api().calls(),
            vec![Call::Position("n2".into(), 100.0, 0.0, Some(Rgb::new(1, 2, 3)))]
        );
        assert_eq!(controller.node("n2").unwrap().color, Rgb::new(1, 2, 3));
    }

    #[tokio::test]
    async fn link_gesture_creates_exactly_one_link() {
        let controller = loaded().await;
        controller.start_link_gesture("n1").unwrap();
        assert_eq!(controller.pending_link_source().as_deref(), Some("n1"));

        let created = controller.on_node_click("n3").await.unwrap();
        assert_eq!(created.as_deref(), Some("n1 / n3"));
        assert_eq!(controller.pending_link_source(), None);

        let again = controller.on_node_click("n3").await.unwrap();
        assert_eq!(again, None);
        assert_eq!(
            controller.api().calls(),
            vec![Call::CreateLink("n1".into(), "n3".into())]
        );
        assert_eq!(controller.links().len(), 2);
        assert_eq!(controller.selection(), Selection::Node("n3".to_string()));
    }

    #[tokio::test]
    async fn failed_link_creation_adds_nothing() {
        let controller = loaded().await;
        controller.start_link_gesture("n1").unwrap();
        controller.api().fail_next("conflict");

        let err = controller.on_node_click("n3").await.unwrap_err();
        assert!(matches!(err, MapError::Network(_)));
        assert_eq!(controller.links().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_selected_node_cascades() {
        let controller = loaded().await;
        controller.on_node_click("n1").await.unwrap();
        controller.request_delete_selected().await.unwrap();

        assert_eq!(controller.api().calls(), vec![Call::DeleteNode("n1".into())]);
        assert!(controller.node("n1").is_none());
        assert!(controller.links().is_empty());
        assert_eq!(controller.selection(), Selection::Empty);
        assert!(
            !controller
                .layers()
                .iter()
                .any(|layer| layer.members.contains("n1"))
        );
    }

    #[tokio::test]
    async fn layer_write_for_a_node_deleted_meanwhile_is_dropped() {
        let controller = loaded().await;
        controller.set_active_layer("1").unwrap();
        controller.on_node_click("n1").await.unwrap();
        controller.api().gate(true);

        let drag = controller.on_node_drag_end("n1", 9.0, 9.0);
        let delete = controller.request_delete_selected();
        let driver = async {
            settle().await;
            assert_eq!(controller.api().calls().len(), 2);
            controller.api().resolve_last(Ok(()));
            settle().await;
            controller.api().resolve_next(Ok(()));
        };

        let (drag, delete, ()) = tokio::join!(drag, delete, driver);
        delete.unwrap();
        assert!(matches!(
            drag,
            Err(MapError::NotFound { kind: EntityKind::Node, .. })
        ));
        assert!(controller.node("n1").is_none());
        assert!(controller.layer_override("1", "n1").is_none());
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_selection() {
        let controller = loaded().await;
        controller.on_link_click("n2", "n1").unwrap();
        controller.api().fail_next("timeout");

        assert!(controller.request_delete_selected().await.is_err());
        assert_eq!(controller.links().len(), 1);
        assert_eq!(controller.selection().link_id(), Some("n1 / n2"));

        controller.request_delete_selected().await.unwrap();
        assert!(controller.links().is_empty());
        assert_eq!(controller.selection(), Selection::Empty);
        assert_eq!(
            controller.api().calls().last(),
            Some(&Call::DeleteLink("n2".into(), "n1".into()))
        );
    }

    #[tokio::test]
    async fn delete_with_nothing_selected_is_invalid() {
        let controller = loaded().await;
        assert!(matches!(
            controller.request_delete_selected().await,
            Err(MapError::InvalidState(_))
        ));
        assert!(controller.api().calls().is_empty());
    }

    #[tokio::test]
    async fn clicking_unknown_entities_is_not_found() {
        let controller = loaded().await;
        assert!(matches!(
            controller.on_node_click("ghost").await,
            Err(MapError::NotFound { kind: EntityKind::Node, .. })
        ));
        assert!(matches!(
            controller.on_link_click("n1", "n3"),
            Err(MapError::NotFound { kind: EntityKind::Link, .. })
        ));
        controller.on_background_click();
        assert_eq!(controller.selection(), Selection::Empty);
    }

    #[tokio::test]
    async fn layer_management_validates_locally_first() {
        let controller = loaded().await;

        assert!(matches!(
            controller.create_layer("Winter").await,
            Err(MapError::DuplicateName(_))
        ));
        assert!(matches!(
            controller.delete_layer(DEFAULT_LAYER_ID).await,
            Err(MapError::ProtectedLayer(_))
        ));
        assert!(matches!(
            controller.rename_layer("42", "Spring").await,
            Err(MapError::NotFound { .. })
        ));
        assert!(matches!(
            controller
                .set_layer_membership("1", vec!["ghost".to_string()])
                .await,
            Err(MapError::NotFound { kind: EntityKind::Node, .. })
        ));
        assert!(controller.api().calls().is_empty());

        let id = controller.create_layer("Summer").await.unwrap();
        assert_eq!(id, "10");
        controller.rename_layer(&id, "Peak").await.unwrap();
        controller
            .set_layer_membership(&id, vec!["n2".to_string(), "n3".to_string()])
            .await
            .unwrap();
        let layer = controller
            .layers()
            .into_iter()
            .find(|layer| layer.id == id)
            .unwrap();
        assert_eq!(layer.name, "Peak");
        assert_eq!(layer.members.len(), 2);
    }

    #[tokio::test]
    async fn deleting_the_active_layer_falls_back_to_default() {
        let controller = loaded().await;
        controller.set_active_layer("1").unwrap();
        controller.on_node_drag_end("n1", 1.0, 2.0).await.unwrap();

        controller.delete_layer("1").await.unwrap();
        assert_eq!(controller.active_layer().as_deref(), Some(DEFAULT_LAYER_ID));
        assert!(controller.layer_override("1", "n1").is_none());
        assert_eq!(
            controller.surface().events.last(),
            Some(&Paint::Highlight(Highlight::None))
        );
    }

    #[tokio::test]
    async fn commands_without_a_study_are_invalid() {
        let controller =
            DiagramController::new(MockApi::default(), RecordingSurface::default());
        assert!(matches!(
            controller.set_active_layer(DEFAULT_LAYER_ID),
            Err(MapError::InvalidState(_))
        ));
        assert!(controller.render_model().is_none());
    }
}

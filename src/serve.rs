use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use clap::Parser;
use log::{info, warn};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::api::{CreatedResponse, LayerNameRequest, LinkRequest, PositionRequest};
use crate::config::ServeConfig;
use crate::error::{EntityKind, MapError, MapResult};
use crate::graph::Graph;
use crate::layers::{LayerOverride, LayerRecord, OverridePatch};
use crate::render::{Highlight, render_svg};
use crate::study::StudyDocument;

/// Arguments for running the areamap study service
#[derive(Debug, Clone, Parser)]
#[command(name = "areamap serve", about = "Serve a directory of studies over HTTP.")]
pub struct ServeArgs {
    /// Directory holding one `<study>.json` document per study.
    #[arg(short = 'd', long = "data-dir", env = "AREAMAP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Background color for rendered SVG previews.
    #[arg(long = "background-color", default_value = "white")]
    pub background_color: String,
}

impl ServeArgs {
    pub fn config(&self) -> ServeConfig {
        let defaults = ServeConfig::default();
        ServeConfig {
            data_dir: self.data_dir.clone().unwrap_or(defaults.data_dir),
            host: self.host.clone().unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
        }
    }
}

struct ServeState {
    data_dir: PathBuf,
    background: String,
    source_lock: Mutex<()>,
}

type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

#[derive(Debug, Deserialize)]
struct SvgQuery {
    #[serde(default)]
    layer: Option<String>,
}

impl ServeState {
    fn study_path(&self, study_id: &str) -> MapResult<PathBuf> {
        let valid = !study_id.is_empty()
            && study_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !study_id.starts_with('.');
        if !valid {
            return Err(MapError::invalid_state(format!(
                "'{study_id}' is not a valid study id"
            )));
        }
        Ok(self.data_dir.join(format!("{study_id}.json")))
    }

    async fn read_study(&self, study_id: &str) -> Result<(PathBuf, StudyDocument)> {
        let path = self.study_path(study_id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(MapError::not_found(EntityKind::Study, study_id).into());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
            }
        };
        let document = StudyDocument::from_json(&contents)
            .with_context(|| format!("invalid study '{}'", path.display()))?;
        Ok((path, document))
    }

    async fn load(&self, study_id: &str) -> Result<StudyDocument> {
        let _guard = self.source_lock.lock().await;
        let (_, document) = self.read_study(study_id).await?;
        Ok(document)
    }

    /// Reads, mutates and rewrites one study under the source lock. The file
    /// is left untouched when `apply` fails.
    async fn update<T>(
        &self,
        study_id: &str,
        apply: impl FnOnce(&mut StudyDocument) -> MapResult<T>,
    ) -> Result<T> {
        let _guard = self.source_lock.lock().await;
        let (path, mut document) = self.read_study(study_id).await?;
        let value = apply(&mut document)?;
        let contents = document.to_json()?;
        tokio::fs::write(&path, contents.as_bytes())
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        Ok(value)
    }
}

pub fn router(data_dir: impl Into<PathBuf>, background: impl Into<String>) -> Router {
    let state = Arc::new(ServeState {
        data_dir: data_dir.into(),
        background: background.into(),
        source_lock: Mutex::new(()),
    });

    Router::new()
        .route("/api/studies/:study/graph", get(get_graph))
        .route("/api/studies/:study/svg", get(get_svg))
        .route("/api/studies/:study/links", post(post_link))
        .route(
            "/api/studies/:study/links/:source/:target",
            axum::routing::delete(delete_link),
        )
        .route(
            "/api/studies/:study/nodes/:node",
            axum::routing::delete(delete_node),
        )
        .route("/api/studies/:study/nodes/:node/position", put(put_position))
        .route("/api/studies/:study/layers", get(get_layers).post(post_layer))
        .route(
            "/api/studies/:study/layers/:layer",
            put(put_layer).delete(delete_layer),
        )
        .route("/api/studies/:study/layers/:layer/members", put(put_members))
        .route(
            "/api/studies/:study/layers/:layer/overrides/:node",
            put(put_override),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = args.config();
    ensure_data_dir(&config.data_dir)?;

    let app = router(config.data_dir.clone(), args.background_color.clone());

    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;

    info!("serving studies from '{}'", config.data_dir.display());
    println!("areamap server listening on http://{addr}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

fn ensure_data_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create data directory '{}'", path.display()))
}

fn api_error(err: anyhow::Error) -> (StatusCode, String) {
    let status = match err.downcast_ref::<MapError>() {
        Some(MapError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Some(MapError::DuplicateName(_)) => StatusCode::CONFLICT,
        Some(MapError::ProtectedLayer(_)) => StatusCode::FORBIDDEN,
        Some(MapError::InvalidState(_)) => StatusCode::BAD_REQUEST,
        Some(MapError::Network(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("request failed: {err:#}");
    }
    (status, format!("{err:#}"))
}

async fn get_graph(
    State(state): State<Arc<ServeState>>,
    AxumPath(study): AxumPath<String>,
) -> ApiResult<Json<Graph>> {
    let document = state.load(&study).await.map_err(api_error)?;
    Ok(Json(document.graph))
}

async fn get_svg(
    State(state): State<Arc<ServeState>>,
    AxumPath(study): AxumPath<String>,
    Query(query): Query<SvgQuery>,
) -> ApiResult<Response> {
    let document = state.load(&study).await.map_err(api_error)?;
    let model = document
        .render_model(query.layer.as_deref())
        .map_err(|err| api_error(err.into()))?;
    let svg = render_svg(&model, &Highlight::None, &state.background).map_err(api_error)?;

    let mut response = Response::new(svg.into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("image/svg+xml"),
    );
    Ok(response)
}

async fn post_link(
    State(state): State<Arc<ServeState>>,
    AxumPath(study): AxumPath<String>,
    Json(request): Json<LinkRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = state
        .update(&study, |document| {
            document.add_link(&request.source, &request.target)
        })
        .await
        .map_err(api_error)?;
    info!("study '{study}': link {id} created");
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn delete_link(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, source, target)): AxumPath<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    state
        .update(&study, |document| document.remove_link(&source, &target))
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_node(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, node)): AxumPath<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state
        .update(&study, |document| document.remove_node(&node))
        .await
        .map_err(api_error)?;
    info!("study '{study}': node '{node}' deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn put_position(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, node)): AxumPath<(String, String)>,
    Json(request): Json<PositionRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .update(&study, |document| {
            document.set_node_position(&node, request.x, request.y, request.color)
        })
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_layers(
    State(state): State<Arc<ServeState>>,
    AxumPath(study): AxumPath<String>,
) -> ApiResult<Json<Vec<LayerRecord>>> {
    let document = state.load(&study).await.map_err(api_error)?;
    Ok(Json(document.layers))
}

async fn post_layer(
    State(state): State<Arc<ServeState>>,
    AxumPath(study): AxumPath<String>,
    Json(request): Json<LayerNameRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = state
        .update(&study, |document| document.create_layer(&request.name))
        .await
        .map_err(api_error)?;
    info!("study '{study}': layer '{}' created as {id}", request.name);
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn put_layer(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, layer)): AxumPath<(String, String)>,
    Json(request): Json<LayerNameRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .update(&study, |document| document.rename_layer(&layer, &request.name))
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_layer(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, layer)): AxumPath<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state
        .update(&study, |document| document.delete_layer(&layer))
        .await
        .map_err(api_error)?;
    info!("study '{study}': layer {layer} deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn put_members(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, layer)): AxumPath<(String, String)>,
    Json(members): Json<Vec<String>>,
) -> ApiResult<impl IntoResponse> {
    state
        .update(&study, |document| {
            document.set_layer_membership(&layer, members)
        })
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_override(
    State(state): State<Arc<ServeState>>,
    AxumPath((study, layer, node)): AxumPath<(String, String, String)>,
    Json(patch): Json<OverridePatch>,
) -> ApiResult<Json<LayerOverride>> {
    let merged = state
        .update(&study, |document| {
            document.set_layer_override(&layer, &node, patch)
        })
        .await
        .map_err(api_error)?;
    Ok(Json(merged))
}

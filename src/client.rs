//! [`StudyApi`] over HTTP, against the routes served by `areamap serve`.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::api::{CreatedResponse, LayerNameRequest, LinkRequest, PositionRequest, StudyApi};
use crate::color::Rgb;
use crate::config::ApiConfig;
use crate::graph::Graph;
use crate::layers::{LayerRecord, OverridePatch};

#[derive(Debug, Clone)]
pub struct HttpStudyApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpStudyApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid study service URL '{}'", config.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("study service URL '{}' cannot carry paths", config.base_url);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// `/api/studies/{study}/{segments..}`, each segment percent-encoded.
    fn url(&self, study_id: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("study service URL cannot carry paths"))?
            .pop_if_empty()
            .extend(["api", "studies", study_id])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to send {what} request"))?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("{what} failed with status {status}: {error_text}");
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, url), what).await?;
        response
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response"))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &B,
        what: &str,
    ) -> Result<Response> {
        self.send(self.request(method, url).json(body), what).await
    }

    async fn delete(&self, url: Url, what: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, url), what).await?;
        Ok(())
    }
}

impl StudyApi for HttpStudyApi {
    async fn fetch_graph(&self, study_id: &str) -> Result<Graph> {
        self.get_json(self.url(study_id, &["graph"])?, "fetch graph")
            .await
    }

    async fn create_link(&self, study_id: &str, source: &str, target: &str) -> Result<String> {
        let body = LinkRequest {
            source: source.to_string(),
            target: target.to_string(),
        };
        let response = self
            .send_json(Method::POST, self.url(study_id, &["links"])?, &body, "create link")
            .await?;
        let created: CreatedResponse = response
            .json()
            .await
            .context("failed to parse create link response")?;
        Ok(created.id)
    }

    async fn delete_node(&self, study_id: &str, node_id: &str) -> Result<()> {
        self.delete(self.url(study_id, &["nodes", node_id])?, "delete node")
            .await
    }

    async fn delete_link(&self, study_id: &str, source: &str, target: &str) -> Result<()> {
        self.delete(self.url(study_id, &["links", source, target])?, "delete link")
            .await
    }

    async fn update_node_position(
        &self,
        study_id: &str,
        node_id: &str,
        x: f64,
        y: f64,
        color: Option<Rgb>,
    ) -> Result<()> {
        let body = PositionRequest { x, y, color };
        self.send_json(
            Method::PUT,
            self.url(study_id, &["nodes", node_id, "position"])?,
            &body,
            "update node position",
        )
        .await?;
        Ok(())
    }

    async fn fetch_layers(&self, study_id: &str) -> Result<Vec<LayerRecord>> {
        self.get_json(self.url(study_id, &["layers"])?, "fetch layers")
            .await
    }

    async fn create_layer(&self, study_id: &str, name: &str) -> Result<String> {
        let body = LayerNameRequest {
            name: name.to_string(),
        };
        let response = self
            .send_json(Method::POST, self.url(study_id, &["layers"])?, &body, "create layer")
            .await?;
        let created: CreatedResponse = response
            .json()
            .await
            .context("failed to parse create layer response")?;
        Ok(created.id)
    }

    async fn rename_layer(&self, study_id: &str, layer_id: &str, name: &str) -> Result<()> {
        let body = LayerNameRequest {
            name: name.to_string(),
        };
        self.send_json(
            Method::PUT,
            self.url(study_id, &["layers", layer_id])?,
            &body,
            "rename layer",
        )
        .await?;
        Ok(())
    }

    async fn delete_layer(&self, study_id: &str, layer_id: &str) -> Result<()> {
        self.delete(self.url(study_id, &["layers", layer_id])?, "delete layer")
            .await
    }

    async fn set_layer_membership(
        &self,
        study_id: &str,
        layer_id: &str,
        node_ids: &[String],
    ) -> Result<()> {
        self.send_json(
            Method::PUT,
            self.url(study_id, &["layers", layer_id, "members"])?,
            node_ids,
            "set layer membership",
        )
        .await?;
        Ok(())
    }

    async fn set_layer_override(
        &self,
        study_id: &str,
        layer_id: &str,
        node_id: &str,
        patch: &OverridePatch,
    ) -> Result<()> {
        self.send_json(
            Method::PUT,
            self.url(study_id, &["layers", layer_id, "overrides", node_id])?,
            patch,
            "set layer override",
        )
        .await?;
        Ok(())
    }
}

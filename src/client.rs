use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::backend::BatchBackend;
use crate::config::ClientConfig;
use crate::error::{CaptionError, Result};
use crate::settings::{Settings, SettingsWire};
use crate::types::*;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// The backend reports failures as `{"detail": "..."}`; fall back to the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn parse_caption(json: &Value) -> Result<String> {
    json.get("caption")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CaptionError::InvalidResponse("Response missing caption".into()))
}

/// Async client for the caption backend REST API.
///
/// Covers batch lifecycle control, status polling, folder listings, single
/// image captioning, few-shot examples, prompt templates and settings.
///
/// # Example
/// ```no_run
/// use caption_batch::CaptionApiClient;
///
/// # async fn example() -> caption_batch::Result<()> {
/// let client = CaptionApiClient::new("http://localhost:8000/api");
/// let status = client.status().await?;
/// println!("{}/{}", status.processed_count, status.total_count);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CaptionApiClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl CaptionApiClient {
    /// Create a new client pointing at the given API base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            timeout: ClientConfig::default().request_timeout,
        }
    }

    /// Client for `config.endpoint` using `config.request_timeout`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.endpoint.clone()).with_timeout(config.request_timeout)
    }

    /// Use a custom `reqwest::Client` (for connection pooling, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        let resp = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CaptionError::Network {
                context: format!("{} ({})", context, self.endpoint),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CaptionError::Http {
                status,
                body: error_detail(&body),
            });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(resp: Response, context: &str) -> Result<T> {
        resp.json::<T>().await.map_err(|e| CaptionError::Network {
            context: format!("Failed to parse {} response", context),
            source: e,
        })
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check whether the backend answers on `/settings`.
    pub async fn health(&self) -> Result<bool> {
        let resp = self
            .http
            .get(self.url("/settings"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| CaptionError::Network {
                context: format!(
                    "Cannot connect to caption backend at {}, is the service running?",
                    self.endpoint
                ),
                source: e,
            })?;
        Ok(resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND)
    }

    // ── Batch lifecycle ─────────────────────────────────────────────

    /// Start captioning the uncaptioned images of a folder, or all of them with `reprocess`.
    pub async fn start(&self, request: &BatchStartRequest) -> Result<()> {
        debug!(folder = %request.folder_path, reprocess = request.reprocess, "POST /batch-process");
        let req = self.http.post(self.url("/batch-process")).json(request);
        self.send(req, "Failed to start batch processing").await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        let req = self.http.post(self.url("/batch-process/pause"));
        self.send(req, "Failed to pause batch processing").await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let req = self.http.post(self.url("/batch-process/resume"));
        self.send(req, "Failed to resume batch processing").await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let req = self.http.post(self.url("/batch-process/stop"));
        self.send(req, "Failed to stop batch processing").await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<BatchStatus> {
        let req = self.http.get(self.url("/batch-process/status"));
        let resp = self.send(req, "Failed to fetch batch status").await?;
        Self::json(resp, "batch status").await
    }

    // ── Folders ─────────────────────────────────────────────────────

    pub async fn folders(&self) -> Result<Vec<FolderInfo>> {
        let req = self.http.get(self.url("/folders"));
        let resp = self.send(req, "Failed to list folders").await?;
        Self::json(resp, "folders").await
    }

    pub async fn folder_contents(&self, folder: &str) -> Result<FolderContents> {
        let req = self
            .http
            .get(self.url("/folder-contents"))
            .query(&[("folder_path", folder)]);
        let resp = self.send(req, "Failed to fetch folder contents").await?;
        Self::json(resp, "folder contents").await
    }

    pub async fn update_caption(&self, id: ItemId, caption: &str) -> Result<ProcessedItem> {
        let req = self
            .http
            .put(self.url(&format!("/processed-items/{}/caption", id)))
            .json(&serde_json::json!({ "caption": caption }));
        let resp = self.send(req, "Failed to update caption").await?;
        Self::json(resp, "caption update").await
    }

    // ── Single image ────────────────────────────────────────────────

    /// Caption one image with the stored settings. Returns the caption text.
    pub async fn generate_caption(&self, image: Vec<u8>, filename: &str) -> Result<String> {
        let form = Form::new().part("image", Part::bytes(image).file_name(filename.to_string()));
        let req = self.http.post(self.url("/generate-caption")).multipart(form);
        let resp = self.send(req, "Failed to generate caption").await?;
        let json: Value = Self::json(resp, "caption").await?;
        parse_caption(&json)
    }

    // ── Examples ────────────────────────────────────────────────────

    pub async fn examples(&self) -> Result<Vec<ExamplePair>> {
        let req = self.http.get(self.url("/examples"));
        let resp = self.send(req, "Failed to fetch examples").await?;
        Self::json(resp, "examples").await
    }

    pub async fn upload_example(
        &self,
        image: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<ExamplePair> {
        let form = Form::new()
            .part("image", Part::bytes(image).file_name(filename.to_string()))
            .text("caption", caption.to_string());
        let req = self.http.post(self.url("/examples")).multipart(form);
        let resp = self.send(req, "Failed to upload example pair").await?;
        Self::json(resp, "example upload").await
    }

    pub async fn remove_example(&self, id: u64) -> Result<()> {
        let req = self.http.delete(self.url(&format!("/examples/{}", id)));
        self.send(req, "Failed to remove example").await?;
        Ok(())
    }

    // ── Prompt templates ────────────────────────────────────────────

    pub async fn templates(&self) -> Result<Vec<PromptTemplate>> {
        let req = self.http.get(self.url("/prompt-templates"));
        let resp = self.send(req, "Failed to fetch templates").await?;
        Self::json(resp, "templates").await
    }

    pub async fn create_template(&self, template: &PromptTemplate) -> Result<PromptTemplate> {
        let req = self.http.post(self.url("/prompt-templates")).json(template);
        let resp = self.send(req, "Failed to create template").await?;
        Self::json(resp, "template").await
    }

    pub async fn update_template(&self, template: &PromptTemplate) -> Result<PromptTemplate> {
        let req = self
            .http
            .put(self.url(&format!("/prompt-templates/{}", template.id)))
            .json(template);
        let resp = self.send(req, "Failed to update template").await?;
        Self::json(resp, "template").await
    }

    pub async fn delete_template(&self, id: &str) -> Result<()> {
        let req = self.http.delete(self.url(&format!("/prompt-templates/{}", id)));
        self.send(req, "Failed to delete template").await?;
        Ok(())
    }

    // ── Settings ────────────────────────────────────────────────────

    /// Stored settings, or the defaults when none have been saved yet.
    pub async fn get_settings(&self) -> Result<Settings> {
        let req = self.http.get(self.url("/settings"));
        match self.send(req, "Failed to fetch settings").await {
            Ok(resp) => {
                let wire: SettingsWire = Self::json(resp, "settings").await?;
                Ok(Settings::from(wire))
            }
            Err(CaptionError::Http { status: 404, .. }) => {
                debug!("No stored settings, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Send a partial settings record; returns what the backend stored.
    pub async fn put_settings(&self, patch: &SettingsWire) -> Result<Settings> {
        let req = self.http.put(self.url("/settings")).json(patch);
        let resp = self.send(req, "Failed to update settings").await?;
        let wire: SettingsWire = Self::json(resp, "settings").await?;
        Ok(Settings::from(wire))
    }
}

impl BatchBackend for CaptionApiClient {
    async fn start_batch(&self, request: &BatchStartRequest) -> Result<()> {
        self.start(request).await
    }

    async fn pause_batch(&self) -> Result<()> {
        self.pause().await
    }

    async fn resume_batch(&self) -> Result<()> {
        self.resume().await
    }

    async fn stop_batch(&self) -> Result<()> {
        self.stop().await
    }

    async fn batch_status(&self) -> Result<BatchStatus> {
        self.status().await
    }

    async fn folder_contents(&self, folder: &str) -> Result<FolderContents> {
        CaptionApiClient::folder_contents(self, folder).await
    }

    async fn update_item_caption(&self, id: ItemId, caption: &str) -> Result<ProcessedItem> {
        self.update_caption(id, caption).await
    }

    async fn settings(&self) -> Result<Settings> {
        self.get_settings().await
    }

    async fn update_settings(&self, patch: &SettingsWire) -> Result<Settings> {
        self.put_settings(patch).await
    }
}

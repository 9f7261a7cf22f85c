use std::future::Future;

use crate::error::Result;
use crate::settings::{Settings, SettingsWire};
use crate::types::{BatchStartRequest, BatchStatus, FolderContents, ItemId, ProcessedItem};

/// The backend operations the batch controller drives.
///
/// Implemented by [`crate::CaptionApiClient`] over HTTP. Every call must
/// resolve (success or error) in bounded time; the controller never leaves a
/// job in an intermediate state waiting on it.
///
/// # Example
///
/// ```ignore
/// use caption_batch::*;
///
/// struct Offline;
///
/// impl BatchBackend for Offline {
///     async fn start_batch(&self, _req: &BatchStartRequest) -> Result<()> {
///         Err(CaptionError::Other("offline".into()))
///     }
///     // ...
/// }
/// ```
pub trait BatchBackend: Send + Sync + 'static {
    /// `POST /batch-process`
    fn start_batch(&self, request: &BatchStartRequest) -> impl Future<Output = Result<()>> + Send;

    /// `POST /batch-process/pause`
    fn pause_batch(&self) -> impl Future<Output = Result<()>> + Send;

    /// `POST /batch-process/resume`
    fn resume_batch(&self) -> impl Future<Output = Result<()>> + Send;

    /// `POST /batch-process/stop`
    fn stop_batch(&self) -> impl Future<Output = Result<()>> + Send;

    /// `GET /batch-process/status`
    fn batch_status(&self) -> impl Future<Output = Result<BatchStatus>> + Send;

    /// `GET /folder-contents?folder_path=...`
    fn folder_contents(&self, folder: &str) -> impl Future<Output = Result<FolderContents>> + Send;

    /// `PUT /processed-items/{id}/caption`
    fn update_item_caption(
        &self,
        id: ItemId,
        caption: &str,
    ) -> impl Future<Output = Result<ProcessedItem>> + Send;

    /// `GET /settings`. A missing record yields the defaults.
    fn settings(&self) -> impl Future<Output = Result<Settings>> + Send;

    /// `PUT /settings` with a partial record; returns the stored settings.
    fn update_settings(&self, patch: &SettingsWire) -> impl Future<Output = Result<Settings>> + Send;
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::BatchBackend;
use crate::config::ClientConfig;
use crate::error::{CaptionError, Result};
use crate::folders;
use crate::job::{JobSnapshot, JobState, JobStatus, PollOutcome, Transition};
use crate::poller::{spawn_poll_loop, PollHandle};
use crate::progress::ProgressReport;
use crate::settings::{Settings, SettingsPatch, SettingsWire};
use crate::tokens::{CostProjection, TokenCount};
use crate::types::{BatchStartRequest, BatchStatus, FolderStats, ItemId, ProcessedItem};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State plus its snapshot channel, shared with the polling tasks.
struct Shared {
    state: Mutex<JobState>,
    snapshots: watch::Sender<JobSnapshot>,
}

impl Shared {
    fn read<R>(&self, f: impl FnOnce(&JobState) -> R) -> R {
        let state = lock(&self.state);
        f(&*state)
    }

    /// Mutate the state and publish a snapshot if anything visible changed.
    fn update<R>(&self, f: impl FnOnce(&mut JobState) -> R) -> R {
        let mut state = lock(&self.state);
        let result = f(&mut *state);
        let snapshot = state.snapshot();
        drop(state);
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    /// Like [`Shared::update`], recording the error in the snapshot on failure.
    fn try_update<T>(&self, f: impl FnOnce(&mut JobState) -> Result<T>) -> Result<T> {
        self.update(|state| {
            let result = f(state);
            if let Err(e) = &result {
                state.record_error(e);
            }
            result
        })
    }

    fn record_error(&self, err: &CaptionError) {
        self.update(|state| state.record_error(err));
    }
}

/// How to undo a lifecycle `begin_*` step.
#[derive(Debug, Clone, Copy)]
enum Rollback {
    Start { generation: u64 },
    Transition(Transition),
    Stop { previous: JobStatus },
}

impl Rollback {
    fn action(self) -> &'static str {
        match self {
            Rollback::Start { .. } => Transition::Start.as_str(),
            Rollback::Transition(t) => t.as_str(),
            Rollback::Stop { .. } => Transition::Stop.as_str(),
        }
    }
}

/// Held across the backend call of a lifecycle command. If the command's
/// future is dropped before [`resolve`](Self::resolve), the state is rolled
/// back as if the request had failed, so the job never stays in flight.
struct PendingRequest<'a> {
    shared: &'a Shared,
    rollback: Option<Rollback>,
}

impl<'a> PendingRequest<'a> {
    fn new(shared: &'a Shared, rollback: Rollback) -> Self {
        Self {
            shared,
            rollback: Some(rollback),
        }
    }

    fn resolve<R>(mut self, f: impl FnOnce(&mut JobState) -> R) -> R {
        self.rollback = None;
        self.shared.update(f)
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        let Some(rollback) = self.rollback.take() else {
            return;
        };
        let err = CaptionError::Cancelled(rollback.action());
        warn!(action = rollback.action(), "Request dropped before completion, rolling back");
        self.shared.update(|s| match rollback {
            Rollback::Start { generation } => s.fail_start(generation, &err),
            Rollback::Transition(t) => s.fail_transition(t, &err),
            Rollback::Stop { previous } => s.fail_stop(previous, &err),
        });
    }
}

/// Which kind of run a start request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    /// Caption the uncaptioned images.
    Fresh,
    /// Overwrite every caption; carries the user's confirmation.
    Reprocess { confirmed: bool },
}

fn check_start_guards(state: &JobState, folder: &str, mode: StartMode) -> Result<()> {
    if folder.trim().is_empty() {
        return Err(CaptionError::NoFolderSelected);
    }
    if !state.settings().model.has_api_key() {
        return Err(CaptionError::MissingApiKey);
    }
    let stats = state.stats_for(folder);
    match mode {
        StartMode::Fresh => {
            if matches!(stats, Some(s) if s.uncaptioned == 0) {
                return Err(CaptionError::NothingToCaption(folder.to_string()));
            }
        }
        StartMode::Reprocess { confirmed } => {
            if !folders::show_reprocess_button(stats) {
                return Err(CaptionError::ReprocessUnavailable(folder.to_string()));
            }
            if !confirmed {
                return Err(CaptionError::ReprocessNotConfirmed);
            }
        }
    }
    Ok(())
}

/// Drives one batch job against a [`BatchBackend`].
///
/// Owns the [`JobState`]; backend calls are awaited without holding its lock
/// and observers read [`JobSnapshot`]s from a `watch` channel.
///
/// At most one status polling loop and one folder refresh loop exist at any
/// time; both are cancelled on completion, stop, [`shutdown`](Self::shutdown)
/// and drop.
///
/// # Example
///
/// ```no_run
/// use caption_batch::*;
///
/// # async fn example() -> caption_batch::Result<()> {
/// let config = ClientConfig::from_env();
/// let controller = BatchController::new(CaptionApiClient::from_config(&config), config);
/// controller.load_settings().await?;
/// controller.select_folder("/data/houses").await?;
/// controller.start("/data/houses").await?;
///
/// let mut updates = controller.subscribe();
/// while updates.changed().await.is_ok() {
///     let snapshot = updates.borrow_and_update().clone();
///     if snapshot.job.status == JobStatus::Completed {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct BatchController<B: BatchBackend> {
    shared: Arc<Shared>,
    backend: Arc<B>,
    config: ClientConfig,
    status_poll: Mutex<PollHandle>,
    folder_poll: Mutex<PollHandle>,
}

impl<B: BatchBackend> BatchController<B> {
    pub fn new(backend: B, config: ClientConfig) -> Self {
        let state = JobState::new(Settings::default());
        let (snapshots, _) = watch::channel(state.snapshot());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                snapshots,
            }),
            backend: Arc::new(backend),
            config,
            status_poll: Mutex::new(PollHandle::new()),
            folder_poll: Mutex::new(PollHandle::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // -- Observation --

    /// Receive a snapshot after every visible state change.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.shared.read(|s| s.snapshot())
    }

    pub fn status(&self) -> JobStatus {
        self.shared.read(|s| s.status())
    }

    pub fn settings(&self) -> Settings {
        self.shared.read(|s| s.settings().clone())
    }

    /// True while the status polling loop is running.
    pub fn is_polling(&self) -> bool {
        lock(&self.status_poll).is_active()
    }

    /// True while the folder refresh loop is running.
    pub fn is_refreshing_folder(&self) -> bool {
        lock(&self.folder_poll).is_active()
    }

    /// Progress, speed and ETA of the current run at `now`. Paused time is
    /// not counted as processing time.
    pub fn progress_report(&self, now: DateTime<Utc>) -> ProgressReport {
        self.shared.read(|s| {
            let job = s.job();
            let stats = job
                .source_folder
                .as_deref()
                .and_then(|folder| s.stats_for(folder));
            ProgressReport::compute(
                job.processed_count,
                job.total_count,
                job.effective_start(now),
                stats,
                now,
            )
        })
    }

    /// Spend so far and projected total for the current run, given the
    /// per-request token estimate.
    pub fn cost_projection(&self, per_request: TokenCount) -> CostProjection {
        self.shared.read(|s| {
            CostProjection::new(
                per_request,
                s.job().processed_count,
                s.job().total_count,
                s.settings().model.cost_per_token,
            )
        })
    }

    // -- Settings --

    /// Load the stored settings from the backend.
    pub async fn load_settings(&self) -> Result<Settings> {
        match self.backend.settings().await {
            Ok(settings) => {
                self.shared.update(|s| s.load_settings(settings.clone()));
                Ok(settings)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load settings");
                self.shared.record_error(&e);
                Err(e)
            }
        }
    }

    /// Apply `patch` locally right away and send it to the backend in the
    /// background.
    ///
    /// The backend's answer replaces the local settings only if no newer
    /// local change happened meanwhile. The returned handle resolves once the
    /// request is done; dropping it does not cancel the request.
    pub fn update_settings(&self, patch: SettingsPatch) -> JoinHandle<()> {
        let wire = SettingsWire::from(&patch);
        let revision = self.shared.update(|s| s.update_settings(patch));

        let backend = self.backend.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            match backend.update_settings(&wire).await {
                Ok(stored) => {
                    let applied = shared.update(|s| s.apply_settings_echo(revision, stored));
                    if !applied {
                        debug!(revision, "Settings echo superseded by a newer local change");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to save settings");
                    shared.record_error(&e);
                }
            }
        })
    }

    // -- Folders --

    /// Select a source folder: fetch its listing, record its stats, and
    /// rebuild the item list from its captioned files.
    pub async fn select_folder(&self, folder: &str) -> Result<FolderStats> {
        self.shared.try_update(|s| {
            if s.status().is_active() {
                return Err(CaptionError::InvalidTransition {
                    action: "change folder",
                    status: s.status(),
                });
            }
            Ok(())
        })?;

        let contents = match self.backend.folder_contents(folder).await {
            Ok(c) => c,
            Err(e) => {
                warn!(folder, error = %e, "Failed to fetch folder contents");
                self.shared.record_error(&e);
                return Err(e);
            }
        };

        self.shared
            .try_update(|s| s.select_folder(folder, &contents))?;
        info!(
            folder,
            total = contents.stats.total_images,
            captioned = contents.stats.captioned,
            "Folder selected"
        );
        Ok(contents.stats)
    }

    /// Re-fetch the stats of the selected folder.
    pub async fn refresh_folder_stats(&self) -> Result<FolderStats> {
        let folder = self
            .shared
            .try_update(|s| s.selected_folder.clone().ok_or(CaptionError::NoFolderSelected))?;

        let contents = match self.backend.folder_contents(&folder).await {
            Ok(c) => c,
            Err(e) => {
                self.shared.record_error(&e);
                return Err(e);
            }
        };
        self.shared
            .update(|s| s.apply_folder_stats(&folder, contents.stats));
        Ok(contents.stats)
    }

    // -- Lifecycle --

    /// Start captioning the uncaptioned images of `folder`.
    ///
    /// Refused without an API key, or when the folder's known stats show
    /// nothing left to caption.
    pub async fn start(&self, folder: &str) -> Result<()> {
        self.launch(folder, StartMode::Fresh).await
    }

    /// Re-caption every image of a fully captioned folder, overwriting the
    /// existing captions. Requires `confirmed`.
    pub async fn reprocess_all(&self, folder: &str, confirmed: bool) -> Result<()> {
        self.launch(folder, StartMode::Reprocess { confirmed }).await
    }

    async fn launch(&self, folder: &str, mode: StartMode) -> Result<()> {
        let reprocess = matches!(mode, StartMode::Reprocess { .. });
        let (generation, request) = self.shared.try_update(|s| {
            check_start_guards(s, folder, mode)?;
            let generation = s.begin_start(folder, Utc::now())?;
            Ok((
                generation,
                BatchStartRequest::new(folder, s.settings(), reprocess),
            ))
        })?;

        let pending = PendingRequest::new(&self.shared, Rollback::Start { generation });
        if let Err(e) = self.backend.start_batch(&request).await {
            warn!(folder, error = %e, "Batch start failed");
            pending.resolve(|s| s.fail_start(generation, &e));
            return Err(e);
        }

        pending.resolve(|s| s.confirm_start(generation));
        info!(folder, generation, reprocess, "Batch started");
        self.spawn_polling(generation, folder.to_string());
        Ok(())
    }

    /// Pause the running job. The local state only changes once the backend
    /// confirms.
    pub async fn pause(&self) -> Result<()> {
        self.shared.try_update(|s| s.begin_pause())?;
        let pending = PendingRequest::new(&self.shared, Rollback::Transition(Transition::Pause));
        match self.backend.pause_batch().await {
            Ok(()) => {
                pending.resolve(|s| s.confirm_pause(Utc::now()));
                info!("Batch paused");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Pause failed");
                pending.resolve(|s| s.fail_transition(Transition::Pause, &e));
                Err(e)
            }
        }
    }

    /// Resume a paused job. Same contract as [`pause`](Self::pause).
    pub async fn resume(&self) -> Result<()> {
        self.shared.try_update(|s| s.begin_resume())?;
        let pending = PendingRequest::new(&self.shared, Rollback::Transition(Transition::Resume));
        match self.backend.resume_batch().await {
            Ok(()) => {
                pending.resolve(|s| s.confirm_resume(Utc::now()));
                info!("Batch resumed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Resume failed");
                pending.resolve(|s| s.fail_transition(Transition::Resume, &e));
                Err(e)
            }
        }
    }

    /// Stop the job. Processed items are kept.
    ///
    /// A no-op when nothing is running, including after completion and while
    /// another stop is in flight. Poll results arriving while the stop is in
    /// flight are discarded. On failure the previous state is restored.
    pub async fn stop(&self) -> Result<()> {
        let previous = match self.shared.try_update(|s| s.begin_stop())? {
            Some(previous) => previous,
            None => {
                debug!("Stop requested with no active job");
                return Ok(());
            }
        };

        let pending = PendingRequest::new(&self.shared, Rollback::Stop { previous });
        match self.backend.stop_batch().await {
            Ok(()) => {
                self.cancel_polling();
                pending.resolve(|s| s.confirm_stop(Utc::now()));
                info!("Batch stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Stop failed");
                pending.resolve(|s| s.fail_stop(previous, &e));
                Err(e)
            }
        }
    }

    /// Save an edited caption. The local item list only changes once the
    /// backend accepts the edit.
    pub async fn update_caption(&self, id: ItemId, caption: &str) -> Result<ProcessedItem> {
        match self.backend.update_item_caption(id, caption).await {
            Ok(updated) => {
                self.shared.update(|s| s.apply_caption_edit(updated.clone()));
                Ok(updated)
            }
            Err(e) => {
                warn!(id, error = %e, "Caption update failed");
                self.shared.record_error(&e);
                Err(e)
            }
        }
    }

    /// Cancel all polling. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.cancel_polling();
    }

    fn cancel_polling(&self) {
        lock(&self.status_poll).cancel();
        lock(&self.folder_poll).cancel();
    }

    // -- Polling --

    fn spawn_polling(&self, generation: u64, folder: String) {
        let status_task = {
            let backend = self.backend.clone();
            let fetch_shared = self.shared.clone();
            let apply_shared = self.shared.clone();
            spawn_poll_loop(
                "status",
                self.config.poll_interval,
                move || {
                    let backend = backend.clone();
                    let shared = fetch_shared.clone();
                    async move {
                        let result = backend.batch_status().await;
                        if let Err(e) = &result {
                            shared.record_error(e);
                        }
                        result
                    }
                },
                move |status: BatchStatus| apply_status(&apply_shared, generation, &status),
            )
        };
        lock(&self.status_poll).replace(status_task, generation);

        let folder_task = {
            let backend = self.backend.clone();
            let shared = self.shared.clone();
            let fetch_folder = folder.clone();
            spawn_poll_loop(
                "folder",
                self.config.folder_refresh_interval,
                move || {
                    let backend = backend.clone();
                    let folder = fetch_folder.clone();
                    async move { backend.folder_contents(&folder).await.map(|c| c.stats) }
                },
                move |stats: FolderStats| {
                    shared.update(|s| {
                        if s.job().generation != generation || !s.status().is_active() {
                            return PollOutcome::Stale;
                        }
                        s.apply_folder_stats(&folder, stats);
                        PollOutcome::Continue
                    })
                },
            )
        };
        lock(&self.folder_poll).replace(folder_task, generation);
    }
}

fn apply_status(shared: &Shared, generation: u64, status: &BatchStatus) -> PollOutcome {
    let outcome = shared.update(|s| s.apply_status(generation, status));
    match outcome {
        PollOutcome::Continue => {}
        PollOutcome::Discarded => debug!(generation, "Poll result discarded, stop in flight"),
        PollOutcome::Stale => debug!(generation, "Stale poll result ignored"),
        PollOutcome::Finished => info!(
            generation,
            processed = status.processed_count,
            total = status.total_count,
            "Batch completed"
        ),
    }
    outcome
}

impl<B: BatchBackend> Drop for BatchController<B> {
    fn drop(&mut self) {
        self.cancel_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FolderContents;

    fn state_with_key() -> JobState {
        let mut state = JobState::default();
        state.update_settings(SettingsPatch::default().api_key("sk-test"));
        state
    }

    fn contents(total: usize, captioned: usize) -> FolderContents {
        FolderContents {
            stats: FolderStats {
                total_images: total,
                captioned,
                uncaptioned: total - captioned,
            },
            files: Vec::new(),
        }
    }

    #[test]
    fn test_guard_requires_api_key() {
        let state = JobState::default();
        assert!(matches!(
            check_start_guards(&state, "/data/f", StartMode::Fresh),
            Err(CaptionError::MissingApiKey)
        ));
    }

    #[test]
    fn test_guard_requires_folder() {
        let state = state_with_key();
        assert!(matches!(
            check_start_guards(&state, "  ", StartMode::Fresh),
            Err(CaptionError::NoFolderSelected)
        ));
    }

    #[test]
    fn test_guard_start_with_unknown_stats_is_allowed() {
        let state = state_with_key();
        assert!(check_start_guards(&state, "/data/f", StartMode::Fresh).is_ok());
    }

    #[test]
    fn test_guard_fully_captioned_folder() {
        let mut state = state_with_key();
        state.select_folder("/data/f", &contents(10, 10)).unwrap();
        assert!(matches!(
            check_start_guards(&state, "/data/f", StartMode::Fresh),
            Err(CaptionError::NothingToCaption(_))
        ));
        assert!(matches!(
            check_start_guards(&state, "/data/f", StartMode::Reprocess { confirmed: false }),
            Err(CaptionError::ReprocessNotConfirmed)
        ));
        assert!(
            check_start_guards(&state, "/data/f", StartMode::Reprocess { confirmed: true }).is_ok()
        );
    }

    #[test]
    fn test_guard_reprocess_needs_full_coverage() {
        let mut state = state_with_key();
        state.select_folder("/data/f", &contents(10, 4)).unwrap();
        assert!(check_start_guards(&state, "/data/f", StartMode::Fresh).is_ok());
        assert!(matches!(
            check_start_guards(&state, "/data/f", StartMode::Reprocess { confirmed: true }),
            Err(CaptionError::ReprocessUnavailable(_))
        ));
    }

    #[test]
    fn test_guard_empty_folder() {
        let mut state = state_with_key();
        state.select_folder("/data/f", &contents(0, 0)).unwrap();
        assert!(matches!(
            check_start_guards(&state, "/data/f", StartMode::Fresh),
            Err(CaptionError::NothingToCaption(_))
        ));
    }
}

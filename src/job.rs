use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{CaptionError, Result};
use crate::folders;
use crate::settings::{Settings, SettingsPatch};
use crate::types::{BatchStatus, FolderContents, FolderStats, ItemId, ProcessedItem};

/// Local lifecycle state of the batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Idle,
    Running,
    Paused,
    /// A stop request is in flight.
    Stopping,
    Completed,
}

impl JobStatus {
    /// Running, paused, or being stopped.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Running | JobStatus::Paused | JobStatus::Stopping
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Stopping => "stopping",
            JobStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A lifecycle request that has been sent and not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
        }
    }
}

/// One batch-processing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub source_folder: Option<String>,
    pub status: JobStatus,
    /// Set when a run starts; untouched by pause/resume.
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    /// Total time spent paused in completed pauses.
    #[serde(skip)]
    pub paused_duration: Duration,
    pub processed_count: usize,
    pub total_count: usize,
    /// Bumped on every start; poll results tagged with an older generation are stale.
    pub generation: u64,
}

impl Default for BatchJob {
    fn default() -> Self {
        Self {
            source_folder: None,
            status: JobStatus::Idle,
            started_at: None,
            paused_at: None,
            paused_duration: Duration::zero(),
            processed_count: 0,
            total_count: 0,
            generation: 0,
        }
    }
}

impl BatchJob {
    /// Start time shifted forward by the time spent paused, so that speed and
    /// ETA only count active processing time.
    pub fn effective_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let mut paused = self.paused_duration;
        if let Some(at) = self.paused_at {
            if now > at {
                paused = paused + (now - at);
            }
        }
        Some(started + paused)
    }
}

/// What the poll loop should do after a status result is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Applied; keep polling.
    Continue,
    /// Not applied (a stop is in flight); keep polling.
    Discarded,
    /// The server reported completion; stop polling.
    Finished,
    /// The result belongs to a previous run or the job is no longer active.
    Stale,
}

/// Immutable view of the controller state, published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job: BatchJob,
    pub items: Vec<ProcessedItem>,
    pub selected_folder: Option<String>,
    pub folder_stats: Option<FolderStats>,
    pub in_flight: Option<Transition>,
    pub last_error: Option<String>,
    pub settings: Settings,
}

/// State owned by the batch controller. Observers only see [`JobSnapshot`]s.
///
/// Every method is synchronous and takes `now` explicitly.
#[derive(Debug, Clone, Default)]
pub struct JobState {
    pub(crate) job: BatchJob,
    pub(crate) items: Vec<ProcessedItem>,
    /// Captions saved locally that the server has not echoed back yet.
    pub(crate) pending_edits: HashMap<ItemId, String>,
    pub(crate) selected_folder: Option<String>,
    pub(crate) folder_stats: Option<FolderStats>,
    pub(crate) in_flight: Option<Transition>,
    pub(crate) last_error: Option<String>,
    pub(crate) settings: Settings,
    pub(crate) settings_revision: u64,
}

impl JobState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn job(&self) -> &BatchJob {
        &self.job
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn items(&self) -> &[ProcessedItem] {
        &self.items
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job: self.job.clone(),
            items: self.items.clone(),
            selected_folder: self.selected_folder.clone(),
            folder_stats: self.folder_stats,
            in_flight: self.in_flight,
            last_error: self.last_error.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Only one lifecycle request may be outstanding at a time.
    fn ensure_no_request_in_flight(&self) -> Result<()> {
        match self.in_flight {
            Some(t) => Err(CaptionError::TransitionInFlight(t.as_str())),
            None => Ok(()),
        }
    }

    /// Fold an open pause into `paused_duration`.
    fn close_pause(&mut self, now: DateTime<Utc>) {
        if let Some(at) = self.job.paused_at.take() {
            if now > at {
                self.job.paused_duration = self.job.paused_duration + (now - at);
            }
        }
    }

    fn invalid(&self, action: Transition) -> CaptionError {
        CaptionError::InvalidTransition {
            action: action.as_str(),
            status: self.job.status,
        }
    }

    pub(crate) fn record_error(&mut self, err: &CaptionError) {
        self.last_error = Some(err.to_string());
    }

    // -- Folder selection --

    /// Replace the selected folder and its reconstructed items.
    pub fn select_folder(&mut self, folder: &str, contents: &FolderContents) -> Result<()> {
        if self.job.status.is_active() {
            return Err(CaptionError::InvalidTransition {
                action: "change folder",
                status: self.job.status,
            });
        }
        self.selected_folder = Some(folder.to_string());
        self.folder_stats = Some(contents.stats);
        self.items = folders::reconstruct_items(folder, contents);
        self.pending_edits.clear();
        self.job.total_count = contents.stats.total_images;
        Ok(())
    }

    /// Apply a folder stats refresh. Ignored for any folder but the selected one.
    pub fn apply_folder_stats(&mut self, folder: &str, stats: FolderStats) -> bool {
        if self.selected_folder.as_deref() != Some(folder) {
            return false;
        }
        self.folder_stats = Some(stats);
        true
    }

    /// Folder stats, when they belong to `folder`.
    pub fn stats_for(&self, folder: &str) -> Option<&FolderStats> {
        match self.selected_folder.as_deref() {
            Some(selected) if selected == folder => self.folder_stats.as_ref(),
            _ => None,
        }
    }

    // -- Start --

    /// `Idle|Completed -> Running`. Returns the new run's generation.
    pub fn begin_start(&mut self, folder: &str, now: DateTime<Utc>) -> Result<u64> {
        self.ensure_no_request_in_flight()?;
        if !matches!(self.job.status, JobStatus::Idle | JobStatus::Completed) {
            return Err(self.invalid(Transition::Start));
        }

        let total = self
            .stats_for(folder)
            .map(|s| s.total_images)
            .unwrap_or(0);

        self.job.generation += 1;
        self.job.source_folder = Some(folder.to_string());
        self.job.status = JobStatus::Running;
        self.job.started_at = Some(now);
        self.job.paused_at = None;
        self.job.paused_duration = Duration::zero();
        self.job.processed_count = 0;
        self.job.total_count = total;
        self.in_flight = Some(Transition::Start);
        self.last_error = None;
        Ok(self.job.generation)
    }

    pub fn confirm_start(&mut self, generation: u64) {
        if self.job.generation == generation && self.in_flight == Some(Transition::Start) {
            self.in_flight = None;
        }
    }

    /// The start request failed: back to `Idle`.
    pub fn fail_start(&mut self, generation: u64, err: &CaptionError) {
        if self.job.generation != generation {
            return;
        }
        if self.in_flight == Some(Transition::Start) {
            self.in_flight = None;
        }
        if self.job.status == JobStatus::Running {
            self.job.status = JobStatus::Idle;
            self.job.started_at = None;
        }
        self.record_error(err);
    }

    // -- Pause / resume --

    /// Pause is not applied until the server confirms.
    pub fn begin_pause(&mut self) -> Result<()> {
        self.ensure_no_request_in_flight()?;
        if self.job.status != JobStatus::Running {
            return Err(self.invalid(Transition::Pause));
        }
        self.in_flight = Some(Transition::Pause);
        Ok(())
    }

    pub fn confirm_pause(&mut self, now: DateTime<Utc>) {
        if self.in_flight == Some(Transition::Pause) {
            self.in_flight = None;
        }
        if self.job.status == JobStatus::Running {
            self.job.status = JobStatus::Paused;
            self.job.paused_at = Some(now);
            self.last_error = None;
        }
    }

    pub fn begin_resume(&mut self) -> Result<()> {
        self.ensure_no_request_in_flight()?;
        if self.job.status != JobStatus::Paused {
            return Err(self.invalid(Transition::Resume));
        }
        self.in_flight = Some(Transition::Resume);
        Ok(())
    }

    pub fn confirm_resume(&mut self, now: DateTime<Utc>) {
        if self.in_flight == Some(Transition::Resume) {
            self.in_flight = None;
        }
        if self.job.status == JobStatus::Paused {
            self.close_pause(now);
            self.job.status = JobStatus::Running;
            self.last_error = None;
        }
    }

    /// A pause or resume request failed; the state is left as it was.
    pub fn fail_transition(&mut self, action: Transition, err: &CaptionError) {
        if self.in_flight == Some(action) {
            self.in_flight = None;
        }
        self.record_error(err);
    }

    // -- Stop --

    /// `Running|Paused -> Stopping`. Returns the state to restore on failure,
    /// or `None` when there is nothing to stop (idempotent no-op).
    pub fn begin_stop(&mut self) -> Result<Option<JobStatus>> {
        match self.job.status {
            JobStatus::Idle | JobStatus::Completed | JobStatus::Stopping => return Ok(None),
            JobStatus::Running | JobStatus::Paused => {}
        }
        self.ensure_no_request_in_flight()?;
        let previous = self.job.status;
        self.job.status = JobStatus::Stopping;
        self.in_flight = Some(Transition::Stop);
        Ok(Some(previous))
    }

    /// Stopped on the server: `Stopping -> Idle`. Items are kept.
    pub fn confirm_stop(&mut self, now: DateTime<Utc>) {
        if self.in_flight == Some(Transition::Stop) {
            self.in_flight = None;
        }
        if self.job.status == JobStatus::Stopping {
            self.close_pause(now);
            self.job.status = JobStatus::Idle;
            self.last_error = None;
        }
    }

    pub fn fail_stop(&mut self, previous: JobStatus, err: &CaptionError) {
        if self.in_flight == Some(Transition::Stop) {
            self.in_flight = None;
        }
        if self.job.status == JobStatus::Stopping {
            self.job.status = previous;
        }
        self.record_error(err);
    }

    // -- Polling --

    /// Merge one status result fetched by the poll loop of `generation`.
    pub fn apply_status(&mut self, generation: u64, status: &BatchStatus) -> PollOutcome {
        if generation != self.job.generation {
            return PollOutcome::Stale;
        }
        match self.job.status {
            JobStatus::Running | JobStatus::Paused => {}
            JobStatus::Stopping => return PollOutcome::Discarded,
            JobStatus::Idle | JobStatus::Completed => return PollOutcome::Stale,
        }

        self.merge_items(&status.items);
        let processed = status.processed_count.max(status.items.len());
        if processed > self.job.processed_count {
            self.job.processed_count = processed;
        }
        if status.total_count > 0 {
            self.job.total_count = status.total_count;
        }
        if self.job.total_count > 0 && self.job.processed_count > self.job.total_count {
            self.job.processed_count = self.job.total_count;
        }

        let finished = match self.job.status {
            JobStatus::Running => !status.is_processing,
            JobStatus::Paused => {
                !status.is_processing
                    && self.job.total_count > 0
                    && self.job.processed_count >= self.job.total_count
            }
            _ => false,
        };

        if finished {
            self.job.paused_at = None;
            self.job.status = JobStatus::Completed;
            if matches!(
                self.in_flight,
                Some(Transition::Pause) | Some(Transition::Resume)
            ) {
                self.in_flight = None;
            }
            PollOutcome::Finished
        } else {
            PollOutcome::Continue
        }
    }

    /// Merge server items into the local list by identity.
    ///
    /// Server data wins for status and new items; a caption edited locally
    /// is kept until the server echoes it back. Items matched by filename
    /// replace their folder-reconstructed counterparts.
    pub fn merge_items(&mut self, incoming: &[ProcessedItem]) {
        for server in incoming {
            let idx = self
                .items
                .iter()
                .position(|i| i.id == server.id)
                .or_else(|| {
                    self.items
                        .iter()
                        .position(|i| i.filename == server.filename)
                });

            let mut merged = server.clone();
            if let Some(edited) = self.pending_edits.get(&server.id) {
                if &server.caption == edited {
                    self.pending_edits.remove(&server.id);
                } else {
                    merged.caption = edited.clone();
                }
            }

            match idx {
                Some(i) => {
                    let local_id = self.items[i].id;
                    if local_id != merged.id {
                        // The edit follows the item to its server id
                        if let Some(edit) = self.pending_edits.remove(&local_id) {
                            if edit != server.caption {
                                merged.caption = edit.clone();
                                self.pending_edits.insert(merged.id, edit);
                            }
                        }
                    }
                    self.items[i] = merged;
                }
                None => self.items.push(merged),
            }
        }

        let items = &self.items;
        self.pending_edits
            .retain(|id, _| items.iter().any(|i| i.id == *id));
    }

    /// Apply a caption edit the server has accepted.
    pub fn apply_caption_edit(&mut self, updated: ProcessedItem) {
        self.pending_edits
            .insert(updated.id, updated.caption.clone());
        match self.items.iter_mut().find(|i| i.id == updated.id) {
            Some(existing) => *existing = updated,
            None => self.items.push(updated),
        }
    }

    // -- Settings --

    /// Apply a local settings change; returns the new revision.
    pub fn update_settings(&mut self, patch: SettingsPatch) -> u64 {
        self.settings.merge(patch);
        self.settings_revision += 1;
        self.settings_revision
    }

    /// Apply settings returned by the server, unless a newer local edit exists.
    pub fn apply_settings_echo(&mut self, revision: u64, settings: Settings) -> bool {
        if revision != self.settings_revision {
            return false;
        }
        self.settings = settings;
        true
    }

    /// Replace settings wholesale (initial load).
    pub fn load_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.settings_revision += 1;
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FolderFile, ItemStatus};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn item(id: u64, filename: &str, caption: &str) -> ProcessedItem {
        ProcessedItem {
            id,
            filename: filename.into(),
            image: String::new(),
            caption: caption.into(),
            status: ItemStatus::Success,
            timestamp: String::new(),
            error_message: None,
        }
    }

    fn status(processed: usize, total: usize, is_processing: bool) -> BatchStatus {
        BatchStatus {
            processed_count: processed,
            total_count: total,
            is_processing,
            ..Default::default()
        }
    }

    fn running() -> (JobState, u64) {
        let mut state = JobState::default();
        let generation = state.begin_start("/data/f", t0()).unwrap();
        state.confirm_start(generation);
        (state, generation)
    }

    #[test]
    fn test_start_sets_running_and_started_at() {
        let mut state = JobState::default();
        let generation = state.begin_start("/data/f", t0()).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(state.status(), JobStatus::Running);
        assert_eq!(state.job().started_at, Some(t0()));
        assert_eq!(state.in_flight, Some(Transition::Start));
        state.confirm_start(generation);
        assert_eq!(state.in_flight, None);
    }

    #[test]
    fn test_failed_start_reverts_to_idle() {
        let mut state = JobState::default();
        let generation = state.begin_start("/data/f", t0()).unwrap();
        state.fail_start(generation, &CaptionError::Other("boom".into()));
        assert_eq!(state.status(), JobStatus::Idle);
        assert_eq!(state.job().started_at, None);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_start_twice_refused() {
        let (mut state, _) = running();
        let err = state.begin_start("/data/f", t0()).unwrap_err();
        assert!(matches!(err, CaptionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pause_not_applied_before_confirmation() {
        let (mut state, _) = running();
        state.begin_pause().unwrap();
        assert_eq!(state.status(), JobStatus::Running);
        // Second pause while the first is in flight
        assert!(matches!(
            state.begin_pause(),
            Err(CaptionError::TransitionInFlight("pause"))
        ));
        state.confirm_pause(t0() + Duration::minutes(1));
        assert_eq!(state.status(), JobStatus::Paused);
    }

    #[test]
    fn test_failed_pause_stays_running() {
        let (mut state, _) = running();
        state.begin_pause().unwrap();
        state.fail_transition(Transition::Pause, &CaptionError::Other("503".into()));
        assert_eq!(state.status(), JobStatus::Running);
        assert_eq!(state.in_flight, None);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn test_resume_requires_paused() {
        let (mut state, _) = running();
        assert!(state.begin_resume().is_err());
    }

    #[test]
    fn test_paused_time_excluded_from_effective_start() {
        let (mut state, _) = running();
        state.begin_pause().unwrap();
        state.confirm_pause(t0() + Duration::minutes(5));
        // Still paused: the open pause counts too
        assert_eq!(
            state.job().effective_start(t0() + Duration::minutes(8)),
            Some(t0() + Duration::minutes(3))
        );
        state.begin_resume().unwrap();
        state.confirm_resume(t0() + Duration::minutes(15));
        assert_eq!(state.status(), JobStatus::Running);
        assert_eq!(state.job().started_at, Some(t0()));
        assert_eq!(
            state.job().effective_start(t0() + Duration::minutes(20)),
            Some(t0() + Duration::minutes(10))
        );
    }

    #[test]
    fn test_stop_cycle_keeps_items() {
        let (mut state, generation) = running();
        let mut s = status(1, 3, true);
        s.items = vec![item(1, "a.jpg", "a")];
        state.apply_status(generation, &s);

        let previous = state.begin_stop().unwrap();
        assert_eq!(previous, Some(JobStatus::Running));
        assert_eq!(state.status(), JobStatus::Stopping);
        // Stop while stopping is a no-op
        assert_eq!(state.begin_stop().unwrap(), None);
        // Pause while stopping is refused
        assert!(state.begin_pause().is_err());

        state.confirm_stop(t0());
        assert_eq!(state.status(), JobStatus::Idle);
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn test_failed_stop_restores_previous() {
        let (mut state, _) = running();
        state.begin_pause().unwrap();
        state.confirm_pause(t0());
        let previous = state.begin_stop().unwrap().unwrap();
        state.fail_stop(previous, &CaptionError::Other("down".into()));
        assert_eq!(state.status(), JobStatus::Paused);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut state = JobState::default();
        assert_eq!(state.begin_stop().unwrap(), None);
        assert_eq!(state.status(), JobStatus::Idle);
    }

    #[test]
    fn test_poll_completion() {
        let (mut state, generation) = running();
        assert_eq!(
            state.apply_status(generation, &status(2, 4, true)),
            PollOutcome::Continue
        );
        assert_eq!(
            state.apply_status(generation, &status(4, 4, false)),
            PollOutcome::Finished
        );
        assert_eq!(state.status(), JobStatus::Completed);
        assert_eq!(state.job().processed_count, 4);
        // Anything after completion is stale
        assert_eq!(
            state.apply_status(generation, &status(4, 4, false)),
            PollOutcome::Stale
        );
        assert_eq!(state.begin_stop().unwrap(), None);
    }

    #[test]
    fn test_poll_from_old_generation_is_stale() {
        let (mut state, generation) = running();
        state.apply_status(generation, &status(1, 1, false));
        let next = state.begin_start("/data/f", t0()).unwrap();
        assert_eq!(next, generation + 1);
        assert_eq!(
            state.apply_status(generation, &status(9, 9, false)),
            PollOutcome::Stale
        );
        assert_eq!(state.status(), JobStatus::Running);
    }

    #[test]
    fn test_poll_discarded_while_stopping() {
        let (mut state, generation) = running();
        state.begin_stop().unwrap();
        let mut s = status(3, 3, false);
        s.items = vec![item(7, "x.jpg", "x")];
        assert_eq!(state.apply_status(generation, &s), PollOutcome::Discarded);
        assert!(state.items().is_empty());
        assert_eq!(state.status(), JobStatus::Stopping);
    }

    #[test]
    fn test_paused_job_completes_only_when_all_done() {
        let (mut state, generation) = running();
        state.begin_pause().unwrap();
        state.confirm_pause(t0());
        assert_eq!(
            state.apply_status(generation, &status(2, 5, false)),
            PollOutcome::Continue
        );
        assert_eq!(state.status(), JobStatus::Paused);
        assert_eq!(
            state.apply_status(generation, &status(5, 5, false)),
            PollOutcome::Finished
        );
    }

    #[test]
    fn test_processed_never_exceeds_total() {
        let (mut state, generation) = running();
        state.apply_status(generation, &status(12, 10, true));
        assert_eq!(state.job().processed_count, 10);
        // Counts never go backwards
        state.apply_status(generation, &status(3, 10, true));
        assert_eq!(state.job().processed_count, 10);
    }

    #[test]
    fn test_merge_keeps_local_edit_until_echoed() {
        let (mut state, generation) = running();
        let mut s = status(1, 2, true);
        s.items = vec![item(1, "a.jpg", "original")];
        state.apply_status(generation, &s);

        state.apply_caption_edit(item(1, "a.jpg", "edited"));

        // A poll carrying the old caption does not undo the edit
        state.apply_status(generation, &s);
        assert_eq!(state.items()[0].caption, "edited");

        // New items are still appended
        s.items.push(item(2, "b.jpg", "b"));
        state.apply_status(generation, &s);
        assert_eq!(state.items().len(), 2);
        assert_eq!(state.items()[0].caption, "edited");

        // Once the server echoes the edit, server data is authoritative again
        s.items[0].caption = "edited".into();
        state.apply_status(generation, &s);
        assert!(state.pending_edits.is_empty());
        s.items[0].caption = "server rewrite".into();
        state.apply_status(generation, &s);
        assert_eq!(state.items()[0].caption, "server rewrite");
    }

    #[test]
    fn test_merge_updates_status_in_place() {
        let (mut state, generation) = running();
        let mut pending = item(1, "a.jpg", "");
        pending.status = ItemStatus::Pending;
        let mut s = status(0, 1, true);
        s.items = vec![pending];
        state.apply_status(generation, &s);

        s.items[0].status = ItemStatus::Error;
        s.items[0].error_message = Some("timeout".into());
        state.apply_status(generation, &s);
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].status, ItemStatus::Error);
    }

    #[test]
    fn test_server_item_supersedes_reconstructed_one() {
        let mut state = JobState::default();
        let contents = FolderContents {
            stats: FolderStats {
                total_images: 2,
                captioned: 1,
                uncaptioned: 1,
            },
            files: vec![FolderFile {
                filename: "a.jpg".into(),
                has_caption: true,
                caption: Some("old".into()),
                last_modified: None,
            }],
        };
        state.select_folder("/data/f", &contents).unwrap();
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.job().total_count, 2);

        let generation = state.begin_start("/data/f", t0()).unwrap();
        assert_eq!(state.job().total_count, 2);
        let mut s = status(1, 2, true);
        s.items = vec![item(1, "a.jpg", "new")];
        state.apply_status(generation, &s);
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].id, 1);
        assert_eq!(state.items()[0].caption, "new");
    }

    #[test]
    fn test_edit_of_reconstructed_item_survives_id_change() {
        let mut state = JobState::default();
        let contents = FolderContents {
            stats: FolderStats {
                total_images: 2,
                captioned: 1,
                uncaptioned: 1,
            },
            files: vec![FolderFile {
                filename: "a.jpg".into(),
                has_caption: true,
                caption: Some("old".into()),
                last_modified: None,
            }],
        };
        state.select_folder("/data/f", &contents).unwrap();
        let local_id = state.items()[0].id;
        assert_ne!(local_id, 5);
        state.apply_caption_edit(item(local_id, "a.jpg", "edited"));

        let generation = state.begin_start("/data/f", t0()).unwrap();
        let mut s = status(1, 2, true);
        s.items = vec![item(5, "a.jpg", "old")];

        state.apply_status(generation, &s);
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].id, 5);
        assert_eq!(state.items()[0].caption, "edited");

        state.apply_status(generation, &s);
        assert_eq!(state.items()[0].caption, "edited");
        assert_eq!(state.pending_edits.get(&5).map(String::as_str), Some("edited"));
        assert!(!state.pending_edits.contains_key(&local_id));

        s.items[0].caption = "edited".into();
        state.apply_status(generation, &s);
        assert!(state.pending_edits.is_empty());
    }

    #[test]
    fn test_pending_edits_only_track_listed_items() {
        let (mut state, generation) = running();
        let mut s = status(1, 2, true);
        s.items = vec![item(1, "a.jpg", "a")];
        state.apply_status(generation, &s);
        state.apply_caption_edit(item(1, "a.jpg", "edited a"));
        state.pending_edits.insert(99, "orphan".into());

        state.apply_status(generation, &s);
        assert_eq!(state.pending_edits.len(), 1);
        assert!(state.pending_edits.contains_key(&1));
    }

    #[test]
    fn test_select_folder_refused_while_running() {
        let (mut state, _) = running();
        let err = state
            .select_folder("/data/other", &FolderContents::default())
            .unwrap_err();
        assert!(matches!(err, CaptionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_folder_stats_for_other_folder_ignored() {
        let mut state = JobState::default();
        state
            .select_folder("/data/f", &FolderContents::default())
            .unwrap();
        let stats = FolderStats {
            total_images: 3,
            captioned: 3,
            uncaptioned: 0,
        };
        assert!(!state.apply_folder_stats("/data/g", stats));
        assert!(state.apply_folder_stats("/data/f", stats));
        assert_eq!(state.stats_for("/data/f"), Some(&stats));
        assert_eq!(state.stats_for("/data/g"), None);
    }

    #[test]
    fn test_settings_echo_respects_revision() {
        let mut state = JobState::default();
        let first = state.update_settings(SettingsPatch::default().api_key("a"));
        let second = state.update_settings(SettingsPatch::default().api_key("b"));

        let mut stale = Settings::default();
        stale.model.api_key = "a".into();
        assert!(!state.apply_settings_echo(first, stale));
        assert_eq!(state.settings().model.api_key, "b");

        let mut fresh = Settings::default();
        fresh.model.api_key = "b".into();
        assert!(state.apply_settings_echo(second, fresh));
    }
}

//! # caption-batch
//!
//! Async client and job controller for a batch image captioning backend.
//!
//! ## Key Features
//!
//! - **Batch job state machine** with server-confirmed pause/resume, a
//!   transient `Stopping` state, and automatic completion from polling
//! - **Generation-tagged status polling** so results from an earlier run or
//!   arriving during a stop are never applied
//! - **Identity-based item merging** that keeps a saved caption edit until
//!   the server echoes it
//! - **Token and cost estimation** with a `cl100k_base` tokenizer and a
//!   resolution-tiered image cost model
//! - **Progress, speed and ETA** as pure functions over an injected `now`
//!
//! ## Quick Start
//!
//! ```no_run
//! use caption_batch::*;
//! use chrono::Utc;
//!
//! # async fn example() -> caption_batch::Result<()> {
//! let config = ClientConfig::from_env();
//! let controller = BatchController::new(CaptionApiClient::from_config(&config), config);
//!
//! controller.load_settings().await?;
//! let stats = controller.select_folder("/data/houses").await?;
//! if show_start_button(Some(&stats)) {
//!     controller.start("/data/houses").await?;
//! }
//!
//! let report = controller.progress_report(Utc::now());
//! println!("{:.0}% at {}", report.percent, report.speed_display());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod folders;
pub mod job;
pub mod poller;
pub mod progress;
pub mod settings;
pub mod templates;
pub mod tokens;
pub mod types;

pub use backend::BatchBackend;
pub use client::CaptionApiClient;
pub use config::ClientConfig;
pub use controller::BatchController;
pub use error::{CaptionError, Result};
pub use folders::{
    hash_filename, is_empty_folder, show_reprocess_button, show_start_button, FolderAction,
};
pub use job::{BatchJob, JobSnapshot, JobStatus, PollOutcome, Transition};
pub use progress::ProgressReport;
pub use settings::{
    ErrorHandling, ModelConfig, ProcessingConfig, Provider, Settings, SettingsPatch, SettingsWire,
};
pub use templates::TemplateLibrary;
pub use tokens::{
    calculate_cost, CostProjection, ImageDimensions, TargetImage, TokenCount, TokenEstimator,
    Tokenizer,
};
pub use types::{
    BatchStartRequest, BatchStatus, ExamplePair, FolderContents, FolderFile, FolderInfo,
    FolderStats, ItemId, ItemStatus, ProcessedItem, PromptTemplate,
};

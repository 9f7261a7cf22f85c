//! Drive a batch against an in-process backend and watch its snapshots.
//!
//! The simulated backend captions two images per status poll. The run is
//! paused and resumed once along the way.
//!
//! ```sh
//! cargo run --example simulated_batch
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use caption_batch::*;

const FOLDER: &str = "/data/demo";
const TOTAL: usize = 10;

#[derive(Default)]
struct SimulatedBackend {
    processed: AtomicUsize,
}

fn scan_folder(folder: &str) -> anyhow::Result<FolderContents> {
    anyhow::ensure!(folder == FOLDER, "unknown folder {}", folder);
    Ok(FolderContents {
        stats: FolderStats {
            total_images: TOTAL,
            captioned: 0,
            uncaptioned: TOTAL,
        },
        files: Vec::new(),
    })
}

impl BatchBackend for SimulatedBackend {
    async fn start_batch(&self, _request: &BatchStartRequest) -> Result<()> {
        self.processed.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn pause_batch(&self) -> Result<()> {
        Ok(())
    }

    async fn resume_batch(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_batch(&self) -> Result<()> {
        Ok(())
    }

    async fn batch_status(&self) -> Result<BatchStatus> {
        let done = (self.processed.fetch_add(2, Ordering::SeqCst) + 2).min(TOTAL);
        let items = (0..done)
            .map(|i| ProcessedItem {
                id: i as ItemId + 1,
                filename: format!("img_{:03}.jpg", i),
                image: format!("/data/demo/img_{:03}.jpg", i),
                caption: format!("Simulated caption {}", i),
                status: ItemStatus::Success,
                timestamp: chrono::Utc::now().to_rfc3339(),
                error_message: None,
            })
            .collect();
        Ok(BatchStatus {
            processed_count: done,
            total_count: TOTAL,
            items,
            is_processing: done < TOTAL,
            ..Default::default()
        })
    }

    async fn folder_contents(&self, folder: &str) -> Result<FolderContents> {
        Ok(scan_folder(folder)?)
    }

    async fn update_item_caption(&self, id: ItemId, caption: &str) -> Result<ProcessedItem> {
        Err(CaptionError::Other(format!(
            "item {} is read-only here (caption {:?})",
            id, caption
        )))
    }

    async fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::default();
        settings.model.api_key = "sk-demo".into();
        Ok(settings)
    }

    async fn update_settings(&self, _patch: &SettingsWire) -> Result<Settings> {
        self.settings().await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::builder()
        .with_poll_interval(Duration::from_millis(200))
        .with_folder_refresh_interval(Duration::from_millis(500))
        .build();
    let controller = BatchController::new(SimulatedBackend::default(), config);

    controller.load_settings().await?;
    let stats = controller.select_folder(FOLDER).await?;
    println!("{} images to caption", stats.uncaptioned);

    let mut updates = controller.subscribe();
    controller.start(FOLDER).await?;

    let mut paused_once = false;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        println!(
            "[{}] {}/{} items",
            snapshot.job.status, snapshot.job.processed_count, snapshot.job.total_count
        );

        match snapshot.job.status {
            JobStatus::Running if !paused_once && snapshot.job.processed_count >= 4 => {
                paused_once = true;
                controller.pause().await?;
                tokio::time::sleep(Duration::from_millis(300)).await;
                controller.resume().await?;
            }
            JobStatus::Completed => break,
            _ => {}
        }
    }

    let snapshot = controller.snapshot();
    println!("captioned {} items", snapshot.items.len());
    Ok(())
}

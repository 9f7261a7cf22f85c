//! Terminal front-end for the caption backend.

use std::process::ExitCode;

use caption_batch::*;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "caption-batch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Backend API base URL (overrides CAPTION_API_URL)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is reachable
    Health,
    /// List the image folders known to the backend
    Folders,
    /// Show the backend's batch status
    Status,
    /// Estimate tokens and cost for captioning a folder
    Estimate {
        folder: String,
        /// Count every image, not only the uncaptioned ones
        #[arg(long)]
        reprocess: bool,
    },
    /// Caption a folder and follow progress until it finishes (Ctrl-C stops)
    Run {
        folder: String,
        /// Re-caption a fully captioned folder, overwriting captions
        #[arg(long)]
        reprocess: bool,
        /// Confirm overwriting existing captions
        #[arg(long)]
        yes: bool,
    },
    /// Pause the running batch
    Pause,
    /// Resume a paused batch
    Resume,
    /// Stop the running batch
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = ClientConfig::from_env();
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    let client = CaptionApiClient::from_config(&config);
    let endpoint = client.endpoint().to_string();

    let result = match cli.command {
        Commands::Health => health(&client).await,
        Commands::Folders => folders(&client).await,
        Commands::Status => status(&client).await,
        Commands::Estimate { folder, reprocess } => estimate(&client, &folder, reprocess).await,
        Commands::Run {
            folder,
            reprocess,
            yes,
        } => run(client, config, &folder, reprocess, yes).await,
        Commands::Pause => client.pause().await,
        Commands::Resume => client.resume().await,
        Commands::Stop => client.stop().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_backend() {
                eprintln!("backend: {endpoint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn health(client: &CaptionApiClient) -> Result<()> {
    if client.health().await? {
        println!("Backend at {} is up", client.endpoint());
        Ok(())
    } else {
        Err(CaptionError::InvalidResponse(format!(
            "Backend at {} answered with an error",
            client.endpoint()
        )))
    }
}

async fn folders(client: &CaptionApiClient) -> Result<()> {
    let folders = client.folders().await?;
    if folders.is_empty() {
        println!("No folders found");
    }
    for f in folders {
        println!("{:<24} {:>6} images  {}", f.name, f.image_count, f.path);
    }
    Ok(())
}

async fn status(client: &CaptionApiClient) -> Result<()> {
    let status = client.status().await?;
    println!(
        "{}: {}/{} processed",
        status.phase(),
        status.processed_count,
        status.total_count
    );
    if let Some(errors) = status.error_count {
        println!("errors: {}", errors);
    }
    if let Some(cost) = status.total_cost {
        println!("cost so far: {}", tokens::format_cost(cost));
    }
    Ok(())
}

async fn estimate(client: &CaptionApiClient, folder: &str, reprocess: bool) -> Result<()> {
    let settings = client.get_settings().await?;
    let library = TemplateLibrary::new(client.templates().await?);
    let examples = client.examples().await?;
    let contents = client.folder_contents(folder).await?;

    let images = if reprocess {
        contents.stats.total_images
    } else {
        contents.stats.uncaptioned
    };

    let estimator = TokenEstimator::cl100k()?;
    let per_image = estimator.count_tokens(library.active(), &examples, TargetImage::Unknown);
    let projection =
        CostProjection::new(per_image, 0, images, settings.model.cost_per_token);

    println!("template:       {}", library.active().name);
    println!("examples:       {}", examples.len());
    println!("system prompt:  {} tokens", per_image.system_prompt_tokens);
    println!("template:       {} tokens", per_image.template_tokens);
    println!("examples:       {} tokens", per_image.example_tokens);
    println!("images:         {} tokens", per_image.image_tokens);
    println!("per image:      {} tokens", per_image.per_image());
    println!("images to run:  {}", images);
    println!("estimated cost: {}", projection.estimated_total_display());
    Ok(())
}

async fn run(
    client: CaptionApiClient,
    config: ClientConfig,
    folder: &str,
    reprocess: bool,
    confirmed: bool,
) -> Result<()> {
    let interval = config.poll_interval;
    let controller = BatchController::new(client, config);
    controller.load_settings().await?;

    let stats = controller.select_folder(folder).await?;
    if is_empty_folder(Some(&stats)) {
        println!("No images found in {}", folder);
        return Ok(());
    }

    if reprocess {
        controller.reprocess_all(folder, confirmed).await?;
    } else {
        controller.start(folder).await?;
    }
    println!("Captioning {} ({} images)", folder, stats.total_images);

    let mut ticker = tokio::time::interval(interval);
    let mut stopping = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                println!("Stopping...");
                controller.stop().await?;
            }
        }

        let snapshot = controller.snapshot();
        let report = controller.progress_report(Utc::now());
        println!(
            "[{}] {}/{} ({:.0}%)  speed {}  left {}  eta {}",
            snapshot.job.status,
            report.processed,
            report.total,
            report.percent,
            report.speed_display(),
            report.time_left_display(),
            report.completion_display(),
        );

        match snapshot.job.status {
            JobStatus::Completed => {
                println!("Done: {} items", snapshot.items.len());
                break;
            }
            JobStatus::Idle => break,
            JobStatus::Running | JobStatus::Paused if !controller.is_polling() => {
                // The polling loop cancelled itself; the server job may still be running.
                return Err(CaptionError::Other(
                    snapshot
                        .last_error
                        .unwrap_or_else(|| "Lost contact with the backend".to_string()),
                ));
            }
            _ => {}
        }
    }

    controller.shutdown();
    Ok(())
}

//! Estimate tokens and cost for a batch without contacting a backend.
//!
//! ```sh
//! cargo run --example estimate_cost
//! ```

use caption_batch::progress::ProgressReport;
use caption_batch::templates::default_template;
use caption_batch::*;
use chrono::{Duration, Utc};

fn main() -> anyhow::Result<()> {
    let estimator = TokenEstimator::cl100k()?;
    let template = default_template();

    let examples = vec![ExamplePair {
        id: 1,
        image: "/examples/brick_house.jpg".into(),
        filename: "brick_house.jpg".into(),
        caption: "A two-storey red brick house with white window frames and a slate roof.".into(),
        width: Some(1024),
        height: Some(768),
    }];

    // Zero-shot vs one-shot, for a 1920x1080 target
    let target = TargetImage::Known(ImageDimensions::new(1920, 1080));
    let zero_shot = estimator.count_tokens(&template, &[], target);
    let one_shot = estimator.count_tokens(&template, &examples, target);
    println!("zero-shot: {} tokens per image", zero_shot.per_image());
    println!("one-shot:  {} tokens per image", one_shot.per_image());

    let settings = Settings::default();
    let projection = CostProjection::new(one_shot, 120, 500, settings.model.cost_per_token);
    println!(
        "spent {} of an estimated {} ({})",
        projection.current_cost_display(),
        projection.estimated_total_display(),
        settings.model.model
    );

    // 120 of 500 done after 40 minutes
    let now = Utc::now();
    let report = ProgressReport::compute(120, 500, Some(now - Duration::minutes(40)), None, now);
    println!(
        "{:.0}% at {}, {} left, done around {}",
        report.percent,
        report.speed_display(),
        report.time_left_display(),
        report.completion_display()
    );

    Ok(())
}

//! Token and cost estimation for captioning requests.
//!
//! A request is the fixed system prompt, the active template, every example
//! caption, and one image per example plus (usually) the target image.
//! Image tokens follow a resolution-tiered model.

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::error::{CaptionError, Result};
use crate::types::{ExamplePair, PromptTemplate};

/// System prompt sent with every captioning request.
pub const SYSTEM_PROMPT: &str = "You are a highly accurate image captioning assistant. Your task is to generate detailed, accurate captions for images based on what you can directly observe. Follow the user's instructions carefully for the desired captioning style and format.";

/// Tokens charged for an image whose larger side is at most 512px.
pub const LOW_RES_IMAGE_TOKENS: usize = 85;
/// Tokens charged for an image whose larger side is at most 2048px.
pub const HIGH_RES_IMAGE_TOKENS: usize = 170;
/// Tokens charged for anything larger.
pub const DETAIL_IMAGE_TOKENS: usize = 340;
/// Flat per-image estimate when dimensions are unknown.
pub const DEFAULT_IMAGE_TOKENS: usize = HIGH_RES_IMAGE_TOKENS;

/// Breakdown of the tokens one captioning request consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    pub system_prompt_tokens: usize,
    pub template_tokens: usize,
    pub example_tokens: usize,
    pub image_tokens: usize,
    pub total_tokens: usize,
}

impl TokenCount {
    /// Tokens for a single request; what every image of a batch costs.
    pub fn per_image(&self) -> usize {
        self.system_prompt_tokens + self.template_tokens + self.example_tokens + self.image_tokens
    }

    /// Same breakdown, with `total_tokens` scaled to `images` requests.
    pub fn scaled(&self, images: usize) -> Self {
        Self {
            total_tokens: self.per_image() * images,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Tiered image token cost by the larger dimension.
pub fn image_token_count(dims: ImageDimensions) -> usize {
    let max_dimension = dims.width.max(dims.height);
    if max_dimension <= 512 {
        LOW_RES_IMAGE_TOKENS
    } else if max_dimension <= 2048 {
        HIGH_RES_IMAGE_TOKENS
    } else {
        DETAIL_IMAGE_TOKENS
    }
}

fn optional_image_tokens(dims: Option<ImageDimensions>) -> usize {
    dims.map(image_token_count).unwrap_or(DEFAULT_IMAGE_TOKENS)
}

/// The image being captioned, as far as the estimate is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetImage {
    /// Count only the examples (e.g. the few-shot preview).
    Excluded,
    /// An image will be sent but its size is not known yet.
    Unknown,
    Known(ImageDimensions),
}

/// Counts text tokens.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `cl100k_base` BPE, the encoding used by the GPT-4 family.
pub struct Cl100kTokenizer {
    bpe: CoreBPE,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| CaptionError::Tokenizer(format!("{e:#}")))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Computes [`TokenCount`]s for a template and example set.
pub struct TokenEstimator<T: Tokenizer = Cl100kTokenizer> {
    tokenizer: T,
}

impl TokenEstimator<Cl100kTokenizer> {
    /// Estimator backed by the `cl100k_base` encoding.
    pub fn cl100k() -> Result<Self> {
        Ok(Self::new(Cl100kTokenizer::new()?))
    }
}

impl<T: Tokenizer> TokenEstimator<T> {
    pub fn new(tokenizer: T) -> Self {
        Self { tokenizer }
    }

    pub fn count_tokens(
        &self,
        template: &PromptTemplate,
        examples: &[ExamplePair],
        target: TargetImage,
    ) -> TokenCount {
        let system_prompt_tokens = self.tokenizer.count(SYSTEM_PROMPT);
        let template_tokens = self.tokenizer.count(&template.content);

        let example_tokens = examples
            .iter()
            .map(|ex| self.tokenizer.count(&ex.caption))
            .sum();

        let example_image_tokens: usize = examples
            .iter()
            .map(|ex| optional_image_tokens(example_dimensions(ex)))
            .sum();
        let target_image_tokens = match target {
            TargetImage::Excluded => 0,
            TargetImage::Unknown => DEFAULT_IMAGE_TOKENS,
            TargetImage::Known(dims) => image_token_count(dims),
        };
        let image_tokens = example_image_tokens + target_image_tokens;

        TokenCount {
            system_prompt_tokens,
            template_tokens,
            example_tokens,
            image_tokens,
            total_tokens: system_prompt_tokens + template_tokens + example_tokens + image_tokens,
        }
    }
}

fn example_dimensions(ex: &ExamplePair) -> Option<ImageDimensions> {
    match (ex.width, ex.height) {
        (Some(w), Some(h)) => Some(ImageDimensions::new(w, h)),
        _ => None,
    }
}

/// Monetary cost of `total_tokens`, with `cost_per_token` priced per 1000 tokens.
pub fn calculate_cost(count: &TokenCount, cost_per_token: f64) -> f64 {
    count.total_tokens as f64 * cost_per_token / 1000.0
}

/// Spend so far and projected spend for a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostProjection {
    pub tokens: TokenCount,
    pub current_cost: f64,
    pub estimated_total_cost: f64,
}

impl CostProjection {
    pub fn new(per_request: TokenCount, processed: usize, total: usize, cost_per_token: f64) -> Self {
        Self {
            tokens: per_request,
            current_cost: calculate_cost(&per_request.scaled(processed), cost_per_token),
            estimated_total_cost: calculate_cost(&per_request.scaled(total), cost_per_token),
        }
    }

    pub fn current_cost_display(&self) -> String {
        format_cost(self.current_cost)
    }

    pub fn estimated_total_display(&self) -> String {
        format_cost(self.estimated_total_cost)
    }
}

pub fn format_cost(cost: f64) -> String {
    format!("${:.4}", cost)
}

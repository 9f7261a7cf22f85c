use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER: Provider = Provider::OpenAi;
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_COST_PER_TOKEN: f64 = 0.01;
pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_BATCH_SIZE: u32 = 50;
pub const DEFAULT_CONCURRENT_PROCESSING: u32 = 2;

/// Captioning provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "huggingface")]
    HuggingFace,
}

/// What the backend does when a single image fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    #[default]
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    /// Price per 1000 tokens.
    pub cost_per_token: f64,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER,
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            cost_per_token: DEFAULT_COST_PER_TOKEN,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelConfig {
    /// A start request is only allowed once an API key is present.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    pub batch_size: u32,
    pub error_handling: ErrorHandling,
    pub concurrent_processing: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            error_handling: ErrorHandling::Continue,
            concurrent_processing: DEFAULT_CONCURRENT_PROCESSING,
        }
    }
}

/// Combined settings record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(flatten)]
    pub model: ModelConfig,
    #[serde(flatten)]
    pub processing: ProcessingConfig,
}

/// Partial update of [`ModelConfig`]. Only known fields can be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelConfigPatch {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub cost_per_token: Option<f64>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Partial update of [`ProcessingConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingConfigPatch {
    pub batch_size: Option<u32>,
    pub error_handling: Option<ErrorHandling>,
    pub concurrent_processing: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub model: ModelConfigPatch,
    pub processing: ProcessingConfigPatch,
}

impl SettingsPatch {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.model.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.model.provider = Some(provider);
        self
    }

    pub fn cost_per_token(mut self, cost: f64) -> Self {
        self.model.cost_per_token = Some(cost);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.model.temperature = Some(temperature);
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.processing.batch_size = Some(size);
        self
    }

    pub fn error_handling(mut self, handling: ErrorHandling) -> Self {
        self.processing.error_handling = Some(handling);
        self
    }

    pub fn concurrent_processing(mut self, n: u32) -> Self {
        self.processing.concurrent_processing = Some(n);
        self
    }
}

impl ModelConfig {
    pub fn merge(&mut self, patch: ModelConfigPatch) {
        if let Some(v) = patch.provider {
            self.provider = v;
        }
        if let Some(v) = patch.model {
            self.model = v;
        }
        if let Some(v) = patch.api_key {
            self.api_key = v;
        }
        if let Some(v) = patch.cost_per_token {
            self.cost_per_token = v;
        }
        if let Some(v) = patch.temperature {
            self.temperature = v;
        }
        if let Some(v) = patch.max_tokens {
            self.max_tokens = v;
        }
    }
}

impl ProcessingConfig {
    pub fn merge(&mut self, patch: ProcessingConfigPatch) {
        if let Some(v) = patch.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = patch.error_handling {
            self.error_handling = v;
        }
        if let Some(v) = patch.concurrent_processing {
            self.concurrent_processing = v;
        }
    }
}

impl Settings {
    pub fn merge(&mut self, patch: SettingsPatch) {
        self.model.merge(patch.model);
        self.processing.merge(patch.processing);
    }
}

// -- Wire format --

/// `snake_case` settings record exchanged with `/settings`.
///
/// Every field is optional so a partially stored record still loads; missing
/// values are filled from the defaults when converted into [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_processing: Option<u32>,
}

impl From<&Settings> for SettingsWire {
    fn from(s: &Settings) -> Self {
        Self {
            provider: Some(s.model.provider),
            model: Some(s.model.model.clone()),
            api_key: Some(s.model.api_key.clone()),
            cost_per_token: Some(s.model.cost_per_token),
            temperature: Some(s.model.temperature),
            max_tokens: Some(s.model.max_tokens),
            batch_size: Some(s.processing.batch_size),
            error_handling: Some(s.processing.error_handling),
            concurrent_processing: Some(s.processing.concurrent_processing),
        }
    }
}

impl From<SettingsWire> for Settings {
    fn from(w: SettingsWire) -> Self {
        let defaults = Settings::default();
        Self {
            model: ModelConfig {
                provider: w.provider.unwrap_or(defaults.model.provider),
                model: w.model.unwrap_or(defaults.model.model),
                api_key: w.api_key.unwrap_or_default(),
                cost_per_token: w.cost_per_token.unwrap_or(defaults.model.cost_per_token),
                temperature: w.temperature.unwrap_or(defaults.model.temperature),
                max_tokens: w.max_tokens.unwrap_or(defaults.model.max_tokens),
            },
            processing: ProcessingConfig {
                batch_size: w.batch_size.unwrap_or(defaults.processing.batch_size),
                error_handling: w
                    .error_handling
                    .unwrap_or(defaults.processing.error_handling),
                concurrent_processing: w
                    .concurrent_processing
                    .unwrap_or(defaults.processing.concurrent_processing),
            },
        }
    }
}

impl From<&SettingsPatch> for SettingsWire {
    fn from(p: &SettingsPatch) -> Self {
        Self {
            provider: p.model.provider,
            model: p.model.model.clone(),
            api_key: p.model.api_key.clone(),
            cost_per_token: p.model.cost_per_token,
            temperature: p.model.temperature,
            max_tokens: p.model.max_tokens,
            batch_size: p.processing.batch_size,
            error_handling: p.processing.error_handling,
            concurrent_processing: p.processing.concurrent_processing,
        }
    }
}

impl SettingsWire {
    /// Fold a partial update into this record.
    pub fn apply(&mut self, other: SettingsWire) {
        self.provider = other.provider.or(self.provider);
        self.model = other.model.or(self.model.take());
        self.api_key = other.api_key.or(self.api_key.take());
        self.cost_per_token = other.cost_per_token.or(self.cost_per_token);
        self.temperature = other.temperature.or(self.temperature);
        self.max_tokens = other.max_tokens.or(self.max_tokens);
        self.batch_size = other.batch_size.or(self.batch_size);
        self.error_handling = other.error_handling.or(self.error_handling);
        self.concurrent_processing = other.concurrent_processing.or(self.concurrent_processing);
    }
}

/// `model_settings` object of the batch start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettingsWire {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub cost_per_token: f64,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl From<&ModelConfig> for ModelSettingsWire {
    fn from(m: &ModelConfig) -> Self {
        Self {
            provider: m.provider,
            model: m.model.clone(),
            api_key: m.api_key.clone(),
            cost_per_token: m.cost_per_token,
            temperature: m.temperature,
            max_tokens: m.max_tokens,
        }
    }
}

/// `processing_settings` object of the batch start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSettingsWire {
    pub batch_size: u32,
    pub error_handling: ErrorHandling,
    pub concurrent_processing: u32,
}

impl From<&ProcessingConfig> for ProcessingSettingsWire {
    fn from(p: &ProcessingConfig) -> Self {
        Self {
            batch_size: p.batch_size,
            error_handling: p.error_handling,
            concurrent_processing: p.concurrent_processing,
        }
    }
}

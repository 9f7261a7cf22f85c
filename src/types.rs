use serde::{Deserialize, Serialize};

use crate::settings::{ModelSettingsWire, ProcessingSettingsWire, Settings};

/// Identity of a processed item. Server-assigned, or a filename hash for
/// items reconstructed from a folder listing.
pub type ItemId = u64;

/// Per-item caption status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Error,
    Pending,
}

/// One captioned (or failed) image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedItem {
    pub id: ItemId,
    pub filename: String,
    /// Server path of the image, when known.
    #[serde(default, alias = "image_path")]
    pub image: String,
    #[serde(default)]
    pub caption: String,
    pub status: ItemStatus,
    /// ISO 8601 timestamp as reported by the server.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, alias = "error_message", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Server-reported batch status from `GET /batch-process/status`.
///
/// Both `camelCase` and `snake_case` spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    #[serde(default, alias = "processed_count")]
    pub processed_count: usize,
    #[serde(default, alias = "total_count")]
    pub total_count: usize,
    #[serde(default, alias = "processedItems")]
    pub items: Vec<ProcessedItem>,
    #[serde(default, alias = "is_processing")]
    pub is_processing: bool,
    #[serde(default, alias = "error_count")]
    pub error_count: Option<usize>,
    #[serde(default, alias = "current_batch")]
    pub current_batch: Option<usize>,
    #[serde(default, alias = "start_time")]
    pub start_time: Option<String>,
    #[serde(default, alias = "estimated_completion")]
    pub estimated_completion: Option<String>,
    /// Items per minute, as computed by the server.
    #[serde(default, alias = "processing_speed")]
    pub processing_speed: Option<f64>,
    #[serde(default, alias = "total_cost")]
    pub total_cost: Option<f64>,
}

impl BatchStatus {
    /// `processing` vs `completed`, derived from `is_processing`.
    pub fn phase(&self) -> &'static str {
        if self.is_processing {
            "processing"
        } else {
            "completed"
        }
    }
}

/// Captioning coverage snapshot of a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStats {
    #[serde(default)]
    pub total_images: usize,
    #[serde(default)]
    pub captioned: usize,
    #[serde(default)]
    pub uncaptioned: usize,
}

/// One image file in a folder listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderFile {
    pub filename: String,
    #[serde(default)]
    pub has_caption: bool,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// Response of `GET /folder-contents`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderContents {
    #[serde(flatten)]
    pub stats: FolderStats,
    #[serde(default)]
    pub files: Vec<FolderFile>,
}

/// Entry of `GET /folders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub image_count: usize,
}

/// A few-shot (image, caption) exemplar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePair {
    pub id: u64,
    #[serde(default, alias = "image_path")]
    pub image: String,
    #[serde(default)]
    pub filename: String,
    pub caption: String,
    /// Pixel dimensions, when the caller knows them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Reusable instruction text prepended to captioning requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default, alias = "isDefault")]
    pub is_default: bool,
}

/// Body of `POST /batch-process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStartRequest {
    pub folder_path: String,
    pub model_settings: ModelSettingsWire,
    pub processing_settings: ProcessingSettingsWire,
    pub reprocess: bool,
}

impl BatchStartRequest {
    pub fn new(folder_path: impl Into<String>, settings: &Settings, reprocess: bool) -> Self {
        Self {
            folder_path: folder_path.into(),
            model_settings: ModelSettingsWire::from(&settings.model),
            processing_settings: ProcessingSettingsWire::from(&settings.processing),
            reprocess,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case_status() {
        let status: BatchStatus = serde_json::from_str(
            r#"{
            "processedCount": 2,
            "totalCount": 5,
            "isProcessing": true,
            "items": [
                {"id": 1, "filename": "a.jpg", "caption": "a cat", "status": "success",
                 "timestamp": "2024-05-01T10:00:00"}
            ]
        }"#,
        )
        .unwrap();
        assert_eq!(status.processed_count, 2);
        assert_eq!(status.total_count, 5);
        assert!(status.is_processing);
        assert_eq!(status.items[0].status, ItemStatus::Success);
        assert_eq!(status.phase(), "processing");
    }

    #[test]
    fn test_parse_snake_case_status() {
        let status: BatchStatus = serde_json::from_str(
            r#"{
            "is_processing": false,
            "processed_count": 3,
            "total_count": 3,
            "current_batch": 1,
            "error_count": 1,
            "processing_speed": 4.5,
            "total_cost": 0.12,
            "start_time": null,
            "estimated_completion": null,
            "items": [
                {"id": 3, "filename": "c.png", "image_path": "/data/f/c.png", "caption": "",
                 "timestamp": "2024-05-01T10:00:00", "status": "error",
                 "error_message": "rate limited"}
            ]
        }"#,
        )
        .unwrap();
        assert!(!status.is_processing);
        assert_eq!(status.phase(), "completed");
        assert_eq!(status.error_count, Some(1));
        assert_eq!(status.items[0].image, "/data/f/c.png");
        assert_eq!(status.items[0].error_message.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_parse_folder_contents() {
        let contents: FolderContents = serde_json::from_str(
            r#"{
            "total_images": 3,
            "captioned": 1,
            "uncaptioned": 2,
            "files": [
                {"filename": "a.jpg", "has_caption": true, "caption": "x",
                 "last_modified": "2024-05-01T10:00:00Z"},
                {"filename": "b.jpg", "has_caption": false, "caption": null,
                 "last_modified": "2024-05-01T10:00:00Z"}
            ]
        }"#,
        )
        .unwrap();
        assert_eq!(contents.stats.total_images, 3);
        assert_eq!(contents.stats.uncaptioned, 2);
        assert_eq!(contents.files.len(), 2);
        assert!(contents.files[1].caption.is_none());
    }

    #[test]
    fn test_template_accepts_camel_case_flag() {
        let t: PromptTemplate = serde_json::from_str(
            r#"{"id": "t1", "name": "Short", "content": "Be brief.", "isDefault": true}"#,
        )
        .unwrap();
        assert!(t.is_default);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"is_default\":true"));
    }

    #[test]
    fn test_start_request_body() {
        let mut settings = Settings::default();
        settings.model.api_key = "sk-1".into();
        let req = BatchStartRequest::new("/data/houses", &settings, true);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["folder_path"], "/data/houses");
        assert_eq!(json["model_settings"]["api_key"], "sk-1");
        assert_eq!(json["model_settings"]["provider"], "openai");
        assert_eq!(json["processing_settings"]["batch_size"], 50);
        assert_eq!(json["processing_settings"]["error_handling"], "continue");
        assert_eq!(json["reprocess"], true);
    }
}

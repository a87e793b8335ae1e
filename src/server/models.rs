use serde::{Deserialize, Serialize};

use crate::models::{PipelineStatus, TranslationDetails};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessScreenshotRequest {
    /// Base64 image, optionally as a `data:` URL.
    pub image: Option<String>,
    pub target_language: Option<String>,
    pub source_language: Option<String>,
    pub filter_low_confidence_results: Option<bool>,
    pub min_confidence_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessScreenshotResponse {
    pub status: PipelineStatus,
    pub translated_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_with_overlay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TranslationDetails>,
}

impl ProcessScreenshotResponse {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Error,
            translated_text: String::new(),
            image_with_overlay: None,
            error_message: Some(message.into()),
            details: None,
        }
    }
}

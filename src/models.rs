use serde::Serialize;

/// Axis-aligned pixel rectangle, origin top-left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the box has positive area and lies fully inside a `width` x `height` canvas.
    pub fn fits_canvas(&self, width: u32, height: u32) -> bool {
        if self.width <= 0 || self.height <= 0 || self.x < 0 || self.y < 0 {
            return false;
        }
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        right <= width as i64 && bottom <= height as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub original_text: String,
    pub translated_text: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl TextElement {
    pub fn new(original_text: impl Into<String>, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            original_text: original_text.into(),
            translated_text: String::new(),
            confidence,
            bounding_box,
        }
    }
}

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;

/// Input to one pipeline run. `image` holds the encoded raster (PNG, JPEG, ...).
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub image: Vec<u8>,
    pub target_lang: String,
    pub source_lang: Option<String>,
    pub filter_low_confidence: bool,
    pub min_confidence: f32,
}

impl TranslationRequest {
    pub fn new(image: Vec<u8>, target_lang: impl Into<String>) -> Self {
        Self {
            image,
            target_lang: target_lang.into(),
            source_lang: None,
            filter_low_confidence: true,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_source_lang(mut self, source_lang: Option<String>) -> Self {
        self.source_lang = source_lang.filter(|value| !value.trim().is_empty());
        self
    }

    /// Threshold handed to the recognizer: the configured minimum when filtering, else 0.
    pub fn effective_confidence(&self) -> f32 {
        if self.filter_low_confidence {
            self.min_confidence.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Warning,
    Error,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Success => "success",
            PipelineStatus::Warning => "warning",
            PipelineStatus::Error => "error",
        }
    }
}

/// Stage durations in milliseconds. Unreached stages stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub recognition_ms: u64,
    pub translation_ms: u64,
    pub overlay_ms: u64,
    pub total_ms: u64,
}

impl ProcessingMetrics {
    pub(crate) fn refresh_total(&mut self) {
        self.total_ms = self
            .recognition_ms
            .saturating_add(self.translation_ms)
            .saturating_add(self.overlay_ms);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationDetails {
    pub target_language: String,
    pub detected_element_count: usize,
    pub processed_element_count: usize,
    pub elements: Vec<TextElement>,
    pub metrics: ProcessingMetrics,
}

impl TranslationDetails {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub translated_text: String,
    /// Encoded output image; `None` only for `error` results.
    pub image: Option<Vec<u8>>,
    pub message: Option<String>,
    pub details: TranslationDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_canvas_rejects_boxes_past_the_edge() {
        assert!(BoundingBox::new(0, 0, 20, 20).fits_canvas(20, 20));
        assert!(!BoundingBox::new(15, 0, 10, 5).fits_canvas(20, 20));
        assert!(!BoundingBox::new(-1, 0, 5, 5).fits_canvas(20, 20));
        assert!(!BoundingBox::new(2, 2, 0, 5).fits_canvas(20, 20));
        assert!(!BoundingBox::new(i32::MAX, 0, i32::MAX, 1).fits_canvas(20, 20));
    }

    #[test]
    fn effective_confidence_is_zero_when_filter_disabled() {
        let mut request = TranslationRequest::new(Vec::new(), "fr");
        assert!((request.effective_confidence() - 0.6).abs() < f32::EPSILON);
        request.filter_low_confidence = false;
        assert_eq!(request.effective_confidence(), 0.0);
    }

    #[test]
    fn details_serialize_camel_case() {
        let mut details = TranslationDetails::new("fr");
        details.elements.push(TextElement::new(
            "Hello",
            0.9,
            BoundingBox::new(1, 2, 3, 4),
        ));
        let value = serde_json::to_value(&details).expect("serialize");
        assert_eq!(value["targetLanguage"], "fr");
        assert_eq!(value["elements"][0]["originalText"], "Hello");
        assert_eq!(value["elements"][0]["boundingBox"]["width"], 3);
        assert_eq!(value["metrics"]["totalMs"], 0);
    }
}

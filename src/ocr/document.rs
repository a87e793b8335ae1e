use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::geom::normalize_polygon;
use super::{RecognizeFuture, Recognizer, image_dimensions, retain_confident};
use crate::models::TextElement;
use crate::retry::{Backoff, is_throttled, poll_delay, retry_after};

pub const DEFAULT_API_VERSION: &str = "2024-11-30";
const MODEL_ID: &str = "prebuilt-read";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: usize = 120;

/// Recognizer backed by the Azure Document Intelligence `prebuilt-read` model.
#[derive(Debug, Clone)]
pub struct DocumentIntelligenceRecognizer {
    endpoint: String,
    key: String,
    api_version: String,
}

impl DocumentIntelligenceRecognizer {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        let api_version = api_version.into();
        if !api_version.trim().is_empty() {
            self.api_version = api_version;
        }
        self
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.endpoint.trim_end_matches('/'),
            MODEL_ID,
            self.api_version
        )
    }

    async fn analyze(&self, image: &[u8]) -> Result<AnalyzeResult> {
        let client = reqwest::Client::new();
        let body = json!({ "base64Source": STANDARD.encode(image) });

        let mut backoff = Backoff::new("Document Intelligence");
        let operation = loop {
            let response = client
                .post(self.analyze_url())
                .header("Ocp-Apim-Subscription-Key", self.key.clone())
                .json(&body)
                .send()
                .await
                .with_context(|| "failed to reach Document Intelligence")?;
            let status = response.status();
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                break operation_location(&headers)?;
            }
            if is_throttled(status, &text) && backoff.retry(retry_after(&headers)).await {
                continue;
            }
            return Err(anyhow!("Document Intelligence error ({}): {}", status, text));
        };

        debug!("polling Document Intelligence operation {}", operation);
        let mut throttled = Backoff::new("Document Intelligence poll");
        for _ in 0..MAX_POLLS {
            let response = client
                .get(&operation)
                .header("Ocp-Apim-Subscription-Key", self.key.clone())
                .send()
                .await
                .with_context(|| "failed to poll Document Intelligence")?;
            let status = response.status();
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                if let Some(result) = parse_operation(&text)? {
                    return Ok(result);
                }
                tokio::time::sleep(poll_delay(&headers, POLL_INTERVAL)).await;
                continue;
            }
            if is_throttled(status, &text) && throttled.retry(retry_after(&headers)).await {
                continue;
            }
            return Err(anyhow!("Document Intelligence error ({}): {}", status, text));
        }
        Err(anyhow!("Document Intelligence analysis timed out"))
    }
}

impl Recognizer for DocumentIntelligenceRecognizer {
    fn recognize<'a>(&'a self, image: &'a [u8], min_confidence: f32) -> RecognizeFuture<'a> {
        Box::pin(async move {
            let (width, height) = image_dimensions(image)?;
            info!("starting Document Intelligence recognition");
            let result = self.analyze(image).await?;
            let mut elements = extract_elements(&result, width, height);
            let found = elements.len();
            retain_confident(&mut elements, min_confidence);
            info!(
                "Document Intelligence found {} lines, kept {}",
                found,
                elements.len()
            );
            Ok(elements)
        })
    }
}

fn operation_location(headers: &HeaderMap) -> Result<String> {
    headers
        .get("operation-location")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Document Intelligence response is missing Operation-Location"))
}

/// `Ok(None)` while the operation is still running.
fn parse_operation(text: &str) -> Result<Option<AnalyzeResult>> {
    let operation: AnalyzeOperation = serde_json::from_str(text)
        .with_context(|| "failed to parse Document Intelligence operation JSON")?;
    match operation.status.to_lowercase().as_str() {
        "succeeded" => operation
            .analyze_result
            .map(Some)
            .ok_or_else(|| anyhow!("Document Intelligence returned no analyzeResult")),
        "failed" | "canceled" => Err(anyhow!(
            "Document Intelligence analysis {}: {}",
            operation.status,
            operation
                .error
                .and_then(|error| error.message)
                .unwrap_or_else(|| "no details".to_string())
        )),
        _ => Ok(None),
    }
}

/// Maps page lines to elements in pixel space of a `width` x `height` image.
pub(crate) fn extract_elements(result: &AnalyzeResult, width: u32, height: u32) -> Vec<TextElement> {
    let mut elements = Vec::new();
    for page in &result.pages {
        let page_width = page.width.filter(|value| *value > 0.0).unwrap_or(width as f32);
        let page_height = page.height.filter(|value| *value > 0.0).unwrap_or(height as f32);
        for line in &page.lines {
            if line.content.trim().is_empty() {
                continue;
            }
            let relative = line
                .polygon
                .chunks_exact(2)
                .flat_map(|point| [point[0] / page_width, point[1] / page_height])
                .collect::<Vec<_>>();
            let bbox = normalize_polygon(&relative, Some(width as f32), Some(height as f32));
            let confidence = line_confidence(line, &page.words);
            elements.push(TextElement::new(line.content.trim(), confidence, bbox));
        }
    }
    elements
}

/// Minimum confidence of the words whose spans lie inside the line's spans.
fn line_confidence(line: &Line, words: &[Word]) -> f32 {
    words
        .iter()
        .filter(|word| {
            line.spans.iter().any(|span| {
                word.span.offset >= span.offset
                    && word.span.offset + word.span.length <= span.offset + span.length
            })
        })
        .map(|word| word.confidence)
        .reduce(f32::min)
        .unwrap_or(1.0)
}

#[derive(Debug, Deserialize)]
struct AnalyzeOperation {
    status: String,
    #[serde(rename = "analyzeResult")]
    analyze_result: Option<AnalyzeResult>,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnalyzeResult {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    width: Option<f32>,
    height: Option<f32>,
    #[serde(default)]
    lines: Vec<Line>,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Line {
    content: String,
    #[serde(default)]
    polygon: Vec<f32>,
    #[serde(default)]
    spans: Vec<Span>,
}

#[derive(Debug, Deserialize)]
struct Word {
    confidence: f32,
    span: Span,
}

#[derive(Debug, Deserialize)]
struct Span {
    offset: usize,
    length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    const SUCCEEDED: &str = r#"{
        "status": "succeeded",
        "analyzeResult": {
            "pages": [{
                "width": 1024, "height": 512, "unit": "pixel",
                "words": [
                    {"content": "Hello", "confidence": 0.98, "span": {"offset": 0, "length": 5}},
                    {"content": "world", "confidence": 0.71, "span": {"offset": 6, "length": 5}},
                    {"content": "Menu", "confidence": 0.40, "span": {"offset": 12, "length": 4}}
                ],
                "lines": [
                    {"content": "Hello world", "polygon": [128, 64, 640, 64, 640, 128, 128, 128], "spans": [{"offset": 0, "length": 11}]},
                    {"content": "Menu", "polygon": [16, 256, 96, 256, 96, 288, 16, 288], "spans": [{"offset": 12, "length": 4}]},
                    {"content": "   ", "polygon": [0, 0, 1, 1], "spans": []}
                ]
            }]
        }
    }"#;

    #[test]
    fn maps_lines_into_image_pixels() {
        let result = parse_operation(SUCCEEDED).expect("parse").expect("done");
        let elements = extract_elements(&result, 2048, 1024);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].original_text, "Hello world");
        assert_eq!(elements[0].bounding_box, BoundingBox::new(256, 128, 1024, 128));
        assert!((elements[0].confidence - 0.71).abs() < 1e-6);
        assert!((elements[1].confidence - 0.40).abs() < 1e-6);
    }

    #[test]
    fn running_operation_is_pending() {
        assert!(parse_operation(r#"{"status": "running"}"#).expect("parse").is_none());
    }

    #[test]
    fn failed_operation_reports_message() {
        let err = parse_operation(r#"{"status": "failed", "error": {"message": "InvalidImage"}}"#)
            .expect_err("failed");
        assert!(err.to_string().contains("InvalidImage"));
    }

    #[test]
    fn line_without_words_is_fully_confident() {
        let result: AnalyzeResult = serde_json::from_str(
            r#"{"pages": [{"width": 8, "height": 8, "lines": [{"content": "x", "polygon": [2, 2, 6, 2, 6, 6, 2, 6], "spans": [{"offset": 0, "length": 1}]}]}]}"#,
        )
        .expect("json");
        let elements = extract_elements(&result, 8, 8);
        assert_eq!(elements[0].confidence, 1.0);
        assert_eq!(elements[0].bounding_box, BoundingBox::new(2, 2, 4, 4));
    }

    #[test]
    fn builds_analyze_url() {
        let recognizer = DocumentIntelligenceRecognizer::new("https://example.cognitiveservices.azure.com/", "k");
        assert_eq!(
            recognizer.analyze_url(),
            "https://example.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-read:analyze?api-version=2024-11-30"
        );
    }
}

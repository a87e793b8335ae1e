use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;

use crate::models::TextElement;

pub mod document;
pub mod geom;
pub mod mock;
pub mod tesseract;

pub use document::DocumentIntelligenceRecognizer;
pub use geom::normalize_polygon;
pub use mock::MockRecognizer;
pub use tesseract::TesseractRecognizer;

pub type RecognizeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<TextElement>>> + Send + 'a>>;

/// Text recognition capability. Implementations return elements at or above
/// `min_confidence`, in reading order.
pub trait Recognizer: Send + Sync {
    fn recognize<'a>(&'a self, image: &'a [u8], min_confidence: f32) -> RecognizeFuture<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerKind {
    Tesseract,
    DocumentIntelligence,
    Mock,
}

impl RecognizerKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "tesseract" => Ok(RecognizerKind::Tesseract),
            "document-intelligence" | "document_intelligence" | "azure" => {
                Ok(RecognizerKind::DocumentIntelligence)
            }
            "mock" => Ok(RecognizerKind::Mock),
            other => Err(anyhow!(
                "unknown recognizer '{}' (expected tesseract, document-intelligence or mock)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecognizerImpl {
    Tesseract(TesseractRecognizer),
    DocumentIntelligence(DocumentIntelligenceRecognizer),
    Mock(MockRecognizer),
}

impl Recognizer for RecognizerImpl {
    fn recognize<'a>(&'a self, image: &'a [u8], min_confidence: f32) -> RecognizeFuture<'a> {
        match self {
            RecognizerImpl::Tesseract(recognizer) => recognizer.recognize(image, min_confidence),
            RecognizerImpl::DocumentIntelligence(recognizer) => {
                recognizer.recognize(image, min_confidence)
            }
            RecognizerImpl::Mock(recognizer) => recognizer.recognize(image, min_confidence),
        }
    }
}

/// Reads pixel dimensions from the encoded image header without decoding the pixels.
pub(crate) fn image_dimensions(image: &[u8]) -> Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(image))
        .with_guessed_format()
        .with_context(|| "failed to read image header")?
        .into_dimensions()
        .with_context(|| "failed to read image dimensions")
}

pub(crate) fn retain_confident(elements: &mut Vec<TextElement>, min_confidence: f32) {
    elements.retain(|element| {
        element.confidence >= min_confidence && !element.original_text.trim().is_empty()
    });
}

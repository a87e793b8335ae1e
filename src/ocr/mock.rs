use tracing::info;

use super::{RecognizeFuture, Recognizer, image_dimensions, retain_confident};
use crate::models::{BoundingBox, TextElement};

const SAMPLE_TEXTS: &[&str] = &[
    "Hello world",
    "This is a test",
    "Screenshot translation",
    "Image processing",
    "REST API",
];

const MARGIN: i32 = 10;
const ROW_HEIGHT: i32 = 32;
const ROW_GAP: i32 = 12;

/// Development recognizer. Lays sample phrases out as rows from the top-left corner of the
/// image, stopping at the bottom edge.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    max_elements: usize,
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self {
            max_elements: SAMPLE_TEXTS.len(),
        }
    }
}

impl MockRecognizer {
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements.min(SAMPLE_TEXTS.len());
        self
    }

    fn layout(&self, width: u32, height: u32) -> Vec<TextElement> {
        let row_width = (width as i32 - MARGIN * 2).min(300);
        if row_width <= 0 {
            return Vec::new();
        }
        SAMPLE_TEXTS
            .iter()
            .take(self.max_elements)
            .enumerate()
            .map(|(idx, text)| {
                let y = MARGIN + idx as i32 * (ROW_HEIGHT + ROW_GAP);
                let confidence = 0.95 - idx as f32 * 0.05;
                TextElement::new(*text, confidence, BoundingBox::new(MARGIN, y, row_width, ROW_HEIGHT))
            })
            .take_while(|element| element.bounding_box.fits_canvas(width, height))
            .collect()
    }
}

impl Recognizer for MockRecognizer {
    fn recognize<'a>(&'a self, image: &'a [u8], min_confidence: f32) -> RecognizeFuture<'a> {
        Box::pin(async move {
            let (width, height) = image_dimensions(image)?;
            let mut elements = self.layout(width, height);
            retain_confident(&mut elements, min_confidence);
            info!("mock recognizer produced {} text elements", elements.len());
            Ok(elements)
        })
    }
}

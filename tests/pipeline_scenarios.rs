use anyhow::anyhow;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use screen_translator_rust::ocr::{RecognizeFuture, Recognizer};
use screen_translator_rust::overlay::{OverlayRenderer, OverlayStyle, RasterOverlay, fit_font_size};
use screen_translator_rust::translations::BATCH_DELIMITER;
use screen_translator_rust::translator::{BatchTranslator, TextTranslator, TranslateFuture};
use screen_translator_rust::{
    BoundingBox, Cancellation, Pipeline, PipelineStatus, Provider, ProviderFuture,
    ProviderResponse, TextElement, TranslateOptions, TranslationRequest,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([30, 30, 30, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn raster_overlay() -> RasterOverlay {
    RasterOverlay::with_fonts(OverlayStyle::default(), usvg::fontdb::Database::new(), None)
        .unwrap()
}

enum StubRecognizer {
    Elements(Vec<TextElement>),
    Fails(&'static str),
}

impl Recognizer for StubRecognizer {
    fn recognize<'a>(&'a self, _image: &'a [u8], min_confidence: f32) -> RecognizeFuture<'a> {
        Box::pin(async move {
            match self {
                StubRecognizer::Elements(elements) => Ok(elements
                    .iter()
                    .filter(|element| element.confidence >= min_confidence)
                    .cloned()
                    .collect::<Vec<_>>()),
                StubRecognizer::Fails(message) => Err(anyhow!(*message)),
            }
        })
    }
}

/// Fixed phrase table; unknown text is an error so stray calls show up.
struct PhraseTranslator(Vec<(&'static str, &'static str)>);

impl PhraseTranslator {
    fn lookup(&self, text: &str) -> anyhow::Result<String> {
        self.0
            .iter()
            .find(|(source, _)| *source == text)
            .map(|(_, translated)| translated.to_string())
            .ok_or_else(|| anyhow!("no translation for '{}'", text))
    }
}

impl TextTranslator for PhraseTranslator {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        _options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, String> {
        Box::pin(async move { self.lookup(text) })
    }

    fn translate_many<'a>(
        &'a self,
        texts: &'a [String],
        _options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, Vec<String>> {
        Box::pin(async move {
            texts
                .iter()
                .map(|text| self.lookup(text))
                .collect::<anyhow::Result<Vec<_>>>()
        })
    }
}

/// Chat backend that answers batches with one segment too few and single texts with a
/// bracketed echo.
#[derive(Clone, Default)]
struct MiscountingProvider {
    user: String,
    calls: Arc<Mutex<usize>>,
}

impl Provider for MiscountingProvider {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.user = input;
        self
    }

    fn with_temperature(self, _temperature: f32) -> Self {
        self
    }

    fn complete(self) -> ProviderFuture {
        *self.calls.lock().unwrap() += 1;
        let text = if self.user.contains(BATCH_DELIMITER) {
            let mut segments = self.user.split(BATCH_DELIMITER).collect::<Vec<_>>();
            segments.pop();
            segments.join(BATCH_DELIMITER)
        } else {
            format!("[{}]", self.user)
        };
        Box::pin(async move {
            Ok(ProviderResponse {
                text,
                model: None,
                usage: None,
            })
        })
    }
}

#[tokio::test]
async fn no_text_returns_warning_with_original_image() {
    let pipeline = Pipeline::new(
        StubRecognizer::Elements(Vec::new()),
        PhraseTranslator(Vec::new()),
        raster_overlay(),
    );
    let image = png(64, 32);
    let request = TranslationRequest::new(image.clone(), "fr");
    let result = pipeline.run(&request, &Cancellation::never()).await;

    assert_eq!(result.status, PipelineStatus::Warning);
    assert!(result.message.unwrap().contains("no text detected"));
    assert_eq!(result.image, Some(image));
    assert_eq!(result.details.detected_element_count, 0);
    assert_eq!(result.details.metrics.translation_ms, 0);
    assert_eq!(result.details.metrics.overlay_ms, 0);
}

#[tokio::test]
async fn single_element_is_translated_and_painted() {
    let pipeline = Pipeline::new(
        StubRecognizer::Elements(vec![TextElement::new(
            "Hello world",
            0.95,
            BoundingBox::new(4, 4, 120, 24),
        )]),
        PhraseTranslator(vec![("Hello world", "Bonjour le monde")]),
        raster_overlay(),
    );
    let image = png(160, 40);
    let request = TranslationRequest::new(image.clone(), "fr");
    let result = pipeline.run(&request, &Cancellation::never()).await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.translated_text, "Bonjour le monde");
    assert_eq!(result.details.processed_element_count, 1);
    assert_eq!(result.details.target_language, "fr");
    assert_eq!(result.details.elements[0].translated_text, "Bonjour le monde");

    let rendered = image::load_from_memory(&result.image.unwrap()).unwrap().to_rgba8();
    assert_eq!(rendered.dimensions(), (160, 40));
    assert_eq!(rendered.get_pixel(0, 0).0, [30, 30, 30, 255]);
    assert_eq!(rendered.get_pixel(120, 26).0, [255, 255, 255, 255]);
}

#[tokio::test]
async fn recognizer_failure_is_an_error_result() {
    let pipeline = Pipeline::new(
        StubRecognizer::Fails("recognizer backend unreachable"),
        PhraseTranslator(Vec::new()),
        raster_overlay(),
    );
    let request = TranslationRequest::new(png(8, 8), "de");
    let result = pipeline.run(&request, &Cancellation::never()).await;

    assert_eq!(result.status, PipelineStatus::Error);
    assert!(result.image.is_none());
    assert!(
        result
            .message
            .unwrap()
            .contains("recognizer backend unreachable")
    );
    assert_eq!(result.details.target_language, "de");
    assert_eq!(result.details.metrics.translation_ms, 0);
    assert_eq!(result.details.metrics.overlay_ms, 0);
}

/// Chat backend whose every request fails.
#[derive(Clone, Default)]
struct UnreachableProvider;

impl Provider for UnreachableProvider {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(self, _input: String) -> Self {
        self
    }

    fn with_temperature(self, _temperature: f32) -> Self {
        self
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async { Err(anyhow!("connection refused")) })
    }
}

#[tokio::test]
async fn translation_failure_stops_before_overlay() {
    let pipeline = Pipeline::new(
        StubRecognizer::Elements(vec![
            TextElement::new("Save", 0.9, BoundingBox::new(0, 0, 40, 12)),
            TextElement::new("Cancel", 0.9, BoundingBox::new(0, 20, 40, 12)),
        ]),
        BatchTranslator::new(UnreachableProvider),
        raster_overlay(),
    );
    let request = TranslationRequest::new(png(64, 40), "es");
    let result = pipeline.run(&request, &Cancellation::never()).await;

    assert_eq!(result.status, PipelineStatus::Error);
    assert!(result.image.is_none());
    assert!(result.translated_text.is_empty());
    let message = result.message.unwrap();
    assert!(message.contains("translation failed"));
    assert!(message.contains("connection refused"));
    assert_eq!(result.details.detected_element_count, 2);
    assert!(result.details.elements.is_empty());
    assert_eq!(result.details.metrics.overlay_ms, 0);
    assert_eq!(
        result.details.metrics.total_ms,
        result.details.metrics.recognition_ms + result.details.metrics.translation_ms
    );
}

#[tokio::test]
async fn batch_miscount_falls_back_to_single_calls() {
    let provider = MiscountingProvider::default();
    let calls = provider.calls.clone();
    let translator = BatchTranslator::new(provider);
    let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];

    let result = translator
        .translate_many(&texts, &TranslateOptions::new("es", None))
        .await
        .unwrap();

    assert_eq!(result, vec!["[one]", "[two]", "[three]"]);
    assert_eq!(*calls.lock().unwrap(), 4);
}

#[tokio::test]
async fn out_of_canvas_element_is_skipped() {
    let overlay = raster_overlay();
    let image = png(100, 50);
    let mut inside = TextElement::new("a", 0.9, BoundingBox::new(0, 0, 20, 20));
    inside.translated_text = "A".to_string();
    let mut outside = TextElement::new("b", 0.9, BoundingBox::new(90, 10, 20, 20));
    outside.translated_text = "B".to_string();

    let output = overlay.render(&image, &[inside, outside]).await.unwrap();
    let rendered = image::load_from_memory(&output).unwrap().to_rgba8();

    assert_eq!(rendered.dimensions(), (100, 50));
    assert_eq!(rendered.get_pixel(19, 19).0, [255, 255, 255, 255]);
    assert_eq!(rendered.get_pixel(95, 15).0, [30, 30, 30, 255]);
}

#[test]
fn font_fit_prefers_larger_sizes_for_shorter_text() {
    let phrases = [
        "OK",
        "Settings",
        "Save changes",
        "Save all changes before closing the window",
    ];
    let sizes = phrases
        .iter()
        .map(|text| fit_font_size(text, 160.0, 40.0, 72.0, None))
        .collect::<Vec<_>>();
    assert!(sizes.windows(2).all(|pair| pair[0] >= pair[1]), "{:?}", sizes);
}

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

pub mod cancel;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod overlay;
pub mod pipeline;
mod providers;
mod retry;
pub mod server;
pub mod settings;
pub mod translations;
pub mod translator;

pub use cancel::{CancelHandle, Cancellation};
pub use models::{
    BoundingBox, PipelineResult, PipelineStatus, ProcessingMetrics, TextElement,
    TranslationDetails, TranslationRequest,
};
pub use pipeline::Pipeline;
pub use providers::{
    Claude, Gemini, OpenAI, Provider, ProviderFuture, ProviderImpl, ProviderKind,
    ProviderResponse, ProviderUsage,
};
pub use translations::TranslateOptions;

use ocr::{
    DocumentIntelligenceRecognizer, MockRecognizer, RecognizerImpl, RecognizerKind,
    TesseractRecognizer,
};
use overlay::{OverlayImpl, OverlayKind, OverlayStyle, PassthroughOverlay, RasterOverlay};
use translator::{BatchTranslator, MockTranslator, TranslatorImpl, TranslatorKind};

/// Pipeline over the collaborators selected from settings at startup.
pub type ScreenPipeline = Pipeline<RecognizerImpl, TranslatorImpl, OverlayImpl>;

#[derive(Debug, Clone)]
pub struct Config {
    pub lang: String,
    pub source_lang: Option<String>,
    pub model: Option<String>,
    pub key: Option<String>,
    pub min_confidence: Option<f32>,
    pub no_confidence_filter: bool,
    pub settings_path: Option<String>,
}

/// Translates one image file, writes the overlaid image and returns the text report.
/// An `error` result is returned as `Err` after its details are logged.
pub async fn run(
    config: Config,
    data: &Path,
    out: Option<PathBuf>,
    cancel: &Cancellation,
) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let pipeline = build_pipeline(&settings, config.model.as_deref(), config.key.as_deref())?;

    let image =
        std::fs::read(data).with_context(|| format!("failed to read image: {}", data.display()))?;
    let mut request = TranslationRequest::new(image, config.lang.trim())
        .with_source_lang(normalize_source_lang(config.source_lang));
    request.filter_low_confidence =
        settings.pipeline.filter_low_confidence && !config.no_confidence_filter;
    request.min_confidence = config
        .min_confidence
        .unwrap_or(settings.pipeline.min_confidence);
    if !(0.0..=1.0).contains(&request.min_confidence) {
        return Err(anyhow!(
            "minimum confidence must be between 0 and 1 (got {})",
            request.min_confidence
        ));
    }
    if request.target_lang.is_empty() {
        return Err(anyhow!("target language is empty"));
    }

    let result = pipeline.run(&request, cancel).await;
    if result.status == PipelineStatus::Error {
        tracing::debug!(
            "partial details: detected={}, recognition={}ms, translation={}ms",
            result.details.detected_element_count,
            result.details.metrics.recognition_ms,
            result.details.metrics.translation_ms
        );
        return Err(anyhow!(
            "{}",
            result
                .message
                .unwrap_or_else(|| "error processing image".to_string())
        ));
    }

    let out = out.unwrap_or_else(|| default_output_path(data));
    if let Some(image) = result.image.as_deref() {
        std::fs::write(&out, image)
            .with_context(|| format!("failed to write image: {}", out.display()))?;
    }
    Ok(format_report(&result, &out))
}

/// Builds the collaborator set named by `settings`. `model` and `key` override the
/// translator's settings and environment.
pub fn build_pipeline(
    settings: &settings::Settings,
    model: Option<&str>,
    key: Option<&str>,
) -> Result<ScreenPipeline> {
    let recognizer = build_recognizer(&settings.recognizer)?;
    let translator = build_translator(&settings.translator, model, key)?;
    let overlay = build_overlay(&settings.overlay)?;
    Ok(Pipeline::new(recognizer, translator, overlay))
}

pub fn build_recognizer(settings: &settings::RecognizerSettings) -> Result<RecognizerImpl> {
    match RecognizerKind::parse(&settings.kind)? {
        RecognizerKind::Tesseract => Ok(RecognizerImpl::Tesseract(TesseractRecognizer::new(
            settings.languages.clone(),
        ))),
        RecognizerKind::DocumentIntelligence => {
            let endpoint = settings
                .endpoint
                .clone()
                .or_else(|| providers::get_env("DOCUMENT_INTELLIGENCE_ENDPOINT"))
                .ok_or_else(|| {
                    anyhow!("document intelligence endpoint is not configured (set [recognizer].endpoint or DOCUMENT_INTELLIGENCE_ENDPOINT)")
                })?;
            let key = providers::get_env("DOCUMENT_INTELLIGENCE_KEY")
                .ok_or_else(|| anyhow!("DOCUMENT_INTELLIGENCE_KEY is not set"))?;
            let mut recognizer = DocumentIntelligenceRecognizer::new(endpoint, key);
            if let Some(version) = settings.api_version.as_deref() {
                recognizer = recognizer.with_api_version(version);
            }
            Ok(RecognizerImpl::DocumentIntelligence(recognizer))
        }
        RecognizerKind::Mock => Ok(RecognizerImpl::Mock(MockRecognizer::default())),
    }
}

pub fn build_translator(
    settings: &settings::TranslatorSettings,
    model: Option<&str>,
    key: Option<&str>,
) -> Result<TranslatorImpl> {
    match TranslatorKind::parse(&settings.kind)? {
        TranslatorKind::Mock => Ok(TranslatorImpl::Mock(MockTranslator)),
        TranslatorKind::Llm => {
            let model_arg = model
                .filter(|value| !value.trim().is_empty())
                .or(settings.model.as_deref());
            let selection = providers::resolve_provider_selection(model_arg, key)?;
            let key = providers::resolve_key(selection.provider, key)
                .with_context(|| "no API key found for selected provider")?;
            tracing::info!(
                "translating with {}:{}",
                selection.provider.as_str(),
                selection.requested_model.as_deref().unwrap_or("default")
            );
            let provider =
                providers::build_provider(selection.provider, key, selection.requested_model);
            Ok(TranslatorImpl::Llm(
                BatchTranslator::new(provider).with_temperature(settings.temperature),
            ))
        }
    }
}

pub fn build_overlay(settings: &settings::OverlaySettings) -> Result<OverlayImpl> {
    match OverlayKind::parse(&settings.kind)? {
        OverlayKind::Passthrough => Ok(OverlayImpl::Passthrough(PassthroughOverlay)),
        OverlayKind::Raster => {
            let style = OverlayStyle {
                text_color: settings.text_color.clone(),
                fill_color: settings.fill_color.clone(),
                max_font_size: settings.max_font_size,
                font_family: settings.font_family.clone(),
                font_path: settings.font_path.as_ref().map(PathBuf::from),
            };
            Ok(OverlayImpl::Raster(RasterOverlay::new(style)?))
        }
    }
}

/// `<dir>/<stem>.translated.<ext>` beside the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    let name = match input.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}.translated.{}", stem, ext),
        None => format!("{}.translated", stem),
    };
    input.with_file_name(name)
}

fn normalize_source_lang(source_lang: Option<String>) -> Option<String> {
    source_lang
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("auto"))
}

fn format_report(result: &PipelineResult, out: &Path) -> String {
    let metrics = &result.details.metrics;
    let mut lines = Vec::new();
    if !result.translated_text.is_empty() {
        lines.push(result.translated_text.clone());
    }
    let mut status = format!("status: {}", result.status.as_str());
    if let Some(message) = result.message.as_deref() {
        status.push_str(&format!(" ({})", message));
    }
    lines.push(status);
    lines.push(format!(
        "elements: {}/{}",
        result.details.processed_element_count, result.details.detected_element_count
    ));
    lines.push(format!(
        "timings: recognition={}ms, translation={}ms, overlay={}ms, total={}ms",
        metrics.recognition_ms, metrics.translation_ms, metrics.overlay_ms, metrics.total_ms
    ));
    lines.push(format!("output: {}", out.display()));
    lines.join("\n")
}

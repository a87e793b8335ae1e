use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

use crate::providers::{Provider, ProviderImpl};
use crate::translations::{self, TranslateOptions};

pub type TranslateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Text translation capability consumed by the pipeline.
pub trait TextTranslator: Send + Sync {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, String>;

    /// Returns exactly one translation per input, in input order.
    fn translate_many<'a>(
        &'a self,
        texts: &'a [String],
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, Vec<String>>;
}

/// LLM-backed translator that sends all segments in one call, joined by
/// [`translations::BATCH_DELIMITER`], and falls back to one call per segment when the
/// response does not split back into the same number of segments.
#[derive(Debug, Clone)]
pub struct BatchTranslator<P: Provider> {
    provider: P,
    temperature: f32,
}

impl<P: Provider> BatchTranslator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            temperature: crate::providers::DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub async fn translate_text(&self, text: &str, options: &TranslateOptions) -> Result<String> {
        let system_prompt = translations::render_system_prompt(options)?;
        let response = self
            .provider
            .clone()
            .with_temperature(self.temperature)
            .append_system_input(system_prompt)
            .append_user_input(text.to_string())
            .complete()
            .await
            .with_context(|| "translation request failed")?;
        debug!(model = ?response.model, "single translation completed");
        Ok(response.text.trim().to_string())
    }

    pub async fn translate_all(
        &self,
        texts: &[String],
        options: &TranslateOptions,
    ) -> Result<Vec<String>> {
        match texts {
            [] => return Ok(Vec::new()),
            [single] => return Ok(vec![self.translate_text(single, options).await?]),
            _ => {}
        }

        let system_prompt = translations::render_batch_prompt(options)?;
        let response = self
            .provider
            .clone()
            .with_temperature(self.temperature)
            .append_system_input(system_prompt)
            .append_user_input(translations::join_segments(texts))
            .complete()
            .await
            .with_context(|| "batch translation request failed")?;

        let segments = translations::split_segments(&response.text);
        if segments.len() == texts.len() {
            info!(count = texts.len(), "batch translation completed");
            return Ok(segments);
        }

        warn!(
            "batch translation returned {} segments, expected {}; falling back to individual translations",
            segments.len(),
            texts.len()
        );
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.translate_text(text, options).await?);
        }
        Ok(results)
    }
}

impl<P: Provider> TextTranslator for BatchTranslator<P> {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, String> {
        Box::pin(self.translate_text(text, options))
    }

    fn translate_many<'a>(
        &'a self,
        texts: &'a [String],
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, Vec<String>> {
        Box::pin(self.translate_all(texts, options))
    }
}

const MOCK_PHRASES: &[(&str, &[(&str, &str)])] = &[
    (
        "Hello world",
        &[
            ("es", "Hola mundo"),
            ("fr", "Bonjour le monde"),
            ("de", "Hallo Welt"),
            ("it", "Ciao mondo"),
            ("ja", "こんにちは世界"),
            ("zh", "你好，世界"),
        ],
    ),
    (
        "This is a test",
        &[
            ("es", "Esto es una prueba"),
            ("fr", "C'est un test"),
            ("de", "Dies ist ein Test"),
            ("it", "Questo è un test"),
            ("ja", "これはテストです"),
            ("zh", "这是一个测试"),
        ],
    ),
    (
        "Screenshot translation",
        &[
            ("es", "Traducción de captura de pantalla"),
            ("fr", "Traduction de capture d'écran"),
            ("de", "Bildschirmfoto-Übersetzung"),
            ("it", "Traduzione screenshot"),
            ("ja", "スクリーンショット翻訳"),
            ("zh", "截图翻译"),
        ],
    ),
    (
        "Image processing",
        &[
            ("es", "Procesamiento de imágenes"),
            ("fr", "Traitement d'image"),
            ("de", "Bildverarbeitung"),
            ("it", "Elaborazione delle immagini"),
            ("ja", "画像処理"),
            ("zh", "图像处理"),
        ],
    ),
    (
        "REST API",
        &[
            ("es", "API REST"),
            ("fr", "API REST"),
            ("de", "REST-API"),
            ("it", "API REST"),
            ("ja", "REST API"),
            ("zh", "REST API"),
        ],
    ),
];

/// Offline translator backed by a small phrase table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTranslator;

impl MockTranslator {
    pub fn translate(&self, text: &str, target_lang: &str) -> String {
        let lang = target_lang.trim().to_lowercase();
        let known = MOCK_PHRASES
            .iter()
            .find(|(phrase, _)| *phrase == text)
            .and_then(|(_, entries)| entries.iter().find(|(code, _)| *code == lang))
            .map(|(_, value)| value.to_string());
        if let Some(value) = known {
            return value;
        }
        match lang.as_str() {
            "es" => format!("ES: {} (translated)", text),
            "fr" => format!("FR: {} (traduit)", text),
            "de" => format!("DE: {} (übersetzt)", text),
            "it" => format!("IT: {} (tradotto)", text),
            "ja" => format!("JA: {} (翻訳済み)", text),
            "zh" => format!("ZH: {} (已翻译)", text),
            _ => format!("{}: {}", lang.to_uppercase(), text),
        }
    }
}

impl TextTranslator for MockTranslator {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, String> {
        Box::pin(async move { Ok(self.translate(text, &options.target_lang)) })
    }

    fn translate_many<'a>(
        &'a self,
        texts: &'a [String],
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, Vec<String>> {
        Box::pin(async move {
            Ok(texts
                .iter()
                .map(|text| self.translate(text, &options.target_lang))
                .collect())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorKind {
    Llm,
    Mock,
}

impl TranslatorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "llm" => Ok(TranslatorKind::Llm),
            "mock" => Ok(TranslatorKind::Mock),
            other => Err(anyhow!(
                "unknown translator '{}' (expected llm or mock)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TranslatorImpl {
    Llm(BatchTranslator<ProviderImpl>),
    Mock(MockTranslator),
}

impl TextTranslator for TranslatorImpl {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, String> {
        match self {
            TranslatorImpl::Llm(translator) => translator.translate_one(text, options),
            TranslatorImpl::Mock(translator) => translator.translate_one(text, options),
        }
    }

    fn translate_many<'a>(
        &'a self,
        texts: &'a [String],
        options: &'a TranslateOptions,
    ) -> TranslateFuture<'a, Vec<String>> {
        match self {
            TranslatorImpl::Llm(translator) => translator.translate_many(texts, options),
            TranslatorImpl::Mock(translator) => translator.translate_many(texts, options),
        }
    }
}

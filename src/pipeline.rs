use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::cancel::Cancellation;
use crate::models::{
    PipelineResult, PipelineStatus, TextElement, TranslationDetails, TranslationRequest,
};
use crate::ocr::Recognizer;
use crate::overlay::OverlayRenderer;
use crate::translations::TranslateOptions;
use crate::translator::TextTranslator;

pub const NO_TEXT_MESSAGE: &str = "no text detected in the image";

/// Position of one run in the recognize, translate, overlay sequence.
enum Stage {
    Recognizing,
    Translating(Vec<TextElement>),
    Overlaying(Vec<TextElement>),
    NoText,
    Done {
        elements: Vec<TextElement>,
        image: Vec<u8>,
    },
}

/// Sequences recognition, translation and overlay for one request at a time. Holds only
/// immutable collaborators, so one instance serves concurrent runs.
#[derive(Debug, Clone)]
pub struct Pipeline<R, T, O> {
    recognizer: R,
    translator: T,
    overlay: O,
}

impl<R, T, O> Pipeline<R, T, O>
where
    R: Recognizer,
    T: TextTranslator,
    O: OverlayRenderer,
{
    pub fn new(recognizer: R, translator: T, overlay: O) -> Self {
        Self {
            recognizer,
            translator,
            overlay,
        }
    }

    /// Runs the request to completion. Failures come back as an `error` result carrying the
    /// details gathered before the failing stage.
    pub async fn run(&self, request: &TranslationRequest, cancel: &Cancellation) -> PipelineResult {
        let options = TranslateOptions::new(&request.target_lang, request.source_lang.clone());
        let mut details = TranslationDetails::new(&request.target_lang);
        let mut stage = Stage::Recognizing;

        loop {
            stage = match stage {
                Stage::NoText => {
                    details.metrics.refresh_total();
                    info!("no text detected; returning original image");
                    return PipelineResult {
                        status: PipelineStatus::Warning,
                        translated_text: String::new(),
                        image: Some(request.image.clone()),
                        message: Some(NO_TEXT_MESSAGE.to_string()),
                        details,
                    };
                }
                Stage::Done { elements, image } => {
                    let translated_text = elements
                        .iter()
                        .map(|element| element.translated_text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    details.elements = elements;
                    details.metrics.refresh_total();
                    info!(
                        total_ms = details.metrics.total_ms,
                        "image translation completed"
                    );
                    return PipelineResult {
                        status: PipelineStatus::Success,
                        translated_text,
                        image: Some(image),
                        message: None,
                        details,
                    };
                }
                current => match self
                    .advance(current, request, &options, cancel, &mut details)
                    .await
                {
                    Ok(next) => next,
                    Err(err) => {
                        details.metrics.refresh_total();
                        error!("error processing image: {:#}", err);
                        return PipelineResult {
                            status: PipelineStatus::Error,
                            translated_text: String::new(),
                            image: None,
                            message: Some(format!("error processing image: {:#}", err)),
                            details,
                        };
                    }
                },
            };
        }
    }

    /// Executes one working stage, recording its counts and duration in `details`.
    async fn advance(
        &self,
        stage: Stage,
        request: &TranslationRequest,
        options: &TranslateOptions,
        cancel: &Cancellation,
        details: &mut TranslationDetails,
    ) -> Result<Stage> {
        match stage {
            Stage::Recognizing => {
                let started = Instant::now();
                let result = cancel
                    .guard(
                        "recognition",
                        self.recognizer
                            .recognize(&request.image, request.effective_confidence()),
                    )
                    .await;
                details.metrics.recognition_ms = elapsed_ms(started);
                let elements = result.with_context(|| "text recognition failed")?;
                info!("recognition found {} text elements", elements.len());
                details.detected_element_count = elements.len();
                details.processed_element_count = elements.len();
                if elements.is_empty() {
                    Ok(Stage::NoText)
                } else {
                    Ok(Stage::Translating(elements))
                }
            }
            Stage::Translating(mut elements) => {
                let texts = elements
                    .iter()
                    .map(|element| element.original_text.clone())
                    .collect::<Vec<_>>();
                let started = Instant::now();
                let result = cancel
                    .guard("translation", self.translator.translate_many(&texts, options))
                    .await;
                details.metrics.translation_ms = elapsed_ms(started);
                let translations = result.with_context(|| "translation failed")?;
                if translations.len() != elements.len() {
                    warn!(
                        "translator returned {} results for {} elements",
                        translations.len(),
                        elements.len()
                    );
                }
                for (element, translation) in elements.iter_mut().zip(translations) {
                    element.translated_text = translation;
                }
                Ok(Stage::Overlaying(elements))
            }
            Stage::Overlaying(elements) => {
                let started = Instant::now();
                let result = cancel
                    .guard("overlay", self.overlay.render(&request.image, &elements))
                    .await;
                details.metrics.overlay_ms = elapsed_ms(started);
                let image = result.with_context(|| "overlay rendering failed")?;
                Ok(Stage::Done { elements, image })
            }
            terminal => Ok(terminal),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

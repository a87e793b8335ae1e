use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

/// Separator placed between segments of a batch request.
pub const BATCH_DELIMITER: &str = "|||SEGMENT_DELIMITER|||";

const SYSTEM_PROMPT: &str = include_str!("prompts/system_prompt.tera");
const BATCH_PROMPT: &str = include_str!("prompts/batch_prompt.tera");

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub target_lang: String,
    /// `None` asks the model to detect the source language.
    pub source_lang: Option<String>,
}

impl TranslateOptions {
    pub fn new(target_lang: impl Into<String>, source_lang: Option<String>) -> Self {
        Self {
            target_lang: target_lang.into(),
            source_lang: source_lang.filter(|value| !value.trim().is_empty()),
        }
    }
}

pub fn render_system_prompt(options: &TranslateOptions) -> Result<String> {
    let context = prompt_context(options);
    Tera::one_off(SYSTEM_PROMPT, &context, false).with_context(|| "failed to render system prompt")
}

pub fn render_batch_prompt(options: &TranslateOptions) -> Result<String> {
    let mut context = prompt_context(options);
    context.insert("delimiter", BATCH_DELIMITER);
    Tera::one_off(BATCH_PROMPT, &context, false).with_context(|| "failed to render batch prompt")
}

fn prompt_context(options: &TranslateOptions) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("target_lang", options.target_lang.trim());
    context.insert(
        "source_lang",
        &options.source_lang.as_deref().map(str::trim),
    );
    context
}

pub fn join_segments<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .map(|text| text.as_ref())
        .collect::<Vec<_>>()
        .join(BATCH_DELIMITER)
}

/// Splits a batch response back into trimmed segments. Empty trailing segments are kept so a
/// count mismatch stays visible to the caller.
pub fn split_segments(text: &str) -> Vec<String> {
    text.split(BATCH_DELIMITER)
        .map(|segment| segment.trim().to_string())
        .collect()
}

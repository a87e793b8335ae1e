use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::DEFAULT_MIN_CONFIDENCE;
use crate::overlay::DEFAULT_MAX_FONT_SIZE;
use crate::providers::DEFAULT_TEMPERATURE;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_MAX_BODY_MB: usize = 32;
const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct Settings {
    pub recognizer: RecognizerSettings,
    pub translator: TranslatorSettings,
    pub overlay: OverlaySettings,
    pub pipeline: PipelineSettings,
    pub server_addr: String,
    /// Largest accepted request body. Base64 screenshots run about 4/3 of the PNG size.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    pub kind: String,
    pub languages: String,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranslatorSettings {
    pub kind: String,
    pub model: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub kind: String,
    pub text_color: String,
    pub fill_color: String,
    pub max_font_size: f32,
    pub font_family: Option<String>,
    pub font_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub min_confidence: f32,
    pub filter_low_confidence: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recognizer: RecognizerSettings {
                kind: "tesseract".to_string(),
                languages: "eng".to_string(),
                endpoint: None,
                api_version: None,
            },
            translator: TranslatorSettings {
                kind: "llm".to_string(),
                model: None,
                temperature: DEFAULT_TEMPERATURE,
            },
            overlay: OverlaySettings {
                kind: "raster".to_string(),
                text_color: "#000000".to_string(),
                fill_color: "#ffffff".to_string(),
                max_font_size: DEFAULT_MAX_FONT_SIZE,
                font_family: None,
                font_path: None,
            },
            pipeline: PipelineSettings {
                min_confidence: DEFAULT_MIN_CONFIDENCE,
                filter_low_confidence: true,
            },
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_MB * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    recognizer: Option<RecognizerSection>,
    translator: Option<TranslatorSection>,
    overlay: Option<OverlaySection>,
    pipeline: Option<PipelineSection>,
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct RecognizerSection {
    kind: Option<String>,
    languages: Option<String>,
    endpoint: Option<String>,
    api_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslatorSection {
    kind: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySection {
    kind: Option<String>,
    text_color: Option<String>,
    fill_color: Option<String>,
    max_font_size: Option<f32>,
    font_family: Option<String>,
    font_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSection {
    min_confidence: Option<f32>,
    filter_low_confidence: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    addr: Option<String>,
    max_body_mb: Option<usize>,
}

/// Loads the embedded defaults, then each settings file that exists, in increasing
/// precedence. `extra_path` must exist when given.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<embedded>"))?);
    if let Err(err) = ensure_home_settings_file() {
        tracing::warn!("{:#}", err);
    }

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?);
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content)
        .with_context(|| format!("failed to parse settings: {}", path.display()))
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(recognizer) = incoming.recognizer {
            merge_string(&mut self.recognizer.kind, recognizer.kind);
            merge_string(&mut self.recognizer.languages, recognizer.languages);
            merge_optional(&mut self.recognizer.endpoint, recognizer.endpoint);
            merge_optional(&mut self.recognizer.api_version, recognizer.api_version);
        }
        if let Some(translator) = incoming.translator {
            merge_string(&mut self.translator.kind, translator.kind);
            merge_optional(&mut self.translator.model, translator.model);
            if let Some(temperature) = translator.temperature
                && (0.0..=MAX_TEMPERATURE).contains(&temperature)
            {
                self.translator.temperature = temperature;
            }
        }
        if let Some(overlay) = incoming.overlay {
            merge_string(&mut self.overlay.kind, overlay.kind);
            merge_string(&mut self.overlay.text_color, overlay.text_color);
            merge_string(&mut self.overlay.fill_color, overlay.fill_color);
            if let Some(size) = overlay.max_font_size
                && size > 0.0
            {
                self.overlay.max_font_size = size;
            }
            merge_optional(&mut self.overlay.font_family, overlay.font_family);
            merge_optional(&mut self.overlay.font_path, overlay.font_path);
        }
        if let Some(pipeline) = incoming.pipeline {
            if let Some(threshold) = pipeline.min_confidence
                && (0.0..=1.0).contains(&threshold)
            {
                self.pipeline.min_confidence = threshold;
            }
            if let Some(filter) = pipeline.filter_low_confidence {
                self.pipeline.filter_low_confidence = filter;
            }
        }
        if let Some(server) = incoming.server {
            merge_string(&mut self.server_addr, server.addr);
            if let Some(mb) = server.max_body_mb
                && mb > 0
            {
                self.max_body_bytes = mb.saturating_mul(1024 * 1024);
            }
        }
    }
}

fn merge_string(target: &mut String, incoming: Option<String>) {
    if let Some(value) = incoming
        && !value.trim().is_empty()
    {
        *target = value.trim().to_string();
    }
}

fn merge_optional(target: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming
        && !value.trim().is_empty()
    {
        *target = Some(value.trim().to_string());
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".screen-translator-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(content: &str) -> Settings {
        let mut settings = Settings::default();
        settings.merge(parse_settings(content, Path::new("test.toml")).expect("parse"));
        settings
    }

    #[test]
    fn embedded_defaults_parse() {
        let settings = merged(DEFAULT_SETTINGS_TOML);
        assert_eq!(settings.recognizer.kind, "tesseract");
        assert_eq!(settings.translator.kind, "llm");
        assert_eq!(settings.overlay.max_font_size, 72.0);
        assert!((settings.pipeline.min_confidence - 0.6).abs() < f32::EPSILON);
        assert!(settings.pipeline.filter_low_confidence);
        assert_eq!(settings.server_addr, DEFAULT_SERVER_ADDR);
        assert_eq!(settings.max_body_bytes, DEFAULT_MAX_BODY_MB * 1024 * 1024);
    }

    #[test]
    fn later_values_override_per_key() {
        let mut settings = merged("[overlay]\ntext_color = \"#ff0000\"\n");
        settings.merge(
            parse_settings(
                "[overlay]\nfill_color = \"#00ff00\"\n[recognizer]\nkind = \"mock\"\n",
                Path::new("local.toml"),
            )
            .expect("parse"),
        );
        assert_eq!(settings.overlay.text_color, "#ff0000");
        assert_eq!(settings.overlay.fill_color, "#00ff00");
        assert_eq!(settings.recognizer.kind, "mock");
        assert_eq!(settings.recognizer.languages, "eng");
    }

    #[test]
    fn blank_and_out_of_range_values_are_ignored() {
        let settings = merged(
            "[overlay]\ntext_color = \"  \"\nmax_font_size = 0\n[pipeline]\nmin_confidence = -1.0\nfilter_low_confidence = false\n[translator]\ntemperature = 3.5\n[server]\nmax_body_mb = 0\n",
        );
        assert_eq!(settings.overlay.text_color, "#000000");
        assert_eq!(settings.overlay.max_font_size, DEFAULT_MAX_FONT_SIZE);
        assert!((settings.pipeline.min_confidence - DEFAULT_MIN_CONFIDENCE).abs() < f32::EPSILON);
        assert!(!settings.pipeline.filter_low_confidence);
        assert!((settings.translator.temperature - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
        assert_eq!(settings.max_body_bytes, DEFAULT_MAX_BODY_MB * 1024 * 1024);

        let settings = merged("[pipeline]\nmin_confidence = 1.2\n");
        assert!((settings.pipeline.min_confidence - DEFAULT_MIN_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_is_a_valid_threshold_and_temperature() {
        let settings = merged(
            "[pipeline]\nmin_confidence = 0.0\n[translator]\ntemperature = 0.0\n[server]\nmax_body_mb = 8\n",
        );
        assert_eq!(settings.pipeline.min_confidence, 0.0);
        assert_eq!(settings.translator.temperature, 0.0);
        assert_eq!(settings.max_body_bytes, 8 * 1024 * 1024);

        let settings = merged("[pipeline]\nmin_confidence = 1.0\n");
        assert_eq!(settings.pipeline.min_confidence, 1.0);
    }

    #[test]
    fn malformed_file_reports_path() {
        let err = parse_settings("[overlay\n", Path::new("broken.toml")).expect_err("error");
        assert!(format!("{:#}", err).contains("broken.toml"));
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        let err = load_settings(Some(Path::new("/nonexistent/settings.toml"))).expect_err("error");
        assert!(err.to_string().contains("settings file not found"));
    }
}

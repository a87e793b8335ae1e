use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use super::geom::union_bbox;
use super::{RecognizeFuture, Recognizer, retain_confident};
use crate::models::{BoundingBox, TextElement};

const DEFAULT_PSM: u32 = 11;

/// Recognizer backed by the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    languages: String,
    psm: u32,
}

impl TesseractRecognizer {
    pub fn new(languages: impl Into<String>) -> Self {
        Self {
            languages: languages.into(),
            psm: DEFAULT_PSM,
        }
    }

    pub fn with_psm(mut self, psm: u32) -> Self {
        self.psm = psm;
        self
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize<'a>(&'a self, image: &'a [u8], min_confidence: f32) -> RecognizeFuture<'a> {
        let image = image.to_vec();
        let languages = self.languages.clone();
        let psm = self.psm;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                recognize_blocking(&image, &languages, psm, min_confidence)
            })
            .await
            .with_context(|| "tesseract task panicked")?
        })
    }
}

fn recognize_blocking(
    image: &[u8],
    languages: &str,
    psm: u32,
    min_confidence: f32,
) -> Result<Vec<TextElement>> {
    let decoded = image::load_from_memory(image).with_context(|| "failed to decode image")?;
    let file = tempfile::Builder::new()
        .prefix("screen-translator-")
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp image")?;
    decoded
        .save_with_format(file.path(), image::ImageFormat::Png)
        .with_context(|| "failed to write temp image")?;

    let languages = normalize_languages(languages)?;
    let tsv = run_tesseract_tsv(file.path(), &languages, psm)?;
    let mut elements = parse_tsv_lines(&tsv);
    let found = elements.len();
    retain_confident(&mut elements, min_confidence);
    debug!(
        "tesseract found {} lines, {} above confidence {}",
        found,
        elements.len(),
        min_confidence
    );
    Ok(elements)
}

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

/// Keeps the installed subset of `requested`, joined with `+`. An empty subset is an
/// error; when the installed list cannot be read the request is passed through as is.
fn normalize_languages(requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("tesseract languages are empty"));
    }
    let Ok(available) = list_tesseract_languages() else {
        return Ok(trimmed.to_string());
    };
    pick_languages(trimmed, &available)
}

fn pick_languages(requested: &str, available: &[String]) -> Result<String> {
    let (chosen, missing): (Vec<&str>, Vec<&str>) = requested
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .partition(|lang| available.iter().any(|value| value == lang));

    if chosen.is_empty() {
        return Err(anyhow!(
            "tesseract language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "tesseract language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(path: &Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string())
        .arg("tsv")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

struct Word {
    text: String,
    bbox: BoundingBox,
    conf: f32,
}

/// Groups level-5 (word) rows by page, block, paragraph and line. Each group becomes one
/// element whose box is the union of its words and whose confidence is the mean word
/// confidence scaled to 0..1.
pub(crate) fn parse_tsv_lines(tsv: &str) -> Vec<TextElement> {
    let mut groups: BTreeMap<(i32, i32, i32, i32), Vec<Word>> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let bbox = BoundingBox::new(
            cols[6].parse().unwrap_or(0),
            cols[7].parse().unwrap_or(0),
            cols[8].parse().unwrap_or(0),
            cols[9].parse().unwrap_or(0),
        );
        groups.entry(key).or_default().push(Word {
            text: text.to_string(),
            bbox,
            conf,
        });
    }

    groups
        .into_values()
        .filter_map(|mut words| {
            words.sort_by_key(|word| word.bbox.x);
            build_line(&words)
        })
        .collect()
}

fn build_line(words: &[Word]) -> Option<TextElement> {
    let first = words.first()?;
    let mut text = String::new();
    let mut bbox = first.bbox;
    let mut conf_sum = 0.0;
    for word in words {
        if !text.is_empty() && needs_space(&text, &word.text) {
            text.push(' ');
        }
        text.push_str(&word.text);
        bbox = union_bbox(&bbox, &word.bbox);
        conf_sum += word.conf;
    }
    let confidence = (conf_sum / words.len() as f32 / 100.0).clamp(0.0, 1.0);
    Some(TextElement::new(text, confidence, bbox))
}

fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => !(is_cjk(a) && is_cjk(b)),
        _ => false,
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xFF00..=0xFFEF)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    #[test]
    fn groups_words_into_lines() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t400\t200\t-1\t",
            "5\t1\t1\t1\t1\t2\t70\t12\t50\t20\t90\tworld",
            "5\t1\t1\t1\t1\t1\t10\t10\t50\t22\t96\tHello",
            "5\t1\t2\t1\t1\t1\t10\t80\t40\t18\t40\tnoise",
        ]);
        let lines = parse_tsv_lines(&input);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].original_text, "Hello world");
        assert_eq!(lines[0].bounding_box, BoundingBox::new(10, 10, 110, 22));
        assert!((lines[0].confidence - 0.93).abs() < 1e-4);
        assert_eq!(lines[1].original_text, "noise");
    }

    #[test]
    fn skips_blank_and_unscored_words() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t10\t50\t22\t-1\tghost",
            "5\t1\t1\t1\t1\t2\t10\t10\t50\t22\t88\t ",
        ]);
        assert!(parse_tsv_lines(&input).is_empty());
    }

    #[test]
    fn cjk_words_join_without_space() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t20\t20\t90\t翻訳",
            "5\t1\t1\t1\t1\t2\t20\t0\t20\t20\t90\t済み",
        ]);
        assert_eq!(parse_tsv_lines(&input)[0].original_text, "翻訳済み");
    }

    #[test]
    fn picks_installed_languages() {
        let available = vec!["eng".to_string(), "jpn".to_string()];
        assert_eq!(pick_languages("eng+fra, jpn", &available).expect("langs"), "eng+jpn");
        assert!(pick_languages("fra", &available).is_err());
    }
}

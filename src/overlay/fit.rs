use super::font::{FontMetrics, is_wide, line_height_ratio, measure_text_width_px};

pub const MIN_FONT_SIZE: f32 = 6.0;
pub const DEFAULT_MAX_FONT_SIZE: f32 = 72.0;

const HEIGHT_BOUND_RATIO: f32 = 0.8;
const FIT_HEIGHT_RATIO: f32 = 0.9;
const FIT_WIDTH_RATIO: f32 = 0.95;

/// Wrapped text at a chosen size.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub font_size: f32,
    pub line_height: f32,
    pub lines: Vec<String>,
}

impl TextLayout {
    pub fn height(&self) -> f32 {
        self.lines.len() as f32 * self.line_height
    }
}

/// Largest integer-stepped font size whose wrapped text stays within 95% of the box width
/// and 90% of its height. The search runs upward from [`MIN_FONT_SIZE`] and is capped at
/// `min(max_font_size, 0.8 * box_height)`. Never returns less than [`MIN_FONT_SIZE`].
pub fn fit_font_size(
    text: &str,
    box_width: f32,
    box_height: f32,
    max_font_size: f32,
    font: Option<&FontMetrics>,
) -> f32 {
    let upper = max_font_size.min(box_height * HEIGHT_BOUND_RATIO);
    if upper.is_nan() || upper < MIN_FONT_SIZE {
        return MIN_FONT_SIZE;
    }

    let max_width = box_width * FIT_WIDTH_RATIO;
    let max_height = box_height * FIT_HEIGHT_RATIO;
    let mut chosen = MIN_FONT_SIZE;
    let mut candidate = MIN_FONT_SIZE;
    while candidate <= upper {
        let (width, height) = measure_wrapped(text, candidate, box_width, font);
        if height > max_height || width > max_width {
            break;
        }
        chosen = candidate;
        candidate += 1.0;
    }
    chosen.max(MIN_FONT_SIZE)
}

/// Fits `text` into the box and returns the wrapped lines at the chosen size.
pub fn layout_text(
    text: &str,
    box_width: f32,
    box_height: f32,
    max_font_size: f32,
    font: Option<&FontMetrics>,
) -> TextLayout {
    let font_size = fit_font_size(text, box_width, box_height, max_font_size, font);
    TextLayout {
        font_size,
        line_height: font_size * line_height_ratio(font),
        lines: wrap_text(text, font_size, box_width, font),
    }
}

/// Width of the widest wrapped line and total block height, in pixels.
fn measure_wrapped(
    text: &str,
    font_size: f32,
    box_width: f32,
    font: Option<&FontMetrics>,
) -> (f32, f32) {
    let lines = wrap_text(text, font_size, box_width, font);
    let width = lines
        .iter()
        .map(|line| measure_text_width_px(line, font_size, font))
        .fold(0.0, f32::max);
    let height = lines.len() as f32 * font_size * line_height_ratio(font);
    (width, height)
}

/// Greedy word wrap against `max_width` pixels. Explicit newlines always break; a single
/// token wider than the box keeps its own line.
pub fn wrap_text(text: &str, font_size: f32, max_width: f32, font: Option<&FontMetrics>) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();

    for token in tokenize_text(text) {
        if token == "\n" {
            if !current.trim().is_empty() {
                result.push(current.trim_end().to_string());
            }
            current.clear();
            continue;
        }
        if token == " " {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }
        let candidate = format!("{}{}", current, token);
        if !current.trim().is_empty()
            && measure_text_width_px(candidate.trim_end(), font_size, font) > max_width
        {
            result.push(current.trim_end().to_string());
            current.clear();
        }
        current.push_str(&token);
    }

    if !current.trim().is_empty() {
        result.push(current.trim_end().to_string());
    }
    if result.is_empty() {
        result.push(text.trim().to_string());
    }
    result
}

/// Splits into words, single spaces, newlines and individual wide (CJK) characters.
fn tokenize_text(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' || ch.is_whitespace() || is_wide(ch) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            let token = match ch {
                '\n' => "\n".to_string(),
                _ if ch.is_whitespace() => " ".to_string(),
                _ => ch.to_string(),
            };
            tokens.push(token);
            continue;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

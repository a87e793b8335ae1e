use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

pub const FALLBACK_FAMILIES: &[&str] = &[
    "Noto Sans",
    "Noto Sans CJK JP",
    "DejaVu Sans",
    "Liberation Sans",
    "Arial",
    "Helvetica",
    "sans-serif",
];

const DEFAULT_LINE_HEIGHT: f32 = 1.2;

/// Horizontal and vertical metrics of one font face, in font units.
#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    space_advance: u16,
    ascender: i16,
    descender: i16,
    line_gap: i16,
    family: Option<String>,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Line advance as a multiple of the font size.
    pub fn line_height_ratio(&self) -> f32 {
        let units = self.units_per_em.max(1) as f32;
        let height = self.ascender as f32 - self.descender as f32 + self.line_gap as f32;
        if height <= 0.0 {
            DEFAULT_LINE_HEIGHT
        } else {
            height / units
        }
    }

    /// Baseline offset from the top of a line as a multiple of the font size.
    pub fn ascent_ratio(&self) -> f32 {
        let units = self.units_per_em.max(1) as f32;
        (self.ascender as f32 / units).clamp(0.5, 1.2)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedOverlayFont {
    pub metrics: FontMetrics,
    pub family: String,
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(&data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Picks the overlay font: an explicit file wins, then a named family, then the first
/// installed fallback family.
pub fn resolve_overlay_font(
    db: &fontdb::Database,
    font_path: Option<&Path>,
    font_family: Option<&str>,
) -> Result<ResolvedOverlayFont> {
    if let Some(path) = font_path {
        let metrics = load_font_metrics(path)?;
        let family = metrics
            .family()
            .map(|name| name.to_string())
            .or_else(|| font_family.map(|name| name.to_string()))
            .unwrap_or_else(|| "sans-serif".to_string());
        return Ok(ResolvedOverlayFont { metrics, family });
    }

    if let Some(family) = font_family.filter(|value| !value.trim().is_empty()) {
        return load_font_metrics_from_family(db, family);
    }

    FALLBACK_FAMILIES
        .iter()
        .find_map(|candidate| load_font_metrics_from_family(db, candidate).ok())
        .ok_or_else(|| anyhow!("no fallback fonts found"))
}

/// System fonts plus the optional font file, shared by every render.
pub fn build_font_database(font_path: Option<&Path>) -> Result<fontdb::Database> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    if let Some(path) = font_path {
        db.load_font_file(path)
            .with_context(|| format!("failed to load font: {}", path.display()))?;
    }
    Ok(db)
}

pub(crate) fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font
        && let Ok(face) = Face::parse(&font.data, font.face_index)
    {
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(font.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        let units = font.units_per_em.max(1) as f32;
        return advance as f32 * (font_size / units);
    }
    estimate_text_width_units(text) * font_size
}

pub(crate) fn line_height_ratio(font: Option<&FontMetrics>) -> f32 {
    font.map(FontMetrics::line_height_ratio)
        .unwrap_or(DEFAULT_LINE_HEIGHT)
}

pub(crate) fn ascent_ratio(font: Option<&FontMetrics>) -> f32 {
    font.map(FontMetrics::ascent_ratio).unwrap_or(0.8)
}

fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if is_wide(ch) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}

pub(crate) fn is_wide(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xAC00..=0xD7AF | 0xFF00..=0xFFEF
    )
}

fn load_font_metrics_from_data(data: &[u8], preferred_family: Option<&str>) -> Result<FontMetrics> {
    let data = Arc::new(data.to_vec());
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    for index in 0..count {
        let Ok(face) = Face::parse(&data, index) else {
            continue;
        };
        let family = extract_family_name(&face);
        let units_per_em = face.units_per_em().max(1);
        let space_advance = face
            .glyph_index(' ')
            .and_then(|id| face.glyph_hor_advance(id))
            .unwrap_or(units_per_em / 2);
        let metrics = FontMetrics {
            data: data.clone(),
            face_index: index,
            units_per_em,
            space_advance,
            ascender: face.ascender(),
            descender: face.descender(),
            line_gap: face.line_gap(),
            family: family.clone(),
        };
        if let (Some(preferred), Some(found)) = (preferred_family, &family)
            && found.eq_ignore_ascii_case(preferred)
        {
            return Ok(metrics);
        }
        if fallback.is_none() {
            fallback = Some(metrics);
        }
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

fn load_font_metrics_from_family(
    db: &fontdb::Database,
    family: &str,
) -> Result<ResolvedOverlayFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let metrics = load_font_metrics_from_data(&data, Some(family))?;
    let resolved_family = metrics
        .family()
        .map(|name| name.to_string())
        .unwrap_or_else(|| family.to_string());
    Ok(ResolvedOverlayFont {
        metrics,
        family: resolved_family,
    })
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

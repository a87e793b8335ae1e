use anyhow::{Context, Result, anyhow};
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::{Color, ColorU8, Paint, Pixmap, Rect, Transform};
use tracing::{debug, warn};
use usvg::{Options, Tree, fontdb};

use super::OverlayStyle;
use super::fit::{TextLayout, layout_text};
use super::font::{ResolvedOverlayFont, ascent_ratio, build_font_database, resolve_overlay_font};
use crate::models::{BoundingBox, TextElement};

/// Paints an opaque rectangle over every valid box and draws the translated text inside
/// it. The output keeps the input's pixel size and encoding.
#[derive(Clone)]
pub struct RasterOverlay {
    style: OverlayStyle,
    fill: Color,
    fontdb: Arc<fontdb::Database>,
    font: Option<ResolvedOverlayFont>,
}

impl std::fmt::Debug for RasterOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterOverlay")
            .field("style", &self.style)
            .field("font", &self.font.as_ref().map(|font| font.family.as_str()))
            .finish()
    }
}

impl RasterOverlay {
    pub fn new(style: OverlayStyle) -> Result<Self> {
        let db = build_font_database(style.font_path.as_deref())?;
        let font = match resolve_overlay_font(
            &db,
            style.font_path.as_deref(),
            style.font_family.as_deref(),
        ) {
            Ok(font) => {
                debug!("overlay font: {}", font.family);
                Some(font)
            }
            Err(err) => {
                warn!("overlay font unavailable, using estimated metrics: {}", err);
                None
            }
        };
        Self::with_fonts(style, db, font)
    }

    pub fn with_fonts(
        style: OverlayStyle,
        db: fontdb::Database,
        font: Option<ResolvedOverlayFont>,
    ) -> Result<Self> {
        let mut fill = parse_hex_color(&style.fill_color)
            .ok_or_else(|| anyhow!("invalid fill color '{}'", style.fill_color))?;
        // The box must hide the source glyphs, so any alpha in the setting is dropped.
        fill.set_alpha(1.0);
        parse_hex_color(&style.text_color)
            .ok_or_else(|| anyhow!("invalid text color '{}'", style.text_color))?;
        Ok(Self {
            style,
            fill,
            fontdb: Arc::new(db),
            font,
        })
    }

    pub fn render_image(&self, image: &[u8], elements: &[TextElement]) -> Result<Vec<u8>> {
        let format = image::guess_format(image).with_context(|| "unrecognized image format")?;
        let decoded = image::load_from_memory_with_format(image, format)
            .with_context(|| "failed to decode image")?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let mut pixmap =
            Pixmap::new(width, height).ok_or_else(|| anyhow!("image has no pixels"))?;
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(decoded.pixels()) {
            let [r, g, b, a] = src.0;
            *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
        }

        let mut paint = Paint::default();
        paint.set_color(self.fill);
        paint.anti_alias = false;

        let metrics = self.font.as_ref().map(|font| &font.metrics);
        let mut text_blocks = String::new();
        let mut painted = 0usize;
        for (idx, element) in elements.iter().enumerate() {
            let text = element.translated_text.trim();
            if text.is_empty() {
                continue;
            }
            let bbox = element.bounding_box;
            if !bbox.fits_canvas(width, height) {
                warn!(
                    "skipping text element with invalid bounding box ({}, {}, {}, {}) on {}x{} image",
                    bbox.x, bbox.y, bbox.width, bbox.height, width, height
                );
                continue;
            }
            let Some(rect) = Rect::from_xywh(
                bbox.x as f32,
                bbox.y as f32,
                bbox.width as f32,
                bbox.height as f32,
            ) else {
                continue;
            };
            pixmap.fill_rect(rect, &paint, Transform::identity(), None);

            let layout = layout_text(
                text,
                bbox.width as f32,
                bbox.height as f32,
                self.style.max_font_size,
                metrics,
            );
            text_blocks.push_str(&self.text_block(idx, &bbox, &layout));
            painted += 1;
        }

        if painted == 0 {
            return Ok(image.to_vec());
        }

        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{blocks}</svg>"#,
            w = width,
            h = height,
            blocks = text_blocks
        );
        let options = Options {
            fontdb: self.fontdb.clone(),
            ..Options::default()
        };
        let tree = Tree::from_str(&svg, &options).with_context(|| "failed to parse overlay SVG")?;
        render(&tree, Transform::identity(), &mut pixmap.as_mut());

        let mut rgba = Vec::with_capacity(pixmap.data().len());
        for pixel in pixmap.pixels() {
            let color = pixel.demultiply();
            rgba.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
        }
        let output = image::RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| anyhow!("failed to build output image buffer"))?;
        encode_like_input(output, format)
    }

    fn text_block(&self, idx: usize, bbox: &BoundingBox, layout: &TextLayout) -> String {
        let clip_id = format!("clip-{}", idx);
        let x = bbox.x as f32;
        let metrics = self.font.as_ref().map(|font| &font.metrics);
        let baseline = bbox.y as f32 + layout.font_size * ascent_ratio(metrics);
        let family = self
            .style
            .font_family
            .as_deref()
            .or_else(|| self.font.as_ref().map(|font| font.family.as_str()));

        let mut block = format!(
            r#"<clipPath id="{id}"><rect x="{x}" y="{y}" width="{w}" height="{h}"/></clipPath>"#,
            id = clip_id,
            x = bbox.x,
            y = bbox.y,
            w = bbox.width,
            h = bbox.height
        );
        let family_attr = family
            .map(|name| format!(r#" font-family="{}""#, escape_xml(name)))
            .unwrap_or_default();
        block.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" fill="{color}"{family} clip-path="url(#{clip})">"#,
            x = x,
            y = baseline,
            size = layout.font_size,
            color = escape_xml(&self.style.text_color),
            family = family_attr,
            clip = clip_id
        ));
        for (line_idx, line) in layout.lines.iter().enumerate() {
            let escaped = escape_xml(line);
            if line_idx == 0 {
                block.push_str(&format!(r#"<tspan x="{x}">{text}</tspan>"#, x = x, text = escaped));
            } else {
                block.push_str(&format!(
                    r#"<tspan x="{x}" dy="{dy}">{text}</tspan>"#,
                    x = x,
                    dy = layout.line_height,
                    text = escaped
                ));
            }
        }
        block.push_str("</text>");
        block
    }
}

fn encode_like_input(output: image::RgbaImage, format: image::ImageFormat) -> Result<Vec<u8>> {
    let dynamic = match format {
        image::ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(
            image::DynamicImage::ImageRgba8(output).to_rgb8(),
        ),
        _ => image::DynamicImage::ImageRgba8(output),
    };
    let mut bytes = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut bytes), format)
        .with_context(|| format!("failed to encode {:?} image", format))?;
    Ok(bytes)
}

/// Accepts `#rgb`, `#rrggbb` and `#rrggbbaa`.
pub(crate) fn parse_hex_color(value: &str) -> Option<Color> {
    let hex = value.trim().strip_prefix('#')?;
    let channel = |idx: usize| u8::from_str_radix(hex.get(idx..idx + 2)?, 16).ok();
    match hex.len() {
        3 => {
            let mut channels = hex
                .chars()
                .map(|ch| ch.to_digit(16).map(|digit| (digit * 17) as u8));
            let r = channels.next()??;
            let g = channels.next()??;
            let b = channels.next()??;
            Some(Color::from_rgba8(r, g, b, 255))
        }
        6 => Some(Color::from_rgba8(channel(0)?, channel(2)?, channel(4)?, 255)),
        8 => Some(Color::from_rgba8(
            channel(0)?,
            channel(2)?,
            channel(4)?,
            channel(6)?,
        )),
        _ => None,
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

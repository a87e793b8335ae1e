use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::models::TextElement;

pub mod fit;
pub mod font;
mod render;

pub use fit::{DEFAULT_MAX_FONT_SIZE, MIN_FONT_SIZE, TextLayout, fit_font_size, layout_text};
pub use render::RasterOverlay;

pub type RenderFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Paints translated elements onto an encoded image and returns the re-encoded result.
pub trait OverlayRenderer: Send + Sync {
    fn render<'a>(&'a self, image: &'a [u8], elements: &'a [TextElement]) -> RenderFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub text_color: String,
    pub fill_color: String,
    pub max_font_size: f32,
    pub font_family: Option<String>,
    pub font_path: Option<PathBuf>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            text_color: "#000000".to_string(),
            fill_color: "#ffffff".to_string(),
            max_font_size: DEFAULT_MAX_FONT_SIZE,
            font_family: None,
            font_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Raster,
    Passthrough,
}

impl OverlayKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "raster" => Ok(OverlayKind::Raster),
            "passthrough" | "mock" => Ok(OverlayKind::Passthrough),
            other => Err(anyhow!(
                "unknown overlay '{}' (expected raster or passthrough)",
                other
            )),
        }
    }
}

impl OverlayRenderer for RasterOverlay {
    fn render<'a>(&'a self, image: &'a [u8], elements: &'a [TextElement]) -> RenderFuture<'a> {
        let overlay = self.clone();
        let image = image.to_vec();
        let elements = elements.to_vec();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || overlay.render_image(&image, &elements))
                .await
                .with_context(|| "overlay task panicked")?
        })
    }
}

/// Returns the image unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughOverlay;

impl OverlayRenderer for PassthroughOverlay {
    fn render<'a>(&'a self, image: &'a [u8], elements: &'a [TextElement]) -> RenderFuture<'a> {
        Box::pin(async move {
            tracing::debug!("passthrough overlay skipping {} elements", elements.len());
            Ok(image.to_vec())
        })
    }
}

#[derive(Debug, Clone)]
pub enum OverlayImpl {
    Raster(RasterOverlay),
    Passthrough(PassthroughOverlay),
}

impl OverlayRenderer for OverlayImpl {
    fn render<'a>(&'a self, image: &'a [u8], elements: &'a [TextElement]) -> RenderFuture<'a> {
        match self {
            OverlayImpl::Raster(overlay) => overlay.render(image, elements),
            OverlayImpl::Passthrough(overlay) => overlay.render(image, elements),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    #[test]
    fn parses_overlay_kinds() {
        assert_eq!(OverlayKind::parse("Raster").expect("kind"), OverlayKind::Raster);
        assert_eq!(OverlayKind::parse("mock").expect("kind"), OverlayKind::Passthrough);
        assert!(OverlayKind::parse("gpu").is_err());
    }

    #[tokio::test]
    async fn passthrough_returns_input() {
        let overlay = OverlayImpl::Passthrough(PassthroughOverlay);
        let elements = [TextElement::new("x", 1.0, BoundingBox::new(0, 0, 1, 1))];
        let output = overlay.render(b"bytes", &elements).await.expect("render");
        assert_eq!(output, b"bytes");
    }
}

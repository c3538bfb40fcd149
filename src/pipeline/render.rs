//! Page extraction: PDF bytes → ordered `(JPEG image, text)` pages via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. Rasterising a 200-page document on a Tokio worker would stall
//! the rate limiter's timers and every in-flight API call, so the whole
//! document is processed on the blocking thread pool.
//!
//! ## Why all-or-nothing?
//!
//! A page that pdfium cannot render usually means the document is damaged.
//! Failing the document keeps the error visible in the run summary instead
//! of producing a dataset with silent holes.

use crate::config::DatasetConfig;
use crate::error::ExtractionError;
use crate::pipeline::encode;
use crate::record::Page;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns one document's bytes into ordered pages.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract_pages(&self, document: Arc<[u8]>) -> Result<Vec<Page>, ExtractionError>;
}

/// Rendering parameters copied out of [`DatasetConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub zoom: f32,
    pub max_rendered_pixels: u32,
    pub jpeg_quality: u8,
}

impl From<&DatasetConfig> for RenderSettings {
    fn from(config: &DatasetConfig) -> Self {
        Self {
            zoom: config.zoom,
            max_rendered_pixels: config.max_rendered_pixels,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// [`PageExtractor`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    settings: RenderSettings,
}

impl PdfiumExtractor {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PageExtractor for PdfiumExtractor {
    async fn extract_pages(&self, document: Arc<[u8]>) -> Result<Vec<Page>, ExtractionError> {
        let settings = self.settings;
        tokio::task::spawn_blocking(move || extract_pages_blocking(&document, settings))
            .await
            .map_err(|e| ExtractionError::TaskFailed(format!("Render task panicked: {e}")))?
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` if set, else the system library.
fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractionError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page extraction.
fn extract_pages_blocking(
    bytes: &[u8],
    settings: RenderSettings,
) -> Result<Vec<Page>, ExtractionError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            ExtractionError::PasswordRequired
        } else {
            ExtractionError::CorruptPdf { detail: err_str }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let max_px = pixel_limit(settings.max_rendered_pixels);
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.zoom)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let mut results = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExtractionError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            }
        })?;
        let image = bitmap.as_image();

        let jpeg = encode::encode_jpeg(&image, settings.jpeg_quality).map_err(|e| {
            ExtractionError::EncodeFailed {
                page: idx + 1,
                detail: e.to_string(),
            }
        })?;

        // A missing text layer (scanned page) is not an error.
        let text = page.text().map(|t| t.all()).unwrap_or_default();

        debug!(
            "Rendered page {} → {}x{} px, {} text chars",
            idx + 1,
            image.width(),
            image.height(),
            text.chars().count()
        );

        results.push(Page {
            index: idx,
            image: Arc::from(jpeg),
            text,
        });
    }

    Ok(results)
}

/// pdfium takes the render bound as `i32`.
fn pixel_limit(px: u32) -> i32 {
    i32::try_from(px).unwrap_or(i32::MAX)
}

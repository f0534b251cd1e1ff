//! Paginated-document rasterisation: every page → JPEG image part.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and not async-aware. `tokio::task::spawn_blocking` moves the work onto the
//! blocking thread pool so Tokio worker threads keep serving other requests
//! while a long document renders.
//!
//! ## All or nothing
//!
//! A document is only useful to the model as a whole. If any single page
//! fails to render or encode, the request fails with
//! [`ExplainError::PageRenderFailed`] carrying that page's 0-based index; no
//! partial document is ever sent to the backend.

use crate::error::ExplainError;
use crate::pipeline::encode;
use crate::pipeline::message::ImagePart;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Opens in-memory documents for page rendering.
///
/// The returned handle borrows the document bytes and is released when it
/// is dropped, which happens on every exit path of [`render_document`].
pub trait PageRasterizer: Send + Sync {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>, ExplainError>;
}

/// An open document.
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Render one page (0-based) at `dpi`.
    fn render_page(&self, index: usize, dpi: u32) -> Result<DynamicImage, String>;
}

/// Render every page of `bytes` and encode each as a JPEG image part.
pub async fn render_document(
    rasterizer: Arc<dyn PageRasterizer>,
    bytes: Vec<u8>,
    dpi: u32,
    quality: u8,
) -> Result<Vec<ImagePart>, ExplainError> {
    tokio::task::spawn_blocking(move || render_document_blocking(&*rasterizer, &bytes, dpi, quality))
        .await
        .map_err(|e| ExplainError::Internal(format!("Render task panicked: {e}")))?
}

/// Blocking implementation of document rendering.
fn render_document_blocking(
    rasterizer: &dyn PageRasterizer,
    bytes: &[u8],
    dpi: u32,
    quality: u8,
) -> Result<Vec<ImagePart>, ExplainError> {
    let start = Instant::now();
    let document = rasterizer.open(bytes)?;
    let total_pages = document.page_count();
    info!("Document loaded: {} pages", total_pages);

    let mut parts = Vec::with_capacity(total_pages);
    for index in 0..total_pages {
        let image = document
            .render_page(index, dpi)
            .map_err(|detail| ExplainError::PageRenderFailed { page: index, detail })?;
        debug!(
            "Rendered page {} → {}x{} px",
            index,
            image.width(),
            image.height()
        );

        let part = encode::encode_jpeg(&image, quality).map_err(|e| ExplainError::PageRenderFailed {
            page: index,
            detail: format!("JPEG encoding failed: {e}"),
        })?;
        parts.push(part);
    }

    debug!("Rasterised {} pages in {:?}", parts.len(), start.elapsed());
    Ok(parts)
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`PageRasterizer`] backed by the pdfium library.
///
/// One binding is shared by all requests; pdfium-render's `sync` feature
/// makes `Pdfium` `Send + Sync` and serialises calls into the library.
pub struct PdfiumRasterizer {
    pdfium: Pdfium,
}

impl PdfiumRasterizer {
    /// Bind to pdfium, either from `library_dir` or from the system library path.
    pub fn bind(library_dir: Option<&Path>) -> Result<Self, ExplainError> {
        let bindings = match library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExplainError::RasterizerUnavailable(format!("{e:?}")))?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>, ExplainError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| ExplainError::DocumentOpenFailed {
                detail: format!("{e:?}"),
            })?;
        Ok(Box::new(PdfiumDocument { document }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize, dpi: u32) -> Result<DynamicImage, String> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{e:?}"))?;

        // PDF user space is 72 units per inch.
        let config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let bitmap = page.render_with_config(&config).map_err(|e| format!("{e:?}"))?;
        Ok(bitmap.as_image())
    }
}

/// Stands in when pdfium could not be bound at startup; every open fails.
#[derive(Debug, Clone)]
pub struct UnavailableRasterizer {
    reason: String,
}

impl UnavailableRasterizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PageRasterizer for UnavailableRasterizer {
    fn open<'a>(&'a self, _bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>, ExplainError> {
        Err(ExplainError::RasterizerUnavailable(self.reason.clone()))
    }
}

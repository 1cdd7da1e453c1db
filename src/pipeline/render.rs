//! PDF rasterisation: render every page to `page_<n>.png` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! web server keeps answering while a 300-DPI scan renders.
//!
//! ## Binding
//!
//! pdfium is a shared library loaded at runtime. It is looked up in this
//! order: `PDFIUM_LIB_PATH`, the working directory, the system library path.

use crate::config::WorkflowConfig;
use crate::error::HandscribeError;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// File name of the rendered image for a 1-indexed page.
pub fn page_file_name(page_num: usize) -> String {
    format!("page_{}.png", page_num)
}

/// Rasterise every page of `pdf_path` into `out_dir`.
///
/// # Returns
/// The written paths, `page_1.png` … `page_N.png`, in page order.
pub async fn rasterize_pdf(
    pdf_path: &Path,
    out_dir: &Path,
    config: &WorkflowConfig,
) -> Result<Vec<PathBuf>, HandscribeError> {
    let path = pdf_path.to_path_buf();
    let dir = out_dir.to_path_buf();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;

    tokio::task::spawn_blocking(move || rasterize_blocking(&path, &dir, dpi, max_pixels))
        .await
        .map_err(|e| HandscribeError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<PathBuf>, HandscribeError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| HandscribeError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    std::fs::create_dir_all(out_dir).map_err(|source| HandscribeError::OutputWriteFailed {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut written = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            HandscribeError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let target = out_dir.join(page_file_name(page_num));
        image
            .save_with_format(&target, ImageFormat::Png)
            .map_err(|e| HandscribeError::RasterisationFailed {
                page: page_num,
                detail: format!("saving {}: {}", target.display(), e),
            })?;

        debug!(
            "Rendered page {} → {}x{} px → {}",
            page_num,
            image.width(),
            image.height(),
            target.display()
        );
        written.push(target);
    }

    Ok(written)
}

/// Bind to a pdfium shared library.
fn bind_pdfium() -> Result<Pdfium, HandscribeError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| HandscribeError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Whether a pdfium library can be bound in this environment.
pub fn pdfium_available() -> bool {
    bind_pdfium().is_ok()
}

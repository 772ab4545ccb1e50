//! Production rasterizer backed by MuPDF.

use mupdf::{Colorspace, Document, Matrix};

use super::rasterizer::{PixelBuffer, RasterDoc, Rasterizer, RenderFault};

impl From<mupdf::error::Error> for RenderFault {
    fn from(e: mupdf::error::Error) -> Self {
        Self::Decode {
            detail: format!("PDF engine: {e}"),
        }
    }
}

/// Opens PDF bytes through MuPDF. Each worker thread gets its own
/// [`Document`] because MuPDF documents are not thread-safe.
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfRasterizer;

impl Rasterizer for MupdfRasterizer {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn RasterDoc>, RenderFault> {
        let doc = Document::from_bytes(bytes, "application/pdf")?;
        let page_count = doc.page_count()?;
        if page_count <= 0 {
            return Err(RenderFault::decode("document has no pages"));
        }
        Ok(Box::new(MupdfDoc {
            doc,
            page_count: page_count as usize,
        }))
    }
}

struct MupdfDoc {
    doc: Document,
    page_count: usize,
}

impl RasterDoc for MupdfDoc {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn rasterize(&self, page_index: usize, scale: f32) -> Result<PixelBuffer, RenderFault> {
        let page = self.doc.load_page(page_index as i32)?;

        let transform = Matrix::new_scale(scale, scale);
        let rgb = Colorspace::device_rgb();
        let pixmap = page.to_pixmap(&transform, &rgb, false, false)?;

        let pixels = pixmap_to_rgb(&pixmap)?;
        Ok(PixelBuffer {
            pixels,
            width: pixmap.width(),
            height: pixmap.height(),
        })
    }
}

/// Flatten a pixmap into tightly packed RGB rows, dropping any alpha channel
/// and the per-row stride padding.
fn pixmap_to_rgb(pixmap: &mupdf::Pixmap) -> Result<Vec<u8>, RenderFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(RenderFault::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    let expected_min = stride.saturating_mul(height);
    if samples.len() < expected_min || row_bytes > stride {
        return Err(RenderFault::generic("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        let row = &samples[row_start..row_start + row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }

    Ok(out)
}

//! Rasterizer contract.
//!
//! The session never reimplements document parsing or rendering math; it
//! talks to an external rasterizer through these traits. Output must be
//! deterministic for a given (document, page, scale) triple, and decode
//! failures travel on a channel distinct from I/O failures.

/// Raw RGB pixels produced by a rasterizer (3 bytes per pixel).
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Failures originating inside a rasterizer.
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    /// The document or page could not be decoded.
    #[error("decode: {detail}")]
    Decode { detail: String },

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderFault {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode { detail: msg.into() }
    }

    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Capability that opens raw document bytes for rasterization.
///
/// Implementations must be cheap to share across worker threads; each worker
/// opens its own [`RasterDoc`] over the shared immutable byte buffer.
pub trait Rasterizer: Send + Sync {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn RasterDoc>, RenderFault>;
}

/// One opened document, owned by a single worker thread.
pub trait RasterDoc {
    fn page_count(&self) -> usize;

    /// Rasterize a page (0-indexed) at the given scale.
    fn rasterize(&self, page_index: usize, scale: f32) -> Result<PixelBuffer, RenderFault>;
}

/// Encode an RGB pixel buffer as PNG bytes.
///
/// Settings are fixed so identical pixels always encode to identical bytes;
/// repeated renders of the same (page, scale) stay byte-identical.
pub fn encode_png(buf: &PixelBuffer) -> Result<Vec<u8>, RenderFault> {
    let expected = buf.width as usize * buf.height as usize * 3;
    if buf.pixels.len() != expected {
        return Err(RenderFault::generic(format!(
            "pixel buffer size mismatch: {} bytes for {}x{}",
            buf.pixels.len(),
            buf.width,
            buf.height
        )));
    }

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, buf.width, buf.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| RenderFault::generic(format!("png header: {e}")))?;
        writer
            .write_image_data(&buf.pixels)
            .map_err(|e| RenderFault::generic(format!("png encode: {e}")))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_png_is_deterministic() {
        let buf = PixelBuffer {
            pixels: vec![10; 4 * 2 * 3],
            width: 4,
            height: 2,
        };

        let a = encode_png(&buf).unwrap();
        let b = encode_png(&buf).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn encode_png_rejects_size_mismatch() {
        let buf = PixelBuffer {
            pixels: vec![0; 5],
            width: 4,
            height: 2,
        };

        assert!(encode_png(&buf).is_err());
    }
}

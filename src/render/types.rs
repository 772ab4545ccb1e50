//! Core types for rendered pages.

/// One rendered page, PNG-encoded.
#[derive(Clone)]
pub struct PageArtifact {
    /// Page number (1-indexed).
    pub page_number: u32,
    /// Pixel width of the rendered image.
    pub width: u32,
    /// Pixel height of the rendered image.
    pub height: u32,
    /// Scale factor the page was rendered at.
    pub scale: f32,
    /// Encoded PNG bytes.
    pub png: Vec<u8>,
}

impl std::fmt::Debug for PageArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageArtifact")
            .field("page_number", &self.page_number)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("scale", &self.scale)
            .field("png_len", &self.png.len())
            .finish()
    }
}

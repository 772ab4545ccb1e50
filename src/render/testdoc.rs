//! Deterministic mock document format and rasterizer for tests.
//!
//! A mock document is a small text header describing page count, base page
//! size, and pages that should fail or panic during rasterization. Pixels
//! are a pure function of (page, scale, x, y), so repeated renders are
//! byte-identical and different pages/scales produce different artifacts.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::rasterizer::{PixelBuffer, RasterDoc, Rasterizer, RenderFault};

const MAGIC: &str = "MOCKDOC v1";

/// Builds mock document bytes.
#[derive(Clone, Debug)]
pub struct TestDocBuilder {
    pages: u32,
    width: u32,
    height: u32,
    corrupt: BTreeSet<u32>,
    panics: BTreeSet<u32>,
}

impl TestDocBuilder {
    #[must_use]
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            width: 100,
            height: 140,
            corrupt: BTreeSet::new(),
            panics: BTreeSet::new(),
        }
    }

    /// Base page size at scale 1.0.
    #[must_use]
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Mark a page (1-indexed) as undecodable.
    #[must_use]
    pub fn corrupt_page(mut self, page: u32) -> Self {
        self.corrupt.insert(page);
        self
    }

    /// Mark a page (1-indexed) whose rasterization panics.
    #[must_use]
    pub fn panic_page(mut self, page: u32) -> Self {
        self.panics.insert(page);
        self
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut out = format!("{MAGIC}\npages {}\nsize {} {}\n", self.pages, self.width, self.height);
        for page in &self.corrupt {
            out.push_str(&format!("corrupt {page}\n"));
        }
        for page in &self.panics {
            out.push_str(&format!("panic {page}\n"));
        }
        out.into_bytes()
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

#[derive(Clone, Debug)]
struct DocSpec {
    pages: u32,
    width: u32,
    height: u32,
    corrupt: BTreeSet<u32>,
    panics: BTreeSet<u32>,
}

fn parse_spec(bytes: &[u8]) -> Result<DocSpec, RenderFault> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| RenderFault::decode("mock document is not utf-8"))?;
    let mut lines = text.lines();
    if lines.next() != Some(MAGIC) {
        return Err(RenderFault::decode("missing mock document magic"));
    }

    let mut spec = DocSpec {
        pages: 0,
        width: 100,
        height: 140,
        corrupt: BTreeSet::new(),
        panics: BTreeSet::new(),
    };
    let mut saw_pages = false;

    for line in lines {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("pages") => {
                spec.pages = parse_field(parts.next(), "pages")?;
                saw_pages = true;
            }
            Some("size") => {
                spec.width = parse_field(parts.next(), "size width")?;
                spec.height = parse_field(parts.next(), "size height")?;
            }
            Some("corrupt") => {
                spec.corrupt.insert(parse_field(parts.next(), "corrupt")?);
            }
            Some("panic") => {
                spec.panics.insert(parse_field(parts.next(), "panic")?);
            }
            Some(other) => {
                return Err(RenderFault::decode(format!("unknown directive: {other}")));
            }
            None => {}
        }
    }

    if !saw_pages || spec.pages == 0 {
        return Err(RenderFault::decode("mock document has no pages"));
    }
    Ok(spec)
}

fn parse_field(value: Option<&str>, field: &str) -> Result<u32, RenderFault> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| RenderFault::decode(format!("bad {field} directive")))
}

/// Rasterizer over the mock format. Counts renders per page and can delay
/// each render, which makes coalescing and cancellation tests deterministic.
#[derive(Clone, Default)]
pub struct TestRasterizer {
    delay: Option<Duration>,
    panic_opens_after: Option<usize>,
    opens: Arc<Mutex<usize>>,
    renders: Arc<Mutex<HashMap<u32, usize>>>,
}

impl TestRasterizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every rasterize call.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Panic on every `open` after the first `n` calls succeed. Lets a
    /// document pass validation and then blow up inside a worker.
    #[must_use]
    pub fn with_open_panic_after(n: usize) -> Self {
        Self {
            panic_opens_after: Some(n),
            ..Self::default()
        }
    }

    /// How many times a page (1-indexed) has actually been rasterized.
    #[must_use]
    pub fn render_count(&self, page: u32) -> usize {
        self.renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_renders(&self) -> usize {
        self.renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl Rasterizer for TestRasterizer {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn RasterDoc>, RenderFault> {
        let opens = {
            let mut opens = self.opens.lock().unwrap_or_else(PoisonError::into_inner);
            *opens += 1;
            *opens
        };
        if let Some(limit) = self.panic_opens_after {
            if opens > limit {
                panic!("synthetic open panic (call {opens})");
            }
        }

        let spec = parse_spec(bytes)?;
        Ok(Box::new(TestDoc {
            spec,
            delay: self.delay,
            renders: Arc::clone(&self.renders),
        }))
    }
}

struct TestDoc {
    spec: DocSpec,
    delay: Option<Duration>,
    renders: Arc<Mutex<HashMap<u32, usize>>>,
}

impl RasterDoc for TestDoc {
    fn page_count(&self) -> usize {
        self.spec.pages as usize
    }

    fn rasterize(&self, page_index: usize, scale: f32) -> Result<PixelBuffer, RenderFault> {
        let page = page_index as u32 + 1;
        if page > self.spec.pages {
            return Err(RenderFault::decode(format!("page {page} out of range")));
        }
        if self.spec.corrupt.contains(&page) {
            return Err(RenderFault::decode(format!("synthetic decode failure on page {page}")));
        }
        if self.spec.panics.contains(&page) {
            panic!("synthetic rasterizer panic on page {page}");
        }

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        *self
            .renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(page)
            .or_insert(0) += 1;

        let width = ((self.spec.width as f32 * scale).round() as u32).max(1);
        let height = ((self.spec.height as f32 * scale).round() as u32).max(1);
        let scale_millionths = (scale * 1_000_000.0) as u32;

        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(((x.wrapping_mul(31).wrapping_add(page)) % 256) as u8);
                pixels.push(((y.wrapping_mul(17).wrapping_add(scale_millionths)) % 256) as u8);
                pixels.push(((x ^ y) % 256) as u8);
            }
        }

        Ok(PixelBuffer {
            pixels,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trips_through_parser() {
        let bytes = TestDocBuilder::new(5)
            .size(80, 120)
            .corrupt_page(3)
            .panic_page(4)
            .build();

        let spec = parse_spec(&bytes).unwrap();
        assert_eq!(spec.pages, 5);
        assert_eq!((spec.width, spec.height), (80, 120));
        assert!(spec.corrupt.contains(&3));
        assert!(spec.panics.contains(&4));
    }

    #[test]
    fn open_rejects_garbage() {
        let rasterizer = TestRasterizer::new();
        assert!(rasterizer.open(b"not a document").is_err());
    }

    #[test]
    fn rasterize_is_deterministic_and_scales() {
        let rasterizer = TestRasterizer::new();
        let bytes = TestDocBuilder::new(2).size(10, 20).build();
        let doc = rasterizer.open(&bytes).unwrap();

        let a = doc.rasterize(0, 1.0).unwrap();
        let b = doc.rasterize(0, 1.0).unwrap();
        assert_eq!(a.pixels, b.pixels);

        let big = doc.rasterize(0, 2.0).unwrap();
        assert_eq!((big.width, big.height), (20, 40));
        assert!(big.width > a.width && big.height > a.height);

        assert_eq!(rasterizer.render_count(1), 3);
    }

    #[test]
    fn corrupt_page_fails_to_rasterize() {
        let rasterizer = TestRasterizer::new();
        let bytes = TestDocBuilder::new(3).corrupt_page(2).build();
        let doc = rasterizer.open(&bytes).unwrap();

        assert!(doc.rasterize(0, 1.0).is_ok());
        assert!(matches!(
            doc.rasterize(1, 1.0),
            Err(RenderFault::Decode { .. })
        ));
    }
}

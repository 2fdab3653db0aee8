//! Lossless optimization of static assets.
//!
//! PNG files are re-encoded with maximum compression and adaptive filtering
//! and only replaced when that makes them smaller. SVG files lose comments
//! and redundant whitespace. Everything else is copied unchanged.

use crate::build::pipeline::{SourceFile, Transform, TransformError};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};
use regex::Regex;
use std::sync::OnceLock;

fn svg_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"))
}

fn svg_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<[A-Za-z?!][^>"']*(?:(?:"[^"]*"|'[^']*')[^>"']*)*>"#).expect("valid regex")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn between_tags_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">\s+<").expect("valid regex"))
}

/// Re-encode a PNG losslessly. Returns `None` when the result is not smaller.
pub fn optimize_png(data: &[u8]) -> Result<Option<Vec<u8>>, TransformError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Png)
        .map_err(|e| TransformError::Other(format!("invalid PNG: {}", e)))?;

    let (width, height) = (image.width(), image.height());
    let mut encoded = Vec::new();
    PngEncoder::new_with_quality(&mut encoded, CompressionType::Best, FilterType::Adaptive)
        .write_image(image.as_bytes(), width, height, image.color())
        .map_err(|e| TransformError::Other(format!("PNG encoding failed: {}", e)))?;

    Ok((encoded.len() < data.len()).then_some(encoded))
}

/// Remove comments and redundant whitespace from SVG markup.
pub fn optimize_svg(text: &str) -> String {
    let without_comments = svg_comment_re().replace_all(text, "");
    let tidy_tags = svg_tag_re().replace_all(&without_comments, |caps: &regex::Captures<'_>| {
        let collapsed = whitespace_re().replace_all(&caps[0], " ");
        collapsed.replace(" />", "/>").replace(" >", ">")
    });
    between_tags_re().replace_all(tidy_tags.trim(), "><").into_owned()
}

/// Pipeline stage optimizing images by file type.
#[derive(Debug, Clone)]
pub struct AssetOptimizer {
    png: bool,
    svg: bool,
}

impl AssetOptimizer {
    /// Create an optimizer; each format can be switched off.
    pub fn new(png: bool, svg: bool) -> Self {
        Self { png, svg }
    }
}

impl Default for AssetOptimizer {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl Transform for AssetOptimizer {
    fn name(&self) -> &'static str {
        "imagemin"
    }

    fn apply(&self, mut file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        match file.extension().as_deref() {
            Some("png") if self.png => {
                if let Some(smaller) = optimize_png(&file.contents)? {
                    file.contents = smaller;
                }
            }
            Some("svg") if self.svg => {
                let optimized = optimize_svg(file.text()?);
                file.set_text(optimized);
            }
            _ => {}
        }
        Ok(Some(file))
    }
}

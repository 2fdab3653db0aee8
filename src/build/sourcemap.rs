//! Line-granular source maps (revision 3).
//!
//! Each generated line maps to at most one `(source, line)` origin at column 0.
//! That is enough for stylesheets compiled from partials and for scripts that
//! are concatenated and whitespace-minified, and it keeps the map exact when
//! stages preserve line structure.

use serde::Serialize;

/// Where a generated line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOrigin {
    /// Index into [`LineMap::sources`]
    pub source: usize,
    /// Zero-based line in that source
    pub line: u32,
}

/// Source map state carried by a file through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    sources: Vec<String>,
    contents: Vec<Option<String>>,
    lines: Vec<Option<LineOrigin>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapJson<'a> {
    version: u8,
    file: &'a str,
    source_root: &'a str,
    sources: &'a [String],
    sources_content: &'a [Option<String>],
    names: [&'a str; 0],
    mappings: String,
}

impl LineMap {
    /// Identity map for a single source: line `n` maps to line `n`.
    pub fn identity(source: impl Into<String>, content: &str) -> Self {
        let line_count = content.lines().count().max(1);
        Self {
            sources: vec![source.into()],
            contents: vec![Some(content.to_string())],
            lines: (0..line_count)
                .map(|i| {
                    Some(LineOrigin {
                        source: 0,
                        line: i as u32,
                    })
                })
                .collect(),
        }
    }

    /// Build a map from explicit per-line origins.
    pub fn from_parts(
        sources: Vec<String>,
        contents: Vec<Option<String>>,
        lines: Vec<Option<LineOrigin>>,
    ) -> Self {
        Self {
            sources,
            contents,
            lines,
        }
    }

    /// Source names referenced by this map.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Origin of a generated line.
    pub fn origin(&self, line: usize) -> Option<LineOrigin> {
        self.lines.get(line).copied().flatten()
    }

    /// Number of generated lines described by the map.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Re-derive the map after a stage rewrote the output.
    ///
    /// `previous_line_of` gives, for each new generated line, the generated
    /// line of the old output it was produced from.
    pub fn remap(&self, previous_line_of: &[Option<usize>]) -> Self {
        Self {
            sources: self.sources.clone(),
            contents: self.contents.clone(),
            lines: previous_line_of.iter().map(|prev| prev.and_then(|l| self.origin(l))).collect(),
        }
    }

    /// Collapse the map onto a single generated line (used after full minification).
    pub fn collapse(&self) -> Self {
        let first = self.lines.iter().flatten().next().copied();
        Self {
            sources: self.sources.clone(),
            contents: self.contents.clone(),
            lines: vec![first],
        }
    }

    /// Append another map below this one, as a concatenation does.
    ///
    /// `separator_lines` is the number of generated lines inserted between
    /// the two outputs that map to nothing.
    pub fn append(&mut self, other: &LineMap, separator_lines: usize) {
        let offset = self.sources.len();
        self.sources.extend(other.sources.iter().cloned());
        self.contents.extend(other.contents.iter().cloned());
        self.lines.extend(std::iter::repeat(None).take(separator_lines));
        self.lines.extend(other.lines.iter().map(|o| {
            o.map(|o| LineOrigin {
                source: o.source + offset,
                line: o.line,
            })
        }));
    }

    /// Encode the `mappings` field.
    pub fn mappings(&self) -> String {
        let mut out = String::new();
        let mut prev_source = 0i64;
        let mut prev_line = 0i64;
        for (i, origin) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            if let Some(origin) = origin {
                let source = origin.source as i64;
                let line = origin.line as i64;
                encode_vlq(0, &mut out);
                encode_vlq(source - prev_source, &mut out);
                encode_vlq(line - prev_line, &mut out);
                encode_vlq(0, &mut out);
                prev_source = source;
                prev_line = line;
            }
        }
        out
    }

    /// Serialize as a v3 source map for the generated file `file`.
    pub fn to_json(&self, file: &str) -> String {
        let json = SourceMapJson {
            version: 3,
            file,
            source_root: "/source/",
            sources: &self.sources,
            sources_content: &self.contents,
            names: [],
            mappings: self.mappings(),
        };
        serde_json::to_string(&json).unwrap_or_default()
    }
}

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Append the base64 VLQ encoding of `value`.
pub fn encode_vlq(value: i64, out: &mut String) {
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Comment linking a generated file to its map, in the syntax of the file type.
pub fn mapping_url_comment(map_name: &str, block_comment: bool) -> String {
    if block_comment {
        format!("\n/*# sourceMappingURL={} */\n", map_name)
    } else {
        format!("\n//# sourceMappingURL={}\n", map_name)
    }
}

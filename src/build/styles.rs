//! Stylesheet compilation.
//!
//! Sources are Sass-flavoured CSS: `@import` of partials, `$variables`
//! (with `!default`), `//` line comments and nested rules. The preprocessor
//! resolves the Sass-only parts, then lightningcss parses the result, lowers
//! nesting, adds vendor prefixes for the configured browsers and prints
//! compressed CSS.

use crate::build::pipeline::{SourceFile, Transform, TransformError};
use crate::build::sourcemap::{LineMap, LineOrigin};
use crate::config::BrowserTargets;
use lightningcss::stylesheet::{
    MinifyOptions, ParserFlags, ParserOptions, PrinterOptions, StyleSheet,
};
use lightningcss::targets::{Browsers, Targets};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*@import\s+(.+?)\s*;\s*$").expect("valid regex"))
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$([A-Za-z_][\w-]*)\s*:\s*([^;{}]+?)\s*(!default)?\s*;").expect("valid regex")
    })
}

fn interpolation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\{\s*\$([A-Za-z_][\w-]*)\s*\}").expect("valid regex"))
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z_][\w-]*)").expect("valid regex"))
}

fn message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*@(debug|warn)\s+(.*?)\s*;\s*$").expect("valid regex"))
}

/// Replace comments with spaces, keeping every byte offset and line break.
///
/// `//` comments are recognised outside strings and unquoted `url(...)`.
/// With `blank_strings` the contents of quoted strings are blanked too.
pub fn blank_comments(text: &str, blank_strings: bool) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    let blank = |out: &mut Vec<u8>, b: u8| out.push(if b == b'\n' { b'\n' } else { b' ' });

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let end = text[i + 2..].find("*/").map(|e| i + 2 + e + 2).unwrap_or(bytes.len());
            for &c in &bytes[i..end] {
                blank(&mut out, c);
            }
            i = end;
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                blank(&mut out, bytes[i]);
                i += 1;
            }
        } else if b == b'"' || b == b'\'' {
            out.push(b);
            i += 1;
            while i < bytes.len() && bytes[i] != b && bytes[i] != b'\n' {
                let escaped = bytes[i] == b'\\' && i + 1 < bytes.len();
                let span = if escaped { 2 } else { 1 };
                for &c in &bytes[i..i + span] {
                    if blank_strings {
                        blank(&mut out, c);
                    } else {
                        out.push(c);
                    }
                }
                i += span;
            }
            if i < bytes.len() && bytes[i] == b {
                out.push(b);
                i += 1;
            }
        } else if bytes.len() - i >= 4
            && bytes[i..i + 4].eq_ignore_ascii_case(b"url(")
            && !matches!(bytes.get(i + 4), Some(b'"' | b'\''))
        {
            let end = text[i..].find(')').map(|e| i + e + 1).unwrap_or(bytes.len());
            out.extend_from_slice(&bytes[i..end]);
            i = end;
        } else {
            out.push(b);
            i += 1;
        }
    }

    // whole characters are blanked, so the output stays valid UTF-8
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// lightningcss browser targets from the configured major versions.
pub fn browser_targets(config: &BrowserTargets) -> Targets {
    let version = |v: Option<u32>| v.map(|major| major << 16);
    Targets::from(Browsers {
        chrome: version(config.chrome),
        firefox: version(config.firefox),
        safari: version(config.safari),
        edge: version(config.edge),
        ios_saf: version(config.ios_saf),
        ..Browsers::default()
    })
}

/// Sass sources flattened into plain (nested) CSS.
#[derive(Debug, Default)]
struct Expansion {
    sources: Vec<String>,
    contents: Vec<Option<String>>,
    lines: Vec<String>,
    origins: Vec<Option<LineOrigin>>,
}

impl Expansion {
    fn push(&mut self, line: String, source: usize, index: usize) {
        self.lines.push(line);
        self.origins.push(Some(LineOrigin {
            source,
            line: index as u32,
        }));
    }

    fn describe(&self, line: usize) -> (usize, String) {
        match self.origins.get(line).copied().flatten() {
            Some(origin) => (origin.line as usize + 1, self.sources[origin.source].clone()),
            None => (line + 1, String::new()),
        }
    }
}

/// Compiles `.scss` sources to compressed, prefixed CSS.
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    src_root: PathBuf,
    include_paths: Vec<PathBuf>,
    targets: Targets,
}

impl StyleCompiler {
    /// Create a compiler.
    ///
    /// # Arguments
    /// - `src_root` - Source root, used to name imported files in source maps
    /// - `include_paths` - Extra directories searched by `@import`
    /// - `browsers` - Browser targets for prefixing and lowering
    pub fn new(
        src_root: impl Into<PathBuf>,
        include_paths: Vec<PathBuf>,
        browsers: &BrowserTargets,
    ) -> Self {
        Self {
            src_root: src_root.into(),
            include_paths,
            targets: browser_targets(browsers),
        }
    }

    fn source_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.src_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Find the file an `@import` refers to.
    ///
    /// `@import "components/button"` matches `components/_button.scss` or
    /// `components/button.scss`, relative to the importing file first and
    /// then to each include path.
    pub fn resolve_import(&self, from: &Path, name: &str) -> Option<PathBuf> {
        let target = Path::new(name);
        let dir = target.parent().unwrap_or(Path::new(""));
        let file = target.file_name()?.to_string_lossy();
        let stem = file.strip_suffix(".scss").unwrap_or(&file);
        let candidates = [format!("_{}.scss", stem), format!("{}.scss", stem)];

        from.parent()
            .into_iter()
            .chain(self.include_paths.iter().map(PathBuf::as_path))
            .flat_map(|base| candidates.iter().map(move |c| base.join(dir).join(c)))
            .find(|p| p.is_file())
    }

    fn expand(
        &self,
        path: &Path,
        text: &str,
        stack: &mut Vec<PathBuf>,
        out: &mut Expansion,
    ) -> Result<(), TransformError> {
        let source = out.sources.len();
        out.sources.push(self.source_name(path));
        out.contents.push(Some(text.to_string()));
        let name = out.sources[source].clone();

        let stripped = blank_comments(text, false);
        for (index, line) in stripped.lines().enumerate() {
            let Some(caps) = import_re().captures(line) else {
                out.push(line.trim_end().to_string(), source, index);
                continue;
            };

            let mut plain = Vec::new();
            for target in split_imports(&caps[1]) {
                let unquoted = target.trim_matches(|c| c == '"' || c == '\'');
                if is_plain_css_import(unquoted) || target.starts_with("url(") {
                    plain.push(target);
                    continue;
                }

                let resolved =
                    self.resolve_import(path, unquoted).ok_or_else(|| TransformError::Syntax {
                        line: index + 1,
                        message: format!(
                            "{}: file to import not found or unreadable: {}",
                            name, unquoted
                        ),
                    })?;
                let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
                if stack.contains(&canonical) {
                    return Err(TransformError::Syntax {
                        line: index + 1,
                        message: format!("{}: import cycle through {}", name, unquoted),
                    });
                }

                let imported = fs::read_to_string(&resolved)?;
                stack.push(canonical);
                self.expand(&resolved, &imported, stack, out)?;
                stack.pop();
            }
            if !plain.is_empty() {
                out.push(format!("@import {};", plain.join(", ")), source, index);
            }
        }
        Ok(())
    }

    /// Resolve variables line by line in source order.
    fn resolve_variables(&self, expansion: &mut Expansion) -> Result<(), TransformError> {
        let mut vars: HashMap<String, String> = HashMap::new();

        for idx in 0..expansion.lines.len() {
            let line = std::mem::take(&mut expansion.lines[idx]);
            let undefined = |name: &str| {
                let (line, source) = expansion.describe(idx);
                TransformError::Syntax {
                    line,
                    message: format!("{}: undefined variable ${}", source, name),
                }
            };

            if let Some(caps) = message_re().captures(&line) {
                let message = substitute(&caps[2], &vars).map_err(|n| undefined(&n))?;
                let (at, source) = expansion.describe(idx);
                if &caps[1] == "warn" {
                    warn!("{}:{}: {}", source, at, message);
                } else {
                    info!("{}:{} DEBUG: {}", source, at, message);
                }
                continue;
            }

            let mut rest = String::with_capacity(line.len());
            let mut last = 0;
            for caps in declaration_re().captures_iter(&line) {
                let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                rest.push_str(&line[last..whole.start]);
                last = whole.end;

                let value = substitute(&caps[2], &vars).map_err(|n| undefined(&n))?;
                let is_default = caps.get(3).is_some();
                if !(is_default && vars.contains_key(&caps[1])) {
                    vars.insert(caps[1].to_string(), value);
                }
            }
            rest.push_str(&line[last..]);

            expansion.lines[idx] = substitute(&rest, &vars).map_err(|n| undefined(&n))?;
        }
        Ok(())
    }

    /// Compile one stylesheet.
    ///
    /// Returns the compressed CSS and a line map over the main file and every
    /// file it imported.
    pub fn compile(&self, path: &Path, text: &str) -> Result<(String, LineMap), TransformError> {
        let mut expansion = Expansion::default();
        let mut stack = vec![path.canonicalize().unwrap_or_else(|_| path.to_path_buf())];
        self.expand(path, text, &mut stack, &mut expansion)?;
        self.resolve_variables(&mut expansion)?;

        let css = expansion.lines.join("\n");
        let options = ParserOptions {
            filename: self.source_name(path),
            flags: ParserFlags::NESTING,
            ..ParserOptions::default()
        };

        let code = {
            let mut sheet = StyleSheet::parse(&css, options).map_err(|e| {
                let at = e.loc.as_ref().map(|l| l.line as usize).unwrap_or(0);
                let (line, source) = expansion.describe(at);
                TransformError::Syntax { line, message: format!("{}: {}", source, e.kind) }
            })?;
            sheet
                .minify(MinifyOptions {
                    targets: self.targets,
                    ..MinifyOptions::default()
                })
                .map_err(|e| TransformError::Other(e.to_string()))?;
            sheet
                .to_css(PrinterOptions {
                    minify: true,
                    targets: self.targets,
                    ..PrinterOptions::default()
                })
                .map_err(|e| TransformError::Other(e.to_string()))?
                .code
        };

        let map = LineMap::from_parts(expansion.sources, expansion.contents, expansion.origins)
            .collapse();
        Ok((code, map))
    }
}

impl Transform for StyleCompiler {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn apply(&self, mut file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        if file.is_partial() {
            return Ok(None);
        }

        let (code, map) = self.compile(&file.path, file.text()?)?;
        file.set_text(code);
        if file.map.is_some() {
            file.map = Some(map);
        }
        file.relative.set_extension("css");
        Ok(Some(file))
    }
}

fn substitute(text: &str, vars: &HashMap<String, String>) -> Result<String, String> {
    let mut missing = None;
    let mut lookup = |caps: &Captures<'_>| match vars.get(&caps[1]) {
        Some(value) => value.clone(),
        None => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    };
    let interpolated = interpolation_re().replace_all(text, &mut lookup).into_owned();
    let replaced = variable_re().replace_all(&interpolated, &mut lookup).into_owned();
    match missing {
        Some(name) => Err(name),
        None => Ok(replaced),
    }
}

fn split_imports(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in list.chars() {
        match (c, quote) {
            ('"' | '\'', None) => {
                quote = Some(c);
                current.push(c);
            }
            (c, Some(q)) if c == q => {
                quote = None;
                current.push(c);
            }
            (',', None) => items.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn is_plain_css_import(target: &str) -> bool {
    target.ends_with(".css")
        || target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::pipeline::InitSourceMap;
    use tempfile::TempDir;

    fn compiler(root: &Path) -> StyleCompiler {
        StyleCompiler::new(root, vec![root.join("stylesheets")], &BrowserTargets::default())
    }

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_blank_comments_keeps_offsets() {
        let text = "a { // note\n  b: url(http://x/y); /* c\n d */ e: '//' }";
        let blanked = blank_comments(text, false);
        assert_eq!(blanked.len(), text.len());
        assert_eq!(blanked.lines().count(), text.lines().count());
        assert!(!blanked.contains("note"));
        assert!(blanked.contains("url(http://x/y)"));
        assert!(!blanked.contains("/*"));
        assert!(blanked.contains("'//'"));
    }

    #[test]
    fn test_blank_comments_strings() {
        assert_eq!(blank_comments("a: 'x!important';", true), "a: '           ';");
    }

    #[test]
    fn test_compile_compresses() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "stylesheets/main.scss", ".btn {\n  color: red;\n}\n");
        let src = fs::read_to_string(&path).unwrap();
        let (css, _) = compiler(temp.path()).compile(&path, &src).unwrap();
        assert_eq!(css, ".btn{color:red}");
    }

    #[test]
    fn test_compile_adds_vendor_prefixes() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "stylesheets/main.scss", ".a { user-select: none; }");
        let (css, _) = compiler(temp.path()).compile(&path, ".a { user-select: none; }").unwrap();
        assert!(css.contains("-webkit-user-select:none"), "{}", css);
    }

    #[test]
    fn test_compile_variables_and_defaults() {
        let temp = TempDir::new().unwrap();
        let src = concat!(
            "$brand: #123456;\n",
            "$brand: #f00 !default;\n",
            "$pad: 4px;\n",
            ".a { color: $brand; margin: $pad; }\n",
            ".b-#{$pad} { top: 0 }"
        );
        let path = write(temp.path(), "stylesheets/main.scss", src);
        let (css, _) = compiler(temp.path()).compile(&path, src).unwrap();
        assert!(css.contains(".a{color:#123456;margin:4px}"), "{}", css);
        assert!(css.contains(".b-4px{top:0}"), "{}", css);
    }

    #[test]
    fn test_compile_undefined_variable() {
        let temp = TempDir::new().unwrap();
        let src = ".a {\n  color: $missing;\n}";
        let path = write(temp.path(), "stylesheets/main.scss", src);
        let err = compiler(temp.path()).compile(&path, src).unwrap_err();
        match err {
            TransformError::Syntax { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("undefined variable $missing"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_compile_resolves_partials() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "stylesheets/components/_button.scss",
            "// button\n$radius: 2px;\n.btn { border-radius: $radius; }\n",
        );
        let src = "@import \"components/button\";\n.page { color: red; }\n";
        let path = write(temp.path(), "stylesheets/main.scss", src);

        let (css, map) = compiler(temp.path()).compile(&path, src).unwrap();
        assert!(css.contains(".btn{border-radius:2px}"), "{}", css);
        assert!(css.contains(".page{color:red}"), "{}", css);
        assert_eq!(
            map.sources(),
            &[
                "stylesheets/main.scss".to_string(),
                "stylesheets/components/_button.scss".to_string(),
            ]
        );
    }

    #[test]
    fn test_compile_missing_import() {
        let temp = TempDir::new().unwrap();
        let src = "@import 'nope';";
        let path = write(temp.path(), "stylesheets/main.scss", src);
        let err = compiler(temp.path()).compile(&path, src).unwrap_err();
        assert!(err.to_string().contains("file to import not found"));
    }

    #[test]
    fn test_compile_import_cycle() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "stylesheets/_a.scss", "@import 'b';");
        write(temp.path(), "stylesheets/_b.scss", "@import 'a';");
        let src = "@import 'a';";
        let path = write(temp.path(), "stylesheets/main.scss", src);
        let err = compiler(temp.path()).compile(&path, src).unwrap_err();
        assert!(err.to_string().contains("import cycle"));
    }

    #[test]
    fn test_compile_keeps_plain_css_import() {
        let temp = TempDir::new().unwrap();
        let src = "@import \"https://fonts.example/css\";\n.a { color: red; }";
        let path = write(temp.path(), "stylesheets/main.scss", src);
        let (css, _) = compiler(temp.path()).compile(&path, src).unwrap();
        assert!(css.starts_with("@import"), "{}", css);
    }

    #[test]
    fn test_compile_syntax_error() {
        let temp = TempDir::new().unwrap();
        let src = ".a {\n  color: red;\n}\n..b { top: 0 }";
        let path = write(temp.path(), "stylesheets/main.scss", src);
        assert!(compiler(temp.path()).compile(&path, src).is_err());
    }

    #[test]
    fn test_stage_drops_partials_and_renames() {
        let temp = TempDir::new().unwrap();
        let partial = write(temp.path(), "stylesheets/_vars.scss", "$a: 1px;");
        let main = write(temp.path(), "stylesheets/main.scss", ".a { top: 0 }");
        let stage = compiler(temp.path());

        let contents = b"$a: 1px;".to_vec();
        let file = SourceFile::new(&partial, "_vars.scss", "stylesheets/_vars.scss", contents);
        assert!(stage.apply(file).unwrap().is_none());

        let contents = b".a { top: 0 }".to_vec();
        let file = SourceFile::new(&main, "main.scss", "stylesheets/main.scss", contents);
        let file = InitSourceMap.apply(file).unwrap().unwrap();
        let out = stage.apply(file).unwrap().unwrap();
        assert_eq!(out.relative, PathBuf::from("main.css"));
        assert_eq!(out.text().unwrap(), ".a{top:0}");
        assert_eq!(out.map.unwrap().line_count(), 1);
    }
}

//! Script processing: lexer, minifier and transpiler.
//!
//! Everything here works on a token stream rather than raw text so that
//! strings, template literals, regular expressions and comments are never
//! confused with code. The minifier keeps line breaks between statements,
//! which keeps automatic semicolon insertion intact and lets line-level
//! source maps stay exact.

use crate::build::pipeline::{SourceFile, Transform, TransformError};

/// Lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Spaces and tabs
    Whitespace,
    /// A single line break
    Newline,
    /// `// ...` up to (not including) the line break
    LineComment,
    /// `/* ... */`, possibly spanning lines
    BlockComment,
    /// Identifier or keyword
    Ident,
    /// Numeric literal
    Number,
    /// Single or double quoted string
    Str,
    /// Template literal, including any `${...}` substitutions
    Template,
    /// Regular expression literal with flags
    Regex,
    /// Operator or punctuation
    Punct,
}

/// A token and where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Category
    pub kind: TokenKind,
    /// Source text of the token
    pub text: &'a str,
    /// Zero-based line of the first character
    pub line: usize,
    /// Zero-based byte column of the first character
    pub column: usize,
}

impl Token<'_> {
    /// Whether the token carries meaning (not whitespace or a comment).
    pub fn is_significant(&self) -> bool {
        !matches!(
            self.kind,
            TokenKind::Whitespace
                | TokenKind::Newline
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }

    /// Whether this is the punctuator `p`.
    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    /// Whether this is the identifier or keyword `word`.
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }
}

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**", "<<", ">>",
];

// After these keywords a `/` starts a regular expression.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn syntax_error(src: &str, at: usize, message: &str) -> TransformError {
    let line = src[..at].bytes().filter(|b| *b == b'\n').count() + 1;
    TransformError::Syntax {
        line,
        message: message.to_string(),
    }
}

/// Split script source into tokens.
///
/// Fails on unterminated strings, comments, templates and regular expressions.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>, TransformError> {
    let bytes = src.as_bytes();
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut i = 0;
    let mut line = 0;
    let mut line_start = 0;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];
        let kind = match b {
            b'\n' => {
                i += 1;
                TokenKind::Newline
            }
            b' ' | b'\t' | b'\r' | 0x0b | 0x0c => {
                while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | 0x0b | 0x0c) {
                    i += 1;
                }
                TokenKind::Whitespace
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                TokenKind::LineComment
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = src[i + 2..]
                    .find("*/")
                    .ok_or_else(|| syntax_error(src, start, "unterminated comment"))?;
                i += 2 + end + 2;
                TokenKind::BlockComment
            }
            b'/' if regex_allowed(&tokens) => {
                i = scan_regex(src, i)?;
                TokenKind::Regex
            }
            b'"' | b'\'' => {
                i = scan_string(src, i)?;
                TokenKind::Str
            }
            b'`' => {
                i = scan_template(src, i)?;
                TokenKind::Template
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            b'.' if bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            _ if is_word_byte(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Ident
            }
            _ => {
                let rest = &src[i..];
                let len = PUNCTUATORS
                    .iter()
                    .find(|p| rest.starts_with(**p))
                    .map(|p| p.len())
                    .unwrap_or(1);
                i += len;
                TokenKind::Punct
            }
        };

        let text = &src[start..i];
        tokens.push(Token {
            kind,
            text,
            line,
            column: start - line_start,
        });

        for (offset, c) in text.bytes().enumerate() {
            if c == b'\n' {
                line += 1;
                line_start = start + offset + 1;
            }
        }
    }

    Ok(tokens)
}

fn regex_allowed(tokens: &[Token<'_>]) -> bool {
    let mut significant = tokens.iter().rev().filter(|t| t.is_significant());
    match significant.next() {
        None => true,
        Some(t) => match t.kind {
            // Postfix `++`/`--` end an operand, like `)`.
            TokenKind::Punct if matches!(t.text, "++" | "--") => {
                !significant.next().is_some_and(ends_operand)
            }
            TokenKind::Punct => !matches!(t.text, ")" | "]" | "}"),
            TokenKind::Ident => REGEX_KEYWORDS.contains(&t.text),
            _ => false,
        },
    }
}

fn ends_operand(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Ident => !REGEX_KEYWORDS.contains(&token.text),
        TokenKind::Number => true,
        TokenKind::Punct => matches!(token.text, ")" | "]"),
        _ => false,
    }
}

fn scan_string(src: &str, start: usize) -> Result<usize, TransformError> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(syntax_error(src, start, "unterminated string literal"))
}

fn scan_template(src: &str, start: usize) -> Result<usize, TransformError> {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return Ok(i + 1),
            b'$' if bytes.get(i + 1) == Some(&b'{') => i = scan_substitution(src, i + 2)?,
            _ => i += 1,
        }
    }
    Err(syntax_error(src, start, "unterminated template literal"))
}

// Scans a `${...}` body starting after the opening brace; returns the index after the
// closing brace.
fn scan_substitution(src: &str, start: usize) -> Result<usize, TransformError> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = scan_string(src, i)?,
            b'`' => i = scan_template(src, i)?,
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' if depth == 0 => return Ok(i + 1),
            b'}' => {
                depth -= 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err(syntax_error(src, start, "unterminated template substitution"))
}

fn scan_regex(src: &str, start: usize) -> Result<usize, TransformError> {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Ok(i);
            }
            _ => i += 1,
        }
    }
    Err(syntax_error(src, start, "unterminated regular expression"))
}

fn scan_number(bytes: &[u8], start: usize) -> usize {
    let hex = bytes[start] == b'0' && matches!(bytes.get(start + 1), Some(b'x' | b'X'));
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
            i += 1;
        } else if !hex && matches!(c, b'+' | b'-') && matches!(bytes[i - 1], b'e' | b'E') {
            i += 1;
        } else {
            break;
        }
    }
    i
}

/// Output of a line-preserving rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// New source text
    pub code: String,
    /// For every output line, the input line it came from
    pub origins: Vec<Option<usize>>,
}

struct LineWriter {
    lines: Vec<String>,
    origins: Vec<Option<usize>>,
    current: String,
    origin: Option<usize>,
}

impl LineWriter {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            origins: Vec::new(),
            current: String::new(),
            origin: None,
        }
    }

    fn push(&mut self, text: &str, line: usize) {
        for (k, piece) in text.split('\n').enumerate() {
            if k > 0 {
                self.break_line(true);
                self.origin = Some(line + k);
            }
            if self.origin.is_none() {
                self.origin = Some(line);
            }
            self.current.push_str(piece);
        }
    }

    fn break_line(&mut self, keep_empty: bool) {
        if keep_empty || !self.current.is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
            self.origins.push(self.origin);
        }
        self.origin = None;
    }

    fn finish(mut self) -> Rewritten {
        self.break_line(false);
        Rewritten {
            code: self.lines.join("\n"),
            origins: self.origins,
        }
    }
}

fn needs_space(prev: &Token<'_>, next: &Token<'_>) -> bool {
    let (Some(a), Some(b)) = (prev.text.bytes().last(), next.text.bytes().next()) else {
        return false;
    };
    (is_word_byte(a) && is_word_byte(b))
        || (a == b'+' && b == b'+')
        || (a == b'-' && b == b'-')
        || (a == b'/' && b == b'/')
        || (prev.kind == TokenKind::Number && b == b'.')
}

/// Remove comments, indentation, blank lines and redundant spaces.
///
/// Line breaks between statements are kept; every output line maps to one
/// input line.
pub fn minify(src: &str) -> Result<Rewritten, TransformError> {
    let tokens = tokenize(src)?;
    let mut out = LineWriter::new();
    let mut prev: Option<Token<'_>> = None;
    let mut pending_space = false;

    for token in &tokens {
        match token.kind {
            TokenKind::Whitespace | TokenKind::LineComment => pending_space = true,
            TokenKind::BlockComment if token.text.contains('\n') => {
                out.break_line(false);
                prev = None;
                pending_space = false;
            }
            TokenKind::BlockComment => pending_space = true,
            TokenKind::Newline => {
                out.break_line(false);
                prev = None;
                pending_space = false;
            }
            _ => {
                if let Some(p) = &prev {
                    if pending_space && needs_space(p, token) {
                        out.push(" ", token.line);
                    }
                }
                out.push(token.text, token.line);
                prev = Some(*token);
                pending_space = false;
            }
        }
    }

    Ok(out.finish())
}

/// Lower a script for older engines.
///
/// Adds a `"use strict"` directive when there is none and turns top-level
/// `let` and `const` declarations into `var`.
pub fn transpile(src: &str) -> Result<Rewritten, TransformError> {
    let tokens = tokenize(src)?;
    let significant: Vec<&Token<'_>> = tokens.iter().filter(|t| t.is_significant()).collect();

    let has_directive = significant.first().is_some_and(|t| {
        t.kind == TokenKind::Str
            && t.text.len() >= 2
            && &t.text[1..t.text.len() - 1] == "use strict"
    });

    let mut out = LineWriter::new();
    if !has_directive {
        // the directive maps to no input line
        out.current.push_str("\"use strict\";");
        out.break_line(true);
    }

    let mut depth = 0usize;
    let mut prev_significant: Option<&Token<'_>> = None;
    for (idx, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Newline {
            out.break_line(true);
            continue;
        }

        let mut text = token.text;
        if token.kind == TokenKind::Punct {
            match token.text {
                "{" => depth += 1,
                "}" => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        let after_dot = prev_significant.is_some_and(|p| p.is_punct("."));
        if depth == 0 && token.kind == TokenKind::Ident && !after_dot {
            let next = tokens[idx + 1..].iter().find(|t| t.is_significant());
            let declares = match token.text {
                "const" => true,
                "let" => next.is_some_and(|n| {
                    n.kind == TokenKind::Ident || n.is_punct("[") || n.is_punct("{")
                }),
                _ => false,
            };
            if declares {
                text = "var";
            }
        }

        out.push(text, token.line);
        if token.is_significant() {
            prev_significant = Some(token);
        }
    }

    Ok(out.finish())
}

fn apply_rewrite(mut file: SourceFile, rewritten: Rewritten) -> SourceFile {
    if let Some(map) = &file.map {
        file.map = Some(map.remap(&rewritten.origins));
    }
    file.set_text(rewritten.code);
    file
}

/// Pipeline stage running [`minify`].
#[derive(Debug, Default)]
pub struct MinifyScript;

impl Transform for MinifyScript {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        let rewritten = minify(file.text()?)?;
        Ok(Some(apply_rewrite(file, rewritten)))
    }
}

/// Pipeline stage running [`transpile`].
#[derive(Debug, Default)]
pub struct TranspileScript;

impl Transform for TranspileScript {
    fn name(&self) -> &'static str {
        "transpile"
    }

    fn apply(&self, file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        let rewritten = transpile(file.text()?)?;
        Ok(Some(apply_rewrite(file, rewritten)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::pipeline::InitSourceMap;

    fn kinds(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .filter(|t| t.is_significant())
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(
            kinds("let x = a === 1.5e-3;"),
            vec![
                (TokenKind::Ident, "let"),
                (TokenKind::Ident, "x"),
                (TokenKind::Punct, "="),
                (TokenKind::Ident, "a"),
                (TokenKind::Punct, "==="),
                (TokenKind::Number, "1.5e-3"),
                (TokenKind::Punct, ";"),
            ]
        );
    }

    #[test]
    fn test_tokenize_regex_vs_division() {
        assert_eq!(kinds("a / b / c")[1], (TokenKind::Punct, "/"));
        assert_eq!(kinds("x = /a[/]b/gi;")[2], (TokenKind::Regex, "/a[/]b/gi"));
        assert_eq!(kinds("return /x/.test(s)")[1], (TokenKind::Regex, "/x/"));
        assert_eq!(kinds("(a) / 2")[3], (TokenKind::Punct, "/"));
    }

    #[test]
    fn test_tokenize_template_with_substitution() {
        let tokens = kinds("s = `a ${ {b: `c`}.b } // not a comment`;");
        assert_eq!(tokens[2].0, TokenKind::Template);
        assert_eq!(tokens[2].1, "`a ${ {b: `c`}.b } // not a comment`");
        assert_eq!(tokens[3], (TokenKind::Punct, ";"));
    }

    #[test]
    fn test_tokenize_division_after_postfix_update() {
        let tokens = kinds("var half = i++ / 2;\nvar q = a[0]-- / 4;\n");
        assert!(tokens.iter().all(|(kind, _)| *kind != TokenKind::Regex), "{:?}", tokens);
        assert_eq!(tokens.iter().filter(|t| **t == (TokenKind::Punct, "/")).count(), 2);
        assert_eq!(minify("x = a++ / 2;").unwrap().code, "x=a++/2;");
    }

    #[test]
    fn test_tokenize_regex_after_prefix_update() {
        assert_eq!(kinds("x = ++ /a/.lastIndex")[3], (TokenKind::Regex, "/a/"));
    }

    #[test]
    fn test_tokenize_positions() {
        let tokens = tokenize("a\n  /* x\n */ b").unwrap();
        let b = tokens.iter().find(|t| t.text == "b").unwrap();
        assert_eq!(b.line, 2);
        assert_eq!(b.column, 4);
    }

    #[test]
    fn test_tokenize_unterminated() {
        let err = tokenize("var a = 'oops\nvar b;").unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(tokenize("/* never closed").is_err());
        assert!(tokenize("`abc").is_err());
    }

    #[test]
    fn test_minify_strips_comments_and_indentation() {
        let src =
            "// header\nfunction add(a, b) {\n    /* sum */\n    return a + b; // done\n}\n\n";
        let out = minify(src).unwrap();
        assert_eq!(out.code, "function add(a,b){\nreturn a+b;\n}");
        assert_eq!(out.origins, vec![Some(1), Some(3), Some(4)]);
    }

    #[test]
    fn test_minify_keeps_literals() {
        let src = "var s = \"a  // b\";\nvar r = /  x /g;\nvar t = `  ${ a  +  b }  `;";
        let out = minify(src).unwrap();
        assert_eq!(out.code, "var s=\"a  // b\";\nvar r=/  x /g;\nvar t=`  ${ a  +  b }  `;");
    }

    #[test]
    fn test_minify_keeps_required_spaces() {
        assert_eq!(
            minify("a + +b; c - -d; typeof  x; 1 .toString()").unwrap().code,
            "a+ +b;c- -d;typeof x;1 .toString()"
        );
    }

    #[test]
    fn test_minify_multiline_template_keeps_lines() {
        let out = minify("x = `a\n\nb`;\n").unwrap();
        assert_eq!(out.code, "x=`a\n\nb`;");
        assert_eq!(out.origins, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_minify_is_idempotent() {
        let once = minify("if (a) {\n  b();  // c\n}\n").unwrap().code;
        assert_eq!(minify(&once).unwrap().code, once);
    }

    #[test]
    fn test_transpile_adds_directive_and_rewrites_top_level() {
        let src = "const a = 1;\nlet b = 2;\nfunction f() {\n  let c = 3;\n}\nobj.let = 4;";
        let out = transpile(src).unwrap();
        assert_eq!(
            out.code,
            "\"use strict\";\nvar a = 1;\nvar b = 2;\nfunction f() {\n  let c = 3;\n}\nobj.let = 4;"
        );
        assert_eq!(out.origins[0], None);
        assert_eq!(out.origins[1], Some(0));
        assert_eq!(out.origins[6], Some(5));
    }

    #[test]
    fn test_transpile_keeps_existing_directive() {
        let src = "'use strict';\nconst a = 1;";
        let out = transpile(src).unwrap();
        assert_eq!(out.code, "'use strict';\nvar a = 1;");
        assert_eq!(out.origins, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_transpile_is_idempotent() {
        let once = transpile("let x = 1;").unwrap().code;
        assert_eq!(transpile(&once).unwrap().code, once);
    }

    #[test]
    fn test_minify_stage_remaps_source_map() {
        let file = SourceFile::new("a.js", "a.js", "scripts/a.js", b"// c\n\nvar a;\n".to_vec());
        let file = InitSourceMap.apply(file).unwrap().unwrap();
        let file = MinifyScript.apply(file).unwrap().unwrap();

        assert_eq!(file.text().unwrap(), "var a;");
        let map = file.map.unwrap();
        assert_eq!(map.line_count(), 1);
        assert_eq!(map.origin(0).unwrap().line, 2);
    }
}

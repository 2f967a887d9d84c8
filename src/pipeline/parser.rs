//! Source Parser
//!
//! Splits an authored shader source into named sections and tokenizes the
//! stage sections into literal runs and pragma directives.
//!
//! # Source format
//!
//! ```text
//! \color.vs            <- stage section: render mode "color", vertex stage
//! ...
//! \color.fs
//! #pragma shaderblock "light"
//! #pragma shaderblock ENVIRONMENT "environment_2d"
//! #pragma include "common"
//! #pragma snippet "linear_to_srgb"
//! \uniforms            <- declaration lines, see `resources::uniforms`
//! \init                <- declarative property records, same grammar
//! ```
//!
//! A header line starts a section that runs until the next header or the end
//! of the text. Render modes without their own `vs` / `fs` fall back to the
//! `default` render mode.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ShaderError};
use crate::resources::ShaderStage;
use crate::resources::uniforms::{UniformDecl, parse_declarations};

/// Render mode used when a source lacks a mode-specific section.
pub const DEFAULT_RENDER_MODE: &str = "default";

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PragmaKind {
    Include,
    ShaderBlock,
    Snippet,
}

impl PragmaKind {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::ShaderBlock => "shaderblock",
            Self::Snippet => "snippet",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "include" => Some(Self::Include),
            "shaderblock" => Some(Self::ShaderBlock),
            "snippet" => Some(Self::Snippet),
            _ => None,
        }
    }
}

impl fmt::Display for PragmaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One `#pragma include | shaderblock | snippet` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pragma {
    pub kind: PragmaKind,
    /// Literal target (for context pragmas: the default block name).
    pub target: String,
    /// Context key of `#pragma shaderblock KEY "default"`.
    pub context_key: Option<String>,
    /// 1-based line inside the originating resource.
    pub line: usize,
    /// The original line, newline included.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageToken {
    Text(String),
    Pragma(Pragma),
}

/// Stage text as literal runs interleaved with pragmas, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStage {
    origin: String,
    tokens: Vec<StageToken>,
}

impl ParsedStage {
    /// Resource (or block / snippet) the text came from, for diagnostics.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[inline]
    #[must_use]
    pub fn tokens(&self) -> &[StageToken] {
        &self.tokens
    }

    pub fn pragmas(&self) -> impl Iterator<Item = &Pragma> {
        self.tokens.iter().filter_map(|t| match t {
            StageToken::Pragma(p) => Some(p),
            StageToken::Text(_) => None,
        })
    }

    /// Reassembles the original text.
    #[must_use]
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                StageToken::Text(text) => out.push_str(text),
                StageToken::Pragma(pragma) => out.push_str(&pragma.raw),
            }
        }
        out
    }
}

// ─── Stage Tokenizer ─────────────────────────────────────────────────────────

/// Tokenizes stage text; `first_line` is the resource line of its first line.
pub fn parse_stage(origin: &str, text: &str, first_line: usize) -> Result<ParsedStage> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    for (i, line) in text.split_inclusive('\n').enumerate() {
        let line_no = first_line + i;
        match parse_pragma(origin, line_no, line)? {
            Some(pragma) => {
                if !literal.is_empty() {
                    tokens.push(StageToken::Text(std::mem::take(&mut literal)));
                }
                tokens.push(StageToken::Pragma(pragma));
            }
            None => literal.push_str(line),
        }
    }
    if !literal.is_empty() {
        tokens.push(StageToken::Text(literal));
    }

    Ok(ParsedStage {
        origin: origin.to_string(),
        tokens,
    })
}

enum Arg<'a> {
    Ident(&'a str),
    Quoted(&'a str),
}

/// Returns `Ok(None)` for lines that are not one of our pragmas; other
/// `#pragma` directives pass through as literal text.
fn parse_pragma(origin: &str, line_no: usize, line: &str) -> Result<Option<Pragma>> {
    let Some(rest) = line.trim().strip_prefix("#pragma") else {
        return Ok(None);
    };
    if !rest.starts_with(char::is_whitespace) {
        return Ok(None);
    }
    let rest = rest.trim_start();
    let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let Some(kind) = PragmaKind::from_keyword(&rest[..word_end]) else {
        return Ok(None);
    };

    let args = tokenize_args(origin, line_no, &rest[word_end..])?;
    let (target, context_key) = match (kind, args.as_slice()) {
        (_, [Arg::Quoted(name)]) => (*name, None),
        (PragmaKind::ShaderBlock, [Arg::Ident(key), Arg::Quoted(name)]) => (*name, Some(*key)),
        (PragmaKind::ShaderBlock, _) => {
            return Err(ShaderError::parse(
                origin,
                line_no,
                "expected `#pragma shaderblock \"name\"` or `#pragma shaderblock KEY \"name\"`",
            ));
        }
        _ => {
            return Err(ShaderError::parse(
                origin,
                line_no,
                format!("expected `#pragma {kind} \"name\"`"),
            ));
        }
    };
    if target.is_empty() {
        return Err(ShaderError::parse(origin, line_no, "empty pragma target"));
    }

    Ok(Some(Pragma {
        kind,
        target: target.to_string(),
        context_key: context_key.map(str::to_string),
        line: line_no,
        raw: line.to_string(),
    }))
}

fn tokenize_args<'a>(origin: &str, line_no: usize, mut s: &'a str) -> Result<Vec<Arg<'a>>> {
    let mut args = Vec::new();
    loop {
        s = s.trim_start();
        if s.is_empty() || s.starts_with("//") {
            return Ok(args);
        }
        if let Some(quoted) = s.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| ShaderError::parse(origin, line_no, "unterminated string"))?;
            args.push(Arg::Quoted(&quoted[..end]));
            s = &quoted[end + 1..];
        } else {
            let end = s
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(s.len());
            if end == 0 {
                let c = s.chars().next().unwrap_or_default();
                return Err(ShaderError::parse(
                    origin,
                    line_no,
                    format!("unexpected character '{c}' in pragma"),
                ));
            }
            args.push(Arg::Ident(&s[..end]));
            s = &s[end..];
        }
    }
}

// ─── Sections ────────────────────────────────────────────────────────────────

/// Vertex and fragment stages of one render mode.
#[derive(Debug, Clone, Default)]
pub struct CodePart {
    stages: [Option<ParsedStage>; 2],
}

impl CodePart {
    #[inline]
    #[must_use]
    pub fn stage(&self, stage: ShaderStage) -> Option<&ParsedStage> {
        self.stages[stage.index()].as_ref()
    }

    #[inline]
    #[must_use]
    pub fn vertex(&self) -> Option<&ParsedStage> {
        self.stage(ShaderStage::Vertex)
    }

    #[inline]
    #[must_use]
    pub fn fragment(&self) -> Option<&ParsedStage> {
        self.stage(ShaderStage::Fragment)
    }
}

/// Everything extracted from one shader source.
#[derive(Debug, Clone, Default)]
pub struct ParsedShader {
    code_parts: FxHashMap<String, CodePart>,
    global_uniforms: Vec<UniformDecl>,
    init_properties: Vec<UniformDecl>,
    extra_sections: BTreeMap<String, String>,
}

impl ParsedShader {
    /// Stage code for `render_mode`, falling back to [`DEFAULT_RENDER_MODE`].
    #[must_use]
    pub fn stage(&self, render_mode: &str, stage: ShaderStage) -> Option<&ParsedStage> {
        self.code_parts
            .get(render_mode)
            .and_then(|part| part.stage(stage))
            .or_else(|| {
                self.code_parts
                    .get(DEFAULT_RENDER_MODE)
                    .and_then(|part| part.stage(stage))
            })
    }

    #[inline]
    #[must_use]
    pub fn code_part(&self, render_mode: &str) -> Option<&CodePart> {
        self.code_parts.get(render_mode)
    }

    /// Render modes with at least one stage section, sorted.
    #[must_use]
    pub fn render_modes(&self) -> Vec<&str> {
        let mut modes: Vec<&str> = self.code_parts.keys().map(String::as_str).collect();
        modes.sort_unstable();
        modes
    }

    #[inline]
    #[must_use]
    pub fn global_uniforms(&self) -> &[UniformDecl] {
        &self.global_uniforms
    }

    #[inline]
    #[must_use]
    pub fn init_properties(&self) -> &[UniformDecl] {
        &self.init_properties
    }

    /// Declared properties from both `\uniforms` and `\init`.
    pub fn declared_properties(&self) -> impl Iterator<Item = &UniformDecl> {
        self.global_uniforms.iter().chain(&self.init_properties)
    }

    /// Raw body of a section this parser does not interpret (e.g. `\description`).
    #[must_use]
    pub fn extra_section(&self, header: &str) -> Option<&str> {
        self.extra_sections.get(header).map(String::as_str)
    }
}

struct Section<'a> {
    name: &'a str,
    extension: Option<&'a str>,
    header_line: usize,
    body: String,
}

/// Parses a complete shader source.
pub fn parse_shader(resource: &str, text: &str) -> Result<ParsedShader> {
    let mut sections: Vec<Section<'_>> = Vec::new();

    for (i, line) in text.split_inclusive('\n').enumerate() {
        let line_no = i + 1;
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('\\') {
            let (name, extension) = parse_header(resource, line_no, header)?;
            sections.push(Section {
                name,
                extension,
                header_line: line_no,
                body: String::new(),
            });
        } else if let Some(section) = sections.last_mut() {
            section.body.push_str(line);
        } else if !trimmed.is_empty() {
            log::debug!("{resource}:{line_no}: ignoring text before the first section header");
        }
    }

    let mut parsed = ParsedShader::default();
    let mut seen: FxHashMap<(&str, Option<&str>), usize> = FxHashMap::default();

    for section in &sections {
        if let Some(first) = seen.insert((section.name, section.extension), section.header_line) {
            return Err(ShaderError::parse(
                resource,
                section.header_line,
                format!("duplicate section (first declared on line {first})"),
            ));
        }

        let body_line = section.header_line + 1;
        let stage = section.extension.and_then(ShaderStage::from_extension);
        match (section.name, section.extension, stage) {
            (mode, Some(ext), Some(stage)) => {
                let origin = format!("{resource}:{mode}.{ext}");
                let parsed_stage = parse_stage(&origin, &section.body, body_line)?;
                parsed.code_parts.entry(mode.to_string()).or_default().stages
                    [stage.index()] = Some(parsed_stage);
            }
            ("uniforms", None, _) => {
                parsed.global_uniforms = parse_declarations(resource, &section.body, body_line)?;
            }
            ("init", None, _) => {
                parsed.init_properties = parse_declarations(resource, &section.body, body_line)?;
            }
            (name, extension, _) => {
                let key = match extension {
                    Some(ext) => format!("{name}.{ext}"),
                    None => name.to_string(),
                };
                log::debug!("{resource}: keeping uninterpreted section \\{key}");
                parsed.extra_sections.insert(key, section.body.clone());
            }
        }
    }

    Ok(parsed)
}

fn parse_header<'a>(
    resource: &str,
    line_no: usize,
    header: &'a str,
) -> Result<(&'a str, Option<&'a str>)> {
    let (name, extension) = match header.split_once('.') {
        Some((name, ext)) => (name, Some(ext)),
        None => (header, None),
    };

    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    if !valid(name) || extension.is_some_and(|ext| !valid(ext)) {
        return Err(ShaderError::parse(
            resource,
            line_no,
            format!("malformed section header \"\\{header}\""),
        ));
    }
    Ok((name, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\\color.vs
void main() { gl_Position = vec4(a_vertex, 1.0); }
\\color.fs
#pragma shaderblock \"light\"
#pragma shaderblock ENVIRONMENT \"environment_2d\" // role
void main() { gl_FragColor = color; }
\\default.fs
void main() {}
\\uniforms
color u_color color [1, 1, 1]
";

    #[test]
    fn test_sections_and_pragmas() {
        let shader = parse_shader("test", SOURCE).unwrap();
        assert_eq!(shader.render_modes(), vec!["color", "default"]);

        let fs = shader.stage("color", ShaderStage::Fragment).unwrap();
        let pragmas: Vec<_> = fs.pragmas().collect();
        assert_eq!(pragmas.len(), 2);
        assert_eq!(pragmas[0].kind, PragmaKind::ShaderBlock);
        assert_eq!(pragmas[0].target, "light");
        assert_eq!(pragmas[0].line, 4);
        assert_eq!(pragmas[1].context_key.as_deref(), Some("ENVIRONMENT"));
        assert_eq!(pragmas[1].target, "environment_2d");

        assert_eq!(shader.global_uniforms().len(), 1);
        assert_eq!(shader.global_uniforms()[0].uniform, "u_color");
    }

    #[test]
    fn test_render_mode_fallback() {
        let shader = parse_shader("test", SOURCE).unwrap();
        let shadow_fs = shader.stage("shadow", ShaderStage::Fragment).unwrap();
        assert_eq!(shadow_fs.to_source(), "void main() {}\n");
        assert!(shader.stage("shadow", ShaderStage::Vertex).is_none());
    }

    #[test]
    fn test_verbatim_reconstruction() {
        let text = "a\n#pragma include \"x\"\n  #pragma optimize(on)\nb";
        let stage = parse_stage("t", text, 1).unwrap();
        assert_eq!(stage.to_source(), text);
        assert_eq!(stage.pragmas().count(), 1);
        assert_eq!(stage.tokens().len(), 3);
    }

    #[test]
    fn test_malformed_pragma_reports_line() {
        let err = parse_shader("broken", "\\color.fs\nok\n#pragma include common\n").unwrap_err();
        match err {
            ShaderError::Parse { resource, line, .. } => {
                assert_eq!(resource, "broken:color.fs");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_malformed_pragmas() {
        for line in [
            "#pragma include \"unterminated",
            "#pragma snippet KEY \"x\"",
            "#pragma shaderblock \"\"",
            "#pragma shaderblock A B \"x\"",
            "#pragma include \"a\" \"b\"",
        ] {
            let err = parse_stage("t", line, 1).unwrap_err();
            assert!(err.is_parse_error(), "{line} should fail");
        }
    }

    #[test]
    fn test_malformed_header() {
        let err = parse_shader("t", "\\color fs\nx").unwrap_err();
        assert!(matches!(err, ShaderError::Parse { line: 1, .. }));
        let err = parse_shader("t", "\\.fs\nx").unwrap_err();
        assert!(err.is_parse_error());
        let err = parse_shader("t", "\\color.fs\na\n\\color.fs\nb").unwrap_err();
        assert!(matches!(err, ShaderError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_extra_sections_are_kept() {
        let shader = parse_shader("t", "\\description\nFlat shaded.\n\\js\nfoo()\n").unwrap();
        assert_eq!(shader.extra_section("description"), Some("Flat shaded.\n"));
        assert!(shader.render_modes().is_empty());
    }
}

//! Shader Code Generator
//!
//! Turns a parsed stage plus a set of feature flags into final shader text.
//!
//! Generation is split into two explicit passes:
//!
//! 1. [`ShaderGenerator::compute_context`]: visits every active block and
//!    merges the context macros it exports into a [`ContextMap`].
//! 2. [`ShaderGenerator::emit`]: walks the token list, replacing each pragma
//!    with the resolved include / snippet / block code, then prepends the
//!    boilerplate header.
//!
//! Both passes are pure functions of (stage, flags, library, settings), so the
//! output for a given permutation is byte-identical on every call. The
//! permutation cache relies on this.
//!
//! # Context key precedence
//!
//! When several active blocks export the same key, the entry with the highest
//! block priority wins; equal priorities go to the higher bit index. Every such
//! collision is recorded in [`ContextMap::conflicts`].

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::parser::{ParsedStage, Pragma, PragmaKind, StageToken};
use crate::errors::{Result, ShaderError};
use crate::resources::{
    BlockId, ContextMacro, FeatureFlags, ShaderBlockRegistry, ShaderLibrary, ShaderStage,
};
use crate::settings::ShaderSettings;

// ─── Context Pass ────────────────────────────────────────────────────────────

/// Winning export for one context key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub value: ContextMacro,
    pub provider: BlockId,
    priority: i32,
}

/// A context key exported by more than one active block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConflict {
    pub key: String,
    /// Exporting blocks in ascending bit order.
    pub providers: Vec<String>,
    pub winner: String,
}

/// Context key → export, computed from the active blocks of one permutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextMap {
    entries: BTreeMap<String, ContextEntry>,
    conflicts: Vec<ContextConflict>,
}

impl ContextMap {
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// Block name an indirection key currently stands for.
    #[must_use]
    pub fn resolve_block(&self, key: &str) -> Option<&str> {
        match &self.entries.get(key)?.value {
            ContextMacro::Block(name) => Some(name),
            ContextMacro::Define(_) => None,
        }
    }

    /// Preprocessor defines exported by active blocks, sorted by key.
    pub fn defines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(key, entry)| match &entry.value {
            ContextMacro::Define(value) => Some((key.as_str(), value.as_str())),
            ContextMacro::Block(_) => None,
        })
    }

    #[inline]
    #[must_use]
    pub fn conflicts(&self) -> &[ContextConflict] {
        &self.conflicts
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Generator ───────────────────────────────────────────────────────────────

pub struct ShaderGenerator;

impl ShaderGenerator {
    /// Pass 1: merges the context macros of every block active in `flags`.
    #[must_use]
    pub fn compute_context(flags: &FeatureFlags, registry: &ShaderBlockRegistry) -> ContextMap {
        let mut entries: BTreeMap<String, ContextEntry> = BTreeMap::new();
        let mut providers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for block in registry.active(flags) {
            for (key, value) in block.context_macros() {
                providers.entry(key.as_str()).or_default().push(block.name());

                let candidate = ContextEntry {
                    value: value.clone(),
                    provider: block.id(),
                    priority: block.priority(),
                };
                match entries.get(key) {
                    Some(current)
                        if (current.priority, current.provider)
                            > (candidate.priority, candidate.provider) => {}
                    _ => {
                        entries.insert(key.clone(), candidate);
                    }
                }
            }
        }

        let conflicts = providers
            .into_iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(key, names)| {
                let winner = entries
                    .get(key)
                    .and_then(|entry| registry.get(entry.provider))
                    .map(|block| block.name().to_string())
                    .unwrap_or_default();
                ContextConflict {
                    key: key.to_string(),
                    providers: names.into_iter().map(str::to_string).collect(),
                    winner,
                }
            })
            .collect();

        ContextMap { entries, conflicts }
    }

    /// Pass 2: expands every pragma of `stage` and prepends the header.
    pub fn emit(
        stage: &ParsedStage,
        kind: ShaderStage,
        flags: &FeatureFlags,
        context: &ContextMap,
        library: &ShaderLibrary,
        settings: &ShaderSettings,
    ) -> Result<String> {
        let mut emitter = Emitter {
            kind,
            flags,
            context,
            library,
            stack: Vec::new(),
            out: String::new(),
        };
        emitter.emit_stage(stage)?;
        Ok(Self::assemble(kind, &emitter.out, flags, context, library, settings))
    }

    /// Runs both passes for a single stage.
    pub fn generate(
        stage: &ParsedStage,
        kind: ShaderStage,
        flags: &FeatureFlags,
        library: &ShaderLibrary,
        settings: &ShaderSettings,
    ) -> Result<String> {
        let context = Self::compute_context(flags, library.blocks());
        Self::emit(stage, kind, flags, &context, library, settings)
    }

    fn assemble(
        kind: ShaderStage,
        body: &str,
        flags: &FeatureFlags,
        context: &ContextMap,
        library: &ShaderLibrary,
        settings: &ShaderSettings,
    ) -> String {
        let (authored_version, body) = split_version_line(body);

        let mut source = String::with_capacity(body.len() + 256);
        if let Some(version) = settings.version_header.as_deref().or(authored_version) {
            source.push_str(version.trim_end());
            source.push('\n');
        }
        if settings.define_stage {
            push_define(&mut source, kind.define_name(), "");
        }
        for (key, value) in &settings.global_defines {
            push_define(&mut source, key, value);
        }
        if settings.define_active_blocks {
            for block in library.blocks().active(flags) {
                push_define(&mut source, &block_define_name(block.name()), "");
            }
        }
        for (key, value) in context.defines() {
            push_define(&mut source, key, value);
        }
        source.push_str(body);
        source
    }
}

fn push_define(out: &mut String, key: &str, value: &str) {
    if value.is_empty() {
        let _ = writeln!(out, "#define {key}");
    } else {
        let _ = writeln!(out, "#define {key} {value}");
    }
}

/// `BLOCK_<NAME>` with the name upper-cased and non-identifier chars replaced.
#[must_use]
pub fn block_define_name(name: &str) -> String {
    let mut define = String::with_capacity(name.len() + 6);
    define.push_str("BLOCK_");
    define.extend(name.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    define
}

/// Splits off an authored `#version` line if it is the first non-blank line,
/// so that the generated defines can go after it.
fn split_version_line(body: &str) -> (Option<&str>, &str) {
    let leading = body.len() - body.trim_start().len();
    let rest = &body[leading..];
    if !rest.starts_with("#version") {
        return (None, body);
    }
    match rest.find('\n') {
        Some(end) => (Some(&rest[..end]), &rest[end + 1..]),
        None => (Some(rest), ""),
    }
}

// ─── Emission Pass ───────────────────────────────────────────────────────────

struct Emitter<'a> {
    kind: ShaderStage,
    flags: &'a FeatureFlags,
    context: &'a ContextMap,
    library: &'a ShaderLibrary,
    /// Expansions currently in progress, for cycle detection.
    stack: Vec<(PragmaKind, String)>,
    out: String,
}

impl<'a> Emitter<'a> {
    fn emit_stage(&mut self, stage: &'a ParsedStage) -> Result<()> {
        for token in stage.tokens() {
            match token {
                StageToken::Text(text) => self.out.push_str(text),
                StageToken::Pragma(pragma) => {
                    self.emit_pragma(stage, pragma)?;
                    if pragma.raw.ends_with('\n')
                        && !self.out.is_empty()
                        && !self.out.ends_with('\n')
                    {
                        self.out.push('\n');
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_pragma(&mut self, stage: &'a ParsedStage, pragma: &'a Pragma) -> Result<()> {
        let unresolved = |name: &str| ShaderError::UnresolvedReference {
            kind: pragma.kind,
            name: name.to_string(),
            resource: stage.origin().to_string(),
            line: pragma.line,
        };

        match pragma.kind {
            PragmaKind::Include | PragmaKind::Snippet => {
                let snippet = if pragma.kind == PragmaKind::Include {
                    self.library.include(&pragma.target)
                } else {
                    self.library.snippet(&pragma.target)
                }
                .ok_or_else(|| unresolved(&pragma.target))?;

                self.enter(pragma.kind, &pragma.target)?;
                self.emit_stage(snippet.parsed())?;
                self.stack.pop();
            }
            PragmaKind::ShaderBlock => {
                let name = pragma
                    .context_key
                    .as_deref()
                    .and_then(|key| self.context.resolve_block(key))
                    .unwrap_or(pragma.target.as_str());
                let block = self
                    .library
                    .block(name)
                    .ok_or_else(|| unresolved(name))?;

                let Some(code) = block.stage_code(self.kind) else {
                    return Ok(());
                };
                let part = if self.flags.contains(block.bit()) {
                    &code.enabled
                } else {
                    &code.disabled
                };

                self.enter(PragmaKind::ShaderBlock, block.name())?;
                self.emit_stage(part)?;
                self.stack.pop();
            }
        }
        Ok(())
    }

    fn enter(&mut self, kind: PragmaKind, name: &str) -> Result<()> {
        if self.stack.iter().any(|(k, n)| *k == kind && n == name) {
            let mut chain: Vec<String> = self
                .stack
                .iter()
                .map(|(k, n)| format!("{k} \"{n}\""))
                .collect();
            chain.push(format!("{kind} \"{name}\""));
            return Err(ShaderError::CyclicInclude {
                chain: chain.join(" -> "),
            });
        }
        self.stack.push((kind, name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parser::parse_stage;
    use crate::resources::ShaderBlockDescriptor;

    fn bare_settings() -> ShaderSettings {
        ShaderSettings {
            define_stage: false,
            define_active_blocks: false,
            ..Default::default()
        }
    }

    fn stage(text: &str) -> ParsedStage {
        parse_stage("test", text, 1).unwrap()
    }

    #[test]
    fn test_literal_text_is_untouched() {
        let library = ShaderLibrary::new(8);
        let text = "void main() {\n  gl_FragColor = vec4(1.0);\n}\n";
        let out = ShaderGenerator::generate(
            &stage(text),
            ShaderStage::Fragment,
            &FeatureFlags::new(),
            &library,
            &bare_settings(),
        )
        .unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn test_include_is_inlined_in_place() {
        let mut library = ShaderLibrary::new(8);
        library.register_include("common", "const float PI = 3.14159;").unwrap();
        let out = ShaderGenerator::generate(
            &stage("a\n#pragma include \"common\"\nb\n"),
            ShaderStage::Vertex,
            &FeatureFlags::new(),
            &library,
            &bare_settings(),
        )
        .unwrap();
        assert_eq!(out, "a\nconst float PI = 3.14159;\nb\n");
    }

    #[test]
    fn test_nested_include_cycle_is_detected() {
        let mut library = ShaderLibrary::new(8);
        library.register_include("a", "#pragma include \"b\"\n").unwrap();
        library.register_include("b", "#pragma include \"a\"\n").unwrap();
        let err = ShaderGenerator::generate(
            &stage("#pragma include \"a\"\n"),
            ShaderStage::Vertex,
            &FeatureFlags::new(),
            &library,
            &bare_settings(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ShaderError::CyclicInclude {
                chain: "include \"a\" -> include \"b\" -> include \"a\"".to_string()
            }
        );
    }

    #[test]
    fn test_unresolved_names_the_pragma_line() {
        let library = ShaderLibrary::new(8);
        let err = ShaderGenerator::generate(
            &stage("x\ny\n#pragma snippet \"nope\"\n"),
            ShaderStage::Fragment,
            &FeatureFlags::new(),
            &library,
            &bare_settings(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ShaderError::UnresolvedReference {
                kind: PragmaKind::Snippet,
                name: "nope".to_string(),
                resource: "test".to_string(),
                line: 3,
            }
        );
    }

    #[test]
    fn test_context_precedence() {
        let mut library = ShaderLibrary::new(8);
        let low = library
            .register_block(ShaderBlockDescriptor::new("low").with_context_block("ENV", "env_low"))
            .unwrap();
        let high = library
            .register_block(
                ShaderBlockDescriptor::new("high")
                    .with_context_block("ENV", "env_high")
                    .with_priority(-1),
            )
            .unwrap();
        let last = library
            .register_block(
                ShaderBlockDescriptor::new("last").with_context_block("ENV", "env_last"),
            )
            .unwrap();

        // equal priority: higher bit wins
        let flags = FeatureFlags::new().with(low).with(last);
        let context = ShaderGenerator::compute_context(&flags, library.blocks());
        assert_eq!(context.resolve_block("ENV"), Some("env_last"));
        assert_eq!(context.conflicts().len(), 1);
        assert_eq!(context.conflicts()[0].providers, vec!["low", "last"]);
        assert_eq!(context.conflicts()[0].winner, "last");

        // explicit priority beats bit order
        let flags = FeatureFlags::new().with(low).with(high);
        let context = ShaderGenerator::compute_context(&flags, library.blocks());
        assert_eq!(context.resolve_block("ENV"), Some("env_low"));

        let context =
            ShaderGenerator::compute_context(&FeatureFlags::new().with(high), library.blocks());
        assert_eq!(context.resolve_block("ENV"), Some("env_high"));
        assert!(context.conflicts().is_empty());
    }

    #[test]
    fn test_header_order() {
        let mut library = ShaderLibrary::new(8);
        let fog = library
            .register_block(ShaderBlockDescriptor::new("fog-linear").with_define("FOG_MODE", "1"))
            .unwrap();
        let settings = ShaderSettings {
            version_header: Some("#version 300 es".to_string()),
            ..Default::default()
        }
        .with_define("MAX_LIGHTS", "4");

        let out = ShaderGenerator::generate(
            &stage("void main() {}\n"),
            ShaderStage::Fragment,
            &FeatureFlags::new().with(fog),
            &library,
            &settings,
        )
        .unwrap();
        assert_eq!(
            out,
            "#version 300 es\n#define FRAGMENT_SHADER\n#define MAX_LIGHTS 4\n#define BLOCK_FOG_LINEAR\n#define FOG_MODE 1\nvoid main() {}\n"
        );
    }

    #[test]
    fn test_authored_version_stays_first() {
        let library = ShaderLibrary::new(8);
        let out = ShaderGenerator::generate(
            &stage("\n#version 330\nvoid main() {}\n"),
            ShaderStage::Vertex,
            &FeatureFlags::new(),
            &library,
            &ShaderSettings::default(),
        )
        .unwrap();
        assert!(out.starts_with("#version 330\n#define VERTEX_SHADER\n"));
    }
}

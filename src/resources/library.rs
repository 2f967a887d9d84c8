//! Shader Library
//!
//! Holds everything a pragma can refer to:
//!
//! | Namespace | Pragma | Content |
//! |-----------|--------|---------|
//! | blocks    | `#pragma shaderblock` | flag-gated [`ShaderBlock`]s |
//! | includes  | `#pragma include`     | verbatim shared chunks |
//! | snippets  | `#pragma snippet`     | leaf helper functions |
//!
//! The library is an explicit object, not a process global: construct one at
//! startup, register blocks into it, then share it between managers as a
//! [`SharedShaderLibrary`]. Blocks are append-only and their bit indices are
//! never reused.

use std::borrow::Cow;
use std::sync::Arc;

use lasso::{Key, Rodeo};
use parking_lot::RwLock;
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;

use super::FeatureFlags;
use super::shader_block::{BlockId, ShaderBlock, ShaderBlockDescriptor};
use crate::errors::{Result, ShaderError};
use crate::pipeline::parser::{ParsedStage, parse_stage};
use crate::settings::ShaderSettings;

#[derive(RustEmbed)]
#[folder = "src/shaders/chunks"]
struct ShaderChunks;

/// Library shared between every [`ShaderManager`](crate::pipeline::ShaderManager) of a process.
pub type SharedShaderLibrary = Arc<RwLock<ShaderLibrary>>;

// ─── Block Registry ──────────────────────────────────────────────────────────

/// Append-only table of shader blocks.
///
/// Block names are interned in registration order, so the interner key of a
/// name *is* its feature bit.
pub struct ShaderBlockRegistry {
    names: Rodeo,
    blocks: Vec<ShaderBlock>,
    capacity: usize,
}

impl ShaderBlockRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            names: Rodeo::new(),
            blocks: Vec::new(),
            capacity,
        }
    }

    /// Registers a block and assigns it the next free bit.
    pub fn register(&mut self, desc: ShaderBlockDescriptor) -> Result<BlockId> {
        if self.names.contains(&desc.name) {
            return Err(ShaderError::DuplicateName {
                namespace: "block",
                name: desc.name,
            });
        }
        if self.blocks.len() >= self.capacity {
            return Err(ShaderError::CapacityExceeded {
                name: desc.name,
                capacity: self.capacity,
            });
        }

        let id = BlockId(self.blocks.len() as u32);
        let name = desc.name.clone();
        let block = ShaderBlock::from_descriptor(id, desc)?;

        let key = self.names.get_or_intern(&name);
        debug_assert_eq!(key.into_usize(), id.bit());

        log::debug!("Registered shader block \"{name}\" as bit {}", id.bit());
        self.blocks.push(block);
        Ok(id)
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ShaderBlock> {
        let key = self.names.get(name)?;
        self.blocks.get(key.into_usize())
    }

    #[inline]
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<BlockId> {
        self.lookup(name).map(ShaderBlock::id)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&ShaderBlock> {
        self.blocks.get(id.bit())
    }

    /// Blocks whose bit is set in `flags`, in ascending bit order.
    /// Bits without a registered block are skipped.
    pub fn active<'a>(
        &'a self,
        flags: &'a FeatureFlags,
    ) -> impl Iterator<Item = &'a ShaderBlock> + 'a {
        flags.iter().map_while(|bit| self.blocks.get(bit))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShaderBlock> {
        self.blocks.iter()
    }
}

// ─── Snippet Namespaces ──────────────────────────────────────────────────────

/// A flag-less chunk of code pulled in by `include` / `snippet` pragmas.
#[derive(Debug, Clone)]
pub struct Snippet {
    source: String,
    parsed: ParsedStage,
}

impl Snippet {
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    #[must_use]
    pub fn parsed(&self) -> &ParsedStage {
        &self.parsed
    }
}

/// Name → snippet map for one pragma namespace.
#[derive(Debug)]
pub struct SnippetNamespace {
    label: &'static str,
    entries: FxHashMap<String, Snippet>,
}

impl SnippetNamespace {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: FxHashMap::default(),
        }
    }

    fn parse(&self, name: &str, source: &str) -> Result<Snippet> {
        let origin = format!("{} \"{name}\"", self.label);
        Ok(Snippet {
            source: source.to_string(),
            parsed: parse_stage(&origin, source, 1)?,
        })
    }

    fn register(&mut self, name: &str, source: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(ShaderError::DuplicateName {
                namespace: self.label,
                name: name.to_string(),
            });
        }
        let snippet = self.parse(name, source)?;
        self.entries.insert(name.to_string(), snippet);
        Ok(())
    }

    /// Inserts or replaces; returns `true` when an existing entry changed.
    fn set(&mut self, name: &str, source: &str) -> Result<bool> {
        let snippet = self.parse(name, source)?;
        let replaced = self
            .entries
            .insert(name.to_string(), snippet)
            .is_some_and(|old| old.source != source);
        Ok(replaced)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Snippet> {
        self.entries.get(name)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Shader Library ──────────────────────────────────────────────────────────

/// Blocks, includes and snippets, plus revision counters that let managers
/// notice library changes.
pub struct ShaderLibrary {
    blocks: ShaderBlockRegistry,
    includes: SnippetNamespace,
    snippets: SnippetNamespace,
    /// Bumped by every mutation.
    revision: u64,
    /// Bumped only when existing include / snippet text changes.
    content_revision: u64,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new(ShaderSettings::default().max_blocks)
    }
}

impl ShaderLibrary {
    /// Empty library with a bit budget of `max_blocks`.
    #[must_use]
    pub fn new(max_blocks: usize) -> Self {
        Self {
            blocks: ShaderBlockRegistry::new(max_blocks),
            includes: SnippetNamespace::new("include"),
            snippets: SnippetNamespace::new("snippet"),
            revision: 0,
            content_revision: 0,
        }
    }

    #[must_use]
    pub fn with_settings(settings: &ShaderSettings) -> Self {
        Self::new(settings.max_blocks)
    }

    /// Empty library pre-populated with the engine's embedded chunks
    /// (`includes/*.glsl`, `snippets/*.glsl`).
    pub fn with_builtins(settings: &ShaderSettings) -> Result<Self> {
        let mut library = Self::with_settings(settings);
        for path in ShaderChunks::iter() {
            let Some((namespace, file)) = path.split_once('/') else {
                continue;
            };
            let Some(name) = file.strip_suffix(".glsl") else {
                continue;
            };
            let Some(source) = load_chunk(&path) else {
                log::warn!("Embedded shader chunk {path} is not valid UTF-8");
                continue;
            };
            match namespace {
                "includes" => library.register_include(name, &source)?,
                "snippets" => library.register_snippet(name, &source)?,
                _ => {}
            }
        }
        Ok(library)
    }

    #[must_use]
    pub fn into_shared(self) -> SharedShaderLibrary {
        Arc::new(RwLock::new(self))
    }

    pub fn register_block(&mut self, desc: ShaderBlockDescriptor) -> Result<BlockId> {
        let id = self.blocks.register(desc)?;
        self.revision += 1;
        Ok(id)
    }

    pub fn register_include(&mut self, name: &str, source: &str) -> Result<()> {
        self.includes.register(name, source)?;
        self.revision += 1;
        Ok(())
    }

    pub fn register_snippet(&mut self, name: &str, source: &str) -> Result<()> {
        self.snippets.register(name, source)?;
        self.revision += 1;
        Ok(())
    }

    /// Inserts or hot-replaces an include.
    pub fn set_include(&mut self, name: &str, source: &str) -> Result<()> {
        if self.includes.set(name, source)? {
            self.content_revision += 1;
        }
        self.revision += 1;
        Ok(())
    }

    /// Inserts or hot-replaces a snippet.
    pub fn set_snippet(&mut self, name: &str, source: &str) -> Result<()> {
        if self.snippets.set(name, source)? {
            self.content_revision += 1;
        }
        self.revision += 1;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn blocks(&self) -> &ShaderBlockRegistry {
        &self.blocks
    }

    #[inline]
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&ShaderBlock> {
        self.blocks.lookup(name)
    }

    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    #[must_use]
    pub fn include(&self, name: &str) -> Option<&Snippet> {
        self.includes.get(name)
    }

    #[inline]
    #[must_use]
    pub fn snippet(&self, name: &str) -> Option<&Snippet> {
        self.snippets.get(name)
    }

    #[inline]
    #[must_use]
    pub fn includes(&self) -> &SnippetNamespace {
        &self.includes
    }

    #[inline]
    #[must_use]
    pub fn snippets(&self) -> &SnippetNamespace {
        &self.snippets
    }

    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    #[must_use]
    pub fn content_revision(&self) -> u64 {
        self.content_revision
    }
}

fn load_chunk(path: &str) -> Option<String> {
    let file = ShaderChunks::get(path)?;
    match file.data {
        Cow::Borrowed(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
        Cow::Owned(bytes) => String::from_utf8(bytes).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ShaderStage;

    fn block(name: &str) -> ShaderBlockDescriptor {
        ShaderBlockDescriptor::new(name).with_code(ShaderStage::Fragment, "on();", "off();")
    }

    #[test]
    fn test_bits_follow_registration_order() {
        let mut registry = ShaderBlockRegistry::new(8);
        let a = registry.register(block("a")).unwrap();
        let b = registry.register(block("b")).unwrap();
        let c = registry.register(block("c")).unwrap();
        assert_eq!((a.bit(), b.bit(), c.bit()), (0, 1, 2));
        assert_eq!(registry.id_of("b"), Some(b));
        assert!(registry.lookup("d").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ShaderBlockRegistry::new(8);
        registry.register(block("light")).unwrap();
        let err = registry.register(block("light")).unwrap_err();
        assert!(matches!(err, ShaderError::DuplicateName { namespace: "block", .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_registration_does_not_consume_a_bit() {
        let mut registry = ShaderBlockRegistry::new(8);
        let bad = ShaderBlockDescriptor::new("bad").with_code(
            ShaderStage::Vertex,
            "#pragma include missing_quotes",
            "",
        );
        assert!(registry.register(bad).unwrap_err().is_parse_error());
        assert!(registry.lookup("bad").is_none());
        let ok = registry.register(block("ok")).unwrap();
        assert_eq!(ok.bit(), 0);
    }

    #[test]
    fn test_active_skips_unregistered_bits() {
        let mut registry = ShaderBlockRegistry::new(8);
        registry.register(block("a")).unwrap();
        registry.register(block("b")).unwrap();
        let flags = FeatureFlags::from_bits(0b1_0010);
        let names: Vec<_> = registry.active(&flags).map(ShaderBlock::name).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_snippet_replacement_bumps_content_revision() {
        let mut library = ShaderLibrary::new(4);
        library.register_snippet("pack", "float pack();").unwrap();
        let content = library.content_revision();

        library.set_snippet("pack", "float pack();").unwrap();
        assert_eq!(library.content_revision(), content);

        library.set_snippet("pack", "float pack(float v);").unwrap();
        assert_eq!(library.content_revision(), content + 1);
        assert!(library.register_snippet("pack", "").is_err());
    }

    #[test]
    fn test_builtins_are_loaded() {
        let library = ShaderLibrary::with_builtins(&ShaderSettings::default()).unwrap();
        assert!(library.include("common").is_some());
        assert!(library.snippet("linear_to_srgb").is_some());
    }
}

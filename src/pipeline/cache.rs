//! Permutation Cache
//!
//! Per-source storage of compiled permutations, keyed by
//! `(render_mode, FeatureFlags)`.
//!
//! # Two levels
//!
//! - [`PermutationCache`] (owned by one `ShaderSource`): the authoritative
//!   map. A key is compiled at most once per source version; a stored variant
//!   is never replaced, only dropped by invalidation.
//! - [`ProgramPool`] (owned by the manager, optional): content-addressed
//!   reuse of backend programs keyed by xxh3-128 of the generated text, so two
//!   sources that expand to the same program share one compile. Invalidating a
//!   source evicts the pool entries it contributed.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use super::backend::{CompiledProgram, ProgramHandle};
use crate::resources::{FeatureFlags, ShaderSourceId};

// ─── Compiled Variant ────────────────────────────────────────────────────────

/// Generated text of both stages, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub vertex: String,
    pub fragment: String,
}

/// Immutable result of compiling one permutation.
#[derive(Debug)]
pub struct CompiledVariant {
    pub(crate) render_mode: String,
    pub(crate) flags: FeatureFlags,
    pub(crate) program: CompiledProgram,
    pub(crate) source_version: u64,
    pub(crate) source_hash: u128,
    pub(crate) generated: Option<GeneratedSource>,
    pub(crate) disabled_properties: Vec<String>,
}

impl CompiledVariant {
    #[inline]
    #[must_use]
    pub fn handle(&self) -> ProgramHandle {
        self.program.handle
    }

    #[inline]
    #[must_use]
    pub fn render_mode(&self) -> &str {
        &self.render_mode
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    #[inline]
    #[must_use]
    pub fn active_uniforms(&self) -> &[String] {
        &self.program.active_uniforms
    }

    /// Version of the shader source this variant was built from.
    #[inline]
    #[must_use]
    pub fn source_version(&self) -> u64 {
        self.source_version
    }

    /// xxh3-128 of the generated vertex + fragment text.
    #[inline]
    #[must_use]
    pub fn source_hash(&self) -> u128 {
        self.source_hash
    }

    /// Generated text, when `keep_generated_source` is enabled.
    #[inline]
    #[must_use]
    pub fn generated_source(&self) -> Option<&GeneratedSource> {
        self.generated.as_ref()
    }

    /// Declared properties whose uniform the compiler discarded.
    #[inline]
    #[must_use]
    pub fn disabled_properties(&self) -> &[String] {
        &self.disabled_properties
    }

    #[must_use]
    pub fn is_property_enabled(&self, property: &str) -> bool {
        !self.disabled_properties.iter().any(|p| p == property)
    }
}

/// Answer of a program request.
#[derive(Debug, Clone)]
pub enum ProgramLookup {
    /// The requested permutation.
    Ready(Arc<CompiledVariant>),
    /// The source failed to parse; this is the engine's flat fallback program.
    Fallback(Arc<CompiledVariant>),
    /// Nothing to draw with (sticky compile error, expansion failure, unknown id).
    Unavailable,
}

impl ProgramLookup {
    /// The program to bind, requested or fallback.
    #[must_use]
    pub fn program(&self) -> Option<&Arc<CompiledVariant>> {
        match self {
            Self::Ready(variant) | Self::Fallback(variant) => Some(variant),
            Self::Unavailable => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

// ─── Per-source Cache ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum VariantSlot {
    Ready(Arc<CompiledVariant>),
    /// Expansion failed for this key; not retried until invalidation.
    Failed,
}

/// Hit / miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend compile calls.
    pub compiles: u64,
    /// Programs reused from the content-addressed pool.
    pub pool_hits: u64,
    /// Permutations that failed to expand or compile.
    pub failures: u64,
}

impl CacheStats {
    pub(crate) fn accumulate(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.compiles += other.compiles;
        self.pool_hits += other.pool_hits;
        self.failures += other.failures;
    }
}

/// `render_mode → flags → slot` map of one shader source.
#[derive(Debug, Default)]
pub struct PermutationCache {
    modes: FxHashMap<String, FxHashMap<FeatureFlags, VariantSlot>>,
    stats: CacheStats,
}

impl PermutationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, render_mode: &str, flags: &FeatureFlags) -> Option<&VariantSlot> {
        self.modes.get(render_mode)?.get(flags)
    }

    pub(crate) fn insert(&mut self, render_mode: &str, flags: FeatureFlags, slot: VariantSlot) {
        self.modes
            .entry(render_mode.to_string())
            .or_default()
            .insert(flags, slot);
    }

    /// Compiled variant for a key, if present.
    #[must_use]
    pub fn variant(
        &self,
        render_mode: &str,
        flags: &FeatureFlags,
    ) -> Option<&Arc<CompiledVariant>> {
        match self.get(render_mode, flags)? {
            VariantSlot::Ready(variant) => Some(variant),
            VariantSlot::Failed => None,
        }
    }

    /// Number of compiled variants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modes
            .values()
            .flat_map(FxHashMap::values)
            .filter(|slot| matches!(slot, VariantSlot::Ready(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every slot; returns how many compiled variants were released.
    pub fn clear(&mut self) -> usize {
        let released = self.len();
        self.modes.clear();
        released
    }

    /// Drops only failed slots, keeping compiled variants.
    pub(crate) fn clear_failures(&mut self) {
        for per_mode in self.modes.values_mut() {
            per_mode.retain(|_, slot| matches!(slot, VariantSlot::Ready(_)));
        }
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    #[inline]
    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }
}

// ─── Content-addressed Pool ──────────────────────────────────────────────────

struct PooledProgram {
    program: CompiledProgram,
    owners: SmallVec<[ShaderSourceId; 4]>,
    /// Pool generation at which this program was compiled.
    compiled_at: u64,
}

/// xxh3-128 of generated text → backend program.
///
/// Every insert advances a generation counter, and every owner eviction
/// records the generation at which it happened. A source only reuses
/// programs compiled after its own last eviction, so an invalidated source
/// always pays for one fresh compile even if another source has repopulated
/// the same text in the meantime.
#[derive(Default)]
pub struct ProgramPool {
    programs: FxHashMap<u128, PooledProgram>,
    generation: u64,
    evicted_at: FxHashMap<ShaderSourceId, u64>,
}

impl ProgramPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pooled program for `hash`, recording `owner` as a user.
    pub(crate) fn acquire(&mut self, hash: u128, owner: ShaderSourceId) -> Option<CompiledProgram> {
        let floor = self.evicted_at.get(&owner).copied().unwrap_or(0);
        let pooled = self.programs.get_mut(&hash)?;
        if pooled.compiled_at <= floor {
            return None;
        }
        if !pooled.owners.contains(&owner) {
            pooled.owners.push(owner);
        }
        Some(pooled.program.clone())
    }

    /// Stores a freshly compiled program, replacing any entry for `hash`.
    pub(crate) fn insert(&mut self, hash: u128, owner: ShaderSourceId, program: CompiledProgram) {
        self.generation += 1;
        self.programs.insert(
            hash,
            PooledProgram {
                program,
                owners: SmallVec::from_elem(owner, 1),
                compiled_at: self.generation,
            },
        );
    }

    /// Evicts every entry `owner` contributed to or reused, and stops `owner`
    /// from reusing anything compiled before now.
    pub(crate) fn evict_owner(&mut self, owner: ShaderSourceId) {
        self.evicted_at.insert(owner, self.generation);
        self.programs
            .retain(|_, pooled| !pooled.owners.contains(&owner));
    }

    /// Evicts `owner` for good (its source was removed).
    pub(crate) fn forget_owner(&mut self, owner: ShaderSourceId) {
        self.programs
            .retain(|_, pooled| !pooled.owners.contains(&owner));
        self.evicted_at.remove(&owner);
    }

    pub fn clear(&mut self) {
        self.programs.clear();
        self.evicted_at.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// xxh3-128 over both stages, with a separator so stage boundaries matter.
#[must_use]
pub fn hash_program_source(vertex: &str, fragment: &str) -> u128 {
    let mut hasher = Xxh3::new();
    hasher.update(vertex.as_bytes());
    hasher.update(&[0]);
    hasher.update(fragment.as_bytes());
    hasher.digest128()
}

//! Shader Manager
//!
//! Draw-time entry point of the permutation system. Owns the shader sources
//! of one rendering context and answers `request_program` with a compiled
//! variant, the fallback program, or nothing.
//!
//! | Method | Use case |
//! |--------|----------|
//! | [`ShaderManager::add_source`] / [`update_source`](ShaderManager::update_source) | load, hot reload |
//! | [`ShaderManager::request_program`] | every draw call |
//! | [`ShaderManager::invalidate_all`] | GPU context loss |
//!
//! The [`CompilerBackend`] is passed into each request, the same way a
//! `wgpu::Device` is handed to pipeline caches.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::backend::CompilerBackend;
use super::cache::{CacheStats, ProgramLookup, ProgramPool};
use super::parser::DEFAULT_RENDER_MODE;
use crate::errors::{Result, ShaderError};
use crate::resources::{
    BuildContext, FeatureFlags, ShaderLibrary, ShaderSource, ShaderSourceId, SharedShaderLibrary,
};
use crate::settings::ShaderSettings;

const FALLBACK_NAME: &str = "__fallback";
const FALLBACK_SOURCE: &str = include_str!("../shaders/fallback.shader");

pub struct ShaderManager {
    sources: SlotMap<ShaderSourceId, ShaderSource>,
    names: FxHashMap<String, ShaderSourceId>,
    library: SharedShaderLibrary,
    settings: ShaderSettings,
    pool: ProgramPool,
    fallback: ShaderSource,
    /// Counters of sources that have been removed.
    retired_stats: CacheStats,
}

impl ShaderManager {
    #[must_use]
    pub fn new(library: SharedShaderLibrary, settings: ShaderSettings) -> Self {
        Self {
            sources: SlotMap::with_key(),
            names: FxHashMap::default(),
            library,
            settings,
            pool: ProgramPool::new(),
            fallback: ShaderSource::new(FALLBACK_NAME, FALLBACK_SOURCE),
            retired_stats: CacheStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn library(&self) -> &SharedShaderLibrary {
        &self.library
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ShaderSettings {
        &self.settings
    }

    /// Registers a new source. A source whose text fails to parse is still
    /// registered; requests against it yield the fallback program.
    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<ShaderSourceId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(ShaderError::DuplicateName {
                namespace: "source",
                name,
            });
        }
        let source = ShaderSource::new(name.clone(), code);
        let id = self.sources.insert_with_key(|id| {
            let mut source = source;
            source.set_id(id);
            source
        });
        log::debug!("Registered shader source \"{name}\"");
        self.names.insert(name, id);
        Ok(id)
    }

    /// Replaces a source's raw text (hot reload). Returns `false` for an unknown id.
    pub fn update_source(&mut self, id: ShaderSourceId, code: impl Into<String>) -> bool {
        let Some(source) = self.sources.get_mut(id) else {
            log::warn!("update of unknown shader source {id:?}");
            return false;
        };
        source.set_code(code);
        self.pool.evict_owner(id);
        true
    }

    pub fn remove_source(&mut self, id: ShaderSourceId) -> Option<ShaderSource> {
        let source = self.sources.remove(id)?;
        self.names.remove(source.name());
        self.pool.forget_owner(id);
        self.retired_stats.accumulate(source.cache().stats());
        Some(source)
    }

    #[inline]
    #[must_use]
    pub fn source(&self, id: ShaderSourceId) -> Option<&ShaderSource> {
        self.sources.get(id)
    }

    #[must_use]
    pub fn find_source(&self, name: &str) -> Option<ShaderSourceId> {
        self.names.get(name).copied()
    }

    #[inline]
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Returns the program for `(render_mode, flags)` of a source.
    ///
    /// Never fails: parse errors yield [`ProgramLookup::Fallback`], sticky
    /// compile errors, expansion failures and unknown ids yield
    /// [`ProgramLookup::Unavailable`]. Diagnostics go to the log.
    ///
    /// Library edits are picked up here: each source compares the library
    /// revisions against the ones it last built with.
    pub fn request_program(
        &mut self,
        backend: &mut dyn CompilerBackend,
        id: ShaderSourceId,
        render_mode: &str,
        flags: &FeatureFlags,
    ) -> ProgramLookup {
        let library = Arc::clone(&self.library);
        let library = library.read();

        let Some(source) = self.sources.get_mut(id) else {
            log::warn!("request for unknown shader source {id:?}");
            return ProgramLookup::Unavailable;
        };

        if source.parse_error().is_some() {
            return self.fallback_program(backend, &library);
        }

        let mut ctx = BuildContext {
            backend,
            library: &library,
            settings: &self.settings,
            pool: Some(&mut self.pool),
        };
        match source.get_or_compile(&mut ctx, render_mode, flags) {
            Some(variant) => ProgramLookup::Ready(variant),
            None => ProgramLookup::Unavailable,
        }
    }

    /// Drops the cached permutations and sticky error of one source.
    pub fn invalidate(&mut self, id: ShaderSourceId) -> usize {
        let Some(source) = self.sources.get_mut(id) else {
            return 0;
        };
        self.pool.evict_owner(id);
        source.invalidate()
    }

    /// Drops every compiled program, fallback included (GPU context loss).
    pub fn invalidate_all(&mut self) -> usize {
        self.pool.clear();
        self.fallback.invalidate();
        let released: usize = self.sources.values_mut().map(ShaderSource::invalidate).sum();
        log::debug!("Invalidated all shader sources ({released} variants)");
        released
    }

    /// Counters summed over every source this manager has owned.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.retired_stats;
        for source in self.sources.values() {
            stats.accumulate(source.cache().stats());
        }
        stats
    }

    #[inline]
    #[must_use]
    pub fn pool(&self) -> &ProgramPool {
        &self.pool
    }

    fn fallback_program(
        &mut self,
        backend: &mut dyn CompilerBackend,
        library: &ShaderLibrary,
    ) -> ProgramLookup {
        let mut ctx = BuildContext::new(backend, library, &self.settings);
        match self
            .fallback
            .get_or_compile(&mut ctx, DEFAULT_RENDER_MODE, &FeatureFlags::new())
        {
            Some(variant) => ProgramLookup::Fallback(variant),
            None => ProgramLookup::Unavailable,
        }
    }
}

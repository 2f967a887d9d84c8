//! Shader Sources
//!
//! A [`ShaderSource`] is one authored, multi-section shader resource. It owns
//! its raw text, the parse result, a version counter, the sticky error flag and
//! its [`PermutationCache`].
//!
//! # Lifecycle
//!
//! - Created on load; parsed immediately.
//! - [`set_code`](ShaderSource::set_code) bumps the version, reparses and
//!   invalidates every cached permutation of this source only.
//! - Permutations are compiled lazily by
//!   [`get_or_compile`](ShaderSource::get_or_compile).
//! - A backend compile failure sets `has_error`; all further requests
//!   short-circuit until the source is edited or invalidated.

use std::sync::Arc;

use slotmap::new_key_type;

use super::library::ShaderLibrary;
use super::uniforms::UniformDecl;
use super::{FeatureFlags, ShaderStage};
use crate::errors::{Result, ShaderError};
use crate::pipeline::backend::{CompileRequest, CompilerBackend};
use crate::pipeline::cache::{
    CompiledVariant, GeneratedSource, PermutationCache, ProgramPool, VariantSlot,
    hash_program_source,
};
use crate::pipeline::parser::{ParsedShader, parse_shader};
use crate::pipeline::shader_gen::ShaderGenerator;
use crate::pipeline::validator::validate_uniforms;
use crate::settings::ShaderSettings;

new_key_type! {
    /// Handle of a shader source registered in a `ShaderManager`.
    pub struct ShaderSourceId;
}

/// Everything a permutation build borrows from its caller.
pub struct BuildContext<'a> {
    pub backend: &'a mut dyn CompilerBackend,
    pub library: &'a ShaderLibrary,
    pub settings: &'a ShaderSettings,
    /// Content-addressed pool, used when `settings.share_identical_programs` is set.
    pub pool: Option<&'a mut ProgramPool>,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        backend: &'a mut dyn CompilerBackend,
        library: &'a ShaderLibrary,
        settings: &'a ShaderSettings,
    ) -> Self {
        Self {
            backend,
            library,
            settings,
            pool: None,
        }
    }
}

pub struct ShaderSource {
    id: ShaderSourceId,
    name: String,
    code: String,
    /// Bumped by every [`set_code`](Self::set_code).
    version: u64,
    parsed: Result<ParsedShader>,
    has_error: bool,
    cache: PermutationCache,
    /// `(revision, content_revision)` of the library at the last build.
    seen_library: Option<(u64, u64)>,
}

impl ShaderSource {
    #[must_use]
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        let name = name.into();
        let code = code.into();
        let parsed = parse_source(&name, &code);
        Self {
            id: ShaderSourceId::default(),
            name,
            code,
            version: 0,
            parsed,
            has_error: false,
            cache: PermutationCache::new(),
            seen_library: None,
        }
    }

    pub(crate) fn set_id(&mut self, id: ShaderSourceId) {
        self.id = id;
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ShaderSourceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    #[inline]
    #[must_use]
    pub fn parsed(&self) -> Option<&ParsedShader> {
        self.parsed.as_ref().ok()
    }

    #[inline]
    #[must_use]
    pub fn parse_error(&self) -> Option<&ShaderError> {
        self.parsed.as_ref().err()
    }

    #[must_use]
    pub fn global_uniforms(&self) -> &[UniformDecl] {
        self.parsed().map_or(&[], ParsedShader::global_uniforms)
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &PermutationCache {
        &self.cache
    }

    /// Replaces the raw text. Returns the number of variants released.
    pub fn set_code(&mut self, code: impl Into<String>) -> usize {
        self.code = code.into();
        self.version = self.version.wrapping_add(1);
        self.parsed = parse_source(&self.name, &self.code);
        self.invalidate()
    }

    /// Drops every cached permutation and clears the sticky error.
    pub fn invalidate(&mut self) -> usize {
        self.has_error = false;
        let released = self.cache.clear();
        if released > 0 {
            log::debug!("{}: released {released} cached permutation(s)", self.name);
        }
        released
    }

    /// Reacts to library edits made since the last build: changed include or
    /// snippet text drops every permutation, new names only drop the memoized
    /// expansion failures.
    fn sync_library(&mut self, library: &ShaderLibrary, pool: Option<&mut ProgramPool>) {
        let current = (library.revision(), library.content_revision());
        match self.seen_library.replace(current) {
            Some((_, content)) if content != current.1 => {
                log::debug!("{}: shader library content changed", self.name);
                if let Some(pool) = pool {
                    pool.evict_owner(self.id);
                }
                self.invalidate();
            }
            Some((revision, _)) if revision != current.0 => self.cache.clear_failures(),
            _ => {}
        }
    }

    /// Generates both stages of a permutation without compiling or caching.
    pub fn generate(
        &self,
        library: &ShaderLibrary,
        settings: &ShaderSettings,
        render_mode: &str,
        flags: &FeatureFlags,
    ) -> Result<GeneratedSource> {
        let parsed = self.parsed.as_ref().map_err(Clone::clone)?;
        let flags = flags.masked(library.block_count());
        generate_program(&self.name, parsed, render_mode, &flags, library, settings)
    }

    /// Returns the cached variant for `(render_mode, flags)`, compiling it on
    /// first use. `None` means "unavailable": the source failed to parse, has
    /// a sticky compile error, or this permutation failed to expand.
    ///
    /// Library edits since the previous call are honoured first, so a failed
    /// key is retried once the missing block or include is registered.
    pub fn get_or_compile(
        &mut self,
        ctx: &mut BuildContext<'_>,
        render_mode: &str,
        flags: &FeatureFlags,
    ) -> Option<Arc<CompiledVariant>> {
        self.sync_library(ctx.library, ctx.pool.as_deref_mut());
        if self.has_error {
            return None;
        }
        let Ok(parsed) = &self.parsed else {
            return None;
        };
        let flags = flags.masked(ctx.library.block_count());

        match self.cache.get(render_mode, &flags) {
            Some(VariantSlot::Ready(variant)) => {
                let variant = Arc::clone(variant);
                self.cache.stats_mut().hits += 1;
                return Some(variant);
            }
            Some(VariantSlot::Failed) => {
                self.cache.stats_mut().hits += 1;
                return None;
            }
            None => {}
        }
        self.cache.stats_mut().misses += 1;
        log::debug!("{}: building permutation [{render_mode} {flags}]", self.name);

        let settings = ctx.settings;
        let generated = match generate_program(
            &self.name,
            parsed,
            render_mode,
            &flags,
            ctx.library,
            settings,
        ) {
            Ok(generated) => generated,
            Err(err) => {
                log::error!(
                    "{}: permutation [{render_mode} {flags}] failed: {err}",
                    self.name
                );
                self.cache.stats_mut().failures += 1;
                self.cache.insert(render_mode, flags, VariantSlot::Failed);
                return None;
            }
        };

        if settings.log_generated_source {
            log::debug!(
                "================= Generated {} [{render_mode} {flags}] =================\n--- vertex ---\n{}\n--- fragment ---\n{}",
                self.name,
                generated.vertex,
                generated.fragment
            );
        }

        let hash = hash_program_source(&generated.vertex, &generated.fragment);
        let pooled = if settings.share_identical_programs {
            ctx.pool
                .as_deref_mut()
                .and_then(|pool| pool.acquire(hash, self.id))
        } else {
            None
        };

        let program = if let Some(program) = pooled {
            self.cache.stats_mut().pool_hits += 1;
            program
        } else {
            let label = format!("{} [{render_mode} {flags}]", self.name);
            self.cache.stats_mut().compiles += 1;
            let request = CompileRequest {
                label: &label,
                vertex: &generated.vertex,
                fragment: &generated.fragment,
            };
            match ctx.backend.compile(&request) {
                Ok(program) => {
                    if settings.share_identical_programs
                        && let Some(pool) = ctx.pool.as_deref_mut()
                    {
                        pool.insert(hash, self.id, program.clone());
                    }
                    program
                }
                Err(failure) => {
                    self.has_error = true;
                    self.cache.stats_mut().failures += 1;
                    let err = ShaderError::Compile {
                        resource: self.name.clone(),
                        stage: failure.stage,
                        message: failure.message,
                    };
                    log::error!(
                        "{err} [{render_mode} {flags}]\n--- vertex ---\n{}\n--- fragment ---\n{}",
                        generated.vertex,
                        generated.fragment
                    );
                    return None;
                }
            }
        };

        let report = validate_uniforms(parsed.declared_properties(), &program.active_uniforms);
        if !report.disabled.is_empty() {
            log::warn!(
                "{}: [{render_mode} {flags}] compiler discarded properties {:?}",
                self.name,
                report.disabled
            );
        }

        let variant = Arc::new(CompiledVariant {
            render_mode: render_mode.to_string(),
            flags: flags.clone(),
            program,
            source_version: self.version,
            source_hash: hash,
            generated: settings.keep_generated_source.then_some(generated),
            disabled_properties: report.disabled,
        });
        self.cache
            .insert(render_mode, flags, VariantSlot::Ready(Arc::clone(&variant)));
        Some(variant)
    }
}

fn parse_source(name: &str, code: &str) -> Result<ParsedShader> {
    let parsed = parse_shader(name, code);
    if let Err(err) = &parsed {
        log::error!("{err}");
    }
    parsed
}

/// Expands both stages of one permutation (render-mode fallback included).
fn generate_program(
    resource: &str,
    parsed: &ParsedShader,
    render_mode: &str,
    flags: &FeatureFlags,
    library: &ShaderLibrary,
    settings: &ShaderSettings,
) -> Result<GeneratedSource> {
    let stage = |kind: ShaderStage| {
        parsed
            .stage(render_mode, kind)
            .ok_or_else(|| ShaderError::MissingStage {
                resource: resource.to_string(),
                render_mode: render_mode.to_string(),
                stage: kind,
            })
    };
    let vertex_stage = stage(ShaderStage::Vertex)?;
    let fragment_stage = stage(ShaderStage::Fragment)?;

    let context = ShaderGenerator::compute_context(flags, library.blocks());
    for conflict in context.conflicts() {
        if settings.strict_context {
            return Err(ShaderError::AmbiguousContext {
                key: conflict.key.clone(),
                blocks: conflict.providers.clone(),
            });
        }
        log::warn!(
            "{resource}: context key \"{}\" exported by {:?}; using \"{}\"",
            conflict.key,
            conflict.providers,
            conflict.winner
        );
    }

    let vertex = ShaderGenerator::emit(
        vertex_stage,
        ShaderStage::Vertex,
        flags,
        &context,
        library,
        settings,
    )?;
    let fragment = ShaderGenerator::emit(
        fragment_stage,
        ShaderStage::Fragment,
        flags,
        &context,
        library,
        settings,
    )?;
    Ok(GeneratedSource { vertex, fragment })
}

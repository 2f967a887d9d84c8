//! Shader Settings
//!
//! Configuration of the permutation compiler. Settings are plain data handed
//! to [`ShaderManager::new`](crate::pipeline::ShaderManager::new) and
//! [`ShaderLibrary::with_settings`](crate::resources::ShaderLibrary::with_settings).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_shaders::ShaderSettings;
//!
//! let settings = ShaderSettings {
//!     version_header: Some("#version 300 es".into()),
//!     share_identical_programs: true,
//!     ..Default::default()
//! };
//! ```
//!
//! # Generated stage header
//!
//! | Order | Line | Controlled by |
//! |-------|------|---------------|
//! | 1 | `#version ...` | `version_header` |
//! | 2 | `#define VERTEX_SHADER` / `FRAGMENT_SHADER` | `define_stage` |
//! | 3 | engine-wide defines | `global_defines` |
//! | 4 | `#define BLOCK_<NAME>` per active block | `define_active_blocks` |
//! | 5 | defines exported by active blocks | always |

use std::collections::BTreeMap;

/// Default bit budget of a block registry.
pub const DEFAULT_MAX_BLOCKS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSettings {
    /// Maximum number of registered blocks (one feature bit each).
    ///
    /// This is a configuration bound: `FeatureFlags` has no fixed width.
    pub max_blocks: usize,

    /// First line of every generated stage, e.g. `#version 300 es`.
    pub version_header: Option<String>,

    /// Engine-wide `#define`s prepended to every generated stage.
    pub global_defines: BTreeMap<String, String>,

    /// Emit `#define VERTEX_SHADER` / `#define FRAGMENT_SHADER`.
    pub define_stage: bool,

    /// Emit `#define BLOCK_<NAME>` for every active block.
    pub define_active_blocks: bool,

    /// Keep the generated text on each compiled variant.
    pub keep_generated_source: bool,

    /// Reuse one backend program for byte-identical generated sources, even
    /// across shader sources.
    pub share_identical_programs: bool,

    /// Fail a permutation when several active blocks export the same context
    /// key, instead of resolving by priority.
    pub strict_context: bool,

    /// Dump every generated program at `debug` level.
    pub log_generated_source: bool,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            max_blocks: DEFAULT_MAX_BLOCKS,
            version_header: None,
            global_defines: BTreeMap::new(),
            define_stage: true,
            define_active_blocks: true,
            keep_generated_source: cfg!(debug_assertions),
            share_identical_programs: false,
            strict_context: false,
            log_generated_source: false,
        }
    }
}

impl ShaderSettings {
    /// Adds an engine-wide define.
    #[must_use]
    pub fn with_define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_defines.insert(key.into(), value.into());
        self
    }
}

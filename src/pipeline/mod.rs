//! Permutation Pipeline
//!
//! Source text to compiled program:
//! - parser: section and pragma parsing
//! - shader_gen: context computation and pragma expansion
//! - backend: the external compiler seam
//! - validator: public uniform reconciliation
//! - cache: per-source permutation cache and content-addressed pool
//! - shader_manager: draw-time request surface

pub mod backend;
pub mod cache;
pub mod parser;
pub mod shader_gen;
pub mod shader_manager;
pub mod validator;

#[cfg(feature = "naga")]
pub use backend::NagaBackend;
pub use backend::{CompileFailure, CompileRequest, CompiledProgram, CompilerBackend, ProgramHandle};
pub use cache::{
    CacheStats, CompiledVariant, GeneratedSource, PermutationCache, ProgramLookup, ProgramPool,
    hash_program_source,
};
pub use parser::{DEFAULT_RENDER_MODE, ParsedShader, ParsedStage, PragmaKind, parse_shader};
pub use shader_gen::{ContextConflict, ContextMap, ShaderGenerator, block_define_name};
pub use shader_manager::ShaderManager;
pub use validator::{UniformReport, validate_uniforms};

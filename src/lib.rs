#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod pipeline;
pub mod resources;
pub mod settings;

pub use errors::{Result, ShaderError};
pub use pipeline::{
    CacheStats, CompileFailure, CompileRequest, CompiledProgram, CompiledVariant, CompilerBackend,
    ProgramHandle, ProgramLookup, ShaderGenerator, ShaderManager,
};
pub use resources::{
    BlockId, ContextMacro, FeatureFlags, ShaderBlockDescriptor, ShaderLibrary, ShaderSource,
    ShaderSourceId, ShaderStage, SharedShaderLibrary, UniformDecl, UniformType,
};
pub use settings::ShaderSettings;

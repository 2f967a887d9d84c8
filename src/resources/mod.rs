//! Shader Resources
//!
//! Data model of the permutation system:
//! - [`FeatureFlags`]: bitset selecting active blocks
//! - [`ShaderBlock`] / [`ShaderBlockRegistry`] / [`ShaderLibrary`]: reusable code
//! - [`ShaderSource`]: one authored resource and its permutation cache
//! - [`UniformDecl`]: declared public uniforms

pub mod feature_flags;
pub mod library;
pub mod shader_block;
pub mod shader_source;
pub mod uniforms;

pub use feature_flags::FeatureFlags;
pub use library::{
    ShaderBlockRegistry, ShaderLibrary, SharedShaderLibrary, Snippet, SnippetNamespace,
};
pub use shader_block::{
    BlockId, ContextMacro, ShaderBlock, ShaderBlockDescriptor, ShaderStage, StageCode,
    StageCodeDesc,
};
pub use shader_source::{BuildContext, ShaderSource, ShaderSourceId};
pub use uniforms::{UniformDecl, UniformType};

//! Compiler Backend
//!
//! The GPU shader compiler is an external collaborator. The permutation cache
//! only needs it to turn two generated stage texts into an opaque program
//! handle and to report which uniforms survived compilation.
//!
//! The backend is passed into every request (like a `wgpu::Device`), so a
//! manager never owns GPU state and tests can substitute a counting mock.

use std::fmt;

use crate::resources::ShaderStage;

/// Opaque program handle issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u64);

/// Generated text for one program.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Human readable label, e.g. `"pbr [color 0x3]"`.
    pub label: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
}

/// A successfully compiled program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub handle: ProgramHandle,
    /// Names of the uniforms the program actually exposes.
    pub active_uniforms: Vec<String>,
}

/// Rejection reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// Failing stage, `None` for link errors.
    pub stage: Option<ShaderStage>,
    pub message: String,
}

impl CompileFailure {
    #[must_use]
    pub fn new(stage: Option<ShaderStage>, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{stage} stage: {}", self.message),
            None => write!(f, "link: {}", self.message),
        }
    }
}

pub trait CompilerBackend {
    /// Compiles and links one program. Called synchronously from the render thread.
    fn compile(&mut self, request: &CompileRequest<'_>) -> Result<CompiledProgram, CompileFailure>;
}

// ─── naga backend ────────────────────────────────────────────────────────────

#[cfg(feature = "naga")]
pub use self::naga_backend::NagaBackend;

#[cfg(feature = "naga")]
mod naga_backend {
    use naga::front::glsl::{Frontend, Options};
    use naga::valid::{Capabilities, ValidationFlags, Validator};
    use naga::{AddressSpace, Module, TypeInner};

    use super::{CompileFailure, CompileRequest, CompiledProgram, CompilerBackend, ProgramHandle};
    use crate::resources::ShaderStage;

    /// Front-end-only backend: parses and validates both stages with naga's
    /// GLSL frontend and reports the uniforms declared by the validated
    /// modules. Issues sequential handles; nothing reaches a GPU.
    #[derive(Default)]
    pub struct NagaBackend {
        frontend: Frontend,
        next_handle: u64,
    }

    impl NagaBackend {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn compile_stage(
            &mut self,
            stage: ShaderStage,
            source: &str,
        ) -> Result<Module, CompileFailure> {
            let naga_stage = match stage {
                ShaderStage::Vertex => naga::ShaderStage::Vertex,
                ShaderStage::Fragment => naga::ShaderStage::Fragment,
            };
            let module = self
                .frontend
                .parse(&Options::from(naga_stage), source)
                .map_err(|e| CompileFailure::new(Some(stage), format!("{e:?}")))?;

            Validator::new(ValidationFlags::all(), Capabilities::all())
                .validate(&module)
                .map_err(|e| CompileFailure::new(Some(stage), format!("{e:?}")))?;
            Ok(module)
        }
    }

    fn collect_uniforms(module: &Module, out: &mut Vec<String>) {
        for (_, global) in module.global_variables.iter() {
            if !matches!(global.space, AddressSpace::Uniform | AddressSpace::Handle) {
                continue;
            }
            if let Some(name) = &global.name {
                out.push(name.clone());
            }
            if let TypeInner::Struct { members, .. } = &module.types[global.ty].inner {
                out.extend(members.iter().filter_map(|m| m.name.clone()));
            }
        }
    }

    impl CompilerBackend for NagaBackend {
        fn compile(
            &mut self,
            request: &CompileRequest<'_>,
        ) -> Result<CompiledProgram, CompileFailure> {
            let vertex = self.compile_stage(ShaderStage::Vertex, request.vertex)?;
            let fragment = self.compile_stage(ShaderStage::Fragment, request.fragment)?;

            let mut active_uniforms = Vec::new();
            collect_uniforms(&vertex, &mut active_uniforms);
            collect_uniforms(&fragment, &mut active_uniforms);
            active_uniforms.sort_unstable();
            active_uniforms.dedup();

            self.next_handle += 1;
            Ok(CompiledProgram {
                handle: ProgramHandle(self.next_handle),
                active_uniforms,
            })
        }
    }
}

//! Shared test fixtures: a counting compiler backend and block/source helpers.

#![allow(dead_code)]

use myth_shaders::{
    CompileFailure, CompileRequest, CompiledProgram, CompilerBackend, ProgramHandle,
    ShaderBlockDescriptor, ShaderLibrary, ShaderStage,
};

/// Text that makes [`MockBackend`] reject a program.
pub const SYNTAX_ERROR: &str = "@@syntax_error@@";

/// Records every compile request and issues sequential handles.
///
/// A uniform counts as active when its name occurs more than once in the
/// program text (declaration plus at least one use), mimicking a compiler
/// that strips unused uniforms.
#[derive(Default)]
pub struct MockBackend {
    pub compiles: usize,
    pub requests: Vec<(String, String, String)>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fragment(&self) -> &str {
        self.requests.last().map_or("", |(_, _, fs)| fs.as_str())
    }
}

fn declared_uniforms(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter_map(|line| {
        let rest = line.trim().strip_prefix("uniform ")?;
        let name = rest.split_whitespace().nth(1)?;
        Some(name.trim_end_matches(';'))
    })
}

impl CompilerBackend for MockBackend {
    fn compile(&mut self, request: &CompileRequest<'_>) -> Result<CompiledProgram, CompileFailure> {
        self.compiles += 1;
        self.requests.push((
            request.label.to_string(),
            request.vertex.to_string(),
            request.fragment.to_string(),
        ));

        if request.vertex.contains(SYNTAX_ERROR) {
            return Err(CompileFailure::new(Some(ShaderStage::Vertex), "syntax error"));
        }
        if request.fragment.contains(SYNTAX_ERROR) {
            return Err(CompileFailure::new(Some(ShaderStage::Fragment), "syntax error"));
        }

        let combined = format!("{}\n{}", request.vertex, request.fragment);
        let mut active_uniforms: Vec<String> = declared_uniforms(&combined)
            .filter(|name| combined.matches(name).count() > 1)
            .map(str::to_string)
            .collect();
        active_uniforms.sort();
        active_uniforms.dedup();

        Ok(CompiledProgram {
            handle: ProgramHandle(self.compiles as u64),
            active_uniforms,
        })
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Block "light": adds a specular term when enabled, nothing otherwise.
pub fn light_block() -> ShaderBlockDescriptor {
    ShaderBlockDescriptor::new("light").with_code(
        ShaderStage::Fragment,
        "color.rgb += specular_term();\n",
        "",
    )
}

pub const COLOR_SHADER: &str = "\\color.vs
in vec3 a_vertex;
void main() { gl_Position = vec4(a_vertex, 1.0); }
\\color.fs
out vec4 FragColor;
void main() {
\tvec4 color = vec4(1.0);
\t#pragma shaderblock \"light\"
\tFragColor = color;
}
";

pub fn library_with_light() -> ShaderLibrary {
    let mut library = ShaderLibrary::new(64);
    library.register_block(light_block()).unwrap();
    library
}

//! Uniform Declarations
//!
//! Authors declare the material-facing properties of a shader source in its
//! `\uniforms` section (and, declaratively, in `\init`), one per line:
//!
//! ```text
//! localPropertyName  uniformGPUName  type  [defaultValue]  [{optionsJSON}]
//! u_color            u_color         color [1, 1, 1]
//! roughness          u_roughness     float 0.5 {"min": 0, "max": 1, "step": 0.01}
//! ```
//!
//! Defaults are parsed as JSON when possible and kept as a plain string
//! otherwise. Options must be a JSON object.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Result, ShaderError};

/// Declared type of a public uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    /// RGB colour, `vec3` on the GPU.
    Color,
    /// RGBA colour, `vec4` on the GPU.
    Color4,
    Mat3,
    Mat4,
    Texture,
    Cubemap,
}

impl UniformType {
    /// Parses the type keyword of a declaration line.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        let ty = match keyword {
            "float" | "number" => Self::Float,
            "int" => Self::Int,
            "bool" | "boolean" => Self::Bool,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "color" => Self::Color,
            "color4" => Self::Color4,
            "mat3" => Self::Mat3,
            "mat4" => Self::Mat4,
            "texture" | "sampler2D" => Self::Texture,
            "cubemap" | "samplerCube" => Self::Cubemap,
            _ => return None,
        };
        Some(ty)
    }

    /// GLSL type backing this uniform.
    #[must_use]
    pub fn glsl_type(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Vec2 => "vec2",
            Self::Vec3 | Self::Color => "vec3",
            Self::Vec4 | Self::Color4 => "vec4",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::Texture => "sampler2D",
            Self::Cubemap => "samplerCube",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_sampler(self) -> bool {
        matches!(self, Self::Texture | Self::Cubemap)
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_type())
    }
}

/// One declared, author-facing property bound to a GPU uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformDecl {
    /// Property name seen by the material layer.
    pub name: String,
    /// Uniform name inside the generated program.
    pub uniform: String,
    #[serde(rename = "type")]
    pub ty: UniformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

/// Parses one declaration line. Blank lines and `//` comments yield `Ok(None)`.
pub fn parse_declaration(
    resource: &str,
    line_no: usize,
    line: &str,
) -> Result<Option<UniformDecl>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("//") {
        return Ok(None);
    }

    let (head, options_text) = match trimmed.find('{') {
        Some(idx) => (&trimmed[..idx], Some(&trimmed[idx..])),
        None => (trimmed, None),
    };

    let err = |message: String| ShaderError::parse(resource, line_no, message);

    let (name, rest) =
        split_token(head).ok_or_else(|| err("missing property name".to_string()))?;
    let (uniform, rest) = split_token(rest)
        .ok_or_else(|| err(format!("property \"{name}\" is missing its uniform name")))?;
    let (keyword, rest) = split_token(rest)
        .ok_or_else(|| err(format!("property \"{name}\" is missing its type")))?;

    if !is_identifier(uniform) {
        return Err(err(format!("\"{uniform}\" is not a valid uniform name")));
    }
    let ty = UniformType::parse(keyword)
        .ok_or_else(|| err(format!("unknown uniform type \"{keyword}\"")))?;

    let default_text = rest.trim();
    let default = (!default_text.is_empty()).then(|| {
        serde_json::from_str::<Value>(default_text)
            .unwrap_or_else(|_| Value::String(default_text.to_string()))
    });

    let options = options_text
        .map(|text| {
            serde_json::from_str::<Map<String, Value>>(text)
                .map_err(|e| err(format!("invalid options JSON: {e}")))
        })
        .transpose()?;

    Ok(Some(UniformDecl {
        name: name.to_string(),
        uniform: uniform.to_string(),
        ty,
        default,
        options,
    }))
}

/// Parses every declaration of a section body whose first line is `first_line`.
pub fn parse_declarations(
    resource: &str,
    body: &str,
    first_line: usize,
) -> Result<Vec<UniformDecl>> {
    let mut decls = Vec::new();
    for (i, line) in body.lines().enumerate() {
        if let Some(decl) = parse_declaration(resource, first_line + i, line)? {
            decls.push(decl);
        }
    }
    Ok(decls)
}

fn split_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_declaration() {
        let decl = parse_declaration("mat", 1, "color u_color vec4").unwrap().unwrap();
        assert_eq!(decl.name, "color");
        assert_eq!(decl.uniform, "u_color");
        assert_eq!(decl.ty, UniformType::Vec4);
        assert!(decl.default.is_none());
        assert!(decl.options.is_none());
    }

    #[test]
    fn test_default_and_options() {
        let decl = parse_declaration(
            "mat",
            3,
            "  roughness u_roughness float 0.5 {\"min\": 0, \"max\": 1}",
        )
        .unwrap()
        .unwrap();
        assert_eq!(decl.default, Some(json!(0.5)));
        let options = decl.options.unwrap();
        assert_eq!(options.get("max"), Some(&json!(1)));
    }

    #[test]
    fn test_array_default_with_spaces() {
        let decl = parse_declaration("mat", 1, "tint u_tint color [1, 0.5, 0]")
            .unwrap()
            .unwrap();
        assert_eq!(decl.default, Some(json!([1, 0.5, 0])));
        assert_eq!(decl.ty.glsl_type(), "vec3");
    }

    #[test]
    fn test_non_json_default_kept_as_string() {
        let decl = parse_declaration("mat", 1, "albedo u_albedo texture white")
            .unwrap()
            .unwrap();
        assert_eq!(decl.default, Some(json!("white")));
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert!(parse_declaration("mat", 1, "   ").unwrap().is_none());
        assert!(parse_declaration("mat", 1, "// note").unwrap().is_none());
    }

    #[test]
    fn test_errors_carry_line() {
        let err = parse_declaration("mat", 7, "color u_color").unwrap_err();
        assert!(matches!(err, ShaderError::Parse { line: 7, .. }));

        let err = parse_declaration("mat", 2, "color u_color vec9").unwrap_err();
        assert!(err.to_string().contains("vec9"));

        let err = parse_declaration("mat", 2, "color u_color vec4 {oops}").unwrap_err();
        assert!(err.to_string().contains("options JSON"));

        let err = parse_declaration("mat", 2, "color 9color vec4").unwrap_err();
        assert!(err.is_parse_error());
    }
}

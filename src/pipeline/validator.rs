//! Public Uniform Validator
//!
//! Reconciles the properties a source declares against the uniforms the
//! compiled program actually exposes. GLSL compilers strip unused uniforms,
//! so a missing uniform only disables the property; it never fails the
//! compile.

use rustc_hash::FxHashSet;

use crate::resources::UniformDecl;

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformReport {
    /// Property names the material layer must stop setting.
    pub disabled: Vec<String>,
}

impl UniformReport {
    #[inline]
    #[must_use]
    pub fn is_disabled(&self, property: &str) -> bool {
        self.disabled.iter().any(|p| p == property)
    }
}

/// Returns the declared properties whose uniform is not in `active_uniforms`.
///
/// Array uniforms reported as `name[0]` match a declaration of `name`.
#[must_use]
pub fn validate_uniforms<'a>(
    declared: impl IntoIterator<Item = &'a UniformDecl>,
    active_uniforms: &[String],
) -> UniformReport {
    let active: FxHashSet<&str> = active_uniforms
        .iter()
        .map(|name| name.strip_suffix("[0]").unwrap_or(name))
        .collect();

    let disabled = declared
        .into_iter()
        .filter(|decl| !active.contains(decl.uniform.as_str()))
        .map(|decl| decl.name.clone())
        .collect();

    UniformReport { disabled }
}

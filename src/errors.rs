//! Error Types
//!
//! This module defines the error types used by the shader permutation system.
//!
//! # Overview
//!
//! The main error type [`ShaderError`] covers every failure mode of the
//! parse → expand → compile path:
//! - Authoring errors (malformed sections, pragmas or uniform declarations)
//! - Reference errors (unknown blocks / snippets, include cycles)
//! - Backend compile failures
//! - Registry configuration errors (bit budget, duplicate names)
//!
//! # Scope
//!
//! Registration and parsing APIs return [`Result<T>`]. The draw-time entry
//! point ([`ShaderManager::request_program`]) never surfaces these errors to the
//! caller; they are logged and turned into a fallback or "unavailable" answer.
//!
//! [`ShaderManager::request_program`]: crate::pipeline::ShaderManager::request_program

use thiserror::Error;

use crate::pipeline::parser::PragmaKind;
use crate::resources::ShaderStage;

/// The main error type for shader sources, blocks and permutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    // ========================================================================
    // Authoring Errors
    // ========================================================================
    /// Malformed section header, pragma or declaration line.
    #[error("{resource}:{line}: parse error: {message}")]
    Parse {
        /// Name of the resource (or block / snippet) being parsed
        resource: String,
        /// 1-based line number inside that resource
        line: usize,
        /// Human readable description
        message: String,
    },

    /// A pragma names a block, include or snippet that is not registered.
    #[error("{resource}:{line}: unresolved {kind} \"{name}\"")]
    UnresolvedReference {
        /// Pragma kind that failed to resolve
        kind: PragmaKind,
        /// Name that was looked up
        name: String,
        /// Resource containing the pragma
        resource: String,
        /// 1-based line of the pragma
        line: usize,
    },

    /// Include / snippet / block expansion re-entered itself.
    #[error("cyclic include: {chain}")]
    CyclicInclude {
        /// Expansion chain, e.g. `include "a" -> include "b" -> include "a"`
        chain: String,
    },

    /// Neither the requested render mode nor `default` provides the stage.
    #[error("{resource}: no {stage} code for render mode \"{render_mode}\"")]
    MissingStage {
        resource: String,
        render_mode: String,
        stage: ShaderStage,
    },

    /// More than one active block exports the same context key (strict mode only).
    #[error("context key \"{key}\" exported by several active blocks: {blocks:?}")]
    AmbiguousContext { key: String, blocks: Vec<String> },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// The compiler backend rejected the generated text.
    #[error("{resource}: {} compile failed: {message}", .stage.map_or("program", ShaderStage::label))]
    Compile {
        resource: String,
        /// Failing stage, when the backend can tell
        stage: Option<ShaderStage>,
        message: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// The registry ran out of feature bits.
    #[error("cannot register block \"{name}\": bit budget of {capacity} blocks exhausted")]
    CapacityExceeded { name: String, capacity: usize },

    /// A name was registered twice in the same namespace.
    #[error("{namespace} \"{name}\" is already registered")]
    DuplicateName {
        /// `"block"`, `"include"`, `"snippet"` or `"source"`
        namespace: &'static str,
        name: String,
    },
}

impl ShaderError {
    /// Returns `true` for errors raised while parsing authored text.
    #[inline]
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    pub(crate) fn parse(resource: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            resource: resource.to_string(),
            line,
            message: message.into(),
        }
    }
}

/// Alias for `Result<T, ShaderError>`.
pub type Result<T> = std::result::Result<T, ShaderError>;

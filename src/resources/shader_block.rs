//! Shader Blocks
//!
//! A shader block is a named, flag-gated code fragment. Every block owns one
//! feature bit; when the bit is set in the requested [`FeatureFlags`] the
//! block's *enabled* code is emitted for each stage, otherwise its *disabled*
//! code is.
//!
//! Blocks may also export context macros:
//!
//! - [`ContextMacro::Block`]: an indirection key, so `#pragma shaderblock ENV "env_2d"`
//!   resolves to whichever active block claims the `ENV` role.
//! - [`ContextMacro::Define`]: a preprocessor define prepended to the
//!   generated stage whenever the block is active.
//!
//! [`FeatureFlags`]: super::FeatureFlags

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::pipeline::parser::{ParsedStage, parse_stage};

/// Programmable stage of a generated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    /// Section extension used in authored sources (`vs` / `fs`).
    #[inline]
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vs",
            Self::Fragment => "fs",
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vs" => Some(Self::Vertex),
            "fs" => Some(Self::Fragment),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }

    /// Stage define emitted into every generated stage.
    #[inline]
    #[must_use]
    pub fn define_name(self) -> &'static str {
        match self {
            Self::Vertex => "VERTEX_SHADER",
            Self::Fragment => "FRAGMENT_SHADER",
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Fragment => 1,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stable handle of a registered block. The wrapped index is its feature bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    #[inline]
    #[must_use]
    pub fn bit(self) -> usize {
        self.0 as usize
    }
}

/// A value exported by a block under a context key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextMacro {
    /// Indirection: the key stands for the named block.
    Block(String),
    /// Preprocessor define: `#define KEY value` while the block is active.
    Define(String),
}

/// Raw per-stage code of a block descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCodeDesc {
    pub enabled: String,
    pub disabled: String,
}

/// Authoring-side description of a block, consumed by
/// [`ShaderBlockRegistry::register`](super::ShaderBlockRegistry::register).
#[derive(Debug, Clone, Default)]
pub struct ShaderBlockDescriptor {
    pub name: String,
    pub code: BTreeMap<ShaderStage, StageCodeDesc>,
    pub context_macros: BTreeMap<String, ContextMacro>,
    /// Precedence when several active blocks export the same context key.
    pub priority: i32,
}

impl ShaderBlockDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_code(
        mut self,
        stage: ShaderStage,
        enabled: impl Into<String>,
        disabled: impl Into<String>,
    ) -> Self {
        self.code.insert(
            stage,
            StageCodeDesc {
                enabled: enabled.into(),
                disabled: disabled.into(),
            },
        );
        self
    }

    /// Exports `key` as an indirection to `block`.
    #[must_use]
    pub fn with_context_block(mut self, key: impl Into<String>, block: impl Into<String>) -> Self {
        self.context_macros
            .insert(key.into(), ContextMacro::Block(block.into()));
        self
    }

    /// Exports `#define key value` while this block is active.
    #[must_use]
    pub fn with_define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_macros
            .insert(key.into(), ContextMacro::Define(value.into()));
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Parsed enabled / disabled code of one stage.
#[derive(Debug, Clone)]
pub struct StageCode {
    pub enabled: ParsedStage,
    pub disabled: ParsedStage,
}

/// A registered, immutable shader block.
#[derive(Debug, Clone)]
pub struct ShaderBlock {
    id: BlockId,
    name: String,
    code: [Option<StageCode>; 2],
    context_macros: BTreeMap<String, ContextMacro>,
    priority: i32,
}

impl ShaderBlock {
    pub(crate) fn from_descriptor(id: BlockId, desc: ShaderBlockDescriptor) -> Result<Self> {
        let mut code: [Option<StageCode>; 2] = [None, None];
        for (stage, stage_code) in desc.code {
            let origin = format!("block \"{}\" ({})", desc.name, stage.extension());
            code[stage.index()] = Some(StageCode {
                enabled: parse_stage(&origin, &stage_code.enabled, 1)?,
                disabled: parse_stage(&origin, &stage_code.disabled, 1)?,
            });
        }

        Ok(Self {
            id,
            name: desc.name,
            code,
            context_macros: desc.context_macros,
            priority: desc.priority,
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn bit(&self) -> usize {
        self.id.bit()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Code for `stage`, or `None` when the block does not touch that stage.
    #[inline]
    #[must_use]
    pub fn stage_code(&self, stage: ShaderStage) -> Option<&StageCode> {
        self.code[stage.index()].as_ref()
    }

    #[inline]
    #[must_use]
    pub fn context_macros(&self) -> &BTreeMap<String, ContextMacro> {
        &self.context_macros
    }
}

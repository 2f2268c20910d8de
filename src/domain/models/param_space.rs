//! Declarative configuration space for run planning.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value type of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    Enum,
    Int,
    Float,
    Bool,
    String,
}

/// One declared dimension of an environment's parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpaceDimension {
    pub key: String,
    pub kind: DimensionKind,
    /// Ordered choices. Required for `enum`; optional explicit values for the
    /// other kinds.
    #[serde(default)]
    pub options: Vec<Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Integer stride when expanding `int` bounds.
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default = "default_true")]
    pub allow_grid: bool,
    #[serde(default = "default_true")]
    pub allow_random: bool,
    #[serde(default = "default_true")]
    pub allow_manual: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
}

const fn default_true() -> bool {
    true
}

impl ParamSpaceDimension {
    /// An `enum` dimension over the given options, explorable in every mode.
    pub fn enumeration(key: impl Into<String>, options: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            kind: DimensionKind::Enum,
            options,
            min: None,
            max: None,
            step: None,
            allow_grid: true,
            allow_random: true,
            allow_manual: true,
            required: false,
            default_value: None,
        }
    }
}

/// A whole declared space, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ParamSpace {
    pub dimensions: Vec<ParamSpaceDimension>,
}

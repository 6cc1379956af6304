// ============================================================
// Layer 3 — Output Head Query
// ============================================================
// Parses the compact grammar describing the heterogeneous
// ensemble of output heads attached to every task:
//
//   (activation units)xrepeat (activation units)xrepeat ...
//
// e.g. "(tanh 0)x2 (relu 5)x1" expands to three heads:
//   head 0 → tanh, no hidden layer (plain linear classifier)
//   head 1 → tanh, no hidden layer
//   head 2 → relu, one hidden layer of width 5
//
// Expansion order is left to right and defines the head index,
// which later drives best-head selection and ensembling.

use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::TaggerError;

/// Element-wise non-linearities available to heads and to the encoder stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Rectify,
    Sigmoid,
    Gelu,
    Linear,
}

impl Activation {
    pub const NAMES: [&'static str; 6] = ["tanh", "rectify", "relu", "sigmoid", "gelu", "linear"];
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tanh" => Ok(Activation::Tanh),
            "rectify" | "relu" => Ok(Activation::Rectify),
            "sigmoid" | "logistic" => Ok(Activation::Sigmoid),
            "gelu" => Ok(Activation::Gelu),
            "linear" | "identity" => Ok(Activation::Linear),
            other => Err(format!(
                "unknown activation '{other}' (expected one of {})",
                Activation::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Tanh => "tanh",
            Activation::Rectify => "rectify",
            Activation::Sigmoid => "sigmoid",
            Activation::Gelu => "gelu",
            Activation::Linear => "linear",
        };
        f.write_str(name)
    }
}

/// Descriptor for one output head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadSpec {
    pub activation: Activation,
    /// Width of the hidden layer; 0 means the head is a plain linear classifier.
    pub hidden_units: usize,
}

impl HeadSpec {
    pub fn has_hidden_layer(&self) -> bool {
        self.hidden_units > 0
    }
}

/// A validated head query together with its left-to-right expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadQuery {
    query: String,
    heads: Vec<HeadSpec>,
}

fn group_pattern() -> Result<&'static Regex, String> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\(([a-z]*) ([0-9]*)\)x([0-9]*)"))
        .as_ref()
        .map_err(|e| format!("head query pattern: {e}"))
}

impl HeadQuery {
    /// Parse and expand a query. Fails when no group matches the grammar,
    /// when a group names an unknown activation or lacks a number, or when
    /// the groups declare zero heads in total.
    pub fn parse(query: &str) -> Result<Self, TaggerError> {
        let invalid = |reason: String| TaggerError::InvalidHeadQuery {
            query: query.to_string(),
            reason,
        };

        let pattern = group_pattern().map_err(invalid)?;
        let mut heads = Vec::new();
        let mut groups = 0usize;
        for caps in pattern.captures_iter(query) {
            groups += 1;
            let activation: Activation = caps[1].parse().map_err(invalid)?;
            let hidden_units: usize = caps[2]
                .parse()
                .map_err(|_| invalid(format!("missing unit count in '{}'", &caps[0])))?;
            let repeat: usize = caps[3]
                .parse()
                .map_err(|_| invalid(format!("missing repeat count in '{}'", &caps[0])))?;

            heads.extend(std::iter::repeat(HeadSpec { activation, hidden_units }).take(repeat));
        }

        if groups == 0 {
            return Err(invalid(
                "expected groups of the form (activation units)xrepeat".to_string(),
            ));
        }
        if heads.is_empty() {
            return Err(invalid("the query declares zero output heads".to_string()));
        }

        Ok(Self { query: query.to_string(), heads })
    }

    /// Query equivalent to `repeat` identical heads, the form used when no
    /// explicit query is given.
    pub fn uniform(activation: Activation, hidden_units: usize, repeat: usize) -> Result<Self, TaggerError> {
        Self::parse(&format!("({activation} {hidden_units})x{repeat}"))
    }

    pub fn heads(&self) -> &[HeadSpec] {
        &self.heads
    }

    /// Total number of heads per task (`out_num`).
    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    pub fn as_str(&self) -> &str {
        &self.query
    }
}

impl FromStr for HeadQuery {
    type Err = TaggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

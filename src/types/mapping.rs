//! Mapping targets, LLM decisions and mapping results.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// A target column of the FBDI template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FbdiField {
    /// Row index in the template sheet
    pub row: usize,

    /// Target column name with required-field asterisks removed
    pub name: String,

    pub description: String,

    pub data_type: String,

    /// Extra context passed to the LLM (technical comments)
    pub context: String,

    /// Text used for candidate retrieval
    pub query_text: String,
}

/// What the LLM decided to do with a target field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum MappingAction {
    /// A legacy column carries the same business meaning
    Mapped,
    /// Fixed value, no legacy source
    Hardcoded,
    /// Configuration flag to be confirmed with functional owners
    ManualConfig,
    /// No adequate match
    #[default]
    None,
}

impl MappingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mapped => "MAPPED",
            Self::Hardcoded => "HARDCODED",
            Self::ManualConfig => "MANUAL_CONFIG",
            Self::None => "NONE",
        }
    }
}

impl From<String> for MappingAction {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "MAPPED" => Self::Mapped,
            "HARDCODED" => Self::Hardcoded,
            "MANUAL_CONFIG" => Self::ManualConfig,
            _ => Self::None,
        }
    }
}

/// One element of the LLM's batch decision list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingDecision {
    /// Row index echoed back from the prompt
    #[serde(default, deserialize_with = "lenient_index")]
    pub field_index: Option<usize>,

    /// 1-based candidate option, `None` when nothing was selected
    #[serde(default, deserialize_with = "lenient_index")]
    pub selected_option_index: Option<usize>,

    #[serde(default, deserialize_with = "lenient_action")]
    pub mapping_action: MappingAction,

    /// 0-100
    #[serde(default, deserialize_with = "lenient_score")]
    pub confidence_score: f64,

    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Refinement instruction returned by the review pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum Correction {
    /// Replace the mapped legacy column with one of the alternatives
    Rewrite {
        row_index: usize,
        new_table: String,
        new_column: String,
        #[serde(default)]
        reason: String,
    },
    /// Leave the mapping but annotate it
    Flag {
        row_index: usize,
        #[serde(default)]
        issue: String,
        #[serde(default)]
        suggestion: String,
    },
}

impl Correction {
    pub fn row_index(&self) -> usize {
        match self {
            Self::Rewrite { row_index, .. } | Self::Flag { row_index, .. } => *row_index,
        }
    }
}

/// Mapping columns of one template row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingRecord {
    pub target_field: String,
    pub legacy_table: Option<String>,
    pub legacy_column: Option<String>,
    pub legacy_description: Option<String>,
    pub confidence: Option<f64>,
    pub logic: Option<String>,
}

impl MappingRecord {
    /// Whether a legacy column (or a HARDCODED/MANUAL_CONFIG marker) was assigned.
    pub fn is_mapped(&self) -> bool {
        self.legacy_column.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Accept integer JSON numbers (or integral floats); anything else is `None`.
fn lenient_index<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        _ => None,
    })
}

fn lenient_action<'de, D>(deserializer: D) -> std::result::Result<MappingAction, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::String(s) => MappingAction::from(s),
        _ => MappingAction::None,
    })
}

/// Accept numbers or numeric strings; anything else scores 0.
fn lenient_score<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

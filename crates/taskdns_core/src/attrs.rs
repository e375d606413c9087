use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A persisted item: attribute name to wire value.
pub type Item = BTreeMap<String, AttrValue>;

/// The closed set of wire value types this system reads and writes.
///
/// The serde representation matches the item store's wire JSON exactly
/// (`{"S": "..."}`, `{"SS": [...]}`, `{"M": {...}}`, `{"NULL": true}`),
/// so a JSON fixture of a stored item deserializes directly into an
/// [`Item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// String attribute.
    #[serde(rename = "S")]
    S(String),
    /// Number attribute, carried in its wire string form.
    #[serde(rename = "N")]
    N(String),
    /// String-set attribute. The store rejects empty sets, so an empty
    /// set is represented by omitting the attribute instead.
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    /// List attribute.
    #[serde(rename = "L")]
    L(Vec<AttrValue>),
    /// Map attribute.
    #[serde(rename = "M")]
    M(BTreeMap<String, AttrValue>),
    /// Explicit null attribute.
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttrValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ss(&self) -> Option<&[String]> {
        match self {
            Self::Ss(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_l(&self) -> Option<&[AttrValue]> {
        match self {
            Self::L(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_m(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            Self::M(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Wire type tag, used in decode error messages.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::Ss(_) => "SS",
            Self::L(_) => "L",
            Self::M(_) => "M",
            Self::Null(_) => "NULL",
        }
    }
}

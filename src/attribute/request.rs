//! Attribute requests made by storage classes

use super::{attribute_kind, AttributeKind, AttributeValue, LabelSelector};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed attribute request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum AttributeRequest {
    Bool(bool),
    Int(i64),
    String(String),
    Selector(LabelSelector),
}

impl AttributeRequest {
    /// Parse the string form of a recognised attribute
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        let kind = attribute_kind(name).ok_or_else(|| {
            Error::InvalidArgument(format!("unrecognized storage attribute: {}", name))
        })?;

        let value = value.trim();
        match kind {
            AttributeKind::Bool => match value.to_ascii_lowercase().as_str() {
                "true" => Ok(AttributeRequest::Bool(true)),
                "false" => Ok(AttributeRequest::Bool(false)),
                _ => Err(Error::InvalidArgument(format!(
                    "attribute {} expects a boolean, got '{}'",
                    name, value
                ))),
            },
            AttributeKind::Int => value.parse::<i64>().map(AttributeRequest::Int).map_err(|e| {
                Error::InvalidArgument(format!(
                    "attribute {} expects an integer, got '{}': {}",
                    name, value, e
                ))
            }),
            AttributeKind::String => Ok(AttributeRequest::String(value.to_string())),
            AttributeKind::Selector => Ok(AttributeRequest::Selector(LabelSelector::parse(value))),
        }
    }

    /// Check this request against a pool's offers and labels.
    ///
    /// A missing offer or an offer of a different type does not match.
    pub fn matches(
        &self,
        name: &str,
        offers: &BTreeMap<String, AttributeValue>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        match self {
            AttributeRequest::Selector(selector) => selector.matches(labels),
            AttributeRequest::Bool(b) => offers.get(name).is_some_and(|o| o.offers_bool(*b)),
            AttributeRequest::Int(i) => offers.get(name).is_some_and(|o| o.offers_int(*i)),
            AttributeRequest::String(s) => offers.get(name).is_some_and(|o| o.offers_string(s)),
        }
    }
}

impl std::fmt::Display for AttributeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeRequest::Bool(b) => write!(f, "{}", b),
            AttributeRequest::Int(i) => write!(f, "{}", i),
            AttributeRequest::String(s) => write!(f, "{}", s),
            AttributeRequest::Selector(s) => write!(f, "{}", s),
        }
    }
}

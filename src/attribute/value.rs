//! Attribute offers advertised by storage pools

use serde::{Deserialize, Serialize};

/// A typed attribute value offered by a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum AttributeValue {
    /// Boolean capability (e.g. encryption)
    Bool(bool),
    /// Inclusive integer range (e.g. IOPS)
    IntRange { min: i64, max: i64 },
    /// Single string value (e.g. media)
    String(String),
    /// Any of several string values (e.g. provisioning types)
    StringList(Vec<String>),
}

impl AttributeValue {
    /// Offer a single integer value
    pub fn int(value: i64) -> Self {
        AttributeValue::IntRange {
            min: value,
            max: value,
        }
    }

    /// Offer a string value
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue::String(value.into())
    }

    /// Offer a list of string values
    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeValue::StringList(values.into_iter().map(Into::into).collect())
    }

    pub fn offers_bool(&self, requested: bool) -> bool {
        matches!(self, AttributeValue::Bool(offered) if *offered == requested)
    }

    pub fn offers_int(&self, requested: i64) -> bool {
        matches!(
            self,
            AttributeValue::IntRange { min, max } if *min <= requested && requested <= *max
        )
    }

    pub fn offers_string(&self, requested: &str) -> bool {
        match self {
            AttributeValue::String(offered) => offered == requested,
            AttributeValue::StringList(offered) => offered.iter().any(|o| o == requested),
            _ => false,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::IntRange { min, max } if min == max => write!(f, "{}", min),
            AttributeValue::IntRange { min, max } => write!(f, "{}-{}", min, max),
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::StringList(l) => write!(f, "{}", l.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_containment() {
        let offer = AttributeValue::IntRange { min: 100, max: 5000 };
        assert!(offer.offers_int(100));
        assert!(offer.offers_int(5000));
        assert!(!offer.offers_int(5001));
        assert!(!offer.offers_string("100"));
    }

    #[test]
    fn test_list_membership() {
        let offer = AttributeValue::list(["thin", "thick"]);
        assert!(offer.offers_string("thick"));
        assert!(!offer.offers_string("thinner"));
        assert_eq!(offer.to_string(), "thin,thick");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&AttributeValue::IntRange { min: 1, max: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"intRange","value":{"min":1,"max":2}}"#);

        let back: AttributeValue = serde_json::from_str(r#"{"type":"bool","value":true}"#).unwrap();
        assert_eq!(back, AttributeValue::Bool(true));
    }
}

//! Field selectors for list and watch calls.
//!
//! Only equality requirements are supported, which is all the single-record
//! scope needs. The string form is `field=value[,field=value...]`; the empty
//! string selects everything.

use std::fmt;
use std::str::FromStr;

use crate::constants::NAME_SELECTOR_FIELD;
use crate::record::IdentityRecord;

/// A conjunction of `field=value` requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<(String, String)>,
}

impl FieldSelector {
    /// Selector matching every record.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector matching the record with the given name.
    pub fn name_equals(name: impl Into<String>) -> Self {
        Self::everything().with_name(name)
    }

    /// Replace any name requirement with `metadata.name=<name>`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.requirements
            .retain(|(field, _)| field != NAME_SELECTOR_FIELD);
        self.requirements
            .push((NAME_SELECTOR_FIELD.to_string(), name.into()));
        self
    }

    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The name this selector pins, if any.
    pub fn name(&self) -> Option<&str> {
        self.requirements
            .iter()
            .find(|(field, _)| field == NAME_SELECTOR_FIELD)
            .map(|(_, value)| value.as_str())
    }

    /// Evaluate the selector against a record.
    ///
    /// `metadata.name` and `metadata.namespace` are matched against the key;
    /// any other field never matches.
    pub fn matches(&self, record: &IdentityRecord) -> bool {
        self.requirements.iter().all(|(field, value)| match field.as_str() {
            NAME_SELECTOR_FIELD => record.key.name == *value,
            "metadata.namespace" => record.key.namespace == *value,
            _ => false,
        })
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", field, value)?;
        }
        Ok(())
    }
}

/// Error when parsing an invalid selector string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorParseError(pub String);

impl fmt::Display for SelectorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid field selector: {}", self.0)
    }
}

impl std::error::Error for SelectorParseError {}

impl FromStr for FieldSelector {
    type Err = SelectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let requirements = s
            .split(',')
            .map(|term| {
                let (field, value) = term
                    .split_once('=')
                    .ok_or_else(|| SelectorParseError(s.to_string()))?;
                let field = field.trim();
                if field.is_empty() {
                    return Err(SelectorParseError(s.to_string()));
                }
                Ok((field.to_string(), value.trim().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { requirements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordData, RecordKey};
    use proptest::prelude::*;

    fn record(namespace: &str, name: &str) -> IdentityRecord {
        IdentityRecord::new(RecordKey::new(namespace, name), RecordData::new())
    }

    #[test]
    fn test_name_selector_string() {
        let selector = FieldSelector::name_equals("ingress-uid");
        assert_eq!(selector.to_string(), "metadata.name=ingress-uid");
        assert_eq!(selector.name(), Some("ingress-uid"));
    }

    #[test]
    fn test_with_name_overrides_previous_name() {
        let selector = FieldSelector::name_equals("other").with_name("ingress-uid");
        assert_eq!(selector.to_string(), "metadata.name=ingress-uid");
    }

    #[test]
    fn test_everything_matches_all() {
        let selector = FieldSelector::everything();
        assert!(selector.is_everything());
        assert!(selector.matches(&record("a", "b")));
        assert_eq!(selector.to_string(), "");
    }

    #[test]
    fn test_name_selector_matches_only_that_name() {
        let selector = FieldSelector::name_equals("ingress-uid");
        assert!(selector.matches(&record("kube-system", "ingress-uid")));
        assert!(!selector.matches(&record("kube-system", "other")));
    }

    #[test]
    fn test_unknown_field_never_matches() {
        let selector: FieldSelector = "spec.color=blue".parse().unwrap();
        assert!(!selector.matches(&record("a", "b")));
    }

    #[test]
    fn test_parse_rejects_missing_equals() {
        assert!("metadata.name".parse::<FieldSelector>().is_err());
        assert!("=x".parse::<FieldSelector>().is_err());
    }

    proptest! {
        /// Rendering a selector and parsing it back yields the same selector.
        #[test]
        fn prop_render_parse_agree(
            name in "[a-z0-9][a-z0-9-]{0,30}",
            namespace in "[a-z0-9][a-z0-9-]{0,30}",
        ) {
            let selector: FieldSelector = format!("metadata.namespace={}", namespace)
                .parse()
                .unwrap();
            let selector = selector.with_name(name);
            let parsed: FieldSelector = selector.to_string().parse().unwrap();
            prop_assert_eq!(parsed, selector);
        }
    }
}

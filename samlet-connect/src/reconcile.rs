use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use samlet_core::{errors, Result};

use crate::config::{ExpandedFieldSpec, UserFieldSpec};
use crate::RawAttributes;

/// How missing source attributes are treated during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingPolicy {
    /// Every referenced attribute must be present, defaults are rejected.
    Strict,
    /// Missing attributes resolve to the declared default or null.
    Lenient,
}

/// Local user field name to its resolution spec.
pub type UserFieldMap = HashMap<String, UserFieldSpec>;

/// A resolved field value, preserving the cardinality the IdP supplied:
/// single-valued attributes collapse to their head, multi-valued ones
/// keep the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    fn from_values(values: &[String]) -> Self {
        match values {
            [one] => Self::One(one.clone()),
            many => Self::Many(many.to_vec()),
        }
    }

    /// The head value, if any.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(v) => Some(v.as_str()),
            Self::Many(values) => values.first().map(String::as_str),
        }
    }
}

/// Canonical user-attribute record handed to the identity store. Null
/// entries come from lenient mapping of absent attributes.
pub type FinalUserRecord = HashMap<String, Option<FieldValue>>;

/// Resolve the configured user-field map against the attribute
/// statement.
///
/// Strict mode fails closed on any referenced attribute that is absent,
/// citing the configured `error_msg` when one exists, and rejects specs
/// that declare a default. Lenient mode substitutes defaults or null.
/// A configured value index out of range fails in either mode.
pub fn reconcile(
    specs: &UserFieldMap,
    raw: &RawAttributes,
    policy: MappingPolicy,
) -> Result<FinalUserRecord> {
    let mut record = FinalUserRecord::with_capacity(specs.len());
    for (field, spec) in specs {
        let value = match spec {
            UserFieldSpec::Direct(key) => resolve_direct(key, raw, policy)?,
            UserFieldSpec::Expanded(expanded) => {
                resolve_expanded(field, expanded, raw, policy)?
            }
        };
        record.insert(field.clone(), value);
    }
    Ok(record)
}

fn resolve_direct(
    key: &str,
    raw: &RawAttributes,
    policy: MappingPolicy,
) -> Result<Option<FieldValue>> {
    match raw.get(key) {
        Some(values) => Ok(Some(FieldValue::from_values(values))),
        None => match policy {
            MappingPolicy::Strict => Err(errors::data(&format!(
                "incomplete data: {key} not found"
            ))),
            MappingPolicy::Lenient => Ok(None),
        },
    }
}

fn resolve_expanded(
    field: &str,
    spec: &ExpandedFieldSpec,
    raw: &RawAttributes,
    policy: MappingPolicy,
) -> Result<Option<FieldValue>> {
    if policy == MappingPolicy::Strict && spec.default.is_some() {
        return Err(errors::configuration(&format!(
            "a default value is set for field {field} while strict mapping is enabled"
        )));
    }
    match raw.get(&spec.key) {
        Some(values) => match spec.index {
            Some(index) => match values.get(index) {
                Some(value) => Ok(Some(FieldValue::One(value.clone()))),
                None => Err(errors::data(&format!(
                    "attribute {} has no value at index {index}",
                    spec.key
                ))),
            },
            None => Ok(Some(FieldValue::from_values(values))),
        },
        // When absent under lenient mapping the default substitutes the
        // whole field, bypassing any configured index.
        None => match policy {
            MappingPolicy::Strict => Err(errors::data(
                spec.error_msg.as_deref().unwrap_or(&format!(
                    "incomplete data: {} not found",
                    spec.key
                )),
            )),
            MappingPolicy::Lenient => {
                Ok(spec.default.clone().map(FieldValue::One))
            }
        },
    }
}

/// Extract the identity-store lookup key from a reconciled record.
pub fn lookup_value(
    record: &FinalUserRecord,
    attribute: &str,
) -> Result<String> {
    record
        .get(attribute)
        .and_then(|value| value.as_ref())
        .and_then(|value| value.first())
        .map(str::to_string)
        .ok_or_else(|| {
            errors::data(&format!(
                "lookup attribute {attribute} was not resolved from the assertion"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use samlet_core::errors::Code;

    fn raw(entries: &[(&str, &[&str])]) -> RawAttributes {
        entries
            .iter()
            .map(|(k, vs)| {
                (k.to_string(), vs.iter().map(|v| v.to_string()).collect())
            })
            .collect()
    }

    fn expanded(
        key: &str,
        index: Option<usize>,
        default: Option<&str>,
        error_msg: Option<&str>,
    ) -> UserFieldSpec {
        UserFieldSpec::Expanded(ExpandedFieldSpec {
            key: key.to_string(),
            index,
            default: default.map(str::to_string),
            error_msg: error_msg.map(str::to_string),
        })
    }

    #[test]
    fn test_direct_single_value_collapses_to_head() {
        let specs = UserFieldMap::from([(
            "username".to_string(),
            UserFieldSpec::Direct("uid".to_string()),
        )]);
        let record = reconcile(
            &specs,
            &raw(&[("uid", &["alice"])]),
            MappingPolicy::Strict,
        )
        .unwrap();
        assert_eq!(
            record["username"],
            Some(FieldValue::One("alice".to_string()))
        );
        assert_eq!(lookup_value(&record, "username").unwrap(), "alice");
    }

    #[test]
    fn test_direct_multi_value_preserves_cardinality() {
        let specs = UserFieldMap::from([(
            "groups".to_string(),
            UserFieldSpec::Direct("memberOf".to_string()),
        )]);
        let record = reconcile(
            &specs,
            &raw(&[("memberOf", &["admins", "users"])]),
            MappingPolicy::Strict,
        )
        .unwrap();
        assert_eq!(
            record["groups"],
            Some(FieldValue::Many(vec![
                "admins".to_string(),
                "users".to_string()
            ]))
        );
    }

    #[test]
    fn test_strict_missing_direct_attribute_fails() {
        let specs = UserFieldMap::from([(
            "username".to_string(),
            UserFieldSpec::Direct("uid".to_string()),
        )]);
        let err =
            reconcile(&specs, &raw(&[]), MappingPolicy::Strict).unwrap_err();
        assert!(matches!(err.source(), Code::Data(msg) if msg.contains("uid")));
    }

    #[test]
    fn test_strict_missing_attribute_uses_error_msg() {
        let specs = UserFieldMap::from([(
            "email".to_string(),
            expanded("email", None, None, Some("no email")),
        )]);
        let err =
            reconcile(&specs, &raw(&[]), MappingPolicy::Strict).unwrap_err();
        assert!(matches!(err.source(), Code::Data(msg) if msg == "no email"));
    }

    #[test]
    fn test_strict_rejects_declared_default() {
        // A default is meaningless when strictness forbids omission, so
        // the configuration is rejected even though the attribute exists.
        let specs = UserFieldMap::from([(
            "dept".to_string(),
            expanded("dept", Some(0), Some("unknown"), None),
        )]);
        let err = reconcile(
            &specs,
            &raw(&[("dept", &["engineering"])]),
            MappingPolicy::Strict,
        )
        .unwrap_err();
        assert!(matches!(err.source(), Code::Configuration(_)));
    }

    #[test]
    fn test_lenient_missing_attribute_uses_default() {
        let specs = UserFieldMap::from([(
            "dept".to_string(),
            expanded("dept", None, Some("unknown"), None),
        )]);
        let record =
            reconcile(&specs, &raw(&[]), MappingPolicy::Lenient).unwrap();
        assert_eq!(
            record["dept"],
            Some(FieldValue::One("unknown".to_string()))
        );
    }

    #[test]
    fn test_lenient_missing_attribute_without_default_is_null() {
        let specs = UserFieldMap::from([(
            "dept".to_string(),
            UserFieldSpec::Direct("dept".to_string()),
        )]);
        let record =
            reconcile(&specs, &raw(&[]), MappingPolicy::Lenient).unwrap();
        assert_eq!(record["dept"], None);
    }

    #[test]
    fn test_index_selects_value() {
        let specs = UserFieldMap::from([(
            "primary_group".to_string(),
            expanded("memberOf", Some(1), None, None),
        )]);
        let record = reconcile(
            &specs,
            &raw(&[("memberOf", &["admins", "users"])]),
            MappingPolicy::Strict,
        )
        .unwrap();
        assert_eq!(
            record["primary_group"],
            Some(FieldValue::One("users".to_string()))
        );
    }

    #[test]
    fn test_index_out_of_range_fails_in_either_mode() {
        let specs = UserFieldMap::from([(
            "primary_group".to_string(),
            expanded("memberOf", Some(3), None, None),
        )]);
        for policy in [MappingPolicy::Strict, MappingPolicy::Lenient] {
            let err = reconcile(
                &specs,
                &raw(&[("memberOf", &["admins"])]),
                policy,
            )
            .unwrap_err();
            assert!(
                matches!(err.source(), Code::Data(msg) if msg.contains("index"))
            );
        }
    }

    #[test]
    fn test_lenient_default_bypasses_index_when_attribute_absent() {
        let specs = UserFieldMap::from([(
            "primary_group".to_string(),
            expanded("memberOf", Some(4), Some("nobody"), None),
        )]);
        let record =
            reconcile(&specs, &raw(&[]), MappingPolicy::Lenient).unwrap();
        assert_eq!(
            record["primary_group"],
            Some(FieldValue::One("nobody".to_string()))
        );
    }

    #[test]
    fn test_lookup_value_missing_field_fails() {
        let record = FinalUserRecord::from([("dept".to_string(), None)]);
        assert!(lookup_value(&record, "username").is_err());
        assert!(lookup_value(&record, "dept").is_err());
    }
}

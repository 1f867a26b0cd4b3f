//! Shared bootstrap infrastructure
//!
//! Some desired configs point at resources the controller does not own, such
//! as a certificate or an origin bucket provisioned out of band. Those are
//! injected as read-only [`ReferenceResource`] values, and any config string
//! of the form `$ref:<name>.<field>` is replaced with the referenced value
//! before diffing. References are never created, updated, or deleted.

use crate::error::ReconcileError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

const REF_PREFIX: &str = "$ref:";

/// A read-only externally provisioned resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceResource {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ReferenceResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceFile {
    #[serde(default)]
    references: Vec<ReferenceResource>,
}

/// The set of references available to every reconcile pass
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    references: HashMap<String, ReferenceResource>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ReconcileError> {
        let file: ReferenceFile = serde_yaml::from_str(yaml)
            .map_err(|e| ReconcileError::InvalidSpec(format!("invalid reference file: {}", e)))?;
        let mut set = Self::new();
        for reference in file.references {
            set.insert(reference);
        }
        Ok(set)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReconcileError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::InvalidSpec(format!("cannot read references {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn insert(&mut self, reference: ReferenceResource) {
        self.references.insert(reference.name.clone(), reference);
    }

    pub fn get(&self, name: &str) -> Option<&ReferenceResource> {
        self.references.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Returns `config` with every `$ref:` string substituted
    pub fn resolve(&self, config: &Value) -> Result<Value, ReconcileError> {
        match config {
            Value::String(s) => match s.strip_prefix(REF_PREFIX) {
                Some(target) => self.lookup(target).cloned(),
                None => Ok(config.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| self.resolve(v).map(|v| (k.clone(), v)))
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            _ => Ok(config.clone()),
        }
    }

    fn lookup(&self, target: &str) -> Result<&Value, ReconcileError> {
        let (name, field) = target.split_once('.').ok_or_else(|| {
            ReconcileError::InvalidSpec(format!("reference {}{} has no field", REF_PREFIX, target))
        })?;
        let reference = self.references.get(name).ok_or_else(|| {
            ReconcileError::InvalidSpec(format!("unknown reference {}", name))
        })?;
        let (head, rest) = match field.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (field, None),
        };
        let value = reference.fields.get(head);
        let value = match rest {
            Some(rest) => value.and_then(|v| cloud_client::lookup(v, rest)),
            None => value,
        };
        value.ok_or_else(|| {
            ReconcileError::InvalidSpec(format!("reference {} has no field {}", name, field))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn references() -> ReferenceSet {
        let mut set = ReferenceSet::new();
        set.insert(
            ReferenceResource::new("origin-bucket")
                .with_field("domainName", json!("assets.s3.example.com"))
                .with_field("settings", json!({"region": "eu-west-1"})),
        );
        set
    }

    #[test]
    fn test_resolve_nested_references() {
        let config = json!({
            "distributionConfig": {
                "origins": [{"id": "s3", "domainName": "$ref:origin-bucket.domainName"}],
                "comment": "$ref:origin-bucket.settings.region",
                "enabled": true
            }
        });
        let resolved = references().resolve(&config).unwrap();
        assert_eq!(
            resolved["distributionConfig"]["origins"][0]["domainName"],
            json!("assets.s3.example.com")
        );
        assert_eq!(resolved["distributionConfig"]["comment"], json!("eu-west-1"));
        assert_eq!(resolved["distributionConfig"]["enabled"], json!(true));
    }

    #[test]
    fn test_unknown_reference_is_invalid_spec() {
        let err = references()
            .resolve(&json!({"x": "$ref:missing.domainName"}))
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(references().resolve(&json!("$ref:origin-bucket.nope")).is_err());
        assert!(references().resolve(&json!("$ref:origin-bucket")).is_err());
    }

    #[test]
    fn test_from_yaml() {
        let set = ReferenceSet::from_yaml(
            r#"
references:
  - name: certificate
    fields:
      arn: arn:cloud:certificate/abc
"#,
        )
        .unwrap();
        assert_eq!(
            set.resolve(&json!("$ref:certificate.arn")).unwrap(),
            json!("arn:cloud:certificate/abc")
        );
    }
}

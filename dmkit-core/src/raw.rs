//! Helpers for working with untyped upstream records.

use crate::error::{DmkitError, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// An upstream record exactly as published: a JSON object with no fixed schema.
pub type RawRecord = Map<String, Value>;

/// Composite identity key: `name-source`.
pub fn name_source_key(name: &str, source: &str) -> String {
    format!("{}-{}", name, source)
}

/// Identity key of a raw record, if it carries both a name and a source.
pub fn record_key(record: &RawRecord) -> Option<String> {
    let name = record.get("name")?.as_str()?;
    let source = record.get("source")?.as_str()?;
    Some(name_source_key(name, source))
}

/// Key for log and error messages; falls back to the bare name.
pub fn display_key(record: &RawRecord) -> String {
    record_key(record).unwrap_or_else(|| {
        record
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string()
    })
}

/// Return the value wrapped in a list. Lists are returned as-is.
pub fn listify(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

pub fn str_field<'a>(record: &'a RawRecord, name: &str) -> Option<&'a str> {
    record.get(name).and_then(Value::as_str)
}

/// Decode an optional field into a typed shape. A present field that fits no shape of `T`
/// is a shape error naming the field.
pub fn field<T: DeserializeOwned>(record: &RawRecord, name: &str) -> Result<Option<T>> {
    match record.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::deserialize(value)
            .map(Some)
            .map_err(|e| DmkitError::Shape(format!("field '{}': {} (got {})", name, e, value))),
    }
}

/// Like [`field`] but absent fields are an error.
pub fn required<T: DeserializeOwned>(record: &RawRecord, name: &str) -> Result<T> {
    field(record, name)?.ok_or_else(|| DmkitError::MissingField(name.to_string()))
}

/// Like [`field`] but absent fields take the type's default.
pub fn field_or_default<T: DeserializeOwned + Default>(record: &RawRecord, name: &str) -> Result<T> {
    Ok(field(record, name)?.unwrap_or_default())
}

/// View a value as a record, or fail with a shape error.
pub fn as_record<'a>(value: &'a Value, what: &str) -> Result<&'a RawRecord> {
    value
        .as_object()
        .ok_or_else(|| DmkitError::Shape(format!("{} must be an object, got {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_record_key() {
        let rec = record(json!({"name": "Goblin", "source": "MM"}));
        assert_eq!(record_key(&rec).as_deref(), Some("Goblin-MM"));

        let rec = record(json!({"name": "Goblin"}));
        assert_eq!(record_key(&rec), None);
        assert_eq!(display_key(&rec), "Goblin");
    }

    #[test]
    fn test_listify() {
        assert_eq!(listify(&json!("a")), vec![json!("a")]);
        assert_eq!(listify(&json!(["a", "b"])), vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_field_shape_error_names_field() {
        let rec = record(json!({"passive": "twelve"}));
        let err = field::<i64>(&rec, "passive").unwrap_err();
        assert!(err.is_shape());
        assert!(err.to_string().contains("passive"));
        assert_eq!(field::<i64>(&rec, "missing").unwrap(), None);
        assert!(matches!(required::<i64>(&rec, "missing"), Err(DmkitError::MissingField(_))));
    }
}

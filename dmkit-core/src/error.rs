use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmkitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A field's value matched none of the shapes known for it.
    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A copy source, feature reference or other key could not be resolved.
    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Unable to convert '{key}': {source}\n{raw}")]
    Record {
        key: String,
        raw: String,
        #[source]
        source: Box<DmkitError>,
    },

    #[error("{failed} of {total} {entity} record(s) failed to convert")]
    Batch {
        entity: &'static str,
        failed: usize,
        total: usize,
    },
}

impl DmkitError {
    /// Wrap an error with the record it happened on.
    pub fn for_record(key: impl Into<String>, raw: &serde_json::Value, source: DmkitError) -> Self {
        DmkitError::Record {
            key: key.into(),
            raw: serde_json::to_string(raw).unwrap_or_default(),
            source: Box::new(source),
        }
    }

    pub fn is_shape(&self) -> bool {
        match self {
            DmkitError::Shape(_) | DmkitError::Validation(_) | DmkitError::MissingField(_) => true,
            DmkitError::Record { source, .. } => source.is_shape(),
            _ => false,
        }
    }

    pub fn is_lookup(&self) -> bool {
        match self {
            DmkitError::Lookup(_) => true,
            DmkitError::Record { source, .. } => source.is_lookup(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DmkitError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_error_carries_raw_json() {
        let raw = json!({"name": "Goblin", "source": "MM"});
        let err = DmkitError::for_record("Goblin-MM", &raw, DmkitError::Shape("bad size".into()));
        let message = err.to_string();
        assert!(message.contains("Goblin-MM"));
        assert!(message.contains(r#""source":"MM""#));
        assert!(err.is_shape());
        assert!(!err.is_lookup());
    }
}

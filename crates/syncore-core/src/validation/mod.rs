// ── Validation schema engine ──
//
// Declarative, composable field rules over JSON payloads. Schemas are
// built once, registered by name and then shared immutably.

mod definition;
mod registry;
mod rule;
mod schema;

use std::collections::BTreeMap;

use serde::Serialize;

pub use definition::{FieldDefinition, RuleDefinition, SchemaDefinition};
pub use registry::SchemaRegistry;
pub use rule::Rule;
pub use schema::{FieldSchema, Nested, Schema, SchemaRef};

/// Outcome of validating one payload: field path to messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of fields with at least one error.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    /// Messages for `path`; empty when the field passed.
    pub fn errors_for(&self, path: &str) -> &[String] {
        self.errors.get(path).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn add(&mut self, path: &str, message: String) {
        self.errors.entry(path.to_owned()).or_default().push(message);
    }

    /// `Ok(())` when valid, otherwise the report as a [`CoreError`].
    pub fn into_result(self) -> Result<(), crate::CoreError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(crate::CoreError::Validation(self))
        }
    }
}

impl Serialize for ValidationReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Shape<'a> {
            valid: bool,
            errors: &'a BTreeMap<String, Vec<String>>,
        }
        Shape {
            valid: self.is_valid(),
            errors: &self.errors,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn report_serializes_as_valid_and_errors() {
        let mut report = ValidationReport::default();
        report.add("code", "code is required".into());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"valid": false, "errors": {"code": ["code is required"]}})
        );
        assert!(report.clone().into_result().unwrap_err().is_validation());
        assert!(ValidationReport::default().into_result().is_ok());
    }
}

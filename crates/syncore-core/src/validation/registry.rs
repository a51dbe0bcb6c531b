// ── Named schema registry ──

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::ValidationReport;
use super::schema::{Schema, run, validate_sync};
use crate::error::CoreError;

/// Schemas addressable by name, so they can embed one another by
/// reference. Registration rejects duplicates and composition cycles;
/// references to names not yet registered are allowed.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: Schema) -> Result<Arc<Schema>, CoreError> {
        let name = schema.name().to_owned();
        if self.schemas.contains_key(&name) {
            return Err(CoreError::DuplicateSchema { name });
        }

        let schema = Arc::new(schema);
        if let Some(path) = self.find_cycle(&name, &schema) {
            return Err(CoreError::SchemaCycle { path });
        }

        debug!(schema = %name, refs = ?schema.referenced_names(), "schema registered");
        self.schemas.insert(name, Arc::clone(&schema));
        Ok(schema)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, schema: Schema) -> Result<Self, CoreError> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validate `value` against the schema registered as `name`.
    pub fn validate(&self, name: &str, value: &Value) -> Result<ValidationReport, CoreError> {
        let schema = self.require(name)?;
        validate_sync(&schema, value, Some(self))
    }

    /// Validate against `name`, awaiting any asynchronous rules.
    pub async fn validate_async(&self, name: &str, value: &Value) -> Result<ValidationReport, CoreError> {
        let schema = self.require(name)?;
        run(&schema, value, Some(self)).await
    }

    /// Whether validating against `name` needs `validate_async`.
    pub fn requires_async(&self, name: &str) -> Result<bool, CoreError> {
        self.require(name)?.requires_async(Some(self))
    }

    fn require(&self, name: &str) -> Result<Arc<Schema>, CoreError> {
        self.get(name).ok_or_else(|| CoreError::SchemaNotFound {
            name: name.to_owned(),
        })
    }

    /// Depth-first search from `candidate` through named references. Any new
    /// cycle must pass through the schema being registered.
    fn find_cycle(&self, name: &str, candidate: &Schema) -> Option<Vec<String>> {
        let mut path = vec![name.to_owned()];
        self.visit(name, candidate, &mut path)
    }

    fn visit(&self, target: &str, schema: &Schema, path: &mut Vec<String>) -> Option<Vec<String>> {
        for next in schema.referenced_names() {
            if next == target {
                let mut cycle = path.clone();
                cycle.push(next);
                return Some(cycle);
            }
            if path.contains(&next) {
                continue;
            }
            if let Some(child) = self.schemas.get(&next) {
                path.push(next);
                if let Some(cycle) = self.visit(target, child, path) {
                    return Some(cycle);
                }
                path.pop();
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::validation::Rule;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(Schema::new("devise")).unwrap();
        let err = registry.register(Schema::new("devise")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateSchema { name } if name == "devise"));
    }

    #[test]
    fn composition_cycles_are_rejected() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(Schema::new("a").object("b", [], "b"))
            .unwrap();
        registry
            .register(Schema::new("b").array("c", [], "c"))
            .unwrap();
        let err = registry
            .register(Schema::new("c").object("a", [], "a"))
            .unwrap_err();
        match err {
            CoreError::SchemaCycle { path } => assert_eq!(path, ["c", "a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.contains("c"));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(Schema::new("noeud").array("enfants", [], "noeud"))
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaCycle { .. }));
    }

    #[test]
    fn named_references_resolve_at_validation_time() {
        let registry = SchemaRegistry::new()
            .with(Schema::new("facture").object("adresse", [Rule::required()], "adresse"))
            .unwrap()
            .with(Schema::new("adresse").field("ville", [Rule::required()]))
            .unwrap();

        let report = registry
            .validate("facture", &json!({"adresse": {"ville": ""}}))
            .unwrap();
        assert_eq!(report.errors_for("adresse.ville"), ["adresse.ville is required"]);
        assert_eq!(registry.names().collect::<Vec<_>>(), ["facture", "adresse"]);
    }

    #[test]
    fn unknown_schema_name() {
        let err = SchemaRegistry::new().validate("nope", &json!({})).unwrap_err();
        assert!(matches!(err, CoreError::SchemaNotFound { .. }));
    }

    #[tokio::test]
    async fn async_rules_in_referenced_schema_require_async_validation() {
        let registry = SchemaRegistry::new()
            .with(Schema::new("client").field(
                "email",
                [Rule::custom_async("unique", "{field} is taken", |v, _| async move {
                    v != json!("pris@exemple.sn")
                })],
            ))
            .unwrap()
            .with(Schema::new("commande").object("client", [], "client"))
            .unwrap();

        assert!(registry.requires_async("commande").unwrap());
        assert!(registry.validate("commande", &json!({})).is_err());
        let report = registry
            .validate_async("commande", &json!({"client": {"email": "pris@exemple.sn"}}))
            .await
            .unwrap();
        assert_eq!(report.errors_for("client.email"), ["client.email is taken"]);
    }
}

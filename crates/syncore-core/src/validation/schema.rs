// ── Validation schemas ──
//
// A schema is an immutable tree of field rules. Nested object and array
// fields may embed another schema inline or by registered name.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::ValidationReport;
use super::registry::SchemaRegistry;
use super::rule::Rule;
use crate::error::CoreError;

/// Reference to an embedded schema.
#[derive(Debug, Clone)]
pub enum SchemaRef {
    Inline(Arc<Schema>),
    /// Resolved through a [`SchemaRegistry`] at validation time.
    Named(String),
}

impl From<Schema> for SchemaRef {
    fn from(schema: Schema) -> Self {
        Self::Inline(Arc::new(schema))
    }
}

impl From<Arc<Schema>> for SchemaRef {
    fn from(schema: Arc<Schema>) -> Self {
        Self::Inline(schema)
    }
}

impl From<&str> for SchemaRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

#[derive(Debug, Clone)]
pub enum Nested {
    /// The field holds an object validated against the schema.
    Object(SchemaRef),
    /// The field holds an array whose items are validated against the schema.
    ArrayOf(SchemaRef),
}

impl Nested {
    fn schema_ref(&self) -> &SchemaRef {
        match self {
            Self::Object(r) | Self::ArrayOf(r) => r,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    /// Dotted path relative to the schema root, e.g. `adresse.ville`.
    pub path: String,
    pub rules: Vec<Rule>,
    pub nested: Option<Nested>,
}

#[derive(Debug, Clone)]
struct CrossFieldRule {
    path: String,
    rule: Rule,
}

/// Named tree of field rules.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<FieldSchema>,
    cross_field: Vec<CrossFieldRule>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            cross_field: Vec::new(),
        }
    }

    /// Add a field with rules evaluated in the given order.
    #[must_use]
    pub fn field(mut self, path: impl Into<String>, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.fields.push(FieldSchema {
            path: path.into(),
            rules: rules.into_iter().collect(),
            nested: None,
        });
        self
    }

    /// Add an object field validated against `schema` once its own rules pass.
    #[must_use]
    pub fn object(
        mut self,
        path: impl Into<String>,
        rules: impl IntoIterator<Item = Rule>,
        schema: impl Into<SchemaRef>,
    ) -> Self {
        self.fields.push(FieldSchema {
            path: path.into(),
            rules: rules.into_iter().collect(),
            nested: Some(Nested::Object(schema.into())),
        });
        self
    }

    /// Add an array field whose items are validated against `schema`.
    #[must_use]
    pub fn array(
        mut self,
        path: impl Into<String>,
        rules: impl IntoIterator<Item = Rule>,
        schema: impl Into<SchemaRef>,
    ) -> Self {
        self.fields.push(FieldSchema {
            path: path.into(),
            rules: rules.into_iter().collect(),
            nested: Some(Nested::ArrayOf(schema.into())),
        });
        self
    }

    pub(crate) fn push_field(&mut self, field: FieldSchema) {
        self.fields.push(field);
    }

    /// Add a rule evaluated against the whole payload after every field
    /// rule. Failures are reported under `path`.
    #[must_use]
    pub fn cross_field(mut self, path: impl Into<String>, rule: Rule) -> Self {
        self.cross_field.push(CrossFieldRule {
            path: path.into(),
            rule,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Names of schemas this one embeds by reference, including through
    /// inline sub-schemas.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        for field in &self.fields {
            match field.nested.as_ref().map(Nested::schema_ref) {
                Some(SchemaRef::Named(name)) => out.push(name.clone()),
                Some(SchemaRef::Inline(schema)) => schema.collect_names(out),
                None => {}
            }
        }
    }

    /// Validate a self-contained schema. Named sub-schemas need a
    /// registry; use [`SchemaRegistry::validate`] for those.
    pub fn validate(&self, value: &Value) -> Result<ValidationReport, CoreError> {
        validate_sync(self, value, None)
    }

    pub async fn validate_async(&self, value: &Value) -> Result<ValidationReport, CoreError> {
        run(self, value, None).await
    }

    pub(crate) fn requires_async(&self, registry: Option<&SchemaRegistry>) -> Result<bool, CoreError> {
        if self
            .fields
            .iter()
            .flat_map(|f| &f.rules)
            .chain(self.cross_field.iter().map(|c| &c.rule))
            .any(Rule::is_async)
        {
            return Ok(true);
        }
        for field in &self.fields {
            if let Some(nested) = &field.nested {
                if resolve(nested.schema_ref(), registry)?.requires_async(registry)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn resolve(schema: &SchemaRef, registry: Option<&SchemaRegistry>) -> Result<Arc<Schema>, CoreError> {
    match schema {
        SchemaRef::Inline(schema) => Ok(Arc::clone(schema)),
        SchemaRef::Named(name) => registry
            .and_then(|r| r.get(name))
            .ok_or_else(|| CoreError::SchemaNotFound { name: name.clone() }),
    }
}

// ── Evaluation ───────────────────────────────────────────────────────

pub(crate) fn validate_sync(
    schema: &Schema,
    value: &Value,
    registry: Option<&SchemaRegistry>,
) -> Result<ValidationReport, CoreError> {
    if schema.requires_async(registry)? {
        return Err(CoreError::AsyncRulesPresent {
            schema: schema.name.clone(),
        });
    }
    // Without async rules every await point is immediately ready.
    run(schema, value, registry)
        .now_or_never()
        .unwrap_or_else(|| Err(CoreError::Internal("synchronous validation suspended".into())))
}

pub(crate) async fn run(
    schema: &Schema,
    value: &Value,
    registry: Option<&SchemaRegistry>,
) -> Result<ValidationReport, CoreError> {
    let mut report = ValidationReport::default();
    walk(schema, value, value, "", registry, &mut report).await?;
    Ok(report)
}

fn walk<'a>(
    schema: &'a Schema,
    value: &'a Value,
    root: &'a Value,
    prefix: &'a str,
    registry: Option<&'a SchemaRegistry>,
    report: &'a mut ValidationReport,
) -> BoxFuture<'a, Result<(), CoreError>> {
    async move {
        for field in &schema.fields {
            let path = join(prefix, &field.path);
            let field_value = lookup(value, &field.path).unwrap_or(&Value::Null);

            let mut failed = false;
            for rule in &field.rules {
                if let Some(message) = rule.evaluate(&path, field_value, root).await {
                    report.add(&path, message);
                    failed = true;
                    break;
                }
            }
            if failed || field_value.is_null() {
                continue;
            }

            match &field.nested {
                None => {}
                Some(Nested::Object(sub)) => {
                    if field_value.is_object() {
                        let sub = resolve(sub, registry)?;
                        walk(&sub, field_value, root, &path, registry, report).await?;
                    } else {
                        report.add(&path, format!("{path} must be an object"));
                    }
                }
                Some(Nested::ArrayOf(sub)) => {
                    if let Some(items) = field_value.as_array() {
                        let sub = resolve(sub, registry)?;
                        for (i, item) in items.iter().enumerate() {
                            let item_path = format!("{path}[{i}]");
                            walk(&sub, item, root, &item_path, registry, report).await?;
                        }
                    } else {
                        report.add(&path, format!("{path} must be a list"));
                    }
                }
            }
        }

        for cross in &schema.cross_field {
            let path = join(prefix, &cross.path);
            // Cross-field rules always see the whole value, present or not.
            let rule = cross.rule.clone().always();
            if let Some(message) = rule.evaluate(&path, value, root).await {
                report.add(&path, message);
            }
        }
        Ok(())
    }
    .boxed()
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_owned()
    } else {
        format!("{prefix}.{path}")
    }
}

/// Resolve a dotted path against an object tree.
fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

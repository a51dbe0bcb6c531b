// ── Declarative schema definitions ──
//
// Serde-facing shape so schemas can be authored in TOML or JSON, e.g.
//
//   [[schemas]]
//   name = "devise"
//   [[schemas.fields]]
//   path = "code"
//   rules = [{ rule = "required" }, { rule = "max_length", value = 3 }]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rule::Rule;
use super::schema::{FieldSchema, Nested, Schema, SchemaRef};
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub path: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
    /// Name of a schema the object value must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Name of a schema every array item must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleDefinition {
    Required {
        #[serde(default)]
        message: Option<String>,
    },
    MinLength {
        value: usize,
        #[serde(default)]
        message: Option<String>,
    },
    MaxLength {
        value: usize,
        #[serde(default)]
        message: Option<String>,
    },
    Pattern {
        regex: String,
        #[serde(default)]
        message: Option<String>,
    },
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        message: Option<String>,
    },
    Email {
        #[serde(default)]
        message: Option<String>,
    },
    OneOf {
        values: Vec<Value>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl RuleDefinition {
    pub fn to_rule(&self, field: &str) -> Result<Rule, CoreError> {
        let (rule, message) = match self {
            Self::Required { message } => (Rule::required(), message),
            Self::MinLength { value, message } => (Rule::min_length(*value), message),
            Self::MaxLength { value, message } => (Rule::max_length(*value), message),
            Self::Pattern { regex, message } => {
                let rule = Rule::pattern(regex).map_err(|e| match e {
                    CoreError::InvalidRule { reason, .. } => CoreError::InvalidRule {
                        field: field.to_owned(),
                        reason,
                    },
                    other => other,
                })?;
                (rule, message)
            }
            Self::Range { min, max, message } => {
                if min.is_none() && max.is_none() {
                    return Err(CoreError::InvalidRule {
                        field: field.to_owned(),
                        reason: "range needs at least one of min or max".into(),
                    });
                }
                (Rule::bounded(*min, *max), message)
            }
            Self::Email { message } => (Rule::email(), message),
            Self::OneOf { values, message } => (Rule::one_of(values.iter().cloned()), message),
        };
        Ok(match message {
            Some(template) => rule.with_message(template.clone()),
            None => rule,
        })
    }
}

impl SchemaDefinition {
    pub fn into_schema(self) -> Result<Schema, CoreError> {
        let mut schema = Schema::new(self.name);
        for field in self.fields {
            let rules = field
                .rules
                .iter()
                .map(|r| r.to_rule(&field.path))
                .collect::<Result<Vec<_>, _>>()?;
            let nested = match (field.object, field.array_of) {
                (Some(_), Some(_)) => {
                    return Err(CoreError::InvalidRule {
                        field: field.path,
                        reason: "a field cannot be both `object` and `array_of`".into(),
                    });
                }
                (Some(name), None) => Some(Nested::Object(SchemaRef::Named(name))),
                (None, Some(name)) => Some(Nested::ArrayOf(SchemaRef::Named(name))),
                (None, None) => None,
            };
            schema.push_field(FieldSchema {
                path: field.path,
                rules,
                nested,
            });
        }
        Ok(schema)
    }
}

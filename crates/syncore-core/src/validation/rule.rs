// ── Validation rules ──
//
// A rule is a predicate plus a message template. Templates may reference
// `{field}` (the error path), `{unit}` ("items" for arrays, "characters"
// otherwise) and any parameter the rule was built with, e.g. `{max}` for
// `max_length`.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use regex::Regex;
use serde_json::Value;

use crate::error::CoreError;

type SyncCheck = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;
type AsyncCheck = Arc<dyn Fn(Value, Value) -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Check {
    Sync(SyncCheck),
    Async(AsyncCheck),
}

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// One predicate over a field value.
///
/// Predicates receive the field value and the whole candidate payload.
/// Rules other than [`required`](Self::required) pass on absent values
/// (missing, `null` or the empty string) so optional fields can still carry
/// format rules.
#[derive(Clone)]
pub struct Rule {
    name: String,
    message: String,
    params: Vec<(&'static str, String)>,
    check: Check,
    checks_absent: bool,
}

impl Rule {
    fn sync(
        name: &str,
        message: &str,
        params: Vec<(&'static str, String)>,
        check: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_owned(),
            message: message.to_owned(),
            params,
            check: Check::Sync(Arc::new(check)),
            checks_absent: false,
        }
    }

    // ── Built-ins ────────────────────────────────────────────────────

    /// Fails on missing, `null`, blank strings and empty arrays.
    pub fn required() -> Self {
        let mut rule = Self::sync("required", "{field} is required", Vec::new(), |v, _| {
            !is_absent(v) && !v.as_array().is_some_and(Vec::is_empty)
        });
        rule.checks_absent = true;
        rule
    }

    /// Minimum length in characters (strings) or items (arrays).
    pub fn min_length(min: usize) -> Self {
        Self::sync(
            "min_length",
            "{field} must be at least {min} {unit}",
            vec![("min", min.to_string())],
            move |v, _| length(v).is_some_and(|n| n >= min),
        )
    }

    /// Maximum length in characters (strings) or items (arrays).
    pub fn max_length(max: usize) -> Self {
        Self::sync(
            "max_length",
            "{field} must be at most {max} {unit}",
            vec![("max", max.to_string())],
            move |v, _| length(v).is_some_and(|n| n <= max),
        )
    }

    /// String must match `pattern` (unanchored unless the pattern anchors).
    pub fn pattern(pattern: &str) -> Result<Self, CoreError> {
        let re = Regex::new(pattern).map_err(|e| CoreError::InvalidRule {
            field: String::new(),
            reason: format!("invalid pattern '{pattern}': {e}"),
        })?;
        Ok(Self::sync(
            "pattern",
            "{field} has an invalid format",
            vec![("pattern", pattern.to_owned())],
            move |v, _| v.as_str().is_some_and(|s| re.is_match(s)),
        ))
    }

    /// Numeric value within `[min, max]`.
    pub fn range(min: f64, max: f64) -> Self {
        Self::bounded(Some(min), Some(max))
    }

    pub fn at_least(min: f64) -> Self {
        Self::bounded(Some(min), None)
    }

    pub fn at_most(max: f64) -> Self {
        Self::bounded(None, Some(max))
    }

    pub(crate) fn bounded(min: Option<f64>, max: Option<f64>) -> Self {
        let (message, mut params) = match (min, max) {
            (Some(_), Some(_)) => ("{field} must be between {min} and {max}", Vec::new()),
            (Some(_), None) => ("{field} must be at least {min}", Vec::new()),
            (None, Some(_)) => ("{field} must be at most {max}", Vec::new()),
            (None, None) => ("{field} must be a number", Vec::new()),
        };
        if let Some(min) = min {
            params.push(("min", min.to_string()));
        }
        if let Some(max) = max {
            params.push(("max", max.to_string()));
        }
        Self::sync("range", message, params, move |v, _| {
            v.as_f64().is_some_and(|n| {
                min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi)
            })
        })
    }

    pub fn email() -> Self {
        Self::sync(
            "email",
            "{field} must be a valid email address",
            Vec::new(),
            |v, _| {
                v.as_str()
                    .zip(EMAIL.as_ref())
                    .is_some_and(|(s, re)| re.is_match(s))
            },
        )
    }

    /// Value must equal one of `allowed`.
    pub fn one_of<I, V>(allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let allowed: Vec<Value> = allowed.into_iter().map(Into::into).collect();
        let listed = allowed
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
            .collect::<Vec<_>>()
            .join(", ");
        Self::sync(
            "one_of",
            "{field} must be one of: {allowed}",
            vec![("allowed", listed)],
            move |v, _| allowed.contains(v),
        )
    }

    /// Synchronous predicate over `(field value, whole payload)`.
    pub fn custom(
        name: &str,
        message: &str,
        check: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::sync(name, message, Vec::new(), check)
    }

    /// Asynchronous predicate, e.g. a server-side uniqueness lookup.
    /// Schemas containing one must be validated with `validate_async`.
    pub fn custom_async<F, Fut>(name: &str, message: &str, check: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            name: name.to_owned(),
            message: message.to_owned(),
            params: Vec::new(),
            check: Check::Async(Arc::new(move |v, root| check(v, root).boxed())),
            checks_absent: false,
        }
    }

    // ── Modifiers ────────────────────────────────────────────────────

    /// Replace the message template.
    #[must_use]
    pub fn with_message(mut self, template: impl Into<String>) -> Self {
        self.message = template.into();
        self
    }

    /// Run this rule even when the value is absent.
    #[must_use]
    pub fn always(mut self) -> Self {
        self.checks_absent = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        matches!(self.check, Check::Async(_))
    }

    // ── Evaluation ───────────────────────────────────────────────────

    /// `None` when the rule passes, otherwise the rendered message.
    pub(crate) async fn evaluate(&self, field: &str, value: &Value, root: &Value) -> Option<String> {
        if !self.checks_absent && is_absent(value) {
            return None;
        }
        let passed = match &self.check {
            Check::Sync(f) => f(value, root),
            Check::Async(f) => f(value.clone(), root.clone()).await,
        };
        (!passed).then(|| self.render(field, value))
    }

    fn render(&self, field: &str, value: &Value) -> String {
        let unit = if value.is_array() { "items" } else { "characters" };
        let mut out = self.message.replace("{field}", field).replace("{unit}", unit);
        for (name, value) in &self.params {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("async", &self.is_async())
            .finish_non_exhaustive()
    }
}

/// Missing, `null`, or a blank string.
pub(crate) fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;

    fn check(rule: &Rule, value: &Value) -> Option<String> {
        rule.evaluate("code", value, &Value::Null)
            .now_or_never()
            .unwrap()
    }

    #[test]
    fn required_rejects_blank_values() {
        let rule = Rule::required();
        for blank in [json!(null), json!(""), json!("   "), json!([])] {
            assert_eq!(check(&rule, &blank).as_deref(), Some("code is required"));
        }
        assert!(check(&rule, &json!("USD")).is_none());
        assert!(check(&rule, &json!(0)).is_none());
        assert!(check(&rule, &json!(false)).is_none());
    }

    #[test]
    fn length_rules_count_characters() {
        assert!(check(&Rule::max_length(3), &json!("été")).is_none());
        assert_eq!(
            check(&Rule::max_length(3), &json!("EURO")).as_deref(),
            Some("code must be at most 3 characters")
        );
        assert_eq!(
            check(&Rule::min_length(2), &json!("E")).as_deref(),
            Some("code must be at least 2 characters")
        );
        assert!(check(&Rule::min_length(2), &json!([1, 2])).is_none());
    }

    #[test]
    fn length_rules_count_items_in_arrays() {
        assert_eq!(
            check(&Rule::min_length(2), &json!([1])).as_deref(),
            Some("code must be at least 2 items")
        );
        assert_eq!(
            check(&Rule::max_length(1), &json!(["a", "b"])).as_deref(),
            Some("code must be at most 1 items")
        );
    }

    #[test]
    fn optional_values_skip_format_rules() {
        assert!(check(&Rule::email(), &json!(null)).is_none());
        assert!(check(&Rule::email(), &json!("")).is_none());
        assert!(check(&Rule::min_length(5).always(), &json!("")).is_some());
    }

    #[test]
    fn pattern_and_email() {
        let rule = Rule::pattern("^[A-Z]{3}$").unwrap();
        assert!(check(&rule, &json!("XOF")).is_none());
        assert!(check(&rule, &json!("xof")).is_some());
        assert!(Rule::pattern("(").is_err());

        assert!(check(&Rule::email(), &json!("compta@exemple.sn")).is_none());
        assert!(check(&Rule::email(), &json!("compta@")).is_some());
    }

    #[test]
    fn range_and_one_of_render_params() {
        assert_eq!(
            check(&Rule::range(1.0, 12.0), &json!(13)).as_deref(),
            Some("code must be between 1 and 12")
        );
        assert!(check(&Rule::at_least(0.0), &json!(0)).is_none());
        assert_eq!(
            check(&Rule::one_of(["USD", "EUR"]), &json!("XOF")).as_deref(),
            Some("code must be one of: USD, EUR")
        );
    }

    #[test]
    fn custom_message_template() {
        let rule = Rule::custom("even", "{field} doit être pair", |v, _| {
            v.as_i64().is_some_and(|n| n % 2 == 0)
        });
        assert_eq!(check(&rule, &json!(3)).as_deref(), Some("code doit être pair"));
        let renamed = Rule::max_length(2).with_message("{field}: {max} max");
        assert_eq!(check(&renamed, &json!("abc")).as_deref(), Some("code: 2 max"));
    }

    #[tokio::test]
    async fn async_rule_is_awaited() {
        let rule = Rule::custom_async("unique", "{field} is already taken", |v, _| async move {
            v != json!("USD")
        });
        assert!(rule.is_async());
        assert!(rule.evaluate("code", &json!("XOF"), &Value::Null).await.is_none());
        assert_eq!(
            rule.evaluate("code", &json!("USD"), &Value::Null).await.as_deref(),
            Some("code is already taken")
        );
    }
}

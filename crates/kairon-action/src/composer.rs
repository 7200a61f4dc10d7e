//! Response composer.
//!
//! Renders `${dotted.path}` templates against a JSON data object and fills
//! slots from response paths. Script-mode templates are delegated to the
//! sandbox with `data` bound to the data object.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{json, Map, Value};

use kairon_core::types::BotUtterance;

use crate::error::ActionError;
use crate::sandbox::Sandbox;
use crate::types::{DispatchType, EvaluationType, ResponseTemplate, SlotAssignment};

/// Matches `${...}` placeholders.
pub static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Macro expanded to the whole data object.
pub const RESPONSE_MACRO: &str = "RESPONSE";

/// Walk a dotted path. Numeric segments index arrays, everything else
/// looks up object keys.
pub fn walk<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a value for inlining into text: strings raw, everything else
/// as JSON.
pub fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expand every placeholder in `template` against `data`.
///
/// Fails with `Templating` on the first placeholder that does not resolve.
pub fn render_expression(template: &str, data: &Value) -> Result<String, ActionError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        let path = path.as_str().trim();
        if path == RESPONSE_MACRO {
            out.push_str(&data.to_string());
        } else {
            let value = walk(data, path).ok_or_else(|| {
                ActionError::Templating(format!("Unable to resolve placeholder '${{{}}}'", path))
            })?;
            out.push_str(&inline(value));
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Value of an expression-mode slot assignment.
///
/// Templates (anything containing `${`) are rendered; plain values are
/// treated as a path and yield null when absent.
pub fn evaluate_slot_expression(expr: &str, data: &Value) -> Result<Value, ActionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(Value::Null);
    }
    if expr.contains("${") {
        return render_expression(expr, data).map(Value::String);
    }
    Ok(walk(data, expr).cloned().unwrap_or(Value::Null))
}

/// Build the outbound message for a composed value.
pub fn to_utterance(value: &Value, dispatch_type: DispatchType) -> BotUtterance {
    match dispatch_type {
        DispatchType::Text => BotUtterance::text(inline(value)),
        DispatchType::Json => match value {
            Value::String(s) => BotUtterance::custom(
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            ),
            other => BotUtterance::custom(other.clone()),
        },
    }
}

/// Result of composing one response template.
#[derive(Debug, Clone, PartialEq)]
pub struct Composed {
    pub value: Value,
    pub log: Value,
    pub elapsed_ms: u64,
}

impl Composed {
    pub fn text(&self) -> String {
        inline(&self.value)
    }
}

/// Composes responses and slot values for one invocation.
pub struct ResponseComposer<'a> {
    sandbox: &'a Sandbox,
    locals: Map<String, Value>,
    timeout: Duration,
}

impl<'a> ResponseComposer<'a> {
    /// `locals` are the script-visible context fields.
    pub fn new(sandbox: &'a Sandbox, locals: Map<String, Value>, timeout: Duration) -> Self {
        Self {
            sandbox,
            locals,
            timeout,
        }
    }

    async fn run_script(&self, source: &str, data: &Value) -> Result<Value, ActionError> {
        let mut locals = self.locals.clone();
        locals.insert("data".to_string(), data.clone());
        let scope = self.sandbox.run_script(source, locals, self.timeout).await?;
        Ok(scope.get("bot_response").cloned().unwrap_or(Value::Null))
    }

    pub async fn compose(
        &self,
        template: &ResponseTemplate,
        data: &Value,
    ) -> Result<Composed, ActionError> {
        let started = Instant::now();
        let value = match template.evaluation_type {
            EvaluationType::Expression => Value::String(render_expression(&template.value, data)?),
            EvaluationType::Script => self.run_script(&template.value, data).await?,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let log = json!({
            "evaluation_type": template.evaluation_type,
            "expression": template.value,
            "data": data,
            "result": value,
            "time_elapsed": elapsed_ms,
        });
        Ok(Composed {
            value,
            log,
            elapsed_ms,
        })
    }

    /// Evaluate every assignment against `data`, in order.
    pub async fn fill_slots(
        &self,
        assignments: &[SlotAssignment],
        data: &Value,
    ) -> Result<Vec<(String, Value)>, ActionError> {
        let mut filled = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let value = match assignment.evaluation_type {
                EvaluationType::Expression => evaluate_slot_expression(&assignment.value, data)?,
                EvaluationType::Script => self.run_script(&assignment.value, data).await?,
            };
            filled.push((assignment.name.clone(), value));
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairon_core::config::SandboxConfig;

    fn sample() -> Value {
        json!({
            "data": {
                "name": "Ada",
                "address": {"city": "London", "zip": 12345},
                "tags": ["a", "b"],
                "items": [{"id": 1}, {"id": 2}],
                "nothing": null
            },
            "http_status_code": 200
        })
    }

    #[test]
    fn test_walk_objects_and_arrays() {
        let data = sample();
        assert_eq!(walk(&data, "data.name"), Some(&json!("Ada")));
        assert_eq!(walk(&data, "data.items.1.id"), Some(&json!(2)));
        assert_eq!(walk(&data, "data.tags.0"), Some(&json!("a")));
        assert_eq!(walk(&data, "data.tags.9"), None);
        assert_eq!(walk(&data, "data.name.first"), None);
        assert_eq!(walk(&data, "data.items.x"), None);
    }

    #[test]
    fn test_render_inlines_scalars_raw() {
        let out = render_expression("Hello ${data.name} from ${data.address.zip}!", &sample()).unwrap();
        assert_eq!(out, "Hello Ada from 12345!");
    }

    #[test]
    fn test_render_encodes_objects_and_null() {
        let data = sample();
        let out = render_expression("${data.address}|${data.tags}|${data.nothing}", &data).unwrap();
        assert_eq!(
            out,
            format!(
                "{}|{}|null",
                walk(&data, "data.address").unwrap(),
                walk(&data, "data.tags").unwrap()
            )
        );
    }

    #[test]
    fn test_render_response_macro() {
        let data = json!({"a": 1});
        assert_eq!(render_expression("got ${RESPONSE}", &data).unwrap(), r#"got {"a":1}"#);
    }

    #[test]
    fn test_render_unresolved_placeholder_fails() {
        let err = render_expression("Hi ${data.missing}", &sample()).unwrap_err();
        assert!(matches!(err, ActionError::Templating(_)));
        assert!(err.to_string().contains("data.missing"));
    }

    #[test]
    fn test_render_without_placeholders() {
        assert_eq!(render_expression("plain", &sample()).unwrap(), "plain");
        assert_eq!(render_expression("", &sample()).unwrap(), "");
    }

    #[test]
    fn test_substitution_equals_walk() {
        let data = sample();
        for path in ["data.name", "data.address", "data.items.0", "http_status_code"] {
            let rendered = render_expression(&format!("${{{}}}", path), &data).unwrap();
            assert_eq!(rendered, inline(walk(&data, path).unwrap()));
        }
    }

    #[test]
    fn test_slot_expression_paths_and_templates() {
        let data = sample();
        assert_eq!(evaluate_slot_expression("data.address.city", &data).unwrap(), json!("London"));
        assert_eq!(evaluate_slot_expression("data.nope", &data).unwrap(), Value::Null);
        assert_eq!(evaluate_slot_expression("", &data).unwrap(), Value::Null);
        assert_eq!(
            evaluate_slot_expression("${data.name}!", &data).unwrap(),
            json!("Ada!")
        );
    }

    #[test]
    fn test_to_utterance() {
        let text = to_utterance(&json!("hi"), DispatchType::Text);
        assert_eq!(text.text.as_deref(), Some("hi"));

        let custom = to_utterance(&json!(r#"{"card": 1}"#), DispatchType::Json);
        assert_eq!(custom.custom, Some(json!({"card": 1})));

        let custom = to_utterance(&json!({"card": 2}), DispatchType::Json);
        assert_eq!(custom.custom, Some(json!({"card": 2})));

        let text = to_utterance(&json!({"k": "v"}), DispatchType::Text);
        assert_eq!(text.text.as_deref(), Some(r#"{"k":"v"}"#));
    }

    #[tokio::test]
    async fn test_compose_expression_and_script() {
        let sandbox = Sandbox::new(&SandboxConfig::default());
        let mut locals = Map::new();
        locals.insert("slots".into(), json!({"x": 3}));
        let composer = ResponseComposer::new(&sandbox, locals, Duration::from_secs(5));

        let composed = composer
            .compose(&ResponseTemplate::expression("Hello ${data.name}!"), &sample())
            .await
            .unwrap();
        assert_eq!(composed.value, json!("Hello Ada!"));
        assert_eq!(composed.log["result"], json!("Hello Ada!"));

        let composed = composer
            .compose(
                &ResponseTemplate::script(r#"bot_response = data.data.name + "/" + str(slots["x"] * 2);"#),
                &sample(),
            )
            .await
            .unwrap();
        assert_eq!(composed.text(), "Ada/6");
    }

    #[tokio::test]
    async fn test_fill_slots_mixed() {
        let sandbox = Sandbox::new(&SandboxConfig::default());
        let composer = ResponseComposer::new(&sandbox, Map::new(), Duration::from_secs(5));
        let assignments = vec![
            SlotAssignment::path("city", "data.address.city"),
            SlotAssignment::path("missing", "data.nope"),
            SlotAssignment {
                name: "count".into(),
                value: "bot_response = data.data.items.len();".into(),
                evaluation_type: EvaluationType::Script,
            },
        ];
        let filled = composer.fill_slots(&assignments, &sample()).await.unwrap();
        assert_eq!(
            filled,
            vec![
                ("city".to_string(), json!("London")),
                ("missing".to_string(), Value::Null),
                ("count".to_string(), json!(2)),
            ]
        );
    }
}

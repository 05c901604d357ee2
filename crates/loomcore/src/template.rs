//! Placeholder rendering for node configuration strings.
//!
//! Templates use `{{ dotted.path }}` lookups into the execution context.
//! Unresolved paths and nulls render as empty strings. Only `{{ }}` is
//! template syntax: `{%` and `{#` elsewhere are literal text, as JSON bodies
//! often contain them. The `json` helper pretty-prints a referenced value so
//! it can be embedded in a request body:
//!
//! ```text
//! {"user": {{ json(fetch.data.user) }}}
//! {"user": {{ fetch.data.user | json }}}
//! {"user": {{json fetch.data.user}}}
//! ```

use crate::{ExecutionContext, NodeError};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Renders templates against an execution context.
///
/// Each renderer owns its environment and helpers; nothing is registered
/// process-wide.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_formatter(|out, state, value| {
            if value.is_none() || value.is_undefined() {
                Ok(())
            } else {
                minijinja::escape_formatter(out, state, value)
            }
        });
        env.add_filter("json", json_helper);
        env.add_function("json", json_helper);
        Self { env }
    }

    /// Substitute placeholders. Only malformed template syntax fails.
    pub fn render(&self, template: &str, context: &ExecutionContext) -> Result<String, NodeError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }

        let source = rewrite_helper_calls(template);
        let source = escape_stray_delimiters(&source);
        self.env
            .render_str(&source, context.as_map())
            .map_err(|e| NodeError::Template(format!("cannot render '{}': {}", template, e)))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn json_helper(value: minijinja::Value) -> Result<minijinja::Value, minijinja::Error> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(minijinja::Value::from_safe_string(text))
}

/// Turn helper-style `{{json a.b}}` into the call form `{{ json(a.b) }}`
fn rewrite_helper_calls(template: &str) -> Cow<'_, str> {
    static HELPER: OnceLock<Regex> = OnceLock::new();
    let re = HELPER.get_or_init(|| {
        Regex::new(r"\{\{\s*json\s+([A-Za-z_$][\w$.\[\]]*)\s*\}\}").expect("helper pattern is valid")
    });
    re.replace_all(template, "{{ json($1) }}")
}

/// Quote `{%` and `{#` found outside `{{ }}` so they render as themselves
fn escape_stray_delimiters(template: &str) -> Cow<'_, str> {
    if !template.contains("{%") && !template.contains("{#") {
        return Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            // An unclosed expression is left for minijinja to reject
            let end = tail.find("}}").map_or(tail.len(), |i| i + 2);
            out.push_str(&tail[..end]);
            rest = &tail[end..];
        } else if tail.starts_with("{%") || tail.starts_with("{#") {
            out.push_str("{{ \"");
            out.push_str(&tail[..2]);
            out.push_str("\" }}");
            rest = &tail[2..];
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

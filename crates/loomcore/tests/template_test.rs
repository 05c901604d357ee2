use loomcore::{ErrorCategory, ExecutionContext, NodeError, TemplateRenderer};
use serde_json::json;

fn context(value: serde_json::Value) -> ExecutionContext {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_dotted_path_resolves() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "a": { "b": "x" } }));

    assert_eq!(renderer.render("{{a.b}}", &ctx).unwrap(), "x");
    assert_eq!(renderer.render("{{ a.b }}", &ctx).unwrap(), "x");
}

#[test]
fn test_unresolved_path_renders_empty() {
    let renderer = TemplateRenderer::new();
    let ctx = ExecutionContext::new();

    assert_eq!(renderer.render("{{a.b}}", &ctx).unwrap(), "");
    assert_eq!(renderer.render("id={{ a.b.c.d }};", &ctx).unwrap(), "id=;");
}

#[test]
fn test_endpoint_template() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "T": { "id": "42" } }));

    let url = renderer.render("https://api.example.com/{{T.id}}", &ctx).unwrap();
    assert_eq!(url, "https://api.example.com/42");
}

#[test]
fn test_plain_text_passes_through() {
    let renderer = TemplateRenderer::new();
    let text = r#"{"a": 1}"#;
    assert_eq!(renderer.render(text, &ExecutionContext::new()).unwrap(), text);
}

#[test]
fn test_json_helper_pretty_prints() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "user": { "name": "ada", "tags": ["x"] } }));
    let expected = serde_json::to_string_pretty(&json!({ "name": "ada", "tags": ["x"] })).unwrap();

    for template in ["{{ json(user) }}", "{{ user | json }}", "{{json user}}"] {
        let rendered = renderer.render(template, &ctx).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({ "name": "ada", "tags": ["x"] }), "template {}", template);
        assert_eq!(rendered, expected, "template {}", template);
    }
}

#[test]
fn test_json_helper_embeds_into_body() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "fetch": { "data": { "id": 7 } } }));

    let body = renderer.render(r#"{"payload": {{json fetch.data}}}"#, &ctx).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed, json!({ "payload": { "id": 7 } }));
}

#[test]
fn test_no_html_escaping() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "q": "a&b<c>" }));
    assert_eq!(renderer.render("?q={{q}}", &ctx).unwrap(), "?q=a&b<c>");
}

#[test]
fn test_malformed_template_is_configuration_error() {
    let renderer = TemplateRenderer::new();
    let err = renderer.render("{{ a.b ", &ExecutionContext::new()).unwrap_err();

    assert!(matches!(err, NodeError::Template(_)));
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!err.is_retriable());
}

#[test]
fn test_renderers_are_independent() {
    let first = TemplateRenderer::new();
    let second = TemplateRenderer::default();
    let ctx = context(json!({ "v": 1 }));

    assert_eq!(first.render("{{ v | json }}", &ctx).unwrap(), "1");
    assert_eq!(second.render("{{ v | json }}", &ctx).unwrap(), "1");
}

#[test]
fn test_null_renders_empty() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "n": { "v": null } }));

    assert_eq!(renderer.render("x={{n.v}}", &ctx).unwrap(), "x=");
    assert_eq!(renderer.render("{{ n.v | json }}", &ctx).unwrap(), "null");
}

#[test]
fn test_block_and_comment_openers_are_literal() {
    let renderer = TemplateRenderer::new();
    let ctx = context(json!({ "n": { "v": "7" } }));

    let body = renderer
        .render(r#"{"id":"{{n.v}}","tag":"{#1","pct":"{%x"}"#, &ctx)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed, json!({ "id": "7", "tag": "{#1", "pct": "{%x" }));

    let text = r#"{"tag":"{#1"}"#;
    assert_eq!(renderer.render(text, &ctx).unwrap(), text);
}

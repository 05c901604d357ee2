use async_trait::async_trait;
use loomcore::{
    ContextPatch, ErrorCategory, EventEmitter, ExecutionContext, MemoryJournal, Node, NodeContext, NodeError,
    RetryPolicy, StepJournal, StepRunner, TemplateRenderer,
};
use loomnodes::{HttpMethod, HttpRequest, HttpRequestNode, HttpResponse, HttpTransport, ReqwestTransport};
use loomruntime::{HttpSettings, NodeRegistry};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Records every request and replays scripted responses
#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<HttpRequest>>,
    script: Mutex<VecDeque<Result<HttpResponse, NodeError>>>,
}

impl RecordingTransport {
    fn scripted(responses: Vec<Result<HttpResponse, NodeError>>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(responses.into()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NodeError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json_response(200, r#"{"ok":true}"#)))
    }
}

fn json_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        status_text: if status == 200 { "OK".into() } else { "Service Unavailable".into() },
        content_type: Some("application/json; charset=utf-8".into()),
        body: body.to_string(),
    }
}

fn node_context(data: Value, seed: Value, journal: Arc<MemoryJournal>) -> NodeContext {
    let seed = match seed {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let policy = RetryPolicy {
        max_attempts: 3,
        delay_ms: 1,
        backoff_multiplier: 1.0,
        max_delay_ms: 1,
    };
    NodeContext {
        node_id: "H".to_string(),
        data,
        context: ExecutionContext::from_seed(seed),
        renderer: Arc::new(TemplateRenderer::new()),
        steps: StepRunner::new(journal, "run-1", "H", policy, EventEmitter::detached("run-1", "H")),
        events: EventEmitter::detached("run-1", "H"),
    }
}

fn has_header(request: &HttpRequest, name: &str) -> bool {
    request.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

#[tokio::test]
async fn test_get_sends_no_body_and_no_content_type() {
    let transport = RecordingTransport::scripted(vec![]);
    let node = HttpRequestNode::new(transport.clone());
    let ctx = node_context(
        json!({ "endpoint": "https://api.example.com/users/{{ user.id }}", "method": "GET", "variableName": "resp" }),
        json!({ "user": { "id": 7 } }),
        Arc::new(MemoryJournal::new()),
    );

    let output = node.execute(ctx).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(requests[0].url, "https://api.example.com/users/7");
    assert!(requests[0].body.is_none());
    assert!(!has_header(&requests[0], "content-type"));

    assert_eq!(
        output.patch,
        ContextPatch::Set {
            key: "resp".to_string(),
            value: json!({ "status": 200, "statusText": "OK", "data": { "ok": true } }),
        }
    );
}

#[tokio::test]
async fn test_post_renders_json_body() {
    let transport = RecordingTransport::scripted(vec![]);
    let node = HttpRequestNode::new(transport.clone());
    let ctx = node_context(
        json!({
            "endpoint": "https://api.example.com/orders",
            "method": "POST",
            "body": "{\"order\": {{ json(order) }}}",
            "variableName": "created"
        }),
        json!({ "order": { "sku": "a-1", "qty": 2 } }),
        Arc::new(MemoryJournal::new()),
    );

    node.execute(ctx).await.unwrap();

    let requests = transport.requests();
    let body: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({ "order": { "sku": "a-1", "qty": 2 } }));
    assert!(requests[0]
        .headers
        .iter()
        .any(|(n, v)| n == "Content-Type" && v == "application/json"));
}

#[tokio::test]
async fn test_body_defaults_to_empty_object() {
    let transport = RecordingTransport::scripted(vec![]);
    let node = HttpRequestNode::new(transport.clone());
    let ctx = node_context(
        json!({ "endpoint": "https://api.example.com/ping", "method": "PUT", "variableName": "r" }),
        json!({}),
        Arc::new(MemoryJournal::new()),
    );

    node.execute(ctx).await.unwrap();

    assert_eq!(transport.requests()[0].body.as_deref(), Some("{}"));
}

#[tokio::test]
async fn test_invalid_json_body_is_never_sent() {
    let transport = RecordingTransport::scripted(vec![]);
    let node = HttpRequestNode::new(transport.clone());
    let journal = Arc::new(MemoryJournal::new());
    let ctx = node_context(
        json!({
            "endpoint": "https://api.example.com/orders",
            "method": "POST",
            "body": "{ not json {{ x }}",
            "variableName": "r"
        }),
        json!({ "x": 1 }),
        journal.clone(),
    );

    let err = node.execute(ctx).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(transport.requests().is_empty());
    assert!(journal.records("run-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unparseable_endpoint_is_configuration_error() {
    let transport = RecordingTransport::scripted(vec![]);
    let node = HttpRequestNode::new(transport.clone());
    let ctx = node_context(
        json!({ "endpoint": "{{ base }}/x", "method": "GET", "variableName": "r" }),
        json!({}),
        Arc::new(MemoryJournal::new()),
    );

    let err = node.execute(ctx).await.unwrap_err();

    assert!(matches!(err, NodeError::Configuration(_)));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_server_error_is_retried_then_succeeds() {
    let transport = RecordingTransport::scripted(vec![
        Ok(json_response(503, "")),
        Ok(json_response(200, r#"{"n":1}"#)),
    ]);
    let node = HttpRequestNode::new(transport.clone());
    let journal = Arc::new(MemoryJournal::new());
    let ctx = node_context(
        json!({ "endpoint": "https://api.example.com", "method": "GET", "variableName": "r" }),
        json!({}),
        journal.clone(),
    );

    node.execute(ctx).await.unwrap();

    assert_eq!(transport.requests().len(), 2);
    let committed = journal.load("run-1", "H/http_request").await.unwrap().unwrap();
    assert_eq!(committed["data"], json!({ "n": 1 }));
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_retries() {
    let transport = RecordingTransport::scripted(vec![
        Ok(json_response(503, "")),
        Ok(json_response(503, "")),
        Ok(json_response(503, "")),
    ]);
    let node = HttpRequestNode::new(transport.clone());
    let ctx = node_context(
        json!({ "endpoint": "https://api.example.com", "method": "DELETE", "variableName": "r" }),
        json!({}),
        Arc::new(MemoryJournal::new()),
    );

    let err = node.execute(ctx).await.unwrap_err();

    assert!(matches!(err, NodeError::RetriesExhausted { attempts: 3, .. }));
    assert!(!err.is_retriable());
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn test_malformed_json_response_is_not_retried() {
    let transport = RecordingTransport::scripted(vec![Ok(json_response(200, "{oops"))]);
    let node = HttpRequestNode::new(transport.clone());
    let ctx = node_context(
        json!({ "endpoint": "https://api.example.com", "method": "GET", "variableName": "r" }),
        json!({}),
        Arc::new(MemoryJournal::new()),
    );

    let err = node.execute(ctx).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Parse);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_text_response_kept_as_string() {
    let transport = RecordingTransport::scripted(vec![Ok(HttpResponse {
        status: 200,
        status_text: "OK".into(),
        content_type: Some("text/plain".into()),
        body: "pong".into(),
    })]);
    let node = HttpRequestNode::new(transport);
    let ctx = node_context(
        json!({ "endpoint": "https://api.example.com/ping", "method": "GET", "variableName": "r" }),
        json!({}),
        Arc::new(MemoryJournal::new()),
    );

    let output = node.execute(ctx).await.unwrap();

    match output.patch {
        ContextPatch::Set { value, .. } => assert_eq!(value["data"], json!("pong")),
        other => panic!("unexpected patch {:?}", other),
    }
}

#[tokio::test]
async fn test_validate_rejects_incomplete_configuration() {
    let node = HttpRequestNode::new(RecordingTransport::scripted(vec![]));

    let cases = [
        json!({ "method": "GET", "variableName": "r" }),
        json!({ "endpoint": "https://x", "method": "GET" }),
        json!({ "endpoint": "https://x", "variableName": "r" }),
        json!({ "endpoint": "https://x", "method": "FETCH", "variableName": "r" }),
        json!({ "endpoint": "https://x", "method": "GET", "variableName": "1st" }),
        json!({ "endpoint": "https://x", "method": "GET", "variableName": "a-b" }),
        json!({ "endpoint": "   ", "method": "GET", "variableName": "r" }),
    ];

    for data in cases {
        let err = node.validate(&data).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration, "{}", data);
    }

    node.validate(&json!({ "endpoint": "https://x", "method": "GET", "variableName": "$res_1" }))
        .unwrap();
}

/// Serves one canned response and hands back the raw request text
async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + content_length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).to_string()
    });

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_reqwest_transport_round_trip() {
    let (base, server) = one_shot_server(
        "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"id\":\"9\"}\n",
    )
    .await;

    let settings = HttpSettings {
        timeout_secs: 5,
        user_agent: "loom-test/1".to_string(),
    };
    let transport = ReqwestTransport::new(&settings).unwrap();
    let response = transport
        .send(HttpRequest {
            method: HttpMethod::Post,
            url: format!("{}/items", base),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(r#"{"name":"x"}"#.to_string()),
        })
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.status_text, "Created");
    assert_eq!(response.content_type.as_deref(), Some("application/json"));
    assert_eq!(response.body.trim(), r#"{"id":"9"}"#);

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /items HTTP/1.1"));
    assert!(raw.to_ascii_lowercase().contains("user-agent: loom-test/1"));
    assert!(raw.ends_with(r#"{"name":"x"}"#));
}

#[tokio::test]
async fn test_reqwest_transport_refused_connection_is_transient() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = ReqwestTransport::new(&HttpSettings::default()).unwrap();
    let err = transport
        .send(HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://{}/", addr),
            headers: vec![],
            body: None,
        })
        .await
        .unwrap_err();

    assert!(err.is_retriable());
}

#[test]
fn test_zero_timeout_fails_registration() {
    let settings = HttpSettings {
        timeout_secs: 0,
        ..HttpSettings::default()
    };

    let mut registry = NodeRegistry::new();
    let err = loomnodes::register_all_with(&mut registry, &settings).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let mut registry = NodeRegistry::new();
    loomnodes::register_all_with(&mut registry, &HttpSettings::default()).unwrap();
    assert_eq!(registry.list_node_types().len(), 2);
}

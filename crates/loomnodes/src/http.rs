use async_trait::async_trait;
use loomcore::{parse_config, ConfigField, Node, NodeContext, NodeError, NodeKind, NodeMetadata, NodeOutput};
use loomruntime::HttpSettings;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Methods that send a JSON body
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully rendered outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// Sends requests on behalf of the HTTP node
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NodeError>;
}

/// Transport backed by a shared reqwest client
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self, NodeError> {
        if settings.timeout_secs == 0 {
            return Err(NodeError::Configuration("HTTP timeout must be at least 1 second".into()));
        }

        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| NodeError::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, e: reqwest::Error) -> NodeError {
        if e.is_timeout() {
            NodeError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else if e.is_builder() {
            NodeError::Configuration(format!("invalid request: {}", e))
        } else {
            NodeError::Transient(format!("HTTP request failed: {}", e))
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NodeError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| self.classify(e))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            content_type,
            body,
        })
    }
}

/// Raw node configuration as stored in the graph
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default, alias = "endpointTemplate")]
    endpoint: Option<String>,
    #[serde(default)]
    method: Option<HttpMethod>,
    #[serde(default, alias = "bodyTemplate")]
    body: Option<String>,
    #[serde(default)]
    variable_name: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// Configuration with every mandatory field present
#[derive(Debug, Clone)]
pub struct HttpRequestConfig {
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub variable_name: String,
    pub headers: BTreeMap<String, String>,
}

impl HttpRequestConfig {
    pub fn from_data(data: &Value) -> Result<Self, NodeError> {
        let raw: RawConfig = parse_config(data)?;

        let endpoint = non_empty(raw.endpoint)
            .ok_or_else(|| NodeError::Configuration("HTTP Request node: No endpoint configured".into()))?;
        let variable_name = non_empty(raw.variable_name)
            .ok_or_else(|| NodeError::Configuration("HTTP Request node: Variable name is not configured".into()))?;
        let method = raw
            .method
            .ok_or_else(|| NodeError::Configuration("HTTP Request node: Method is not configured".into()))?;

        if !is_identifier(&variable_name) {
            return Err(NodeError::Configuration(format!(
                "HTTP Request node: invalid variable name '{}'",
                variable_name
            )));
        }

        Ok(Self {
            endpoint,
            method,
            body: raw.body,
            variable_name,
            headers: raw.headers,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

/// HTTP request node
///
/// Writes `{status, statusText, data}` under its configured variable name and
/// touches no other context key.
pub struct HttpRequestNode {
    transport: Arc<dyn HttpTransport>,
}

impl HttpRequestNode {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn with_settings(settings: &HttpSettings) -> Result<Self, NodeError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(settings)?)))
    }

    /// Render templates into a request. Every failure here is a configuration
    /// fault and happens before anything is sent.
    fn build_request(&self, config: &HttpRequestConfig, ctx: &NodeContext) -> Result<HttpRequest, NodeError> {
        let url = ctx.render(&config.endpoint)?;
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| NodeError::Configuration(format!("invalid endpoint '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NodeError::Configuration(format!("unsupported URL scheme in '{}'", url)));
        }

        let mut headers = Vec::with_capacity(config.headers.len() + 1);
        for (name, template) in &config.headers {
            headers.push((name.clone(), ctx.render(template)?));
        }

        let body = if config.method.has_body() {
            let rendered = ctx.render(config.body.as_deref().unwrap_or("{}"))?;
            serde_json::from_str::<Value>(&rendered)
                .map_err(|e| NodeError::Configuration(format!("request body is not valid JSON: {}", e)))?;
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
            Some(rendered)
        } else {
            None
        };

        Ok(HttpRequest {
            method: config.method,
            url,
            headers,
            body,
        })
    }

    /// One attempt: build, send, decode
    async fn perform(&self, config: &HttpRequestConfig, ctx: &NodeContext) -> Result<Value, NodeError> {
        let request = self.build_request(config, ctx)?;
        ctx.events.info(format!("{} {}", request.method, request.url));
        let request_url = request.url.clone();

        let response = self.transport.send(request).await?;
        ctx.events.info(format!("Response status: {}", response.status));

        if !(200..300).contains(&response.status) {
            ctx.events.warn(format!("{} answered {}", request_url, response.status));
            return Err(NodeError::Transient(format!(
                "HTTP {} {}",
                response.status, response.status_text
            )));
        }

        let is_json = response
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));
        let data = if is_json && !response.body.trim().is_empty() {
            serde_json::from_str(&response.body)
                .map_err(|e| NodeError::Parse(format!("response is not valid JSON: {}", e)))?
        } else {
            Value::String(response.body)
        };

        Ok(json!({
            "status": response.status,
            "statusText": response.status_text,
            "data": data,
        }))
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> NodeKind {
        NodeKind::HttpRequest
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            fields: vec![
                ConfigField::required("endpoint", "URL template"),
                ConfigField::required("method", "GET, POST, PUT, PATCH or DELETE"),
                ConfigField::required("variableName", "Context key that receives the response"),
                ConfigField::optional("body", "JSON body template for POST, PUT and PATCH"),
                ConfigField::optional("headers", "Header name to value template"),
            ],
        }
    }

    fn validate(&self, data: &Value) -> Result<(), NodeError> {
        HttpRequestConfig::from_data(data).map(|_| ())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config = HttpRequestConfig::from_data(&ctx.data)?;

        let payload = ctx
            .steps
            .run("http_request", || self.perform(&config, &ctx))
            .await?;

        Ok(NodeOutput::set(config.variable_name.clone(), payload))
    }
}

//! Named HTTP client registry and gated request execution
//!
//! Clients are built once at engine setup from [`HttpClientConfig`]
//! entries: each carries its own timeout, default headers, default query
//! parameters, and an auth strategy applied as a request transform.
//! Credential material is immutable after build, and the registry itself
//! is a shared read-only map, so clients are safe for concurrent use.
//!
//! Redirects are never followed by `reqwest` itself: the redirect policy
//! is `none`, and hops are walked manually so the [`SecurityGate`] can
//! re-validate every location, including the response size cap and the
//! redirect ceiling.

use crate::config::{EngineConfig, HttpClientConfig};
use crate::error::{EngineError, Result};
use crate::security::SecurityGate;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Method, Url};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a client authenticates outgoing requests.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl AuthStrategy {
    fn from_config(config: &HttpClientConfig) -> Result<Self> {
        match config.auth_type.as_str() {
            "" | "none" => Ok(Self::None),
            "basic" => Ok(Self::Basic {
                username: config.username.clone().unwrap_or_default(),
                password: config.password.clone().unwrap_or_default(),
            }),
            "bearer" => Ok(Self::Bearer {
                token: config.token.clone().unwrap_or_default(),
            }),
            other => Err(EngineError::TransportError(format!(
                "unknown auth_type '{}' for client '{}'",
                other, config.name
            ))),
        }
    }
}

/// A built, pooled client plus its request defaults.
#[derive(Debug)]
pub struct ClientSpec {
    pub name: String,
    client: Client,
    default_headers: HashMap<String, String>,
    default_query_params: HashMap<String, String>,
    auth: AuthStrategy,
}

impl ClientSpec {
    fn build(
        name: &str,
        timeout: Duration,
        default_headers: HashMap<String, String>,
        default_query_params: HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                EngineError::TransportError(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            name: name.to_string(),
            client,
            default_headers,
            default_query_params,
            auth,
        })
    }
}

/// One HTTP request as the `http` executor sees it.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub url: String,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<Value>,
}

/// Thread-safe mapping `name → built client` plus the default client.
///
/// Reads are lock-free after build; the registry is populated only at
/// engine setup.
#[derive(Clone)]
pub struct HttpClientRegistry {
    clients: Arc<HashMap<String, Arc<ClientSpec>>>,
    default_client: Arc<ClientSpec>,
}

impl HttpClientRegistry {
    /// Build every configured client plus the config-derived default.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let default_timeout = Duration::from_secs_f64(config.default_timeout);
        let default_client = Arc::new(ClientSpec::build(
            "default",
            default_timeout,
            HashMap::new(),
            HashMap::new(),
            AuthStrategy::None,
        )?);

        let mut clients = HashMap::new();
        for entry in &config.http_clients {
            let timeout = entry
                .timeout
                .map(Duration::from_secs_f64)
                .unwrap_or(default_timeout);
            let spec = ClientSpec::build(
                &entry.name,
                timeout,
                entry.default_headers.clone(),
                entry.default_query_params.clone(),
                AuthStrategy::from_config(entry)?,
            )?;
            clients.insert(entry.name.clone(), Arc::new(spec));
        }

        Ok(Self {
            clients: Arc::new(clients),
            default_client,
        })
    }

    /// Resolve a client: named when `client_name` is set, default when
    /// unset, `UnknownClient` when set but absent.
    pub fn resolve(&self, client_name: Option<&str>) -> Result<Arc<ClientSpec>> {
        match client_name {
            None => Ok(self.default_client.clone()),
            Some(name) => self
                .clients
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::UnknownClient(name.to_string())),
        }
    }

    /// Execute a request through the gate, following redirects manually.
    ///
    /// Cancellation aborts the in-flight request at the next suspension
    /// point; the connection is dropped with the future.
    pub async fn execute(
        &self,
        spec: &ClientSpec,
        gate: &SecurityGate,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let method = parse_method(request.method.as_deref())?;
        let mut url = gate.validate_url(&request.url)?;
        let mut hops = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            gate.validate_resolved(&url).await?;

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = self.send_once(spec, method.clone(), url.clone(), request) => result?,
            };

            let status = response.status();
            if status.is_redirection() {
                if !gate.follow_redirects() {
                    // Policy says surface the 3xx as-is.
                    return read_response(response, gate, cancel).await;
                }
                hops += 1;
                if hops > gate.max_redirects() {
                    return Err(EngineError::RedirectLoop {
                        max_redirects: gate.max_redirects(),
                    });
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        EngineError::TransportError(format!(
                            "redirect status {} without a Location header",
                            status
                        ))
                    })?;
                let next = url.join(location).map_err(|e| {
                    EngineError::TransportError(format!("invalid redirect target: {}", e))
                })?;
                // Each hop goes through the full gate again.
                url = gate.validate_url(next.as_str())?;
                continue;
            }

            return read_response(response, gate, cancel).await;
        }
    }

    async fn send_once(
        &self,
        spec: &ClientSpec,
        method: Method,
        url: Url,
        request: &HttpRequest,
    ) -> Result<reqwest::Response> {
        let mut builder = spec.client.request(method, url);

        if !spec.default_query_params.is_empty() {
            builder = builder.query(&spec.default_query_params);
        }
        builder = builder.headers(build_headers(&spec.default_headers)?);
        if let Some(headers) = &request.headers {
            builder = builder.headers(build_headers(headers)?);
        }

        builder = match &spec.auth {
            AuthStrategy::None => builder,
            AuthStrategy::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            AuthStrategy::Bearer { token } => builder.bearer_auth(token),
        };

        if let Some(body) = &request.body {
            builder = match body {
                Value::String(raw) => builder.body(raw.clone()),
                other => builder.json(other),
            };
        }

        Ok(builder.send().await?)
    }
}

/// Read the response body under the size cap and shape the output value.
async fn read_response(
    response: reqwest::Response,
    gate: &SecurityGate,
    cancel: &CancellationToken,
) -> Result<Value> {
    let status = response.status().as_u16();
    let cap = gate.max_response_size();

    if let Some(declared) = response.content_length() {
        if declared > cap {
            return Err(EngineError::ResponseTooLarge { max_bytes: cap });
        }
    }

    let headers: serde_json::Map<String, Value> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        chunk = stream.next() => chunk,
    } {
        let chunk = chunk?;
        if body.len() as u64 + chunk.len() as u64 > cap {
            return Err(EngineError::ResponseTooLarge { max_bytes: cap });
        }
        body.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&body).into_owned();
    let parsed = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

    Ok(json!({
        "status": status,
        "headers": Value::Object(headers),
        "body": parsed,
    }))
}

fn parse_method(raw: Option<&str>) -> Result<Method> {
    let name = raw.unwrap_or("GET").to_ascii_uppercase();
    match name.as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "PATCH" => Ok(Method::PATCH),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        other => Err(EngineError::TransportError(format!(
            "unsupported HTTP method '{}'",
            other
        ))),
    }
}

fn build_headers(map: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(map.len());
    for (key, value) in map {
        let name = key.parse::<HeaderName>().map_err(|_| {
            EngineError::TransportError(format!("invalid header name '{}'", key))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            EngineError::TransportError(format!("invalid header value for '{}'", key))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

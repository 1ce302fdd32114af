//! Signed CDP HTTP client.
//!
//! [`CdpHttpClient`] owns signing, status handling and the retry loop for
//! one control-plane endpoint. The wire send itself sits behind the
//! [`HttpSend`] trait so tests can script responses. Resource clients talk
//! to the API through [`CdpClient`], which adds per-call status squelching
//! on top of any [`RestClient`].

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CdpCredentials, ClientConfig};
use crate::error::{CdpError, CdpResult};
use crate::signing::{Ed25519Signer, SignedRequest};

const JSON: &str = "application/json";
const MAX_BACKOFF_MS: u64 = 5_000;

// ── Transport seam ──────────────────────────────────────────────────────

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends one fully-signed request.
///
/// `Err` means the request never produced an HTTP response (connection
/// refused, DNS failure, timeout, ...) and carries the cause.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: &SignedRequest) -> Result<RawResponse, String>;
}

/// [`HttpSend`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    http: reqwest::Client,
}

impl ReqwestSender {
    pub fn new(config: &ClientConfig) -> CdpResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, request: &SignedRequest) -> Result<RawResponse, String> {
        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| format!("Invalid HTTP method: {}", request.method))?;

        let mut req = self.http.request(method, &request.url);
        for (key, value) in &request.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            req = req.body(body.clone());
        }

        let resp = req.send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(RawResponse { status, body })
    }
}

// ── Signed client ───────────────────────────────────────────────────────

/// Signs, sends and retries requests against one CDP endpoint.
#[derive(Clone)]
pub struct CdpHttpClient {
    signer: Ed25519Signer,
    config: ClientConfig,
    sender: Arc<dyn HttpSend>,
}

impl CdpHttpClient {
    /// Build a client that sends over `reqwest`.
    pub fn new(credentials: &CdpCredentials, config: ClientConfig) -> CdpResult<Self> {
        let sender = ReqwestSender::new(&config)?;
        Self::with_sender(credentials, config, Arc::new(sender))
    }

    /// Build a client that sends through `sender`.
    pub fn with_sender(
        credentials: &CdpCredentials,
        config: ClientConfig,
        sender: Arc<dyn HttpSend>,
    ) -> CdpResult<Self> {
        config.validate()?;
        let signer = Ed25519Signer::from_credentials(credentials)?;
        Ok(Self {
            signer,
            config,
            sender,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Join `path` onto the endpoint and append query parameters.
    ///
    /// `params` must be a JSON object. Arrays repeat their key once per
    /// element, `null` values are skipped.
    pub fn build_url(&self, path: &str, params: Option<&Value>) -> CdpResult<String> {
        let base = format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            path.trim_matches('/')
        );

        let pairs = match params {
            None | Some(Value::Null) => return Ok(base),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(CdpError::Serialization(format!(
                    "query parameters must be an object, got {}",
                    other
                )))
            }
        };

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            match value {
                Value::Array(items) => {
                    for item in items {
                        query.append_pair(key, &query_value(item));
                    }
                }
                Value::Null => {}
                scalar => {
                    query.append_pair(key, &query_value(scalar));
                }
            }
        }
        let query = query.finish();

        if query.is_empty() {
            Ok(base)
        } else {
            Ok(format!("{}?{}", base, query))
        }
    }

    fn base_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), JSON.to_string());
        headers.insert("Accept".to_string(), JSON.to_string());
        headers.insert("User-Agent".to_string(), self.config.user_agent.clone());
        if let Some(ref ctx) = self.config.proxy_context_path {
            headers.insert("X-ProxyContextPath".to_string(), ctx.clone());
        }
        headers
    }

    /// Execute one logical API call with the configured retry budget.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        params: Option<&Value>,
        data: Option<&Value>,
        json_data: Option<&Value>,
    ) -> CdpResult<Option<Value>> {
        self.request_with_retries(method, path, params, data, json_data, self.config.max_retries)
            .await
    }

    /// Execute one logical API call, making at most `max_retries` attempts.
    ///
    /// Every attempt gets a fresh `x-altus-date` and signature. `json_data`
    /// wins over `data` when both are given.
    pub async fn request_with_retries(
        &self,
        method: &str,
        path: &str,
        params: Option<&Value>,
        data: Option<&Value>,
        json_data: Option<&Value>,
        max_retries: u32,
    ) -> CdpResult<Option<Value>> {
        let url = self.build_url(path, params)?;
        let body = match json_data.or(data) {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        let headers = self.base_headers();
        let max_attempts = max_retries.max(1);

        for attempt in 0..max_attempts {
            let signed =
                self.signer
                    .sign_request(method, &url, &headers, body.clone(), Utc::now())?;
            log::debug!(
                "CDP {} {} (attempt {}/{})",
                signed.method,
                url,
                attempt + 1,
                max_attempts
            );

            match self.sender.send(&signed).await {
                Ok(response) => match response.status {
                    401 => return Err(CdpError::unauthorized(path)),
                    403 => return Err(CdpError::forbidden(path)),
                    204 => return Ok(None),
                    200..=299 => return Ok(Some(parse_body(&response.body))),
                    status => {
                        let error = CdpError::from_response(status, &response.body, &url);
                        if error.is_retryable() && attempt + 1 < max_attempts {
                            let delay = backoff_delay(attempt);
                            log::warn!(
                                "CDP {} {} returned {} (attempt {}/{}) - retrying in {}ms",
                                signed.method,
                                path,
                                status,
                                attempt + 1,
                                max_attempts,
                                delay.as_millis()
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(error);
                    }
                },
                Err(cause) => {
                    if attempt + 1 < max_attempts {
                        let delay = backoff_delay(attempt);
                        log::warn!(
                            "CDP {} {} connection error (attempt {}/{}): {} - retrying in {}ms",
                            signed.method,
                            path,
                            attempt + 1,
                            max_attempts,
                            cause,
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(CdpError::Transport {
                        attempts: max_attempts,
                        url,
                        cause,
                    });
                }
            }
        }

        Err(CdpError::Transport {
            attempts: max_attempts,
            url,
            cause: "no attempt was made".to_string(),
        })
    }
}

/// `min(0.5 * 2^attempt, 5)` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt >= 4 {
        return Duration::from_millis(MAX_BACKOFF_MS);
    }
    Duration::from_millis((500u64 << attempt).min(MAX_BACKOFF_MS))
}

/// Empty body is `{}`, non-JSON is wrapped as `{"response": text}`.
fn parse_body(body: &str) -> Value {
    if body.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::json!({ "response": body }))
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── REST verbs ──────────────────────────────────────────────────────────

/// The four verbs every resource client is written against.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn get(&self, path: &str, params: Option<&Value>) -> CdpResult<Option<Value>>;
    async fn post(&self, path: &str, body: Option<&Value>) -> CdpResult<Option<Value>>;
    async fn put(&self, path: &str, body: Option<&Value>) -> CdpResult<Option<Value>>;
    async fn delete(&self, path: &str) -> CdpResult<Option<Value>>;
}

#[async_trait]
impl RestClient for CdpHttpClient {
    async fn get(&self, path: &str, params: Option<&Value>) -> CdpResult<Option<Value>> {
        self.request("GET", path, params, None, None).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> CdpResult<Option<Value>> {
        self.request("POST", path, None, None, body).await
    }

    async fn put(&self, path: &str, body: Option<&Value>) -> CdpResult<Option<Value>> {
        self.request("PUT", path, None, None, body).await
    }

    async fn delete(&self, path: &str) -> CdpResult<Option<Value>> {
        self.request("DELETE", path, None, None, None).await
    }
}

// ── Squelching wrapper ──────────────────────────────────────────────────

/// Map from HTTP status to the value returned in place of that error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Squelch(HashMap<u16, Value>);

impl Squelch {
    pub fn none() -> Self {
        Self::default()
    }

    /// 404 becomes `null`, which describe calls read as "absent".
    pub fn not_found() -> Self {
        Self::none().on(404, Value::Null)
    }

    pub fn on(mut self, status: u16, value: Value) -> Self {
        self.0.insert(status, value);
        self
    }

    pub fn get(&self, status: u16) -> Option<&Value> {
        self.0.get(&status)
    }

    fn apply(&self, path: &str, result: CdpResult<Option<Value>>) -> CdpResult<Option<Value>> {
        match result {
            Err(err) => match err.status().and_then(|s| self.get(s)) {
                Some(value) => {
                    log::debug!("Squelched {} from {}", err.status().unwrap_or_default(), path);
                    Ok(Some(value.clone()))
                }
                None => Err(err),
            },
            ok => ok,
        }
    }
}

/// Shared handle resource clients hold on to.
#[derive(Clone)]
pub struct CdpClient {
    rest: Arc<dyn RestClient>,
    default_page_size: u32,
}

impl CdpClient {
    pub fn new(rest: Arc<dyn RestClient>, default_page_size: u32) -> Self {
        Self {
            rest,
            default_page_size,
        }
    }

    pub fn from_http(http: CdpHttpClient) -> Self {
        let page_size = http.config().default_page_size;
        Self::new(Arc::new(http), page_size)
    }

    pub fn default_page_size(&self) -> u32 {
        self.default_page_size
    }

    pub async fn get(
        &self,
        path: &str,
        params: Option<&Value>,
        squelch: &Squelch,
    ) -> CdpResult<Option<Value>> {
        squelch.apply(path, self.rest.get(path, params).await)
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        squelch: &Squelch,
    ) -> CdpResult<Option<Value>> {
        squelch.apply(path, self.rest.post(path, body).await)
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<&Value>,
        squelch: &Squelch,
    ) -> CdpResult<Option<Value>> {
        squelch.apply(path, self.rest.put(path, body).await)
    }

    pub async fn delete(&self, path: &str, squelch: &Squelch) -> CdpResult<Option<Value>> {
        squelch.apply(path, self.rest.delete(path).await)
    }
}

/// Present-and-not-null response, or `None`.
pub(crate) fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    pub const TEST_ACCESS_KEY: &str = "test-access-key";

    pub fn test_credentials() -> CdpCredentials {
        use base64::Engine as _;
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        CdpCredentials::new(TEST_ACCESS_KEY, &key)
    }

    pub fn test_config() -> ClientConfig {
        ClientConfig {
            endpoint: "https://api.test.cdp.cloudera.com/".to_string(),
            ..Default::default()
        }
    }

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    pub struct ScriptedSender {
        script: Mutex<VecDeque<Result<RawResponse, String>>>,
        pub requests: Mutex<Vec<(Instant, SignedRequest)>>,
    }

    impl ScriptedSender {
        pub fn new(script: Vec<Result<RawResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn requests(&self) -> Vec<SignedRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, r)| r.clone())
                .collect()
        }

        pub fn request_times(&self) -> Vec<Instant> {
            self.requests.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl HttpSend for ScriptedSender {
        async fn send(&self, request: &SignedRequest) -> Result<RawResponse, String> {
            self.requests
                .lock()
                .unwrap()
                .push((Instant::now(), request.clone()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".to_string()))
        }
    }

    /// One call observed by [`MockRest`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct Call {
        pub method: &'static str,
        pub path: String,
        pub payload: Option<Value>,
    }

    /// [`RestClient`] that replays canned results.
    #[derive(Default)]
    pub struct MockRest {
        script: Mutex<VecDeque<CdpResult<Option<Value>>>>,
        pub calls: Mutex<Vec<Call>>,
    }

    impl MockRest {
        pub fn new(script: Vec<CdpResult<Option<Value>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, method: &'static str, path: &str, payload: Option<&Value>) -> CdpResult<Option<Value>> {
            self.calls.lock().unwrap().push(Call {
                method,
                path: path.to_string(),
                payload: payload.cloned(),
            });
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Some(serde_json::json!({}))))
        }
    }

    #[async_trait]
    impl RestClient for MockRest {
        async fn get(&self, path: &str, params: Option<&Value>) -> CdpResult<Option<Value>> {
            self.next("GET", path, params)
        }

        async fn post(&self, path: &str, body: Option<&Value>) -> CdpResult<Option<Value>> {
            self.next("POST", path, body)
        }

        async fn put(&self, path: &str, body: Option<&Value>) -> CdpResult<Option<Value>> {
            self.next("PUT", path, body)
        }

        async fn delete(&self, path: &str) -> CdpResult<Option<Value>> {
            self.next("DELETE", path, None)
        }
    }

    pub fn mock_client(script: Vec<CdpResult<Option<Value>>>) -> (CdpClient, Arc<MockRest>) {
        let rest = MockRest::new(script);
        (CdpClient::new(rest.clone(), 100), rest)
    }
}

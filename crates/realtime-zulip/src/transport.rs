use std::time::Duration;

use async_trait::async_trait;
use realtime_core::{
    DEFAULT_REQUEST_TIMEOUT, QueueError, QueueErrorCategory, classify_error_code,
    classify_http_status,
};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use serde_json::{Map, Value};
use tracing::trace;
use url::Url;

pub(crate) const RESULT_SUCCESS: &str = "success";
pub(crate) const RESULT_ERROR: &str = "error";
const DEFAULT_USER_AGENT: &str = concat!("realtime-zulip/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// One API call: method, path, form/query parameters and optional timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: &'static str,
    pub params: Vec<(String, String)>,
    /// Overrides the transport's default timeout when set.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: &'static str) -> Self {
        Self {
            method,
            path,
            params: Vec::new(),
            timeout: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn params<K: Into<String>>(mut self, params: impl IntoIterator<Item = (K, String)>) -> Self {
        self.params
            .extend(params.into_iter().map(|(key, value)| (key.into(), value)));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a parameter, if present.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Response envelope: `{result, msg, code, ...}` plus the HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub http_status: u16,
    pub result: String,
    pub msg: String,
    pub code: Option<String>,
    /// Every top-level field of the body, envelope fields included.
    pub fields: Map<String, Value>,
    /// `Retry-After` header in seconds, when sent.
    pub retry_after_header: Option<f64>,
    /// Set when the body was not a JSON object.
    pub body_error: Option<String>,
}

impl ApiResponse {
    /// Build an envelope from a raw HTTP body.
    pub fn from_body(http_status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(fields)) => Self::from_fields(http_status, fields),
            Ok(_) => Self::undecodable(http_status, "response body is not a JSON object".into()),
            Err(err) => Self::undecodable(http_status, err.to_string()),
        }
    }

    pub fn from_fields(http_status: u16, fields: Map<String, Value>) -> Self {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(ToOwned::to_owned);
        Self {
            http_status,
            result: text("result").unwrap_or_default(),
            msg: text("msg").unwrap_or_default(),
            code: text("code"),
            retry_after_header: None,
            body_error: None,
            fields,
        }
    }

    fn undecodable(http_status: u16, reason: String) -> Self {
        Self {
            http_status,
            result: RESULT_ERROR.to_owned(),
            msg: String::new(),
            code: None,
            fields: Map::new(),
            retry_after_header: None,
            body_error: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == RESULT_SUCCESS && (200..300).contains(&self.http_status)
    }

    /// Server back-off hint from the body (`retry-after`) or the header.
    pub fn retry_after(&self) -> Option<Duration> {
        self.fields
            .get("retry-after")
            .and_then(Value::as_f64)
            .or(self.retry_after_header)
            .filter(|secs| !secs.is_nan() && *secs >= 0.0)
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    /// Success payload fields, or the classified failure.
    pub fn into_result(self) -> Result<Map<String, Value>, QueueError> {
        classify_response(&self)?;
        Ok(self.fields)
    }
}

/// Map a response envelope to `Ok` or a categorized [`QueueError`].
///
/// Server error codes win over the HTTP status. A 2xx reply that is not a
/// success envelope, JSON or not, is a transient serialization failure.
pub fn classify_response(response: &ApiResponse) -> Result<(), QueueError> {
    if response.is_success() {
        return Ok(());
    }

    let status = response.http_status;
    if let Some(reason) = &response.body_error {
        let category = if (200..300).contains(&status) {
            QueueErrorCategory::Serialization
        } else {
            classify_http_status(status)
        };
        return Err(QueueError::new(
            category,
            "invalid_response_body",
            format!("HTTP {status}: {reason}"),
        ));
    }

    let Some(code) = response.code.clone() else {
        if (200..300).contains(&status) {
            return Err(QueueError::new(
                QueueErrorCategory::Serialization,
                "invalid_response_envelope",
                format!("HTTP {status} without a success result: '{}'", response.result),
            ));
        }
        let code = format!("http_{status}");
        return Err(classified(response, classify_http_status(status), code));
    };
    let category = classify_error_code(&code, status);
    Err(classified(response, category, code))
}

fn classified(response: &ApiResponse, category: QueueErrorCategory, code: String) -> QueueError {
    let status = response.http_status;
    let message = if response.msg.is_empty() {
        format!("request failed with HTTP {status}")
    } else {
        response.msg.clone()
    };

    let mut err = QueueError::new(category, code, message);
    if category == QueueErrorCategory::RateLimited
        && let Some(retry_after) = response.retry_after()
    {
        err = err.with_retry_after(retry_after);
    }
    err
}

/// Request executor consumed by the queue API.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, QueueError>;
}

/// Server location and credentials for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub site: Url,
    pub email: String,
    pub api_key: String,
    pub user_agent: String,
    pub default_timeout: Duration,
}

impl TransportConfig {
    pub fn new(site: &str, email: impl Into<String>, api_key: impl Into<String>) -> Result<Self, QueueError> {
        let mut site = Url::parse(site).map_err(|err| {
            QueueError::new(
                QueueErrorCategory::Validation,
                "invalid_site_url",
                format!("invalid site url '{site}': {err}"),
            )
        })?;
        if !site.path().ends_with('/') {
            let path = format!("{}/", site.path());
            site.set_path(&path);
        }

        Ok(Self {
            site,
            email: email.into(),
            api_key: api_key.into(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, QueueError> {
        self.site.join(path.trim_start_matches('/')).map_err(|err| {
            QueueError::new(
                QueueErrorCategory::Validation,
                "invalid_endpoint",
                format!("cannot build endpoint for '{path}': {err}"),
            )
        })
    }
}

/// Basic-auth, form-encoded HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| {
                QueueError::new(
                    QueueErrorCategory::Internal,
                    "http_client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, QueueError> {
        let url = self.config.endpoint(request.path)?;
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        trace!(method = ?request.method, %url, ?timeout, "sending request");

        let builder = match request.method {
            HttpMethod::Get => self.client.get(url).query(&request.params),
            HttpMethod::Post => self.client.post(url).form(&request.params),
            HttpMethod::Delete => self.client.delete(url).form(&request.params),
        };

        let response = builder
            .basic_auth(&self.config.email, Some(&self.config.api_key))
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        let mut envelope = ApiResponse::from_body(status, &body);
        envelope.retry_after_header = retry_after_header;
        trace!(status, result = %envelope.result, "received response");
        Ok(envelope)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> QueueError {
    let code = if err.is_timeout() {
        "request_timeout"
    } else if err.is_connect() {
        "connect_failed"
    } else if err.is_decode() || err.is_body() {
        "response_read_failed"
    } else if err.is_builder() {
        return QueueError::new(
            QueueErrorCategory::Validation,
            "invalid_request",
            err.to_string(),
        );
    } else {
        "transport_error"
    };
    QueueError::new(QueueErrorCategory::Network, code, err.to_string())
}

//! Transport seam and low-level REST client.
//!
//! [`Transport`] is the generic request/response capability everything
//! above rides on; [`HttpTransport`] is the reqwest-backed production
//! implementation (a bearer token obtained elsewhere, attached to every
//! request). [`Rest`] knows the endpoint layout and speaks raw pages and
//! acknowledgements; entity-aware behavior lives in `dml` and `query`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::describe::SObjectType;
use crate::error::SforceError;

pub const DEFAULT_API_VERSION: &str = "56.0";

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Status and parsed body of one response. Any status is a response; the
/// layers above decide what counts as failure.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub data: Value,
}

/// Generic request/response capability. Implementations return
/// `Ok(HttpResponse)` for every answered request regardless of status and
/// reserve `Err` for requests that never produced a response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, SforceError>;
}

/// Production transport: reqwest with an externally acquired bearer token.
pub struct HttpTransport {
    http: reqwest::Client,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(access_token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), access_token }
    }

    pub fn with_client(http: reqwest::Client, access_token: Option<String>) -> Self {
        Self { http, access_token }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, SforceError> {
        let mut req = match method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Patch => self.http.patch(url),
            Method::Delete => self.http.delete(url),
        };
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SforceError::Connection(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| SforceError::Connection(e.to_string()))?;
        let data = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(HttpResponse { status, data })
    }
}

// ── Wire shapes ─────────────────────────────────────────────────────

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub total_size: Option<u64>,
    pub done: bool,
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,
}

/// DML acknowledgement for create / delete.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmlResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub warnings: Vec<Value>,
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub instance_url: String,
    pub api_version: String,
}

impl RestConfig {
    pub fn new(instance_url: impl Into<String>) -> Self {
        Self {
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }
}

/// Low-level REST client: endpoint layout, raw pages, acknowledgements.
pub struct Rest {
    transport: Arc<dyn Transport>,
    config: RestConfig,
}

impl Rest {
    pub fn new(config: RestConfig, transport: Arc<dyn Transport>) -> Self {
        Self { transport, config }
    }

    /// Convenience constructor over [`HttpTransport`].
    pub fn with_token(instance_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(
            RestConfig::new(instance_url),
            Arc::new(HttpTransport::new(Some(access_token.into()))),
        )
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// `/services/data/v{version}/{suffix}` — the path form composite
    /// sub-requests use.
    pub fn data_path(&self, suffix: &str) -> String {
        format!("/services/data/v{}/{}", self.config.api_version, suffix)
    }

    pub fn sobject_path(&self, sobject_type: &SObjectType) -> String {
        self.data_path(&format!("sobjects/{}", sobject_type.api_name))
    }

    pub fn sobject_item_path(&self, sobject_type: &SObjectType, id: &str) -> String {
        self.data_path(&format!("sobjects/{}/{id}", sobject_type.api_name))
    }

    fn query_path(&self, soql: &str, all_rows: bool) -> String {
        let endpoint = if all_rows { "queryAll" } else { "query" };
        let encoded: String = form_urlencoded::byte_serialize(soql.as_bytes()).collect();
        self.data_path(&format!("{endpoint}/?q={encoded}"))
    }

    pub(crate) fn absolute(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.config.instance_url, path_or_url)
        }
    }

    /// One round trip. Accepts a data path or an absolute URL; returns the
    /// response whatever its status.
    pub async fn request(
        &self,
        method: Method,
        path_or_url: &str,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, SforceError> {
        let url = self.absolute(path_or_url);
        debug!("{method} {url}");
        let resp = self.transport.request(method, &url, body, headers).await?;
        debug!("{method} {url} -> {}", resp.status);
        Ok(resp)
    }

    /// One round trip that treats any status ≥ 300 as a transport error.
    pub(crate) async fn request_ok(
        &self,
        method: Method,
        path_or_url: &str,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, SforceError> {
        let resp = self.request(method, path_or_url, body, headers).await?;
        if resp.status >= 300 {
            return Err(SforceError::Http {
                method: method.to_string(),
                url: self.absolute(path_or_url),
                status: resp.status,
                body: resp.data,
            });
        }
        Ok(resp)
    }

    /// Run a query and return the first page.
    pub async fn query(&self, soql: &str, all_rows: bool) -> Result<QueryResponse, SforceError> {
        let path = self.query_path(soql, all_rows);
        let resp = self.request_ok(Method::Get, &path, None, &[]).await?;
        parse_page(resp.data)
    }

    /// Follow a query locator to the next page.
    pub async fn query_more(&self, next_records_url: &str) -> Result<QueryResponse, SforceError> {
        let resp = self.request_ok(Method::Get, next_records_url, None, &[]).await?;
        parse_page(resp.data)
    }
}

pub(crate) fn parse_page(data: Value) -> Result<QueryResponse, SforceError> {
    serde_json::from_value(data).map_err(|e| SforceError::Decode(format!("query page: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn request(
            &self,
            _method: Method,
            _url: &str,
            _body: Option<&Value>,
            _headers: &[(String, String)],
        ) -> Result<HttpResponse, SforceError> {
            Ok(HttpResponse { status: 200, data: Value::Null })
        }
    }

    fn rest() -> Rest {
        Rest::new(RestConfig::new("https://example.my.test/"), Arc::new(NullTransport))
    }

    #[test]
    fn paths_follow_endpoint_layout() {
        let r = rest();
        assert_eq!(r.data_path("composite"), "/services/data/v56.0/composite");
        assert_eq!(
            r.query_path("SELECT Id FROM Account", false),
            "/services/data/v56.0/query/?q=SELECT+Id+FROM+Account"
        );
        assert_eq!(
            r.query_path("SELECT Id FROM Account", true),
            "/services/data/v56.0/queryAll/?q=SELECT+Id+FROM+Account"
        );
    }

    #[test]
    fn absolute_resolves_paths_but_keeps_urls() {
        let r = rest();
        assert_eq!(
            r.absolute("/services/data/v56.0/query/next"),
            "https://example.my.test/services/data/v56.0/query/next"
        );
        assert_eq!(r.absolute("https://other.test/x"), "https://other.test/x");
    }

    #[test]
    fn query_page_parses() {
        let page = parse_page(json!({
            "totalSize": 2,
            "done": false,
            "records": [{"Id": "1"}, {"Id": "2"}],
            "nextRecordsUrl": "/services/data/v56.0/query/01g-next"
        }))
        .unwrap();
        assert_eq!(page.total_size, Some(2));
        assert!(!page.done);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_records_url.as_deref(), Some("/services/data/v56.0/query/01g-next"));
    }

    #[test]
    fn method_serializes_uppercase() {
        assert_eq!(serde_json::to_value(Method::Patch).unwrap(), json!("PATCH"));
    }
}

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::cache_aside::{CacheAside, FetchMeta, Fetched};
use crate::cache_key::{make_key, CacheKey, KeyParams, HTTP_NAMESPACE};
use crate::config::NexusConfig;
use crate::error::{AccessError, FetchError};
use crate::retry::ResilientFetcher;
use crate::store::KeyValueStore;
use crate::throttling::UpstreamThrottle;

const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    ApiKey(String),
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::ApiKey(key) => {
                headers.insert(String::from("x-api-key"), key.clone());
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// Outbound request. Header names are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Cache key for this request: method, URL, query and the credential
    /// headers, so callers with different credentials never share entries.
    pub fn cache_key(&self) -> CacheKey {
        let params = self
            .query
            .iter()
            .fold(KeyParams::new().param("url", self.url.as_str()), |params, (name, value)| {
                params.query_param(name.as_str(), value.as_str())
            })
            .sensitive_headers(&self.headers);
        make_key(HTTP_NAMESPACE, self.method.as_str(), &params)
    }
}

/// Raw transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Final URL after redirects.
    pub url: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            url: String::new(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Decoded successful response, as cached and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpPayload {
    pub status: u16,
    pub data: serde_json::Value,
    pub url: String,
}

impl HttpPayload {
    /// Parses the body as JSON, wrapping non-JSON bodies as `{"content": text}`.
    pub fn from_response(response: HttpResponse) -> Self {
        let data = serde_json::from_str(&response.body)
            .unwrap_or_else(|_| serde_json::json!({ "content": response.body }));
        Self {
            status: response.status,
            data,
            url: response.url,
        }
    }
}

/// Transport contract. Implementations report failures as [`FetchError`]s so
/// the retry layer can classify them.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, FetchError>> + Send + 'a>>;
}

/// Production transport over reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("nexus/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn map_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(format!("request timeout: {error}"))
    } else if error.is_builder() {
        FetchError::invalid_request(format!("invalid request: {error}"))
    } else {
        FetchError::connect(format!("request failed: {error}"))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
                HttpMethod::Put => self.client.put(&request.url),
                HttpMethod::Delete => self.client.delete(&request.url),
            };

            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            builder = builder.timeout(Duration::from_millis(request.timeout_ms));
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(map_transport_error)?;

            let status = response.status().as_u16();
            let url = response.url().to_string();
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::connect(format!("failed to read response body: {e}")))?;

            Ok(HttpResponse { status, body, url })
        })
    }
}

/// HTTP access with pacing, retries and GET caching.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Arc<dyn HttpClient>,
    cache: CacheAside,
    fetcher: ResilientFetcher,
    throttle: Option<UpstreamThrottle>,
    default_ttl: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("cache", &self.cache)
            .field("fetcher", &self.fetcher)
            .field("throttle", &self.throttle)
            .field("default_ttl", &self.default_ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(client: Arc<dyn HttpClient>, cache: CacheAside, fetcher: ResilientFetcher) -> Self {
        let defaults = NexusConfig::default();
        Self {
            client,
            cache,
            fetcher,
            throttle: None,
            default_ttl: defaults.default_ttl,
            timeout: defaults.http_timeout,
        }
    }

    pub fn from_config(
        client: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
        config: &NexusConfig,
    ) -> Self {
        Self::new(
            client,
            CacheAside::from_config(store, config),
            ResilientFetcher::new(config.retry_config()),
        )
        .with_default_ttl(config.default_ttl)
        .with_timeout(config.http_timeout)
    }

    pub fn with_throttle(mut self, throttle: UpstreamThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    /// GET `url` with `query`, cached for the default TTL.
    pub async fn get(
        &self,
        url: &str,
        query: &BTreeMap<String, String>,
    ) -> Result<Fetched<HttpPayload>, AccessError> {
        let mut request = HttpRequest::get(url);
        request.query = query.clone();
        self.request(request, None, true).await
    }

    /// Sends `request`. Successful GETs are served from and written to the
    /// cache when `use_cache` is set; everything else goes straight upstream.
    pub async fn request(
        &self,
        request: HttpRequest,
        ttl: Option<Duration>,
        use_cache: bool,
    ) -> Result<Fetched<HttpPayload>, AccessError> {
        let request = request.with_timeout_ms(self.timeout.as_millis() as u64);
        let key = request.cache_key();

        if use_cache && request.method == HttpMethod::Get {
            let ttl = ttl.unwrap_or(self.default_ttl);
            return self
                .cache
                .get_or_compute(&key, ttl, || self.send(&request))
                .await;
        }

        let started = Instant::now();
        let payload = self.send(&request).await?;
        Ok(Fetched {
            payload,
            meta: FetchMeta {
                retrieved_from_cache: false,
                elapsed_seconds: started.elapsed().as_secs_f64(),
                cache_key: key,
            },
        })
    }

    async fn send(&self, request: &HttpRequest) -> Result<HttpPayload, AccessError> {
        self.fetcher
            .execute_after(|| self.pace(), || self.attempt(request.clone()))
            .await
    }

    /// Waits for the provider quota. Runs outside the attempt deadline.
    async fn pace(&self) {
        if let Some(throttle) = &self.throttle {
            throttle.acquire().await;
        }
    }

    async fn attempt(&self, request: HttpRequest) -> Result<HttpPayload, FetchError> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.client.execute(request).await?;
        debug!(method = method.as_str(), url = %url, status = response.status, "upstream response");

        if !response.is_success() {
            let preview: String = response.body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(FetchError::from_status(
                response.status,
                format!(
                    "{} {url} returned {}: {preview}",
                    method.as_str(),
                    response.status
                ),
            ));
        }

        Ok(HttpPayload::from_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_auth_replaces_a_caller_supplied_key_header() {
        let request = HttpRequest::get("https://example.test/news")
            .with_header("X-Api-Key", "stale")
            .with_auth(&HttpAuth::ApiKey(String::from("fresh")));

        assert_eq!(
            request.headers.get("x-api-key").map(String::as_str),
            Some("fresh")
        );
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn credential_header_case_does_not_change_the_cache_key() {
        let url = "https://example.test/weather";
        let via_auth = HttpRequest::get(url).with_auth(&HttpAuth::Header {
            name: String::from("X-Auth-Token"),
            value: String::from("t-1"),
        });
        let via_header = HttpRequest::get(url).with_header("x-auth-token", "t-1");
        let as_bearer = HttpRequest::get(url).with_auth(&HttpAuth::BearerToken(String::from("t-1")));

        assert_eq!(via_auth.cache_key(), via_header.cache_key());
        assert_ne!(via_auth.cache_key(), as_bearer.cache_key());
    }

    #[test]
    fn cache_key_separates_credentials_but_ignores_other_headers() {
        let base = HttpRequest::get("https://example.test/news").with_query("q", "rust");

        let anonymous = base.clone().cache_key();
        let traced = base.clone().with_header("X-Request-Id", "abc").cache_key();
        let keyed = base.clone().with_auth(&HttpAuth::ApiKey(String::from("k1"))).cache_key();
        let other_key = base.with_auth(&HttpAuth::ApiKey(String::from("k2"))).cache_key();

        assert_eq!(anonymous, traced);
        assert_ne!(anonymous, keyed);
        assert_ne!(keyed, other_key);
        assert!(anonymous.as_str().starts_with("http_cache:GET:"));
    }

    #[test]
    fn cache_key_depends_on_query_not_its_insertion_order() {
        let a = HttpRequest::get("https://example.test/books")
            .with_query("q", "dune")
            .with_query("page", "2");
        let b = HttpRequest::get("https://example.test/books")
            .with_query("page", "2")
            .with_query("q", "dune");
        let c = HttpRequest::get("https://example.test/books").with_query("q", "dune");

        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn non_json_body_is_wrapped_as_content() {
        let payload = HttpPayload::from_response(HttpResponse {
            status: 200,
            body: String::from("plain text"),
            url: String::from("https://example.test/"),
        });

        assert_eq!(payload.data, serde_json::json!({ "content": "plain text" }));
    }

    #[test]
    fn json_body_is_parsed() {
        let payload = HttpPayload::from_response(HttpResponse::ok_json(r#"{"temp": 21.5}"#));
        assert_eq!(payload.data["temp"], serde_json::json!(21.5));
    }
}

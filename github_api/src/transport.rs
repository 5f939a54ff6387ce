//! Transport decorator chain.
//!
//! A [`Transport`] sends one request and returns one response. Decorators
//! wrap an inner transport to inspect or mutate traffic on the way through;
//! they are composed by [`crate::Client`] from an ordered list of
//! [`ClientOption`] factories, where the last option in the list becomes the
//! outermost decorator.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::errors::Error;

/// An outgoing request, owned so that every decorator can inspect and
/// mutate it before it reaches the wire.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// A fully-read response. The body is buffered up front so decorators and
/// the response classifier can both look at it.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    /// Returns a response header as a string, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn content_type(&self) -> &str {
        self.header_str(CONTENT_TYPE.as_str()).unwrap_or("")
    }
}

/// Sends a request and returns the response.
///
/// Implementations must be shareable across concurrent tasks; decorators
/// hold their inner transport behind an `Arc` and keep no per-call state.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: Request) -> Result<Response, Error>;
}

/// An argument to [`crate::Client::new`]: wraps a transport in a decorator.
pub type ClientOption = Box<dyn FnOnce(Arc<dyn Transport>) -> Arc<dyn Transport> + Send>;

/// Base transport over a shared `reqwest::Client`.
///
/// Timeouts and cancellation are whatever reqwest provides; this layer adds
/// no policy of its own.
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, Error> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: Request) -> Result<Response, Error> {
        let mut builder = self
            .inner
            .request(req.method, req.url)
            .headers(req.headers);
        if let Some(body) = req.body {
            builder = builder.body(body);
        }
        let resp = builder.send().await?;

        let status = resp.status();
        let url = resp.url().clone();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();
        Ok(Response {
            status,
            url,
            headers,
            body,
        })
    }
}

enum HeaderSource {
    Static(HeaderValue),
    Dynamic(Box<dyn Fn() -> String + Send + Sync>),
}

struct AddHeaderTransport {
    inner: Arc<dyn Transport>,
    name: HeaderName,
    value: HeaderSource,
    /// Self-hosted deployment host that may also receive credentials,
    /// captured from `GITHUB_HOST` at construction.
    trusted_host: Option<String>,
}

#[async_trait]
impl Transport for AddHeaderTransport {
    async fn send(&self, mut req: Request) -> Result<Response, Error> {
        if header_allowed_for_host(&self.name, self.trusted_host.as_deref(), &req.url) {
            match &self.value {
                HeaderSource::Static(value) => {
                    req.headers.append(&self.name, value.clone());
                }
                HeaderSource::Dynamic(value_fn) => match HeaderValue::try_from(value_fn()) {
                    Ok(value) => {
                        req.headers.append(&self.name, value);
                    }
                    Err(e) => {
                        tracing::error!("Skipping invalid {} header value: {}", self.name, e);
                    }
                },
            }
        }
        self.inner.send(req).await
    }
}

// Prevent the token from leaking to hosts other than the service's own:
// the public domain, or the self-hosted deployment named by GITHUB_HOST.
fn header_allowed_for_host(name: &HeaderName, trusted_host: Option<&str>, url: &Url) -> bool {
    if name != &AUTHORIZATION {
        return true;
    }
    match url.host_str() {
        Some(host) => {
            host == "github.com" || host.ends_with(".github.com") || Some(host) == trusted_host
        }
        None => false,
    }
}

fn github_host_override() -> Option<String> {
    std::env::var("GITHUB_HOST").ok().filter(|h| !h.is_empty())
}

/// Adds a fixed request header to every outgoing request.
///
/// An `Authorization` header is only attached when the request targets the
/// service's own domain or the host configured through `GITHUB_HOST`.
pub fn add_header(name: HeaderName, value: HeaderValue) -> ClientOption {
    Box::new(move |inner| {
        Arc::new(AddHeaderTransport {
            inner,
            name,
            value: HeaderSource::Static(value),
            trusted_host: github_host_override(),
        })
    })
}

/// Like [`add_header`], but the value is computed at send time, so it picks
/// up tokens that change between calls (e.g. after reauthentication).
pub fn add_header_func<F>(name: HeaderName, value_fn: F) -> ClientOption
where
    F: Fn() -> String + Send + Sync + 'static,
{
    Box::new(move |inner| {
        Arc::new(AddHeaderTransport {
            inner,
            name,
            value: HeaderSource::Dynamic(Box::new(value_fn)),
            trusted_host: github_host_override(),
        })
    })
}

struct VerboseTransport {
    inner: Arc<dyn Transport>,
    log_traffic: bool,
}

#[async_trait]
impl Transport for VerboseTransport {
    async fn send(&self, req: Request) -> Result<Response, Error> {
        tracing::debug!(method = %req.method, url = %req.url, "> request");
        if self.log_traffic {
            let content_type = req
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if let Some(body) = req.body.as_deref() {
                if inspectable_mime_type(content_type) {
                    tracing::debug!(body = %String::from_utf8_lossy(body), "> request body");
                }
            }
        }

        let resp = self.inner.send(req).await?;

        tracing::debug!(status = %resp.status, url = %resp.url, "< response");
        if self.log_traffic && inspectable_mime_type(resp.content_type()) {
            tracing::debug!(body = %String::from_utf8_lossy(&resp.body), "< response body");
        }
        Ok(resp)
    }
}

/// Enables request/response logging through `tracing`.
///
/// Metadata is always logged; bodies only when `log_traffic` is set and the
/// content type is textual or JSON, so binary payloads are never dumped.
pub fn verbose_log(log_traffic: bool) -> ClientOption {
    Box::new(move |inner| Arc::new(VerboseTransport { inner, log_traffic }))
}

/// Substitutes the underlying transport with a custom one, discarding
/// whatever it would have wrapped. Intended for tests.
pub fn replace_transport(transport: Arc<dyn Transport>) -> ClientOption {
    Box::new(move |_| transport)
}

fn inspectable_mime_type(t: &str) -> bool {
    if t.starts_with("text/") {
        return true;
    }
    // strip any parameter, e.g. "application/json; charset=utf-8"
    let essence = t.split(';').next().unwrap_or("").trim();
    essence.ends_with("/json") || essence.ends_with("+json")
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;

    fn compose(base: Arc<dyn Transport>, options: Vec<ClientOption>) -> Arc<dyn Transport> {
        let mut transport = base;
        for option in options {
            transport = option(transport);
        }
        transport
    }

    #[test]
    fn inspectable_mime_types() {
        assert!(inspectable_mime_type("text/plain"));
        assert!(inspectable_mime_type("text/html; charset=utf-8"));
        assert!(inspectable_mime_type("application/json"));
        assert!(inspectable_mime_type("application/json; charset=utf-8"));
        assert!(inspectable_mime_type("application/vnd.github.v3+json"));
        assert!(!inspectable_mime_type("application/octet-stream"));
        assert!(!inspectable_mime_type("image/png"));
        assert!(!inspectable_mime_type("application/jsonx"));
    }

    #[tokio::test]
    async fn authorization_header_reaches_github_hosts() {
        let recorder = Arc::new(RecordingTransport::ok());
        let transport = compose(
            recorder.clone(),
            vec![add_header(
                AUTHORIZATION,
                HeaderValue::from_static("token s3cret"),
            )],
        );

        let req = Request::new(
            Method::GET,
            Url::parse("https://api.github.com/user").unwrap(),
        );
        transport.send(req).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            seen[0].headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "token s3cret"
        );
    }

    #[tokio::test]
    async fn authorization_header_suppressed_for_other_hosts() {
        let recorder = Arc::new(RecordingTransport::ok());
        let transport = compose(
            recorder.clone(),
            vec![add_header_func(AUTHORIZATION, || {
                "token s3cret".to_string()
            })],
        );

        for url in [
            "https://example.com/user",
            "https://github.com.evil.net/user",
            "https://api.example.com/github.com",
        ] {
            let req = Request::new(Method::GET, Url::parse(url).unwrap());
            transport.send(req).await.unwrap();
        }

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for req in seen.iter() {
            assert!(req.headers.get(AUTHORIZATION).is_none());
        }
    }

    #[tokio::test]
    async fn authorization_header_reaches_the_configured_override_host() {
        let recorder = Arc::new(RecordingTransport::ok());
        let transport: Arc<dyn Transport> = Arc::new(AddHeaderTransport {
            inner: recorder.clone(),
            name: AUTHORIZATION,
            value: HeaderSource::Static(HeaderValue::from_static("token s3cret")),
            trusted_host: Some("github.example.com".to_string()),
        });

        let req = Request::new(
            Method::GET,
            Url::parse("https://github.example.com/api/v3/user").unwrap(),
        );
        transport.send(req).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            seen[0].headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "token s3cret"
        );
    }

    #[test]
    fn authorization_host_allow_list() {
        let auth = AUTHORIZATION;
        let allowed = |trusted: Option<&str>, url: &str| {
            header_allowed_for_host(&auth, trusted, &Url::parse(url).unwrap())
        };

        assert!(allowed(None, "https://api.github.com/user"));
        assert!(allowed(None, "https://github.com/login"));
        assert!(!allowed(None, "https://example.com/user"));
        assert!(!allowed(None, "https://github.example.com/api/v3/user"));

        // a configured deployment host is trusted, exactly
        assert!(allowed(Some("github.example.com"), "https://github.example.com/api/v3/user"));
        assert!(!allowed(Some("github.example.com"), "https://github.example.org/api/v3/user"));
        assert!(!allowed(Some("github.example.com"), "https://evil.github.example.com.net/"));
    }

    #[tokio::test]
    async fn non_authorization_headers_go_everywhere() {
        let recorder = Arc::new(RecordingTransport::ok());
        let transport = compose(
            recorder.clone(),
            vec![add_header(
                HeaderName::from_static("user-agent"),
                HeaderValue::from_static("GitHub CLI"),
            )],
        );

        let req = Request::new(Method::GET, Url::parse("https://example.com/").unwrap());
        transport.send(req).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            seen[0].headers.get("user-agent").unwrap().to_str().unwrap(),
            "GitHub CLI"
        );
    }

    #[tokio::test]
    async fn options_compose_with_the_last_one_outermost() {
        let recorder = Arc::new(RecordingTransport::ok());
        let name = HeaderName::from_static("x-order");
        // append preserves insertion order for repeated header names, so the
        // outermost decorator's value comes first
        let transport = compose(
            recorder.clone(),
            vec![
                add_header(name.clone(), HeaderValue::from_static("inner")),
                add_header(name.clone(), HeaderValue::from_static("outer")),
            ],
        );

        let req = Request::new(Method::GET, Url::parse("https://example.com/").unwrap());
        transport.send(req).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        let values: Vec<_> = seen[0]
            .headers
            .get_all(&name)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn replace_transport_discards_the_wrapped_sender() {
        let recorder = Arc::new(RecordingTransport::ok());
        let replacement = Arc::new(RecordingTransport::ok());
        let transport = compose(
            recorder.clone(),
            vec![replace_transport(replacement.clone())],
        );

        let req = Request::new(Method::GET, Url::parse("https://example.com/").unwrap());
        transport.send(req).await.unwrap();

        assert_eq!(recorder.seen.lock().unwrap().len(), 0);
        assert_eq!(replacement.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verbose_logger_is_transparent_to_traffic() {
        let recorder = Arc::new(RecordingTransport::ok());
        let transport = compose(recorder.clone(), vec![verbose_log(true)]);

        let mut req = Request::new(Method::POST, Url::parse("https://example.com/").unwrap());
        req.body = Some(b"{}".to_vec());
        let resp = transport.send(req).await.unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(recorder.seen.lock().unwrap()[0].body.as_deref(), Some(b"{}".as_slice()));
    }

    #[tokio::test]
    async fn dynamic_header_reflects_value_changes_between_calls() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let recorder = Arc::new(RecordingTransport::ok());
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let transport = compose(
            recorder.clone(),
            vec![add_header_func(HeaderName::from_static("x-call"), move || {
                format!("{}", counter2.fetch_add(1, Ordering::SeqCst))
            })],
        );

        let url = Url::parse("https://example.com/").unwrap();
        transport.send(Request::new(Method::GET, url.clone())).await.unwrap();
        transport.send(Request::new(Method::GET, url)).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].headers.get("x-call").unwrap().to_str().unwrap(), "0");
        assert_eq!(seen[1].headers.get("x-call").unwrap().to_str().unwrap(), "1");
    }
}

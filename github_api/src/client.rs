//! API client: REST and GraphQL dispatch over the decorated transport.

use std::sync::Arc;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::errors::{Error, GraphQlError, GraphQlErrorResponse};
use crate::scopes::{OAUTH_APP_ID_HEADER, OAUTH_SCOPES_HEADER};
use crate::transport::{ClientOption, ReqwestTransport, Request, Response, Transport};

fn json_content_type() -> HeaderValue {
    HeaderValue::from_static("application/json; charset=utf-8")
}

/// Endpoint selection for REST and GraphQL calls.
///
/// The default host is `api.github.com`; the `GITHUB_HOST` environment
/// variable redirects both protocols to a self-hosted deployment, where REST
/// lives under a versioned sub-path.
#[derive(Debug, Clone)]
pub struct Endpoints {
    rest_base: Url,
    graphql: Url,
}

impl Endpoints {
    /// Reads the `GITHUB_HOST` override, falling back to the default host.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var("GITHUB_HOST") {
            Ok(host) if !host.is_empty() => Self::for_host(&host),
            _ => Ok(Self {
                rest_base: Url::parse("https://api.github.com/")?,
                graphql: Url::parse("https://api.github.com/graphql")?,
            }),
        }
    }

    /// Endpoints for a self-hosted deployment of the service.
    pub fn for_host(host: &str) -> Result<Self, Error> {
        Ok(Self {
            rest_base: Url::parse(&format!("https://{host}/api/v3/"))?,
            graphql: Url::parse(&format!("https://{host}/api/graphql"))?,
        })
    }

    /// Routes both REST and GraphQL under one base URL. Used for testing
    /// with wiremock.
    pub fn with_base_url(base: &str) -> Result<Self, Error> {
        let rest_base = Url::parse(&format!("{}/", base.trim_end_matches('/')))?;
        let graphql = rest_base.join("graphql")?;
        Ok(Self { rest_base, graphql })
    }

    // A leading slash would make Url::join reset to the host root and drop
    // the versioned sub-path under a host override, so strip it.
    fn rest_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.rest_base.join(path.trim_start_matches('/'))?)
    }
}

/// Client for making authenticated API requests.
///
/// Owns one transport composed from the options given at construction;
/// otherwise stateless, so it is cheap to clone and safe to share across
/// concurrent tasks.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
}

impl Client {
    /// Builds a client from an ordered list of transport decorators. The
    /// last option in the list becomes the outermost decorator: it sees the
    /// request first and the response last.
    pub fn new(options: Vec<ClientOption>) -> Result<Self, Error> {
        Self::with_endpoints(Endpoints::from_env()?, options)
    }

    /// Builds a client with both protocols routed under `base`. Used for
    /// testing with wiremock.
    pub fn with_base_url(base: &str, options: Vec<ClientOption>) -> Result<Self, Error> {
        Self::with_endpoints(Endpoints::with_base_url(base)?, options)
    }

    pub fn with_endpoints(endpoints: Endpoints, options: Vec<ClientOption>) -> Result<Self, Error> {
        let mut transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new()?);
        for option in options {
            transport = option(transport);
        }
        Ok(Self {
            transport,
            endpoints,
        })
    }

    /// Performs a GraphQL query and deserializes the `data` field of the
    /// response envelope.
    ///
    /// A response with a non-empty error list fails with
    /// [`Error::GraphQl`] even when partial `data` accompanied the errors;
    /// the partial payload is discarded. Known limitation.
    ///
    /// An error-free envelope without a `data` field deserializes as JSON
    /// null, so it only succeeds for a `T` that accepts null (e.g.
    /// `Option<_>` or `serde_json::Value`); for anything else it fails with
    /// [`Error::Deserialize`]. There is no untyped output to leave
    /// untouched.
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, Error> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "query": query,
            "variables": variables,
        }))?;

        let mut req = Request::new(Method::POST, self.endpoints.graphql.clone());
        req.headers.insert(CONTENT_TYPE, json_content_type());
        req.body = Some(payload);

        let resp = self.transport.send(req).await?;
        handle_response(resp)
    }

    /// Performs a REST request against `path` (relative to the REST base;
    /// a leading slash is tolerated) and deserializes the response body.
    ///
    /// Returns `Ok(None)` for a 204 response; any other success status must
    /// carry a decodable body.
    pub async fn rest<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>, Error> {
        let url = self.endpoints.rest_url(path)?;
        let mut req = Request::new(method, url);
        req.headers.insert(CONTENT_TYPE, json_content_type());
        if let Some(body) = body {
            req.body = Some(serde_json::to_vec(&body)?);
        }

        let resp = self.transport.send(req).await?;
        if !resp.status.is_success() {
            return Err(handle_http_error(&resp));
        }
        if resp.status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&resp.body)?))
    }

    /// Reports whether the active credential carries every wanted scope,
    /// along with the OAuth app id advertised by the service (empty when
    /// absent).
    ///
    /// A `read:`-prefixed scope is also satisfied by its `admin:` analog.
    pub async fn has_scopes(&self, wanted: &[&str]) -> Result<(bool, String), Error> {
        let url = self.endpoints.rest_url("user")?;
        let mut req = Request::new(Method::GET, url);
        req.headers.insert(CONTENT_TYPE, json_content_type());

        let resp = self.transport.send(req).await?;
        if !resp.status.is_success() {
            return Err(handle_http_error(&resp));
        }

        let app_id = resp.header_str(OAUTH_APP_ID_HEADER).unwrap_or("").to_string();
        let granted: Vec<&str> = resp
            .header_str(OAUTH_SCOPES_HEADER)
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .collect();

        let satisfied = wanted.iter().all(|w| {
            crate::scopes::scope_candidates(w)
                .iter()
                .any(|c| granted.contains(&c.as_str()))
        });

        Ok((satisfied, app_id))
    }
}

#[derive(Deserialize)]
struct GraphQlEnvelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T, Error> {
    if !resp.status.is_success() {
        return Err(handle_http_error(&resp));
    }

    let envelope: GraphQlEnvelope = serde_json::from_slice(&resp.body)?;
    if let Some(errors) = envelope.errors {
        if !errors.is_empty() {
            return Err(GraphQlErrorResponse { errors }.into());
        }
    }

    let data = envelope.data.unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(data)?)
}

fn handle_http_error(resp: &Response) -> Error {
    #[derive(Deserialize, Default)]
    struct ErrorBody {
        #[serde(default)]
        message: String,
    }

    let message = serde_json::from_slice::<ErrorBody>(&resp.body)
        .map(|b| b.message)
        .unwrap_or_default();

    Error::Http {
        status: resp.status.as_u16(),
        url: resp.url.clone(),
        message,
    }
}

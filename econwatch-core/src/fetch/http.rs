//! HTTP transport abstraction.
//!
//! Fetchers only see the [`Transport`] trait, so tests and offline runs swap
//! in [`CannedTransport`] without touching the network.

use crate::error::FetchError;
use std::time::Duration;
use tracing::debug;

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub accept: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            accept: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }

    /// URL with the query string appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}?{}", self.url, query.join("&"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can perform GET requests.
///
/// Only transport-level failures are errors; any HTTP status is a response.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;

    /// Body of a successful response; non-2xx statuses become [`FetchError::HttpStatus`].
    fn get_text(&self, request: &HttpRequest) -> Result<String, FetchError> {
        let response = self.get(request)?;
        if !response.is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status,
                url: request.full_url(),
            });
        }
        Ok(response.body)
    }
}

/// Blocking reqwest client with a fixed timeout and a browser-like user agent.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = self.client.get(&request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(accept) = &request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept.as_str());
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Transport(format!("timeout fetching {}", request.url))
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| FetchError::Transport(format!("reading body of {}: {e}", request.url)))?;
        debug!(url = %request.url, status, bytes = body.len(), "http response");
        Ok(HttpResponse { status, body })
    }
}

/// Fixed responses keyed by URL prefix. Unrouted URLs fail as transport errors.
///
/// An empty `CannedTransport` is an offline transport: every fetch degrades.
#[derive(Debug, Clone, Default)]
pub struct CannedTransport {
    routes: Vec<(String, Option<String>, HttpResponse)>,
}

impl CannedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose full URL starts with `prefix`.
    pub fn route(mut self, prefix: &str, response: HttpResponse) -> Self {
        self.routes.push((prefix.to_string(), None, response));
        self
    }

    /// Like [`route`](Self::route), but only for requests sending this `Accept` header.
    pub fn route_accept(mut self, prefix: &str, accept: &str, response: HttpResponse) -> Self {
        self.routes
            .push((prefix.to_string(), Some(accept.to_string()), response));
        self
    }
}

impl Transport for CannedTransport {
    fn name(&self) -> &str {
        "canned"
    }

    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let url = request.full_url();
        self.routes
            .iter()
            .find(|(prefix, accept, _)| {
                url.starts_with(prefix.as_str())
                    && accept.as_ref().map_or(true, |a| request.accept.as_ref() == Some(a))
            })
            .map(|(_, _, response)| response.clone())
            .ok_or_else(|| FetchError::Transport(format!("no route for {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_appends_query() {
        let req = HttpRequest::get("https://api.test/data/EXR/D.GBP")
            .query("startPeriod", "2025-01-01")
            .query("format", "csvdata");
        assert_eq!(
            req.full_url(),
            "https://api.test/data/EXR/D.GBP?startPeriod=2025-01-01&format=csvdata"
        );
        assert_eq!(HttpRequest::get("https://x.test").full_url(), "https://x.test");
    }

    #[test]
    fn canned_transport_routes_by_prefix() {
        let t = CannedTransport::new()
            .route("https://a.test/one", HttpResponse::ok("one"))
            .route(
                "https://a.test/",
                HttpResponse {
                    status: 503,
                    body: String::new(),
                },
            );
        assert_eq!(t.get_text(&HttpRequest::get("https://a.test/one/x")).unwrap(), "one");
        assert!(matches!(
            t.get_text(&HttpRequest::get("https://a.test/two")),
            Err(FetchError::HttpStatus { status: 503, .. })
        ));
        assert!(matches!(
            t.get_text(&HttpRequest::get("https://b.test/")),
            Err(FetchError::Transport(_))
        ));
    }

    #[test]
    fn canned_transport_can_match_accept_header() {
        let t = CannedTransport::new()
            .route_accept("https://a.test", "text/csv", HttpResponse::ok("csv"))
            .route(
                "https://a.test",
                HttpResponse {
                    status: 406,
                    body: String::new(),
                },
            );
        let plain = HttpRequest::get("https://a.test");
        assert_eq!(t.get(&plain).unwrap().status, 406);
        assert_eq!(t.get_text(&plain.accept("text/csv")).unwrap(), "csv");
    }
}

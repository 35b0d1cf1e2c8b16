//! GET, POST and DELETE actions.
//!
//! The network is reached through the [`HttpInterpreter`] collaborator so
//! that rules can be evaluated against a mock in tests. [`ReqwestInterpreter`]
//! is the production implementation.
//!
//! # Request construction
//!
//! | Part | Source |
//! |------|--------|
//! | URL | the location macro, which must expand to an absolute http(s) URL |
//! | headers | the webhook's headers minus `Content-Length` and `Host`, then the headers SET in the WITH body |
//! | GET query | the payload built by the WITH body (arrays become repeated keys) |
//! | POST body | the payload built by the WITH body, else the webhook's payload |
//!
//! `Content-Type: application/json` is added when no header provides one.
//!
//! # Outcome
//!
//! | Status | INTO | Result |
//! |--------|------|--------|
//! | 2xx | no | body printed, webhook consumed, TRUE |
//! | 2xx | yes | body stored, TRUE |
//! | other | yes | body stored, TRUE |
//! | other | no | logged, FALSE |

use std::rc::Rc;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::directive::{HttpAction, Method};
use super::eval::Eval;
use super::macros::{Expand, render_any};
use super::payload::set_path;
use super::truth::Truth;
use crate::types::Headers;
use crate::webhook::WebHook;

/// Connect timeout for outbound requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total timeout for outbound requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// An outbound request, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// The response to an [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True if the media type (parameters ignored) is `application/json`.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("application/json"))
    }
}

/// The request never produced a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Client(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Performs outbound HTTP requests.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct Always200;
///
/// impl HttpInterpreter for Always200 {
///     fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
///         Ok(HttpResponse { status: 200, content_type: None, body: String::new() })
///     }
/// }
/// ```
pub trait HttpInterpreter {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking `reqwest` client with fixed connect and request timeouts.
#[derive(Debug, Clone)]
pub struct ReqwestInterpreter {
    client: Client,
}

impl ReqwestInterpreter {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .http1_only()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ReqwestInterpreter { client })
    }
}

impl HttpInterpreter for ReqwestInterpreter {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text()?;
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

impl HttpAction {
    pub(super) fn apply(&self, hook: &mut WebHook<'_>) -> Eval {
        let method = self.method;
        let line = self.line;

        let Some(location) = self.location.eval(hook, Expand::Strict) else {
            warn!("[{}] Macro expanded to null: {} at line {}", method, self.location, line);
            return Ok(Truth::False);
        };
        let mut url = match Url::parse(&location) {
            Ok(url) => url,
            Err(e) => {
                warn!("[{}] Invalid URI {}: {} at line {}", method, location, e, line);
                return Ok(Truth::False);
            }
        };
        if !matches!(url.scheme(), "http" | "https") {
            warn!("[{}] Unsupported scheme {} at line {}", method, url.scheme(), line);
            return Ok(Truth::False);
        }

        if hook.context().is_dry() {
            debug!(%method, %url, "dry run, request skipped");
            hook.context().consume();
            return Ok(Truth::True);
        }

        let built = match &self.body {
            Some(body) => {
                let mut sandbox = WebHook::sandbox(&*hook);
                if body.apply(&mut sandbox)?.is_false() {
                    warn!("[{}] WITH body failed at line {}", method, line);
                    return Ok(Truth::False);
                }
                Some(sandbox.into_parts())
            }
            None => None,
        };

        let mut headers: Headers = hook
            .headers()
            .iter()
            .filter(|h| !h.is("Content-Length") && !h.is("Host"))
            .cloned()
            .collect();
        if let Some((extra, _)) = &built {
            for header in extra {
                headers.set(header.name(), header.value());
            }
        }
        if headers.get("Content-Type").is_none() {
            headers.set("Content-Type", "application/json");
        }

        let body = match method {
            Method::Get => {
                if let Some((_, query)) = &built {
                    append_query(&mut url, query);
                }
                None
            }
            Method::Post => Some(match &built {
                Some((_, payload)) => Value::Object(payload.clone()).to_string(),
                None => Value::Object(hook.payload().clone()).to_string(),
            }),
            Method::Delete => None,
        };

        let request = HttpRequest {
            method,
            url: url.clone(),
            headers: headers
                .iter()
                .map(|h| (h.name().to_string(), h.value().to_string()))
                .collect(),
            body,
        };
        let runtime = Rc::clone(hook.context().runtime());
        let response = match runtime.http().send(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("[{}] {} failed: {} at line {}", method, url, e, line);
                return Ok(Truth::False);
            }
        };
        debug!(%method, %url, status = response.status, "response received");

        if let Some(into) = &self.into {
            let value = if response.is_json() {
                match serde_json::from_str(&response.body) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("[{}] Invalid JSON from {}: {} at line {}", method, url, e, line);
                        Value::String(response.body)
                    }
                }
            } else {
                Value::String(response.body)
            };
            let path = into.strip_prefix('$').unwrap_or(into);
            if let Err(e) = set_path(hook.payload_mut(), path, value) {
                warn!("[{}] INTO {}: {} at line {}", method, into, e, line);
                return Ok(Truth::False);
            }
            return Ok(Truth::True);
        }

        if response.is_success() {
            runtime.console().print(&response.body);
            hook.context().consume();
            Ok(Truth::True)
        } else {
            warn!(
                "[{}] {} {} {} at line {}",
                method, response.status, url, response.body, line
            );
            Ok(Truth::False)
        }
    }
}

fn append_query(url: &mut Url, query: &Map<String, Value>) {
    if query.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in query {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.append_pair(key, &render_any(item));
                }
            }
            other => {
                pairs.append_pair(key, &render_any(other));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_media_type_ignores_parameters() {
        let response = |ct: Option<&str>| HttpResponse {
            status: 200,
            content_type: ct.map(str::to_string),
            body: String::new(),
        };
        assert!(response(Some("application/json")).is_json());
        assert!(response(Some("Application/JSON; charset=utf-8")).is_json());
        assert!(!response(Some("text/plain")).is_json());
        assert!(!response(None).is_json());
    }

    #[test]
    fn success_is_2xx() {
        let response = |status| HttpResponse {
            status,
            content_type: None,
            body: String::new(),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(301).is_success());
        assert!(!response(500).is_success());
    }

    #[test]
    fn query_repeats_array_keys() {
        let mut url = Url::parse("http://example.com/path?a=0").unwrap();
        let query = serde_json::json!({"a": [1, 2], "b": "x y", "c": true});
        append_query(&mut url, query.as_object().unwrap());
        assert_eq!(url.as_str(), "http://example.com/path?a=0&a=1&a=2&b=x+y&c=true");
    }

    #[test]
    fn empty_query_leaves_url_untouched() {
        let mut url = Url::parse("http://example.com/").unwrap();
        append_query(&mut url, &Map::new());
        assert_eq!(url.as_str(), "http://example.com/");
    }
}

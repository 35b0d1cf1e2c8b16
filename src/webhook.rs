//! The unit of work: one webhook and the scope it is evaluated in.
//!
//! # Record format
//!
//! Webhooks arrive as files in the spool (or as plain hook files). A record
//! is three blocks separated by empty lines:
//!
//! ```text
//! /github/push              <- request URI
//!
//! Content-Type: application/json
//! X-GitHub-Event: push      <- headers, one per line
//!
//! {"ref": "refs/heads/main"} <- JSON payload (the rest of the file)
//! ```
//!
//! Carriage returns are ignored. The payload must be a JSON object and the
//! `Content-Type` header must be `application/json`.
//!
//! # Path resolution
//!
//! Directives address data with three kinds of paths:
//!
//! | Path | Resolves to |
//! |------|-------------|
//! | `$a.b` | payload field `b` of object `a` |
//! | `%a.b`, `%%a.b` | context variable `a`, field `b` |
//! | anything else | the header of that name |

use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::Context;
use crate::filter::payload::get_path;
use crate::types::{Header, Headers};

/// A webhook record that could not be loaded.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("cannot read webhook record: {0}")]
    Io(#[from] io::Error),

    /// The blocks or header lines of the record are malformed.
    #[error("malformed webhook record: {0}")]
    Malformed(String),

    /// Missing or unsupported `Content-Type`.
    #[error("unsupported content type: {}", .0.as_deref().unwrap_or("<missing>"))]
    ContentType(Option<String>),

    /// The payload is not a JSON object.
    #[error("invalid JSON payload: {0}")]
    Json(String),
}

/// A parsed on-disk webhook record.
#[derive(Debug, Clone, PartialEq)]
pub struct WebHookRecord {
    pub request_uri: String,
    pub headers: Headers,
    pub payload: Map<String, Value>,
}

impl WebHookRecord {
    pub fn read(path: &Path) -> Result<Self, RecordError> {
        Self::parse(&fs::read(path)?)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RecordError::Malformed(format!("not UTF-8: {e}")))?
            .replace('\r', "");

        let (uri, rest) = text
            .split_once("\n\n")
            .ok_or_else(|| RecordError::Malformed("missing blank line after request URI".into()))?;
        let (header_block, body) = rest
            .split_once("\n\n")
            .ok_or_else(|| RecordError::Malformed("missing blank line after headers".into()))?;

        let request_uri = uri.trim().to_string();
        if request_uri.is_empty() {
            return Err(RecordError::Malformed("empty request URI".into()));
        }

        let headers = header_block
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Header::parse)
            .collect::<Result<Headers, _>>()
            .map_err(|e| RecordError::Malformed(e.to_string()))?;

        let content_type = headers.get("Content-Type");
        let media_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(str::trim);
        if !media_type.is_some_and(|m| m.eq_ignore_ascii_case("application/json")) {
            return Err(RecordError::ContentType(content_type.map(str::to_string)));
        }

        let payload = match serde_json::from_str(body) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(RecordError::Json(format!(
                    "expected an object, found {}",
                    crate::filter::payload::JsonType::of(Some(&other))
                )));
            }
            Err(e) => return Err(RecordError::Json(e.to_string())),
        };

        Ok(WebHookRecord {
            request_uri,
            headers,
            payload,
        })
    }

    /// Turns the record into a webhook evaluated in `context`.
    pub fn into_hook(self, context: Rc<Context>) -> WebHook<'static> {
        WebHook::new(self.request_uri, self.headers, self.payload, context)
    }
}

/// Where a webhook loaded from the spool lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolJob {
    pub queue: String,
    pub name: String,
}

/// A webhook under evaluation.
///
/// A sandbox webhook (see [`WebHook::sandbox`]) has an `origin`: its header
/// and payload reads go to the origin, while writes land in its own, initially
/// empty, headers and payload.
#[derive(Debug)]
pub struct WebHook<'a> {
    request_uri: String,
    headers: Headers,
    payload: Map<String, Value>,
    context: Rc<Context>,
    job: Option<SpoolJob>,
    origin: Option<&'a WebHook<'a>>,
}

impl<'a> WebHook<'a> {
    pub fn new(
        request_uri: impl Into<String>,
        headers: Headers,
        payload: Map<String, Value>,
        context: Rc<Context>,
    ) -> Self {
        WebHook {
            request_uri: request_uri.into(),
            headers,
            payload,
            context,
            job: None,
            origin: None,
        }
    }

    /// Marks this webhook as job `name` of spool queue `queue`.
    pub fn with_job(mut self, queue: impl Into<String>, name: impl Into<String>) -> Self {
        self.job = Some(SpoolJob {
            queue: queue.into(),
            name: name.into(),
        });
        self
    }

    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn context(&self) -> &Rc<Context> {
        &self.context
    }

    pub fn job(&self) -> Option<&SpoolJob> {
        self.job.as_ref()
    }

    /// This webhook's own headers, ignoring any origin.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// This webhook's own payload, ignoring any origin.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.payload
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Reads a header, from the origin for a sandbox.
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.origin {
            Some(origin) => origin.header(name),
            None => self.headers.get(name),
        }
    }

    /// Reads a payload value by dotted path, from the origin for a sandbox.
    pub fn payload_value(&self, path: &str) -> Option<&Value> {
        match self.origin {
            Some(origin) => origin.payload_value(path),
            None => get_path(&self.payload, path),
        }
    }

    /// Reads a context variable by dotted path.
    pub fn variable(&self, path: &str) -> Option<Value> {
        self.context.get(path)
    }

    /// Resolves a `$payload`, `%variable` or header path.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        if let Some(payload) = path.strip_prefix('$') {
            return self.payload_value(payload).cloned();
        }
        if let Some(variable) = path.strip_prefix("%%").or_else(|| path.strip_prefix('%')) {
            return self.variable(variable);
        }
        self.header(path).map(|h| Value::String(h.to_string()))
    }

    /// A deep copy with a child context. Changes to the copy do not leak back.
    pub fn copy(&self) -> WebHook<'a> {
        WebHook {
            request_uri: self.request_uri.clone(),
            headers: self.headers.clone(),
            payload: self.payload.clone(),
            context: Context::child(&self.context),
            job: self.job.clone(),
            origin: self.origin,
        }
    }

    /// Consumes the webhook, returning its own headers and payload.
    pub fn into_parts(self) -> (Headers, Map<String, Value>) {
        (self.headers, self.payload)
    }

    /// A view of `origin` with empty headers and payload and a child context.
    pub fn sandbox(origin: &'a WebHook<'a>) -> WebHook<'a> {
        WebHook {
            request_uri: origin.request_uri.clone(),
            headers: Headers::new(),
            payload: Map::new(),
            context: Context::child(&origin.context),
            job: origin.job.clone(),
            origin: Some(origin),
        }
    }
}

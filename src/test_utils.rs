//! Shared test doubles: a recording console, a scripted HTTP client and a
//! builder for webhooks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::context::Context;
use crate::filter::{Directive, DirectiveParser, HttpInterpreter, HttpRequest, HttpResponse, TransportError};
use crate::runtime::{Console, Runtime};
use crate::spool::SpoolManager;
use crate::types::Headers;
use crate::webhook::WebHook;

/// Parses a rule body, panicking on error.
pub fn rules(text: &str) -> Directive {
    DirectiveParser::new(text)
        .parse_directive()
        .unwrap_or_else(|e| panic!("{text:?} failed to parse: {e}"))
}

#[derive(Default)]
pub struct RecordingConsole {
    lines: RefCell<Vec<String>>,
}

impl Console for RecordingConsole {
    fn print(&self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

/// Replays scripted responses in order, then answers 200 with an empty body.
#[derive(Default)]
pub struct MockHttp {
    responses: RefCell<VecDeque<Result<HttpResponse, String>>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl HttpInterpreter for MockHttp {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.borrow_mut().push(request);
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Other(message)),
            None => Ok(response(200, None, "")),
        }
    }
}

pub fn response(status: u16, content_type: Option<&str>, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        content_type: content_type.map(str::to_string),
        body: body.to_string(),
    }
}

/// A [`Runtime`] wired to a [`RecordingConsole`] and a [`MockHttp`].
pub struct TestRuntime {
    console: Rc<RecordingConsole>,
    http: Rc<MockHttp>,
    runtime: Rc<Runtime>,
}

impl TestRuntime {
    pub fn new() -> Self {
        let console = Rc::new(RecordingConsole::default());
        let http = Rc::new(MockHttp::default());
        let runtime = Rc::new(Runtime::new(http.clone(), console.clone()));
        TestRuntime {
            console,
            http,
            runtime,
        }
    }

    pub fn with_spool(self, spool: SpoolManager) -> Self {
        let runtime = Rc::new(Runtime::new(self.http.clone(), self.console.clone()).with_spool(spool));
        TestRuntime { runtime, ..self }
    }

    pub fn runtime(&self) -> Rc<Runtime> {
        Rc::clone(&self.runtime)
    }

    /// Queues the result of the next unanswered request.
    pub fn respond(&self, result: Result<HttpResponse, &str>) {
        self.http
            .responses
            .borrow_mut()
            .push_back(result.map_err(str::to_string));
    }

    pub fn printed(&self) -> Vec<String> {
        self.console.lines.borrow().clone()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.http.requests.borrow().clone()
    }
}

/// Builds a root webhook for tests.
pub struct HookBuilder {
    request_uri: String,
    headers: Headers,
    payload: Map<String, Value>,
    job: Option<(String, String)>,
    rules: Option<Rc<Directive>>,
}

impl HookBuilder {
    pub fn new() -> Self {
        HookBuilder {
            request_uri: "/test".to_string(),
            headers: Headers::new(),
            payload: Map::new(),
            job: None,
            rules: None,
        }
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.request_uri = uri.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Replaces the payload. `payload` must be a JSON object.
    pub fn payload(mut self, payload: Value) -> Self {
        match payload {
            Value::Object(map) => self.payload = map,
            other => panic!("payload must be an object, got {other}"),
        }
        self
    }

    pub fn job(mut self, queue: &str, name: &str) -> Self {
        self.job = Some((queue.to_string(), name.to_string()));
        self
    }

    /// The rules REENTER re-applies.
    pub fn rules(mut self, rules: Rc<Directive>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn build(self, rt: &TestRuntime) -> WebHook<'static> {
        let context = Context::root(rt.runtime(), self.rules);
        let hook = WebHook::new(self.request_uri, self.headers, self.payload, context);
        match self.job {
            Some((queue, name)) => hook.with_job(queue, name),
            None => hook,
        }
    }
}

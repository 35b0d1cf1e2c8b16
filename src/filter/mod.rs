//! The rule language: parsing and evaluation of directives.
//!
//! A rule file is parsed by [`DirectiveParser`] into a [`Configuration`],
//! a table from queue name to a [`Directive`] tree. Evaluating a tree
//! against a [`WebHook`](crate::webhook::WebHook) yields a [`Truth`], or a
//! [`Halt`] when evaluation stops early.
//!
//! ```text
//! X-GitHub-Event: push
//! $ref: refs/heads/main
//! POST https://ci.example.com/build WITH {
//!   SET $sha: ${after}
//! }
//!
//! OTHERWISE LOG ignored ${X-GitHub-Event}
//! ```

pub mod config;
pub mod directive;
pub mod error;
pub mod eval;
pub mod http;
pub mod macros;
pub mod parser;
pub mod payload;
pub mod truth;


pub use config::{Configuration, QueueDecl};
pub use directive::Directive;
pub use error::{Halt, ParseError, ParseResult};
pub use eval::Eval;
pub use http::{HttpInterpreter, HttpRequest, HttpResponse, ReqwestInterpreter, TransportError};
pub use macros::{Expand, MacroString};
pub use parser::DirectiveParser;
pub use payload::JsonType;
pub use truth::Truth;

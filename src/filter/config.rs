//! Parsed rule files: one directive tree per queue.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::directive::{Directive, Group};
use super::error::ParseResult;
use super::eval::Eval;
use super::parser::DirectiveParser;
use crate::spool::{DEFAULT_QUEUE, RetentionPolicy};
use crate::webhook::WebHook;

/// `QUEUE name [RETENTION ...] { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDecl {
    pub name: String,
    pub retention: Option<RetentionPolicy>,
    pub body: Rc<Directive>,
}

/// The dispatch table from queue name to rules.
///
/// Always contains the `default` queue. A rule file without QUEUE
/// declarations is the body of an implicit `default` queue; a file with
/// declarations but no `default` queue gets an empty one.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    queues: BTreeMap<String, QueueDecl>,
    /// True when the rule file declared no queues.
    implicit: bool,
}

impl Configuration {
    /// Parses a complete rule file.
    pub fn parse(text: &str) -> ParseResult<Self> {
        DirectiveParser::new(text).parse_configuration()
    }

    /// A configuration whose only queue is `default` with `body`.
    pub fn from_default(body: Option<Directive>) -> Self {
        let body = body.unwrap_or(Directive::OrSequence(Vec::new()));
        let mut queues = BTreeMap::new();
        queues.insert(DEFAULT_QUEUE.to_string(), queue_decl(DEFAULT_QUEUE, body));
        Configuration {
            queues,
            implicit: true,
        }
    }

    /// A configuration of declared queues. Names must be distinct.
    pub fn from_queues(decls: Vec<QueueDecl>) -> Self {
        let mut queues: BTreeMap<String, QueueDecl> = decls
            .into_iter()
            .map(|decl| (decl.name.clone(), decl))
            .collect();
        queues
            .entry(DEFAULT_QUEUE.to_string())
            .or_insert_with(|| queue_decl(DEFAULT_QUEUE, Directive::OrSequence(Vec::new())));
        Configuration {
            queues,
            implicit: false,
        }
    }

    /// Queues in name order.
    pub fn queues(&self) -> impl Iterator<Item = &QueueDecl> {
        self.queues.values()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueDecl> {
        self.queues.get(name)
    }

    pub fn rules(&self, name: &str) -> Option<Rc<Directive>> {
        self.queues.get(name).map(|decl| Rc::clone(&decl.body))
    }

    /// Evaluates the rules of queue `name` against `hook`.
    ///
    /// Returns `None` if no such queue is declared.
    pub fn call(&self, name: &str, hook: &mut WebHook<'_>) -> Option<Eval> {
        self.queues.get(name).map(|decl| decl.body.apply(hook))
    }

    /// Forces a dry run: every queue body becomes `DRY` followed by the body.
    pub fn make_dry(&mut self) {
        for decl in self.queues.values_mut() {
            decl.body = Rc::new(Directive::AndSequence(vec![
                Directive::Dry,
                (*decl.body).clone(),
            ]));
        }
    }
}

fn queue_decl(name: &str, body: Directive) -> QueueDecl {
    QueueDecl {
        name: name.to_string(),
        retention: None,
        body: Rc::new(body),
    }
}

impl fmt::Display for QueueDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QUEUE {}", self.name)?;
        if let Some(retention) = &self.retention {
            write!(f, " {retention}")?;
        }
        write!(f, " {}", Group(&self.body))
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.implicit
            && let Some(default) = self.queues.get(DEFAULT_QUEUE)
        {
            return match default.body.as_ref() {
                Directive::OrSequence(items) if !items.is_empty() => {
                    let items: Vec<String> = items.iter().map(Directive::to_string).collect();
                    f.write_str(&items.join("\n\n"))
                }
                body => write!(f, "{body}"),
            };
        }
        let decls: Vec<String> = self.queues.values().map(QueueDecl::to_string).collect();
        f.write_str(&decls.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Truth;
    use crate::spool::Combinator;
    use crate::test_utils::{HookBuilder, TestRuntime};

    #[test]
    fn call_dispatches_by_queue_name() {
        let config = Configuration::parse("QUEUE a {\n  DROP\n}\n\nQUEUE b {\n  TRUE\n}").unwrap();
        let rt = TestRuntime::new();
        let mut hook = HookBuilder::new().build(&rt);

        assert_eq!(config.call("a", &mut hook).unwrap().unwrap(), Truth::False);
        assert_eq!(config.call("b", &mut hook).unwrap().unwrap(), Truth::True);
        assert_eq!(config.call("default", &mut hook).unwrap().unwrap(), Truth::Null);
        assert!(config.call("missing", &mut hook).is_none());
    }

    #[test]
    fn make_dry_prefixes_every_queue() {
        let mut config = Configuration::parse("TRUE").unwrap();
        config.make_dry();
        assert_eq!(
            *config.rules("default").unwrap(),
            Directive::AndSequence(vec![Directive::Dry, Directive::True])
        );
    }

    #[test]
    fn display_implicit_default_has_no_queue_header() {
        let config = Configuration::parse("X-A: 1\nDROP\n\nTRUE").unwrap();
        assert_eq!(config.to_string(), "X-A: 1\nDROP\n\nTRUE");
    }

    #[test]
    fn display_declared_queues() {
        let config = Configuration::parse(
            "QUEUE audit RETENTION LAST 3 AND 7 DAYS {\n  LOG ${x}\n}\n\nQUEUE default {}",
        )
        .unwrap();
        assert_eq!(
            config.to_string(),
            "QUEUE audit RETENTION LAST 3 AND 7 DAYS {\n  LOG ${x}\n}\n\nQUEUE default {}"
        );
        assert_eq!(
            config.queue("audit").unwrap().retention.unwrap().combinator(),
            Some(Combinator::And)
        );
        assert_eq!(Configuration::parse(&config.to_string()).unwrap().to_string(), config.to_string());
    }
}

//! The directive syntax tree.
//!
//! Every node of a parsed rule file is a [`Directive`]. Evaluation lives in
//! [`super::eval`] (and [`super::http`] for GET/POST/DELETE); this module only
//! defines the shapes and prints them back as directive text. The printed
//! form parses to an equivalent tree.

use std::fmt;
use std::rc::Rc;

use super::macros::MacroString;
use super::payload::JsonType;

/// Comparison applied by header and payload predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Contains,
    StartsWith,
}

impl Operator {
    /// Parses an operator keyword (case-insensitive). `Eq` has no keyword.
    pub fn parse(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("contains") {
            Some(Operator::Contains)
        } else if word.eq_ignore_ascii_case("startswith") {
            Some(Operator::StartsWith)
        } else {
            None
        }
    }

    pub fn test(self, actual: &str, expected: &str) -> bool {
        match self {
            Operator::Eq => actual == expected,
            Operator::Contains => actual.contains(expected),
            Operator::StartsWith => actual.starts_with(expected),
        }
    }

    /// Text printed between the `:` and the value.
    fn separator(self) -> &'static str {
        match self {
            Operator::Eq => " ",
            Operator::Contains => "contains ",
            Operator::StartsWith => "startswith ",
        }
    }
}

/// HTTP method of a request action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named block that CALL can invoke while it is in scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDecl {
    pub name: String,
    pub body: Box<Directive>,
}

/// `FOR variable IN path { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct ForAction {
    pub line: usize,
    pub variable: String,
    pub path: String,
    pub body: Box<Directive>,
}

/// `LOG macro [&& action]`
///
/// `display` is the text before `&&`. `message` is what is printed: the
/// display text followed by the chained action's text.
#[derive(Debug, Clone, PartialEq)]
pub struct LogAction {
    pub line: usize,
    pub display: MacroString,
    pub message: MacroString,
    pub next: Option<Box<Directive>>,
}

/// `SET path[:type] macro`
#[derive(Debug, Clone, PartialEq)]
pub struct SetPayloadAction {
    pub line: usize,
    /// `$a.b` or `%a.b`.
    pub path: String,
    pub kind: Option<JsonType>,
    pub value: MacroString,
}

/// `GET|POST|DELETE location [INTO target] [WITH { body }]`
#[derive(Debug, Clone, PartialEq)]
pub struct HttpAction {
    pub line: usize,
    pub method: Method,
    pub location: MacroString,
    pub into: Option<String>,
    pub body: Option<Box<Directive>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: Option<Box<Directive>>,
    pub actions: Option<Box<Directive>>,
}

/// `CASE WHEN .. THEN .. [ELSE ..] ESAC`
#[derive(Debug, Clone, PartialEq)]
pub struct CaseDirective {
    pub whens: Vec<WhenClause>,
    /// `Some(None)` is an ELSE with no actions.
    pub otherwise: Option<Option<Box<Directive>>>,
}

/// A node of the rule tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Directives on consecutive lines; stops at the first FALSE.
    AndSequence(Vec<Directive>),
    /// Blank-line separated items; evaluates every item.
    OrSequence(Vec<Directive>),
    /// `OR { ... }`: stops at the first TRUE.
    Or(Vec<Directive>),
    /// `NOR { ... }`: TRUE only when every branch is FALSE.
    Nor(Vec<Directive>),
    Not(Box<Directive>),
    /// Skipped by the enclosing or-sequence once it is TRUE.
    Otherwise(Box<Directive>),
    Procedure(Rc<ProcedureDecl>),

    Header {
        line: usize,
        name: String,
        operator: Operator,
        value: MacroString,
    },
    Payload {
        line: usize,
        path: String,
        operator: Operator,
        value: MacroString,
    },
    Is {
        path: String,
        kind: JsonType,
    },
    Null(MacroString),
    True,

    Call {
        line: usize,
        name: String,
    },
    Drop,
    Exit,
    Dry,
    Enqueue {
        line: usize,
        queue: String,
    },
    For(ForAction),
    Log(LogAction),
    Secret {
        line: usize,
        value: MacroString,
    },
    SetHeader {
        line: usize,
        name: String,
        value: MacroString,
    },
    SetPayload(SetPayloadAction),
    Reenter {
        line: usize,
        /// Identity of this REENTER site, unique within one parse.
        site: usize,
        copy: bool,
    },
    Http(HttpAction),
    Case(CaseDirective),
}

/// Indents every line after the first by two spaces.
pub(crate) fn indent(text: &str) -> String {
    text.replace('\n', "\n  ")
}

/// Prints a block body in braces.
pub(crate) struct Group<'a>(pub &'a Directive);

impl fmt::Display for Group<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Directive::OrSequence(_) => write!(f, "{}", self.0),
            other => write!(f, "{{\n  {}\n}}", indent(&other.to_string())),
        }
    }
}

fn join(items: &[Directive], separator: &str) -> String {
    items
        .iter()
        .map(Directive::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

fn braced(f: &mut fmt::Formatter<'_>, keyword: &str, items: &[Directive]) -> fmt::Result {
    write!(f, "{keyword} {{\n  {}\n}}", indent(&join(items, "\n")))
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::AndSequence(items) => f.write_str(&join(items, "\n")),
            Directive::OrSequence(items) if items.is_empty() => f.write_str("{}"),
            Directive::OrSequence(items) => {
                write!(f, "{{\n  {}\n}}", indent(&join(items, "\n\n")))
            }
            Directive::Or(items) => braced(f, "OR", items),
            Directive::Nor(items) => braced(f, "NOR", items),
            Directive::Not(inner) => write!(f, "NOT {inner}"),
            Directive::Otherwise(inner) => write!(f, "OTHERWISE {inner}"),
            Directive::Procedure(decl) => {
                write!(f, "PROCEDURE {} {}", decl.name, Group(&decl.body))
            }
            Directive::Header {
                name,
                operator,
                value,
                ..
            } => write!(f, "{name}:{}{value}", operator.separator()),
            Directive::Payload {
                path,
                operator,
                value,
                ..
            } => write!(f, "{path}:{}{value}", operator.separator()),
            Directive::Is { path, kind } => write!(f, "{path}:is {kind}"),
            Directive::Null(value) => write!(f, "NULL {value}"),
            Directive::True => f.write_str("TRUE"),
            Directive::Call { name, .. } => write!(f, "CALL {name}"),
            Directive::Drop => f.write_str("DROP"),
            Directive::Exit => f.write_str("EXIT"),
            Directive::Dry => f.write_str("DRY"),
            Directive::Enqueue { queue, .. } => write!(f, "ENQUEUE {queue}"),
            Directive::For(action) => write!(
                f,
                "FOR {} IN {} {}",
                action.variable,
                action.path,
                Group(&action.body)
            ),
            Directive::Log(action) => {
                write!(f, "LOG {}", action.display)?;
                if let Some(next) = &action.next {
                    write!(f, " && {next}")?;
                }
                Ok(())
            }
            Directive::Secret { value, .. } => write!(f, "SECRET {value}"),
            Directive::SetHeader { name, value, .. } => write!(f, "SET {name}: {value}"),
            Directive::SetPayload(action) => match action.kind {
                Some(kind) => write!(f, "SET {}:{kind} {}", action.path, action.value),
                None => write!(f, "SET {}: {}", action.path, action.value),
            },
            Directive::Reenter { copy: false, .. } => f.write_str("REENTER"),
            Directive::Reenter { copy: true, .. } => f.write_str("REENTER COPY"),
            Directive::Http(action) => {
                write!(f, "{} {}", action.method, action.location)?;
                if let Some(into) = &action.into {
                    write!(f, " INTO {into}")?;
                }
                if let Some(body) = &action.body {
                    write!(f, " WITH {}", Group(body))?;
                }
                Ok(())
            }
            Directive::Case(case) => {
                let mut clauses = String::new();
                for when in &case.whens {
                    clauses.push_str("\nWHEN");
                    if let Some(condition) = &when.condition {
                        clauses.push(' ');
                        clauses.push_str(&condition.to_string());
                    }
                    clauses.push_str("\nTHEN");
                    if let Some(actions) = &when.actions {
                        clauses.push(' ');
                        clauses.push_str(&actions.to_string());
                    }
                }
                if let Some(otherwise) = &case.otherwise {
                    clauses.push_str("\nELSE");
                    if let Some(actions) = otherwise {
                        clauses.push(' ');
                        clauses.push_str(&actions.to_string());
                    }
                }
                write!(f, "CASE{}\nESAC", indent(&clauses))
            }
        }
    }
}

//! Recursive-descent parser for rule files.
//!
//! Rule files are line oriented. `#` lines are comments; blank lines separate
//! the items of an or-sequence; directives on consecutive lines form an
//! and-sequence.
//!
//! ```text
//! configuration    = *or-item                  ; QUEUE only at top level
//! or-item          = otherwise / procedure / queue / and-sequence
//! and-sequence     = 1*directive
//! directive        = action / predicate / or / nor / group / case
//! group            = "{" *or-item "}"
//! or               = "OR" "{" 1*directive "}"
//! nor              = "NOR" "{" 1*directive "}"
//! otherwise        = "OTHERWISE" directive     ; then a blank line
//! procedure        = "PROCEDURE" name group
//! queue            = "QUEUE" name [retention] group
//! retention        = "RETENTION" policy [("AND" / "OR") policy]
//! policy           = "LAST" int / int "DAYS"
//! predicate        = "NOT" predicate / "NULL" macro / "TRUE"
//!                  / header ":" [operator] macro
//!                  / path ":" [operator] macro / path ":is" type
//! case             = "CASE" 1*("WHEN" and-sequence "THEN" and-sequence)
//!                    ["ELSE" and-sequence] "ESAC"
//! ```
//!
//! The parser keeps a one-line lookahead buffer holding the unconsumed rest
//! of the current line. Keywords are matched case-insensitively. A sequence
//! of one item collapses to that item.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::warn;

use super::config::{Configuration, QueueDecl};
use super::directive::{
    CaseDirective, Directive, ForAction, HttpAction, LogAction, Method, Operator, ProcedureDecl,
    SetPayloadAction, WhenClause,
};
use super::error::{ParseError, ParseResult};
use super::macros::MacroString;
use super::payload::JsonType;
use crate::spool::{Combinator, RetentionPolicy, validate_name};

/// One side of a RETENTION declaration.
#[derive(Debug, Clone, Copy)]
enum Clause {
    Last(u32),
    Days(u32),
}

pub struct DirectiveParser {
    lines: Vec<String>,
    pos: usize,
    line_number: usize,
    next: Option<String>,
    eof: bool,
    next_site: usize,
}

impl DirectiveParser {
    pub fn new(text: &str) -> Self {
        DirectiveParser {
            lines: text.lines().map(str::to_string).collect(),
            pos: 0,
            line_number: 0,
            next: None,
            eof: false,
            next_site: 0,
        }
    }

    /// Parses a complete rule file.
    pub fn parse_configuration(mut self) -> ParseResult<Configuration> {
        let mut items = Vec::new();
        let mut queues = Vec::new();
        self.or_items(true, &mut items, &mut queues)?;
        if !self.at_eof() {
            return Err(self.error("Expected end of file"));
        }
        match (items.is_empty(), queues.is_empty()) {
            (true, true) => Err(self.error("Expected directive")),
            (false, true) => Ok(Configuration::from_default(wrap(items, Directive::OrSequence))),
            (true, false) => Ok(Configuration::from_queues(queues)),
            (false, false) => Err(self.error(
                "Directives outside QUEUE declarations; default queue must own the entire config",
            )),
        }
    }

    /// Parses a rule body without QUEUE declarations.
    pub fn parse_directive(mut self) -> ParseResult<Directive> {
        let mut items = Vec::new();
        self.or_items(false, &mut items, &mut Vec::new())?;
        if !self.at_eof() {
            return Err(self.error("Expected end of file"));
        }
        wrap(items, Directive::OrSequence).ok_or_else(|| self.error("Expected directive"))
    }

    // ==================== Cursor ====================

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line_number, message)
    }

    /// Reads the next non-comment line: trimmed, tabs as spaces and a
    /// trailing space. Blank lines and end of file read as "".
    fn read_line(&mut self) -> String {
        while let Some(raw) = self.lines.get(self.pos) {
            self.pos += 1;
            self.line_number = self.pos;
            let trimmed = raw.trim();
            if trimmed.starts_with('#') {
                continue;
            }
            if trimmed.is_empty() {
                return String::new();
            }
            return format!("{} ", trimmed.replace('\t', " "));
        }
        self.eof = true;
        String::new()
    }

    /// The unconsumed input, reading a new line if the current one is used up.
    fn scan(&mut self) -> String {
        if self.next.is_none() {
            let line = self.read_line();
            self.next = Some(line);
        }
        self.next.clone().unwrap_or_default()
    }

    fn at_eof(&self) -> bool {
        self.eof && self.next.as_deref().is_none_or(|n| n.trim().is_empty())
    }

    /// True if unconsumed text remains on the current line.
    fn has_more_on_line(&self) -> bool {
        self.next.as_deref().is_some_and(|n| !n.trim().is_empty())
    }

    fn set_rest(&mut self, rest: &str) {
        let rest = rest.trim();
        self.next = (!rest.is_empty()).then(|| format!("{rest} "));
    }

    /// Consumes the next space-delimited word of the current line.
    fn token(&mut self) -> ParseResult<String> {
        let current = self.next.clone().unwrap_or_default();
        let current = current.trim_start();
        if current.trim().is_empty() {
            return Err(self.error("Expected token"));
        }
        let (word, rest) = current.split_once(' ').unwrap_or((current, ""));
        let word = word.to_string();
        self.set_rest(rest);
        Ok(word)
    }

    /// Consumes `keyword` if it is the next word.
    fn skip(&mut self, keyword: &str) -> bool {
        let current = self.scan();
        let current = current.trim_start();
        let Some(head) = current.get(..keyword.len()) else {
            return false;
        };
        if !head.eq_ignore_ascii_case(keyword) {
            return false;
        }
        let after = &current[keyword.len()..];
        if after.is_empty() || after.starts_with(' ') || after.starts_with('{') {
            let after = after.to_string();
            self.set_rest(&after);
            true
        } else {
            false
        }
    }

    fn skip_char(&mut self, c: char) -> bool {
        let current = self.scan();
        match current.trim_start().strip_prefix(c) {
            Some(rest) => {
                let rest = rest.to_string();
                self.set_rest(&rest);
                true
            }
            None => false,
        }
    }

    fn assert_end_of_line(&self) -> ParseResult<()> {
        if self.has_more_on_line() {
            return Err(self.error("Expected end of line"));
        }
        Ok(())
    }

    /// Takes the rest of the current line, never reading the next one.
    fn rest_of_line(&mut self) -> Option<String> {
        self.next
            .take()
            .map(|rest| rest.trim().to_string())
            .filter(|rest| !rest.is_empty())
    }

    fn macro_rest(&mut self) -> ParseResult<MacroString> {
        let line = self.line_number;
        let rest = self
            .rest_of_line()
            .ok_or_else(|| self.error("Expected macro-string"))?;
        MacroString::parse(&rest, line)
    }

    /// Runs `f`, chaining any error to the line the construct started on.
    fn chained<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let line = self.line_number;
        f(self).map_err(|e| ParseError::chain(line, e))
    }

    // ==================== Sequences ====================

    fn or_items(
        &mut self,
        top_level: bool,
        items: &mut Vec<Directive>,
        queues: &mut Vec<QueueDecl>,
    ) -> ParseResult<()> {
        let mut names = BTreeSet::new();
        loop {
            let current = self.scan();
            if self.at_eof() {
                break;
            }
            if current.is_empty() {
                self.next = None;
                continue;
            }
            if let Some(otherwise) = self.scan_otherwise()? {
                items.push(otherwise);
                continue;
            }
            if let Some(procedure) = self.scan_procedure()? {
                items.push(Directive::Procedure(Rc::new(procedure)));
                continue;
            }
            if top_level {
                let line = self.line_number;
                if let Some(queue) = self.scan_queue()? {
                    if !names.insert(queue.name.clone()) {
                        return Err(ParseError::new(
                            line,
                            format!("Duplicate queue {}", queue.name),
                        ));
                    }
                    queues.push(queue);
                    continue;
                }
            }
            match self.scan_and_sequence()? {
                Some(sequence) => items.push(sequence),
                None => break,
            }
        }
        Ok(())
    }

    fn scan_and_sequence(&mut self) -> ParseResult<Option<Directive>> {
        let mut items = Vec::new();
        while let Some(directive) = self.scan_directive()? {
            items.push(directive);
        }
        Ok(wrap(items, Directive::AndSequence))
    }

    fn scan_otherwise(&mut self) -> ParseResult<Option<Directive>> {
        if !self.skip("OTHERWISE") {
            return Ok(None);
        }
        self.chained(|p| {
            let directive = p
                .scan_directive()?
                .ok_or_else(|| p.error("Expected directive"))?;
            let after = p.scan();
            if !(after.is_empty() || after.trim_start().starts_with('}')) {
                return Err(p.error("Expected blank line after otherwise"));
            }
            Ok(Some(Directive::Otherwise(Box::new(directive))))
        })
    }

    fn scan_procedure(&mut self) -> ParseResult<Option<ProcedureDecl>> {
        if !self.skip("PROCEDURE") {
            return Ok(None);
        }
        self.chained(|p| {
            let name = p.token()?;
            let body = p
                .scan_group(false)?
                .ok_or_else(|| p.error("Expected procedure body"))?;
            Ok(Some(ProcedureDecl {
                name,
                body: Box::new(body),
            }))
        })
    }

    fn scan_queue(&mut self) -> ParseResult<Option<QueueDecl>> {
        if !self.skip("QUEUE") {
            return Ok(None);
        }
        self.chained(|p| {
            let name = p.token()?;
            validate_name(&name).map_err(|e| p.error(e.to_string()))?;
            let retention = p.scan_retention()?;
            let body = p
                .scan_group(true)?
                .ok_or_else(|| p.error("Expected queue body"))?;
            Ok(Some(QueueDecl {
                name,
                retention,
                body: Rc::new(body),
            }))
        })
    }

    fn scan_retention(&mut self) -> ParseResult<Option<RetentionPolicy>> {
        if !self.skip("RETENTION") {
            return Ok(None);
        }
        let first = self.scan_clause()?;
        let combinator = if self.skip("AND") {
            Some(Combinator::And)
        } else if self.skip("OR") {
            Some(Combinator::Or)
        } else {
            None
        };
        let policy = match combinator {
            None => match first {
                Clause::Last(n) => RetentionPolicy::Last(n),
                Clause::Days(n) => RetentionPolicy::Days(n),
            },
            Some(combinator) => match (first, self.scan_clause()?) {
                (Clause::Last(last), Clause::Days(days))
                | (Clause::Days(days), Clause::Last(last)) => RetentionPolicy::Combined {
                    last,
                    days,
                    combinator,
                },
                (_, second) => {
                    return Err(self.error(format!(
                        "Expected one LAST and one DAYS policy, found {first:?} {combinator} {second:?}"
                    )));
                }
            },
        };
        let after = self.scan();
        let after = after.trim_start();
        if !(after.is_empty() || after.starts_with('{')) {
            let word = after.split(' ').next().unwrap_or(after);
            return Err(self.error(format!("Unexpected token {word}")));
        }
        Ok(Some(policy))
    }

    fn scan_clause(&mut self) -> ParseResult<Clause> {
        let word = self.token()?;
        if word.eq_ignore_ascii_case("LAST") {
            let count = self.token()?;
            let n = count
                .parse()
                .map_err(|_| self.error(format!("Expected task count, found {count}")))?;
            return Ok(Clause::Last(n));
        }
        let n = word
            .parse()
            .map_err(|_| self.error(format!("Expected LAST or day count, found {word}")))?;
        if !self.skip("DAYS") {
            let found = self.next.clone().unwrap_or_default();
            return Err(self.error(format!("Expected DAYS, found {}", found.trim())));
        }
        Ok(Clause::Days(n))
    }

    fn scan_group(&mut self, can_be_empty: bool) -> ParseResult<Option<Directive>> {
        if !self.skip_char('{') {
            return Ok(None);
        }
        self.chained(|p| {
            let mut items = Vec::new();
            p.or_items(false, &mut items, &mut Vec::new())?;
            if !p.skip_char('}') {
                return Err(p.error("Expected '}'"));
            }
            match wrap(items, Directive::OrSequence) {
                Some(body) => Ok(Some(body)),
                None if can_be_empty => Ok(Some(Directive::OrSequence(Vec::new()))),
                None => Err(p.error("Expected directive")),
            }
        })
    }

    // ==================== Directives ====================

    fn scan_directive(&mut self) -> ParseResult<Option<Directive>> {
        if self.scan().trim().is_empty() {
            return Ok(None);
        }
        self.chained(|p| {
            if let Some(action) = p.scan_action()? {
                return Ok(Some(action));
            }
            if let Some(predicate) = p.scan_predicate()? {
                return Ok(Some(predicate));
            }
            if let Some(or) = p.scan_braced("OR")? {
                return Ok(Some(wrap(or, Directive::Or).unwrap_or(Directive::Or(Vec::new()))));
            }
            if let Some(nor) = p.scan_braced("NOR")? {
                return Ok(Some(Directive::Nor(nor)));
            }
            if let Some(group) = p.scan_group(false)? {
                return Ok(Some(group));
            }
            p.scan_case()
        })
    }

    /// `keyword { directive... }`
    fn scan_braced(&mut self, keyword: &str) -> ParseResult<Option<Vec<Directive>>> {
        if !self.skip(keyword) {
            return Ok(None);
        }
        self.chained(|p| {
            if !p.skip_char('{') {
                return Err(p.error("Expected '{'"));
            }
            let mut items = Vec::new();
            while let Some(directive) = p.scan_directive()? {
                items.push(directive);
            }
            if !p.skip_char('}') {
                return Err(p.error("Expected '}'"));
            }
            if items.is_empty() {
                return Err(p.error("Expected directive"));
            }
            Ok(Some(items))
        })
    }

    fn scan_case(&mut self) -> ParseResult<Option<Directive>> {
        if !self.skip("CASE") {
            return Ok(None);
        }
        self.chained(|p| {
            let mut whens = Vec::new();
            while p.skip("WHEN") {
                let condition = p.scan_and_sequence()?.map(Box::new);
                if !p.skip("THEN") {
                    return Err(p.error("Expected THEN"));
                }
                let actions = p.scan_and_sequence()?.map(Box::new);
                whens.push(WhenClause { condition, actions });
            }
            if whens.is_empty() {
                return Err(p.error("Expected WHEN"));
            }
            let otherwise = if p.skip("ELSE") {
                Some(p.scan_and_sequence()?.map(Box::new))
            } else {
                None
            };
            if !p.skip("ESAC") {
                return Err(p.error("Expected ESAC"));
            }
            Ok(Some(Directive::Case(CaseDirective { whens, otherwise })))
        })
    }

    // ==================== Predicates ====================

    fn scan_predicate(&mut self) -> ParseResult<Option<Directive>> {
        if self.skip("NOT") {
            let inner = self
                .scan_predicate()?
                .ok_or_else(|| self.error("Expected predicate"))?;
            return Ok(Some(Directive::Not(Box::new(inner))));
        }
        if self.skip("NULL") {
            return Ok(Some(Directive::Null(self.macro_rest()?)));
        }
        if self.skip("TRUE") {
            return Ok(Some(Directive::True));
        }

        let line = self.line_number;
        let current = self.scan();
        let current = current.trim_start();
        if let Some((path, after)) = split_path(current) {
            let path = path.to_string();
            if let Some(kind) = after.strip_prefix_ci("is")
                && (kind.is_empty() || kind.starts_with(' '))
            {
                let kind_word = kind.trim().to_string();
                self.next = None;
                let kind = JsonType::parse(&kind_word)
                    .ok_or_else(|| self.error(format!("Expected type, found {kind_word:?}")))?;
                return Ok(Some(Directive::Is { path, kind }));
            }
            let (operator, rest) =
                split_operator(after).ok_or_else(|| self.error(EXPECTED_OPERATOR))?;
            let rest = rest.to_string();
            self.set_rest(&rest);
            let value = self.macro_rest()?;
            return Ok(Some(Directive::Payload {
                line,
                path,
                operator: operator.unwrap_or(Operator::Eq),
                value,
            }));
        }
        if let Some((name, after)) = split_header(current) {
            let name = name.to_string();
            let (operator, rest) =
                split_operator(after).ok_or_else(|| self.error(EXPECTED_OPERATOR))?;
            let rest = rest.to_string();
            self.set_rest(&rest);
            let value = self.macro_rest()?;
            return Ok(Some(Directive::Header {
                line,
                name,
                operator: operator.unwrap_or(Operator::Eq),
                value,
            }));
        }
        Ok(None)
    }

    // ==================== Actions ====================

    fn scan_action(&mut self) -> ParseResult<Option<Directive>> {
        let current = self.scan();
        let word = current
            .trim_start()
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let line = self.line_number;

        let action = match word.as_str() {
            "CALL" => {
                self.skip("CALL");
                let name = self.token()?;
                self.assert_end_of_line()?;
                Directive::Call { line, name }
            }
            "DROP" => {
                self.skip("DROP");
                self.assert_end_of_line()?;
                Directive::Drop
            }
            "EXIT" => {
                self.skip("EXIT");
                self.assert_end_of_line()?;
                Directive::Exit
            }
            "DRY" => {
                self.skip("DRY");
                Directive::Dry
            }
            "ENQUEUE" => {
                self.skip("ENQUEUE");
                let queue = self.token()?;
                validate_name(&queue).map_err(|e| self.error(e.to_string()))?;
                self.assert_end_of_line()?;
                Directive::Enqueue { line, queue }
            }
            "FOR" => {
                self.skip("FOR");
                self.scan_for(line)?
            }
            "LOG" => {
                self.skip("LOG");
                self.scan_log(line)?
            }
            "GET" | "POST" | "DELETE" => {
                self.skip(&word);
                let method = Method::parse(&word).ok_or_else(|| self.error("Expected method"))?;
                self.scan_http(line, method)?
            }
            "REENTER" => {
                self.skip("REENTER");
                warn!("REENTER is deprecated (line {})", line);
                let copy = self.has_more_on_line() && self.skip("COPY");
                self.assert_end_of_line()?;
                let site = self.next_site;
                self.next_site += 1;
                Directive::Reenter { line, site, copy }
            }
            "SECRET" => {
                self.skip("SECRET");
                Directive::Secret {
                    line,
                    value: self.macro_rest()?,
                }
            }
            "SET" => {
                self.skip("SET");
                self.scan_set(line)?
            }
            _ => return Ok(None),
        };
        Ok(Some(action))
    }

    fn scan_for(&mut self, line: usize) -> ParseResult<Directive> {
        let variable = self.token()?;
        let variable = variable.trim_start_matches('%').to_string();
        if !is_word(&variable) || !self.has_more_on_line() || !self.skip("IN") {
            return Err(self.error("Expected FOR variable IN ..."));
        }
        let path = self
            .token()
            .map_err(|_| self.error("Expected FOR variable IN <json-path>"))?;
        if !is_path(&path) {
            return Err(self.error("Expected FOR variable IN <json-path>"));
        }
        let body = self
            .scan_group(false)?
            .ok_or_else(|| self.error("Expected FOR variable IN <json-path> { ... }"))?;
        Ok(Directive::For(ForAction {
            line,
            variable,
            path,
            body: Box::new(body),
        }))
    }

    fn scan_log(&mut self, line: usize) -> ParseResult<Directive> {
        let rest = self
            .rest_of_line()
            .ok_or_else(|| self.error("Expected macro-string"))?;

        let separator = rest
            .match_indices("&&")
            .map(|(idx, _)| idx)
            .find(|&idx| !rest[..idx].ends_with('\\') && !rest[idx + 2..].trim().is_empty());

        let Some(idx) = separator else {
            let display = MacroString::parse(&rest, line)?;
            return Ok(Directive::Log(LogAction {
                line,
                message: display.clone(),
                display,
                next: None,
            }));
        };

        let display = MacroString::parse(&rest[..idx], line)?;
        let tail = rest[idx + 2..].trim().to_string();
        self.next = Some(format!("{tail} "));
        let next = self
            .scan_action()?
            .ok_or_else(|| self.error("Action expected"))?;
        let tail_macro = MacroString::parse(&tail, line).unwrap_or_else(|_| MacroString::literal(tail));
        let message = display.concat(&MacroString::literal(" ")).concat(&tail_macro);
        Ok(Directive::Log(LogAction {
            line,
            display,
            message,
            next: Some(Box::new(next)),
        }))
    }

    fn scan_http(&mut self, line: usize, method: Method) -> ParseResult<Directive> {
        let location = self
            .token()
            .map_err(|_| self.error(format!("Expected {method} <url>")))?;
        let location = MacroString::parse(&location, line)?;

        let mut into = None;
        let mut body = None;
        while self.has_more_on_line() {
            if self.skip("INTO") {
                if into.is_some() {
                    return Err(self.error("Duplicate INTO"));
                }
                let target = self.token()?;
                let path = target.strip_prefix('$').unwrap_or(&target);
                if !is_path_body(path) {
                    return Err(self.error(format!("Expected INTO <json-path>, found {target}")));
                }
                into = Some(target);
            } else if self.skip("WITH") {
                if body.is_some() {
                    return Err(self.error("Duplicate WITH"));
                }
                let group = self
                    .scan_group(true)?
                    .ok_or_else(|| self.error("Expected WITH { ... }"))?;
                body = Some(Box::new(group));
            } else {
                let found = self.token()?;
                return Err(self.error(format!("Unexpected token {found}")));
            }
        }
        Ok(Directive::Http(HttpAction {
            line,
            method,
            location,
            into,
            body,
        }))
    }

    fn scan_set(&mut self, line: usize) -> ParseResult<Directive> {
        let current = self.next.clone().unwrap_or_default();
        let current = current.trim_start();

        if let Some((path, after)) = split_path(current) {
            let path = path.to_string();
            let (kind, rest) = match after.chars().next() {
                Some(c) if !c.is_whitespace() => {
                    let (word, rest) = after.split_once(' ').unwrap_or((after, ""));
                    let kind = JsonType::parse(word)
                        .ok_or_else(|| self.error(format!("Expected type, found {word:?}")))?;
                    (Some(kind), rest)
                }
                _ => (None, after),
            };
            let rest = rest.to_string();
            self.set_rest(&rest);
            return Ok(Directive::SetPayload(SetPayloadAction {
                line,
                path,
                kind,
                value: self.macro_rest()?,
            }));
        }
        if let Some((name, after)) = split_header(current) {
            let name = name.to_string();
            let after = after.to_string();
            self.set_rest(&after);
            return Ok(Directive::SetHeader {
                line,
                name,
                value: self.macro_rest()?,
            });
        }
        Err(self.error("Expected <SET action>"))
    }
}

/// Collapses a sequence: none is absent, one is itself.
fn wrap(mut items: Vec<Directive>, sequence: fn(Vec<Directive>) -> Directive) -> Option<Directive> {
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(sequence(items)),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_word(text: &str) -> bool {
    !text.is_empty() && text.chars().all(is_word_char)
}

/// Dot-separated words.
fn is_path_body(text: &str) -> bool {
    text.split('.').all(is_word)
}

/// `$a.b`, `%a.b` or `%%a.b`.
fn is_path(text: &str) -> bool {
    text.strip_prefix("%%")
        .or_else(|| text.strip_prefix('$'))
        .or_else(|| text.strip_prefix('%'))
        .is_some_and(is_path_body)
}

/// Splits `$a.b:rest`, `%a:rest` or `%%a:rest` into the path and what follows
/// the colon.
fn split_path(text: &str) -> Option<(&str, &str)> {
    let sigil = if text.starts_with("%%") {
        2
    } else if text.starts_with('$') || text.starts_with('%') {
        1
    } else {
        return None;
    };
    let colon = text.find(':')?;
    if colon <= sigil || !is_path_body(&text[sigil..colon]) {
        return None;
    }
    Some((&text[..colon], &text[colon + 1..]))
}

/// Splits `Name:rest` where the name is `[\w-]+`.
fn split_header(text: &str) -> Option<(&str, &str)> {
    let colon = text.find(':')?;
    let name = &text[..colon];
    let valid = !name.is_empty() && name.chars().all(|c| is_word_char(c) || c == '-');
    valid.then(|| (name, &text[colon + 1..]))
}

const EXPECTED_OPERATOR: &str = "Expected ':', ':contains', ':startswith'";

/// Splits an operator keyword glued to the colon off the value.
///
/// Returns `None` when a word glued to the colon is not an operator.
fn split_operator(after: &str) -> Option<(Option<Operator>, &str)> {
    let end = after
        .find(|c: char| !is_word_char(c))
        .unwrap_or(after.len());
    let (word, rest) = after.split_at(end);
    if word.is_empty() {
        return Some((None, after));
    }
    Operator::parse(word).map(|op| (Some(op), rest))
}

trait StripPrefixCi {
    fn strip_prefix_ci(&self, prefix: &str) -> Option<&str>;
}

impl StripPrefixCi for str {
    fn strip_prefix_ci(&self, prefix: &str) -> Option<&str> {
        let head = self.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix).then(|| &self[prefix.len()..])
    }
}

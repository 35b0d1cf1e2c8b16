//! Directive evaluation.
//!
//! Every directive evaluates to a [`Truth`]. Predicates yield TRUE or FALSE;
//! actions that do not test anything (SET, LOG, FOR, DRY, ...) yield NULL so
//! they neither short-circuit an and-sequence nor change an or-sequence.
//!
//! Soft failures (a macro that expands to nothing, a missing procedure, a
//! FOR over a non-array) are logged as `[ACTION] message at line N` warnings
//! and yield FALSE. EXIT and fatal spool errors are not truth values: they are
//! returned as [`Halt`] and unwind through `?` to whoever started the
//! evaluation.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::directive::{CaseDirective, Directive, ForAction, LogAction, SetPayloadAction};
use super::error::Halt;
use super::macros::{Expand, render_scalar};
use super::payload::{JsonType, PathError, set_path};
use super::truth::Truth;
use crate::webhook::WebHook;

/// Outcome of evaluating a directive.
pub type Eval = Result<Truth, Halt>;

impl Directive {
    /// Evaluates this directive against `hook`.
    pub fn apply(&self, hook: &mut WebHook<'_>) -> Eval {
        match self {
            Directive::AndSequence(items) => {
                let mut acc = Truth::Null;
                for item in items {
                    acc = acc.and(item.apply(hook)?);
                    if acc.is_false() {
                        break;
                    }
                }
                Ok(acc)
            }
            Directive::OrSequence(items) => apply_or_sequence(items, hook),
            Directive::Or(items) => {
                let mut acc = Truth::Null;
                for item in items {
                    let truth = item.apply(hook)?;
                    acc = acc.or(truth);
                    if truth.is_true() {
                        break;
                    }
                }
                Ok(acc)
            }
            Directive::Nor(items) => {
                let mut acc = Truth::Null;
                for item in items {
                    acc = acc.and(item.apply(hook)?.negate());
                    if acc.is_false() {
                        break;
                    }
                }
                Ok(acc)
            }
            Directive::Not(inner) => Ok(inner.apply(hook)?.negate()),
            Directive::Otherwise(inner) => inner.apply(hook),
            Directive::Procedure(_) => Ok(Truth::Null),

            Directive::Header {
                name,
                operator,
                value,
                ..
            } => {
                let expected = value.eval(hook, Expand::Strict);
                Ok(match (hook.header(name), expected) {
                    (Some(actual), Some(expected)) => Truth::of(operator.test(actual, &expected)),
                    _ => Truth::False,
                })
            }
            Directive::Payload {
                path,
                operator,
                value,
                ..
            } => {
                let actual = hook.resolve(path).as_ref().and_then(render_scalar);
                let expected = value.eval(hook, Expand::Strict);
                Ok(match (actual, expected) {
                    (Some(actual), Some(expected)) => Truth::of(operator.test(&actual, &expected)),
                    _ => Truth::False,
                })
            }
            Directive::Is { path, kind } => {
                Ok(Truth::of(JsonType::of(hook.resolve(path).as_ref()) == *kind))
            }
            Directive::Null(value) => Ok(Truth::of(value.eval(hook, Expand::Strict).is_none())),
            Directive::True => Ok(Truth::True),

            Directive::Call { line, name } => {
                let Some(procedure) = hook.context().find_procedure(name) else {
                    warn!("[CALL] No such procedure: {} at line {}", name, line);
                    return Ok(Truth::False);
                };
                procedure.body.apply(hook)
            }
            Directive::Drop => Ok(Truth::False),
            Directive::Exit => Err(Halt::Exit),
            Directive::Dry => {
                hook.context().set_dry();
                Ok(Truth::Null)
            }
            Directive::Enqueue { line, queue } => apply_enqueue(*line, queue, hook),
            Directive::For(action) => action.apply(hook),
            Directive::Log(action) => action.apply(hook),
            Directive::Secret { line, value } => {
                match value.eval(hook, Expand::Coerce) {
                    Some(secret) => hook.context().add_secret(&secret),
                    None => warn!("[SECRET] Macro expanded to null: {} at line {}", value, line),
                }
                Ok(Truth::Null)
            }
            Directive::SetHeader { line, name, value } => {
                let Some(text) = value.eval(hook, Expand::Strict) else {
                    warn!("[SET] Macro expanded to null: {} at line {}", value, line);
                    return Ok(Truth::False);
                };
                hook.set_header(name, text);
                Ok(Truth::Null)
            }
            Directive::SetPayload(action) => Ok(action.apply(hook)),
            Directive::Reenter { line, site, copy } => apply_reenter(*line, *site, *copy, hook),
            Directive::Http(action) => action.apply(hook),
            Directive::Case(case) => case.apply(hook),
        }
    }
}

fn apply_or_sequence(items: &[Directive], hook: &mut WebHook<'_>) -> Eval {
    let context = Rc::clone(hook.context());
    let declared: Vec<_> = items
        .iter()
        .filter_map(|item| match item {
            Directive::Procedure(decl) => Some(Rc::clone(decl)),
            _ => None,
        })
        .collect();
    for decl in &declared {
        context.declare(Rc::clone(decl));
    }

    // Undeclare before propagating a halt.
    let result = fold_or_sequence(items, hook);
    for decl in declared.iter().rev() {
        context.undeclare(decl);
    }
    result
}

fn fold_or_sequence(items: &[Directive], hook: &mut WebHook<'_>) -> Eval {
    let mut acc = Truth::Null;
    for item in items {
        if acc.is_true() && matches!(item, Directive::Otherwise(_)) {
            continue;
        }
        acc = acc.or(item.apply(hook)?);
    }
    Ok(acc)
}

impl CaseDirective {
    fn apply(&self, hook: &mut WebHook<'_>) -> Eval {
        for when in &self.whens {
            let matched = match &when.condition {
                Some(condition) => condition.apply(hook)?,
                None => Truth::Null,
            };
            if matched.is_true() {
                return apply_optional(when.actions.as_deref(), hook);
            }
        }
        match &self.otherwise {
            Some(actions) => apply_optional(actions.as_deref(), hook),
            None => Ok(Truth::Null),
        }
    }
}

fn apply_optional(directive: Option<&Directive>, hook: &mut WebHook<'_>) -> Eval {
    match directive {
        Some(directive) => directive.apply(hook),
        None => Ok(Truth::Null),
    }
}

impl ForAction {
    fn apply(&self, hook: &mut WebHook<'_>) -> Eval {
        let Some(Value::Array(elements)) = hook.resolve(&self.path) else {
            warn!("[FOR] {} is not an array at line {}", self.path, self.line);
            return Ok(Truth::False);
        };

        let context = Rc::clone(hook.context());
        for element in elements {
            let before: HashSet<String> = context.own_variables().into_iter().collect();
            let shadowed = context.unset(&self.variable);
            context.set(&self.variable, element);

            let result = self.body.apply(hook);

            for name in context.own_variables() {
                if name == self.variable || !before.contains(&name) {
                    context.unset(&name);
                }
            }
            if let Some(previous) = shadowed {
                context.set(&self.variable, previous);
            }
            result?;
        }
        Ok(Truth::Null)
    }
}

impl LogAction {
    fn apply(&self, hook: &mut WebHook<'_>) -> Eval {
        match self.message.eval(hook, Expand::Coerce) {
            Some(text) => {
                let context = hook.context();
                context.runtime().console().print(&context.redact(&text));
            }
            None => warn!("[LOG] Macro expanded to null: {} at line {}", self.message, self.line),
        }
        apply_optional(self.next.as_deref(), hook)
    }
}

impl SetPayloadAction {
    fn apply(&self, hook: &mut WebHook<'_>) -> Truth {
        let Some(text) = self.value.eval(hook, Expand::Strict) else {
            warn!("[SET] Macro expanded to null: {} at line {}", self.value, self.line);
            return Truth::False;
        };
        let kind = self.kind.unwrap_or_else(|| JsonType::infer(&text));
        let value = match kind.convert(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("[SET] {} at line {}", e, self.line);
                return Truth::False;
            }
        };

        let stored = if let Some(path) = self.path.strip_prefix('$') {
            set_path(hook.payload_mut(), path, value)
        } else {
            let path = self
                .path
                .strip_prefix("%%")
                .or_else(|| self.path.strip_prefix('%'))
                .unwrap_or(&self.path);
            set_variable(hook, path, value)
        };
        match stored {
            Ok(()) => Truth::Null,
            Err(e) => {
                warn!("[SET] {} at line {}", e, self.line);
                Truth::False
            }
        }
    }
}

/// Writes a `%` path: the first segment names the variable, the rest descend
/// into it.
fn set_variable(hook: &WebHook<'_>, path: &str, value: Value) -> Result<(), PathError> {
    let context = hook.context();
    let Some((name, _)) = path.split_once('.') else {
        context.set(path, value);
        return Ok(());
    };
    let mut root = Map::new();
    let existing = context.get(name).unwrap_or_else(|| Value::Object(Map::new()));
    root.insert(name.to_string(), existing);
    set_path(&mut root, path, value)?;
    if let Some(updated) = root.remove(name) {
        context.set(name, updated);
    }
    Ok(())
}

fn apply_enqueue(line: usize, queue: &str, hook: &mut WebHook<'_>) -> Eval {
    let runtime = Rc::clone(hook.context().runtime());
    let (Some(spool), Some(job)) = (runtime.spool(), hook.job()) else {
        warn!("[ENQUEUE] no spool job at line {}", line);
        return Ok(Truth::False);
    };
    if hook.context().is_dry() {
        debug!(job = %job.name, target = queue, "dry run, skipping fan-out");
        return Ok(Truth::True);
    }
    if spool.fan_out(&job.queue, &job.name, queue)? {
        debug!(job = %job.name, source = %job.queue, target = queue, "fanned out");
        Ok(Truth::True)
    } else {
        warn!(
            "[ENQUEUE] {} not fanned out from {} to {} at line {}",
            job.name, job.queue, queue, line
        );
        Ok(Truth::False)
    }
}

fn apply_reenter(line: usize, site: usize, copy: bool, hook: &mut WebHook<'_>) -> Eval {
    let Some(rules) = hook.context().rules().cloned() else {
        warn!("[REENTER] No rules to re-enter at line {}", line);
        return Ok(Truth::False);
    };

    if copy {
        let mut copied = hook.copy();
        if !copied.context().enter_reentry(site) {
            warn!("[REENTER] Loop detected at line {}", line);
            return Ok(Truth::False);
        }
        match rules.apply(&mut copied) {
            Ok(_) | Err(Halt::Exit) => {}
            Err(e) => return Err(e),
        }
        Ok(Truth::of(copied.context().is_consumed()))
    } else {
        if !hook.context().enter_reentry(site) {
            warn!("[REENTER] Loop detected at line {}", line);
            return Ok(Truth::False);
        }
        rules.apply(hook)?;
        Ok(Truth::of(hook.context().is_consumed()))
    }
}

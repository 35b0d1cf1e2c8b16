//! Per-webhook evaluation scope.
//!
//! A [`Context`] holds the mutable state of one processing chain: variables,
//! secrets, the procedures visible at the current point of evaluation and the
//! `consumed` / `dry` flags. Contexts form a parent chain. A child is created
//! whenever evaluation forks (REENTER COPY, the WITH body of an HTTP action)
//! and reads through to its ancestors:
//!
//! - variable and procedure lookups walk the chain towards the root
//! - secrets accumulate along the chain and are never removed
//! - `consumed` and `dry` are copied from the parent when the child is made;
//!   later changes to the parent are not seen by existing children
//!
//! Contexts are single-threaded and shared by `Rc`; interior mutability is
//! plain `Cell`/`RefCell`.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::filter::directive::{Directive, ProcedureDecl};
use crate::filter::payload::get_below;
use crate::runtime::Runtime;

/// Replacement text for secrets in LOG output.
pub const REDACTED: &str = "***";

pub struct Context {
    parent: Option<Rc<Context>>,
    runtime: Rc<Runtime>,
    rules: Option<Rc<Directive>>,
    variables: RefCell<Map<String, Value>>,
    reentered: RefCell<HashSet<usize>>,
    secrets: RefCell<Vec<String>>,
    procedures: RefCell<Vec<Rc<ProcedureDecl>>>,
    consumed: Cell<bool>,
    dry: Cell<bool>,
}

impl Context {
    /// Creates the root context of a processing chain.
    ///
    /// `rules` is the rule set REENTER evaluates again.
    pub fn root(runtime: Rc<Runtime>, rules: Option<Rc<Directive>>) -> Rc<Context> {
        Rc::new(Context {
            parent: None,
            runtime,
            rules,
            variables: RefCell::new(Map::new()),
            reentered: RefCell::new(HashSet::new()),
            secrets: RefCell::new(Vec::new()),
            procedures: RefCell::new(Vec::new()),
            consumed: Cell::new(false),
            dry: Cell::new(false),
        })
    }

    /// Creates a child of `parent`, snapshotting its flags.
    pub fn child(parent: &Rc<Context>) -> Rc<Context> {
        Rc::new(Context {
            parent: Some(Rc::clone(parent)),
            runtime: Rc::clone(&parent.runtime),
            rules: parent.rules.clone(),
            variables: RefCell::new(Map::new()),
            reentered: RefCell::new(HashSet::new()),
            secrets: RefCell::new(Vec::new()),
            procedures: RefCell::new(Vec::new()),
            consumed: Cell::new(parent.consumed.get()),
            dry: Cell::new(parent.dry.get()),
        })
    }

    pub fn parent(&self) -> Option<&Rc<Context>> {
        self.parent.as_ref()
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub fn rules(&self) -> Option<&Rc<Directive>> {
        self.rules.as_ref()
    }

    fn chain(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |ctx| ctx.parent.as_deref())
    }

    /// Looks up a variable by dotted path.
    ///
    /// The first segment is searched from this context up to the root; the
    /// remaining segments descend into the value found.
    pub fn get(&self, path: &str) -> Option<Value> {
        let (name, rest) = match path.split_once('.') {
            Some((name, rest)) => (name, Some(rest)),
            None => (path, None),
        };
        for ctx in self.chain() {
            let variables = ctx.variables.borrow();
            if let Some(value) = variables.get(name) {
                return match rest {
                    Some(rest) => get_below(value, rest).cloned(),
                    None => Some(value.clone()),
                };
            }
        }
        None
    }

    /// Sets a variable in this context.
    pub fn set(&self, name: &str, value: Value) {
        self.variables.borrow_mut().insert(name.to_string(), value);
    }

    /// Removes a variable from this context. Ancestors are untouched.
    pub fn unset(&self, name: &str) -> Option<Value> {
        self.variables.borrow_mut().remove(name)
    }

    /// Names of the variables set in this context (not its ancestors).
    pub fn own_variables(&self) -> Vec<String> {
        self.variables.borrow().keys().cloned().collect()
    }

    /// Registers a secret for redaction. Empty and repeated secrets are ignored.
    pub fn add_secret(&self, secret: &str) {
        if secret.is_empty() || self.chain().any(|ctx| ctx.secrets.borrow().iter().any(|s| s == secret)) {
            return;
        }
        self.secrets.borrow_mut().push(secret.to_string());
    }

    /// All secrets registered in this context and its ancestors.
    pub fn secrets(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .chain()
            .flat_map(|ctx| ctx.secrets.borrow().clone())
            .collect();
        // Longer secrets first so a secret containing another is fully hidden.
        all.sort_by_key(|s| std::cmp::Reverse(s.len()));
        all
    }

    /// Replaces every secret occurring in `text` with `***`.
    pub fn redact(&self, text: &str) -> String {
        self.secrets()
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    /// Makes a procedure visible to CALL in this context and its descendants.
    pub fn declare(&self, procedure: Rc<ProcedureDecl>) {
        self.procedures.borrow_mut().push(procedure);
    }

    /// Removes the most recent declaration of exactly `procedure`.
    pub fn undeclare(&self, procedure: &Rc<ProcedureDecl>) {
        let mut procedures = self.procedures.borrow_mut();
        if let Some(pos) = procedures.iter().rposition(|p| Rc::ptr_eq(p, procedure)) {
            procedures.remove(pos);
        }
    }

    /// Finds the visible procedure named `name`; later declarations win.
    pub fn find_procedure(&self, name: &str) -> Option<Rc<ProcedureDecl>> {
        self.chain().find_map(|ctx| {
            ctx.procedures
                .borrow()
                .iter()
                .rev()
                .find(|p| p.name == name)
                .cloned()
        })
    }

    /// Records that the REENTER site `site` fired in this context.
    ///
    /// Returns false, recording nothing, if the site already fired in this
    /// context or any ancestor.
    pub fn enter_reentry(&self, site: usize) -> bool {
        if self.chain().any(|ctx| ctx.reentered.borrow().contains(&site)) {
            return false;
        }
        self.reentered.borrow_mut().insert(site);
        true
    }

    pub fn consume(&self) {
        self.consumed.set(true);
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.get()
    }

    pub fn set_dry(&self) {
        self.dry.set(true);
    }

    pub fn is_dry(&self) -> bool {
        self.dry.get()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("depth", &(self.chain().count() - 1))
            .field("variables", &self.variables.borrow())
            .field("consumed", &self.consumed.get())
            .field("dry", &self.dry.get())
            .finish_non_exhaustive()
    }
}

//! Collaborators shared by every context of a run.

use std::rc::Rc;

use crate::filter::http::HttpInterpreter;
use crate::spool::SpoolManager;

/// Sink for operator-visible output: LOG lines and bodies of successful
/// HTTP responses that were not captured with INTO.
pub trait Console {
    fn print(&self, line: &str);
}

/// Console that writes to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn print(&self, line: &str) {
        println!("{line}");
    }
}

/// Everything evaluation needs from the outside world.
pub struct Runtime {
    http: Rc<dyn HttpInterpreter>,
    console: Rc<dyn Console>,
    spool: Option<SpoolManager>,
}

impl Runtime {
    pub fn new(http: Rc<dyn HttpInterpreter>, console: Rc<dyn Console>) -> Self {
        Runtime {
            http,
            console,
            spool: None,
        }
    }

    /// Attaches the spool used by ENQUEUE.
    pub fn with_spool(mut self, spool: SpoolManager) -> Self {
        self.spool = Some(spool);
        self
    }

    pub fn http(&self) -> &dyn HttpInterpreter {
        self.http.as_ref()
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    pub fn spool(&self) -> Option<&SpoolManager> {
        self.spool.as_ref()
    }
}

//! Replays webhooks through the configured rules.
//!
//! The driver has two sources of work:
//!
//! - **Hook files**: a single record file, or every extension-less file in a
//!   directory, evaluated against the `default` queue. A consumed file is
//!   deleted.
//! - **The spool**: every declared queue is drained in index order. Each job
//!   is claimed, evaluated from `processing/`, then moved to `processed/` if
//!   its context was consumed and to `failed/` otherwise.
//!
//! In a dry run nothing is deleted or moved.
//!
//! One job never aborts the batch: record errors, EXIT and fatal spool errors
//! raised while evaluating are logged and the driver moves on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::filter::{Configuration, Halt};
use crate::runtime::Runtime;
use crate::spool::{DEFAULT_QUEUE, JobState, SpoolError, SpoolManager, prune_processed};
use crate::webhook::WebHookRecord;

/// Errors that stop the driver itself rather than a single job.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Spool(#[from] SpoolError),

    #[error("no spool directory configured")]
    NoSpool,

    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// What happened to one hook file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The rules consumed the webhook.
    Consumed,
    /// The rules ran but did not consume the webhook.
    Kept,
    /// The file is not a valid webhook record.
    Rejected,
}

/// Job counts of one spool drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum JobOutcome {
    Processed,
    Failed,
    Skipped,
}

pub struct Driver {
    config: Configuration,
    runtime: Rc<Runtime>,
    dry: bool,
}

impl Driver {
    /// A driver for `config`. A dry driver forces `DRY` on every queue.
    pub fn new(mut config: Configuration, runtime: Rc<Runtime>, dry: bool) -> Self {
        if dry {
            config.make_dry();
        }
        Driver {
            config,
            runtime,
            dry,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Evaluates `record` against the rules of `queue`.
    ///
    /// Returns whether the webhook was consumed. EXIT ends evaluation
    /// normally; a fatal spool error is returned.
    fn evaluate(
        &self,
        queue: &str,
        record: WebHookRecord,
        job: Option<&str>,
    ) -> Result<bool, SpoolError> {
        let Some(rules) = self.config.rules(queue) else {
            warn!(queue, "no rules for queue");
            return Ok(false);
        };
        let context = Context::root(Rc::clone(&self.runtime), Some(Rc::clone(&rules)));
        let mut hook = record.into_hook(context);
        if let Some(name) = job {
            hook = hook.with_job(queue, name);
        }

        match rules.apply(&mut hook) {
            Ok(truth) => debug!(queue, uri = hook.request_uri(), ?truth, "rules evaluated"),
            Err(Halt::Exit) => debug!(queue, uri = hook.request_uri(), "EXIT"),
            Err(Halt::Spool(e)) => return Err(e),
        }
        Ok(hook.context().is_consumed())
    }

    // ==================== Hook files ====================

    /// Evaluates one record file against the `default` queue.
    ///
    /// The file is deleted when consumed, unless this is a dry run.
    pub fn process_hook_file(&self, path: &Path) -> Result<HookOutcome, DriverError> {
        let record = match WebHookRecord::read(path) {
            Ok(record) => record,
            Err(e) => {
                warn!("({}) {}", path.display(), e);
                return Ok(HookOutcome::Rejected);
            }
        };

        let consumed = match self.evaluate(DEFAULT_QUEUE, record, None) {
            Ok(consumed) => consumed,
            Err(e) => {
                error!(path = %path.display(), error = %e, "evaluation failed");
                false
            }
        };
        if !consumed {
            return Ok(HookOutcome::Kept);
        }
        if !self.dry {
            fs::remove_file(path).map_err(|source| DriverError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), "consumed hook file deleted");
        }
        Ok(HookOutcome::Consumed)
    }

    /// Processes a record file, or every extension-less regular file of a
    /// directory in name order.
    pub fn process_hook_path(&self, path: &Path) -> Result<Vec<(PathBuf, HookOutcome)>, DriverError> {
        let io_error = |source: io::Error| DriverError::Io {
            path: path.to_path_buf(),
            source,
        };
        if !path.is_dir() {
            let outcome = self.process_hook_file(path)?;
            return Ok(vec![(path.to_path_buf(), outcome)]);
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(path).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let file = entry.path();
            if entry.file_type().map_err(io_error)?.is_file() && file.extension().is_none() {
                files.push(file);
            }
        }
        files.sort();

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            match self.process_hook_file(&file) {
                Ok(outcome) => outcomes.push((file, outcome)),
                Err(e) => error!(error = %e, "hook file failed"),
            }
        }
        Ok(outcomes)
    }

    // ==================== Spool ====================

    fn spool(&self) -> Result<&SpoolManager, DriverError> {
        self.runtime.spool().ok_or(DriverError::NoSpool)
    }

    /// Drains the pending jobs of every declared queue in index order.
    pub fn drain_spool(&self) -> Result<DrainReport, DriverError> {
        let spool = self.spool()?;
        let index = spool.read_index()?;
        let mut report = DrainReport::default();

        for queue in spool.get_all_queues()? {
            if self.config.queue(&queue).is_none() {
                warn!(queue = %queue, "skipping undeclared queue");
                continue;
            }
            let pending = SpoolManager::sort(spool.discover_pending(&queue)?, &index);
            debug!(queue = %queue, jobs = pending.len(), "draining queue");

            for name in pending {
                match self.drain_job(spool, &queue, &name) {
                    Ok(JobOutcome::Processed) => report.processed += 1,
                    Ok(JobOutcome::Failed) => report.failed += 1,
                    Ok(JobOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        error!(queue = %queue, job = %name, error = %e, "job failed");
                        report.failed += 1;
                    }
                }
            }
        }
        info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            "spool drained"
        );
        Ok(report)
    }

    fn drain_job(&self, spool: &SpoolManager, queue: &str, name: &str) -> Result<JobOutcome, SpoolError> {
        if self.dry {
            let path = spool.job_path(queue, JobState::Pending, name);
            return Ok(if self.evaluate_job(&path, queue, name) {
                JobOutcome::Processed
            } else {
                JobOutcome::Failed
            });
        }

        if !spool.claim(queue, name)? {
            debug!(queue, job = name, "job claimed elsewhere");
            return Ok(JobOutcome::Skipped);
        }
        let path = spool.job_path(queue, JobState::Processing, name);
        if self.evaluate_job(&path, queue, name) {
            spool.complete(queue, name)?;
            Ok(JobOutcome::Processed)
        } else {
            spool.fail(queue, name)?;
            Ok(JobOutcome::Failed)
        }
    }

    /// Reads and evaluates the record at `path`. True if consumed.
    fn evaluate_job(&self, path: &Path, queue: &str, name: &str) -> bool {
        let record = match WebHookRecord::read(path) {
            Ok(record) => record,
            Err(e) => {
                warn!("({}) {}", path.display(), e);
                return false;
            }
        };
        match self.evaluate(queue, record, Some(name)) {
            Ok(consumed) => consumed,
            Err(e) => {
                error!(queue, job = name, error = %e, "evaluation failed");
                false
            }
        }
    }

    /// Applies each queue's RETENTION policy to its processed jobs.
    ///
    /// Returns the number of jobs removed.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, DriverError> {
        let spool = self.spool()?;
        let mut removed = 0;
        for decl in self.config.queues() {
            if let Some(policy) = &decl.retention {
                removed += prune_processed(spool, &decl.name, policy, now)?;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRuntime;
    use tempfile::tempdir;

    fn record(headers: &str, payload: &str) -> String {
        format!("/hook\n\nContent-Type: application/json\n{headers}\n\n{payload}")
    }

    fn driver(rules: &str, rt: &TestRuntime, dry: bool) -> Driver {
        Driver::new(Configuration::parse(rules).unwrap(), rt.runtime(), dry)
    }

    #[test]
    fn consumed_hook_file_is_deleted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook");
        fs::write(&path, record("", r#"{"a": 1}"#)).unwrap();
        let rt = TestRuntime::new();

        let outcome = driver("POST http://example.com", &rt, false)
            .process_hook_file(&path)
            .unwrap();
        assert_eq!(outcome, HookOutcome::Consumed);
        assert!(!path.exists());
        assert_eq!(rt.requests().len(), 1);
    }

    #[test]
    fn unconsumed_hook_file_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook");
        fs::write(&path, record("X-Foo: bar", "{}")).unwrap();
        let rt = TestRuntime::new();

        let outcome = driver("X-Foo: bar\nDROP", &rt, false)
            .process_hook_file(&path)
            .unwrap();
        assert_eq!(outcome, HookOutcome::Kept);
        assert!(path.exists());
    }

    #[test]
    fn exit_keeps_hook_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook");
        fs::write(&path, record("", "{}")).unwrap();
        let rt = TestRuntime::new();

        let outcome = driver("LOG bye\nEXIT\nPOST http://example.com", &rt, false)
            .process_hook_file(&path)
            .unwrap();
        assert_eq!(outcome, HookOutcome::Kept);
        assert_eq!(rt.printed(), vec!["bye"]);
        assert!(rt.requests().is_empty());
    }

    #[test]
    fn invalid_record_is_rejected_and_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook");
        fs::write(&path, "/hook\n\nContent-Type: text/plain\n\nhello").unwrap();
        let rt = TestRuntime::new();

        let outcome = driver("TRUE", &rt, false).process_hook_file(&path).unwrap();
        assert_eq!(outcome, HookOutcome::Rejected);
        assert!(path.exists());
    }

    #[test]
    fn dry_run_keeps_consumed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook");
        fs::write(&path, record("", "{}")).unwrap();
        let rt = TestRuntime::new();

        let outcome = driver("POST http://example.com", &rt, true)
            .process_hook_file(&path)
            .unwrap();
        assert_eq!(outcome, HookOutcome::Consumed);
        assert!(path.exists());
        assert!(rt.requests().is_empty());
    }

    #[test]
    fn directory_processes_extensionless_files_in_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b"), record("", r#"{"n": "b"}"#)).unwrap();
        fs::write(dir.path().join("a"), record("", r#"{"n": "a"}"#)).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a hook").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let rt = TestRuntime::new();

        let outcomes = driver("LOG ${n}", &rt, false)
            .process_hook_path(dir.path())
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, o)| *o == HookOutcome::Kept));
        assert_eq!(rt.printed(), vec!["a", "b"]);
    }

    fn enqueue(dir: &Path, spool: &SpoolManager, name: &str, contents: &str) {
        let source = dir.join(name);
        fs::write(&source, contents).unwrap();
        assert!(spool.enqueue(&source).unwrap());
    }

    #[test]
    fn drain_completes_consumed_and_fails_the_rest() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path().join("spool"));
        enqueue(dir.path(), &spool, "job-a", &record("X-Kind: good", "{}"));
        enqueue(dir.path(), &spool, "job-b", &record("X-Kind: bad", "{}"));
        enqueue(dir.path(), &spool, "job-c", "garbage");

        let stray = spool.job_path(DEFAULT_QUEUE, JobState::Pending, "stray");
        fs::write(&stray, record("X-Kind: good", "{}")).unwrap();
        let undeclared = spool.job_path("other", JobState::Pending, "job-a");
        fs::create_dir_all(undeclared.parent().unwrap()).unwrap();
        fs::write(&undeclared, record("", "{}")).unwrap();

        let rt = TestRuntime::new().with_spool(spool.clone());
        let report = driver("X-Kind: good\nPOST http://example.com", &rt, false)
            .drain_spool()
            .unwrap();

        assert_eq!(
            report,
            DrainReport {
                processed: 1,
                failed: 2,
                skipped: 0
            }
        );
        assert_eq!(spool.list(DEFAULT_QUEUE, JobState::Processed).unwrap(), vec!["job-a"]);
        assert_eq!(
            spool.list(DEFAULT_QUEUE, JobState::Failed).unwrap(),
            vec!["job-b", "job-c"]
        );
        assert_eq!(spool.discover_pending(DEFAULT_QUEUE).unwrap(), vec!["stray"]);
        assert!(undeclared.exists());
    }

    #[test]
    fn fanned_out_jobs_drain_on_the_next_pass() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path().join("spool"));
        enqueue(dir.path(), &spool, "job-1", &record("", r#"{"id": 1}"#));

        let rules = "QUEUE default {\n  ENQUEUE audit\n  POST http://example.com\n}\n\nQUEUE audit {\n  LOG audit ${id}\n  POST http://example.com/audit\n}";
        let rt = TestRuntime::new().with_spool(spool.clone());
        let driver = driver(rules, &rt, false);

        assert_eq!(driver.drain_spool().unwrap().processed, 1);
        assert_eq!(spool.discover_pending("audit").unwrap(), vec!["job-1"]);

        assert_eq!(driver.drain_spool().unwrap().processed, 1);
        assert_eq!(spool.list("audit", JobState::Processed).unwrap(), vec!["job-1"]);
        assert_eq!(rt.printed(), vec!["audit 1"]);
    }

    #[test]
    fn dry_drain_moves_nothing() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path().join("spool"));
        enqueue(dir.path(), &spool, "job-1", &record("", "{}"));

        let rt = TestRuntime::new().with_spool(spool.clone());
        let report = driver("ENQUEUE audit\nPOST http://example.com", &rt, true)
            .drain_spool()
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(spool.discover_pending(DEFAULT_QUEUE).unwrap(), vec!["job-1"]);
        assert!(spool.discover_pending("audit").unwrap().is_empty());
        assert!(rt.requests().is_empty());
    }

    #[test]
    fn drain_without_spool_is_an_error() {
        let rt = TestRuntime::new();
        assert!(matches!(
            driver("TRUE", &rt, false).drain_spool(),
            Err(DriverError::NoSpool)
        ));
    }

    #[test]
    fn prune_applies_declared_retention() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path().join("spool"));
        for name in ["job-1", "job-2", "job-3"] {
            enqueue(dir.path(), &spool, name, &record("", "{}"));
        }

        let rules = "QUEUE default RETENTION LAST 1 {\n  POST http://example.com\n}";
        let rt = TestRuntime::new().with_spool(spool.clone());
        let driver = driver(rules, &rt, false);
        assert_eq!(driver.drain_spool().unwrap().processed, 3);

        assert_eq!(driver.prune(Utc::now()).unwrap(), 2);
        assert_eq!(spool.list(DEFAULT_QUEUE, JobState::Processed).unwrap().len(), 1);
    }
}

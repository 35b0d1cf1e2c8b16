//! Per-queue job state machine backed by directory renames and hard links.
//!
//! Every queue owns four state directories under the spool root:
//!
//! ```text
//! <root>/<queue>/pending/<job>
//! <root>/<queue>/processing/<job>
//! <root>/<queue>/processed/<job>
//! <root>/<queue>/failed/<job>
//! ```
//!
//! A job is in exactly one state of a queue at a time. Transitions are single
//! `rename` calls, so two workers racing for the same job see exactly one
//! winner. Fan-out to another queue hard-links the job into that queue's
//! `pending` directory, sharing the content without copying it.
//!
//! Jobs entering the `default` queue through [`SpoolManager::enqueue`] also
//! get a line in `<root>/default/.index`, which fixes the order in which they
//! are drained.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::fsync::{fsync_dir, fsync_file, fsync_parent};

/// Name of the queue that receives externally enqueued jobs.
pub const DEFAULT_QUEUE: &str = "default";

/// Append-only arrival log inside the default queue directory.
const INDEX_FILE: &str = ".index";

/// Errors that can occur during spool operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The file handed to `enqueue` does not exist or is not a regular file.
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Queue or job name that is unsafe to use as a path component.
    #[error("invalid spool name: contains unsafe characters: {0:?}")]
    InvalidName(String),

    /// Another writer created the same link between our existence check and
    /// our link call.
    #[error("job {job} appeared in queue {queue} while linking it")]
    LinkRace { queue: String, job: String },
}

/// Result type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

/// The four states a job moves through inside one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Processed,
        JobState::Failed,
    ];

    /// Directory name of this state under a queue directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Processed => "processed",
            JobState::Failed => "failed",
        }
    }
}

/// Validates that a queue or job name is safe to use as a path component.
///
/// A name is unsafe if it:
/// - Is empty
/// - Contains path separators (`/` or `\`) or null bytes
/// - Starts with a dot (hidden files, `.`, `..`, the arrival index)
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.starts_with('.')
    {
        return Err(SpoolError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Filesystem spool rooted at a single directory.
#[derive(Debug, Clone)]
pub struct SpoolManager {
    root: PathBuf,
}

impl SpoolManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SpoolManager { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the jobs of `queue` in `state`.
    pub fn state_dir(&self, queue: &str, state: JobState) -> PathBuf {
        self.root.join(queue).join(state.dir_name())
    }

    /// Path of job `name` of `queue` in `state`.
    pub fn job_path(&self, queue: &str, state: JobState, name: &str) -> PathBuf {
        self.state_dir(queue, state).join(name)
    }

    /// Path of the arrival index of the default queue.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(DEFAULT_QUEUE).join(INDEX_FILE)
    }

    /// Moves a job from `pending` to `processing`.
    ///
    /// Returns `Ok(false)` if the job is not pending, including when another
    /// worker claimed it first.
    pub fn claim(&self, queue: &str, name: &str) -> Result<bool> {
        self.transition(queue, name, JobState::Pending, JobState::Processing)
    }

    /// Moves a job from `processing` to `processed`.
    pub fn complete(&self, queue: &str, name: &str) -> Result<bool> {
        self.transition(queue, name, JobState::Processing, JobState::Processed)
    }

    /// Moves a job from `processing` to `failed`.
    pub fn fail(&self, queue: &str, name: &str) -> Result<bool> {
        self.transition(queue, name, JobState::Processing, JobState::Failed)
    }

    fn transition(&self, queue: &str, name: &str, from: JobState, to: JobState) -> Result<bool> {
        validate_name(queue)?;
        validate_name(name)?;
        let source = self.job_path(queue, from, name);
        let target = self.job_path(queue, to, name);
        let moved = move_atomically(&source, &target)?;
        if moved {
            debug!(queue, job = name, from = from.dir_name(), to = to.dir_name(), "job moved");
        }
        Ok(moved)
    }

    /// Hard-links a job being processed in `source_queue` into the `pending`
    /// directory of `target_queue`.
    ///
    /// Returns `Ok(false)` if the job is not in `processing` of the source
    /// queue, or if the target queue already holds a job of that name in any
    /// state. A job therefore enters each queue at most once.
    pub fn fan_out(&self, source_queue: &str, name: &str, target_queue: &str) -> Result<bool> {
        validate_name(source_queue)?;
        validate_name(target_queue)?;
        validate_name(name)?;

        let source = self.job_path(source_queue, JobState::Processing, name);
        if !source.is_file() {
            return Ok(false);
        }
        if self.exists_anywhere(target_queue, name) {
            debug!(queue = target_queue, job = name, "job already known to queue");
            return Ok(false);
        }
        self.link_pending(&source, target_queue, name)
    }

    /// Hard-links an external file into the `pending` directory of the
    /// default queue and records its arrival in the index.
    ///
    /// Returns `Ok(false)` if the default queue already holds a job with the
    /// same file name in any state.
    pub fn enqueue(&self, source: &Path) -> Result<bool> {
        let is_file = fs::metadata(source).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return Err(SpoolError::SourceNotFound(source.to_path_buf()));
        }
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SpoolError::InvalidName(source.display().to_string()))?;
        validate_name(name)?;

        if self.exists_anywhere(DEFAULT_QUEUE, name) {
            debug!(job = name, "job already enqueued");
            return Ok(false);
        }
        if !self.link_pending(source, DEFAULT_QUEUE, name)? {
            return Ok(false);
        }
        self.append_index(name)?;
        Ok(true)
    }

    fn link_pending(&self, source: &Path, queue: &str, name: &str) -> Result<bool> {
        let pending = self.state_dir(queue, JobState::Pending);
        fs::create_dir_all(&pending)?;
        let link = pending.join(name);
        match fs::hard_link(source, &link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SpoolError::LinkRace {
                    queue: queue.to_string(),
                    job: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        fsync_dir(&pending)?;
        debug!(queue, job = name, "job linked into pending");
        Ok(true)
    }

    fn append_index(&self, name: &str) -> Result<()> {
        let path = self.index_path();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{name}")?;
        fsync_file(&file)?;
        Ok(())
    }

    /// Returns true if `queue` holds a job called `name` in any state.
    fn exists_anywhere(&self, queue: &str, name: &str) -> bool {
        JobState::ALL
            .iter()
            .any(|state| self.job_path(queue, *state, name).exists())
    }

    /// Reads the arrival index of the default queue.
    ///
    /// A missing index reads as empty.
    pub fn read_index(&self) -> Result<Vec<String>> {
        let file = match fs::File::open(self.index_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                names.push(line.to_string());
            }
        }
        Ok(names)
    }

    /// Lists the jobs currently pending in `queue`, sorted by name.
    pub fn discover_pending(&self, queue: &str) -> Result<Vec<String>> {
        validate_name(queue)?;
        list_jobs(&self.state_dir(queue, JobState::Pending))
    }

    /// Lists the jobs of `queue` in `state`, sorted by name.
    pub fn list(&self, queue: &str, state: JobState) -> Result<Vec<String>> {
        validate_name(queue)?;
        list_jobs(&self.state_dir(queue, state))
    }

    /// Lists the queue directories present under the spool root.
    pub fn get_all_queues(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut queues = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non-UTF-8 queue directory");
                continue;
            };
            if validate_name(&name).is_ok() {
                queues.push(name);
            }
        }
        queues.sort();
        Ok(queues)
    }

    /// Orders `files` by their first position in `index`.
    ///
    /// Files that are not in the index are dropped.
    pub fn sort(files: Vec<String>, index: &[String]) -> Vec<String> {
        let mut positioned: Vec<(usize, String)> = files
            .into_iter()
            .filter_map(|file| {
                index
                    .iter()
                    .position(|entry| *entry == file)
                    .map(|pos| (pos, file))
            })
            .collect();
        positioned.sort_by_key(|(pos, _)| *pos);
        positioned.into_iter().map(|(_, file)| file).collect()
    }
}

/// Renames `source` to `target`, creating the target directory if needed.
///
/// Returns `Ok(false)` if `source` does not exist, including when it
/// disappears between the check and the rename.
fn move_atomically(source: &Path, target: &Path) -> Result<bool> {
    if !source.exists() {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    fsync_parent(target)?;
    fsync_parent(source)?;
    Ok(true)
}

/// Lists the regular, non-hidden files of `dir`, sorted by name.
///
/// A missing directory lists as empty.
fn list_jobs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && !name.starts_with('.')
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Barrier;
    use tempfile::tempdir;

    fn write_pending(spool: &SpoolManager, queue: &str, name: &str, contents: &str) {
        let dir = spool.state_dir(queue, JobState::Pending);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), contents).unwrap();
    }

    fn states_of(spool: &SpoolManager, queue: &str, name: &str) -> Vec<JobState> {
        JobState::ALL
            .into_iter()
            .filter(|s| spool.job_path(queue, *s, name).exists())
            .collect()
    }

    #[test]
    fn validate_name_rejects_unsafe() {
        assert!(validate_name("job-1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("a\0b").is_err());
        assert!(validate_name(".index").is_err());
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn claim_complete_fail_lifecycle() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "q", "a", "x");
        write_pending(&spool, "q", "b", "y");

        assert!(spool.claim("q", "a").unwrap());
        assert_eq!(states_of(&spool, "q", "a"), vec![JobState::Processing]);
        assert!(spool.complete("q", "a").unwrap());
        assert_eq!(states_of(&spool, "q", "a"), vec![JobState::Processed]);

        assert!(spool.claim("q", "b").unwrap());
        assert!(spool.fail("q", "b").unwrap());
        assert_eq!(states_of(&spool, "q", "b"), vec![JobState::Failed]);
    }

    #[test]
    fn transitions_from_wrong_state_return_false() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "q", "a", "x");

        assert!(!spool.complete("q", "a").unwrap());
        assert!(!spool.fail("q", "a").unwrap());
        assert!(!spool.claim("q", "missing").unwrap());
        assert_eq!(states_of(&spool, "q", "a"), vec![JobState::Pending]);
    }

    #[test]
    fn claim_twice_second_returns_false() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "q", "a", "x");

        assert!(spool.claim("q", "a").unwrap());
        assert!(!spool.claim("q", "a").unwrap());
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());

        for round in 0..20 {
            let name = format!("job-{round}");
            write_pending(&spool, "q", &name, "x");
            let barrier = Barrier::new(4);
            let (barrier, spool, name) = (&barrier, &spool, name.as_str());
            let wins: usize = std::thread::scope(|s| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        s.spawn(move || {
                            barrier.wait();
                            spool.claim("q", name).unwrap()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap() as usize)
                    .sum()
            });
            assert_eq!(wins, 1, "round {round}");
            assert_eq!(states_of(spool, "q", name), vec![JobState::Processing]);
        }
    }

    #[test]
    fn claim_rejects_unsafe_names() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        assert!(matches!(
            spool.claim("q", "../escape"),
            Err(SpoolError::InvalidName(_))
        ));
        assert!(matches!(
            spool.claim("../q", "a"),
            Err(SpoolError::InvalidName(_))
        ));
    }

    #[test]
    fn fan_out_links_processing_job_into_target_pending() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "default", "a", "contents");
        spool.claim("default", "a").unwrap();

        assert!(spool.fan_out("default", "a", "builds").unwrap());
        let linked = spool.job_path("builds", JobState::Pending, "a");
        assert_eq!(fs::read_to_string(linked).unwrap(), "contents");
        // The source is untouched.
        assert_eq!(states_of(&spool, "default", "a"), vec![JobState::Processing]);
    }

    #[test]
    fn fan_out_is_idempotent_across_target_states() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "default", "a", "contents");
        spool.claim("default", "a").unwrap();

        assert!(spool.fan_out("default", "a", "builds").unwrap());
        assert!(!spool.fan_out("default", "a", "builds").unwrap());

        // Still refused once the target has moved the job on.
        spool.claim("builds", "a").unwrap();
        spool.complete("builds", "a").unwrap();
        assert!(!spool.fan_out("default", "a", "builds").unwrap());
        assert_eq!(states_of(&spool, "builds", "a"), vec![JobState::Processed]);
    }

    #[test]
    fn link_onto_job_that_appeared_after_check_is_a_race() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "default", "a", "contents");
        spool.claim("default", "a").unwrap();
        // Another writer lands the job between the existence check and the link.
        write_pending(&spool, "builds", "a", "other");

        let source = spool.job_path("default", JobState::Processing, "a");
        let result = spool.link_pending(&source, "builds", "a");
        assert!(matches!(
            result,
            Err(SpoolError::LinkRace { ref queue, ref job }) if queue == "builds" && job == "a"
        ));

        let target = spool.job_path("builds", JobState::Pending, "a");
        assert_eq!(fs::read_to_string(target).unwrap(), "other");
        assert_eq!(states_of(&spool, "default", "a"), vec![JobState::Processing]);
        assert_eq!(fs::read_to_string(source).unwrap(), "contents");
    }

    #[test]
    fn fan_out_requires_source_in_processing() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "default", "a", "contents");

        assert!(!spool.fan_out("default", "a", "builds").unwrap());
        assert!(states_of(&spool, "builds", "a").is_empty());
    }

    #[test]
    fn enqueue_links_and_records_arrival_order() {
        let dir = tempdir().unwrap();
        let incoming = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());

        for name in ["b", "a", "c"] {
            let path = incoming.path().join(name);
            fs::write(&path, name).unwrap();
            assert!(spool.enqueue(&path).unwrap());
        }

        assert_eq!(spool.read_index().unwrap(), vec!["b", "a", "c"]);
        assert_eq!(spool.discover_pending(DEFAULT_QUEUE).unwrap(), vec!["a", "b", "c"]);
        // The index file itself is not a job.
        assert!(spool.index_path().is_file());
    }

    #[test]
    fn enqueue_same_name_twice_is_refused() {
        let dir = tempdir().unwrap();
        let incoming = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        let path = incoming.path().join("a");
        fs::write(&path, "x").unwrap();

        assert!(spool.enqueue(&path).unwrap());
        assert!(!spool.enqueue(&path).unwrap());
        assert_eq!(spool.read_index().unwrap(), vec!["a"]);
    }

    #[test]
    fn enqueue_missing_source_is_an_error() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        let result = spool.enqueue(&dir.path().join("nope"));
        assert!(matches!(result, Err(SpoolError::SourceNotFound(_))));
    }

    #[test]
    fn read_index_missing_is_empty() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        assert!(spool.read_index().unwrap().is_empty());
    }

    #[test]
    fn get_all_queues_lists_directories() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        write_pending(&spool, "default", "a", "x");
        write_pending(&spool, "builds", "a", "x");
        fs::write(dir.path().join("stray-file"), "x").unwrap();

        assert_eq!(spool.get_all_queues().unwrap(), vec!["builds", "default"]);
    }

    #[test]
    fn get_all_queues_on_missing_root_is_empty() {
        let spool = SpoolManager::new("/nonexistent/spool/root");
        assert!(spool.get_all_queues().unwrap().is_empty());
    }

    #[test]
    fn sort_follows_index_and_drops_unknown() {
        let index: Vec<String> = ["c", "a", "b"].iter().map(|s| s.to_string()).collect();
        let files = vec!["a".to_string(), "b".to_string(), "x".to_string(), "c".to_string()];
        assert_eq!(SpoolManager::sort(files, &index), vec!["c", "a", "b"]);
    }

    proptest! {
        #[test]
        fn sort_output_is_ordered_subset_of_index(
            index in proptest::collection::vec("[a-e]", 0..10),
            files in proptest::collection::vec("[a-g]", 0..10),
        ) {
            let sorted = SpoolManager::sort(files.clone(), &index);
            let positions: Vec<usize> = sorted
                .iter()
                .map(|f| index.iter().position(|e| e == f).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(
                sorted.len(),
                files.iter().filter(|f| index.contains(f)).count()
            );
        }
    }
}

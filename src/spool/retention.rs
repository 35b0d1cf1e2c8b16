//! Retention pruning of processed jobs.
//!
//! A queue may declare how long its processed jobs are kept:
//!
//! | Declaration | A processed job expires when |
//! |-------------|------------------------------|
//! | `RETENTION LAST n` | it is not among the `n` newest |
//! | `RETENTION n DAYS` | it was last modified more than `n` days ago |
//! | `... AND ...` | both clauses expire it |
//! | `... OR ...` | either clause expires it |
//!
//! "Newest" is judged by modification time, ties broken by name. Pending,
//! processing and failed jobs are never pruned.

use std::fmt;
use std::fs;
use std::time::SystemTime;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use super::fsync::fsync_dir;
use super::manager::{JobState, Result, SpoolManager, validate_name};

/// How two retention clauses combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        })
    }
}

/// Retention declared on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the `n` newest processed jobs.
    Last(u32),
    /// Keep processed jobs younger than `n` days.
    Days(u32),
    /// Both clauses, joined by a combinator.
    Combined {
        last: u32,
        days: u32,
        combinator: Combinator,
    },
}

impl RetentionPolicy {
    pub fn max_tasks(&self) -> Option<u32> {
        match *self {
            RetentionPolicy::Last(n) | RetentionPolicy::Combined { last: n, .. } => Some(n),
            RetentionPolicy::Days(_) => None,
        }
    }

    pub fn max_days(&self) -> Option<u32> {
        match *self {
            RetentionPolicy::Days(n) | RetentionPolicy::Combined { days: n, .. } => Some(n),
            RetentionPolicy::Last(_) => None,
        }
    }

    pub fn combinator(&self) -> Option<Combinator> {
        match *self {
            RetentionPolicy::Combined { combinator, .. } => Some(combinator),
            _ => None,
        }
    }

    /// Decides whether the job at `rank` (0 = newest) modified at `modified`
    /// has expired at `now`.
    pub fn expires(&self, rank: usize, modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let by_count = |n: u32| rank >= n as usize;
        // A cutoff before the earliest representable date expires nothing.
        let by_age = |n: u32| {
            TimeDelta::try_days(i64::from(n))
                .and_then(|age| now.checked_sub_signed(age))
                .is_some_and(|cutoff| modified < cutoff)
        };
        match *self {
            RetentionPolicy::Last(n) => by_count(n),
            RetentionPolicy::Days(n) => by_age(n),
            RetentionPolicy::Combined {
                last,
                days,
                combinator: Combinator::And,
            } => by_count(last) && by_age(days),
            RetentionPolicy::Combined {
                last,
                days,
                combinator: Combinator::Or,
            } => by_count(last) || by_age(days),
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Last(n) => write!(f, "RETENTION LAST {n}"),
            RetentionPolicy::Days(n) => write!(f, "RETENTION {n} DAYS"),
            RetentionPolicy::Combined {
                last,
                days,
                combinator,
            } => write!(f, "RETENTION LAST {last} {combinator} {days} DAYS"),
        }
    }
}

/// Deletes the processed jobs of `queue` that `policy` expires at `now`.
///
/// Returns the number of jobs removed.
pub fn prune_processed(
    spool: &SpoolManager,
    queue: &str,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    validate_name(queue)?;
    let dir = spool.state_dir(queue, JobState::Processed);

    let mut jobs: Vec<(DateTime<Utc>, String)> = Vec::new();
    for name in spool.list(queue, JobState::Processed)? {
        let modified = fs::metadata(dir.join(&name))?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        jobs.push((DateTime::<Utc>::from(modified), name));
    }
    // Newest first; equal times fall back to name order.
    jobs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut removed = 0;
    for (rank, (modified, name)) in jobs.iter().enumerate() {
        if policy.expires(rank, *modified, now) {
            fs::remove_file(dir.join(name))?;
            debug!(queue, job = %name, "pruned processed job");
            removed += 1;
        }
    }
    if removed > 0 {
        fsync_dir(&dir)?;
        info!(queue, removed, policy = %policy, "retention applied");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn processed_job(spool: &SpoolManager, queue: &str, name: &str, age_days: u64) {
        let dir = spool.state_dir(queue, JobState::Processed);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        let mtime = SystemTime::now() - std::time::Duration::from_secs(age_days * 86_400 + 60);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn remaining(spool: &SpoolManager, queue: &str) -> Vec<String> {
        spool.list(queue, JobState::Processed).unwrap()
    }

    #[test]
    fn accessors_reflect_clauses() {
        let policy = RetentionPolicy::Combined {
            last: 5,
            days: 30,
            combinator: Combinator::Or,
        };
        assert_eq!(policy.max_tasks(), Some(5));
        assert_eq!(policy.max_days(), Some(30));
        assert_eq!(policy.combinator(), Some(Combinator::Or));
        assert_eq!(RetentionPolicy::Last(3).max_days(), None);
        assert_eq!(RetentionPolicy::Days(3).max_tasks(), None);
    }

    #[test]
    fn display_is_declaration_syntax() {
        assert_eq!(RetentionPolicy::Last(5).to_string(), "RETENTION LAST 5");
        assert_eq!(RetentionPolicy::Days(7).to_string(), "RETENTION 7 DAYS");
        let both = RetentionPolicy::Combined {
            last: 5,
            days: 7,
            combinator: Combinator::And,
        };
        assert_eq!(both.to_string(), "RETENTION LAST 5 AND 7 DAYS");
    }

    #[test]
    fn expires_by_rank_and_age() {
        let now = Utc::now();
        let old = now - TimeDelta::days(10);
        let fresh = now - TimeDelta::hours(1);

        assert!(!RetentionPolicy::Last(2).expires(1, old, now));
        assert!(RetentionPolicy::Last(2).expires(2, fresh, now));
        assert!(RetentionPolicy::Days(7).expires(0, old, now));
        assert!(!RetentionPolicy::Days(7).expires(5, fresh, now));

        let and = RetentionPolicy::Combined {
            last: 1,
            days: 7,
            combinator: Combinator::And,
        };
        assert!(!and.expires(3, fresh, now));
        assert!(!and.expires(0, old, now));
        assert!(and.expires(3, old, now));

        let or = RetentionPolicy::Combined {
            last: 1,
            days: 7,
            combinator: Combinator::Or,
        };
        assert!(or.expires(3, fresh, now));
        assert!(or.expires(0, old, now));
        assert!(!or.expires(0, fresh, now));
    }

    #[test]
    fn huge_day_counts_never_expire_by_age() {
        let now = Utc::now();
        let epoch = DateTime::<Utc>::from(SystemTime::UNIX_EPOCH);
        let forever = RetentionPolicy::Days(u32::MAX);
        assert!(!forever.expires(0, epoch, now));
        assert!(!RetentionPolicy::Days(100_000_000).expires(0, now, now));

        let or = RetentionPolicy::Combined {
            last: 1,
            days: 100_000_000,
            combinator: Combinator::Or,
        };
        assert!(or.expires(1, now, now));
        assert!(!or.expires(0, epoch, now));
    }

    #[test]
    fn prune_with_huge_day_count_keeps_everything() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        processed_job(&spool, "q", "ancient", 400);

        let removed =
            prune_processed(&spool, "q", &RetentionPolicy::Days(100_000_000), Utc::now()).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(remaining(&spool, "q"), vec!["ancient"]);
    }

    #[test]
    fn prune_keeps_newest_n() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        processed_job(&spool, "q", "oldest", 3);
        processed_job(&spool, "q", "middle", 2);
        processed_job(&spool, "q", "newest", 1);

        let removed = prune_processed(&spool, "q", &RetentionPolicy::Last(2), Utc::now()).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(remaining(&spool, "q"), vec!["middle", "newest"]);
    }

    #[test]
    fn prune_by_days() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        processed_job(&spool, "q", "ancient", 40);
        processed_job(&spool, "q", "recent", 1);

        let removed = prune_processed(&spool, "q", &RetentionPolicy::Days(30), Utc::now()).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(remaining(&spool, "q"), vec!["recent"]);
    }

    #[test]
    fn prune_or_expires_on_either_clause() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        processed_job(&spool, "q", "a", 40);
        processed_job(&spool, "q", "b", 2);
        processed_job(&spool, "q", "c", 1);

        let policy = RetentionPolicy::Combined {
            last: 1,
            days: 30,
            combinator: Combinator::Or,
        };
        assert_eq!(prune_processed(&spool, "q", &policy, Utc::now()).unwrap(), 2);
        assert_eq!(remaining(&spool, "q"), vec!["c"]);
    }

    #[test]
    fn prune_and_requires_both_clauses() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        processed_job(&spool, "q", "a", 40);
        processed_job(&spool, "q", "b", 2);
        processed_job(&spool, "q", "c", 1);

        let policy = RetentionPolicy::Combined {
            last: 1,
            days: 30,
            combinator: Combinator::And,
        };
        assert_eq!(prune_processed(&spool, "q", &policy, Utc::now()).unwrap(), 1);
        assert_eq!(remaining(&spool, "q"), vec!["b", "c"]);
    }

    #[test]
    fn prune_ignores_other_states() {
        let dir = tempdir().unwrap();
        let spool = SpoolManager::new(dir.path());
        let failed = spool.state_dir("q", JobState::Failed);
        fs::create_dir_all(&failed).unwrap();
        fs::write(failed.join("f"), "x").unwrap();

        let removed = prune_processed(&spool, "q", &RetentionPolicy::Last(0), Utc::now()).unwrap();
        assert_eq!(removed, 0);
        assert!(failed.join("f").exists());
    }
}

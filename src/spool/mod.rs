//! Filesystem spool for crash-safe job processing.
//!
//! Jobs are webhook records stored as plain files. Each queue moves its jobs
//! through four state directories:
//!
//! ```text
//! <root>/<queue>/pending/<job>      - waiting to be claimed
//! <root>/<queue>/processing/<job>   - claimed by a worker
//! <root>/<queue>/processed/<job>    - consumed by the queue's rules
//! <root>/<queue>/failed/<job>       - rejected, or evaluation failed
//! ```
//!
//! # Crash Safety
//!
//! - Every transition is a single `rename` followed by a directory fsync
//! - Fan-out and enqueue use hard links, so all queues share one copy of the
//!   job contents
//! - Jobs left in `processing` after a crash stay there for an operator to
//!   inspect; they are never reprocessed automatically

pub mod fsync;
pub mod manager;
pub mod retention;

pub use manager::{DEFAULT_QUEUE, JobState, Result, SpoolError, SpoolManager, validate_name};
pub use retention::{Combinator, RetentionPolicy, prune_processed};

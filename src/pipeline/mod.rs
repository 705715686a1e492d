//! Check pipeline.
//!
//! - `hash`: content digests
//! - `check`: single-site check with commit, notification and pruning
//! - `batch`: sequential runs over many sites
//! - `retention`: history pruning

pub mod batch;
pub mod check;
pub mod hash;
pub mod retention;

pub use batch::{BatchSummary, run_batch};
pub use check::{CheckOutcome, SiteChecker, detect_change};
pub use hash::content_hash;
pub use retention::{PruneSummary, RetentionPolicy};
